//! Modbus Master Demo
//!
//! Polls a Modbus TCP slave and shows:
//! - Register and coil reads/writes with function code naming (read_03, write_05, ...)
//! - Connection state observers
//! - Concurrent callers sharing one client
//!
//! Usage: cargo run --bin demo [server_address] [unit]
//! Example: cargo run --bin demo 127.0.0.1:502 1

use modbus_master::{
    CallbackLogger, DeviceLimits, LogLevel, ModbusClient, ModbusTcpClient, TcpConfig,
    TcpTransport, DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 {}", modbus_master::info());
    println!("=============================\n");

    let server_address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_TCP_PORT));
    let unit: u8 = std::env::args()
        .nth(2)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(1);

    // =========================================================================
    // Part 1: Client setup
    // =========================================================================
    println!("🔌 Part 1: Connecting to {}", server_address);
    println!("---------------------------------");

    let address = match tokio::net::lookup_host(&server_address).await?.next() {
        Some(address) => address,
        None => {
            println!("  ⚠️  Cannot resolve {}", server_address);
            return Ok(());
        }
    };

    let logger = CallbackLogger::new(|level: LogLevel, message: &str| {
        println!("    [{}] {}", level, message);
    });
    let config = TcpConfig::new(address, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    let mut client = ModbusTcpClient::with_logger(TcpTransport::new(config), logger)
        .with_limits(DeviceLimits::new().with_inter_request_delay_ms(20));

    client.on_connection_change(|state| println!("  🔔 Connection {}", state));

    if let Err(e) = client.connect().await {
        println!("  ⚠️  Connection failed: {}", e);
        println!("  (This is expected if no Modbus server is running)");
        println!("\n🎉 Demo completed! (TCP operations skipped)");
        return Ok(());
    }

    // =========================================================================
    // Part 2: Reads and writes
    // =========================================================================
    println!("\n📖 Part 2: Read Operations");
    println!("---------------------------");

    match client.read_03(unit, 0, 5).await {
        Ok(values) => println!("  FC03 Holding registers 0-4: {:?}", values),
        Err(e) => println!("  FC03 Error: {}", e),
    }

    match client.read_01(unit, 0, 8).await {
        Ok(coils) => {
            let states: Vec<&str> = coils.iter().map(|&c| if c { "ON" } else { "OFF" }).collect();
            println!("  FC01 Coils 0-7: {:?}", states);
        }
        Err(e) => println!("  FC01 Error: {}", e),
    }

    println!("\n✏️  Write Operations");
    println!("---------------------");

    match client.write_06(unit, 100, 0x1234).await {
        Ok(()) => println!("  FC06 Wrote register 100 = 0x1234"),
        Err(e) => println!("  FC06 Error: {}", e),
    }

    match client.write_05(unit, 172, true).await {
        Ok(()) => println!("  FC05 Switched coil 172 ON"),
        Err(e) => println!("  FC05 Error: {}", e),
    }

    // =========================================================================
    // Part 3: Shared client
    // =========================================================================
    println!("\n🔁 Part 3: Concurrent polling through one client");
    println!("--------------------------------------------------");

    let client = Arc::new(client);
    let mut pollers = Vec::new();
    for poller in 0..3u16 {
        let client = client.clone();
        pollers.push(tokio::spawn(async move {
            for round in 0..3 {
                match client.read_holding_registers(unit, poller * 10, 2).await {
                    Ok(values) => println!("  poller {} round {}: {:?}", poller, round, values),
                    Err(e) => println!("  poller {} round {} failed: {}", poller, round, e),
                }
                sleep(Duration::from_millis(50)).await;
            }
        }));
    }
    for poller in pollers {
        poller.await?;
    }

    // Statistics
    let stats = client.stats().await;
    println!("\n  📊 Statistics:");
    println!("    Requests: {}, Responses: {}", stats.requests_sent, stats.responses_received);
    println!("    Bytes sent: {}, received: {}", stats.bytes_sent, stats.bytes_received);
    println!("    Success rate: {:.1}%", stats.success_rate());

    client.disconnect().await;

    println!("\n🎉 Demo completed!");
    Ok(())
}
