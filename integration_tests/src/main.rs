//! Integration tests for the BLE UART bridge firmware.
//!
//! Run after flashing the firmware; the host needs a Bluetooth adapter.

mod ble_client;

use std::time::Duration;

use clap::Parser;
use colored::Colorize;

use ble_client::UartClient;
use tests::{print_results, run_all_tests};

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Integration tests for the BLE UART bridge firmware")]
struct Args {
    /// Advertised name prefix (the device appends its MAC suffix)
    #[arg(short, long, default_value = "BleBridge_")]
    name: String,

    /// BLE scan timeout in seconds
    #[arg(long, default_value = "10")]
    scan_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!("{}", "BLE UART Bridge Integration Tests".bold());
    println!("Scanning for \"{}*\"...", args.name);

    let client = UartClient::connect_by_prefix(&args.name, Duration::from_secs(args.scan_timeout)).await?;
    println!("{} {}", "Connected to".green(), client.name());

    println!("\nRunning tests...\n");

    let results = run_all_tests(&client).await;
    print_results(&results);

    client.disconnect().await?;

    // Exit with error code if any tests failed
    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
