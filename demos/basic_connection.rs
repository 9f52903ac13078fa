// Basic device discovery and connection example
//
// This example shows how to discover TZA500 devices, connect to the first one and
// print what the instrument reports about itself.

use tza500_rs::Tza500;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (optional)
    env_logger::init();

    println!("TZA500 Device Discovery Example");
    println!("===============================\n");

    println!("1. Discovering available TZA500 devices...");
    let devices = Tza500::find_devices()?;

    if devices.is_empty() {
        println!("No TZA500 devices found. Please connect a device and try again.");
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for (i, device) in devices.iter().enumerate() {
        println!("  {}. {}", i + 1, device);
    }
    println!();

    println!("2. Connecting to first available device...");
    let mut tza = Tza500::new();
    if !tza.connect(&devices[0])? {
        println!("Device did not answer the handshake or failed to initialize.");
        return Ok(());
    }
    println!("Successfully connected!");

    println!("\n3. Device information:");
    println!("  Firmware version:      {}", tza.firmware_version());
    println!("  Serial number:         {}", tza.serial_number());
    println!("  Date of manufacturing: {}", tza.date_of_manufacturing());
    println!("  Initial auto zero:     {}", tza.auto_zero_status());
    println!("\nDevice info:\n{}", tza.info()?);

    println!("\n4. Testing basic communication...");
    match tza.query_gain()? {
        Some(gain) => println!("Current gain: {}", gain),
        None => println!("Gain query returned an unknown code"),
    }
    match tza.query_bandwidth()? {
        Some(bandwidth) => println!("Current bandwidth: {}", bandwidth),
        None => println!("Bandwidth query returned an unknown code"),
    }

    tza.disconnect();
    println!("\n5. Connection test completed successfully!");

    Ok(())
}
