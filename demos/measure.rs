// Measurement example
//
// Connects to a TZA500, applies the requested settings and prints a series of readings.
//
//   cargo run --example measure -- --gain auto-gain --unit nA --count 5

use clap::Parser;
use std::time::Duration;
use tza500_rs::{Bandwidth, Gain, Tza500, Unit};

#[derive(Parser, Debug)]
#[command(about = "Take measurements with a TZA500 transimpedance amplifier")]
struct Args {
    /// Device descriptor "<description> - <serial>", defaults to the first device found
    #[arg(short, long)]
    device: Option<String>,

    /// Gain: x1, x10, x100, x1000, x10000, x100000 or auto-gain
    #[arg(short, long, default_value = "auto-gain")]
    gain: Gain,

    /// Bandwidth: "10 kHz", "1 kHz", "100 Hz" or "10 Hz"
    #[arg(short, long, default_value = "10 kHz")]
    bandwidth: Bandwidth,

    /// Unit: nA, uA, mA, A, nW, uW, mW or W
    #[arg(short, long, default_value = "uA")]
    unit: Unit,

    /// Sensitivity in A/W, used for power units
    #[arg(short, long, default_value_t = 1.0)]
    sensitivity: f64,

    /// Invert input polarity
    #[arg(long)]
    invert: bool,

    /// Run an auto zero before measuring
    #[arg(long)]
    auto_zero: bool,

    /// Number of readings
    #[arg(short, long, default_value_t = 1)]
    count: u32,

    /// Pause between readings in milliseconds
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let descriptor = match args.device {
        Some(device) => device,
        None => match Tza500::find_devices()?.into_iter().next() {
            Some(device) => device,
            None => {
                println!("No TZA500 devices found.");
                return Ok(());
            }
        },
    };

    let mut tza = Tza500::new();
    if !tza.connect(&descriptor)? {
        println!("Could not initialize {}", descriptor);
        return Ok(());
    }
    println!("Connected to {} (firmware {})", descriptor, tza.firmware_version());

    if !tza.set_polarity(args.invert.into())? {
        println!("Warning: polarity not acknowledged");
    }
    if args.auto_zero && !tza.auto_zero()? {
        println!("Warning: auto zero not acknowledged");
    }
    if !tza.set_bandwidth(args.bandwidth)? {
        println!("Warning: bandwidth not acknowledged");
    }
    if !tza.set_gain(args.gain)? {
        println!("Warning: gain not acknowledged");
    }
    tza.set_unit(args.unit);
    tza.set_sensitivity(args.sensitivity)?;

    println!("Unit: {}, sensitivity: {}", tza.unit().description(), tza.sensitivity());

    for i in 0..args.count {
        let reading = tza.measure()?;
        let gain = tza
            .query_gain()?
            .map(|g| g.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("{:>4}: {:>16} {}  (gain {})", i + 1, reading.value, reading.unit_label(), gain);
        if i + 1 < args.count {
            std::thread::sleep(Duration::from_millis(args.interval_ms));
        }
    }

    tza.disconnect();
    Ok(())
}
