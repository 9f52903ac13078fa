//! # TZA500 RS
//!
//! A Rust library for driving the TZA500 transimpedance amplifier through its USB-serial bridge.
//!
//! The instrument speaks a short ASCII command protocol with carriage-return terminated
//! replies. This library wraps it in typed settings, tracks the instrument's configuration,
//! ranges the gain automatically when asked to, and converts raw current readings into the
//! unit of your choice.
//!
//! ## Features
//!
//! - **Device discovery**: Uses `serialport` for finding TZA500 bridges
//! - **Typed settings**: Gain, bandwidth, polarity and units as closed enums with their protocol codes
//! - **Auto gain**: Bounded gain ranging that converges on an in-range reading
//! - **Unit conversion**: Current (nA to A) and, with a sensitivity in A/W, power (nW to W)
//! - **Type safety**: Strong typing and error handling throughout
//!
//! ## Examples
//!
//! ### Device Connection and Basic Usage
//!
//! ```rust,no_run
//! use tza500_rs::{Bandwidth, Gain, GainLevel, Tza500, Unit};
//!
//! let descriptors = Tza500::find_devices()?;
//! let mut tza = Tza500::new();
//! if !tza.connect(&descriptors[0])? {
//!     return Err("TZA500 did not initialize".into());
//! }
//! println!("Firmware {}", tza.firmware_version());
//!
//! tza.set_bandwidth(Bandwidth::Khz1)?;
//! tza.set_gain(Gain::Fixed(GainLevel::X100))?;
//! tza.set_unit(Unit::Nanoampere);
//!
//! let reading = tza.measure()?;
//! println!("{}", reading);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Auto Gain and Power Units
//!
//! ```rust,no_run
//! use tza500_rs::{Gain, Tza500, Unit};
//!
//! let mut tza = Tza500::new();
//! tza.connect("TZA500 - 100231")?;
//!
//! tza.set_gain(Gain::Auto)?;
//! tza.set_unit(Unit::Microwatt);
//! tza.set_sensitivity(0.45)?; // A/W of the attached photodiode
//!
//! let reading = tza.measure()?;
//! println!("{} {}", reading.value, reading.unit_label());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Converting Raw Readings
//!
//! ```rust
//! use tza500_rs::{measurement, Unit};
//!
//! let m = measurement::convert("2,0uA", Unit::Microampere, 1.0).unwrap();
//! assert_eq!(m.value, 2.0);
//! assert_eq!(m.unit_label(), "µA");
//! ```

pub mod auto_gain;
pub mod measurement;
pub mod response;
pub mod serial_terminal;
pub mod tza500;
pub mod tza_config;
pub mod tza_connector;

pub use tza_config::{
    AutoZeroStatus, Bandwidth, CommSettings, Gain, GainLevel, LineSettings, Polarity,
    SettingsError, Unit,
};

pub use serial_terminal::{SerialTransport, Transport, TzaTerminal, TzaTerminalError};

pub use tza_connector::{Tza500Connector, TzaConnectorError, TzaDevice};

pub use measurement::{Measurement, MeasurementError};

pub use response::DeviceIdentity;

pub use tza500::{ConnectionState, GainStatus, Tza500, TzaError};
