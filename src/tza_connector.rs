use serialport::{SerialPortInfo, SerialPortType, UsbPortInfo};

use crate::serial_terminal::{SerialTransport, TzaTerminalError};
use crate::tza_config::LineSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TzaDevice {
    pub description: String,
    pub serial: String,
}

impl TzaDevice {
    pub fn new(description: String, serial: String) -> Self {
        Self {
            description,
            serial,
        }
    }

    /// Parse a `"<description> - <serial>"` descriptor. Only the text after
    /// the first `"- "` identifies the device.
    pub fn from_descriptor(descriptor: &str) -> Result<Self, TzaConnectorError> {
        let invalid = || TzaConnectorError::InvalidDescriptor {
            descriptor: descriptor.to_string(),
        };

        let (description, serial) = descriptor.split_once("- ").ok_or_else(invalid)?;
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(description.trim().to_string(), serial.to_string()))
    }

    pub fn descriptor(&self) -> String {
        format!("{} - {}", self.description, self.serial)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TzaConnectorError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("Device descriptor '{descriptor}' is not of the form '<description> - <serial>'")]
    InvalidDescriptor { descriptor: String },

    #[error("Cannot open device with serial number {serial} on port {port}: {source}")]
    OpenFailed {
        serial: String,
        port: String,
        #[source]
        source: TzaTerminalError,
    },
}

pub struct Tza500Connector;

impl Tza500Connector {
    pub const VENDOR_ID: u16 = 0x0403;
    pub const PRODUCT_ID: u16 = 0x9a68;
    pub const PRODUCT_NAME: &'static str = "TZA500";

    fn is_tza500(info: &UsbPortInfo) -> bool {
        let by_id = info.vid == Self::VENDOR_ID && info.pid == Self::PRODUCT_ID;
        let by_name = info
            .product
            .as_deref()
            .is_some_and(|product| product.contains(Self::PRODUCT_NAME));
        by_id || by_name
    }

    fn device_from_port(port: &SerialPortInfo) -> Option<TzaDevice> {
        match &port.port_type {
            SerialPortType::UsbPort(info) if Self::is_tza500(info) => Some(TzaDevice::new(
                info.product
                    .clone()
                    .unwrap_or_else(|| Self::PRODUCT_NAME.to_string()),
                info.serial_number.clone().unwrap_or_default(),
            )),
            _ => None,
        }
    }

    /// All attached TZA500 bridges.
    pub fn available_devices() -> Result<Vec<TzaDevice>, TzaConnectorError> {
        let ports = serialport::available_ports()?;
        Ok(ports.iter().filter_map(Self::device_from_port).collect())
    }

    /// Descriptor strings of all attached devices, ready for `Tza500::connect`.
    pub fn available_descriptors() -> Result<Vec<String>, TzaConnectorError> {
        Ok(Self::available_devices()?
            .iter()
            .map(TzaDevice::descriptor)
            .collect())
    }

    /// Port name of the bridge with USB serial number `serial`. Falls back to
    /// `serial` itself so a plain port name works as well.
    pub fn resolve_port(serial: &str) -> String {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                log::debug!("Port enumeration failed: {}", e);
                return serial.to_string();
            }
        };

        Self::find_port(&ports, serial).unwrap_or_else(|| {
            log::debug!("No USB port with serial {}, using it as port name", serial);
            serial.to_string()
        })
    }

    fn find_port(ports: &[SerialPortInfo], serial: &str) -> Option<String> {
        ports.iter().find_map(|port| match &port.port_type {
            SerialPortType::UsbPort(info) if info.serial_number.as_deref() == Some(serial) => {
                Some(port.port_name.clone())
            }
            _ => None,
        })
    }

    /// Open the device named by `descriptor`.
    pub fn open(
        descriptor: &str,
        line: &LineSettings,
    ) -> Result<SerialTransport, TzaConnectorError> {
        let device = TzaDevice::from_descriptor(descriptor)?;
        let port = Self::resolve_port(&device.serial);
        log::debug!("Opening TZA500 {} on port {}", device.serial, port);

        SerialTransport::open(&port, line).map_err(|source| TzaConnectorError::OpenFailed {
            serial: device.serial,
            port,
            source,
        })
    }
}
