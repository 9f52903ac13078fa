use std::fmt;
use std::thread;

use crate::auto_gain::{self, GainRanging};
use crate::measurement::{self, Measurement, MeasurementError};
use crate::response::{self, AutoZeroReply, DeviceIdentity, DEVICE_IDENTIFIER};
use crate::serial_terminal::{Transport, TzaTerminal, TzaTerminalError};
use crate::tza_config::{
    AutoZeroStatus, Bandwidth, CommSettings, Gain, GainLevel, LineSettings, Polarity,
    SettingsError, Unit,
};
use crate::tza_connector::{Tza500Connector, TzaConnectorError};

#[derive(Debug, thiserror::Error)]
pub enum TzaError {
    #[error("Connection error: {0}")]
    Connection(#[from] TzaConnectorError),

    #[error("Serial terminal error: {0}")]
    Terminal(#[from] TzaTerminalError),

    #[error("Invalid argument: {0}")]
    Settings(#[from] SettingsError),

    #[error("Measurement error: {0}")]
    Measurement(#[from] MeasurementError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Initializing,
    Ready,
}

/// Reply of the gain query: the nominal selection and the level in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainStatus {
    pub selection: Gain,
    pub active: GainLevel,
}

impl fmt::Display for GainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.selection.is_auto() {
            write!(f, "Auto: {}", self.active)
        } else {
            write!(f, "{}", self.active)
        }
    }
}

/// Last known configuration of the instrument. Only touched by acknowledged replies.
#[derive(Debug, Clone, PartialEq)]
struct DeviceState {
    gain: Gain,
    active_gain: Option<GainLevel>,
    max_gain: GainLevel,
    bandwidth: Bandwidth,
    polarity: Polarity,
    unit: Unit,
    sensitivity: f64,
    auto_zero: AutoZeroStatus,
    identity: DeviceIdentity,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            gain: Gain::default(),
            active_gain: None,
            max_gain: GainLevel::MAX,
            bandwidth: Bandwidth::default(),
            polarity: Polarity::default(),
            unit: Unit::default(),
            sensitivity: 1.0,
            auto_zero: AutoZeroStatus::default(),
            identity: DeviceIdentity::default(),
        }
    }
}

/// A TZA500 transimpedance amplifier.
///
/// One owner per open connection. Setters return `Ok(false)` when the
/// instrument does not acknowledge, queries return `Ok(None)` for codes they
/// do not know, and both leave the cached state as it was.
pub struct Tza500 {
    terminal: Option<TzaTerminal>,
    connection: ConnectionState,
    state: DeviceState,
    line: LineSettings,
    comm: CommSettings,
}

impl Default for Tza500 {
    fn default() -> Self {
        Self::new()
    }
}

impl Tza500 {
    const HANDSHAKE: &'static str = "$U";
    const HANDSHAKE_ACK: &'static str = "U OK";
    const INFO: &'static str = "$I";
    const AUTO_ZERO: &'static str = "$A";
    const AUTO_ZERO_RESET: &'static str = "$R";
    const SINGLE_MEASUREMENT: &'static str = "$E";
    const QUERY_POLARITY: &'static str = "$F";
    const QUERY_BANDWIDTH: &'static str = "B?";
    const QUERY_GAIN: &'static str = "V?";

    pub fn new() -> Self {
        Self::with_settings(LineSettings::default(), CommSettings::default())
    }

    pub fn with_settings(line: LineSettings, comm: CommSettings) -> Self {
        Self {
            terminal: None,
            connection: ConnectionState::Disconnected,
            state: DeviceState::default(),
            line,
            comm,
        }
    }

    /// Attached devices as `"<description> - <serial>"` descriptors.
    pub fn find_devices() -> Result<Vec<String>, TzaError> {
        Ok(Tza500Connector::available_descriptors()?)
    }

    /// Open the device named by `descriptor` and initialize it.
    ///
    /// Failing to open the port is an error. Once the port is open, any
    /// failed handshake or initialization step closes it again and yields
    /// `Ok(false)`. Connecting while connected is `Ok(false)` as well.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn connect(&mut self, descriptor: &str) -> Result<bool, TzaError> {
        if self.terminal.is_some() {
            log::warn!("Already connected, refusing to connect to {}", descriptor);
            return Ok(false);
        }

        self.connection = ConnectionState::Connecting;
        let transport = match Tza500Connector::open(descriptor, &self.line) {
            Ok(transport) => transport,
            Err(e) => {
                self.connection = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        Ok(self.attach(Box::new(transport)))
    }

    /// Initialize an instrument behind an already open transport.
    pub fn connect_transport(&mut self, transport: Box<dyn Transport>) -> bool {
        if self.terminal.is_some() {
            log::warn!("Already connected, refusing new transport");
            return false;
        }
        self.connection = ConnectionState::Connecting;
        self.attach(transport)
    }

    fn attach(&mut self, transport: Box<dyn Transport>) -> bool {
        self.terminal = Some(TzaTerminal::new(transport, self.comm.clone()));

        match self.handshake_and_initialize() {
            Ok(true) => {
                self.connection = ConnectionState::Ready;
                log::debug!("TZA500 ready, firmware {}", self.state.identity.firmware_version);
                true
            }
            Ok(false) => {
                log::warn!("TZA500 initialization failed in state {:?}", self.connection);
                self.disconnect();
                false
            }
            Err(e) => {
                log::warn!("TZA500 connection aborted in state {:?}: {}", self.connection, e);
                self.disconnect();
                false
            }
        }
    }

    fn handshake_and_initialize(&mut self) -> Result<bool, TzaError> {
        self.connection = ConnectionState::Handshaking;
        let reply = self.exec(Self::HANDSHAKE)?;
        if reply != Self::HANDSHAKE_ACK {
            log::debug!("Handshake answered '{}'", reply);
            return Ok(false);
        }

        self.connection = ConnectionState::Initializing;
        let info = self.info()?;
        let Some(identity) = response::parse_identity(&info) else {
            log::debug!("Device info does not start with {}: '{}'", DEVICE_IDENTIFIER, info);
            return Ok(false);
        };
        log::debug!("TZA500 identity: {:?}", identity);
        self.state.identity = identity;

        if !self.auto_zero_reset()? {
            return Ok(false);
        }
        self.set_gain(Gain::default())
    }

    /// Close the port, if any, and forget everything about the device.
    pub fn disconnect(&mut self) {
        if let Some(mut terminal) = self.terminal.take() {
            if let Err(e) = terminal.close() {
                log::warn!("Failed to close TZA500 port: {}", e);
            }
        }
        self.connection = ConnectionState::Disconnected;
        self.state = DeviceState::default();
    }

    fn terminal(&mut self) -> Result<&mut TzaTerminal, TzaTerminalError> {
        self.terminal.as_mut().ok_or(TzaTerminalError::NotConnected)
    }

    fn exec(&mut self, command: &str) -> Result<String, TzaError> {
        let reply = self.terminal()?.exec(command)?;
        log::debug!("{} -> '{}'", command, reply);
        Ok(reply)
    }

    pub fn is_connected(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Raw device info text.
    pub fn info(&mut self) -> Result<String, TzaError> {
        self.exec(Self::INFO)
    }

    pub fn firmware_version(&self) -> &str {
        &self.state.identity.firmware_version
    }

    pub fn serial_number(&self) -> &str {
        &self.state.identity.serial_number
    }

    pub fn date_of_manufacturing(&self) -> &str {
        &self.state.identity.date_of_manufacturing
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.state.identity
    }

    pub fn unit(&self) -> Unit {
        self.state.unit
    }

    pub fn set_unit(&mut self, unit: Unit) {
        self.state.unit = unit;
    }

    /// Select the unit by label, e.g. `"µA"` or `"mW"`.
    pub fn set_unit_label(&mut self, label: &str) -> Result<(), TzaError> {
        self.state.unit = label.parse()?;
        Ok(())
    }

    pub fn sensitivity(&self) -> f64 {
        self.state.sensitivity
    }

    /// A/W conversion factor used for power units.
    pub fn set_sensitivity(&mut self, sensitivity: f64) -> Result<(), TzaError> {
        if !sensitivity.is_finite() || sensitivity <= 0.0 {
            return Err(SettingsError::InvalidSensitivity(sensitivity).into());
        }
        self.state.sensitivity = sensitivity;
        Ok(())
    }

    pub fn auto_zero_status(&self) -> AutoZeroStatus {
        self.state.auto_zero
    }

    pub fn max_gain(&self) -> GainLevel {
        self.state.max_gain
    }

    pub fn gain(&self) -> Gain {
        self.state.gain
    }

    pub fn active_gain(&self) -> Option<GainLevel> {
        self.state.active_gain
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.state.bandwidth
    }

    pub fn polarity(&self) -> Polarity {
        self.state.polarity
    }

    pub fn query_polarity(&mut self) -> Result<Option<Polarity>, TzaError> {
        let reply = self.exec(Self::QUERY_POLARITY)?;
        let polarity = response::parse_polarity(&reply);
        if let Some(polarity) = polarity {
            self.state.polarity = polarity;
        }
        Ok(polarity)
    }

    pub fn is_polarity_inverted(&mut self) -> Result<Option<bool>, TzaError> {
        Ok(self.query_polarity()?.map(|p| p.is_inverted()))
    }

    pub fn set_polarity(&mut self, polarity: Polarity) -> Result<bool, TzaError> {
        let letter = polarity.set_letter().to_string();
        let reply = self.exec(&format!("${letter}"))?;
        if !response::is_ack(&reply, &letter) {
            log::warn!("Polarity {:?} not acknowledged: '{}'", polarity, reply);
            return Ok(false);
        }
        self.state.polarity = polarity;
        Ok(true)
    }

    pub fn query_bandwidth(&mut self) -> Result<Option<Bandwidth>, TzaError> {
        let reply = self.exec(Self::QUERY_BANDWIDTH)?;
        let bandwidth = response::parse_bandwidth(&reply);
        if let Some(bandwidth) = bandwidth {
            self.state.bandwidth = bandwidth;
        }
        Ok(bandwidth)
    }

    pub fn set_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<bool, TzaError> {
        let code = bandwidth.code();
        let reply = self.exec(code)?;
        if !response::is_ack(&reply, code) {
            log::warn!("Bandwidth {} not acknowledged: '{}'", bandwidth, reply);
            return Ok(false);
        }
        self.state.bandwidth = bandwidth;
        Ok(true)
    }

    /// Set the bandwidth by label, e.g. `"1 kHz"`. Unknown labels fail before
    /// anything is sent.
    pub fn set_bandwidth_label(&mut self, label: &str) -> Result<bool, TzaError> {
        let bandwidth = label.parse::<Bandwidth>()?;
        self.set_bandwidth(bandwidth)
    }

    /// Ask the instrument for its active gain level.
    ///
    /// Outside auto mode the answer also becomes the nominal selection.
    pub fn query_gain(&mut self) -> Result<Option<GainStatus>, TzaError> {
        let reply = self.exec(Self::QUERY_GAIN)?;
        let Some(level) = response::parse_gain(&reply) else {
            return Ok(None);
        };

        self.state.active_gain = Some(level);
        if !self.state.gain.is_auto() {
            self.state.gain = Gain::Fixed(level);
        }
        Ok(Some(GainStatus {
            selection: self.state.gain,
            active: level,
        }))
    }

    /// Select a fixed gain or auto ranging.
    ///
    /// Auto is a host side mode and sends nothing. A fixed level above the
    /// current maximum is rejected before anything is sent.
    pub fn set_gain(&mut self, gain: Gain) -> Result<bool, TzaError> {
        let level = match gain {
            Gain::Auto => {
                self.state.gain = Gain::Auto;
                return Ok(true);
            }
            Gain::Fixed(level) => level,
        };

        if level > self.state.max_gain {
            return Err(SettingsError::GainAboveMax {
                requested: level,
                max: self.state.max_gain,
            }
            .into());
        }

        if !self.switch_gain_level(level)? {
            return Ok(false);
        }
        self.state.gain = Gain::Fixed(level);
        Ok(true)
    }

    /// Set the gain by label, e.g. `"x100"` or `"auto-gain"`.
    pub fn set_gain_label(&mut self, label: &str) -> Result<bool, TzaError> {
        let gain = label.parse::<Gain>()?;
        self.set_gain(gain)
    }

    /// Change the active level only; the nominal selection stays as it is.
    fn switch_gain_level(&mut self, level: GainLevel) -> Result<bool, TzaError> {
        let code = level.code();
        let reply = self.exec(code)?;
        if !response::is_ack(&reply, code) {
            log::warn!("Gain {} not acknowledged: '{}'", level, reply);
            return Ok(false);
        }
        self.state.active_gain = Some(level);
        Ok(true)
    }

    /// Plain auto-zero. The instrument may narrow the usable gain range.
    pub fn auto_zero(&mut self) -> Result<bool, TzaError> {
        let reply = self.exec(Self::AUTO_ZERO)?;
        let settle = match response::parse_auto_zero(&reply) {
            Some(AutoZeroReply::LimitedTo(max)) => {
                self.state.max_gain = max;
                self.comm.auto_zero_settle
            }
            Some(AutoZeroReply::FullRange) => {
                self.state.max_gain = GainLevel::MAX;
                self.comm.auto_zero_full_settle
            }
            None => {
                log::warn!("Auto zero not acknowledged: '{}'", reply);
                return Ok(false);
            }
        };
        self.state.auto_zero = AutoZeroStatus::Performed;
        log::debug!("Auto zero done, max gain {}", self.state.max_gain);
        thread::sleep(settle);
        self.clamp_gain_to_max()
    }

    /// Bring an active level above MaxGain back down to MaxGain. A fixed
    /// selection follows the active level; `Auto` stays `Auto`.
    fn clamp_gain_to_max(&mut self) -> Result<bool, TzaError> {
        let max = self.state.max_gain;
        match self.state.active_gain {
            Some(active) if active > max => {
                log::debug!("Gain {} above max gain, switching to {}", active, max);
                if !self.switch_gain_level(max)? {
                    return Ok(false);
                }
                if let Gain::Fixed(_) = self.state.gain {
                    self.state.gain = Gain::Fixed(max);
                }
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    /// Auto-zero that also restores the full gain range.
    pub fn auto_zero_reset(&mut self) -> Result<bool, TzaError> {
        let reply = self.exec(Self::AUTO_ZERO_RESET)?;
        if !response::is_ack(&reply, "R") {
            log::warn!("Auto zero reset not acknowledged: '{}'", reply);
            return Ok(false);
        }
        self.state.auto_zero = AutoZeroStatus::PerformedWithReset;
        self.state.max_gain = GainLevel::MAX;
        thread::sleep(self.comm.reset_settle);
        Ok(true)
    }

    /// One raw reading, e.g. `1,5nA`, without the leading `I`.
    pub fn single_raw_measurement(&mut self) -> Result<String, TzaError> {
        let reply = self.exec(Self::SINGLE_MEASUREMENT)?;
        Ok(response::parse_raw_measurement(&reply))
    }

    /// One reading in the selected unit. In auto mode the gain is ranged first.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn measure(&mut self) -> Result<Measurement, TzaError> {
        let mut raw = self.single_raw_measurement()?;
        if self.state.gain.is_auto() {
            let outcome = auto_gain::auto_range(self, raw)?;
            if !outcome.settled {
                log::debug!("Gain ranging did not settle after {} steps", outcome.steps);
            }
            raw = outcome.reading;
        }
        Ok(measurement::convert(
            &raw,
            self.state.unit,
            self.state.sensitivity,
        )?)
    }
}

impl GainRanging for Tza500 {
    type Error = TzaError;

    fn active_gain_level(&mut self) -> Result<Option<GainLevel>, TzaError> {
        if self.state.active_gain.is_none() {
            self.query_gain()?;
        }
        Ok(self.state.active_gain)
    }

    fn apply_gain_level(&mut self, level: GainLevel) -> Result<bool, TzaError> {
        self.switch_gain_level(level)
    }

    fn max_gain_level(&self) -> GainLevel {
        self.state.max_gain
    }

    fn measure_raw(&mut self) -> Result<String, TzaError> {
        self.single_raw_measurement()
    }
}

impl Drop for Tza500 {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial_terminal::mock::MockTransport;

    const INFO: &str = "TZA500 FW 1.04\nSerial: 100231\nDate of manufacturing: 7/2024\r";

    fn script_connect(mock: &MockTransport, info: &str) {
        mock.expect("$U", "U OK\r")
            .expect("$I", info)
            .expect("$R", "R OK\r")
            .expect("V1", "V1 OK\r");
    }

    fn connected() -> (Tza500, MockTransport) {
        let mock = MockTransport::new();
        script_connect(&mock, INFO);
        let mut tza = Tza500::with_settings(LineSettings::default(), CommSettings::immediate());
        assert!(tza.connect_transport(Box::new(mock.clone())));
        (tza, mock)
    }

    #[test]
    fn test_connect_initializes_state() {
        let (tza, mock) = connected();
        assert_eq!(tza.connection_state(), ConnectionState::Ready);
        assert_eq!(mock.sent(), vec!["$U", "$I", "$R", "V1"]);
        assert_eq!(tza.firmware_version(), "1.04");
        assert_eq!(tza.serial_number(), "100231");
        assert_eq!(tza.date_of_manufacturing(), "7/2024");
        assert_eq!(tza.auto_zero_status(), AutoZeroStatus::PerformedWithReset);
        assert_eq!(tza.max_gain(), GainLevel::MAX);
        assert_eq!(tza.gain(), Gain::Fixed(GainLevel::X1));
        assert_eq!(tza.active_gain(), Some(GainLevel::X1));
        assert_eq!(tza.unit(), Unit::Microampere);
    }

    #[test]
    fn test_connect_without_serial_line() {
        let mock = MockTransport::new();
        script_connect(&mock, "TZA500 FW 1.04\nDate of manufacturing: 7/2024\r");
        let mut tza = Tza500::with_settings(LineSettings::default(), CommSettings::immediate());

        assert!(tza.connect_transport(Box::new(mock)));
        assert_eq!(tza.serial_number(), "");
        assert_eq!(tza.firmware_version(), "1.04");
        assert_eq!(tza.date_of_manufacturing(), "7/2024");
    }

    #[test]
    fn test_bad_handshake_disconnects() {
        let mock = MockTransport::new();
        mock.expect("$U", "U ERR\r");
        let mut tza = Tza500::with_settings(LineSettings::default(), CommSettings::immediate());

        assert!(!tza.connect_transport(Box::new(mock.clone())));
        assert!(mock.is_closed());
        assert!(!tza.is_connected());
        assert_eq!(tza.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_wrong_device_disconnects() {
        let mock = MockTransport::new();
        mock.expect("$U", "U OK\r").expect("$I", "KEL103 V1.0\r");
        let mut tza = Tza500::with_settings(LineSettings::default(), CommSettings::immediate());

        assert!(!tza.connect_transport(Box::new(mock.clone())));
        assert!(mock.is_closed());
        assert_eq!(tza.firmware_version(), "");
        assert_eq!(mock.remaining(), 0);
    }

    #[test]
    fn test_failed_reset_disconnects() {
        let mock = MockTransport::new();
        mock.expect("$U", "U OK\r")
            .expect("$I", INFO)
            .expect("$R", "R ERR\r");
        let mut tza = Tza500::with_settings(LineSettings::default(), CommSettings::immediate());

        assert!(!tza.connect_transport(Box::new(mock.clone())));
        assert!(mock.is_closed());
        assert_eq!(tza.auto_zero_status(), AutoZeroStatus::None);
    }

    #[test]
    fn test_handshake_timeout_disconnects() {
        let mock = MockTransport::new();
        mock.expect_silence("$U");
        let mut tza = Tza500::with_settings(LineSettings::default(), CommSettings::immediate());

        assert!(!tza.connect_transport(Box::new(mock.clone())));
        assert!(mock.is_closed());
    }

    #[test]
    fn test_reconnect_is_refused() {
        let (mut tza, mock) = connected();
        let other = MockTransport::new();

        assert!(!tza.connect_transport(Box::new(other.clone())));
        assert!(other.sent().is_empty());
        assert!(tza.is_connected());
        assert!(!mock.is_closed());
    }

    #[test]
    fn test_connect_rejects_bad_descriptor() {
        let mut tza = Tza500::new();
        assert!(matches!(
            tza.connect("TZA500"),
            Err(TzaError::Connection(TzaConnectorError::InvalidDescriptor { .. }))
        ));
        assert_eq!(tza.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_resets_state() {
        let (mut tza, mock) = connected();
        tza.set_unit(Unit::Milliwatt);
        tza.set_sensitivity(0.4).unwrap();
        tza.disconnect();

        assert!(mock.is_closed());
        assert!(!tza.is_connected());
        assert_eq!(tza.unit(), Unit::Microampere);
        assert_eq!(tza.sensitivity(), 1.0);
        assert_eq!(tza.serial_number(), "");
        assert_eq!(tza.active_gain(), None);
        assert!(matches!(
            tza.info(),
            Err(TzaError::Terminal(TzaTerminalError::NotConnected))
        ));
    }

    #[test]
    fn test_polarity() {
        let (mut tza, mock) = connected();
        mock.expect("$C", "C OK\r")
            .expect("$F", "F1\r")
            .expect("$N", "X\r")
            .expect("$F", "F7\r");

        assert!(tza.set_polarity(Polarity::Inverted).unwrap());
        assert_eq!(tza.is_polarity_inverted().unwrap(), Some(true));
        assert!(!tza.set_polarity(Polarity::Normal).unwrap());
        assert_eq!(tza.polarity(), Polarity::Inverted);
        assert_eq!(tza.query_polarity().unwrap(), None);
        assert_eq!(tza.polarity(), Polarity::Inverted);
    }

    #[test]
    fn test_bandwidth() {
        let (mut tza, mock) = connected();
        mock.expect("B3", "B3 OK\r")
            .expect("B?", "B3\r")
            .expect("B2", "B1 OK\r");

        assert!(tza.set_bandwidth(Bandwidth::Hz100).unwrap());
        assert_eq!(tza.query_bandwidth().unwrap(), Some(Bandwidth::Hz100));
        assert!(!tza.set_bandwidth_label("1 kHz").unwrap());
        assert_eq!(tza.bandwidth(), Bandwidth::Hz100);
    }

    #[test]
    fn test_invalid_bandwidth_sends_nothing() {
        let (mut tza, mock) = connected();
        let before = mock.sent().len();

        assert!(matches!(
            tza.set_bandwidth_label("5 kHz"),
            Err(TzaError::Settings(SettingsError::InvalidBandwidth(_)))
        ));
        assert_eq!(mock.sent().len(), before);
    }

    #[test]
    fn test_gain_query_keeps_auto_selection() {
        let (mut tza, mock) = connected();
        mock.expect("V?", "V? OK\nV3\r");

        assert!(tza.set_gain(Gain::Auto).unwrap());
        let status = tza.query_gain().unwrap().unwrap();
        assert_eq!(status.to_string(), "Auto: x100");
        assert_eq!(tza.gain(), Gain::Auto);
        assert_eq!(tza.active_gain(), Some(GainLevel::X100));
    }

    #[test]
    fn test_fixed_gain_leaves_auto_mode() {
        let (mut tza, mock) = connected();
        mock.expect("V4", "V4 OK\r").expect("V?", "V? OK\nV4\r");

        tza.set_gain(Gain::Auto).unwrap();
        assert!(tza.set_gain_label("x1000").unwrap());
        assert_eq!(tza.gain(), Gain::Fixed(GainLevel::X1000));
        assert_eq!(tza.query_gain().unwrap().unwrap().to_string(), "x1000");
    }

    #[test]
    fn test_rejected_gain_keeps_state() {
        let (mut tza, mock) = connected();
        mock.expect("V2", "V2 ERR\r").expect("V?", "V? ERR\r");

        assert!(!tza.set_gain(GainLevel::X10.into()).unwrap());
        assert_eq!(tza.gain(), Gain::Fixed(GainLevel::X1));
        assert_eq!(tza.active_gain(), Some(GainLevel::X1));
        assert_eq!(tza.query_gain().unwrap(), None);
    }

    #[test]
    fn test_auto_zero_narrows_max_gain() {
        let (mut tza, mock) = connected();
        mock.expect("$A", "Offset done\nGain: 4\r")
            .expect("$A", "A OK\r");

        assert!(tza.auto_zero().unwrap());
        assert_eq!(tza.auto_zero_status(), AutoZeroStatus::Performed);
        assert_eq!(tza.max_gain(), GainLevel::X1000);
        assert!(matches!(
            tza.set_gain(GainLevel::X10000.into()),
            Err(TzaError::Settings(SettingsError::GainAboveMax { .. }))
        ));

        assert!(tza.auto_zero().unwrap());
        assert_eq!(tza.max_gain(), GainLevel::MAX);
    }

    #[test]
    fn test_auto_zero_pulls_fixed_gain_under_max() {
        let (mut tza, mock) = connected();
        mock.expect("V6", "V6 OK\r")
            .expect("$A", "Offset done\nGain: 4\r")
            .expect("V4", "V4 OK\r");

        assert!(tza.set_gain(GainLevel::X100000.into()).unwrap());
        assert!(tza.auto_zero().unwrap());
        assert_eq!(tza.max_gain(), GainLevel::X1000);
        assert_eq!(tza.gain(), Gain::Fixed(GainLevel::X1000));
        assert_eq!(tza.active_gain(), Some(GainLevel::X1000));
        assert_eq!(mock.remaining(), 0);
    }

    #[test]
    fn test_auto_zero_keeps_auto_selection() {
        let (mut tza, mock) = connected();
        mock.expect("$A", "Offset done\nGain: 2\r")
            .expect("V2", "V2 OK\r");

        tza.set_gain(Gain::Auto).unwrap();
        tza.state.active_gain = Some(GainLevel::X10000);
        assert!(tza.auto_zero().unwrap());
        assert_eq!(tza.gain(), Gain::Auto);
        assert_eq!(tza.active_gain(), Some(GainLevel::X10));
    }

    #[test]
    fn test_auto_zero_below_max_sends_no_gain() {
        let (mut tza, mock) = connected();
        mock.expect("$A", "Offset done\nGain: 3\r");

        assert!(tza.auto_zero().unwrap());
        assert_eq!(tza.gain(), Gain::Fixed(GainLevel::X1));
        assert_eq!(mock.sent().last().map(String::as_str), Some("$A"));
    }

    #[test]
    fn test_measure_fixed_gain() {
        let (mut tza, mock) = connected();
        mock.expect("$E", "I1,5nA\r").expect("$E", "I2,0uA\r");

        tza.set_unit(Unit::Nanoampere);
        let m = tza.measure().unwrap();
        assert_eq!((m.value, m.unit_label()), (1.5, "nA"));

        tza.set_unit_label("uA").unwrap();
        let m = tza.measure().unwrap();
        assert_eq!((m.value, m.unit_label()), (2.0, "µA"));
    }

    #[test]
    fn test_measure_power_unit_uses_sensitivity() {
        let (mut tza, mock) = connected();
        mock.expect("$E", "I1,5nA\r");

        tza.set_unit(Unit::Nanowatt);
        tza.set_sensitivity(0.5).unwrap();
        assert_eq!(tza.measure().unwrap().value, 3.0);
        assert!(tza.set_sensitivity(0.0).is_err());
        assert!(tza.set_sensitivity(f64::NAN).is_err());
    }

    #[test]
    fn test_measure_auto_gain_ranges_up() {
        let (mut tza, mock) = connected();
        mock.expect("$E", "I0,5nA\r")
            .expect("V2", "V2 OK\r")
            .expect("$E", "I5,0nA\r")
            .expect("V3", "V3 OK\r")
            .expect("$E", "I50,0nA\r");

        tza.set_gain(Gain::Auto).unwrap();
        tza.set_unit(Unit::Nanoampere);
        let m = tza.measure().unwrap();

        assert_eq!(m.value, 50.0);
        assert_eq!(tza.gain(), Gain::Auto);
        assert_eq!(tza.active_gain(), Some(GainLevel::X100));
        assert_eq!(mock.remaining(), 0);
    }

    #[test]
    fn test_measure_auto_gain_queries_unknown_level() {
        let mock = MockTransport::new();
        script_connect(&mock, INFO);
        let mut tza = Tza500::with_settings(LineSettings::default(), CommSettings::immediate());
        assert!(tza.connect_transport(Box::new(mock.clone())));
        tza.state.active_gain = None;

        mock.expect("$E", "I50,0nA\r").expect("V?", "V? OK\nV3\r");
        tza.set_gain(Gain::Auto).unwrap();
        tza.set_unit(Unit::Nanoampere);

        assert_eq!(tza.measure().unwrap().value, 50.0);
        assert_eq!(tza.gain(), Gain::Auto);
    }

    #[test]
    fn test_measure_timeout_keeps_connection() {
        let (mut tza, mock) = connected();
        mock.expect_silence("$E");

        assert!(matches!(
            tza.measure(),
            Err(TzaError::Terminal(TzaTerminalError::Timeout { attempts: 800, .. }))
        ));
        assert!(tza.is_connected());
        assert!(!mock.is_closed());
    }

    #[test]
    fn test_operations_need_connection() {
        let mut tza = Tza500::new();
        assert!(matches!(
            tza.set_bandwidth(Bandwidth::Khz1),
            Err(TzaError::Terminal(TzaTerminalError::NotConnected))
        ));
        assert!(matches!(
            tza.single_raw_measurement(),
            Err(TzaError::Terminal(TzaTerminalError::NotConnected))
        ));
    }
}
