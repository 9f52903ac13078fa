use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SettingsError {
    #[error("Invalid gain '{0}', choose one of x1, x10, x100, x1000, x10000, x100000 or auto-gain")]
    InvalidGain(String),

    #[error("Invalid bandwidth '{0}', choose one of 10 kHz, 1 kHz, 100 Hz or 10 Hz")]
    InvalidBandwidth(String),

    #[error("Invalid unit '{0}', choose one of nA, µA, mA, A, nW, µW, mW or W")]
    InvalidUnit(String),

    #[error("Gain {requested} is above the maximum usable gain {max}")]
    GainAboveMax { requested: GainLevel, max: GainLevel },

    #[error("Sensitivity must be a finite positive number, got {0}")]
    InvalidSensitivity(f64),
}

/// Bidirectional lookup between a setting and the short code the instrument speaks.
///
/// The tables are plain static slices, so both directions are available without
/// building inverse maps at query time.
#[derive(Debug)]
pub struct CodeTable<T: 'static> {
    entries: &'static [(T, &'static str)],
}

impl<T: Copy + PartialEq> CodeTable<T> {
    pub const fn new(entries: &'static [(T, &'static str)]) -> Self {
        Self { entries }
    }

    pub fn code_of(&self, value: T) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(v, _)| *v == value)
            .map(|(_, code)| *code)
    }

    pub fn lookup(&self, code: &str) -> Option<T> {
        self.entries
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(v, _)| *v)
    }

    pub fn values(&self) -> impl Iterator<Item = T> + '_ {
        self.entries.iter().map(|(v, _)| *v)
    }
}

/// One of the six fixed amplification steps, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GainLevel {
    X1,
    X10,
    X100,
    X1000,
    X10000,
    X100000,
}

impl GainLevel {
    pub const ALL: [GainLevel; 6] = [
        GainLevel::X1,
        GainLevel::X10,
        GainLevel::X100,
        GainLevel::X1000,
        GainLevel::X10000,
        GainLevel::X100000,
    ];

    pub const MAX: GainLevel = GainLevel::X100000;

    pub const TABLE: CodeTable<GainLevel> = CodeTable::new(&[
        (GainLevel::X1, "V1"),
        (GainLevel::X10, "V2"),
        (GainLevel::X100, "V3"),
        (GainLevel::X1000, "V4"),
        (GainLevel::X10000, "V5"),
        (GainLevel::X100000, "V6"),
    ]);

    /// Position of the level, 1 for x1 up to 6 for x100000.
    pub fn index(&self) -> u8 {
        match self {
            GainLevel::X1 => 1,
            GainLevel::X10 => 2,
            GainLevel::X100 => 3,
            GainLevel::X1000 => 4,
            GainLevel::X10000 => 5,
            GainLevel::X100000 => 6,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index).checked_sub(1)?).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GainLevel::X1 => "x1",
            GainLevel::X10 => "x10",
            GainLevel::X100 => "x100",
            GainLevel::X1000 => "x1000",
            GainLevel::X10000 => "x10000",
            GainLevel::X100000 => "x100000",
        }
    }

    pub fn code(&self) -> &'static str {
        Self::TABLE.code_of(*self).unwrap_or("V1")
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::TABLE.lookup(code)
    }

    /// Next finer level, `None` at the top.
    pub fn up(&self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// Next coarser level, `None` at x1.
    pub fn down(&self) -> Option<Self> {
        Self::from_index(self.index() - 1)
    }

    /// Full-scale reading of the level. The instrument has three physical
    /// ranges that repeat across the six gain steps.
    pub fn full_scale(&self) -> f64 {
        match self {
            GainLevel::X1 | GainLevel::X1000 => 122.85,
            GainLevel::X10 | GainLevel::X10000 => 12.285,
            GainLevel::X100 | GainLevel::X100000 => 1.2285,
        }
    }
}

impl fmt::Display for GainLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nominal gain selection requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gain {
    Fixed(GainLevel),
    Auto,
}

impl Gain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gain::Fixed(level) => level.as_str(),
            Gain::Auto => "auto-gain",
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Gain::Auto)
    }
}

impl Default for Gain {
    fn default() -> Self {
        Gain::Fixed(GainLevel::X1)
    }
}

impl From<GainLevel> for Gain {
    fn from(level: GainLevel) -> Self {
        Gain::Fixed(level)
    }
}

impl FromStr for Gain {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto-gain") || s.eq_ignore_ascii_case("auto") {
            return Ok(Gain::Auto);
        }
        GainLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .map(Gain::Fixed)
            .ok_or_else(|| SettingsError::InvalidGain(s.to_string()))
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bandwidth {
    #[default]
    Khz10,
    Khz1,
    Hz100,
    Hz10,
}

impl Bandwidth {
    pub const TABLE: CodeTable<Bandwidth> = CodeTable::new(&[
        (Bandwidth::Khz10, "B1"),
        (Bandwidth::Khz1, "B2"),
        (Bandwidth::Hz100, "B3"),
        (Bandwidth::Hz10, "B4"),
    ]);

    pub fn as_str(&self) -> &'static str {
        match self {
            Bandwidth::Khz10 => "10 kHz",
            Bandwidth::Khz1 => "1 kHz",
            Bandwidth::Hz100 => "100 Hz",
            Bandwidth::Hz10 => "10 Hz",
        }
    }

    pub fn code(&self) -> &'static str {
        Self::TABLE.code_of(*self).unwrap_or("B1")
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::TABLE.lookup(code)
    }
}

impl FromStr for Bandwidth {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::TABLE
            .values()
            .find(|bandwidth| bandwidth.as_str() == s.trim())
            .ok_or_else(|| SettingsError::InvalidBandwidth(s.to_string()))
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    #[default]
    Normal,
    Inverted,
}

impl Polarity {
    /// Query replies.
    pub const TABLE: CodeTable<Polarity> =
        CodeTable::new(&[(Polarity::Normal, "F0"), (Polarity::Inverted, "F1")]);

    /// Letter of the set command, sent as `$<letter>` and acknowledged as `<letter> OK`.
    pub fn set_letter(&self) -> char {
        match self {
            Polarity::Normal => 'N',
            Polarity::Inverted => 'C',
        }
    }

    pub fn is_inverted(&self) -> bool {
        matches!(self, Polarity::Inverted)
    }
}

impl From<bool> for Polarity {
    fn from(inverted: bool) -> Self {
        if inverted {
            Polarity::Inverted
        } else {
            Polarity::Normal
        }
    }
}

/// Decimal prefix of a measurement unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Nano,
    Micro,
    Milli,
    Base,
}

impl Scale {
    /// Divisor from nano units and the number of decimals kept after rounding.
    pub fn divisor_and_precision(&self) -> (f64, usize) {
        match self {
            Scale::Nano => (1.0, 3),
            Scale::Micro => (1_000.0, 6),
            Scale::Milli => (1_000_000.0, 9),
            Scale::Base => (1_000_000_000.0, 12),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    Nanoampere,
    #[default]
    Microampere,
    Milliampere,
    Ampere,
    Nanowatt,
    Microwatt,
    Milliwatt,
    Watt,
}

impl Unit {
    pub const ALL: [Unit; 8] = [
        Unit::Nanoampere,
        Unit::Microampere,
        Unit::Milliampere,
        Unit::Ampere,
        Unit::Nanowatt,
        Unit::Microwatt,
        Unit::Milliwatt,
        Unit::Watt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Nanoampere => "nA",
            Unit::Microampere => "µA",
            Unit::Milliampere => "mA",
            Unit::Ampere => "A",
            Unit::Nanowatt => "nW",
            Unit::Microwatt => "µW",
            Unit::Milliwatt => "mW",
            Unit::Watt => "W",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Unit::Nanoampere => "Nanoampere (nA)",
            Unit::Microampere => "Microampere (µA)",
            Unit::Milliampere => "Milliampere (mA)",
            Unit::Ampere => "Ampere (A)",
            Unit::Nanowatt => "Nanowatts (nW)",
            Unit::Microwatt => "Microwatts (µW)",
            Unit::Milliwatt => "Milliwatts (mW)",
            Unit::Watt => "Watts (W)",
        }
    }

    /// Power units scale the reading by the user supplied A/W sensitivity.
    pub fn is_power(&self) -> bool {
        matches!(
            self,
            Unit::Nanowatt | Unit::Microwatt | Unit::Milliwatt | Unit::Watt
        )
    }

    pub fn scale(&self) -> Scale {
        match self {
            Unit::Nanoampere | Unit::Nanowatt => Scale::Nano,
            Unit::Microampere | Unit::Microwatt => Scale::Micro,
            Unit::Milliampere | Unit::Milliwatt => Scale::Milli,
            Unit::Ampere | Unit::Watt => Scale::Base,
        }
    }
}

impl FromStr for Unit {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // "u" is accepted for the micro sign
        let normalized = match s.strip_prefix('u') {
            Some(rest) if !rest.is_empty() => format!("µ{rest}"),
            _ => s.to_string(),
        };
        Self::ALL
            .into_iter()
            .find(|unit| unit.as_str() == normalized)
            .ok_or_else(|| SettingsError::InvalidUnit(s.to_string()))
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoZeroStatus {
    #[default]
    None,
    Performed,
    PerformedWithReset,
}

impl AutoZeroStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoZeroStatus::None => "None",
            AutoZeroStatus::Performed => "Auto zero",
            AutoZeroStatus::PerformedWithReset => "Auto zero reset",
        }
    }
}

impl fmt::Display for AutoZeroStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serial line parameters of the USB bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub stop_bits: serialport::StopBits,
    pub parity: serialport::Parity,
    pub flow_control: serialport::FlowControl,
    pub timeout: Duration,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: serialport::DataBits::Eight,
            stop_bits: serialport::StopBits::One,
            parity: serialport::Parity::None,
            flow_control: serialport::FlowControl::None,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Timing of the request/response exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct CommSettings {
    /// Sleep between two polls of the transport.
    pub poll_interval: Duration,
    /// Number of polls before a receive gives up.
    pub max_polls: u32,
    /// Settle time after an auto-zero that reported a narrowed gain.
    pub auto_zero_settle: Duration,
    /// Settle time after an auto-zero that kept the full gain range.
    pub auto_zero_full_settle: Duration,
    /// Settle time after an auto-zero with reset.
    pub reset_settle: Duration,
}

impl CommSettings {
    /// Settings without any sleeping, for simulated transports.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            auto_zero_settle: Duration::ZERO,
            auto_zero_full_settle: Duration::ZERO,
            reset_settle: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for CommSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_polls: 800,
            auto_zero_settle: Duration::from_millis(200),
            auto_zero_full_settle: Duration::from_millis(500),
            reset_settle: Duration::from_millis(50),
        }
    }
}
