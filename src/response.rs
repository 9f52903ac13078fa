//! Interpretation of the instrument's response frames.
//!
//! Nothing in here fails hard on an unexpected reply: a setter gets `false`,
//! a query gets `None`, and the caller decides what to do about it.

use regex::Regex;
use std::sync::LazyLock;

use crate::tza_config::{Bandwidth, GainLevel, Polarity};

/// Token the info blob must start with.
pub const DEVICE_IDENTIFIER: &str = "TZA500";

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\Atza500\b").expect("Invalid identifier regex"));
static FIRMWARE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\Atza500.*?fw.*?([0-9]+\.[0-9]+)").expect("Invalid firmware regex")
});
static SERIAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)serial:.*?([0-9]+)").expect("Invalid serial regex"));
static MANUFACTURING_DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)date of manufacturing:.*?([0-9]{1,2}/[0-9]{2,4})")
        .expect("Invalid manufacturing date regex")
});

/// Identity metadata read once at connect time. Missing fields are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub firmware_version: String,
    pub serial_number: String,
    pub date_of_manufacturing: String,
}

/// Outcome of the plain auto-zero command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoZeroReply {
    /// The instrument narrowed the usable range to this gain.
    LimitedTo(GainLevel),
    /// Full range kept.
    FullRange,
}

/// `true` only for the exact reply `"<code> OK"`.
pub fn is_ack(response: &str, code: &str) -> bool {
    response
        .strip_prefix(code)
        .is_some_and(|rest| rest == " OK")
}

pub fn parse_polarity(response: &str) -> Option<Polarity> {
    Polarity::TABLE.lookup(response.trim())
}

pub fn parse_bandwidth(response: &str) -> Option<Bandwidth> {
    Bandwidth::from_code(response.trim())
}

/// The gain query answers on two lines: `V? OK` and then the level code.
pub fn parse_gain(response: &str) -> Option<GainLevel> {
    let mut lines = response.lines().map(str::trim);
    if lines.next()? != "V? OK" {
        return None;
    }
    GainLevel::from_code(lines.next()?)
}

pub fn parse_auto_zero(response: &str) -> Option<AutoZeroReply> {
    if response.contains("Gain: ") {
        // the limit is printed last
        let digit = response.trim_end().chars().last()?.to_digit(10)?;
        let level = GainLevel::from_index(u8::try_from(digit).ok()?)?;
        return Some(AutoZeroReply::LimitedTo(level));
    }
    if response.contains("A OK") {
        return Some(AutoZeroReply::FullRange);
    }
    None
}

/// Strip the `I` marker from a single measurement frame.
pub fn parse_raw_measurement(response: &str) -> String {
    let trimmed = response.trim();
    trimmed.strip_prefix('I').unwrap_or(trimmed).trim().to_string()
}

pub fn is_identifier_line(info: &str) -> bool {
    info.lines()
        .next()
        .is_some_and(|line| IDENTIFIER_REGEX.is_match(line.trim()))
}

/// Parse the `$I` info blob. `None` when the first line does not name the
/// instrument; each field on its own is optional.
pub fn parse_identity(info: &str) -> Option<DeviceIdentity> {
    if !is_identifier_line(info) {
        return None;
    }

    let capture = |regex: &Regex, text: &str| {
        regex
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    let first_line = info.lines().next().unwrap_or_default().trim();
    Some(DeviceIdentity {
        firmware_version: capture(&FIRMWARE_REGEX, first_line),
        serial_number: capture(&SERIAL_REGEX, info),
        date_of_manufacturing: capture(&MANUFACTURING_DATE_REGEX, info),
    })
}
