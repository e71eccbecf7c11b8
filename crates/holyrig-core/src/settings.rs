//! Per-rig settings.
//!
//! [`RigSettings`] is deserialized from the daemon's configuration file and
//! consumed in two places: the serial transport (line parameters, initial
//! RTS/DTR levels) and the rig runtime (poll interval, exchange timeout).

use std::time::Duration;

use serde::Deserialize;

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(format!("invalid data bits: {other} (expected 5-8)")),
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(format!("invalid stop bits: {other} (expected 1 or 2)")),
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Settings for one configured rig.
///
/// Defaults match the most common CAT setups: 8N1, no handshake lines
/// asserted, 500 ms poll cycle, 1 s exchange timeout.
#[derive(Debug, Clone, Deserialize)]
pub struct RigSettings {
    /// Stable identifier clients use to address this rig.
    pub id: String,
    /// Model file name (without extension) describing the radio.
    pub model: String,
    /// Serial port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// Baud rate, e.g. 4800, 9600, 19200, 38400, 115200.
    #[serde(default = "defaults::baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "defaults::data_bits")]
    pub data_bits: DataBits,
    #[serde(default = "defaults::stop_bits")]
    pub stop_bits: StopBits,
    #[serde(default)]
    pub parity: Parity,
    /// Initial RTS level after opening the port.
    #[serde(default)]
    pub rts: bool,
    /// Initial DTR level after opening the port.
    #[serde(default)]
    pub dtr: bool,
    /// Delay between status poll cycles, in milliseconds.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-exchange reply deadline, in milliseconds.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
    /// Whether the rig is driven at all. Disabled rigs are still listed.
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,
}

mod defaults {
    use super::{DataBits, StopBits};

    pub fn baud_rate() -> u32 {
        9600
    }

    pub fn data_bits() -> DataBits {
        DataBits::Eight
    }

    pub fn stop_bits() -> StopBits {
        StopBits::One
    }

    pub fn poll_interval_ms() -> u64 {
        500
    }

    pub fn timeout_ms() -> u64 {
        1000
    }

    pub fn enabled() -> bool {
        true
    }
}

impl RigSettings {
    /// The delay between status poll cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The per-exchange reply deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
