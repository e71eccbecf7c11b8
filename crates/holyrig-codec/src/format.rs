//! Wire data formats for frame fields.
//!
//! A [`DataFormat`] describes how one numeric field is laid out inside a
//! binary frame: plain two's-complement integer or BCD, big- or
//! little-endian, signed or unsigned, plus ASCII decimal text. Signed BCD
//! carries an explicit sign byte (`0x00` positive, `0xFF` negative) at the
//! most significant position; signed integers are sign-extended.
//!
//! Reference encoding of 418 / -418 into a 4-byte field:
//!
//! ```text
//! bcd_bu | 00 00 04 18 | -
//! bcd_bs | 00 00 04 18 | FF 00 04 18
//! bcd_lu | 18 04 00 00 | -
//! bcd_ls | 18 04 00 00 | 18 04 00 FF
//! int_bu | 00 00 01 A2 | -
//! int_bs | 00 00 01 A2 | FF FF FE 5E
//! int_lu | A2 01 00 00 | -
//! int_ls | A2 01 00 00 | 5E FE FF FF
//! text   | 30 34 31 38 | 2D 34 31 38
//! ```

use std::fmt;

use holyrig_core::{Error, Result};
use serde::Deserialize;

/// How a numeric field is serialized into frame bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// BCD, most significant byte first, unsigned.
    BcdBu,
    /// BCD, most significant byte first, sign byte at offset 0.
    BcdBs,
    /// BCD, least significant byte first, unsigned.
    BcdLu,
    /// BCD, least significant byte first, sign byte at the last offset.
    BcdLs,
    /// Two's-complement integer, big-endian, unsigned.
    IntBu,
    /// Two's-complement integer, big-endian, signed.
    IntBs,
    /// Two's-complement integer, little-endian, unsigned.
    IntLu,
    /// Two's-complement integer, little-endian, signed.
    IntLs,
    /// ASCII decimal digits, left-padded with '0'; '-' prefix when negative.
    Text,
    /// Yaesu legacy nibble packing. Reserved.
    Yaesu,
}

impl DataFormat {
    /// Whether this format can represent negative values.
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DataFormat::BcdBs | DataFormat::BcdLs | DataFormat::IntBs | DataFormat::IntLs | DataFormat::Text
        )
    }

    /// Encode `value` into exactly `length` bytes.
    ///
    /// Fails with [`Error::ValueOutOfRange`] when the value does not fit
    /// the field width, and with [`Error::NotImplemented`] for reserved
    /// formats.
    pub fn encode(&self, value: i64, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Err(Error::ValueOutOfRange(format!(
                "cannot encode {value} into a zero-length field"
            )));
        }
        if value < 0 && !self.is_signed() {
            return Err(Error::ValueOutOfRange(format!(
                "{value} is negative but the {self} format is unsigned"
            )));
        }

        match self {
            DataFormat::BcdBu | DataFormat::BcdBs => encode_bcd_be(value, length, *self),
            DataFormat::BcdLu | DataFormat::BcdLs => {
                let mut bytes = encode_bcd_be(value, length, *self)?;
                bytes.reverse();
                Ok(bytes)
            }
            DataFormat::IntBu | DataFormat::IntBs => encode_int(value, length, *self, true),
            DataFormat::IntLu | DataFormat::IntLs => encode_int(value, length, *self, false),
            DataFormat::Text => encode_text(value, length),
            DataFormat::Yaesu => Err(Error::NotImplemented("yaesu format encoding".into())),
        }
    }

    /// Decode `length = bytes.len()` bytes into the numeric value.
    ///
    /// BCD nibbles above 9 and malformed text digits are rejected with
    /// [`Error::ReplyValidationFailed`].
    pub fn decode(&self, bytes: &[u8]) -> Result<i64> {
        if bytes.is_empty() {
            return Err(Error::ReplyValidationFailed(
                "cannot decode an empty field".into(),
            ));
        }

        match self {
            DataFormat::BcdBu => decode_bcd_digits(bytes),
            DataFormat::BcdBs => {
                if bytes[0] == 0xFF {
                    Ok(-decode_bcd_digits(&bytes[1..])?)
                } else {
                    decode_bcd_digits(bytes)
                }
            }
            DataFormat::BcdLu => {
                let mut be: Vec<u8> = bytes.to_vec();
                be.reverse();
                decode_bcd_digits(&be)
            }
            DataFormat::BcdLs => {
                let mut be: Vec<u8> = bytes.to_vec();
                be.reverse();
                if be[0] == 0xFF {
                    Ok(-decode_bcd_digits(&be[1..])?)
                } else {
                    decode_bcd_digits(&be)
                }
            }
            DataFormat::IntBu => decode_int(bytes, true, false),
            DataFormat::IntBs => decode_int(bytes, true, true),
            DataFormat::IntLu => decode_int(bytes, false, false),
            DataFormat::IntLs => decode_int(bytes, false, true),
            DataFormat::Text => decode_text(bytes),
            DataFormat::Yaesu => Err(Error::NotImplemented("yaesu format decoding".into())),
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataFormat::BcdBu => "bcd_bu",
            DataFormat::BcdBs => "bcd_bs",
            DataFormat::BcdLu => "bcd_lu",
            DataFormat::BcdLs => "bcd_ls",
            DataFormat::IntBu => "int_bu",
            DataFormat::IntBs => "int_bs",
            DataFormat::IntLu => "int_lu",
            DataFormat::IntLs => "int_ls",
            DataFormat::Text => "text",
            DataFormat::Yaesu => "yaesu",
        };
        write!(f, "{name}")
    }
}

impl TryFrom<&str> for DataFormat {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, String> {
        match value {
            "bcd_bu" => Ok(DataFormat::BcdBu),
            "bcd_bs" => Ok(DataFormat::BcdBs),
            "bcd_lu" => Ok(DataFormat::BcdLu),
            "bcd_ls" => Ok(DataFormat::BcdLs),
            "int_bu" => Ok(DataFormat::IntBu),
            "int_bs" => Ok(DataFormat::IntBs),
            "int_lu" => Ok(DataFormat::IntLu),
            "int_ls" => Ok(DataFormat::IntLs),
            "text" => Ok(DataFormat::Text),
            "yaesu" => Ok(DataFormat::Yaesu),
            other => Err(format!("unknown data format: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for DataFormat {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DataFormat::try_from(raw.as_str()).map_err(serde::de::Error::custom)
    }
}

/// Big-endian BCD digits, with a sign byte at offset 0 for signed formats
/// holding a negative value.
fn encode_bcd_be(value: i64, length: usize, format: DataFormat) -> Result<Vec<u8>> {
    let magnitude = value.unsigned_abs();

    // A sign byte consumes the most significant byte when negative.
    let digit_bytes = if value < 0 { length - 1 } else { length };
    let max = 10u128.pow(2 * digit_bytes as u32) - 1;
    if u128::from(magnitude) > max {
        return Err(Error::ValueOutOfRange(format!(
            "{value} does not fit {length} BCD bytes as {format}"
        )));
    }

    let mut result = vec![0u8; length];
    let mut rest = magnitude;
    for byte in result.iter_mut().rev() {
        let lo = (rest % 10) as u8;
        rest /= 10;
        let hi = (rest % 10) as u8;
        rest /= 10;
        *byte = (hi << 4) | lo;
    }
    if value < 0 {
        result[0] = 0xFF;
    }
    Ok(result)
}

fn decode_bcd_digits(bytes: &[u8]) -> Result<i64> {
    let mut value: i64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        let hi = (byte >> 4) & 0x0F;
        let lo = byte & 0x0F;
        if hi > 9 || lo > 9 {
            return Err(Error::ReplyValidationFailed(format!(
                "invalid BCD digit at byte {i}: 0x{byte:02X}"
            )));
        }
        value = value
            .checked_mul(100)
            .and_then(|v| v.checked_add(i64::from(hi) * 10 + i64::from(lo)))
            .ok_or_else(|| Error::ValueOutOfRange("BCD field overflows 64 bits".into()))?;
    }
    Ok(value)
}

/// Two's-complement integer, sign-extended to `length` bytes.
fn encode_int(value: i64, length: usize, format: DataFormat, big_endian: bool) -> Result<Vec<u8>> {
    let fits = if format.is_signed() {
        let bits = 8 * length as u32;
        if bits >= 64 {
            true
        } else {
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            value >= min && value <= max
        }
    } else {
        let bits = 8 * length as u32;
        bits >= 64 || (value as u64) < (1u64 << bits)
    };
    if !fits {
        return Err(Error::ValueOutOfRange(format!(
            "{value} does not fit {length} bytes as {format}"
        )));
    }

    let full = value.to_be_bytes();
    let mut result = full[full.len() - length.min(8)..].to_vec();
    if length > 8 {
        // Wider than 64 bits: left-pad with sign extension.
        let pad = if value < 0 { 0xFF } else { 0x00 };
        let mut padded = vec![pad; length - 8];
        padded.extend_from_slice(&result);
        result = padded;
    }
    if !big_endian {
        result.reverse();
    }
    Ok(result)
}

fn decode_int(bytes: &[u8], big_endian: bool, signed: bool) -> Result<i64> {
    if bytes.len() > 8 {
        return Err(Error::ValueOutOfRange(format!(
            "integer field of {} bytes exceeds 64 bits",
            bytes.len()
        )));
    }

    let mut be = bytes.to_vec();
    if !big_endian {
        be.reverse();
    }

    let negative = signed && be[0] & 0x80 != 0;
    let mut full = [if negative { 0xFF } else { 0x00 }; 8];
    full[8 - be.len()..].copy_from_slice(&be);
    let value = i64::from_be_bytes(full);

    if !signed && value < 0 {
        // Only possible for an 8-byte unsigned field with the top bit set.
        return Err(Error::ValueOutOfRange(
            "unsigned field exceeds 63 bits".into(),
        ));
    }
    Ok(value)
}

/// ASCII decimal, left-padded with '0' to the field width. Negative values
/// carry a leading '-' before the padded magnitude so decoding stays exact.
fn encode_text(value: i64, length: usize) -> Result<Vec<u8>> {
    let digits = value.unsigned_abs().to_string();
    let sign_len = usize::from(value < 0);
    if digits.len() + sign_len > length {
        return Err(Error::ValueOutOfRange(format!(
            "{value} needs {} characters but the field holds {length}",
            digits.len() + sign_len
        )));
    }
    let mut result = vec![b'0'; length];
    if value < 0 {
        result[0] = b'-';
    }
    result[length - digits.len()..].copy_from_slice(digits.as_bytes());
    Ok(result)
}

fn decode_text(bytes: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(bytes).map_err(|_| {
        Error::ReplyValidationFailed(format!("text field is not ASCII: {bytes:02X?}"))
    })?;
    let trimmed = text.trim();
    trimmed.parse::<i64>().map_err(|_| {
        Error::ReplyValidationFailed(format!("text field is not a decimal number: {trimmed:?}"))
    })
}
