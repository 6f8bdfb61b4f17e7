//! `Hex` — variable-length byte value carried in the node's hex wire format.
//!
//! Parsing accepts `0x`-prefixed or bare strings and left-pads odd-length
//! input with one zero nibble. Formatting strips a single leading zero nibble
//! so quantities come back in the minimal width nodes emit (`0x0`, `0x1a`).
//! JSON `null` and `"0x"` both decode to an empty value; an empty value
//! encodes to `null`.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while parsing or extracting a [`Hex`] value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HexError {
    /// The input contains non-hex characters.
    #[error("invalid hex: {0}")]
    Invalid(#[from] hex::FromHexError),

    /// The value is wider than the requested target type.
    #[error("hex value {value} does not fit in {target}")]
    Overflow { value: String, target: &'static str },

    /// The value is not a representable Unix timestamp.
    #[error("hex value {0} is not a valid unix timestamp")]
    Timestamp(String),
}

/// Canonical byte sequence with hex string representation.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hex(Vec<u8>);

impl Hex {
    /// Parse a `0x`-prefixed or bare hex string.
    pub fn parse(s: &str) -> Result<Self, HexError> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() {
            return Ok(Self::default());
        }
        let bytes = if digits.len() % 2 == 1 {
            hex::decode(format!("0{digits}"))?
        } else {
            hex::decode(digits)?
        };
        Ok(Self(bytes))
    }

    /// Minimal big-endian encoding of `n`; zero encodes as a single zero byte.
    pub fn from_u64(n: u64) -> Self {
        let bytes = n.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        Self(bytes[first..].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Bytes with leading zero bytes removed.
    fn significant(&self) -> &[u8] {
        let first = self.0.iter().position(|b| *b != 0).unwrap_or(self.0.len());
        &self.0[first..]
    }

    fn overflow(&self, target: &'static str) -> HexError {
        HexError::Overflow {
            value: self.to_string(),
            target,
        }
    }

    /// Interpret as an unsigned 64-bit big-endian integer.
    pub fn to_u64(&self) -> Result<u64, HexError> {
        let bytes = self.significant();
        if bytes.len() > 8 {
            return Err(self.overflow("u64"));
        }
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Interpret as a signed 64-bit integer (non-negative values only, as
    /// node quantities are unsigned).
    pub fn to_i64(&self) -> Result<i64, HexError> {
        let n = self.to_u64()?;
        i64::try_from(n).map_err(|_| self.overflow("i64"))
    }

    /// Interpret as a 256-bit unsigned integer (the EVM word).
    pub fn to_big_uint(&self) -> Result<U256, HexError> {
        U256::try_from_be_slice(self.significant()).ok_or_else(|| self.overflow("u256"))
    }

    /// Base-10 rendering of the value, suitable for NUMERIC columns.
    pub fn to_decimal(&self) -> Result<String, HexError> {
        Ok(self.to_big_uint()?.to_string())
    }

    /// Interpret as a Unix timestamp in seconds.
    pub fn to_timestamp(&self) -> Result<DateTime<Utc>, HexError> {
        let secs = self.to_i64()?;
        DateTime::from_timestamp(secs, 0).ok_or_else(|| HexError::Timestamp(self.to_string()))
    }
}

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(&self.0);
        let trimmed = encoded.strip_prefix('0').unwrap_or(&encoded);
        write!(f, "0x{trimmed}")
    }
}

impl fmt::Debug for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hex({self})")
    }
}

impl FromStr for Hex {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Vec<u8>> for Hex {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Hex {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Hex {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.is_empty() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&self.to_string())
        }
    }
}

impl<'de> Deserialize<'de> for Hex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(Self::default()),
            Some(s) => Self::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}
