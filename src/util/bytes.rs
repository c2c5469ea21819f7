//! Utility type for byte counts expressed with factor-1024 suffixes.

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const SUFFIXES: [&str; 5] = ["", "k", "M", "G", "T"];

/// A byte count parsed from and rendered to the `<decimal><k|M|G|T>` form.
///
/// Suffixes are factors of 1024. Rendering picks the largest suffix that
/// keeps the magnitude below 1024, truncating towards zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ByteSize(pub i64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseByteSizeError {
    #[error("invalid byte size `{0}`")]
    Format(String),
    #[error("invalid number `{number}` in `{value}`")]
    Number { number: String, value: String },
    #[error("invalid suffix `{suffix}` in `{value}`")]
    Suffix { suffix: String, value: String },
}

static BYTE_SIZE_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A([+-]?[0-9]+)([a-zA-Z]*)\z").expect("byte size pattern"));

impl FromStr for ByteSize {
    type Err = ParseByteSizeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let captures = BYTE_SIZE_RX
            .captures(trimmed)
            .ok_or_else(|| ParseByteSizeError::Format(value.to_string()))?;

        let number: i64 = captures[1]
            .parse()
            .map_err(|_| ParseByteSizeError::Number {
                number: captures[1].to_string(),
                value: value.to_string(),
            })?;

        let suffix = &captures[2];
        let mut result = number;
        for candidate in SUFFIXES {
            if candidate == suffix {
                return Ok(Self(result));
            }
            result = result.saturating_mul(1024);
        }

        Err(ParseByteSizeError::Suffix {
            suffix: suffix.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0 as f64;
        let mut suffix = "";
        for candidate in SUFFIXES {
            suffix = candidate;
            if value.abs() < 1024.0 {
                break;
            }
            value /= 1024.0;
        }
        write!(f, "{}{suffix}", value as i64)
    }
}

impl From<ByteSize> for i64 {
    fn from(size: ByteSize) -> Self {
        size.0
    }
}
