// src/codes.rs

use std::{fmt, str::FromStr};
use thiserror::Error;

/// Highest representable five-digit postal code.
pub const MAX_CODE: u32 = 99_999;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("empty postal code")]
    Empty,
    #[error("postal code {0:?} is not numeric")]
    NotNumeric(String),
    #[error("postal code {0:?} has more than five digits")]
    TooLong(String),
    #[error("postal code {0} is above {MAX_CODE}")]
    OutOfRange(u64),
}

/// A five-digit, zero-padded postal code.
///
/// Stored as a number so comparisons follow integer ordering regardless of
/// leading zeros; always rendered with exactly five digits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZipCode(u32);

impl ZipCode {
    pub fn from_number(n: u64) -> Result<Self, CodeError> {
        if n > MAX_CODE as u64 {
            return Err(CodeError::OutOfRange(n));
        }
        Ok(Self(n as u32))
    }

    /// Parse a textual code. `-` is treated as cosmetic grouping ("005-99").
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let digits: String = raw.trim().chars().filter(|c| *c != '-').collect();
        if digits.is_empty() {
            return Err(CodeError::Empty);
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CodeError::NotNumeric(raw.to_string()));
        }
        if digits.len() > 5 {
            return Err(CodeError::TooLong(raw.to_string()));
        }
        // at most five ascii digits always fits
        Ok(Self(digits.parse().map_err(|_| CodeError::NotNumeric(raw.to_string()))?))
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// First three characters of the padded code; the remote lookup key.
    pub fn prefix(&self) -> String {
        format!("{:03}", self.0 / 100)
    }

    /// The next code, re-padded. `None` past 99999.
    pub fn next(&self) -> Option<Self> {
        (self.0 < MAX_CODE).then(|| Self(self.0 + 1))
    }
}

impl fmt::Display for ZipCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:05}", self.0)
    }
}

impl fmt::Debug for ZipCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZipCode({:05})", self.0)
    }
}

impl FromStr for ZipCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
