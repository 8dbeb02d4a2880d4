//! Byte signatures and the registry that resolves them against a module.
//!
//! A signature is a byte sequence with a parallel match/wildcard mask. Two
//! text forms are accepted:
//!
//! - IDA style: `"48 8B ?? ?? C3"` where `??` (or `?`) is a wildcard
//! - code style: raw bytes plus a mask string such as `"xx??x"`

mod matcher;
mod registry;
mod set;

pub use matcher::*;
pub use registry::*;
pub use set::*;

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A masked byte signature. `None` entries are wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<Option<u8>>,
}

impl Pattern {
    /// Build a pattern from a signature and a parallel mask
    /// (`true` = exact byte, `false` = wildcard).
    pub fn new(signature: &[u8], mask: &[bool]) -> Result<Self> {
        if signature.len() != mask.len() {
            return Err(Error::MaskLengthMismatch {
                signature: signature.len(),
                mask: mask.len(),
            });
        }

        let bytes = signature
            .iter()
            .zip(mask)
            .map(|(&byte, &exact)| exact.then_some(byte))
            .collect();
        Self::from_bytes(bytes)
    }

    /// Build a pattern from raw bytes and a code-style mask (`x` exact, `?` wildcard).
    pub fn from_code_style(signature: &[u8], mask: &str) -> Result<Self> {
        let mask = parse_mask(mask)?;
        Self::new(signature, &mask)
    }

    pub fn from_bytes(bytes: Vec<Option<u8>>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptySignature);
        }
        Ok(Self { bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; an empty pattern cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[Option<u8>] {
        &self.bytes
    }

    /// Signature bytes with wildcard positions zeroed.
    pub fn signature(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.unwrap_or(0)).collect()
    }

    pub fn mask(&self) -> Vec<bool> {
        self.bytes.iter().map(Option::is_some).collect()
    }

    /// Check a window of exactly `self.len()` bytes against the pattern.
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() == self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(window)
                .all(|(expected, actual)| expected.is_none_or(|b| b == *actual))
    }

    /// First exact byte and its index, used to skip ahead with `memchr`.
    pub(crate) fn anchor(&self) -> Option<(usize, u8)> {
        self.bytes
            .iter()
            .enumerate()
            .find_map(|(i, b)| b.map(|value| (i, value)))
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_bytes(parse_pattern(s)?)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_pattern(&self.bytes))
    }
}

pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }

        if token.len() != 2 {
            return Err(Error::InvalidSignature(format!(
                "Invalid signature token '{}': expected two hex digits",
                token
            )));
        }

        let value = u8::from_str_radix(token, 16).map_err(|e| {
            Error::InvalidSignature(format!("Invalid signature token '{}': {}", token, e))
        })?;
        bytes.push(Some(value));
    }

    if bytes.is_empty() {
        return Err(Error::EmptySignature);
    }

    Ok(bytes)
}

/// Parse a code-style mask (`x` = exact, `?` = wildcard).
pub fn parse_mask(mask: &str) -> Result<Vec<bool>> {
    mask.chars()
        .map(|c| match c {
            'x' | 'X' => Ok(true),
            '?' => Ok(false),
            other => Err(Error::InvalidSignature(format!(
                "Invalid mask character '{}'",
                other
            ))),
        })
        .collect()
}

pub fn format_pattern(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            Some(value) => format!("{:02X}", value),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
