//! Human-readable Size Parsing
//!
//! Capacity strings are a decimal magnitude followed by a single unit
//! character, e.g. `"512m"` or `"4g"`. Units are binary multiples.

use crate::error::{Error, Result};

/// Size unit suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
}

impl SizeUnit {
    /// Number of bytes in one unit
    pub fn number_of_bytes(&self) -> u64 {
        match self {
            SizeUnit::Bytes => 1,
            SizeUnit::Kilobytes => 1 << 10,
            SizeUnit::Megabytes => 1 << 20,
            SizeUnit::Gigabytes => 1 << 30,
            SizeUnit::Terabytes => 1 << 40,
        }
    }

    /// Look up a unit by its suffix character (case-insensitive)
    pub fn from_suffix(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'b' => Some(SizeUnit::Bytes),
            'k' => Some(SizeUnit::Kilobytes),
            'm' => Some(SizeUnit::Megabytes),
            'g' => Some(SizeUnit::Gigabytes),
            't' => Some(SizeUnit::Terabytes),
            _ => None,
        }
    }
}

/// Parse a size string like `"4g"` into bytes.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let suffix = s
        .chars()
        .last()
        .ok_or_else(|| Error::SizeParse("empty size string".to_string()))?;

    let unit = SizeUnit::from_suffix(suffix)
        .ok_or_else(|| Error::SizeParse(format!("unknown size unit in '{}'", s)))?;

    let magnitude = &s[..s.len() - suffix.len_utf8()];
    if magnitude.is_empty() || !magnitude.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::SizeParse(format!("invalid magnitude in '{}'", s)));
    }

    let magnitude: u64 = magnitude
        .parse()
        .map_err(|_| Error::SizeParse(format!("invalid magnitude in '{}'", s)))?;

    magnitude
        .checked_mul(unit.number_of_bytes())
        .ok_or_else(|| Error::SizeParse(format!("size '{}' overflows", s)))
}

// =============================================================================
// Tests
// =============================================================================
