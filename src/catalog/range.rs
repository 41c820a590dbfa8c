//! Chapter range parsing and inclusive filtering.

use std::fmt;
use std::str::FromStr;

use super::{CatalogError, ChapterDescriptor};

const EPSILON: f64 = 1e-9;

/// A chapter selection: one sequence number or an inclusive interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChapterRange {
    /// Exactly one chapter number.
    Single(f64),
    /// Closed interval `start..=end`.
    Interval {
        /// Lower bound (inclusive).
        start: f64,
        /// Upper bound (inclusive).
        end: f64,
    },
}

impl ChapterRange {
    /// Parses `"N"` or `"A-B"` (decimals allowed, surrounding whitespace ignored).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidRange`] for empty or malformed input, or
    /// when the lower bound exceeds the upper bound.
    pub fn parse(spec: &str) -> Result<Self, CatalogError> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(CatalogError::invalid_range(spec, "empty range"));
        }

        match trimmed.split_once('-') {
            Some((start, end)) => {
                let start = parse_bound(spec, start)?;
                let end = parse_bound(spec, end)?;
                if start > end {
                    return Err(CatalogError::invalid_range(
                        spec,
                        format!("lower bound {start} exceeds upper bound {end}"),
                    ));
                }
                Ok(Self::Interval { start, end })
            }
            None => Ok(Self::Single(parse_bound(spec, trimmed)?)),
        }
    }

    /// Returns true if `sequence_number` falls inside the range (inclusive).
    #[must_use]
    pub fn contains(&self, sequence_number: f64) -> bool {
        match *self {
            Self::Single(n) => (sequence_number - n).abs() < EPSILON,
            Self::Interval { start, end } => {
                sequence_number >= start - EPSILON && sequence_number <= end + EPSILON
            }
        }
    }

    /// Keeps the chapters inside the range, preserving their order.
    #[must_use]
    pub fn filter(&self, chapters: &[ChapterDescriptor]) -> Vec<ChapterDescriptor> {
        chapters
            .iter()
            .filter(|c| self.contains(c.sequence_number))
            .cloned()
            .collect()
    }
}

fn parse_bound(spec: &str, bound: &str) -> Result<f64, CatalogError> {
    let bound = bound.trim();
    let value: f64 = bound
        .parse()
        .map_err(|_| CatalogError::invalid_range(spec, format!("'{bound}' is not a number")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(CatalogError::invalid_range(
            spec,
            format!("'{bound}' is not a chapter number"),
        ));
    }
    Ok(value)
}

impl FromStr for ChapterRange {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ChapterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Interval { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

/// Filters `chapters` by an optional range spec. `None` keeps everything.
///
/// An empty result is not an error.
///
/// # Errors
///
/// Returns [`CatalogError::InvalidRange`] when `spec` is malformed.
pub fn filter_range(
    chapters: &[ChapterDescriptor],
    spec: Option<&str>,
) -> Result<Vec<ChapterDescriptor>, CatalogError> {
    match spec {
        None => Ok(chapters.to_vec()),
        Some(spec) => Ok(ChapterRange::parse(spec)?.filter(chapters)),
    }
}
