//! Combination space enumeration
//!
//! This module provides the bijective mapping between a linear index and a
//! (day, month, region, year) tuple over a configured date range. The mapping
//! is the foundation of checkpoint/resume: a saved index must decode to the
//! same combination in every run, so the encoding order (day-major, then
//! region, then year-month) is fixed.
//!
//! # Example
//!
//! ```
//! use sonda::space::CombinationSpace;
//!
//! let space = CombinationSpace::from_bounds("1990-11", "1990-12").unwrap();
//! assert_eq!(space.total(), 31 * 32 * 2);
//!
//! let combo = space.at(0).unwrap();
//! assert_eq!(space.index_of(&combo).unwrap(), 0);
//! ```

pub mod regions;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use regions::{region_code, REGIONS};

/// Number of day slots enumerated per (region, year-month) pair.
///
/// Always 31: impossible dates (e.g. Feb 30) are submitted and rejected by the
/// remote service like any other non-match, which keeps the index arithmetic
/// uniform across months.
pub const DAYS_PER_MONTH: u64 = 31;

/// Errors from index/combo mapping misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    /// Index outside `[0, total)`
    #[error("Index {index} out of range (total {total})")]
    OutOfRange { index: u64, total: u64 },

    /// Combination not part of the configured space
    #[error("Combination not in space: {0}")]
    ComboNotFound(String),

    /// Malformed range bound
    #[error("Invalid range bound: {0}")]
    InvalidBound(String),
}

/// One point in the search space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combo {
    /// Day of month (1-31)
    pub day: u8,

    /// Month (1-12)
    pub month: u8,

    /// Region name, one of [`REGIONS`]
    pub region: String,

    /// Year
    pub year: u16,
}

impl std::fmt::Display for Combo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}/{:02}/{} {}",
            self.day, self.month, self.year, self.region
        )
    }
}

/// An inclusive range bound: a bare year or a year-month
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBound {
    pub year: u16,
    pub month: Option<u8>,
}

impl std::str::FromStr for RangeBound {
    type Err = SpaceError;

    /// Parse `"1990"` or `"1990-11"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SpaceError::InvalidBound(s.to_string());

        match s.split_once('-') {
            Some((y, m)) => {
                let year = y.parse::<u16>().map_err(|_| invalid())?;
                let month = m.parse::<u8>().map_err(|_| invalid())?;
                if !(1..=12).contains(&month) {
                    return Err(invalid());
                }
                Ok(Self {
                    year,
                    month: Some(month),
                })
            }
            None => {
                let year = s.parse::<u16>().map_err(|_| invalid())?;
                Ok(Self { year, month: None })
            }
        }
    }
}

/// Bijective enumeration of (day, month, region, year) combinations
///
/// Pure and immutable after construction; safe to share across workers
/// without synchronization.
#[derive(Debug, Clone)]
pub struct CombinationSpace {
    regions: Vec<String>,
    year_month_pairs: Vec<(u16, u8)>,
    total: u64,
}

impl CombinationSpace {
    /// Build a space from string bounds (`"1990"` or `"1990-11"`), inclusive
    pub fn from_bounds(start: &str, end: &str) -> Result<Self, SpaceError> {
        let start: RangeBound = start.parse()?;
        let end: RangeBound = end.parse()?;
        Self::new(start, end)
    }

    /// Build a space from parsed bounds, inclusive, over the full region table
    pub fn new(start: RangeBound, end: RangeBound) -> Result<Self, SpaceError> {
        let start_key = (start.year, start.month.unwrap_or(1));
        let end_key = (end.year, end.month.unwrap_or(12));
        if start_key > end_key {
            return Err(SpaceError::InvalidBound(format!(
                "start {}-{:02} after end {}-{:02}",
                start_key.0, start_key.1, end_key.0, end_key.1
            )));
        }

        let mut pairs = Vec::new();
        for year in start.year..=end.year {
            let lo = if year == start.year { start_key.1 } else { 1 };
            let hi = if year == end.year { end_key.1 } else { 12 };
            for month in lo..=hi {
                pairs.push((year, month));
            }
        }

        let regions: Vec<String> = REGIONS.iter().map(|r| (*r).to_string()).collect();
        let total = DAYS_PER_MONTH * regions.len() as u64 * pairs.len() as u64;

        Ok(Self {
            regions,
            year_month_pairs: pairs,
            total,
        })
    }

    /// Total number of combinations
    pub fn total(&self) -> u64 {
        self.total
    }

    /// The ordered region axis
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// The ordered (year, month) axis
    pub fn year_month_pairs(&self) -> &[(u16, u8)] {
        &self.year_month_pairs
    }

    /// Decode an index into its combination
    ///
    /// Day-major, then region, then year-month: the inverse of [`index_of`].
    ///
    /// [`index_of`]: CombinationSpace::index_of
    pub fn at(&self, index: u64) -> Result<Combo, SpaceError> {
        if index >= self.total {
            return Err(SpaceError::OutOfRange {
                index,
                total: self.total,
            });
        }

        let regions_count = self.regions.len() as u64;
        let pair_count = self.year_month_pairs.len() as u64;

        let day_idx = index / (regions_count * pair_count);
        let remaining = index % (regions_count * pair_count);
        let region_idx = remaining / pair_count;
        let pair_idx = remaining % pair_count;

        let (year, month) = self.year_month_pairs[pair_idx as usize];

        Ok(Combo {
            day: (day_idx + 1) as u8,
            month,
            region: self.regions[region_idx as usize].clone(),
            year,
        })
    }

    /// Encode a combination into its index
    pub fn index_of(&self, combo: &Combo) -> Result<u64, SpaceError> {
        let not_found = || SpaceError::ComboNotFound(combo.to_string());

        if combo.day < 1 || combo.day as u64 > DAYS_PER_MONTH {
            return Err(not_found());
        }

        let region_idx = self
            .regions
            .iter()
            .position(|r| *r == combo.region)
            .ok_or_else(not_found)?;

        let pair_idx = self
            .year_month_pairs
            .iter()
            .position(|&(y, m)| y == combo.year && m == combo.month)
            .ok_or_else(not_found)?;

        let regions_count = self.regions.len() as u64;
        let pair_count = self.year_month_pairs.len() as u64;

        Ok((combo.day as u64 - 1) * regions_count * pair_count
            + region_idx as u64 * pair_count
            + pair_idx as u64)
    }

    /// Iterate over all combinations in index order
    pub fn iter(&self) -> ComboIter<'_> {
        self.iter_from(0)
    }

    /// Iterate over combinations starting at `index` (for resume seeding)
    pub fn iter_from(&self, index: u64) -> ComboIter<'_> {
        ComboIter {
            space: self,
            next: index,
        }
    }
}

/// Iterator over (index, combo) pairs in index order
pub struct ComboIter<'a> {
    space: &'a CombinationSpace,
    next: u64,
}

impl Iterator for ComboIter<'_> {
    type Item = (u64, Combo);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.space.total {
            return None;
        }
        let index = self.next;
        self.next += 1;
        // In-range by the check above
        let combo = self.space.at(index).ok()?;
        Some((index, combo))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.space.total.saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_full_years() {
        let space = CombinationSpace::from_bounds("1990", "1991").unwrap();
        assert_eq!(space.year_month_pairs().len(), 24);
        assert_eq!(space.total(), 31 * 32 * 24);
    }

    #[test]
    fn test_total_partial_months() {
        // Single partial range: Nov and Dec 1990 only
        let space = CombinationSpace::from_bounds("1990-11", "1990-12").unwrap();
        assert_eq!(space.year_month_pairs(), &[(1990, 11), (1990, 12)]);
        assert_eq!(space.total(), 31 * 32 * 2);
    }

    #[test]
    fn test_partial_start_and_end_across_years() {
        let space = CombinationSpace::from_bounds("1990-11", "1992-02").unwrap();
        // 2 months in 1990, 12 in 1991, 2 in 1992
        assert_eq!(space.year_month_pairs().len(), 16);
        assert_eq!(space.year_month_pairs()[0], (1990, 11));
        assert_eq!(space.year_month_pairs()[15], (1992, 2));
    }

    #[test]
    fn test_first_and_last_index() {
        let space = CombinationSpace::from_bounds("1990", "1990").unwrap();

        let first = space.at(0).unwrap();
        assert_eq!(first.day, 1);
        assert_eq!(first.month, 1);
        assert_eq!(first.region, "Aguascalientes");
        assert_eq!(first.year, 1990);

        let last = space.at(space.total() - 1).unwrap();
        assert_eq!(last.day, 31);
        assert_eq!(last.month, 12);
        assert_eq!(last.region, "Nacido en el extranjero");
    }

    #[test]
    fn test_out_of_range() {
        let space = CombinationSpace::from_bounds("1990", "1990").unwrap();
        assert!(matches!(
            space.at(space.total()),
            Err(SpaceError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_roundtrip() {
        let space = CombinationSpace::from_bounds("1990-06", "1991-03").unwrap();
        for index in [0, 1, 31, 1000, space.total() - 1] {
            let combo = space.at(index).unwrap();
            assert_eq!(space.index_of(&combo).unwrap(), index, "index {index}");
        }
    }

    #[test]
    fn test_index_of_unknown_combo() {
        let space = CombinationSpace::from_bounds("1990", "1990").unwrap();

        let combo = Combo {
            day: 1,
            month: 1,
            region: "Atlantis".to_string(),
            year: 1990,
        };
        assert!(matches!(
            space.index_of(&combo),
            Err(SpaceError::ComboNotFound(_))
        ));

        // Year outside the configured range
        let combo = Combo {
            day: 1,
            month: 1,
            region: "Jalisco".to_string(),
            year: 1989,
        };
        assert!(space.index_of(&combo).is_err());
    }

    #[test]
    fn test_iter_from() {
        let space = CombinationSpace::from_bounds("1990-01", "1990-01").unwrap();
        let resume_at = 100;
        let items: Vec<_> = space.iter_from(resume_at).collect();
        assert_eq!(items.len(), (space.total() - resume_at) as usize);
        assert_eq!(items[0].0, resume_at);
        assert_eq!(items[0].1, space.at(resume_at).unwrap());
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(CombinationSpace::from_bounds("1990-13", "1991").is_err());
        assert!(CombinationSpace::from_bounds("199O", "1991").is_err());
        assert!(CombinationSpace::from_bounds("1992", "1991").is_err());
        assert!(CombinationSpace::from_bounds("1990-12", "1990-01").is_err());
    }
}
