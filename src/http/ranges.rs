//! `Range` request header values.
//!
//! Accepted syntax is `<unit>=<start>-<end>[, <start>-<end> ...]` with
//! optional whitespace around every token. `end` is an exclusive offset, so a
//! range covers `end - start` bytes.

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (end >= start).then_some(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `Content-Range` value for a resource of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    pub unit: String,
    pub ranges: Vec<ByteRange>,
}

impl RangeSet {
    /// Parses a `Range` header value. Any syntax error, or a range whose end
    /// lies before its start, yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (unit, list) = raw.split_once('=')?;
        let unit: String = unit.chars().filter(|c| !c.is_whitespace()).collect();
        if unit.is_empty() {
            return None;
        }

        let ranges = list
            .split(',')
            .map(|spec| {
                let (start, end) = spec.split_once('-')?;
                ByteRange::new(parse_offset(start)?, parse_offset(end)?)
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self { unit, ranges })
    }

    /// Checks every range against a resource of `size` bytes.
    pub fn validate(&self, size: u64) -> Result<()> {
        if self.ranges.is_empty() {
            return Err(Error::InvalidRange);
        }
        for range in &self.ranges {
            if range.end < range.start || range.end > size {
                return Err(Error::InvalidRange);
            }
        }
        Ok(())
    }

    /// Sum of all range lengths.
    pub fn total_len(&self) -> u64 {
        self.ranges.iter().map(ByteRange::len).sum()
    }
}

fn parse_offset(token: &str) -> Option<u64> {
    let token = token.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}
