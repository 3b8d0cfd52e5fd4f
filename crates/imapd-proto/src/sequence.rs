//! Message sequence sets.
//!
//! FETCH, STORE, SEARCH, and COPY address messages with sequence sets such
//! as `1`, `2:5`, `3:*`, `*`, or comma-joined combinations. Handlers receive
//! the parsed form and interpret it against their own mailbox contents.

use std::num::NonZeroU32;
use std::str::FromStr;

use crate::{Error, Result};

/// Message sequence number, assigned from 1 within a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNum(pub NonZeroU32);

impl SeqNum {
    /// Creates a new sequence number. Returns `None` if the value is 0.
    #[must_use]
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the underlying value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for SeqNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sequence set for specifying message ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceSet {
    /// Single sequence number.
    Single(SeqNum),
    /// Range of sequence numbers (inclusive).
    Range(SeqNum, SeqNum),
    /// Range from start to the end of the mailbox (`n:*`).
    RangeFrom(SeqNum),
    /// All messages (`*`).
    All,
    /// Multiple comma-joined sequence specifications.
    Set(Vec<Self>),
}

impl SequenceSet {
    /// Creates a sequence set from a single number.
    #[must_use]
    pub fn single(n: u32) -> Option<Self> {
        SeqNum::new(n).map(Self::Single)
    }

    /// Creates a range sequence set.
    #[must_use]
    pub fn range(start: u32, end: u32) -> Option<Self> {
        Some(Self::Range(SeqNum::new(start)?, SeqNum::new(end)?))
    }
}

impl FromStr for SequenceSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::parse(0, format!("invalid sequence set: {s}"));

        let mut parts = Vec::new();
        for part in s.split(',') {
            parts.push(parse_part(part).ok_or_else(invalid)?);
        }
        match parts.len() {
            0 => Err(invalid()),
            1 => parts.pop().ok_or_else(invalid),
            _ => Ok(Self::Set(parts)),
        }
    }
}

fn parse_part(part: &str) -> Option<SequenceSet> {
    if part == "*" {
        return Some(SequenceSet::All);
    }
    match part.split_once(':') {
        None => SequenceSet::single(part.parse().ok()?),
        Some((start, "*")) => Some(SequenceSet::RangeFrom(SeqNum::new(start.parse().ok()?)?)),
        Some((start, end)) => SequenceSet::range(start.parse().ok()?, end.parse().ok()?),
    }
}

impl std::fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Range(start, end) => write!(f, "{start}:{end}"),
            Self::RangeFrom(start) => write!(f, "{start}:*"),
            Self::All => write!(f, "*"),
            Self::Set(items) => {
                let s: Vec<_> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", s.join(","))
            }
        }
    }
}
