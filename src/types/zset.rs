//! Sorted Set Values
//!
//! A sorted set keeps two views of the same data:
//!
//! ```text
//! scores:  HashMap<member, score>                 O(1) score lookup
//! ordered: BTreeSet<(OrderedFloat(score), member)> score order, ties by member
//! ```
//!
//! Every mutation goes through [`SortedSet::insert`] or
//! [`SortedSet::remove`], which update both views together.

use crate::error::CommandError;
use bytes::Bytes;
use ordered_float::OrderedFloat;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

/// One end of a score interval (`5`, `(5`, `-inf`, `+inf`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn parse(raw: &[u8]) -> Result<Self, CommandError> {
        let (exclusive, rest) = match raw.first() {
            Some(b'(') => (true, &raw[1..]),
            _ => (false, raw),
        };
        let value = match rest {
            b"-inf" | b"-INF" => f64::NEG_INFINITY,
            b"+inf" | b"inf" | b"+INF" | b"INF" => f64::INFINITY,
            _ => super::string::parse_f64(rest)
                .map_err(|_| CommandError::other("min or max is not a float"))?,
        };
        Ok(Self { value, exclusive })
    }

    fn admits_from_below(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    fn admits_from_above(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

/// A set of unique members ordered by score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
    ordered: BTreeSet<(OrderedFloat<f64>, Bytes)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Adds a member or updates its score. Returns true if it was new.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(OrderedFloat(old), member.clone()));
                self.ordered.insert((OrderedFloat(score), member));
                false
            }
            None => {
                self.ordered.insert((OrderedFloat(score), member));
                true
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove_entry(member) {
            Some((member, score)) => {
                self.ordered.remove(&(OrderedFloat(score), member));
                true
            }
            None => false,
        }
    }

    /// ZINCRBY: adds `delta` to a member's score (absent members start at 0).
    pub fn incr(&mut self, member: Bytes, delta: f64) -> Result<f64, CommandError> {
        let next = self.score(&member).unwrap_or(0.0) + delta;
        if next.is_nan() {
            return Err(CommandError::other("resulting score is not a number (NaN)"));
        }
        self.insert(member, next);
        Ok(next)
    }

    /// 0-based position in ascending score order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = self.score(member)?;
        let key = (OrderedFloat(score), Bytes::copy_from_slice(member));
        Some(self.ordered.range(..key).count())
    }

    /// Members in ascending order with their scores.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&Bytes, f64)> {
        self.ordered.iter().map(|(score, member)| (member, score.0))
    }

    /// Members between two inclusive ranks. With `rev`, ranks count from
    /// the highest score.
    pub fn range_by_rank(&self, start: i64, stop: i64, rev: bool) -> Vec<(Bytes, f64)> {
        let len = self.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Vec::new();
        }
        let take = (stop - start + 1) as usize;
        let pairs = self.iter().map(|(m, s)| (m.clone(), s));
        if rev {
            pairs.rev().skip(start as usize).take(take).collect()
        } else {
            pairs.skip(start as usize).take(take).collect()
        }
    }

    /// Members whose score lies between `min` and `max`, after skipping
    /// `offset` matches and returning at most `limit`.
    pub fn range_by_score(
        &self,
        min: ScoreBound,
        max: ScoreBound,
        rev: bool,
        offset: usize,
        limit: Option<usize>,
    ) -> Vec<(Bytes, f64)> {
        let limit = limit.unwrap_or(usize::MAX);
        let lower = Bound::Included((OrderedFloat(min.value), Bytes::new()));
        let in_range = self
            .ordered
            .range((lower, Bound::Unbounded))
            .map(|(score, member)| (member, score.0))
            .skip_while(|(_, score)| !min.admits_from_below(*score))
            .take_while(|(_, score)| max.admits_from_above(*score));

        let matched: Vec<(Bytes, f64)> = if rev {
            let all: Vec<_> = in_range.collect();
            all.into_iter()
                .rev()
                .skip(offset)
                .take(limit)
                .map(|(m, s)| (m.clone(), s))
                .collect()
        } else {
            in_range
                .skip(offset)
                .take(limit)
                .map(|(m, s)| (m.clone(), s))
                .collect()
        };
        matched
    }

    /// ZCOUNT: number of members with a score inside the interval.
    pub fn count(&self, min: ScoreBound, max: ScoreBound) -> usize {
        self.iter()
            .filter(|(_, score)| min.admits_from_below(*score) && max.admits_from_above(*score))
            .count()
    }
}
