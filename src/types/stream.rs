//! Stream Values
//!
//! A stream is an append-only log. Each entry is keyed by a [`StreamId`]
//! (`<ms>-<seq>`) that strictly increases within the stream, and carries an
//! ordered list of field/value pairs.
//!
//! Auto-generated IDs take the current wall clock in milliseconds; when the
//! clock has not moved past the last ID the sequence number is bumped
//! instead, so IDs keep increasing even if the clock stalls or goes back.

use crate::error::CommandError;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// Identifier of a stream entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parses `ms` or `ms-seq`; a bare `ms` takes `default_seq`.
    fn parse_with_default(raw: &[u8], default_seq: u64) -> Result<Self, CommandError> {
        let text = std::str::from_utf8(raw).map_err(|_| CommandError::InvalidStreamId)?;
        let (ms, seq) = match text.split_once('-') {
            Some((ms, seq)) => (ms, Some(seq)),
            None => (text, None),
        };
        let ms = ms.parse::<u64>().map_err(|_| CommandError::InvalidStreamId)?;
        let seq = match seq {
            Some(seq) => seq.parse::<u64>().map_err(|_| CommandError::InvalidStreamId)?,
            None => default_seq,
        };
        Ok(Self { ms, seq })
    }

    /// Parses a fully specified id.
    pub fn parse(raw: &[u8]) -> Result<Self, CommandError> {
        Self::parse_with_default(raw, 0)
    }

    fn next(self) -> Option<Self> {
        if self.seq < u64::MAX {
            Some(Self::new(self.ms, self.seq + 1))
        } else if self.ms < u64::MAX {
            Some(Self::new(self.ms + 1, 0))
        } else {
            None
        }
    }

    fn prev(self) -> Option<Self> {
        if self.seq > 0 {
            Some(Self::new(self.ms, self.seq - 1))
        } else if self.ms > 0 {
            Some(Self::new(self.ms - 1, u64::MAX))
        } else {
            None
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// How XADD should pick the id of a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    /// `*`
    Auto,
    /// `<ms>-*`
    AutoSeq(u64),
    /// `<ms>-<seq>` or `<ms>`
    Explicit(StreamId),
}

impl IdSpec {
    pub fn parse(raw: &[u8]) -> Result<Self, CommandError> {
        if raw == b"*" {
            return Ok(IdSpec::Auto);
        }
        if let Some(ms) = raw.strip_suffix(b"-*") {
            let ms = std::str::from_utf8(ms)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or(CommandError::InvalidStreamId)?;
            return Ok(IdSpec::AutoSeq(ms));
        }
        StreamId::parse(raw).map(IdSpec::Explicit)
    }
}

/// Parses an XRANGE bound. `-`/`+` are the extremes, `(` makes the bound
/// exclusive, and a bare `ms` expands to the first (start) or last (end)
/// sequence of that millisecond.
///
/// Returns `None` when an exclusive bound leaves nothing to select.
pub fn parse_range_bound(raw: &[u8], is_start: bool) -> Result<Option<StreamId>, CommandError> {
    match raw {
        b"-" => return Ok(Some(StreamId::MIN)),
        b"+" => return Ok(Some(StreamId::MAX)),
        _ => {}
    }
    let (exclusive, rest) = match raw.first() {
        Some(b'(') => (true, &raw[1..]),
        _ => (false, raw),
    };
    let default_seq = if is_start { 0 } else { u64::MAX };
    let id = StreamId::parse_with_default(rest, default_seq)?;
    if !exclusive {
        return Ok(Some(id));
    }
    Ok(if is_start { id.next() } else { id.prev() })
}

/// An entry's field/value pairs, in insertion order.
pub type Fields = Vec<(Bytes, Bytes)>;

/// An append-only log of entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stream {
    entries: BTreeMap<StreamId, Fields>,
    last_id: StreamId,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Resolves the id a new entry would receive at wall time `now_ms`.
    pub fn next_id(&self, spec: IdSpec, now_ms: u64) -> Result<StreamId, CommandError> {
        let last = self.last_id;
        let id = match spec {
            IdSpec::Auto => {
                if now_ms > last.ms {
                    StreamId::new(now_ms, 0)
                } else {
                    last.next().ok_or(CommandError::StreamIdTooSmall)?
                }
            }
            IdSpec::AutoSeq(ms) => {
                if ms > last.ms {
                    StreamId::new(ms, 0)
                } else if ms == last.ms && last.seq < u64::MAX {
                    StreamId::new(ms, last.seq + 1)
                } else {
                    return Err(CommandError::StreamIdTooSmall);
                }
            }
            IdSpec::Explicit(id) => {
                if id == StreamId::MIN {
                    return Err(CommandError::StreamIdZero);
                }
                id
            }
        };

        if id <= last {
            return Err(CommandError::StreamIdTooSmall);
        }
        Ok(id)
    }

    /// Appends an entry, returning its id.
    pub fn append(&mut self, spec: IdSpec, fields: Fields, now_ms: u64) -> Result<StreamId, CommandError> {
        let id = self.next_id(spec, now_ms)?;
        self.entries.insert(id, fields);
        self.last_id = id;
        Ok(id)
    }

    /// Entries with `start <= id <= end`, ascending, at most `count`.
    pub fn range(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<(StreamId, &Fields)> {
        if start > end {
            return Vec::new();
        }
        self.entries
            .range((Bound::Included(start), Bound::Included(end)))
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| (*id, fields))
            .collect()
    }

    /// Same as [`Stream::range`] but descending from `end`.
    pub fn rev_range(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<(StreamId, &Fields)> {
        if start > end {
            return Vec::new();
        }
        self.entries
            .range((Bound::Included(start), Bound::Included(end)))
            .rev()
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| (*id, fields))
            .collect()
    }

    /// Drops the oldest entries until at most `max_len` remain.
    pub fn trim_to(&mut self, max_len: usize) -> usize {
        let mut removed = 0;
        while self.entries.len() > max_len {
            if self.entries.pop_first().is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(f, v)| (Bytes::from(f.to_string()), Bytes::from(v.to_string())))
            .collect()
    }

    #[test]
    fn test_id_parse_and_display() {
        assert_eq!(StreamId::parse(b"1000-5"), Ok(StreamId::new(1000, 5)));
        assert_eq!(StreamId::parse(b"1000"), Ok(StreamId::new(1000, 0)));
        assert!(StreamId::parse(b"abc").is_err());
        assert_eq!(StreamId::new(7, 1).to_string(), "7-1");
        assert_eq!(IdSpec::parse(b"*"), Ok(IdSpec::Auto));
        assert_eq!(IdSpec::parse(b"5-*"), Ok(IdSpec::AutoSeq(5)));
    }

    #[test]
    fn test_explicit_ids_must_increase() {
        let mut s = Stream::new();
        let id = s
            .append(IdSpec::Explicit(StreamId::new(1000, 0)), fields(&[("a", "1")]), 0)
            .unwrap();
        assert_eq!(id.to_string(), "1000-0");
        assert_eq!(
            s.append(IdSpec::Explicit(StreamId::new(1000, 0)), fields(&[("a", "2")]), 0),
            Err(CommandError::StreamIdTooSmall)
        );
        assert_eq!(
            s.append(IdSpec::Explicit(StreamId::new(999, 9)), fields(&[("a", "2")]), 0),
            Err(CommandError::StreamIdTooSmall)
        );
        assert_eq!(
            Stream::new().append(IdSpec::Explicit(StreamId::MIN), fields(&[("a", "1")]), 0),
            Err(CommandError::StreamIdZero)
        );
    }

    #[test]
    fn test_auto_ids_survive_stalled_clock() {
        let mut s = Stream::new();
        let a = s.append(IdSpec::Auto, fields(&[("k", "v")]), 500).unwrap();
        let b = s.append(IdSpec::Auto, fields(&[("k", "v")]), 500).unwrap();
        let c = s.append(IdSpec::Auto, fields(&[("k", "v")]), 100).unwrap();
        assert_eq!(a, StreamId::new(500, 0));
        assert_eq!(b, StreamId::new(500, 1));
        assert_eq!(c, StreamId::new(500, 2));

        let d = s.append(IdSpec::AutoSeq(500), fields(&[("k", "v")]), 0).unwrap();
        assert_eq!(d, StreamId::new(500, 3));
        assert!(s.append(IdSpec::AutoSeq(499), fields(&[("k", "v")]), 0).is_err());
    }

    #[test]
    fn test_range_queries() {
        let mut s = Stream::new();
        for ms in 1..=5 {
            s.append(IdSpec::Explicit(StreamId::new(ms, 0)), fields(&[("n", "x")]), 0)
                .unwrap();
        }
        assert_eq!(s.range(StreamId::MIN, StreamId::MAX, None).len(), 5);
        assert_eq!(s.range(StreamId::MIN, StreamId::MAX, Some(2)).len(), 2);

        let end = parse_range_bound(b"3", false).unwrap().unwrap();
        let ids: Vec<_> = s.range(StreamId::MIN, end, None).iter().map(|(id, _)| id.ms).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let start = parse_range_bound(b"(2-0", true).unwrap().unwrap();
        let ids: Vec<_> = s.range(start, StreamId::MAX, None).iter().map(|(id, _)| id.ms).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        let ids: Vec<_> = s
            .rev_range(StreamId::MIN, StreamId::MAX, Some(2))
            .iter()
            .map(|(id, _)| id.ms)
            .collect();
        assert_eq!(ids, vec![5, 4]);
    }

    #[test]
    fn test_trim() {
        let mut s = Stream::new();
        for ms in 1..=4 {
            s.append(IdSpec::Explicit(StreamId::new(ms, 0)), fields(&[("n", "x")]), 0)
                .unwrap();
        }
        assert_eq!(s.trim_to(2), 2);
        assert_eq!(s.len(), 2);
        assert_eq!(s.last_id(), StreamId::new(4, 0));
    }
}
