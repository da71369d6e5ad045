//! Cursor-based Iteration
//!
//! The SCAN family walks a source in pieces. Cursors are opaque numbers;
//! `0` starts a scan and a returned `0` ends it.
//!
//! ## Keyspace cursors
//!
//! The keyspace is split into a fixed number of shards, so the cursor is
//! simply the index of the next shard to visit. Each call consumes whole
//! shards until the COUNT hint is reached. A full scan therefore finishes
//! in at most one call per shard no matter how the keyspace changes.
//!
//! ## Collection cursors
//!
//! Hash, set and sorted-set members are visited in the order of a stable
//! 64-bit hash of the member (ties by member bytes). The cursor is the hash
//! to resume from. Because that order does not depend on the container's
//! layout, a member present for the whole scan is returned at least once,
//! and members sharing a hash are always returned in the same batch.

use super::glob::GlobPattern;
use crate::error::CommandError;
use std::cmp::Ordering;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Default number of elements per call.
pub const DEFAULT_COUNT: usize = 10;

/// Options common to every SCAN-family command.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub pattern: Option<GlobPattern>,
    pub count: Option<usize>,
    /// `TYPE` filter, keyspace scans only
    pub type_name: Option<String>,
}

impl ScanOptions {
    pub fn count(&self) -> usize {
        self.count.filter(|c| *c > 0).unwrap_or(DEFAULT_COUNT)
    }

    pub fn accepts(&self, item: &[u8]) -> bool {
        self.pattern.as_ref().map_or(true, |p| p.matches(item))
    }
}

/// Parses a cursor argument.
pub fn parse_cursor(raw: &[u8]) -> Result<u64, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(CommandError::InvalidCursor)
}

/// Position of a member in collection scan order.
pub fn member_hash(member: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    member.hash(&mut hasher);
    hasher.finish()
}

/// Scan order: member hash, then member bytes.
fn scan_order<T>(a: &(u64, &[u8], T), b: &(u64, &[u8], T)) -> Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1))
}

/// Selects the next batch of a collection scan.
///
/// `members` yields every element of the collection together with whatever
/// payload the reply needs (a field value, a score, or nothing). Returns the
/// next cursor and the selected elements in scan order, filtered by MATCH.
///
/// Only the batch is sorted; the remainder is partitioned around it.
pub fn scan_collection<'a, T, I>(members: I, cursor: u64, opts: &ScanOptions) -> (u64, Vec<(&'a [u8], T)>)
where
    I: IntoIterator<Item = (&'a [u8], T)>,
{
    let mut batch: Vec<(u64, &'a [u8], T)> = members
        .into_iter()
        .map(|(member, payload)| (member_hash(member), member, payload))
        .filter(|(hash, _, _)| *hash >= cursor)
        .collect();

    let count = opts.count();
    let mut next_cursor = 0;
    if count < batch.len() {
        batch.select_nth_unstable_by(count - 1, scan_order);
        let boundary = batch[count - 1].0;
        let rest = batch.split_off(count);
        // Members sharing the boundary hash go out together.
        for entry in rest {
            if entry.0 == boundary {
                batch.push(entry);
            } else if next_cursor == 0 || entry.0 < next_cursor {
                next_cursor = entry.0;
            }
        }
    }
    batch.sort_unstable_by(scan_order);

    let batch = batch
        .into_iter()
        .filter(|(_, member, _)| opts.accepts(member))
        .map(|(_, member, payload)| (member, payload))
        .collect();

    (next_cursor, batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn members(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("member:{}", i)).collect()
    }

    #[test]
    fn test_small_collection_completes_in_one_call() {
        let items = members(3);
        let (cursor, batch) = scan_collection(
            items.iter().map(|m| (m.as_bytes(), ())),
            0,
            &ScanOptions::default(),
        );
        assert_eq!(cursor, 0);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_full_scan_visits_every_member() {
        let items = members(100);
        let opts = ScanOptions {
            count: Some(7),
            ..Default::default()
        };
        let mut seen = HashSet::new();
        let mut cursor = 0;
        let mut calls = 0;
        loop {
            let (next, batch) = scan_collection(items.iter().map(|m| (m.as_bytes(), ())), cursor, &opts);
            seen.extend(batch.into_iter().map(|(m, _)| m.to_vec()));
            calls += 1;
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        assert_eq!(seen.len(), 100);
        assert!(calls <= 100);
    }

    #[test]
    fn test_batches_follow_hash_order() {
        let items = members(50);
        let opts = ScanOptions {
            count: Some(6),
            ..Default::default()
        };
        let mut cursor = 0;
        let mut last_hash = None;
        loop {
            let (next, batch) = scan_collection(items.iter().map(|m| (m.as_bytes(), ())), cursor, &opts);
            assert!(batch.len() >= 6 || next == 0);
            for (member, _) in &batch {
                let hash = member_hash(member);
                assert!(last_hash.map_or(true, |last| hash > last));
                assert!(next == 0 || hash < next);
                last_hash = Some(hash);
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
    }

    #[test]
    fn test_member_present_throughout_survives_mutation() {
        let mut items = members(40);
        let opts = ScanOptions {
            count: Some(5),
            ..Default::default()
        };
        let (cursor, first) = scan_collection(items.iter().map(|m| (m.as_bytes(), ())), 0, &opts);
        let mut seen: HashSet<Vec<u8>> = first.into_iter().map(|(m, _)| m.to_vec()).collect();

        // Churn the collection between calls; member:0 stays throughout.
        items.retain(|m| m == "member:0" || !seen.contains(m.as_bytes()));
        items.extend((100..150).map(|i| format!("member:{}", i)));

        let mut cursor = cursor;
        while cursor != 0 {
            let (next, batch) = scan_collection(items.iter().map(|m| (m.as_bytes(), ())), cursor, &opts);
            seen.extend(batch.into_iter().map(|(m, _)| m.to_vec()));
            cursor = next;
        }
        assert!(seen.contains(b"member:0".as_slice()));
    }

    #[test]
    fn test_match_filters_after_selection() {
        let items = vec!["apple".to_string(), "banana".to_string(), "avocado".to_string()];
        let opts = ScanOptions {
            pattern: Some(GlobPattern::new("a*")),
            ..Default::default()
        };
        let (cursor, batch) = scan_collection(items.iter().map(|m| (m.as_bytes(), ())), 0, &opts);
        assert_eq!(cursor, 0);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor(b"0"), Ok(0));
        assert_eq!(parse_cursor(b"123"), Ok(123));
        assert_eq!(parse_cursor(b"-1"), Err(CommandError::InvalidCursor));
    }
}
