//! List Values
//!
//! Lists are stored as a `VecDeque<Bytes>` so pushes and pops at both ends
//! are O(1). Index arguments follow the usual convention: negative indices
//! count from the tail, `-1` being the last element.

use crate::error::CommandError;
use bytes::Bytes;
use std::collections::VecDeque;

/// Which end of a list an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    Left,
    Right,
}

impl End {
    pub fn parse(raw: &[u8]) -> Result<Self, CommandError> {
        match raw.to_ascii_uppercase().as_slice() {
            b"LEFT" => Ok(End::Left),
            b"RIGHT" => Ok(End::Right),
            _ => Err(CommandError::Syntax),
        }
    }
}

/// Converts a possibly negative index into a position inside the list.
pub fn normalize_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    if index < 0 || index >= len {
        None
    } else {
        Some(index as usize)
    }
}

/// Clamps an inclusive `[start, stop]` range to the list bounds.
fn clamp_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

pub fn push(list: &mut VecDeque<Bytes>, end: End, values: impl IntoIterator<Item = Bytes>) -> usize {
    for value in values {
        match end {
            End::Left => list.push_front(value),
            End::Right => list.push_back(value),
        }
    }
    list.len()
}

pub fn pop(list: &mut VecDeque<Bytes>, end: End) -> Option<Bytes> {
    match end {
        End::Left => list.pop_front(),
        End::Right => list.pop_back(),
    }
}

/// LRANGE: elements between two inclusive indices.
pub fn range(list: &VecDeque<Bytes>, start: i64, stop: i64) -> Vec<Bytes> {
    match clamp_range(list.len(), start, stop) {
        Some((from, to)) => list.range(from..=to).cloned().collect(),
        None => Vec::new(),
    }
}

/// LTRIM: keeps only the elements between two inclusive indices.
pub fn trim(list: &mut VecDeque<Bytes>, start: i64, stop: i64) {
    match clamp_range(list.len(), start, stop) {
        Some((from, to)) => {
            list.truncate(to + 1);
            list.drain(..from);
        }
        None => list.clear(),
    }
}

/// LSET: replaces the element at `index`.
pub fn set(list: &mut VecDeque<Bytes>, index: i64, value: Bytes) -> Result<(), CommandError> {
    let pos = normalize_index(list.len(), index).ok_or(CommandError::OutOfRange)?;
    list[pos] = value;
    Ok(())
}

/// LREM: removes up to `count` occurrences of `value`.
///
/// * `count > 0`: from head to tail
/// * `count < 0`: from tail to head
/// * `count = 0`: every occurrence
pub fn remove(list: &mut VecDeque<Bytes>, count: i64, value: &[u8]) -> usize {
    let limit = if count == 0 {
        usize::MAX
    } else {
        count.unsigned_abs() as usize
    };
    let mut removed = 0;

    if count >= 0 {
        let mut i = 0;
        while i < list.len() && removed < limit {
            if list[i] == value {
                list.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
    } else {
        let mut i = list.len();
        while i > 0 && removed < limit {
            i -= 1;
            if list[i] == value {
                list.remove(i);
                removed += 1;
            }
        }
    }

    removed
}

/// LINSERT: inserts `value` before or after the first `pivot`.
///
/// Returns the new length, or `None` when the pivot is missing.
pub fn insert(list: &mut VecDeque<Bytes>, before: bool, pivot: &[u8], value: Bytes) -> Option<usize> {
    let pos = list.iter().position(|item| item == pivot)?;
    let at = if before { pos } else { pos + 1 };
    list.insert(at, value);
    Some(list.len())
}

/// Options accepted by LPOS.
#[derive(Debug, Clone, Copy)]
pub struct PosOptions {
    /// 1-based match rank; negative ranks search from the tail
    pub rank: i64,
    /// Maximum number of matches (0 = all)
    pub count: usize,
    /// Maximum number of elements inspected (0 = all)
    pub max_len: usize,
}

impl Default for PosOptions {
    fn default() -> Self {
        Self {
            rank: 1,
            count: 1,
            max_len: 0,
        }
    }
}

/// LPOS: indices of matching elements, in search order.
pub fn positions(list: &VecDeque<Bytes>, value: &[u8], opts: PosOptions) -> Vec<usize> {
    let limit = if opts.count == 0 { usize::MAX } else { opts.count };
    let scan = if opts.max_len == 0 { list.len() } else { opts.max_len.min(list.len()) };
    let mut skip = opts.rank.unsigned_abs().saturating_sub(1);
    let mut found = Vec::new();

    let indices: Box<dyn Iterator<Item = usize>> = if opts.rank >= 0 {
        Box::new(0..scan)
    } else {
        Box::new((list.len() - scan..list.len()).rev())
    };

    for i in indices {
        if list[i] != value {
            continue;
        }
        if skip > 0 {
            skip -= 1;
            continue;
        }
        found.push(i);
        if found.len() >= limit {
            break;
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> VecDeque<Bytes> {
        items.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_push_pop() {
        let mut l = VecDeque::new();
        assert_eq!(push(&mut l, End::Left, list(&["a", "b"])), 2);
        assert_eq!(l, list(&["b", "a"]));
        assert_eq!(push(&mut l, End::Right, list(&["c"])), 3);
        assert_eq!(pop(&mut l, End::Left), Some(Bytes::from("b")));
        assert_eq!(pop(&mut l, End::Right), Some(Bytes::from("c")));
    }

    #[test]
    fn test_range() {
        let l = list(&["a", "b", "c", "d", "e"]);
        assert_eq!(range(&l, 0, -1), Vec::from(l.clone()));
        assert_eq!(range(&l, 1, 3), Vec::from(list(&["b", "c", "d"])));
        assert_eq!(range(&l, -3, -1), Vec::from(list(&["c", "d", "e"])));
        assert_eq!(range(&l, 0, 100).len(), 5);
        assert!(range(&l, 3, 1).is_empty());
        assert!(range(&l, 10, 20).is_empty());
    }

    #[test]
    fn test_trim() {
        let mut l = list(&["a", "b", "c", "d"]);
        trim(&mut l, 1, -2);
        assert_eq!(l, list(&["b", "c"]));
        trim(&mut l, 5, 10);
        assert!(l.is_empty());
    }

    #[test]
    fn test_set_out_of_range() {
        let mut l = list(&["a", "b", "c"]);
        assert!(set(&mut l, -1, Bytes::from("C")).is_ok());
        assert_eq!(l[2], Bytes::from("C"));
        assert_eq!(set(&mut l, 3, Bytes::from("x")), Err(CommandError::OutOfRange));
    }

    #[test]
    fn test_remove_directions() {
        let mut l = list(&["a", "b", "a", "c", "a", "d"]);
        assert_eq!(remove(&mut l, 2, b"a"), 2);
        assert_eq!(l, list(&["b", "c", "a", "d"]));

        let mut l = list(&["a", "b", "a", "c", "a"]);
        assert_eq!(remove(&mut l, -2, b"a"), 2);
        assert_eq!(l, list(&["a", "b", "c"]));

        let mut l = list(&["a", "a", "a"]);
        assert_eq!(remove(&mut l, 0, b"a"), 3);
        assert!(l.is_empty());
    }

    #[test]
    fn test_insert() {
        let mut l = list(&["a", "b"]);
        assert_eq!(insert(&mut l, true, b"b", Bytes::from("x")), Some(3));
        assert_eq!(l, list(&["a", "x", "b"]));
        assert_eq!(insert(&mut l, false, b"b", Bytes::from("y")), Some(4));
        assert_eq!(l, list(&["a", "x", "b", "y"]));
        assert_eq!(insert(&mut l, true, b"zz", Bytes::from("q")), None);
    }

    #[test]
    fn test_positions() {
        let l = list(&["c", "a", "b", "a"]);
        assert_eq!(positions(&l, b"a", PosOptions::default()), vec![1]);

        let opts = PosOptions { rank: 2, ..Default::default() };
        assert_eq!(positions(&l, b"a", opts), vec![3]);

        let opts = PosOptions { rank: -1, ..Default::default() };
        assert_eq!(positions(&l, b"a", opts), vec![3]);

        let opts = PosOptions { count: 0, ..Default::default() };
        assert_eq!(positions(&l, b"a", opts), vec![1, 3]);

        let opts = PosOptions { max_len: 1, ..Default::default() };
        assert!(positions(&l, b"a", opts).is_empty());
    }
}
