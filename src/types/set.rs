//! Set Values
//!
//! Unordered collections of unique members, plus the set algebra used by
//! SUNION/SINTER/SDIFF and the random sampling behind SPOP/SRANDMEMBER.

use bytes::Bytes;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use std::collections::HashSet;

/// Set algebra operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Inter,
    Diff,
}

/// Combines sets left to right. A missing key is passed as an empty set.
pub fn combine(op: SetOp, sets: &[Option<&HashSet<Bytes>>]) -> HashSet<Bytes> {
    let empty = HashSet::new();
    let mut iter = sets.iter().map(|s| s.unwrap_or(&empty));
    let first = match iter.next() {
        Some(first) => first.clone(),
        None => return HashSet::new(),
    };

    iter.fold(first, |acc, next| match op {
        SetOp::Union => acc.union(next).cloned().collect(),
        SetOp::Inter => acc.intersection(next).cloned().collect(),
        SetOp::Diff => acc.difference(next).cloned().collect(),
    })
}

/// Removes and returns up to `count` random members.
pub fn pop_random(set: &mut HashSet<Bytes>, count: usize) -> Vec<Bytes> {
    let mut rng = rand::thread_rng();
    let count = count.min(set.len());
    let picked: Vec<Bytes> = set.iter().cloned().choose_multiple(&mut rng, count);
    for member in &picked {
        set.remove(member);
    }
    picked
}

/// SRANDMEMBER with a count.
///
/// A positive count returns distinct members (at most the set size); a
/// negative count returns exactly `|count|` members, possibly repeated.
/// Callers bound the magnitude of a negative count.
pub fn random_members(set: &HashSet<Bytes>, count: i64) -> Vec<Bytes> {
    let mut rng = rand::thread_rng();
    if count >= 0 {
        let count = usize::try_from(count).unwrap_or(usize::MAX).min(set.len());
        let mut picked = set.iter().cloned().choose_multiple(&mut rng, count);
        picked.shuffle(&mut rng);
        return picked;
    }

    let members: Vec<&Bytes> = set.iter().collect();
    if members.is_empty() {
        return Vec::new();
    }
    let mut picked = Vec::new();
    for _ in 0..count.unsigned_abs() {
        picked.push(members[rng.gen_range(0..members.len())].clone());
    }
    picked
}

/// A single random member.
pub fn random_member(set: &HashSet<Bytes>) -> Option<Bytes> {
    set.iter().choose(&mut rand::thread_rng()).cloned()
}
