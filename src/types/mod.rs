//! Value Types
//!
//! Every key in the keyspace holds exactly one [`Value`]. The submodules
//! implement the pure data operations of each variant; they know nothing
//! about locking, expiry or replies.
//!
//! ```text
//! Value
//!  ├── String      (bytes; also bitmaps and HyperLogLog sketches)
//!  ├── List        (VecDeque, O(1) push/pop at both ends)
//!  ├── Hash        (field -> value)
//!  ├── Set         (unique members)
//!  ├── SortedSet   (member -> score, plus a score-ordered index)
//!  └── Stream      (append-only log keyed by StreamId)
//! ```

pub mod hash;
pub mod hyperloglog;
pub mod list;
pub mod set;
pub mod string;
pub mod stream;
pub mod zset;

use crate::error::CommandError;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};

pub use stream::{Stream, StreamId};
pub use zset::SortedSet;

/// A value stored under a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    Set(HashSet<Bytes>),
    SortedSet(SortedSet),
    Stream(Stream),
}

macro_rules! accessors {
    ($( $variant:ident => $as_ref:ident, $as_mut:ident, $ty:ty );* $(;)?) => {
        $(
            pub fn $as_ref(&self) -> Result<&$ty, CommandError> {
                match self {
                    Value::$variant(inner) => Ok(inner),
                    _ => Err(CommandError::WrongType),
                }
            }

            pub fn $as_mut(&mut self) -> Result<&mut $ty, CommandError> {
                match self {
                    Value::$variant(inner) => Ok(inner),
                    _ => Err(CommandError::WrongType),
                }
            }
        )*
    };
}

impl Value {
    /// The type tag reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
            Value::Stream(_) => "stream",
        }
    }

    /// Empty containers for each collection type.
    pub fn empty_list() -> Self {
        Value::List(VecDeque::new())
    }

    pub fn empty_hash() -> Self {
        Value::Hash(HashMap::new())
    }

    pub fn empty_set() -> Self {
        Value::Set(HashSet::new())
    }

    pub fn empty_zset() -> Self {
        Value::SortedSet(SortedSet::new())
    }

    pub fn empty_stream() -> Self {
        Value::Stream(Stream::new())
    }

    /// Returns true for a collection that no longer holds any element.
    ///
    /// Streams are kept when empty, strings are never "empty" in this sense.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::List(l) => l.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::SortedSet(z) => z.is_empty(),
            Value::String(_) | Value::Stream(_) => false,
        }
    }

    accessors! {
        String => as_string, as_string_mut, Bytes;
        List => as_list, as_list_mut, VecDeque<Bytes>;
        Hash => as_hash, as_hash_mut, HashMap<Bytes, Bytes>;
        Set => as_set, as_set_mut, HashSet<Bytes>;
        SortedSet => as_zset, as_zset_mut, SortedSet;
        Stream => as_stream, as_stream_mut, Stream;
    }
}
