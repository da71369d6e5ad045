//! Command Execution
//!
//! This module turns an argument vector into a [`Reply`]. Each command
//! family lives in its own file; the [`table`] ties names to handlers.
//!
//! ## Architecture
//!
//! ```text
//! argv
//!   │
//!   ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  lookup, arity, subscribe-mode check
//! └────────┬────────┘
//!          │  lock the shards of every key (ascending order)
//!          ▼
//! ┌─────────────────┐
//! │  ExecContext    │  Database + locked Keyspace
//! └────────┬────────┘
//!          │
//!          ▼
//!   cmd_* function     (keys, strings, lists, ..., scripting)
//! ```
//!
//! A command never releases its locks before it returns, so other clients
//! observe either none or all of its effects.

mod args;
mod bitmaps;
mod handler;
mod hashes;
mod hll;
mod keys;
mod lists;
mod pubsub;
mod scan;
mod scripting;
mod server;
mod sets;
mod streams;
mod strings;
pub mod table;
mod zsets;

pub use handler::CommandHandler;

use crate::db::Database;
use crate::error::CommandResult;
use crate::reply::Reply;
use crate::storage::Keyspace;
use crate::types::string::format_f64;
use crate::types::Value;

/// Everything a command needs: the shared database and a locked view of
/// the keys it declared.
pub struct ExecContext<'c, 'k> {
    pub db: &'c Database,
    pub keyspace: &'c mut Keyspace<'k>,
}

impl<'c, 'k> ExecContext<'c, 'k> {
    pub fn new(db: &'c Database, keyspace: &'c mut Keyspace<'k>) -> Self {
        Self { db, keyspace }
    }

    /// The value under `key`, type-checked by `view`. Absent keys are `None`.
    pub fn read<T>(
        &mut self,
        key: &[u8],
        view: impl FnOnce(&Value) -> CommandResult<&T>,
    ) -> CommandResult<Option<&T>> {
        match self.keyspace.value(key) {
            Some(value) => view(value).map(Some),
            None => Ok(None),
        }
    }
}

/// A score as replies carry it.
pub(crate) fn score_reply(score: f64) -> Reply {
    Reply::bulk(format_f64(score))
}
