//! # TideKV - An In-Memory Keyspace Engine
//!
//! TideKV is a Redis-compatible keyspace engine written in Rust. It keeps
//! typed values under byte-string keys, expires them, publishes messages
//! to subscribers and runs server-side scripts, all behind one command
//! interface that takes an argument vector and returns a [`Reply`].
//!
//! The engine has no network transport of its own. A driver (the bundled
//! shell, a test, or an embedding server) creates one [`CommandHandler`]
//! per client and feeds it commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Database                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────────────────┐  │
//! │  │  Command    │───>│  Command    │───>│        StorageEngine        │  │
//! │  │  Handler    │    │  Table      │    │ ┌───────┐┌───────┐┌───────┐ │  │
//! │  │ (per client)│    │             │    │ │Shard 0││Shard 1││...64  │ │  │
//! │  └──────┬──────┘    └─────────────┘    │ └───────┘└───────┘└───────┘ │  │
//! │         │                              └──────────────▲──────────────┘  │
//! │         │ subscribe                                   │                 │
//! │         ▼                                             │                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────┴──────────────┐  │
//! │  │ PubSub      │    │ ScriptCache │    │        ExpirySweeper        │  │
//! │  │ Broker      │    │ Functions   │    │   (Background Tokio Task)   │  │
//! │  └─────────────┘    └─────────────┘    └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use tidekv::{CommandHandler, Database, Reply};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! let db = Arc::new(Database::new());
//! let client = CommandHandler::new(Arc::clone(&db));
//!
//! let argv = |items: &[&str]| -> Vec<Bytes> {
//!     items.iter().map(|s| Bytes::from(s.to_string())).collect()
//! };
//! assert_eq!(client.execute(argv(&["SET", "greeting", "hello"])), Ok(Reply::ok()));
//! assert_eq!(client.execute(argv(&["GET", "greeting"])), Ok(Reply::bulk("hello")));
//! ```
//!
//! ## Supported Command Families
//!
//! - **Keys**: `DEL`, `EXISTS`, `EXPIRE` family, `TTL`/`PTTL`, `PERSIST`,
//!   `TYPE`, `RENAME`, `KEYS`, `RANDOMKEY`, `SCAN`
//! - **Strings**: `GET`/`SET` and friends, counters, `APPEND`, ranges
//! - **Bitmaps and HyperLogLog**: `SETBIT`, `GETBIT`, `BITCOUNT`, `BITOP`,
//!   `PFADD`, `PFCOUNT`, `PFMERGE`
//! - **Lists, hashes, sets, sorted sets, streams**, each with its scan
//!   command where one exists
//! - **Pub/Sub**: `PUBLISH`, `(P)SUBSCRIBE`, `(P)UNSUBSCRIBE`, `PUBSUB`
//! - **Scripting**: `EVAL`, `EVALSHA`, `SCRIPT`, `FUNCTION`, `FCALL` and
//!   their read-only variants
//! - **Server**: `PING`, `ECHO`, `TIME`, `INFO`, `DBSIZE`, `FLUSHDB`,
//!   `FLUSHALL`, `COMMAND`, `QUIT`
//!
//! ## Module Overview
//!
//! - [`storage`]: sharded key table, lock views, expiry, glob and cursors
//! - [`types`]: the value variants and their pure operations
//! - [`commands`]: the command table, handler and command families
//! - [`pubsub`]: channel and pattern subscriptions
//! - [`scripting`]: the Lua-subset interpreter, script cache and functions
//!
//! ## Design Highlights
//!
//! ### Atomic Commands
//!
//! A command locks the shards of every key it names, in ascending shard
//! order, before it reads anything. Keyspace-wide commands and scripts lock
//! all shards. Scripts additionally journal every key they touch and roll
//! back on error.
//!
//! ### Lazy + Active Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: an access through a lock view drops an expired entry
//! 2. **Active**: a background task periodically reclaims the rest

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod pubsub;
pub mod reply;
pub mod scripting;
pub mod storage;
pub mod types;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::EngineConfig;
pub use db::Database;
pub use error::{CommandError, CommandResult};
pub use pubsub::PubSubMessage;
pub use reply::Reply;
pub use storage::{ExpiryConfig, ExpirySweeper, StorageEngine};

/// Version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
