//! Storage Module
//!
//! The key table and everything that walks it: sharded storage with lock
//! views, expiration (lazy and background), glob patterns and scan cursors.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲                                    ▲
//!          │                                    │
//!   ┌──────┴───────┐                ┌───────────┴───────────┐
//!   │   Keyspace   │                │     ExpirySweeper     │
//!   │ (lock view)  │                │ (Background Tokio Task)│
//!   └──────────────┘                └───────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use tidekv::storage::{StorageEngine, Ttl};
//! use tidekv::types::Value;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//! engine.set(
//!     Bytes::from("session"),
//!     Value::String(Bytes::from("token123")),
//!     Some(Duration::from_secs(3600)),
//! );
//! assert!(matches!(engine.ttl(b"session"), Ttl::Remaining(_)));
//! ```

pub mod cursor;
pub mod engine;
pub mod expiry;
pub mod glob;

pub use cursor::ScanOptions;
pub use engine::{Entry, Keyspace, StorageEngine, StorageStats, NUM_SHARDS};
pub use expiry::{ExpiryConfig, ExpirySweeper, Ttl};
pub use glob::GlobPattern;
