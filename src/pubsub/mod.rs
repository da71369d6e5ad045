//! Publish/Subscribe
//!
//! Channels live outside the keyspace: publishing is not a key mutation
//! and never takes a shard lock.
//!
//! ```text
//!  PUBLISH news hi
//!        │
//!        ▼
//! ┌──────────────┐   channel "news"   ┌──────────┐
//! │ PubSubBroker │──────────────────> │ client 1 │  mpsc queue
//! │              │   pattern "n*"     ├──────────┤
//! │              │──────────────────> │ client 2 │  mpsc queue
//! └──────────────┘                    └──────────┘
//! ```
//!
//! Each client owns one bounded queue, so messages reach it in publish
//! order. A publisher never waits on a slow subscriber: when a queue is
//! full the message is dropped for that subscriber and counted.

pub mod broker;

pub use broker::{ClientId, PubSubBroker, PubSubStats, SubscriptionChange};

use crate::reply::Reply;
use bytes::Bytes;

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubMessage {
    /// Published to a channel the client subscribed to
    Message { channel: Bytes, payload: Bytes },
    /// Published to a channel matching one of the client's patterns
    PMessage {
        pattern: Bytes,
        channel: Bytes,
        payload: Bytes,
    },
}

impl PubSubMessage {
    pub fn channel(&self) -> &Bytes {
        match self {
            PubSubMessage::Message { channel, .. } | PubSubMessage::PMessage { channel, .. } => channel,
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            PubSubMessage::Message { payload, .. } | PubSubMessage::PMessage { payload, .. } => payload,
        }
    }

    /// The push reply a subscribed client receives.
    pub fn to_reply(&self) -> Reply {
        match self {
            PubSubMessage::Message { channel, payload } => Reply::array(vec![
                Reply::bulk("message"),
                Reply::Bulk(channel.clone()),
                Reply::Bulk(payload.clone()),
            ]),
            PubSubMessage::PMessage {
                pattern,
                channel,
                payload,
            } => Reply::array(vec![
                Reply::bulk("pmessage"),
                Reply::Bulk(pattern.clone()),
                Reply::Bulk(channel.clone()),
                Reply::Bulk(payload.clone()),
            ]),
        }
    }
}
