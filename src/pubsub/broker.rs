//! Subscription registry and fan-out.

use super::PubSubMessage;
use crate::storage::GlobPattern;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifies one client of the engine.
pub type ClientId = u64;

/// One line of a (P)SUBSCRIBE / (P)UNSUBSCRIBE confirmation: the channel or
/// pattern (None when unsubscribing with nothing subscribed) and the
/// client's total subscription count afterwards.
pub type SubscriptionChange = (Option<Bytes>, usize);

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<PubSubMessage>,
    /// Kept in subscription order so "unsubscribe all" replies are stable
    channels: Vec<Bytes>,
    patterns: Vec<Bytes>,
}

impl Subscriber {
    fn count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    channels: HashMap<Bytes, HashSet<ClientId>>,
    patterns: HashMap<Bytes, (GlobPattern, HashSet<ClientId>)>,
    clients: HashMap<ClientId, Subscriber>,
}

impl BrokerState {
    fn subscriber(&mut self, client: ClientId, tx: &mpsc::Sender<PubSubMessage>) -> &mut Subscriber {
        self.clients.entry(client).or_insert_with(|| Subscriber {
            tx: tx.clone(),
            channels: Vec::new(),
            patterns: Vec::new(),
        })
    }

    fn remove_channel(&mut self, client: ClientId, channel: &Bytes) {
        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(&client);
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    fn remove_pattern(&mut self, client: ClientId, pattern: &Bytes) {
        if let Some((_, members)) = self.patterns.get_mut(pattern) {
            members.remove(&client);
            if members.is_empty() {
                self.patterns.remove(pattern);
            }
        }
    }

    /// Forgets a client that holds no subscription any more.
    fn release_if_idle(&mut self, client: ClientId) {
        if self.clients.get(&client).is_some_and(|s| s.count() == 0) {
            self.clients.remove(&client);
        }
    }
}

/// Counters exposed through INFO.
#[derive(Debug, Clone, Default)]
pub struct PubSubStats {
    pub channels: usize,
    pub patterns: usize,
    pub published: u64,
    pub dropped: u64,
}

/// The channel registry shared by every client.
#[derive(Debug, Default)]
pub struct PubSubBroker {
    state: RwLock<BrokerState>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl PubSubBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// SUBSCRIBE: idempotent per channel.
    pub fn subscribe(
        &self,
        client: ClientId,
        tx: &mpsc::Sender<PubSubMessage>,
        channels: &[Bytes],
    ) -> Vec<SubscriptionChange> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut changes = Vec::with_capacity(channels.len());
        for channel in channels {
            let sub = state.subscriber(client, tx);
            let added = !sub.channels.contains(channel);
            if added {
                sub.channels.push(channel.clone());
            }
            let count = sub.count();
            if added {
                state.channels.entry(channel.clone()).or_default().insert(client);
            }
            changes.push((Some(channel.clone()), count));
        }
        debug!(client, count = channels.len(), "Client subscribed");
        changes
    }

    /// UNSUBSCRIBE: the given channels, or all of them when none are given.
    pub fn unsubscribe(&self, client: ClientId, channels: &[Bytes]) -> Vec<SubscriptionChange> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let targets: Vec<Bytes> = if channels.is_empty() {
            state
                .clients
                .get(&client)
                .map(|s| s.channels.clone())
                .unwrap_or_default()
        } else {
            channels.to_vec()
        };

        let mut changes = Vec::with_capacity(targets.len().max(1));
        for channel in targets {
            let count = match state.clients.get_mut(&client) {
                Some(sub) => {
                    sub.channels.retain(|c| *c != channel);
                    sub.count()
                }
                None => 0,
            };
            state.remove_channel(client, &channel);
            changes.push((Some(channel), count));
        }
        if changes.is_empty() {
            changes.push((None, self.count_locked(&state, client)));
        }
        state.release_if_idle(client);
        changes
    }

    /// PSUBSCRIBE: idempotent per pattern.
    pub fn psubscribe(
        &self,
        client: ClientId,
        tx: &mpsc::Sender<PubSubMessage>,
        patterns: &[Bytes],
    ) -> Vec<SubscriptionChange> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut changes = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let sub = state.subscriber(client, tx);
            let added = !sub.patterns.contains(pattern);
            if added {
                sub.patterns.push(pattern.clone());
            }
            let count = sub.count();
            if added {
                state
                    .patterns
                    .entry(pattern.clone())
                    .or_insert_with(|| (GlobPattern::new(pattern), HashSet::new()))
                    .1
                    .insert(client);
            }
            changes.push((Some(pattern.clone()), count));
        }
        changes
    }

    /// PUNSUBSCRIBE: the given patterns, or all of them when none are given.
    pub fn punsubscribe(&self, client: ClientId, patterns: &[Bytes]) -> Vec<SubscriptionChange> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let targets: Vec<Bytes> = if patterns.is_empty() {
            state
                .clients
                .get(&client)
                .map(|s| s.patterns.clone())
                .unwrap_or_default()
        } else {
            patterns.to_vec()
        };

        let mut changes = Vec::with_capacity(targets.len().max(1));
        for pattern in targets {
            let count = match state.clients.get_mut(&client) {
                Some(sub) => {
                    sub.patterns.retain(|p| *p != pattern);
                    sub.count()
                }
                None => 0,
            };
            state.remove_pattern(client, &pattern);
            changes.push((Some(pattern), count));
        }
        if changes.is_empty() {
            changes.push((None, self.count_locked(&state, client)));
        }
        state.release_if_idle(client);
        changes
    }

    fn count_locked(&self, state: &BrokerState, client: ClientId) -> usize {
        state.clients.get(&client).map_or(0, Subscriber::count)
    }

    /// Number of channels and patterns `client` is subscribed to.
    pub fn subscription_count(&self, client: ClientId) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        self.count_locked(&state, client)
    }

    /// PUBLISH: delivers to every current subscriber of `channel`, directly
    /// or through a matching pattern, and returns how many accepted it.
    pub fn publish(&self, channel: &Bytes, payload: &Bytes) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let mut deliver = |client: ClientId, message: PubSubMessage| {
                let Some(sub) = state.clients.get(&client) else {
                    return;
                };
                match sub.tx.try_send(message) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(client, "Subscriber queue full, dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(client),
                }
            };

            if let Some(members) = state.channels.get(channel) {
                for &client in members {
                    deliver(
                        client,
                        PubSubMessage::Message {
                            channel: channel.clone(),
                            payload: payload.clone(),
                        },
                    );
                }
            }

            for (pattern, (glob, members)) in &state.patterns {
                if !glob.matches(channel) {
                    continue;
                }
                for &client in members {
                    deliver(
                        client,
                        PubSubMessage::PMessage {
                            pattern: pattern.clone(),
                            channel: channel.clone(),
                            payload: payload.clone(),
                        },
                    );
                }
            }
        }

        for client in closed {
            debug!(client, "Dropping subscriber with closed queue");
            self.disconnect(client);
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    /// PUBSUB CHANNELS: channels with at least one subscriber.
    pub fn channels(&self, pattern: Option<&GlobPattern>) -> Vec<Bytes> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<Bytes> = state
            .channels
            .keys()
            .filter(|c| pattern.map_or(true, |p| p.matches(c)))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// PUBSUB NUMSUB: direct subscriber count per channel.
    pub fn numsub(&self, channels: &[Bytes]) -> Vec<(Bytes, usize)> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .iter()
            .map(|c| (c.clone(), state.channels.get(c).map_or(0, HashSet::len)))
            .collect()
    }

    /// PUBSUB NUMPAT: number of distinct patterns with a subscriber.
    pub fn numpat(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).patterns.len()
    }

    /// Removes every subscription of a client.
    pub fn disconnect(&self, client: ClientId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(sub) = state.clients.remove(&client) else {
            return;
        };
        for channel in &sub.channels {
            state.remove_channel(client, channel);
        }
        for pattern in &sub.patterns {
            state.remove_pattern(client, pattern);
        }
        debug!(client, "Subscriber disconnected");
    }

    pub fn stats(&self) -> PubSubStats {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        PubSubStats {
            channels: state.channels.len(),
            patterns: state.patterns.len(),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_publish_counts_subscribers() {
        let broker = PubSubBroker::new();
        let (tx1, mut rx1) = mpsc::channel(16);
        let (tx2, mut rx2) = mpsc::channel(16);

        assert_eq!(broker.publish(&b("news"), &b("nobody")), 0);

        broker.subscribe(1, &tx1, &[b("news")]);
        broker.subscribe(2, &tx2, &[b("news"), b("sports")]);
        assert_eq!(broker.publish(&b("news"), &b("hello")), 2);
        assert_eq!(broker.publish(&b("sports"), &b("goal")), 1);

        assert_eq!(rx1.try_recv().unwrap().payload(), &b("hello"));
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap().payload(), &b("hello"));
        assert_eq!(rx2.try_recv().unwrap().channel(), &b("sports"));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let broker = PubSubBroker::new();
        let (tx, _rx) = mpsc::channel(16);

        let changes = broker.subscribe(7, &tx, &[b("a"), b("a"), b("b")]);
        let counts: Vec<usize> = changes.iter().map(|(_, n)| *n).collect();
        assert_eq!(counts, vec![1, 1, 2]);
        assert_eq!(broker.publish(&b("a"), &b("x")), 1);
    }

    #[test]
    fn test_unsubscribe_all() {
        let broker = PubSubBroker::new();
        let (tx, _rx) = mpsc::channel(16);
        broker.subscribe(1, &tx, &[b("a"), b("b")]);

        let changes = broker.unsubscribe(1, &[]);
        assert_eq!(changes, vec![(Some(b("a")), 1), (Some(b("b")), 0)]);
        assert_eq!(broker.unsubscribe(1, &[]), vec![(None, 0)]);
        assert_eq!(broker.publish(&b("a"), &b("x")), 0);
        assert!(broker.channels(None).is_empty());
    }

    #[test]
    fn test_pattern_delivery() {
        let broker = PubSubBroker::new();
        let (tx, mut rx) = mpsc::channel(16);
        broker.psubscribe(1, &tx, &[b("news.*")]);

        assert_eq!(broker.publish(&b("news.tech"), &b("rust")), 1);
        assert_eq!(broker.publish(&b("weather"), &b("rain")), 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            PubSubMessage::PMessage {
                pattern: b("news.*"),
                channel: b("news.tech"),
                payload: b("rust"),
            }
        );
        assert_eq!(broker.numpat(), 1);
        broker.punsubscribe(1, &[]);
        assert_eq!(broker.numpat(), 0);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let broker = PubSubBroker::new();
        let (tx, mut rx) = mpsc::channel(2);
        broker.subscribe(1, &tx, &[b("c")]);

        assert_eq!(broker.publish(&b("c"), &b("1")), 1);
        assert_eq!(broker.publish(&b("c"), &b("2")), 1);
        assert_eq!(broker.publish(&b("c"), &b("3")), 0);
        assert_eq!(broker.stats().dropped, 1);

        // Order of what was queued is preserved
        assert_eq!(rx.try_recv().unwrap().payload(), &b("1"));
        assert_eq!(rx.try_recv().unwrap().payload(), &b("2"));
    }

    #[test]
    fn test_closed_queue_is_removed() {
        let broker = PubSubBroker::new();
        let (tx, rx) = mpsc::channel(2);
        broker.subscribe(1, &tx, &[b("c")]);
        drop(rx);

        assert_eq!(broker.publish(&b("c"), &b("x")), 0);
        assert_eq!(broker.subscription_count(1), 0);
        assert!(broker.numsub(&[b("c")]).iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn test_pubsub_introspection() {
        let broker = PubSubBroker::new();
        let (tx, _rx) = mpsc::channel(16);
        broker.subscribe(1, &tx, &[b("news.tech"), b("sports")]);
        broker.subscribe(2, &tx, &[b("news.tech")]);

        assert_eq!(broker.channels(None), vec![b("news.tech"), b("sports")]);
        assert_eq!(
            broker.channels(Some(&GlobPattern::new("news.*"))),
            vec![b("news.tech")]
        );
        assert_eq!(
            broker.numsub(&[b("news.tech"), b("missing")]),
            vec![(b("news.tech"), 2), (b("missing"), 0)]
        );

        broker.disconnect(1);
        assert_eq!(broker.numsub(&[b("sports")]), vec![(b("sports"), 0)]);
    }
}
