//! Key Expiration
//!
//! Expiry happens two ways:
//!
//! - **Lazy**: every [`Keyspace`] access drops an expired entry before
//!   reading it, so an expired key is never observable.
//! - **Active**: the [`ExpirySweeper`] periodically reclaims expired entries
//!   nobody touches again, which would otherwise sit in memory forever.
//!
//! ## Adaptive Frequency
//!
//! If many keys are expiring, the sweeper runs more frequently.
//! If few keys are expiring, it backs off to save CPU.

use super::engine::{Keyspace, StorageEngine};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Time-to-live state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist
    Missing,
    /// The key exists without a TTL
    Persistent,
    /// The key expires after this long
    Remaining(Duration),
}

impl Ttl {
    /// TTL reply in seconds, rounded to the nearest second (-2 / -1 sentinels).
    pub fn as_secs(&self) -> i64 {
        match self {
            Ttl::Missing => -2,
            Ttl::Persistent => -1,
            Ttl::Remaining(d) => ((d.as_millis() + 500) / 1000) as i64,
        }
    }

    /// PTTL reply in milliseconds (-2 / -1 sentinels).
    pub fn as_millis(&self) -> i64 {
        match self {
            Ttl::Missing => -2,
            Ttl::Persistent => -1,
            Ttl::Remaining(d) => d.as_millis() as i64,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Converts an absolute Unix time into a monotonic deadline.
///
/// Returns `None` if that time is already in the past.
pub fn deadline_from_unix_ms(at_ms: u64) -> Option<Instant> {
    let now_ms = unix_time_ms();
    if at_ms <= now_ms {
        return None;
    }
    Instant::now().checked_add(Duration::from_millis(at_ms - now_ms))
}

impl Keyspace<'_> {
    pub fn ttl(&mut self, key: &[u8]) -> Ttl {
        match self.get(key) {
            None => Ttl::Missing,
            Some(entry) => entry.ttl().map_or(Ttl::Persistent, Ttl::Remaining),
        }
    }

    /// Sets an absolute deadline on an existing key.
    ///
    /// A deadline that is `None` (already past) deletes the key. Returns
    /// false if the key does not exist.
    pub fn expire_at(&mut self, key: &[u8], deadline: Option<Instant>) -> bool {
        match deadline {
            Some(at) if at > Instant::now() => match self.entry_mut(key) {
                Some(entry) => {
                    entry.expires_at = Some(at);
                    true
                }
                None => false,
            },
            _ => self.remove(key).is_some(),
        }
    }

    /// Sets a relative TTL on an existing key.
    pub fn expire(&mut self, key: &[u8], ttl: Duration) -> bool {
        self.expire_at(key, Instant::now().checked_add(ttl))
    }

    /// Removes the TTL. Returns true only if a TTL was actually removed.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        let has_ttl = matches!(self.ttl(key), Ttl::Remaining(_));
        if has_ttl {
            if let Some(entry) = self.entry_mut(key) {
                entry.expires_at = None;
            }
        }
        has_ttl
    }
}

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Base interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 1s)
    pub max_interval: Duration,

    /// If this fraction of stored keys expired in one sweep, speed up
    pub speedup_threshold: f64,

    /// If this fraction of stored keys expired in one sweep, slow down
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the sweeper as a background task. Must be called from within
    /// a Tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Next interval given how much of the keyspace one sweep reclaimed.
fn next_interval(current: Duration, keys_before: usize, expired: u64, config: &ExpiryConfig) -> Duration {
    if keys_before == 0 {
        return current;
    }
    let expiry_rate = expired as f64 / keys_before as f64;

    if expiry_rate > config.speedup_threshold {
        (current / 2).max(config.min_interval)
    } else if expiry_rate < config.slowdown_threshold && expired == 0 {
        (current * 2).min(config.max_interval)
    } else {
        current
    }
}

async fn sweeper_loop(engine: Arc<StorageEngine>, config: ExpiryConfig, mut shutdown_rx: watch::Receiver<bool>) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = engine.len();
        let expired = engine.cleanup_expired();

        let next = next_interval(current_interval, keys_before, expired, &config);
        if next < current_interval {
            debug!(
                expired,
                new_interval_ms = next.as_millis() as u64,
                "High expiry rate, speeding up sweeper"
            );
        } else if next > current_interval {
            trace!(new_interval_ms = next.as_millis() as u64, "Low expiry rate, slowing down sweeper");
        }
        current_interval = next;

        if expired > 0 {
            debug!(expired, keys_remaining = engine.len(), "Expired keys cleaned up");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use bytes::Bytes;

    fn string(s: &str) -> Value {
        Value::String(Bytes::from(s.to_string()))
    }

    #[test]
    fn test_ttl_states() {
        let engine = StorageEngine::new();
        assert_eq!(engine.ttl(b"missing"), Ttl::Missing);
        assert_eq!(engine.ttl(b"missing").as_secs(), -2);

        engine.set(Bytes::from("plain"), string("v"), None);
        assert_eq!(engine.ttl(b"plain").as_secs(), -1);

        engine.set(Bytes::from("timed"), string("v"), Some(Duration::from_secs(100)));
        assert_eq!(engine.ttl(b"timed").as_secs(), 100);
        assert!(engine.ttl(b"timed").as_millis() > 99_000);
    }

    #[test]
    fn test_expire_and_persist() {
        let engine = StorageEngine::new();
        assert!(!engine.expire(b"missing", Duration::from_secs(10)));

        engine.set(Bytes::from("k"), string("v"), None);
        assert!(!engine.persist(b"k"));
        assert!(engine.expire(b"k", Duration::from_secs(10)));
        assert!(engine.persist(b"k"));
        assert_eq!(engine.ttl(b"k"), Ttl::Persistent);
    }

    #[test]
    fn test_past_deadline_deletes() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("k"), string("v"), None);
        let mut view = engine.lock([b"k".as_slice()]);
        assert!(view.expire_at(b"k", deadline_from_unix_ms(1)));
        assert!(!view.contains(b"k"));
    }

    #[test]
    fn test_deadline_from_unix_ms() {
        assert!(deadline_from_unix_ms(0).is_none());
        let deadline = deadline_from_unix_ms(unix_time_ms() + 60_000);
        assert!(deadline.is_some_and(|d| d > Instant::now()));
    }

    #[test]
    fn test_next_interval_adapts() {
        let config = ExpiryConfig::default();
        let base = config.base_interval;
        assert_eq!(next_interval(base, 100, 50, &config), base / 2);
        assert_eq!(next_interval(base, 100, 0, &config), base * 2);
        assert_eq!(next_interval(base, 100, 5, &config), base);
        assert_eq!(next_interval(base, 0, 0, &config), base);
        assert_eq!(
            next_interval(config.max_interval, 100, 0, &config),
            config.max_interval
        );
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let engine = Arc::new(StorageEngine::new());

        for i in 0..10 {
            engine.set(
                Bytes::from(format!("key{}", i)),
                string("value"),
                Some(Duration::from_millis(50)),
            );
        }
        engine.set(Bytes::from("persistent"), string("value"), None);
        assert_eq!(engine.len(), 11);

        let config = ExpiryConfig {
            base_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let _sweeper = ExpirySweeper::start(Arc::clone(&engine), config);

        tokio::time::sleep(Duration::from_millis(200)).await;

        // Physically reclaimed without any access
        assert_eq!(engine.len(), 1);
        assert!(engine.exists(b"persistent"));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let engine = Arc::new(StorageEngine::new());
        let config = ExpiryConfig {
            base_interval: Duration::from_millis(10),
            ..Default::default()
        };

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&engine), config);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        engine.set(Bytes::from("key"), string("value"), Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Not swept, but still invisible through lazy expiry
        assert_eq!(engine.len(), 1);
        assert!(engine.get(b"key").is_none());
    }
}
