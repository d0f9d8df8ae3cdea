use crate::{config::LivenessConfig, types::Key};
use indexmap::IndexMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Liveness bookkeeping for a single stream.
#[derive(Debug, Clone)]
struct StreamLiveness {
    last_seen: Option<Instant>,
    stalled: bool,
}

/// Tracks when each registered stream last produced a message and
/// reports streams that have gone silent.
///
/// A stream is stalled when nothing of it is pending, some other stream
/// has pending data waiting on it, and it has not produced anything for
/// longer than the configured timeout. An idle system where every buffer
/// is empty has no stalls. A stall is logged once when it begins and
/// once when the stream recovers.
#[derive(Debug)]
pub struct LivenessMonitor<K>
where
    K: Key,
{
    streams: IndexMap<K, StreamLiveness>,
    stall_timeout: Duration,
    started_at: Instant,
}

impl<K> LivenessMonitor<K>
where
    K: Key,
{
    pub fn new<I>(keys: I, config: LivenessConfig, now: Instant) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        let streams = keys
            .into_iter()
            .map(|key| {
                let entry = StreamLiveness {
                    last_seen: None,
                    stalled: false,
                };
                (key, entry)
            })
            .collect();

        Self {
            streams,
            stall_timeout: config.stall_timeout,
            started_at: now,
        }
    }

    pub fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    /// Record a message arrival on `key`.
    pub fn record(&mut self, key: &K, now: Instant) {
        let Some(entry) = self.streams.get_mut(key) else {
            return;
        };

        entry.last_seen = Some(now);

        if entry.stalled {
            entry.stalled = false;
            info!(stream = %key, "stream recovered from stall");
        }
    }

    /// Re-evaluate every stream and return the keys that became stalled
    /// during this check.
    ///
    /// `is_pending` tells whether the stream still has buffered
    /// messages. A stream with pending data is never stalled, and a
    /// silent stream is only stalled while another stream waits on it.
    pub fn check<F>(&mut self, now: Instant, is_pending: F) -> Vec<K>
    where
        F: Fn(&K) -> bool,
    {
        let pending: Vec<bool> = self.streams.keys().map(&is_pending).collect();
        let waiting = pending.iter().filter(|pending| **pending).count();
        let mut newly_stalled = Vec::new();

        for ((key, entry), &pending) in self.streams.iter_mut().zip(&pending) {
            // Nothing is blocked on this stream unless another one holds data.
            if pending || waiting == 0 {
                entry.stalled = false;
                continue;
            }

            let since = entry.last_seen.unwrap_or(self.started_at);
            let silence = now.saturating_duration_since(since);

            if silence >= self.stall_timeout && !entry.stalled {
                entry.stalled = true;
                warn!(
                    stream = %key,
                    silence = ?silence,
                    ever_seen = entry.last_seen.is_some(),
                    "stream stalled, no bundle can be emitted until it produces"
                );
                newly_stalled.push(key.clone());
            }
        }

        newly_stalled
    }

    /// Streams flagged by the most recent [check](Self::check).
    pub fn stalled(&self) -> Vec<K> {
        self.streams
            .iter()
            .filter(|(_, entry)| entry.stalled)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn last_seen(&self, key: &K) -> Option<Instant> {
        self.streams.get(key)?.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(timeout_ms: u64, now: Instant) -> LivenessMonitor<&'static str> {
        let config = LivenessConfig {
            stall_timeout: Duration::from_millis(timeout_ms),
        };
        LivenessMonitor::new(["color", "depth"], config, now)
    }

    #[test]
    fn test_no_stall_before_timeout() {
        let t0 = Instant::now();
        let mut monitor = monitor(100, t0);

        let stalled = monitor.check(t0 + Duration::from_millis(50), |_| false);
        assert!(stalled.is_empty());
        assert!(monitor.stalled().is_empty());
    }

    #[test]
    fn test_never_seen_stream_stalls_after_timeout() {
        let t0 = Instant::now();
        let mut monitor = monitor(100, t0);

        monitor.record(&"color", t0 + Duration::from_millis(90));
        let stalled = monitor.check(t0 + Duration::from_millis(120), |key| *key == "color");

        assert_eq!(stalled, vec!["depth"]);
        assert_eq!(monitor.stalled(), vec!["depth"]);
        assert_eq!(monitor.last_seen(&"depth"), None);
    }

    #[test]
    fn test_stall_reported_once() {
        let t0 = Instant::now();
        let mut monitor = monitor(100, t0);
        monitor.record(&"color", t0);

        let first = monitor.check(t0 + Duration::from_millis(150), |key| *key == "color");
        assert_eq!(first, vec!["depth"]);

        let second = monitor.check(t0 + Duration::from_millis(300), |key| *key == "color");
        assert!(second.is_empty());
        assert_eq!(monitor.stalled(), vec!["depth"]);
    }

    #[test]
    fn test_pending_stream_is_not_stalled() {
        let t0 = Instant::now();
        let mut monitor = monitor(100, t0);

        monitor.record(&"color", t0);
        let stalled = monitor.check(t0 + Duration::from_secs(1), |key| *key == "color");
        assert_eq!(stalled, vec!["depth"]);
    }

    #[test]
    fn test_no_stall_when_nothing_is_waiting() {
        let t0 = Instant::now();
        let mut monitor = monitor(100, t0);

        monitor.record(&"color", t0);
        monitor.record(&"depth", t0);

        let stalled = monitor.check(t0 + Duration::from_secs(1), |_| false);
        assert!(stalled.is_empty());
        assert!(monitor.stalled().is_empty());
    }

    #[test]
    fn test_stall_cleared_once_nothing_waits() {
        let t0 = Instant::now();
        let mut monitor = monitor(100, t0);
        monitor.record(&"color", t0);

        monitor.check(t0 + Duration::from_millis(150), |key| *key == "color");
        assert_eq!(monitor.stalled(), vec!["depth"]);

        // color's pending data went away, so depth no longer blocks anything.
        let stalled = monitor.check(t0 + Duration::from_millis(200), |_| false);
        assert!(stalled.is_empty());
        assert!(monitor.stalled().is_empty());
    }

    #[test]
    fn test_recovery_clears_stall() {
        let t0 = Instant::now();
        let mut monitor = monitor(100, t0);
        monitor.record(&"color", t0);

        monitor.check(t0 + Duration::from_millis(150), |key| *key == "color");
        assert_eq!(monitor.stalled(), vec!["depth"]);

        let t1 = t0 + Duration::from_millis(160);
        monitor.record(&"depth", t1);
        assert!(monitor.stalled().is_empty());
        assert_eq!(monitor.last_seen(&"depth"), Some(t1));

        // The recovered stream stalls again only after another full timeout.
        let stalled = monitor.check(t1 + Duration::from_millis(50), |key| *key == "color");
        assert!(stalled.is_empty());
        let stalled = monitor.check(t1 + Duration::from_millis(100), |key| *key == "color");
        assert_eq!(stalled, vec!["depth"]);
    }

    #[test]
    fn test_record_unknown_stream_is_ignored() {
        let t0 = Instant::now();
        let mut monitor = monitor(100, t0);
        monitor.record(&"imu", t0);
        assert_eq!(monitor.last_seen(&"imu"), None);
    }
}
