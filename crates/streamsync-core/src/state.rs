use crate::{
    buffer::Buffer,
    config::{Config, SyncPolicy},
    error::SyncError,
    liveness::LivenessMonitor,
    types::{Key, StreamMessage, SyncStats, SyncStatus, SyncedBundle, WithSequence},
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use itertools::Itertools;
use std::time::Instant;
use tracing::debug;

/// The internal state maintained by the [SyncManager](crate::SyncManager).
///
/// The synchronizer is not thread-safe by itself. The manager holds it
/// behind a mutex so that pushing a message, evaluating readiness and
/// enqueueing the resulting bundle form one critical section.
#[derive(Debug)]
pub struct Synchronizer<K, T>
where
    K: Key,
    T: WithSequence,
{
    /// A list of buffers indexed by stream key, in registration order.
    buffers: IndexMap<K, Buffer<K, T>>,

    /// The bundling rule.
    policy: SyncPolicy,

    /// Arrival counter assigned to the next accepted message.
    next_arrival: u64,

    /// Highest sequence key emitted so far under [SyncPolicy::SeqSync].
    commit_seq: Option<T::Seq>,

    stats: SyncStats,

    last_emitted_at: Option<DateTime<Utc>>,

    /// Optional stall detector.
    liveness: Option<LivenessMonitor<K>>,
}

impl<K, T> Synchronizer<K, T>
where
    K: Key,
    T: WithSequence,
{
    /// Initialize buffers for the registered streams.
    ///
    /// Registering the same stream twice or registering no stream at
    /// all is an error.
    pub fn new<I>(keys: I, config: &Config) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = K>,
    {
        let keys: Vec<K> = keys.into_iter().collect();

        if keys.is_empty() {
            return Err(SyncError::NoStreams);
        }

        if let Some(dup) = keys.iter().duplicates().next() {
            return Err(SyncError::DuplicateStream {
                stream: dup.to_string(),
            });
        }

        let buffers: IndexMap<_, _> = keys
            .iter()
            .map(|key| {
                let buffer = match config.buffer_capacity {
                    Some(cap) => Buffer::with_capacity(cap, config.drop_policy),
                    None => Buffer::unbounded(),
                };
                (key.clone(), buffer)
            })
            .collect();

        let liveness = config
            .liveness
            .map(|liveness| LivenessMonitor::new(keys, liveness, Instant::now()));

        Ok(Self {
            buffers,
            policy: config.policy,
            next_arrival: 0,
            commit_seq: None,
            stats: SyncStats::default(),
            last_emitted_at: None,
            liveness,
        })
    }

    /// Insert a message into the buffer identified by the key and form
    /// a bundle if the message completes one.
    pub fn push(&mut self, key: K, item: T) -> Result<Option<SyncedBundle<K, T>>, SyncError> {
        let Some(buffer) = self.buffers.get_mut(&key) else {
            self.stats.messages_rejected += 1;
            debug!(stream = %key, "reject message for unregistered stream");
            return Err(SyncError::UnregisteredStream {
                stream: key.to_string(),
            });
        };

        let seq = item.sequence();

        if self.policy == SyncPolicy::SeqSync
            && let Some(commit_seq) = &self.commit_seq
            && seq <= *commit_seq
        {
            self.stats.messages_rejected += 1;
            debug!(
                stream = %key,
                sequence = ?seq,
                committed = ?commit_seq,
                "reject late message"
            );
            return Err(SyncError::LateMessage {
                stream: key.to_string(),
                sequence: format!("{seq:?}"),
                committed: format!("{commit_seq:?}"),
            });
        }

        let msg = StreamMessage::new(key.clone(), self.next_arrival, item);

        match buffer.push(msg) {
            Ok(evicted) => {
                if let Some(evicted) = evicted {
                    self.stats.messages_evicted += 1;
                    debug!(
                        stream = %key,
                        sequence = ?evicted.sequence(),
                        "evict oldest message from full buffer"
                    );
                }
            }
            Err(rejected) => {
                self.stats.messages_rejected += 1;
                debug!(
                    stream = %key,
                    sequence = ?rejected.sequence(),
                    "reject message, buffer is full"
                );
                return Err(SyncError::BufferFull {
                    stream: key.to_string(),
                });
            }
        }

        self.next_arrival += 1;
        self.stats.messages_received += 1;

        if let Some(liveness) = &mut self.liveness {
            liveness.record(&key, Instant::now());
        }

        let bundle = match self.policy {
            SyncPolicy::NoSync => self.try_take_latest(),
            SyncPolicy::SeqSync => self.try_take_sequence(&seq),
        };

        if bundle.is_some() {
            self.stats.bundles_emitted += 1;
            self.last_emitted_at = Some(Utc::now());
        }

        Ok(bundle)
    }

    /// Keep-latest policy: once every stream has a pending message, take
    /// the newest of each and discard the rest.
    fn try_take_latest(&mut self) -> Option<SyncedBundle<K, T>> {
        if !self.is_ready() {
            return None;
        }

        let mut pruned = 0;
        let messages: IndexMap<_, _> = self
            .buffers
            .iter_mut()
            .filter_map(|(key, buffer)| {
                let (latest, dropped) = buffer.take_latest()?;
                pruned += dropped;
                Some((key.clone(), latest))
            })
            .collect();

        self.stats.messages_pruned += pruned as u64;
        debug!(pruned, "emit latest bundle");

        Some(SyncedBundle::new(messages))
    }

    /// Sequence-key policy: the message just pushed can only complete
    /// the group of its own key, so only that key is checked.
    fn try_take_sequence(&mut self, seq: &T::Seq) -> Option<SyncedBundle<K, T>> {
        let complete = self
            .buffers
            .values()
            .all(|buffer| buffer.contains_sequence(seq));
        if !complete {
            return None;
        }

        let messages: IndexMap<_, _> = self
            .buffers
            .iter_mut()
            .filter_map(|(key, buffer)| {
                let msg = buffer.take_sequence(seq)?;
                Some((key.clone(), msg))
            })
            .collect();

        let pruned: usize = self
            .buffers
            .values_mut()
            .map(|buffer| buffer.drop_through(seq))
            .sum();

        self.stats.messages_pruned += pruned as u64;
        self.commit_seq = Some(seq.clone());
        debug!(sequence = ?seq, pruned, "emit sequence bundle");

        Some(SyncedBundle::new(messages))
    }

    /// Checks if every buffer holds at least one message.
    pub fn is_ready(&self) -> bool {
        self.buffers.values().all(|buffer| !buffer.is_empty())
    }

    /// Number of streams with at least one pending message.
    pub fn ready_count(&self) -> usize {
        self.buffers
            .values()
            .filter(|buffer| !buffer.is_empty())
            .count()
    }

    pub fn stream_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn contains_stream(&self, key: &K) -> bool {
        self.buffers.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.buffers.keys()
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Number of pending messages for a stream, or None if the stream is
    /// not registered.
    pub fn pending(&self, key: &K) -> Option<usize> {
        self.buffers.get(key).map(Buffer::len)
    }

    pub fn commit_sequence(&self) -> Option<&T::Seq> {
        self.commit_seq.as_ref()
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Account for a bundle that the delivery queue refused.
    pub fn record_dropped_bundle(&mut self) {
        self.stats.bundles_dropped += 1;
    }

    /// Re-evaluate stream liveness and return the streams that are
    /// currently stalled. Always empty when liveness is not configured.
    pub fn check_liveness(&mut self, now: Instant) -> Vec<K> {
        let Some(liveness) = &mut self.liveness else {
            return vec![];
        };

        let buffers = &self.buffers;
        liveness.check(now, |key| {
            buffers.get(key).is_some_and(|buffer| !buffer.is_empty())
        });
        liveness.stalled()
    }

    /// Build a status snapshot.
    pub fn status(&self, queue_len: usize, closed: bool) -> SyncStatus<K> {
        let pending = self
            .buffers
            .iter()
            .map(|(key, buffer)| (key.clone(), buffer.len()))
            .collect();

        let accepted_keys = self
            .buffers
            .iter()
            .filter(|&(_key, buffer)| buffer.has_room())
            .map(|(key, _buffer)| key.clone())
            .collect();

        let stalled = self
            .liveness
            .as_ref()
            .map(LivenessMonitor::stalled)
            .unwrap_or_default();

        SyncStatus {
            pending,
            accepted_keys,
            stalled,
            bundles_emitted: self.stats.bundles_emitted,
            last_emitted_at: self.last_emitted_at,
            queue_len,
            closed,
        }
    }
}
