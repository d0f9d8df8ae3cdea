use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use indexmap::{Equivalent, IndexMap};
use std::{fmt, hash::Hash, ops::Index};
use tokio::sync::watch;

/// Extracts the source-assigned sequence key from a message passed to
/// the synchronizer.
pub trait WithSequence: Send {
    type Seq: Ord + Clone + fmt::Debug + Send;

    fn sequence(&self) -> Self::Seq;
}

/// The key that identifies a stream in the synchronizer.
pub trait Key: Clone + Eq + Hash + fmt::Debug + fmt::Display + Sync + Send {}

impl<K> Key for K where K: Clone + Eq + Hash + fmt::Debug + fmt::Display + Sync + Send {}

/// A collaborator that publishes a fixed set of named streams.
///
/// The names are collected once when the [SyncManager](crate::SyncManager)
/// is built. Streams cannot join afterwards.
pub trait Producer<K>
where
    K: Key,
{
    fn streams(&self) -> Vec<K>;
}

/// The final sink of synced bundles. It runs on whichever thread polls
/// the manager.
pub trait Consumer<K, T>
where
    T: WithSequence,
{
    fn consume(&mut self, bundle: SyncedBundle<K, T>);
}

impl<K, T, F> Consumer<K, T> for F
where
    T: WithSequence,
    F: FnMut(SyncedBundle<K, T>),
{
    fn consume(&mut self, bundle: SyncedBundle<K, T>) {
        self(bundle)
    }
}

/// A message accepted by the synchronizer, tagged with its stream and
/// the order in which it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage<K, T>
where
    T: WithSequence,
{
    stream: K,
    sequence: T::Seq,
    arrival_order: u64,
    payload: T,
}

impl<K, T> StreamMessage<K, T>
where
    T: WithSequence,
{
    pub(crate) fn new(stream: K, arrival_order: u64, payload: T) -> Self {
        Self {
            stream,
            sequence: payload.sequence(),
            arrival_order,
            payload,
        }
    }

    pub fn stream(&self) -> &K {
        &self.stream
    }

    pub fn sequence(&self) -> &T::Seq {
        &self.sequence
    }

    /// Position of this message in the global arrival order, counted
    /// across all streams starting from zero.
    pub fn arrival_order(&self) -> u64 {
        self.arrival_order
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// One message per registered stream, in registration order.
#[derive(Debug, Clone)]
pub struct SyncedBundle<K, T>
where
    T: WithSequence,
{
    messages: IndexMap<K, StreamMessage<K, T>>,
}

impl<K, T> SyncedBundle<K, T>
where
    K: Key,
    T: WithSequence,
{
    pub(crate) fn new(messages: IndexMap<K, StreamMessage<K, T>>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get<Q>(&self, stream: &Q) -> Option<&StreamMessage<K, T>>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.messages.get(stream)
    }

    /// Shortcut for the payload carried for `stream`.
    pub fn payload<Q>(&self, stream: &Q) -> Option<&T>
    where
        Q: ?Sized + Hash + Equivalent<K>,
    {
        self.get(stream).map(StreamMessage::payload)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.messages.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &StreamMessage<K, T>)> {
        self.messages.iter()
    }

    pub fn into_inner(self) -> IndexMap<K, StreamMessage<K, T>> {
        self.messages
    }

    /// Strips the message envelopes, keeping stream keys and payloads.
    pub fn into_payloads(self) -> IndexMap<K, T> {
        self.messages
            .into_iter()
            .map(|(key, msg)| (key, msg.into_payload()))
            .collect()
    }
}

impl<K, T, Q> Index<&Q> for SyncedBundle<K, T>
where
    K: Key,
    T: WithSequence,
    Q: ?Sized + Hash + Equivalent<K>,
{
    type Output = StreamMessage<K, T>;

    fn index(&self, stream: &Q) -> &Self::Output {
        &self.messages[stream]
    }
}

impl<K, T> IntoIterator for SyncedBundle<K, T>
where
    T: WithSequence,
{
    type Item = (K, StreamMessage<K, T>);
    type IntoIter = indexmap::map::IntoIter<K, StreamMessage<K, T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

/// Counters accumulated over the lifetime of a synchronizer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Messages accepted into a buffer.
    pub messages_received: u64,
    /// Messages refused at ingress: unregistered stream, late sequence
    /// or full buffer.
    pub messages_rejected: u64,
    /// Messages evicted from a capped buffer to make room.
    pub messages_evicted: u64,
    /// Older messages discarded when a bundle was formed.
    pub messages_pruned: u64,
    /// Bundles formed by the synchronizer.
    pub bundles_emitted: u64,
    /// Bundles that could not be enqueued and were reported as
    /// [QueueFull](crate::SyncError::QueueFull).
    pub bundles_dropped: u64,
    /// Queued bundles discarded under
    /// [OverflowPolicy::DropOldest](crate::OverflowPolicy::DropOldest).
    pub bundles_evicted: u64,
}

/// A snapshot of the synchronizer published after each ingress so that
/// producers can watch backlog and stalls.
#[derive(Debug, Clone)]
pub struct SyncStatus<K>
where
    K: Key,
{
    /// Pending message count per registered stream.
    pub pending: IndexMap<K, usize>,
    /// Streams whose buffers can take more messages without eviction
    /// or rejection.
    pub accepted_keys: Vec<K>,
    /// Streams currently considered stalled by the liveness monitor.
    pub stalled: Vec<K>,
    pub bundles_emitted: u64,
    pub last_emitted_at: Option<DateTime<Utc>>,
    pub queue_len: usize,
    pub closed: bool,
}

/// Async view of the delivery queue returned by
/// [SyncManager::bundles](crate::SyncManager::bundles).
pub type OutputStream<'a, K, T> = BoxStream<'a, SyncedBundle<K, T>>;

/// Receiver side of the status channel returned by
/// [SyncManager::status](crate::SyncManager::status).
pub type StatusReceiver<K> = watch::Receiver<SyncStatus<K>>;
