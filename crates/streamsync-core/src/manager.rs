use crate::{
    config::Config,
    error::SyncError,
    queue::{DeliveryQueue, PushError},
    state::Synchronizer,
    types::{
        Consumer, Key, OutputStream, Producer, StatusReceiver, SyncStats, SyncStatus,
        SyncedBundle, WithSequence,
    },
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Owns the synchronizer and the delivery queue, and exposes the two
/// sides of the pipeline: [new_msg](Self::new_msg) for producer threads
/// and [poll](Self::poll) for the consumer thread.
///
/// The manager is a cheap handle; clones share the same state and can
/// be moved to producer threads.
pub struct SyncManager<K, T>
where
    K: Key,
    T: WithSequence,
{
    inner: Arc<Inner<K, T>>,
}

struct Inner<K, T>
where
    K: Key,
    T: WithSequence,
{
    synchronizer: Mutex<Synchronizer<K, T>>,
    queue: DeliveryQueue<SyncedBundle<K, T>>,
    status_tx: watch::Sender<SyncStatus<K>>,
    closed: AtomicBool,
}

impl<K, T> Clone for SyncManager<K, T>
where
    K: Key,
    T: WithSequence,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Collects stream names from producers before the manager is built.
pub struct SyncManagerBuilder<K>
where
    K: Key,
{
    config: Config,
    streams: Vec<K>,
}

impl<K> SyncManagerBuilder<K>
where
    K: Key,
{
    pub fn new(config: Config) -> Self {
        Self {
            config,
            streams: Vec::new(),
        }
    }

    /// Register every stream published by `producer`.
    pub fn producer<P>(mut self, producer: &P) -> Self
    where
        P: Producer<K> + ?Sized,
    {
        self.streams.extend(producer.streams());
        self
    }

    pub fn stream(mut self, key: K) -> Self {
        self.streams.push(key);
        self
    }

    pub fn streams<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        self.streams.extend(keys);
        self
    }

    /// Validate the configuration and the stream set, then start the
    /// manager. The stream set is closed from here on.
    pub fn build<T>(self) -> Result<SyncManager<K, T>, SyncError>
    where
        T: WithSequence,
    {
        let Self { config, streams } = self;
        config.validate()?;

        let synchronizer = Synchronizer::new(streams, &config)?;
        let queue = DeliveryQueue::new(config.queue_capacity, config.overflow);

        let (status_tx, _status_rx) = watch::channel(synchronizer.status(0, false));

        info!(
            streams = ?synchronizer.keys().collect::<Vec<_>>(),
            policy = ?config.policy,
            queue_capacity = queue.capacity(),
            overflow = ?config.overflow,
            "sync manager ready"
        );

        Ok(SyncManager {
            inner: Arc::new(Inner {
                synchronizer: Mutex::new(synchronizer),
                queue,
                status_tx,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

impl<K, T> SyncManager<K, T>
where
    K: Key,
    T: WithSequence,
{
    pub fn builder(config: Config) -> SyncManagerBuilder<K> {
        SyncManagerBuilder::new(config)
    }

    /// Shortcut for a manager over an explicit list of streams.
    pub fn new<I>(streams: I, config: Config) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = K>,
    {
        SyncManagerBuilder::new(config).streams(streams).build()
    }

    /// Feed one message from a producer.
    ///
    /// Returns `Ok(true)` when this message completed a bundle that is
    /// now waiting in the delivery queue. Safe to call concurrently from
    /// several producer threads.
    pub fn new_msg(&self, key: K, item: T) -> Result<bool, SyncError> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }

        let mut synchronizer = self.inner.synchronizer.lock();

        // close() may have run while this call waited for the lock.
        if self.is_closed() {
            return Err(SyncError::Closed);
        }

        let stream = key.clone();
        let result = synchronizer.push(key, item);

        let outcome = match result {
            Ok(Some(bundle)) => match self.inner.queue.push(bundle) {
                Ok(()) => Ok(true),
                Err(PushError::Full(_)) => {
                    synchronizer.record_dropped_bundle();
                    warn!(
                        stream = %stream,
                        dropped = synchronizer.stats().bundles_dropped,
                        "delivery queue full, bundle dropped"
                    );
                    Err(SyncError::QueueFull {
                        stream: stream.to_string(),
                    })
                }
                Err(PushError::Closed(_)) => {
                    synchronizer.record_dropped_bundle();
                    debug!(stream = %stream, "queue closed while delivering bundle");
                    Err(SyncError::Closed)
                }
            },
            Ok(None) => Ok(false),
            Err(err) => Err(err),
        };

        synchronizer.check_liveness(Instant::now());
        self.publish_status(&synchronizer);

        outcome
    }

    /// A sender bound to one registered stream.
    pub fn stream(&self, key: K) -> Result<StreamSender<K, T>, SyncError> {
        if !self.inner.synchronizer.lock().contains_stream(&key) {
            return Err(SyncError::UnregisteredStream {
                stream: key.to_string(),
            });
        }

        Ok(StreamSender {
            key,
            manager: self.clone(),
        })
    }

    /// Deliver at most one bundle to `consumer` on the calling thread.
    /// Never blocks. Returns whether a bundle was delivered.
    pub fn poll<C>(&self, consumer: &mut C) -> bool
    where
        C: Consumer<K, T> + ?Sized,
    {
        match self.inner.queue.try_pop() {
            Some(bundle) => {
                consumer.consume(bundle);
                true
            }
            None => false,
        }
    }

    /// Like [poll](Self::poll) but waits up to `timeout` for a bundle.
    pub fn poll_timeout<C>(&self, timeout: Duration, consumer: &mut C) -> bool
    where
        C: Consumer<K, T> + ?Sized,
    {
        match self.inner.queue.pop_timeout(timeout) {
            Some(bundle) => {
                consumer.consume(bundle);
                true
            }
            None => false,
        }
    }

    /// Deliver every bundle currently queued and return how many were
    /// delivered.
    pub fn drain<C>(&self, consumer: &mut C) -> usize
    where
        C: Consumer<K, T> + ?Sized,
    {
        let mut count = 0;
        for bundle in self.inner.queue.drain() {
            consumer.consume(bundle);
            count += 1;
        }
        count
    }

    /// Stop accepting messages. Bundles already queued remain available
    /// to [poll](Self::poll) and [drain](Self::drain).
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Taking the lock waits for an in-flight new_msg to finish
        // enqueueing before the queue is closed.
        let synchronizer = self.inner.synchronizer.lock();
        self.inner.queue.close();
        self.publish_status(&synchronizer);

        info!(
            queued = self.inner.queue.len(),
            bundles_emitted = synchronizer.stats().bundles_emitted,
            "sync manager closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> Vec<K> {
        self.inner.synchronizer.lock().keys().cloned().collect()
    }

    /// Pending message count of a stream.
    pub fn pending(&self, key: &K) -> Option<usize> {
        self.inner.synchronizer.lock().pending(key)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn stats(&self) -> SyncStats {
        let mut stats = self.inner.synchronizer.lock().stats().clone();
        stats.bundles_evicted = self.inner.queue.evicted();
        stats
    }

    /// Re-run the liveness check and return the stalled streams. Always
    /// empty when liveness is not configured.
    pub fn stalled_streams(&self) -> Vec<K> {
        let mut synchronizer = self.inner.synchronizer.lock();
        let stalled = synchronizer.check_liveness(Instant::now());
        self.publish_status(&synchronizer);
        stalled
    }

    /// Subscribe to status snapshots published after every message.
    pub fn status(&self) -> StatusReceiver<K> {
        let synchronizer = self.inner.synchronizer.lock();
        let rx = self.inner.status_tx.subscribe();
        self.inner
            .status_tx
            .send_replace(synchronizer.status(self.inner.queue.len(), self.is_closed()));
        rx
    }

    /// Consume bundles as an async stream instead of polling. The stream
    /// ends after [close](Self::close) once the queue is drained.
    pub fn bundles(&self) -> OutputStream<'static, K, T>
    where
        K: 'static,
        T: 'static,
    {
        self.inner.queue.stream().boxed()
    }

    fn publish_status(&self, synchronizer: &Synchronizer<K, T>) {
        // Building the snapshot is skipped when nobody listens;
        // subscribers get a fresh one in status().
        if self.inner.status_tx.receiver_count() == 0 {
            return;
        }

        let status = synchronizer.status(self.inner.queue.len(), self.is_closed());
        self.inner.status_tx.send_replace(status);
    }
}

/// A handle that feeds a single registered stream.
pub struct StreamSender<K, T>
where
    K: Key,
    T: WithSequence,
{
    key: K,
    manager: SyncManager<K, T>,
}

impl<K, T> Clone for StreamSender<K, T>
where
    K: Key,
    T: WithSequence,
{
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            manager: self.manager.clone(),
        }
    }
}

impl<K, T> StreamSender<K, T>
where
    K: Key,
    T: WithSequence,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    /// See [SyncManager::new_msg].
    pub fn send(&self, item: T) -> Result<bool, SyncError> {
        self.manager.new_msg(self.key.clone(), item)
    }
}
