use crate::config::OverflowPolicy;
use flume::{Receiver, SendTimeoutError, Sender, TryIter, TrySendError, r#async::RecvStream};
use parking_lot::RwLock;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tracing::warn;

/// The reason a bundle could not be enqueued. The rejected bundle is
/// handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<B> {
    /// No room under the configured overflow policy.
    Full(B),
    /// The queue was closed.
    Closed(B),
}

impl<B> PushError<B> {
    pub fn into_inner(self) -> B {
        match self {
            Self::Full(bundle) | Self::Closed(bundle) => bundle,
        }
    }
}

/// A bounded FIFO handing bundles from producer threads to a single
/// consumer thread.
///
/// The queue carries its own synchronization, so consumers never touch
/// the synchronizer lock. Closing drops the sending half; bundles
/// already queued stay available until drained.
#[derive(Debug)]
pub struct DeliveryQueue<B> {
    tx: RwLock<Option<Sender<B>>>,
    rx: Receiver<B>,
    capacity: usize,
    overflow: OverflowPolicy,
    evicted: AtomicU64,
}

impl<B> DeliveryQueue<B> {
    /// A queue holding at most `capacity` bundles.
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        // A zero-capacity flume channel is a rendezvous channel, which
        // would make every non-blocking push fail.
        let capacity = capacity.max(1);
        let (tx, rx) = flume::bounded(capacity);

        Self {
            tx: RwLock::new(Some(tx)),
            rx,
            capacity,
            overflow,
            evicted: AtomicU64::new(0),
        }
    }

    /// Enqueue a bundle according to the overflow policy.
    pub fn push(&self, bundle: B) -> Result<(), PushError<B>> {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            return Err(PushError::Closed(bundle));
        };

        match self.overflow {
            OverflowPolicy::Block { timeout } => {
                tx.send_timeout(bundle, timeout).map_err(|err| match err {
                    SendTimeoutError::Timeout(bundle) => PushError::Full(bundle),
                    SendTimeoutError::Disconnected(bundle) => PushError::Closed(bundle),
                })
            }
            OverflowPolicy::Reject => tx.try_send(bundle).map_err(|err| match err {
                TrySendError::Full(bundle) => PushError::Full(bundle),
                TrySendError::Disconnected(bundle) => PushError::Closed(bundle),
            }),
            OverflowPolicy::DropOldest => {
                let mut bundle = bundle;

                loop {
                    match tx.try_send(bundle) {
                        Ok(()) => return Ok(()),
                        Err(TrySendError::Full(rejected)) => {
                            // The consumer may have popped in the
                            // meantime, in which case the retry succeeds
                            // without evicting.
                            if self.rx.try_recv().is_ok() {
                                let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
                                warn!(total, "delivery queue full, evicted oldest bundle");
                            }
                            bundle = rejected;
                        }
                        Err(TrySendError::Disconnected(rejected)) => {
                            return Err(PushError::Closed(rejected));
                        }
                    }
                }
            }
        }
    }

    /// Take the oldest bundle without blocking.
    pub fn try_pop(&self) -> Option<B> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for a bundle.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<B> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Iterate over the bundles currently queued without blocking.
    pub fn drain(&self) -> TryIter<'_, B> {
        self.rx.try_iter()
    }

    /// Stop accepting bundles. Returns false if the queue was already
    /// closed.
    pub fn close(&self) -> bool {
        self.tx.write().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Number of bundles discarded under [OverflowPolicy::DropOldest].
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// An async stream of bundles. It ends once the queue is closed and
    /// every queued bundle was received.
    pub fn stream(&self) -> RecvStream<'static, B>
    where
        B: 'static,
    {
        self.rx.clone().into_stream()
    }
}
