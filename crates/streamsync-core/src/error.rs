use thiserror::Error;

/// Errors reported by the synchronizer and the delivery queue.
///
/// None of these cross the producer/consumer boundary as panics. An
/// empty queue is not an error; polling simply reports that nothing was
/// delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The message names a stream that was not registered at setup.
    /// The message is discarded.
    #[error("stream `{stream}` is not registered")]
    UnregisteredStream { stream: String },

    /// A bundle was formed but the delivery queue refused it under the
    /// configured overflow policy. The bundle is discarded.
    #[error("delivery queue is full, dropped the bundle completed by stream `{stream}`")]
    QueueFull { stream: String },

    /// The per-stream buffer reached its capacity under
    /// [DropPolicy::RejectNew](crate::DropPolicy::RejectNew).
    #[error("buffer for stream `{stream}` is full")]
    BufferFull { stream: String },

    /// The sequence key is not newer than the last emitted bundle.
    #[error("late message on stream `{stream}`: sequence {sequence} is not after {committed}")]
    LateMessage {
        stream: String,
        sequence: String,
        committed: String,
    },

    #[error("stream `{stream}` is registered more than once")]
    DuplicateStream { stream: String },

    #[error("at least one stream must be registered")]
    NoStreams,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("the synchronizer is closed")]
    Closed,
}
