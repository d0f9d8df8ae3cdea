use crate::error::SyncError;
use eyre::{Result, WrapErr};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

/// Default capacity of the delivery queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;

/// Default time a producer waits for room in a full delivery queue.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(50);

/// The rule deciding when pending messages form a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Emit the latest message of every stream as soon as each stream
    /// has at least one pending message. No correlation between the
    /// chosen messages is guaranteed.
    #[default]
    NoSync,

    /// Emit a bundle once every stream holds a message with the same
    /// sequence key, then prune all keys up to the emitted one.
    SeqSync,
}

/// Policy for a per-stream buffer that reached its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Drop the oldest message to make room for the new one.
    /// Always accepts new data. Suitable for live sensors.
    #[default]
    DropOldest,

    /// Reject new messages when the buffer is full (error returned to
    /// caller). Preserves existing data.
    RejectNew,
}

/// Policy for a delivery queue that is full when a bundle is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Block the producer until the consumer makes room, bounded by a
    /// timeout. The bundle is dropped and reported if the timeout
    /// elapses.
    Block {
        #[serde(with = "humantime_serde")]
        timeout: Duration,
    },

    /// Never block. A bundle that does not fit is dropped and reported.
    Reject,

    /// Never block. The oldest queued bundle is discarded to make room.
    DropOldest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::Block {
            timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }
}

/// Optional stall diagnostic for streams that stop producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LivenessConfig {
    /// How long a stream may stay silent, with nothing pending, before
    /// it is reported as stalled.
    #[serde(with = "humantime_serde")]
    pub stall_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(2),
        }
    }
}

/// Configuration parameters passed to the
/// [SyncManager](crate::SyncManager).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bundling rule.
    pub policy: SyncPolicy,
    /// Maximum number of bundles waiting for the consumer.
    pub queue_capacity: usize,
    /// What a producer does when the delivery queue is full.
    pub overflow: OverflowPolicy,
    /// Maximum number of pending messages per stream. None means the
    /// buffers grow until a bundle is formed.
    pub buffer_capacity: Option<usize>,
    /// Policy for handling buffer overflow.
    pub drop_policy: DropPolicy,
    /// Stall detection (optional)
    pub liveness: Option<LivenessConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: SyncPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            buffer_capacity: None,
            drop_policy: DropPolicy::default(),
            liveness: None,
        }
    }
}

impl Config {
    /// Keep-latest bundling with default queue settings.
    pub fn no_sync() -> Self {
        Self::default()
    }

    /// Sequence-key matching with default queue settings.
    pub fn seq_sync() -> Self {
        Self {
            policy: SyncPolicy::SeqSync,
            ..Self::default()
        }
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Cap every stream buffer at `capacity` messages.
    pub fn with_buffer_capacity(mut self, capacity: usize, drop_policy: DropPolicy) -> Self {
        self.buffer_capacity = Some(capacity);
        self.drop_policy = drop_policy;
        self
    }

    /// Enable stall detection on an existing config
    pub fn enable_liveness(mut self, liveness: LivenessConfig) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .wrap_err_with(|| format!("Failed to load config file: {}", path.display()))
    }

    /// Parse and validate configuration from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).wrap_err("Failed to parse sync configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.queue_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }

        if self.buffer_capacity == Some(0) {
            return Err(SyncError::InvalidConfig(
                "buffer_capacity must be greater than zero".to_string(),
            ));
        }

        if let Some(liveness) = &self.liveness
            && liveness.stall_timeout.is_zero()
        {
            return Err(SyncError::InvalidConfig(
                "liveness.stall_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
