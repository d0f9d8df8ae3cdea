//! This library bundles up messages from multiple named streams, one
//! message per stream, and hands the bundles to a single consumer
//! thread.
//!
//! Producers call [SyncManager::new_msg] from any thread. Once the
//! active [SyncPolicy] judges the pending messages acceptable, a
//! [SyncedBundle] is placed in a bounded delivery queue. The consumer
//! drains the queue with [SyncManager::poll] from the thread it wants
//! its callback to run on, e.g. a UI loop.
//!
//! # Usage
//!
//! ```rust
//! use streamsync_core::{Config, SyncManager, SyncedBundle, WithSequence};
//!
//! // Define your message type
//! #[derive(Debug, Clone)]
//! struct Frame {
//!     seq: u64,
//!     data: Vec<u8>,
//! }
//!
//! impl WithSequence for Frame {
//!     type Seq = u64;
//!
//!     fn sequence(&self) -> u64 {
//!         self.seq
//!     }
//! }
//!
//! # fn main() -> eyre::Result<()> {
//! // Register the streams and start the manager.
//! let manager = SyncManager::new(["color", "depth"], Config::no_sync())?;
//!
//! // Producers push messages, typically from their own threads.
//! manager.new_msg("color", Frame { seq: 1, data: vec![] })?;
//! manager.new_msg("color", Frame { seq: 2, data: vec![] })?;
//! manager.new_msg("depth", Frame { seq: 1, data: vec![] })?;
//!
//! // The consumer polls on the thread of its choice.
//! let mut bundles = vec![];
//! while manager.poll(&mut |bundle: SyncedBundle<&'static str, Frame>| bundles.push(bundle)) {}
//!
//! assert_eq!(bundles.len(), 1);
//! assert_eq!(bundles[0]["color"].payload().seq, 2);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
mod config;
mod error;
pub mod liveness;
mod manager;
pub mod queue;
pub mod state;
mod types;

pub use config::{
    Config, DEFAULT_PUSH_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DropPolicy, LivenessConfig,
    OverflowPolicy, SyncPolicy,
};
pub use error::SyncError;
pub use liveness::LivenessMonitor;
pub use manager::{StreamSender, SyncManager, SyncManagerBuilder};
pub use queue::{DeliveryQueue, PushError};
pub use state::Synchronizer;
pub use types::*;
