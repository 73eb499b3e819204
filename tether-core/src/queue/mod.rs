//! Durable offline message queue
//!
//! Requests that cannot be sent because the network is down are parked here
//! and replayed in FIFO order once connectivity returns. The queue state is
//! serialized as one JSON array and written to a [`KeyValueStore`] after
//! every change, so pending requests survive a restart.
//!
//! [`KeyValueStore`]: crate::store::KeyValueStore

mod message;
mod offline_queue;

pub use message::{QueuedMessage, DEFAULT_MAX_ATTEMPTS};
pub use offline_queue::{
    DequeueReason, FailureOutcome, OfflineQueue, QueueConfig, QueueError, DEFAULT_STORAGE_KEY,
};
