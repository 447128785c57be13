//! Message channel between the write path and the ingestion consumer
//!
//! At-least-once, ordered delivery to a single logical reader. A message
//! that was received but never committed is delivered again after the
//! reader restarts (for the durable log) or stays acknowledged-in-memory
//! (for the in-process channel, which does not survive a restart anyway).

pub mod log;
pub mod memory;

pub use self::log::LogChannel;
pub use memory::MemoryChannel;

use crate::common::Result;
use async_trait::async_trait;

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub offset: u64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Append a payload. Returns once it is durable for the backend,
    /// yielding the assigned offset.
    async fn publish(&self, payload: Vec<u8>) -> Result<u64>;

    /// Wait for the next message. Cancel-safe: dropping the future loses
    /// nothing.
    async fn receive(&self) -> Result<Message>;

    /// Mark `offset` and everything before it as processed.
    async fn commit(&self, offset: u64) -> Result<()>;
}
