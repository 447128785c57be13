//! In-process channel backed by tokio mpsc

use super::{Message, MessageChannel};
use crate::common::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub struct MemoryChannel {
    // Offset assignment and send happen under one lock so offsets arrive in order.
    sender: Mutex<(u64, mpsc::UnboundedSender<Message>)>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    committed: AtomicU64,
}

impl MemoryChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new((0, tx)),
            receiver: tokio::sync::Mutex::new(rx),
            committed: AtomicU64::new(0),
        }
    }

    /// Number of offsets committed so far.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn publish(&self, payload: Vec<u8>) -> Result<u64> {
        let mut guard = self
            .sender
            .lock()
            .map_err(|_| Error::Internal("channel lock poisoned".into()))?;
        let offset = guard.0;
        guard
            .1
            .send(Message { offset, payload })
            .map_err(|_| Error::Unavailable("channel closed".into()))?;
        guard.0 += 1;
        Ok(offset)
    }

    async fn receive(&self) -> Result<Message> {
        let mut rx = self.receiver.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| Error::Unavailable("channel closed".into()))
    }

    async fn commit(&self, offset: u64) -> Result<()> {
        self.committed.fetch_max(offset + 1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ordered_delivery() {
        let channel = MemoryChannel::new();
        assert_eq!(channel.publish(b"a".to_vec()).await.unwrap(), 0);
        assert_eq!(channel.publish(b"b".to_vec()).await.unwrap(), 1);

        let first = channel.receive().await.unwrap();
        let second = channel.receive().await.unwrap();
        assert_eq!(first, Message { offset: 0, payload: b"a".to_vec() });
        assert_eq!(second.offset, 1);

        channel.commit(second.offset).await.unwrap();
        assert_eq!(channel.committed(), 2);
    }

    #[tokio::test]
    async fn test_receive_is_cancel_safe() {
        let channel = MemoryChannel::new();
        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), channel.receive()).await;
        assert!(timed_out.is_err());

        channel.publish(b"late".to_vec()).await.unwrap();
        assert_eq!(channel.receive().await.unwrap().payload, b"late".to_vec());
    }
}
