// ABOUTME: In-process channel adapter that records outbound messages.
// ABOUTME: Used in tests, and by `serve` without a callback URL where replies are only logged.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::gateway::ChannelAdapter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: String,
    pub text: String,
}

pub struct MemoryChannel {
    platform: String,
    ready: AtomicBool,
    sent: Mutex<Vec<SentMessage>>,
}

impl MemoryChannel {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            ready: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Everything delivered so far, oldest first
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ChannelAdapter for MemoryChannel {
    fn platform_id(&self) -> &str {
        &self.platform
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn send(&self, channel_id: &str, text: &str) -> anyhow::Result<()> {
        if !self.is_ready() {
            anyhow::bail!("{} channel is not ready", self.platform);
        }
        tracing::info!(platform = %self.platform, channel_id = %channel_id, text = %text, "Outbound message");
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                channel_id: channel_id.to_string(),
                text: text.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_in_order() {
        let channel = MemoryChannel::new("discord");
        channel.send("c1", "one").await.unwrap();
        channel.send("c2", "two").await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].channel_id, "c1");
        assert_eq!(sent[1].text, "two");
    }

    #[tokio::test]
    async fn test_not_ready_refuses() {
        let channel = MemoryChannel::new("discord");
        channel.set_ready(false);
        assert!(!channel.is_ready());
        assert!(channel.send("c1", "lost").await.is_err());
        assert!(channel.sent().is_empty());
    }
}
