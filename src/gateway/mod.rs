// ABOUTME: External chat channel abstraction used by the relay to deliver replies.
// ABOUTME: Defines the ChannelAdapter trait and picks the webhook or in-memory adapter from config.

pub mod memory;
pub mod webhook;

use async_trait::async_trait;
use rose_core::Config;
use std::sync::Arc;

pub use memory::MemoryChannel;
pub use webhook::WebhookChannel;

/// Outbound side of an external chat platform.
///
/// Inbound events reach the relay through the HTTP API, so adapters only
/// need to say who they are, whether they can deliver, and deliver.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Platform identifier, also the prefix of relay session ids (e.g. "discord")
    fn platform_id(&self) -> &str;

    /// False until the adapter can deliver messages
    fn is_ready(&self) -> bool;

    /// Post `text` to `channel_id` on this platform.
    async fn send(&self, channel_id: &str, text: &str) -> anyhow::Result<()>;
}

/// Webhook adapter when a callback URL is configured, otherwise an in-memory one that logs
pub fn adapter_from_config(config: &Config) -> anyhow::Result<Arc<dyn ChannelAdapter>> {
    let platform = config.relay.platform.clone();
    match &config.relay.callback_url {
        Some(url) => {
            tracing::info!(platform = %platform, url = %url, "Relaying replies to callback URL");
            Ok(Arc::new(WebhookChannel::new(platform, url)?))
        }
        None => {
            tracing::info!(platform = %platform, "No relay callback URL, replies are only logged");
            Ok(Arc::new(MemoryChannel::new(platform)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_choice_follows_callback_url() {
        let mut config = Config::default();
        let adapter = adapter_from_config(&config).unwrap();
        assert_eq!(adapter.platform_id(), "discord");
        assert!(adapter.is_ready());

        config.relay.platform = "slack".to_string();
        config.relay.callback_url = Some("http://bot:3000/outbound".to_string());
        let adapter = adapter_from_config(&config).unwrap();
        assert_eq!(adapter.platform_id(), "slack");
        assert!(adapter.is_ready());
    }
}
