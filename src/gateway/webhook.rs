// ABOUTME: Channel adapter that delivers outbound text by POSTing JSON to a callback URL.
// ABOUTME: The platform bot behind the URL owns the actual connection to the chat service.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::gateway::ChannelAdapter;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct OutboundMessage<'a> {
    channel_id: &'a str,
    message: &'a str,
}

pub struct WebhookChannel {
    platform: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(platform: impl Into<String>, url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Failed to build callback HTTP client")?;
        Ok(Self {
            platform: platform.into(),
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl ChannelAdapter for WebhookChannel {
    fn platform_id(&self) -> &str {
        &self.platform
    }

    fn is_ready(&self) -> bool {
        !self.url.is_empty()
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&OutboundMessage {
                channel_id,
                message: text,
            })
            .send()
            .await
            .with_context(|| format!("Failed to reach {} callback", self.platform))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "{} callback rejected message for channel {}: {}",
                self.platform,
                channel_id,
                response.status()
            );
        }

        tracing::debug!(platform = %self.platform, channel_id = %channel_id, "Delivered outbound message");
        Ok(())
    }
}
