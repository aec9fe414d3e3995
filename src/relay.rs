// ABOUTME: Bridges an external chat channel to a session: post the user's message, wait for the agent's reply
// ABOUTME: Waits are bounded by a timeout, woken early by appends, and cancelled together on shutdown

use crate::context::AppContext;
use crate::gateway::ChannelAdapter;
use crate::metrics;
use rose_core::{Config, Error, Participant};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const EVENT_SOURCE: &str = "relay";

pub const RELAY_FAILED_NOTICE: &str =
    "Sorry, I couldn't relay that to the agent. Please try again later.";
pub const TIMEOUT_NOTICE: &str =
    "The agent did not respond in time. Please try again or check the service.";

/// A human message arriving from an external channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub community_id: String,
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub text: String,
    /// Messages the bot posted itself are echoed back by some platforms
    #[serde(default)]
    pub from_bot: bool,
}

impl InboundEvent {
    /// Display name, or the user id when none was given
    pub fn sender_name(&self) -> &str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.user_id)
    }
}

/// Terminal state of one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The agent's reply was delivered to the channel
    Delivered { session_id: String, reply: String },
    /// No reply within the timeout; the timeout notice was delivered
    TimedOut { session_id: String },
    /// The session could not be created or the message not posted; the failure notice was delivered
    PostFailed,
    /// Shutdown interrupted the wait; nothing was delivered
    Cancelled { session_id: String },
    /// No agent is assigned to the channel
    Unassigned,
    /// The assigned agent id is unknown to the directory
    UnknownAgent { agent_id: String },
    /// Sent by the bot itself
    Ignored,
}

impl RelayOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::TimedOut { .. } => "timed_out",
            Self::PostFailed => "post_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Unassigned => "unassigned",
            Self::UnknownAgent { .. } => "unknown_agent",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub shutdown_grace: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.relay_poll_interval(),
            timeout: config.relay_timeout(),
            shutdown_grace: config.relay_shutdown_grace(),
        }
    }
}

/// Relay session id: one session per platform, community, channel and user
pub fn relay_session_id(platform: &str, event: &InboundEvent) -> String {
    format!(
        "{}-{}-{}-{}",
        platform, event.community_id, event.channel_id, event.user_id
    )
}

#[derive(Clone)]
pub struct ChannelRelay {
    ctx: AppContext,
    channel: Arc<dyn ChannelAdapter>,
    settings: RelaySettings,
    cancel: CancellationToken,
    tasks: Arc<Mutex<JoinSet<RelayOutcome>>>,
}

impl ChannelRelay {
    pub fn new(ctx: AppContext, channel: Arc<dyn ChannelAdapter>) -> Self {
        let settings = RelaySettings::from_config(&ctx.config);
        Self::with_settings(ctx, channel, settings)
    }

    pub fn with_settings(
        ctx: AppContext,
        channel: Arc<dyn ChannelAdapter>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            ctx,
            channel,
            settings,
            cancel: CancellationToken::new(),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn channel(&self) -> &Arc<dyn ChannelAdapter> {
        &self.channel
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<RelayOutcome>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of relays still running
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Handle the event on a tracked background task. Returns false when the
    /// event is ignored or the relay is shutting down.
    pub fn spawn(&self, event: InboundEvent) -> bool {
        if event.from_bot {
            return false;
        }
        if self.cancel.is_cancelled() {
            tracing::warn!(channel_id = %event.channel_id, "Relay is shutting down, dropping inbound message");
            return false;
        }

        let relay = self.clone();
        let mut tasks = self.tasks();
        // Reap finished relays so the set only holds live waits
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move { relay.handle_inbound(event).await });
        true
    }

    /// Run one inbound event to its terminal state
    pub async fn handle_inbound(&self, event: InboundEvent) -> RelayOutcome {
        let started = Instant::now();
        let outcome = self.relay(&event).await;

        let waited = match outcome {
            RelayOutcome::Delivered { .. } | RelayOutcome::TimedOut { .. } => {
                Some(started.elapsed())
            }
            _ => None,
        };
        metrics::record_relay_outcome(outcome.label(), waited);
        tracing::info!(
            community_id = %event.community_id,
            channel_id = %event.channel_id,
            user_id = %event.user_id,
            outcome = outcome.label(),
            "Relay finished"
        );
        outcome
    }

    async fn relay(&self, event: &InboundEvent) -> RelayOutcome {
        if event.from_bot {
            return RelayOutcome::Ignored;
        }

        let agent_id = match self
            .ctx
            .assignments
            .get_agent_id(&event.community_id, &event.channel_id)
        {
            Ok(Some(agent_id)) => agent_id,
            Ok(None) => {
                tracing::debug!(
                    community_id = %event.community_id,
                    channel_id = %event.channel_id,
                    "No agent assigned to channel"
                );
                return RelayOutcome::Unassigned;
            }
            Err(e) => {
                tracing::warn!(error = %e, channel_id = %event.channel_id, "Failed to read channel assignment");
                return RelayOutcome::Unassigned;
            }
        };

        let agent_name = match self.ctx.agents.get_agent(&agent_id).await {
            Ok(Some(agent)) => agent.name,
            Ok(None) => {
                tracing::warn!(agent_id = %agent_id, "Agent not found for id");
                return RelayOutcome::UnknownAgent { agent_id };
            }
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "Failed to resolve agent");
                return RelayOutcome::UnknownAgent { agent_id };
            }
        };

        let sender = event.sender_name().to_string();
        let session_id = relay_session_id(self.channel.platform_id(), event);

        if let Err(e) = self.post(&session_id, &sender, &agent_name, &event.text) {
            tracing::error!(session_id = %session_id, error = %e, "Failed to create session or send message");
            self.deliver(&event.channel_id, RELAY_FAILED_NOTICE).await;
            return RelayOutcome::PostFailed;
        }

        let preview: String = event.text.chars().take(100).collect();
        self.ctx.events.emit(
            EVENT_SOURCE,
            "relay.user_message",
            Some(format!("User {} in channel: {:?}", sender, preview)),
        );

        match self.wait_for_reply(&session_id, &agent_name).await {
            Ok(WaitResult::Reply(reply)) => {
                self.deliver(&event.channel_id, &reply).await;
                self.ctx.events.emit(
                    EVENT_SOURCE,
                    "relay.agent_reply",
                    Some(format!("Agent {} replied in channel", agent_name)),
                );
                RelayOutcome::Delivered { session_id, reply }
            }
            Ok(WaitResult::Cancelled) => RelayOutcome::Cancelled { session_id },
            Err(e) => {
                tracing::warn!(session_id = %session_id, agent = %agent_name, error = %e, "Agent did not reply in time");
                self.deliver(&event.channel_id, TIMEOUT_NOTICE).await;
                RelayOutcome::TimedOut { session_id }
            }
        }
    }

    fn post(
        &self,
        session_id: &str,
        sender: &str,
        agent_name: &str,
        text: &str,
    ) -> rose_core::Result<()> {
        let participants = [Participant::human(sender), Participant::agent(agent_name)];
        self.ctx
            .queue
            .create_or_get_session(&participants, Some(session_id))?;
        self.ctx.queue.append_message(session_id, sender, text)?;
        Ok(())
    }

    /// Poll history until the agent spoke last, the timeout passes, or shutdown.
    ///
    /// Polls happen every `poll_interval`, or sooner when any session gets an
    /// append. Only a successful reply clears the unseen flag. Running past the
    /// timeout is `Error::Timeout` carrying the time waited.
    async fn wait_for_reply(
        &self,
        session_id: &str,
        agent_name: &str,
    ) -> rose_core::Result<WaitResult> {
        let notifier = self.ctx.queue.append_notifier();
        let started = Instant::now();

        loop {
            if started.elapsed() >= self.settings.timeout {
                return Err(Error::Timeout(started.elapsed()));
            }

            // Register before reading so an append between the read and the wait still wakes us
            let appended = notifier.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            match self.ctx.queue.get_history(session_id, false) {
                Ok(history) => {
                    if let Some(last) = history.last().filter(|m| m.sender == agent_name) {
                        let reply = self.take_reply(session_id, agent_name, &last.content);
                        return Ok(WaitResult::Reply(reply));
                    }
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to read history while waiting");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(WaitResult::Cancelled),
                _ = &mut appended => {}
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }

    /// Re-read with clearing and return the agent's latest message
    fn take_reply(&self, session_id: &str, agent_name: &str, seen: &str) -> String {
        match self.ctx.queue.get_history(session_id, true) {
            Ok(history) => history
                .last()
                .filter(|m| m.sender == agent_name)
                .map(|m| m.content.clone())
                .unwrap_or_else(|| seen.to_string()),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to clear unseen flag after reply");
                seen.to_string()
            }
        }
    }

    async fn deliver(&self, channel_id: &str, text: &str) {
        if let Err(e) = self.channel.send(channel_id, text).await {
            tracing::error!(
                platform = %self.channel.platform_id(),
                channel_id = %channel_id,
                error = %e,
                "Failed to deliver message to channel"
            );
        }
    }

    /// Cancel every outstanding wait, give them `shutdown_grace` to finish, then abort the rest
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks());
        if tasks.is_empty() {
            return;
        }

        tracing::info!(in_flight = tasks.len(), "Cancelling outstanding relay waits");
        let drained = tokio::time::timeout(self.settings.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = tasks.len(), "Relay waits did not stop in time, aborting");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

enum WaitResult {
    Reply(String),
    Cancelled,
}
