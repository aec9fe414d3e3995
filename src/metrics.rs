// ABOUTME: Prometheus recorder setup and the relay's counters and histograms
// ABOUTME: Recording is a no-op until init_metrics installs the global recorder

use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

pub const MESSAGES_APPENDED: &str = "rose_messages_appended_total";
pub const DISPATCH_REPLIES: &str = "rose_dispatch_replies_total";
pub const TICKETS_ANNOUNCED: &str = "rose_tickets_announced_total";
pub const RELAY_OUTCOMES: &str = "rose_relay_outcomes_total";
pub const RELAY_WAIT_SECONDS: &str = "rose_relay_wait_seconds";
pub const DISPATCH_TICK_SECONDS: &str = "rose_dispatch_tick_seconds";

/// Relay waits run up to minutes, ticks mostly sub-second
const RELAY_WAIT_BUCKETS: &[f64] = &[0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];
const TICK_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0];

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INIT: Mutex<()> = Mutex::new(());

fn builder() -> Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(RELAY_WAIT_SECONDS.to_string()),
            RELAY_WAIT_BUCKETS,
        )?
        .set_buckets_for_metric(Matcher::Full(DISPATCH_TICK_SECONDS.to_string()), TICK_BUCKETS)?)
}

/// Install the global Prometheus recorder once and return its render handle.
/// Later calls return the same handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let _init = INIT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = match builder()?.install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            // Another recorder owns the global slot; render from a detached one
            tracing::warn!(error = %e, "Global metrics recorder already installed");
            builder()?.build_recorder().handle()
        }
    };
    describe();
    Ok(HANDLE.get_or_init(|| handle).clone())
}

fn describe() {
    metrics::describe_counter!(MESSAGES_APPENDED, "Messages appended to sessions");
    metrics::describe_counter!(DISPATCH_REPLIES, "Dispatch loop session outcomes");
    metrics::describe_counter!(TICKETS_ANNOUNCED, "Ticket task announcements sent");
    metrics::describe_counter!(RELAY_OUTCOMES, "Channel relay terminal outcomes");
    metrics::describe_histogram!(RELAY_WAIT_SECONDS, "Time a relay waited for the agent reply");
    metrics::describe_histogram!(DISPATCH_TICK_SECONDS, "Duration of one dispatch tick");
}

/// outcome: "replied", "skipped", "failed"
pub fn record_dispatch_reply(outcome: &'static str) {
    metrics::counter!(DISPATCH_REPLIES, "outcome" => outcome).increment(1);
}

pub fn record_ticket_announced() {
    metrics::counter!(TICKETS_ANNOUNCED).increment(1);
}

pub fn record_dispatch_tick(elapsed: Duration) {
    metrics::histogram!(DISPATCH_TICK_SECONDS).record(elapsed.as_secs_f64());
}

pub fn record_relay_outcome(outcome: &'static str, waited: Option<Duration>) {
    metrics::counter!(RELAY_OUTCOMES, "outcome" => outcome).increment(1);
    if let Some(waited) = waited {
        metrics::histogram!(RELAY_WAIT_SECONDS).record(waited.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_and_renders_recorded_metrics() {
        let first = init_metrics().unwrap();
        let second = init_metrics().unwrap();

        record_ticket_announced();
        record_relay_outcome("delivered", Some(Duration::from_secs(3)));

        let rendered = second.render();
        assert_eq!(rendered, first.render());
        assert!(rendered.contains(TICKETS_ANNOUNCED));
        assert!(rendered.contains("outcome=\"delivered\""));
    }
}
