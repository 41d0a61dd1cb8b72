//! Recognized configuration options (spec §6 "Configuration options").

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub heartbeat_interval: Duration,
    pub stale_connection_timeout: Duration,
    pub stale_reap_period: Duration,
    pub channel_buffer_default: usize,
    pub channel_send_timeout: Duration,
    pub event_retention_count: usize,
    pub event_retention_duration: Duration,
    pub max_subscriptions_per_session: usize,
    pub max_resume_replay: usize,
    /// Consecutive drops within `slow_consumer_window` before a subscription
    /// is torn down server-side with `SLOW_CONSUMER` (spec §4.5 Publish).
    pub slow_consumer_threshold: u32,
    pub slow_consumer_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heartbeat_interval: Duration::from_secs(30),
            stale_connection_timeout: Duration::from_secs(5 * 60),
            stale_reap_period: Duration::from_secs(60),
            channel_buffer_default: 100,
            channel_send_timeout: Duration::from_secs(5),
            event_retention_count: 1000,
            event_retention_duration: Duration::from_secs(60 * 60),
            max_subscriptions_per_session: 1000,
            max_resume_replay: 1000,
            slow_consumer_threshold: 3,
            slow_consumer_window: Duration::from_secs(10),
        }
    }
}
