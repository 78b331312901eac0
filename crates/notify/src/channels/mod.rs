//! Notification channel implementations.

pub mod slack;
pub mod teams;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::message::Notification;

/// Trait for notification channels (Teams, Slack, etc.).
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Send a notification to this channel.
    async fn send(&self, notification: &Notification) -> Result<(), ChannelError>;
}

/// Build the HTTP client shared by webhook channels.
pub(crate) fn webhook_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
