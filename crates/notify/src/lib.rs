//! Chat notification channels for remediation approvals and reports.
//!
//! This crate delivers structured [`Notification`]s (title, facts, the
//! verbatim command list and optional callback actions) to Microsoft
//! Teams, Slack and any other [`NotifyChannel`].
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notification, Notifier, Severity};
//! use std::time::Duration;
//!
//! # async fn run() {
//! let notifier = Notifier::from_env(Duration::from_secs(10));
//!
//! let results = notifier
//!     .notify_and_wait(
//!         &Notification::new("disk-full auto-remediated", Severity::Info)
//!             .fact("Incident", "disk-full"),
//!     )
//!     .await;
//! # }
//! ```
//!
//! # Configuration
//!
//! The notifier is configured via environment variables:
//!
//! - `TEAMS_WEBHOOK_URL`: Teams incoming webhook (enables Teams channel)
//! - `SLACK_WEBHOOK_URL`: Slack incoming webhook (enables Slack channel)
//! - `NOTIFY_DISABLED`: Set to "true" to disable all notifications

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod channels;
pub mod error;
pub mod message;

pub use channels::slack::SlackChannel;
pub use channels::teams::TeamsChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use message::{command_block, CallbackAction, Fact, Notification, Severity};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Central notification dispatcher.
///
/// The `Notifier` manages multiple notification channels and dispatches
/// each notification to all enabled channels.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a new notifier from environment variables.
    ///
    /// This will auto-detect which channels are configured based on
    /// environment variables and enable them accordingly.
    #[must_use]
    pub fn from_env(timeout: Duration) -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self::disabled();
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![];

        let teams = TeamsChannel::from_env(timeout);
        if teams.enabled() {
            info!("Teams notifications enabled");
            channels.push(Arc::new(teams));
        }

        let slack = SlackChannel::from_env(timeout);
        if slack.enabled() {
            info!("Slack notifications enabled");
            channels.push(Arc::new(slack));
        }

        if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Send a notification and wait for all channels to complete.
    ///
    /// Returns one result per enabled channel. Failures are logged here
    /// and never retried.
    pub async fn notify_and_wait(
        &self,
        notification: &Notification,
    ) -> Vec<(String, Result<(), ChannelError>)> {
        if !self.has_channels() {
            debug!(title = %notification.title, "No active channels, skipping notification");
            return vec![];
        }

        let mut results = vec![];

        for channel in &self.channels {
            if !channel.enabled() {
                continue;
            }
            let channel_name = channel.name().to_string();
            let result = channel.send(notification).await;
            match &result {
                Ok(()) => debug!(channel = %channel_name, "Notification sent"),
                Err(e) => error!(
                    channel = %channel_name,
                    error = %e,
                    "Failed to send notification"
                ),
            }
            results.push((channel_name, result));
        }

        results
    }
}
