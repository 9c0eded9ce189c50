//! Verification notifications.
//!
//! The pipeline hands a [`VerificationEvent`] to a [`NotificationEmitter`]
//! and moves on. [`ChannelEmitter`] fans the event out to email and push
//! [`Transport`]s according to the recipient's preferences; delivery
//! failures are logged and counted, never propagated.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use release_state::{
    AccountId, NotificationPreferences, PreferenceStore, ProductId, Release, ReleaseId,
};

use crate::error::RejectReason;
use crate::metrics::METRICS;
use crate::obs;

/// How an event should be presented to its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    /// Verification passed
    Approved,
    /// Release is now publicly served
    Published,
    Error,
}

/// A notification about one release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEvent {
    pub recipient: AccountId,
    pub severity: Severity,
    pub title: String,
    pub body: String,
    pub release_id: ReleaseId,
    pub product_id: ProductId,
    /// Verification log at the time the event was raised
    pub log: Vec<String>,
}

impl VerificationEvent {
    fn for_release(
        release: &Release,
        severity: Severity,
        title: String,
        body: String,
    ) -> Self {
        Self {
            recipient: release.submitted_by.clone(),
            severity,
            title,
            body,
            release_id: release.id.clone(),
            product_id: release.product_id.clone(),
            log: release.log.clone(),
        }
    }

    /// Run ended in `Failed`.
    pub fn failed(release: &Release, product_name: &str, reason: &RejectReason) -> Self {
        let (title, body) = if reason.is_unexpected() {
            (
                format!("Unexpected error during verification: {product_name}"),
                format!(
                    "Verification of version {} failed because of an unexpected error. {reason}",
                    release.version_label
                ),
            )
        } else {
            (
                format!("Verification failed: {product_name}"),
                format!(
                    "Verification of version {} failed. {reason}",
                    release.version_label
                ),
            )
        };
        Self::for_release(release, Severity::Error, title, body)
    }

    /// Every check passed and the release is approved.
    pub fn approved(release: &Release, product_name: &str) -> Self {
        Self::for_release(
            release,
            Severity::Approved,
            format!("{product_name} was verified successfully"),
            format!(
                "Version {} of your product was verified and approved.",
                release.version_label
            ),
        )
    }

    /// The product became publicly visible for the first time.
    pub fn first_published(release: &Release, product_name: &str) -> Self {
        Self::for_release(
            release,
            Severity::Published,
            format!("{product_name} is now published"),
            "Your product was approved and is now publicly visible.".to_string(),
        )
    }

    /// The release replaced the previously served version.
    pub fn update_published(release: &Release, product_name: &str) -> Self {
        Self::for_release(
            release,
            Severity::Published,
            format!("{product_name} updated to version {}", release.version_label),
            format!(
                "Version {} was approved and is now the publicly served release.",
                release.version_label
            ),
        )
    }
}

/// Sink for verification events. Implementations must not fail the caller.
#[async_trait]
pub trait NotificationEmitter: Send + Sync {
    async fn emit(&self, event: VerificationEvent);
}

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    fn enabled(&self, prefs: &NotificationPreferences) -> bool {
        match self {
            Channel::Email => prefs.email,
            Channel::Push => prefs.push,
        }
    }
}

/// A concrete message transport (SMTP relay, push gateway, ...).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, event: &VerificationEvent) -> anyhow::Result<()>;
}

/// Emitter that honours per-account channel preferences.
pub struct ChannelEmitter {
    preferences: Arc<dyn PreferenceStore>,
    email: Arc<dyn Transport>,
    push: Arc<dyn Transport>,
}

impl ChannelEmitter {
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        email: Arc<dyn Transport>,
        push: Arc<dyn Transport>,
    ) -> Self {
        Self {
            preferences,
            email,
            push,
        }
    }

    async fn preferences_for(&self, account: &AccountId) -> NotificationPreferences {
        match self.preferences.preferences(account).await {
            Ok(Some(prefs)) => prefs,
            Ok(None) => NotificationPreferences::default(),
            Err(e) => {
                warn!(account = %account, error = %e, "preference lookup failed, using defaults");
                NotificationPreferences::default()
            }
        }
    }
}

#[async_trait]
impl NotificationEmitter for ChannelEmitter {
    async fn emit(&self, event: VerificationEvent) {
        let prefs = self.preferences_for(&event.recipient).await;
        for (channel, transport) in [(Channel::Email, &self.email), (Channel::Push, &self.push)] {
            if !channel.enabled(&prefs) {
                debug!(channel = channel.as_str(), recipient = %event.recipient, "channel disabled");
                continue;
            }
            if let Err(e) = transport.deliver(&event).await {
                METRICS.inc_notifications_failed();
                obs::emit_notification_failed(event.release_id.as_str(), channel.as_str(), &e);
            }
        }
    }
}

/// Transport that writes events to the tracing log. Used by the CLI.
#[derive(Debug, Clone, Copy)]
pub struct LogTransport {
    channel: Channel,
}

impl LogTransport {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn deliver(&self, event: &VerificationEvent) -> anyhow::Result<()> {
        info!(
            channel = self.channel.as_str(),
            recipient = %event.recipient,
            severity = ?event.severity,
            title = %event.title,
            "notification"
        );
        Ok(())
    }
}
