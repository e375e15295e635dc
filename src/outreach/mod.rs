//! Donor outreach.
//!
//! A [`Notifier`] delivers one message over one channel. The [`Outreach`]
//! dispatcher fans a message out to every configured notifier on a detached
//! tokio task, so agents never wait on a provider and a delivery failure is
//! only logged.

pub mod sms;
pub mod voice;

pub use sms::SmsGateway;
pub use voice::VoiceCaller;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::types::{text_enum, BloodGroup};

text_enum! {
    pub enum Channel {
        Sms => "sms",
        Voice => "voice",
        Push => "push",
        Log => "log",
    }
}

/// A message addressed to one donor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutreachMessage {
    pub donor_id: String,
    pub phone: String,
    pub body: String,
    /// Request the donor answers to.
    pub request_id: String,
    pub hospital_id: Option<String>,
    pub blood_group: BloodGroup,
    pub emergency: bool,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    Delivered,
    Failed { reason: String },
}

impl Delivery {
    pub fn failed(reason: impl Into<String>) -> Self {
        Delivery::Failed {
            reason: reason.into(),
        }
    }
}

/// One outbound channel.
#[async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    fn channel(&self) -> Channel;

    async fn notify(&self, message: &OutreachMessage) -> Delivery;
}

/// Writes messages to the log instead of sending them. Used when no
/// provider credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> Channel {
        Channel::Log
    }

    async fn notify(&self, message: &OutreachMessage) -> Delivery {
        log::info!(
            "[OUTREACH] donor={} phone={} request={} group={}: {}",
            message.donor_id,
            message.phone,
            message.request_id,
            message.blood_group,
            message.body.replace('\n', " "),
        );
        Delivery::Delivered
    }
}

/// Fire-and-forget dispatcher over a fixed set of notifiers.
#[derive(Debug)]
pub struct Outreach {
    notifiers: Vec<Arc<dyn Notifier>>,
    inflight: Mutex<Vec<JoinHandle<()>>>,
}

impl Outreach {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            notifiers,
            inflight: Mutex::new(Vec::new()),
        }
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.notifiers.iter().map(|n| n.channel()).collect()
    }

    /// Send `message` over every channel in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, message: OutreachMessage) {
        if self.notifiers.is_empty() {
            log::warn!(
                "[OUTREACH] No notifier configured; donor {} not messaged",
                message.donor_id
            );
            return;
        }
        let notifiers = self.notifiers.clone();
        let handle = tokio::spawn(async move {
            for notifier in notifiers {
                match notifier.notify(&message).await {
                    Delivery::Delivered => log::debug!(
                        "[OUTREACH] {} delivered to donor {} (request {})",
                        notifier.channel(),
                        message.donor_id,
                        message.request_id,
                    ),
                    Delivery::Failed { reason } => log::warn!(
                        "[OUTREACH] {} failed for donor {} (request {}): {}",
                        notifier.channel(),
                        message.donor_id,
                        message.request_id,
                        reason,
                    ),
                }
            }
        });

        let mut inflight = self.inflight.lock();
        inflight.retain(|h| !h.is_finished());
        inflight.push(handle);
    }

    /// Wait for every dispatched delivery to finish. Returns how many tasks
    /// were awaited.
    pub async fn drain(&self) -> usize {
        let handles: Vec<_> = std::mem::take(&mut *self.inflight.lock());
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("[OUTREACH] delivery task failed: {}", e);
            }
        }
        count
    }
}

/// Keep only digits, as most gateways expect.
pub(crate) fn digits_only(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize to E.164 using `default_country_code` when no `+` prefix is
/// present.
pub(crate) fn to_e164(phone: &str, default_country_code: &str) -> String {
    let trimmed = phone.trim();
    if trimmed.starts_with('+') {
        format!("+{}", digits_only(trimmed))
    } else {
        format!("{}{}", default_country_code, digits_only(trimmed))
    }
}
