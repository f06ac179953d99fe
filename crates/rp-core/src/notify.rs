//! User-visible notifications
//!
//! A bounded queue between the engine and whatever shows feedback to the
//! user. Enqueueing never blocks; a full queue drops the message.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::ContextId;

pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub context_id: ContextId,
    pub message: String,
}

/// Receiving half, owned by the host.
pub type NotificationReceiver = mpsc::Receiver<Notification>;

#[derive(Debug, Clone)]
pub struct NotificationChannel {
    tx: mpsc::Sender<Notification>,
}

impl NotificationChannel {
    pub fn bounded(capacity: usize) -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Best-effort, fire-and-forget.
    pub fn notify(&self, context_id: ContextId, message: impl Into<String>) {
        let notification = Notification {
            context_id,
            message: message.into(),
        };
        if let Err(e) = self.tx.try_send(notification) {
            log::debug!("dropping notification: {}", e);
        }
    }
}
