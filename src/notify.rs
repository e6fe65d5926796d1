use crate::infer::{
    EventKind,
    InferredEvent,
};
use std::time::Instant;
use tracing::info;

/// Receives inferred events for transient display. Implementations must clear
/// each notice at the expiry carried on the event.
pub trait NotificationSink {
    fn notify(&mut self, event: InferredEvent);
}

/// Replace-same-kind, self-expiring notice buffer. A fresh event of a kind
/// already showing restarts that notice's clock instead of stacking a second
/// one.
#[derive(Debug, Default)]
pub struct TransientNotices {
    notices: Vec<InferredEvent>,
}

impl TransientNotices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently visible notices, pruning anything past its expiry.
    pub fn active(&mut self, now: Instant) -> Vec<EventKind> {
        self.notices.retain(|notice| notice.expires_at > now);
        self.notices.iter().map(|notice| notice.kind).collect()
    }
}

impl NotificationSink for TransientNotices {
    fn notify(&mut self, event: InferredEvent) {
        info!(kind = ?event.kind, "inferred event");
        if let Some(existing) = self
            .notices
            .iter_mut()
            .find(|notice| notice.kind == event.kind)
        {
            existing.expires_at = event.expires_at;
        } else {
            self.notices.push(event);
        }
    }
}
