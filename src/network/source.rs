//! Network event source capability

use tokio::sync::mpsc;

use crate::data::RequestLogEntry;

/// A source of captured request/response pairs.
///
/// The source is usually process-wide; it is injected so sessions and tests can
/// substitute their own instance.
pub trait NetworkEventSource: Send + Sync {
    /// Begin detecting exchanges
    fn start(&self);

    /// Stop detecting exchanges
    fn stop(&self);

    /// Deliver every detected exchange to `tx` until the subscription ends
    fn subscribe(&self, tx: mpsc::UnboundedSender<RequestLogEntry>) -> Subscription;
}

/// Handle to an active subscription.
///
/// Unsubscribes exactly once, either through [`Subscription::unsubscribe`] or on drop.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// End the subscription now
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
