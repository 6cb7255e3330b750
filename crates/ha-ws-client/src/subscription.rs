//! Handle for a live subscription.
//!
//! Dropping a `Subscription` does not unsubscribe; call [`Subscription::cancel`]
//! or close the connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use ha_ws_core::error::{HaError, HaResult};
use ha_ws_core::messages::UNSUBSCRIBE_EVENTS;

use crate::client::Inner;

/// A subscription whose callback keeps receiving events until cancelled.
pub struct Subscription {
    id: u64,
    ack: Value,
    inner: Arc<Inner>,
    cancelled: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: u64, ack: Value, inner: Arc<Inner>) -> Self {
        Self {
            id,
            ack,
            inner,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Correlation id the hub pushes events on.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Payload of the hub's acknowledgement of the subscribe request.
    pub fn ack(&self) -> &Value {
        &self.ack
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Stop the subscription.
    ///
    /// The local entry is removed first, so once this has removed it the
    /// callback will not run again; then the hub is asked to stop pushing.
    /// An event already being delivered may still complete. Calling this
    /// more than once, or after the connection closed, is a no-op.
    pub async fn cancel(&self) -> HaResult<()> {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.inner.registry.remove(self.id).await;

        if !self.inner.is_ready().await {
            debug!(id = self.id, "connection gone, nothing to unsubscribe");
            return Ok(());
        }

        match self
            .inner
            .call(
                UNSUBSCRIBE_EVENTS,
                json!({ "subscription": self.id }),
                self.inner.call_timeout(),
            )
            .await
        {
            Ok(_) => {
                debug!(id = self.id, "unsubscribed");
                Ok(())
            }
            // Closed in the meantime; the hub drops the subscription with it.
            Err(HaError::TransportClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
