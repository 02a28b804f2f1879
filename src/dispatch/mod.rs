//! Notification delivery.
//!
//! The relay hands every rendered [`Notification`] to a [`Notifier`]. The
//! production notifier shells out to the Apprise CLI; tests substitute a
//! recording implementation.

pub mod apprise;

use async_trait::async_trait;

use crate::error::DispatchError;
pub use crate::pipeline::types::Notification;

pub use apprise::AppriseNotifier;

/// Delivers a rendered notification to its destination URL.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name for log lines.
    fn name(&self) -> &str;

    /// Deliver one notification. Failures are reported, never retried.
    async fn notify(&self, notification: &Notification) -> Result<(), DispatchError>;
}
