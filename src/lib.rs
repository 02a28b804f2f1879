//! mail-junction: receives email over SMTP and turns it into Apprise
//! notifications, routed by configurable junctions.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod junctions;
pub mod pipeline;
pub mod smtp;
pub mod template;

use std::future::Future;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::dispatch::AppriseNotifier;
use crate::error::SmtpError;
use crate::pipeline::Relay;
use crate::smtp::{SmtpConfig, SmtpServer};

/// Wire the Apprise notifier, relay and listener from `config`, then serve
/// until `shutdown` resolves.
pub async fn serve(config: &AppConfig, shutdown: impl Future<Output = ()>) -> Result<(), SmtpError> {
    let notifier = AppriseNotifier::new(config.apprise_path.clone())
        .with_timeout(config.apprise_timeout)
        .with_overflow(config.overflow.clone());
    let relay = Arc::new(Relay::new(
        Arc::new(config.junctions.clone()),
        Arc::new(notifier),
    ));

    let server = SmtpServer::bind(config.listen, SmtpConfig::from(config), relay).await?;
    server.run(shutdown).await
}
