use anyhow::Context;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use mail_junction::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config)?;

    eprintln!("📬 mail-junction v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   SMTP: {}", config.listen);
    eprintln!("   Apprise: {}", config.apprise_path.display());
    eprintln!("   Junctions: {}", config.junctions.len());

    if config.junctions.is_empty() {
        warn!("No junctions configured, every received email will be dropped");
    }

    mail_junction::serve(&config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Can't listen for Ctrl+C, stopping");
            return;
        }
        info!("Ctrl+C received, shutting down...");
    })
    .await?;

    Ok(())
}

/// Log to stdout, and to a daily rolling file when `log-dir` is set.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(config: &AppConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false);

    let Some(dir) = &config.log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout)
            .try_init()
            .context("Failed to initialise logging")?;
        return Ok(None);
    };

    let appender = tracing_appender::rolling::daily(dir, "mail-junction.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init()
        .context("Failed to initialise logging")?;
    Ok(Some(guard))
}
