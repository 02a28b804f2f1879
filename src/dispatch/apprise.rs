//! Apprise CLI notifier.
//!
//! Runs `apprise -vv -t <title> -b <body> <url>` for every notification:
//! - Arguments passed directly, no shell involved
//! - Timeout enforcement, the child is killed when it expires
//! - Output capture and truncation for the logs

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::dispatch::{Notification, Notifier};
use crate::error::DispatchError;

/// Apprise output kept for logs and errors (16KB).
const MAX_OUTPUT_SIZE: usize = 16 * 1024;

/// Default delivery timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default Apprise overflow mode appended to every URL.
pub const DEFAULT_OVERFLOW: &str = "split";

/// Notifier backed by the Apprise command line tool.
#[derive(Debug, Clone)]
pub struct AppriseNotifier {
    /// Program to run; resolved through `PATH` when not absolute.
    program: PathBuf,
    timeout: Duration,
    /// Value of the `overflow` URL parameter, or `None` to leave URLs untouched.
    overflow: Option<String>,
}

impl AppriseNotifier {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
            overflow: Some(DEFAULT_OVERFLOW.to_string()),
        }
    }

    /// Set the delivery timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the overflow mode (`split`, `truncate`, `upstream`), or disable it.
    pub fn with_overflow(mut self, overflow: Option<String>) -> Self {
        self.overflow = overflow.filter(|o| !o.is_empty());
        self
    }

    /// Command line arguments for one notification.
    fn args(&self, notification: &Notification) -> Vec<String> {
        vec![
            "-vv".to_string(),
            "-t".to_string(),
            notification.title.clone(),
            "-b".to_string(),
            notification.body.clone(),
            with_overflow(&notification.url, self.overflow.as_deref()),
        ]
    }

    /// Run the program and return its combined output.
    pub async fn run(&self, notification: &Notification) -> Result<String, DispatchError> {
        let program = self.program.display().to_string();

        let mut command = Command::new(&self.program);
        command
            .args(self.args(notification))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(DispatchError::Spawn { program, source }),
            Err(_) => {
                return Err(DispatchError::Timeout {
                    program,
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.is_empty() {
            stdout.into_owned()
        } else if stdout.is_empty() {
            stderr.into_owned()
        } else {
            format!("{}\n\n--- stderr ---\n{}", stdout, stderr)
        };
        let combined = tail_of_output(&combined);

        if output.status.success() {
            Ok(combined)
        } else {
            Err(DispatchError::Failed {
                program,
                code: output.status.code().unwrap_or(-1),
                output: combined,
            })
        }
    }
}

impl Default for AppriseNotifier {
    fn default() -> Self {
        Self::new("apprise")
    }
}

#[async_trait]
impl Notifier for AppriseNotifier {
    fn name(&self) -> &str {
        "apprise"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), DispatchError> {
        let output = self.run(notification).await?;
        info!(title = %notification.title, "Notification sent");
        debug!(output = %output, "Apprise output");
        Ok(())
    }
}

/// Append the `overflow` query parameter to an Apprise URL.
pub fn with_overflow(url: &str, overflow: Option<&str>) -> String {
    match overflow {
        Some(mode) if !url.is_empty() => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}overflow={mode}")
        }
        _ => url.to_string(),
    }
}

/// Keep the last [`MAX_OUTPUT_SIZE`] bytes of Apprise output; its verdict
/// lines come last.
fn tail_of_output(output: &str) -> String {
    if output.len() <= MAX_OUTPUT_SIZE {
        return output.to_string();
    }
    let mut start = output.len() - MAX_OUTPUT_SIZE;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    format!("[{start} bytes omitted]\n{}", &output[start..])
}
