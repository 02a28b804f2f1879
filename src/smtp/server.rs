//! TCP listener and per-connection SMTP loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::SmtpError;
use crate::pipeline::{Envelope, InboundMessage, Outcome, Relay, parse_content};
use crate::smtp::session::{Action, DataLine, MAX_LINE_LENGTH, Reply, Session};

/// Default time a client may stay silent before it is disconnected.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Listener settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub hostname: String,
    pub max_message_size: usize,
    pub idle_timeout: Duration,
}

impl SmtpConfig {
    pub fn new(hostname: impl Into<String>, max_message_size: usize) -> Self {
        Self {
            hostname: hostname.into(),
            max_message_size,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

impl From<&AppConfig> for SmtpConfig {
    fn from(config: &AppConfig) -> Self {
        Self::new(config.hostname.clone(), config.max_message_size)
    }
}

/// SMTP receiver feeding a [`Relay`].
pub struct SmtpServer {
    listener: TcpListener,
    config: Arc<SmtpConfig>,
    relay: Arc<Relay>,
}

impl SmtpServer {
    pub async fn bind(
        addr: SocketAddr,
        config: SmtpConfig,
        relay: Arc<Relay>,
    ) -> Result<Self, SmtpError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SmtpError::Bind {
                address: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            relay,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SmtpError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves, then wait for open
    /// sessions and their deliveries to finish.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), SmtpError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        info!(address = %self.local_addr()?, "SMTP listener ready");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let config = Arc::clone(&self.config);
                        let relay = Arc::clone(&self.relay);
                        let stop = stop_rx.clone();
                        sessions.spawn(async move {
                            debug!(peer = %peer, "Connection opened");
                            if let Err(e) = handle_connection(stream, peer, config, relay, stop).await {
                                warn!(peer = %peer, error = %e, "SMTP session ended with error");
                            }
                            debug!(peer = %peer, "Connection closed");
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "SMTP session task failed");
                    }
                }
            }
        }

        let _ = stop_tx.send(true);
        if !sessions.is_empty() {
            info!(sessions = sessions.len(), "Waiting for open sessions");
        }
        while let Some(finished) = sessions.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "SMTP session task failed");
            }
        }
        info!("SMTP listener stopped");
        Ok(())
    }
}

// ── Connection ──────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<SmtpConfig>,
    relay: Arc<Relay>,
    stop: watch::Receiver<bool>,
) -> Result<(), SmtpError> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut deliveries = JoinSet::new();

    let result = serve(
        &mut reader,
        &mut writer,
        peer,
        &config,
        &relay,
        stop,
        &mut deliveries,
    )
    .await;

    while let Some(finished) = deliveries.join_next().await {
        log_delivery(finished);
    }
    result
}

async fn serve<R, W>(
    reader: &mut R,
    writer: &mut W,
    peer: SocketAddr,
    config: &SmtpConfig,
    relay: &Arc<Relay>,
    mut stop: watch::Receiver<bool>,
    deliveries: &mut JoinSet<Outcome>,
) -> Result<(), SmtpError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = Session::new(config.hostname.as_str(), config.max_message_size);
    let mut line = Vec::with_capacity(512);

    send(writer, &session.greeting()).await?;

    loop {
        let read = tokio::select! {
            read = tokio::time::timeout(config.idle_timeout, read_line(reader, &mut line)) => read,
            _ = stop.changed(), if !session.in_data() => {
                send(writer, &Reply::new(421, format!("{} shutting down", config.hostname))).await?;
                return Ok(());
            }
        };

        let read = match read {
            Ok(read) => read?,
            Err(_) => {
                send(writer, &Reply::new(421, "Idle timeout, closing connection")).await?;
                return Err(SmtpError::Timeout);
            }
        };

        match read {
            ReadLine::Eof => return Ok(()),
            ReadLine::TooLong if session.in_data() => session.data_line_too_long(),
            ReadLine::TooLong => send(writer, &Reply::line_too_long()).await?,
            ReadLine::Line if session.in_data() => {
                let DataLine::Done(result) = session.data_line(&line) else {
                    continue;
                };
                let reply = match result {
                    Ok(mail) => {
                        let message = InboundMessage::new(
                            Envelope::from_peer(peer.ip(), &mail.from, &mail.to),
                            parse_content(&mail.data),
                        );
                        let id = message.id;
                        let relay = Arc::clone(relay);
                        deliveries.spawn(async move { relay.handle(message).await });
                        Reply::new(250, format!("OK: queued as {id}"))
                    }
                    Err(reply) => reply,
                };
                send(writer, &reply).await?;
            }
            ReadLine::Line => {
                let command = String::from_utf8_lossy(&line);
                match session.command(&command) {
                    Action::Reply(reply) | Action::BeginData(reply) => send(writer, &reply).await?,
                    Action::Close(reply) => {
                        send(writer, &reply).await?;
                        return Ok(());
                    }
                }
            }
        }

        while let Some(finished) = deliveries.try_join_next() {
            log_delivery(finished);
        }
    }
}

fn log_delivery(finished: Result<Outcome, tokio::task::JoinError>) {
    match finished {
        Ok(outcome) => debug!(outcome = outcome.label(), "Delivery finished"),
        Err(e) => error!(error = %e, "Delivery task failed"),
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> Result<(), SmtpError> {
    writer.write_all(reply.to_string().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

// ── Line reading ────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ReadLine {
    /// A complete line is in the buffer, without its line ending.
    Line,
    /// The line exceeded [`MAX_LINE_LENGTH`] and was discarded.
    TooLong,
    Eof,
}

/// Read one line, never buffering more than [`MAX_LINE_LENGTH`] bytes.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<ReadLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader)
        .take(MAX_LINE_LENGTH as u64)
        .read_until(b'\n', buf)
        .await?;
    if n == 0 {
        return Ok(ReadLine::Eof);
    }

    if buf.last() != Some(&b'\n') {
        if n < MAX_LINE_LENGTH {
            // Connection closed mid-line.
            return Ok(ReadLine::Line);
        }
        discard_line(reader).await?;
        buf.clear();
        return Ok(ReadLine::TooLong);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(ReadLine::Line)
}

/// Skip input up to and including the next `\n`.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}
