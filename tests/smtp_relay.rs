//! End-to-end tests for the SMTP listener and relay.
//!
//! Each test binds the real listener on a random local port with a recording
//! notifier, then talks to it with lettre or a raw TCP dialogue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::{Message, SmtpTransport, Transport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use mail_junction::config::AppConfig;
use mail_junction::dispatch::{Notification, Notifier};
use mail_junction::error::{DispatchError, SmtpError};
use mail_junction::pipeline::Relay;
use mail_junction::smtp::{SmtpConfig, SmtpServer};

/// Maximum time any step may take before the test is considered hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const CONFIG: &str = r#"
listen = "127.0.0.1"
port = 0
hostname = "relay.test"
max-message-size = 4096

[[junctions]]
name = "ops"
apprise = "json://hooks/{{ index .RawTo 0 }}"
to = { emails = ["ops@x.com"] }
title = "[{{ .From }}] {{ .Subject }}"

[[junctions]]
name = "printer"
apprise = "json://printer"
from = { email = "printer@x.com", ip = "127.0.0.1" }
body = "from {{ .IP }}: {{ .Body }}"
"#;

/// Notifier that forwards every notification to the test.
struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), DispatchError> {
        let _ = self.tx.send(notification.clone());
        Ok(())
    }
}

struct TestServer {
    addr: SocketAddr,
    notifications: mpsc::UnboundedReceiver<Notification>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), SmtpError>>,
}

async fn start_server() -> TestServer {
    let config = AppConfig::from_toml_str(CONFIG).unwrap();
    let (tx, notifications) = mpsc::unbounded_channel();
    let relay = Arc::new(Relay::new(
        Arc::new(config.junctions.clone()),
        Arc::new(ChannelNotifier { tx }),
    ));

    let server = SmtpServer::bind(config.listen, SmtpConfig::from(&config), relay)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(async {
        let _ = stopped.await;
    }));

    TestServer {
        addr,
        notifications,
        stop,
        handle,
    }
}

async fn next_notification(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
    timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("notification in time")
        .expect("channel open")
}

async fn send_with_lettre(addr: SocketAddr, email: Message) {
    let mailer = SmtpTransport::builder_dangerous(addr.ip().to_string())
        .port(addr.port())
        .build();
    tokio::task::spawn_blocking(move || mailer.send(&email))
        .await
        .unwrap()
        .unwrap();
}

// ── Raw dialogue helpers ────────────────────────────────────────────

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
        };
        client.expect(220).await;
        client
    }

    /// Read one (possibly multi-line) reply and return its lines.
    async fn reply(&mut self) -> (u16, Vec<String>) {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = timeout(TEST_TIMEOUT, self.reader.read_line(&mut line))
                .await
                .expect("reply in time")
                .unwrap();
            assert!(n > 0, "connection closed while waiting for a reply");
            let line = line.trim_end().to_string();
            let code = line[..3].parse().unwrap();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line[4.min(line.len())..].to_string());
            if last {
                return (code, lines);
            }
        }
    }

    async fn expect(&mut self, code: u16) -> Vec<String> {
        let (got, lines) = self.reply().await;
        assert_eq!(got, code, "unexpected reply {lines:?}");
        lines
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn command(&mut self, line: &str, code: u16) -> Vec<String> {
        self.send(line).await;
        self.expect(code).await
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn lettre_message_is_routed_and_rendered() {
    let mut server = start_server().await;

    let email = Message::builder()
        .from("Monitor <monitor@host.lan>".parse().unwrap())
        .to("ops@x.com".parse().unwrap())
        .subject("Disk full")
        .body(String::from("/var is at 99%"))
        .unwrap();
    send_with_lettre(server.addr, email).await;

    let n = next_notification(&mut server.notifications).await;
    assert_eq!(n.title, "[monitor@host.lan] Disk full");
    assert_eq!(n.body.trim_end(), "/var is at 99%");
    assert_eq!(n.url, "json://hooks/ops@x.com");
}

#[tokio::test]
async fn raw_dialogue_with_dot_stuffing() {
    let mut server = start_server().await;
    let mut client = Client::connect(server.addr).await;

    let ehlo = client.command("EHLO tester", 250).await;
    assert_eq!(ehlo, ["relay.test", "8BITMIME", "SIZE 4096"]);

    client.command("DATA", 503).await;
    client.command("XYZZY", 502).await;
    client.command("VRFY ops", 252).await;
    client.command("MAIL FROM:<printer@x.com>", 250).await;
    client.command("RCPT TO:<dev@x.com>", 250).await;
    client.command("DATA", 354).await;
    client.send("Subject: Toner low").await;
    client.send("").await;
    client.send("..cartridge").await;
    let queued = client.command(".", 250).await;
    assert!(queued[0].starts_with("OK: queued as "));
    client.command("QUIT", 221).await;

    let n = next_notification(&mut server.notifications).await;
    assert_eq!(n.title, "Toner low");
    assert_eq!(n.body.trim_end(), "from 127.0.0.1: .cartridge");
    assert_eq!(n.url, "json://printer");
}

#[tokio::test]
async fn unmatched_message_is_accepted_but_not_sent() {
    let mut server = start_server().await;
    let mut client = Client::connect(server.addr).await;

    client.command("HELO tester", 250).await;
    client.command("MAIL FROM:<someone@x.com>", 250).await;
    client.command("RCPT TO:<dev@x.com>", 250).await;
    client.command("DATA", 354).await;
    client.send("Subject: ignored").await;
    client.command(".", 250).await;

    client.command("MAIL FROM:<someone@x.com>", 250).await;
    client.command("RCPT TO:<ops@x.com>", 250).await;
    client.command("DATA", 354).await;
    client.send("Subject: routed").await;
    client.command(".", 250).await;
    client.command("QUIT", 221).await;

    let n = next_notification(&mut server.notifications).await;
    assert_eq!(n.title, "[someone@x.com] routed");
    assert!(server.notifications.try_recv().is_err());
}

#[tokio::test]
async fn oversized_message_is_rejected() {
    let server = start_server().await;
    let mut client = Client::connect(server.addr).await;

    client.command("EHLO tester", 250).await;
    client.command("MAIL FROM:<a@x.com> SIZE=999999", 552).await;
    client.command("MAIL FROM:<a@x.com>", 250).await;
    client.command("RCPT TO:<ops@x.com>", 250).await;
    client.command("DATA", 354).await;
    let line = "x".repeat(900);
    for _ in 0..6 {
        client.send(&line).await;
    }
    client.command(".", 552).await;

    // The session is still usable.
    client.command("NOOP", 250).await;
}

#[tokio::test]
async fn overlong_command_line_is_rejected() {
    let server = start_server().await;
    let mut client = Client::connect(server.addr).await;

    client.command(&format!("HELO {}", "a".repeat(1200)), 500).await;
    client.command("HELO tester", 250).await;
}

#[tokio::test]
async fn shutdown_closes_idle_sessions() {
    let server = start_server().await;
    let mut client = Client::connect(server.addr).await;
    client.command("HELO tester", 250).await;

    server.stop.send(()).unwrap();
    client.expect(421).await;

    let result = timeout(TEST_TIMEOUT, server.handle)
        .await
        .expect("listener stopped in time")
        .unwrap();
    assert!(result.is_ok());
}
