//! Inbound SMTP listener.
//!
//! A minimal RFC 5321 receiver: no authentication, no TLS, no relaying.
//! Every accepted message is handed to the [`Relay`](crate::pipeline::Relay)
//! on its own task after the client has been answered.

pub mod server;
pub mod session;

pub use server::{SmtpConfig, SmtpServer};
pub use session::{Reply, Session};
