//! Shared types for the relay pipeline.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

// ── Envelope ────────────────────────────────────────────────────────

/// SMTP envelope of a received message, normalised once on entry.
///
/// Addresses are stored without their `<...>` decoration; matching and
/// templating both see the normalised form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Textual address of the sending peer.
    pub source_ip: String,
    /// `MAIL FROM` address.
    pub from: String,
    /// `RCPT TO` addresses, in the order received, duplicates kept.
    pub to: Vec<String>,
}

impl Envelope {
    pub fn new<I, S>(source_ip: impl Into<String>, from: &str, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            source_ip: source_ip.into(),
            from: strip_angle_brackets(from).to_string(),
            to: to
                .into_iter()
                .map(|addr| strip_angle_brackets(addr.as_ref()).to_string())
                .collect(),
        }
    }

    /// Envelope for a peer socket address. IPv4-mapped IPv6 peers are
    /// reported in their IPv4 form.
    pub fn from_peer<I, S>(peer: IpAddr, from: &str, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(peer.to_canonical().to_string(), from, to)
    }
}

/// Remove one enclosing `<` `>` pair and surrounding whitespace.
///
/// Unbalanced brackets are left alone.
pub fn strip_angle_brackets(address: &str) -> &str {
    let trimmed = address.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .map(str::trim)
        .unwrap_or(trimmed)
}

// ── Content ─────────────────────────────────────────────────────────

/// Header fields and text extracted from the raw message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContent {
    pub subject: String,
    /// The `Date` header as sent.
    pub date: String,
    pub body: String,
}

// ── Inbound message ─────────────────────────────────────────────────

/// One received message. Created per message and dropped once delivered.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Generated identifier used in log lines.
    pub id: Uuid,
    pub envelope: Envelope,
    pub content: MessageContent,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(envelope: Envelope, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            envelope,
            content,
            received_at: Utc::now(),
        }
    }
}

// ── Notification ────────────────────────────────────────────────────

/// A rendered notification, ready for the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Apprise destination URL.
    pub url: String,
}

// ── Outcome ─────────────────────────────────────────────────────────

/// What happened to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No junction matched; nothing was sent.
    NoMatch,
    /// Sent through the junction with this id.
    Dispatched { junction: String },
    /// A junction matched but delivery failed.
    DispatchFailed { junction: String, error: String },
}

impl Outcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::Dispatched { .. } => "dispatched",
            Self::DispatchFailed { .. } => "dispatch_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn strips_enclosing_brackets() {
        assert_eq!(strip_angle_brackets("<a@x.com>"), "a@x.com");
        assert_eq!(strip_angle_brackets("  <a@x.com> "), "a@x.com");
        assert_eq!(strip_angle_brackets("a@x.com"), "a@x.com");
        assert_eq!(strip_angle_brackets("<>"), "");
    }

    #[test]
    fn leaves_unbalanced_brackets() {
        assert_eq!(strip_angle_brackets("<a@x.com"), "<a@x.com");
        assert_eq!(strip_angle_brackets("a@x.com>"), "a@x.com>");
    }

    #[test]
    fn envelope_normalises_every_address() {
        let envelope = Envelope::new("1.2.3.4", "<s@x.com>", ["<a@x.com>", "b@x.com", "<a@x.com>"]);
        assert_eq!(envelope.from, "s@x.com");
        assert_eq!(envelope.to, ["a@x.com", "b@x.com", "a@x.com"]);
        assert_eq!(envelope.source_ip, "1.2.3.4");
    }

    #[test]
    fn envelope_from_peer_canonicalises_mapped_ipv4() {
        let mapped = IpAddr::V6(Ipv4Addr::new(10, 0, 0, 7).to_ipv6_mapped());
        let envelope = Envelope::from_peer(mapped, "", Vec::<String>::new());
        assert_eq!(envelope.source_ip, "10.0.0.7");

        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(Envelope::from_peer(v6, "", [""; 0]).source_ip, "::1");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(Outcome::NoMatch.label(), "no_match");
        assert_eq!(
            Outcome::Dispatched {
                junction: "0".into()
            }
            .label(),
            "dispatched"
        );
    }

    #[test]
    fn inbound_messages_get_distinct_ids() {
        let a = InboundMessage::new(Envelope::default(), MessageContent::default());
        let b = InboundMessage::new(Envelope::default(), MessageContent::default());
        assert_ne!(a.id, b.id);
    }
}
