//! Raw message parsing: subject, date and readable body text.

use mail_parser::{HeaderName, MessageParser};
use tracing::warn;

use crate::pipeline::types::MessageContent;

/// Body used when the message cannot be parsed at all.
pub const UNPARSEABLE_BODY: &str = "There was an error when parsing the email";

/// Extract the notification-relevant parts of a raw RFC 5322 message.
///
/// Never fails: a message that cannot be parsed yields an explanatory body
/// and empty headers so it can still be routed.
pub fn parse_content(raw: &[u8]) -> MessageContent {
    let Some(parsed) = MessageParser::default().parse(raw) else {
        warn!(bytes = raw.len(), "Can't parse email");
        return MessageContent {
            body: UNPARSEABLE_BODY.to_string(),
            ..Default::default()
        };
    };

    let subject = parsed.subject().unwrap_or_default().to_string();
    let date = parsed
        .header_raw(HeaderName::Date)
        .map(|d| d.trim().to_string())
        .unwrap_or_default();
    let body = extract_text(&parsed);

    MessageContent {
        subject,
        date,
        body,
    }
}

/// First text part; HTML-only messages are converted to text by mail-parser.
fn extract_text(parsed: &mail_parser::Message) -> String {
    parsed
        .body_text(0)
        .map(|text| text.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_message() {
        let raw = b"From: monitor@host.lan\r\n\
To: ops@x.com\r\n\
Subject: Disk full\r\n\
Date: Mon, 2 Jan 2006 15:04:05 -0700\r\n\
\r\n\
/var is at 99%\r\n";
        let content = parse_content(raw);
        assert_eq!(content.subject, "Disk full");
        assert_eq!(content.date, "Mon, 2 Jan 2006 15:04:05 -0700");
        assert_eq!(content.body.trim_end(), "/var is at 99%");
    }

    #[test]
    fn decodes_encoded_subject() {
        let raw = b"Subject: =?UTF-8?B?SMOpbGxv?=\r\n\r\nbody\r\n";
        assert_eq!(parse_content(raw).subject, "H\u{e9}llo");
    }

    #[test]
    fn missing_headers_are_empty() {
        let raw = b"X-Custom: 1\r\n\r\njust text\r\n";
        let content = parse_content(raw);
        assert_eq!(content.subject, "");
        assert_eq!(content.date, "");
        assert_eq!(content.body.trim_end(), "just text");
    }

    #[test]
    fn picks_text_part_of_multipart() {
        let raw = b"Subject: multi\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
plain version\r\n\
--b1\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>html version</p>\r\n\
--b1--\r\n";
        assert_eq!(parse_content(raw).body.trim_end(), "plain version");
    }

    #[test]
    fn empty_input_has_no_headers() {
        let content = parse_content(b"");
        assert!(content.subject.is_empty());
        assert!(content.date.is_empty());
    }

    #[test]
    fn html_only_message_becomes_text() {
        let raw = b"Subject: html\r\n\
MIME-Version: 1.0\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Printer <b>offline</b></p>\r\n";
        let body = parse_content(raw).body;
        assert!(body.contains("Printer"));
        assert!(body.contains("offline"));
        assert!(!body.contains("<b>"));
    }
}
