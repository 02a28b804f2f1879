//! Junction types.

use std::borrow::Cow;
use std::sync::Arc;

use crate::junctions::matcher::select_junction;
use crate::pipeline::Envelope;
use crate::template::Template;

/// Recipient condition of a junction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToCondition {
    /// Addresses to look for among the envelope recipients. Empty matches anything.
    pub emails: Vec<String>,
    /// Every configured address must be present, instead of any one of them.
    pub require_all: bool,
}

impl ToCondition {
    pub fn any<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            emails: emails.into_iter().map(Into::into).collect(),
            require_all: false,
        }
    }

    pub fn all<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            require_all: true,
            ..Self::any(emails)
        }
    }
}

/// Sender condition of a junction. `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FromCondition {
    pub email: Option<String>,
    pub ip: Option<String>,
}

/// One routing policy.
#[derive(Debug, Clone)]
pub struct Junction {
    /// Optional name, only used in logs.
    pub name: Option<String>,
    /// Apprise destination URL template.
    pub apprise: Template,
    pub to: ToCondition,
    pub from: FromCondition,
    /// Notification title template; the subject is used when absent.
    pub title: Option<Template>,
    /// Notification body template; the message body is used when absent.
    pub body: Option<Template>,
}

impl Junction {
    /// An unconditional junction delivering to `apprise`.
    pub fn new(apprise: Template) -> Self {
        Self {
            name: None,
            apprise,
            to: ToCondition::default(),
            from: FromCondition::default(),
            title: None,
            body: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_to(mut self, to: ToCondition) -> Self {
        self.to = to;
        self
    }

    pub fn with_from(mut self, from: FromCondition) -> Self {
        self.from = from;
        self
    }

    pub fn with_title(mut self, title: Template) -> Self {
        self.title = Some(title);
        self
    }

    pub fn with_body(mut self, body: Template) -> Self {
        self.body = Some(body);
        self
    }

    /// Identifier for log lines: the name, or the position when unnamed.
    pub fn id(&self, index: usize) -> Cow<'_, str> {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => Cow::Borrowed(name),
            _ => Cow::Owned(index.to_string()),
        }
    }
}

/// The junction chosen for a message.
#[derive(Debug, Clone, Copy)]
pub struct Selected<'a> {
    pub index: usize,
    pub junction: &'a Junction,
}

impl Selected<'_> {
    pub fn id(&self) -> Cow<'_, str> {
        self.junction.id(self.index)
    }
}

/// The ordered, immutable junction list loaded at startup.
///
/// Order is priority. The set is shared read-only between connections.
#[derive(Debug, Clone, Default)]
pub struct JunctionSet {
    junctions: Arc<[Junction]>,
}

impl JunctionSet {
    pub fn new(junctions: Vec<Junction>) -> Self {
        Self {
            junctions: junctions.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.junctions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.junctions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Junction> {
        self.junctions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Junction> {
        self.junctions.get(index)
    }

    /// Select the first junction matching the envelope.
    pub fn select(&self, envelope: &Envelope) -> Option<Selected<'_>> {
        select_junction(
            &self.junctions,
            &envelope.to,
            &envelope.from,
            &envelope.source_ip,
        )
    }
}
