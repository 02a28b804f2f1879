//! Notification composition: title, body and destination from a junction's templates.

use tracing::error;

use crate::junctions::Selected;
use crate::pipeline::types::{InboundMessage, Notification};
use crate::template::{Bindings, Template};

/// Build the template bindings for a message.
pub fn bindings(message: &InboundMessage) -> Bindings<'_> {
    Bindings {
        subject: &message.content.subject,
        body: &message.content.body,
        to: message.envelope.to.join(","),
        from: &message.envelope.from,
        date: &message.content.date,
        ip: &message.envelope.source_ip,
        raw_to: &message.envelope.to,
    }
}

/// Render the notification for a message routed through `selected`.
///
/// Without a title or body template the raw subject or body is used. A field
/// whose template fails to render is logged and left empty; the other fields
/// are still rendered.
pub fn compose(message: &InboundMessage, selected: Selected<'_>) -> Notification {
    let bindings = bindings(message);
    let junction = selected.junction;

    let title = match &junction.title {
        Some(template) if !template.is_empty() => {
            render_field(template, &bindings, message, selected, "title")
        }
        _ => message.content.subject.clone(),
    };

    let body = match &junction.body {
        Some(template) if !template.is_empty() => {
            render_field(template, &bindings, message, selected, "body")
        }
        _ => message.content.body.clone(),
    };

    let url = render_field(&junction.apprise, &bindings, message, selected, "apprise");

    Notification { title, body, url }
}

fn render_field(
    template: &Template,
    bindings: &Bindings<'_>,
    message: &InboundMessage,
    selected: Selected<'_>,
    field: &'static str,
) -> String {
    template.render(bindings).unwrap_or_else(|e| {
        error!(
            id = %message.id,
            junction = %selected.id(),
            field,
            template = %template,
            error = %e,
            "Can't render template"
        );
        String::new()
    })
}
