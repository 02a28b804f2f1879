//! Notification templates.
//!
//! A deliberately small substitution language over the binding context of a
//! received message. Text is copied verbatim; actions are written `{{ ... }}`:
//!
//! - `{{ .Subject }}` (or `{{ Subject }}`) inserts a field
//! - `{{ index .RawTo 0 }}` inserts one recipient
//! - `{{ join .RawTo ", " }}` joins the recipients with a separator
//!
//! `{{- ` and ` -}}` trim the whitespace before/after the action.
//!
//! Templates are parsed when the configuration is loaded, so an unknown field
//! is rejected before the listener accepts any traffic.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::TemplateError;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*"|\S+"#).expect("valid token regex"));

/// A name available in the binding context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Subject,
    Body,
    To,
    From,
    Date,
    Ip,
    RawTo,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Subject,
        Field::Body,
        Field::To,
        Field::From,
        Field::Date,
        Field::Ip,
        Field::RawTo,
    ];

    /// Resolve a field reference, with or without the leading dot.
    pub fn parse(reference: &str) -> Option<Self> {
        let name = reference.strip_prefix('.').unwrap_or(reference);
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Subject => "Subject",
            Field::Body => "Body",
            Field::To => "To",
            Field::From => "From",
            Field::Date => "Date",
            Field::Ip => "IP",
            Field::RawTo => "RawTo",
        }
    }

    fn is_list(self) -> bool {
        matches!(self, Field::RawTo)
    }
}

/// Values exposed to templates for one message.
#[derive(Debug, Clone)]
pub struct Bindings<'a> {
    pub subject: &'a str,
    pub body: &'a str,
    /// Recipients joined with `,`.
    pub to: String,
    pub from: &'a str,
    pub date: &'a str,
    pub ip: &'a str,
    pub raw_to: &'a [String],
}

impl Bindings<'_> {
    fn text(&self, field: Field) -> String {
        match field {
            Field::Subject => self.subject.to_string(),
            Field::Body => self.body.to_string(),
            Field::To => self.to.clone(),
            Field::From => self.from.to_string(),
            Field::Date => self.date.to_string(),
            Field::Ip => self.ip.to_string(),
            Field::RawTo => format!("[{}]", self.raw_to.join(" ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Field),
    Index { field: Field, index: usize },
    Join { field: Field, separator: String },
}

/// A compiled template.
#[derive(Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Compile a template, rejecting unknown fields and malformed actions.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut pending = String::new();
        let mut trim_next = false;
        let mut cursor = 0;

        while let Some(offset) = source[cursor..].find("{{") {
            let start = cursor + offset;
            let end = action_end(source, start)?;
            let text = &source[cursor..start];
            let mut inner = &source[start + 2..end];

            pending.push_str(if trim_next { text.trim_start() } else { text });

            if let Some(rest) = inner.strip_prefix('-')
                && (rest.is_empty() || rest.starts_with(char::is_whitespace))
            {
                pending.truncate(pending.trim_end().len());
                inner = rest;
            }
            trim_next = false;
            if let Some(rest) = inner.strip_suffix('-')
                && rest.ends_with(char::is_whitespace)
            {
                trim_next = true;
                inner = rest;
            }

            if !pending.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut pending)));
            }
            segments.push(parse_action(inner, start)?);
            cursor = end + 2;
        }

        let tail = &source[cursor..];
        pending.push_str(if trim_next { tail.trim_start() } else { tail });
        if !pending.is_empty() {
            segments.push(Segment::Text(pending));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The text this template was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Render against the bindings of one message.
    pub fn render(&self, bindings: &Bindings<'_>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(field) => out.push_str(&bindings.text(*field)),
                Segment::Index { field, index } => {
                    let value = bindings.raw_to.get(*index).ok_or_else(|| {
                        TemplateError::IndexOutOfRange {
                            field: field.name().to_string(),
                            index: *index,
                            len: bindings.raw_to.len(),
                        }
                    })?;
                    out.push_str(value);
                }
                Segment::Join { separator, .. } => {
                    out.push_str(&bindings.raw_to.join(separator));
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Template").field(&self.source).finish()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Byte offset of the `}}` closing the action opened at `start`.
///
/// Braces inside a quoted argument belong to the argument.
fn action_end(source: &str, start: usize) -> Result<usize, TemplateError> {
    let bytes = source.as_bytes();
    let mut in_quote = false;
    let mut i = start + 2;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_quote => i += 1,
            b'"' => in_quote = !in_quote,
            b'{' if !in_quote && bytes.get(i + 1) == Some(&b'{') => {
                return Err(TemplateError::Unterminated { position: i });
            }
            b'}' if !in_quote && bytes.get(i + 1) == Some(&b'}') => return Ok(i),
            _ => {}
        }
        i += 1;
    }
    Err(TemplateError::Unterminated { position: start })
}

fn parse_action(inner: &str, position: usize) -> Result<Segment, TemplateError> {
    let tokens: Vec<&str> = TOKEN_RE.find_iter(inner).map(|m| m.as_str()).collect();

    match tokens.as_slice() {
        [] => Err(TemplateError::EmptyAction { position }),
        [reference] => Field::parse(reference)
            .map(Segment::Field)
            .ok_or_else(|| TemplateError::UnknownField {
                name: reference.to_string(),
            }),
        ["index", args @ ..] => {
            let [reference, index] = args else {
                return Err(TemplateError::BadArguments {
                    function: "index",
                    reason: format!("expected 2 arguments, got {}", args.len()),
                });
            };
            let field = list_field("index", reference)?;
            let index = index.parse().map_err(|_| TemplateError::BadArguments {
                function: "index",
                reason: format!("{index:?} is not a non-negative integer"),
            })?;
            Ok(Segment::Index { field, index })
        }
        ["join", args @ ..] => {
            let [reference, separator] = args else {
                return Err(TemplateError::BadArguments {
                    function: "join",
                    reason: format!("expected 2 arguments, got {}", args.len()),
                });
            };
            let field = list_field("join", reference)?;
            let separator = unquote(separator).ok_or_else(|| TemplateError::BadArguments {
                function: "join",
                reason: format!("separator {separator:?} must be a quoted string"),
            })?;
            Ok(Segment::Join { field, separator })
        }
        [name, ..] if name.starts_with('.') => Err(TemplateError::UnknownField {
            name: name.to_string(),
        }),
        [name, ..] => Err(TemplateError::UnknownFunction {
            name: name.to_string(),
        }),
    }
}

fn list_field(function: &'static str, reference: &str) -> Result<Field, TemplateError> {
    let field = Field::parse(reference).ok_or_else(|| TemplateError::UnknownField {
        name: reference.to_string(),
    })?;
    if !field.is_list() {
        return Err(TemplateError::NotAList {
            function,
            field: field.name().to_string(),
        });
    }
    Ok(field)
}

fn unquote(token: &str) -> Option<String> {
    let body = token.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(raw_to: &[String]) -> Bindings<'_> {
        Bindings {
            subject: "Disk full",
            body: "/var is at 99%",
            to: raw_to.join(","),
            from: "monitor@host.lan",
            date: "Mon, 2 Jan 2006 15:04:05 -0700",
            ip: "10.0.0.7",
            raw_to,
        }
    }

    fn render(source: &str, raw_to: &[String]) -> String {
        Template::parse(source)
            .unwrap()
            .render(&bindings(raw_to))
            .unwrap()
    }

    fn recipients() -> Vec<String> {
        vec!["ops@x.com".into(), "dev@x.com".into()]
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render("no actions here", &[]), "no actions here");
    }

    #[test]
    fn every_binding_resolves() {
        let to = recipients();
        assert_eq!(
            render(
                "{{.Subject}}|{{.Body}}|{{.To}}|{{.From}}|{{.Date}}|{{.IP}}|{{.RawTo}}",
                &to
            ),
            "Disk full|/var is at 99%|ops@x.com,dev@x.com|monitor@host.lan|Mon, 2 Jan 2006 15:04:05 -0700|10.0.0.7|[ops@x.com dev@x.com]"
        );
    }

    #[test]
    fn dot_is_optional_and_spaces_allowed() {
        assert_eq!(render("[{{ Subject }}] {{  .From  }}", &[]), "[Disk full] monitor@host.lan");
    }

    #[test]
    fn index_into_raw_recipients() {
        let to = recipients();
        assert_eq!(render("{{ index .RawTo 1 }}", &to), "dev@x.com");
    }

    #[test]
    fn index_out_of_range_is_a_render_error() {
        let template = Template::parse("{{ index .RawTo 3 }}").unwrap();
        let to = recipients();
        let err = template.render(&bindings(&to)).unwrap_err();
        assert_eq!(
            err,
            TemplateError::IndexOutOfRange {
                field: "RawTo".into(),
                index: 3,
                len: 2
            }
        );
    }

    #[test]
    fn join_with_quoted_separator() {
        let to = recipients();
        assert_eq!(render(r#"{{ join .RawTo "; " }}"#, &to), "ops@x.com; dev@x.com");
        assert_eq!(render(r#"{{ join .RawTo "\n" }}"#, &to), "ops@x.com\ndev@x.com");
    }

    #[test]
    fn trim_markers_eat_whitespace() {
        assert_eq!(render("a   {{- .IP -}}   b", &[]), "a10.0.0.7b");
    }

    #[test]
    fn unknown_field_is_rejected_at_parse() {
        assert_eq!(
            Template::parse("{{ .Sender }}").unwrap_err(),
            TemplateError::UnknownField {
                name: ".Sender".into()
            }
        );
        assert!(matches!(
            Template::parse("{{ subject }}"),
            Err(TemplateError::UnknownField { .. })
        ));
    }

    #[test]
    fn unknown_function_is_rejected_at_parse() {
        assert_eq!(
            Template::parse("{{ printf \"%s\" .Subject }}").unwrap_err(),
            TemplateError::UnknownFunction {
                name: "printf".into()
            }
        );
    }

    #[test]
    fn list_functions_require_the_list_field() {
        assert!(matches!(
            Template::parse("{{ index .To 0 }}"),
            Err(TemplateError::NotAList { function: "index", .. })
        ));
        assert!(matches!(
            Template::parse("{{ join .RawTo }}"),
            Err(TemplateError::BadArguments { function: "join", .. })
        ));
        assert!(matches!(
            Template::parse("{{ join .RawTo , }}"),
            Err(TemplateError::BadArguments { function: "join", .. })
        ));
        assert!(matches!(
            Template::parse("{{ index .RawTo first }}"),
            Err(TemplateError::BadArguments { function: "index", .. })
        ));
    }

    #[test]
    fn malformed_actions_are_rejected() {
        assert_eq!(
            Template::parse("hello {{ .Subject").unwrap_err(),
            TemplateError::Unterminated { position: 6 }
        );
        assert_eq!(
            Template::parse("{{ }}").unwrap_err(),
            TemplateError::EmptyAction { position: 0 }
        );
        assert!(matches!(
            Template::parse("{{ .Subject {{ .Body }}"),
            Err(TemplateError::Unterminated { .. })
        ));
    }

    #[test]
    fn closing_braces_inside_quotes_belong_to_the_argument() {
        assert_eq!(
            render(r#"{{ join .RawTo "}}" }}"#, &recipients()),
            "ops@x.com}}dev@x.com"
        );
        assert!(matches!(
            Template::parse(r#"{{ join .RawTo "}} }}"#),
            Err(TemplateError::Unterminated { position: 0 })
        ));
    }

    #[test]
    fn source_is_kept_for_diagnostics() {
        let template = Template::parse("alert: {{.Subject}}").unwrap();
        assert_eq!(template.source(), "alert: {{.Subject}}");
        assert_eq!(template.to_string(), "alert: {{.Subject}}");
        assert!(!template.is_empty());
    }
}
