//! SMTP session state machine.
//!
//! Pure and synchronous: the server feeds it command lines and DATA lines
//! and writes back whatever [`Reply`] it returns.

use std::fmt;

/// Longest accepted line in octets, CRLF included.
pub const MAX_LINE_LENGTH: usize = 1000;

/// Recipients accepted per transaction.
pub const MAX_RECIPIENTS: usize = 100;

// ── Replies ─────────────────────────────────────────────────────────

/// An SMTP reply, possibly spanning several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn ok() -> Self {
        Self::new(250, "OK")
    }

    pub fn line_too_long() -> Self {
        Self::new(500, "Line too long")
    }
}

impl fmt::Display for Reply {
    /// Wire form: `250-first\r\n250 last\r\n`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            write!(f, "{}{}{}\r\n", self.code, separator, line)?;
        }
        Ok(())
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Where the session is in the SMTP dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Connected, no HELO/EHLO yet.
    Connected,
    /// Greeted, no transaction open.
    Ready,
    /// MAIL accepted.
    Mail,
    /// At least one RCPT accepted.
    Recipients,
    /// Reading the message after DATA.
    Data,
}

/// What the server should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reply(Reply),
    /// Send the reply, then switch to reading message data.
    BeginData(Reply),
    /// Send the reply, then close the connection.
    Close(Reply),
}

/// Result of feeding one DATA line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLine {
    More,
    /// Terminating dot seen. The transaction is closed either way.
    Done(Result<ReceivedMail, Reply>),
}

/// A completed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMail {
    /// Reverse path as given, brackets included.
    pub from: String,
    /// Forward paths as given, in order.
    pub to: Vec<String>,
    /// Message bytes with dot-stuffing removed and CRLF line endings.
    pub data: Vec<u8>,
}

/// One client's SMTP session.
#[derive(Debug)]
pub struct Session {
    hostname: String,
    max_message_size: usize,
    state: State,
    from: String,
    to: Vec<String>,
    data: Vec<u8>,
    oversize: bool,
    long_line: bool,
}

impl Session {
    pub fn new(hostname: impl Into<String>, max_message_size: usize) -> Self {
        Self {
            hostname: hostname.into(),
            max_message_size,
            state: State::Connected,
            from: String::new(),
            to: Vec::new(),
            data: Vec::new(),
            oversize: false,
            long_line: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn in_data(&self) -> bool {
        self.state == State::Data
    }

    /// The 220 banner sent on connect.
    pub fn greeting(&self) -> Reply {
        Reply::new(220, format!("{} ESMTP mail-junction ready", self.hostname))
    }

    /// Handle one command line (CRLF already removed).
    pub fn command(&mut self, line: &str) -> Action {
        let line = line.trim();
        let (verb, args) = match line.split_once(char::is_whitespace) {
            Some((verb, args)) => (verb, args.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => Action::Reply(self.helo(args, false)),
            "EHLO" => Action::Reply(self.helo(args, true)),
            "MAIL" => Action::Reply(self.mail(args)),
            "RCPT" => Action::Reply(self.rcpt(args)),
            "DATA" => self.data(args),
            "RSET" => {
                self.reset();
                Action::Reply(Reply::ok())
            }
            "NOOP" => Action::Reply(Reply::ok()),
            "VRFY" => Action::Reply(Reply::new(
                252,
                "Cannot VRFY user, but will accept message and attempt delivery",
            )),
            "QUIT" => Action::Close(Reply::new(
                221,
                format!("{} closing connection", self.hostname),
            )),
            "" => Action::Reply(Reply::new(500, "Syntax error, command unrecognized")),
            _ => Action::Reply(Reply::new(502, "Command not implemented")),
        }
    }

    /// Feed one DATA line (CRLF already removed).
    pub fn data_line(&mut self, line: &[u8]) -> DataLine {
        if line == b"." {
            return DataLine::Done(self.finish_data());
        }

        let line = line.strip_prefix(b".").unwrap_or(line);
        if !self.oversize {
            if self.data.len() + line.len() + 2 > self.max_message_size {
                self.oversize = true;
                self.data = Vec::new();
            } else {
                self.data.extend_from_slice(line);
                self.data.extend_from_slice(b"\r\n");
            }
        }
        DataLine::More
    }

    /// Record that a DATA line exceeded [`MAX_LINE_LENGTH`]; the message
    /// is rejected once the terminating dot arrives.
    pub fn data_line_too_long(&mut self) {
        self.long_line = true;
    }

    fn helo(&mut self, args: &str, extended: bool) -> Reply {
        let verb = if extended { "EHLO" } else { "HELO" };
        if args.is_empty() {
            return Reply::new(501, format!("Syntax: {verb} hostname"));
        }
        self.clear_transaction();
        self.state = State::Ready;

        if extended {
            Reply::multiline(
                250,
                vec![
                    self.hostname.clone(),
                    "8BITMIME".to_string(),
                    format!("SIZE {}", self.max_message_size),
                ],
            )
        } else {
            Reply::new(250, self.hostname.clone())
        }
    }

    fn mail(&mut self, args: &str) -> Reply {
        match self.state {
            State::Connected => return Reply::new(503, "Send HELO/EHLO first"),
            State::Mail | State::Recipients => return Reply::new(503, "Nested MAIL command"),
            State::Ready | State::Data => {}
        }
        let Some((path, params)) = parse_path(args, "FROM:") else {
            return Reply::new(501, "Syntax: MAIL FROM:<address>");
        };

        for param in params.split_whitespace() {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if key.eq_ignore_ascii_case("SIZE") {
                match value.parse::<usize>() {
                    Ok(size) if size > self.max_message_size => {
                        return Reply::new(552, "Message size exceeds fixed maximum message size");
                    }
                    Ok(_) => {}
                    Err(_) => return Reply::new(501, "Syntax error in SIZE parameter"),
                }
            }
        }

        self.from = path.to_string();
        self.state = State::Mail;
        Reply::ok()
    }

    fn rcpt(&mut self, args: &str) -> Reply {
        if !matches!(self.state, State::Mail | State::Recipients) {
            return Reply::new(503, "Need MAIL command");
        }
        let Some((path, _)) = parse_path(args, "TO:") else {
            return Reply::new(501, "Syntax: RCPT TO:<address>");
        };
        if path.trim_matches(|c| c == '<' || c == '>').is_empty() {
            return Reply::new(501, "Empty recipient");
        }
        if self.to.len() >= MAX_RECIPIENTS {
            return Reply::new(452, "Too many recipients");
        }

        self.to.push(path.to_string());
        self.state = State::Recipients;
        Reply::ok()
    }

    fn data(&mut self, args: &str) -> Action {
        if self.state != State::Recipients {
            return Action::Reply(Reply::new(503, "Need RCPT command"));
        }
        if !args.is_empty() {
            return Action::Reply(Reply::new(501, "Syntax: DATA"));
        }
        self.state = State::Data;
        Action::BeginData(Reply::new(354, "End data with <CR><LF>.<CR><LF>"))
    }

    fn finish_data(&mut self) -> Result<ReceivedMail, Reply> {
        let result = if self.long_line {
            Err(Reply::line_too_long())
        } else if self.oversize {
            Err(Reply::new(
                552,
                "Message size exceeds fixed maximum message size",
            ))
        } else {
            Ok(ReceivedMail {
                from: std::mem::take(&mut self.from),
                to: std::mem::take(&mut self.to),
                data: std::mem::take(&mut self.data),
            })
        };
        self.reset();
        result
    }

    /// Abort any transaction, keeping the greeting.
    fn reset(&mut self) {
        self.clear_transaction();
        if self.state != State::Connected {
            self.state = State::Ready;
        }
    }

    fn clear_transaction(&mut self) {
        self.from.clear();
        self.to.clear();
        self.data.clear();
        self.oversize = false;
        self.long_line = false;
    }
}

/// Split `FROM:<a@b> SIZE=10` into the path and its parameters.
///
/// The keyword is matched case-insensitively and may be followed by
/// whitespace before the path.
fn parse_path<'a>(args: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let head = args.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = args[keyword.len()..].trim_start();
    if rest.is_empty() {
        return None;
    }

    if rest.starts_with('<') {
        let end = rest.find('>')? + 1;
        Some((&rest[..end], rest[end..].trim()))
    } else {
        match rest.split_once(char::is_whitespace) {
            Some((path, params)) => Some((path, params.trim())),
            None => Some((rest, "")),
        }
    }
}
