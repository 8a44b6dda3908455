//! SMTP command parsing.
//!
//! The reader hands over raw CRLF-stripped lines; this module splits them
//! into a [`Verb`] and its argument text. Argument grammar for MAIL, RCPT,
//! BDAT and HELO/EHLO lives in [`params`].

pub mod params;

use std::fmt;

use crate::connection::Line;
use crate::error::Rejection;
use crate::types::Extension;

pub use params::{BdatArgs, MailArgs, MailParameters, RcptArgs};

/// Command verbs known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// HELO: plain RFC 821 greeting, no extensions
    Helo,
    /// EHLO: greeting that negotiates extensions
    Ehlo,
    /// MAIL FROM: opens a transaction
    Mail,
    /// RCPT TO: names one recipient
    Rcpt,
    /// DATA: dot-terminated body follows
    Data,
    /// BDAT - Binary data chunk (RFC 3030)
    Bdat,
    /// RSET: abandons the transaction
    Rset,
    /// NOOP
    Noop,
    /// QUIT: ends the session
    Quit,
    /// STARTTLS - Upgrade to TLS (RFC 3207)
    StartTls,
    /// AUTH - Recognized, not implemented
    Auth,
    /// VRFY - Recognized, not implemented
    Vrfy,
    /// EXPN - Recognized, not implemented
    Expn,
    /// HELP - Recognized, not implemented
    Help,
    /// TURN - Recognized, not implemented
    Turn,
    /// ETRN - Recognized, not implemented
    Etrn,
    /// Anything else
    Unknown,
}

impl Verb {
    /// Every verb, in declaration order.
    pub const ALL: [Self; 17] = [
        Self::Helo,
        Self::Ehlo,
        Self::Mail,
        Self::Rcpt,
        Self::Data,
        Self::Bdat,
        Self::Rset,
        Self::Noop,
        Self::Quit,
        Self::StartTls,
        Self::Auth,
        Self::Vrfy,
        Self::Expn,
        Self::Help,
        Self::Turn,
        Self::Etrn,
        Self::Unknown,
    ];

    /// Parses a verb, ignoring ASCII case.
    #[must_use]
    pub fn parse(word: &str) -> Self {
        match word.to_ascii_uppercase().as_str() {
            "HELO" => Self::Helo,
            "EHLO" => Self::Ehlo,
            "MAIL" => Self::Mail,
            "RCPT" => Self::Rcpt,
            "DATA" => Self::Data,
            "BDAT" => Self::Bdat,
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "QUIT" => Self::Quit,
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth,
            "VRFY" => Self::Vrfy,
            "EXPN" => Self::Expn,
            "HELP" => Self::Help,
            "TURN" => Self::Turn,
            "ETRN" => Self::Etrn,
            _ => Self::Unknown,
        }
    }

    /// Returns the verb as it appears on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
            Self::Mail => "MAIL",
            Self::Rcpt => "RCPT",
            Self::Data => "DATA",
            Self::Bdat => "BDAT",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::StartTls => "STARTTLS",
            Self::Auth => "AUTH",
            Self::Vrfy => "VRFY",
            Self::Expn => "EXPN",
            Self::Help => "HELP",
            Self::Turn => "TURN",
            Self::Etrn => "ETRN",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns the extension a session must have negotiated to use this verb.
    #[must_use]
    pub const fn extension(self) -> Option<Extension> {
        match self {
            Self::Bdat => Some(Extension::Chunking),
            Self::StartTls => Some(Extension::StartTls),
            _ => None,
        }
    }

    /// Returns true if the verb is accepted pipelined even without PIPELINING.
    ///
    /// RSET, NOOP and QUIT never change what an earlier reply means
    /// (RFC 2920 §3.1).
    #[must_use]
    pub const fn may_end_pipeline(self) -> bool {
        matches!(self, Self::Rset | Self::Noop | Self::Quit)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command verb.
    pub verb: Verb,
    /// Argument text after the verb, trailing whitespace removed.
    pub args: String,
    /// Offset of the line in the connection's byte stream.
    pub offset: u64,
    /// True if the line was already buffered before the previous reply was sent.
    pub pipelined: bool,
}

impl Command {
    /// Parses a command from a line read off the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::MalformedCommand`] if the line is not valid UTF-8
    /// or contains control characters.
    pub fn parse(line: &Line) -> Result<Self, Rejection> {
        let text = std::str::from_utf8(&line.bytes).map_err(|_| Rejection::MalformedCommand)?;
        if text.chars().any(|c| c.is_control() && c != '\t') {
            return Err(Rejection::MalformedCommand);
        }

        let text = text.trim_end();
        let (word, args) = text.split_once(' ').unwrap_or((text, ""));

        Ok(Self {
            verb: Verb::parse(word),
            args: args.to_string(),
            offset: line.offset,
            pipelined: line.pipelined,
        })
    }

    /// Returns true if the command carries no arguments.
    #[must_use]
    pub fn has_no_args(&self) -> bool {
        self.args.trim().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn line(text: &[u8]) -> Line {
        Line {
            bytes: Bytes::copy_from_slice(text),
            offset: 42,
            pipelined: true,
        }
    }

    #[test]
    fn parse_verb_case_insensitive() {
        assert_eq!(Verb::parse("ehlo"), Verb::Ehlo);
        assert_eq!(Verb::parse("StartTLS"), Verb::StartTls);
        assert_eq!(Verb::parse("XCLIENT"), Verb::Unknown);
        assert_eq!(Verb::parse(""), Verb::Unknown);
    }

    #[test]
    fn verbs_round_trip() {
        for verb in Verb::ALL.into_iter().filter(|v| *v != Verb::Unknown) {
            assert_eq!(Verb::parse(verb.as_str()), verb);
        }
    }

    #[test]
    fn only_neutral_verbs_may_end_a_pipeline() {
        let neutral: Vec<_> = Verb::ALL.into_iter().filter(|v| v.may_end_pipeline()).collect();
        assert_eq!(neutral, [Verb::Rset, Verb::Noop, Verb::Quit]);
    }

    #[test]
    fn extension_verbs() {
        assert_eq!(Verb::Bdat.extension(), Some(Extension::Chunking));
        assert_eq!(Verb::StartTls.extension(), Some(Extension::StartTls));
        assert_eq!(Verb::Mail.extension(), None);
    }

    #[test]
    fn parse_command_with_args() {
        let command = Command::parse(&line(b"MAIL FROM:<a@b.example> SIZE=10")).unwrap();
        assert_eq!(command.verb, Verb::Mail);
        assert_eq!(command.args, "FROM:<a@b.example> SIZE=10");
        assert_eq!(command.offset, 42);
        assert!(command.pipelined);
    }

    #[test]
    fn parse_command_without_args() {
        let command = Command::parse(&line(b"DATA  ")).unwrap();
        assert_eq!(command.verb, Verb::Data);
        assert!(command.has_no_args());
    }

    #[test]
    fn parse_rejects_invalid_utf8() {
        assert_eq!(
            Command::parse(&line(b"MAIL FROM:<\xff@b>")),
            Err(Rejection::MalformedCommand)
        );
    }

    #[test]
    fn parse_rejects_embedded_control_characters() {
        assert_eq!(
            Command::parse(&line(b"NOOP \x00")),
            Err(Rejection::MalformedCommand)
        );
    }

    #[test]
    fn parse_accepts_utf8_arguments() {
        let command = Command::parse(&line("RCPT TO:<josé@example.com>".as_bytes())).unwrap();
        assert_eq!(command.verb, Verb::Rcpt);
        assert_eq!(command.args, "TO:<josé@example.com>");
    }
}
