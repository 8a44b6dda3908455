//! Replies written by the server: code, enhanced status and text lines.

use std::fmt;

/// SMTP reply sent to the client.
///
/// A reply is a three-digit code, an optional RFC 3463 enhanced status
/// code and one or more lines of text. The enhanced code is only written
/// when the session negotiated `ENHANCEDSTATUSCODES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit basic status.
    pub code: ReplyCode,
    /// Enhanced status code (e.g., 2.1.0).
    pub enhanced: Option<EnhancedCode>,
    /// Text, one entry per wire line.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a reply from prepared lines, without an enhanced code.
    #[must_use]
    pub const fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self {
            code,
            enhanced: None,
            message,
        }
    }

    /// Creates a reply from free text, splitting embedded line breaks so
    /// the text can never inject extra reply lines.
    #[must_use]
    pub fn text(code: ReplyCode, text: impl AsRef<str>) -> Self {
        let message = text
            .as_ref()
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        Self::new(code, message)
    }

    /// Creates a reply annotated with an enhanced status code.
    #[must_use]
    pub fn enhanced(code: ReplyCode, enhanced: EnhancedCode, text: impl AsRef<str>) -> Self {
        Self {
            enhanced: Some(enhanced),
            ..Self::text(code, text)
        }
    }

    /// Joins the text lines with `\n`.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// Encodes the reply for the wire.
    ///
    /// Multi-line replies use `-` after the code on every line but the last:
    /// `250-First line\r\n250 Last line\r\n`.
    #[must_use]
    pub fn encode(&self, with_enhanced: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        let prefix = self
            .enhanced
            .filter(|_| with_enhanced)
            .map(|code| code.to_string());

        let count = self.message.len().max(1);
        for index in 0..count {
            let line = self.message.get(index).map_or("", String::as_str);
            let separator = if index + 1 == count { ' ' } else { '-' };

            let text = match &prefix {
                Some(code) if line.is_empty() => code.clone(),
                Some(code) => format!("{code} {line}"),
                None => line.to_string(),
            };

            if text.is_empty() && separator == ' ' {
                buf.extend_from_slice(format!("{}\r\n", self.code).as_bytes());
            } else {
                buf.extend_from_slice(format!("{}{separator}{text}\r\n", self.code).as_bytes());
            }
        }

        buf
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.enhanced {
            Some(enhanced) => write!(f, "{} {} {}", self.code, enhanced, self.message_text()),
            None => write!(f, "{} {}", self.code, self.message_text()),
        }
    }
}

/// Basic status code of RFC 5321 section 4.2.
///
/// The first digit is the class: 2 success, 3 intermediate, 4 transient
/// failure, 5 permanent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Wraps a raw code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the reply class digit (2, 3, 4 or 5).
    #[must_use]
    pub const fn class(self) -> u16 {
        self.0 / 100
    }

    /// True for 4xx: the client may retry later.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.class() == 4
    }

    /// True for 5xx: the client must not retry unchanged.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.class() == 5
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl ReplyCode {
    /// Greeting and the go-ahead for STARTTLS.
    pub const SERVICE_READY: Self = Self(220);
    /// Answer to QUIT.
    pub const CLOSING: Self = Self(221);
    /// Command completed.
    pub const OK: Self = Self(250);
    /// Go-ahead for the DATA body.
    pub const START_DATA: Self = Self(354);
    /// The server is closing the connection.
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// Temporary local failure, usually a collaborator.
    pub const LOCAL_ERROR: Self = Self(451);
    /// Recipient limit reached for this transaction.
    pub const INSUFFICIENT_STORAGE: Self = Self(452);
    /// Unrecognized or malformed command line.
    pub const SYNTAX_ERROR: Self = Self(500);
    /// Bad arguments to a known command.
    pub const PARAMETER_ERROR: Self = Self(501);
    /// Known verb the server does not implement.
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// Command out of order.
    pub const BAD_SEQUENCE: Self = Self(503);
    /// Parameter of an extension that was not negotiated.
    pub const PARAMETER_NOT_IMPLEMENTED: Self = Self(504);
    /// Recipient refused.
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// Message larger than the configured maximum.
    pub const EXCEEDED_STORAGE: Self = Self(552);
    /// Address not acceptable, e.g. non-ASCII without SMTPUTF8.
    pub const MAILBOX_NAME_INVALID: Self = Self(553);
    /// Message refused.
    pub const TRANSACTION_FAILED: Self = Self(554);
    /// Unknown MAIL or RCPT parameter.
    pub const PARAMETERS_NOT_RECOGNIZED: Self = Self(555);
}

/// Enhanced mail system status code (RFC 3463), `class.subject.detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnhancedCode {
    class: u8,
    subject: u16,
    detail: u16,
}

impl EnhancedCode {
    /// Creates a new enhanced status code.
    #[must_use]
    pub const fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self {
            class,
            subject,
            detail,
        }
    }

    /// Returns the class digit (2, 4 or 5).
    #[must_use]
    pub const fn class(self) -> u8 {
        self.class
    }
}

impl fmt::Display for EnhancedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

// Enhanced codes used by the engine
impl EnhancedCode {
    /// 2.0.0 Other undefined status (success)
    pub const OK: Self = Self::new(2, 0, 0);
    /// 2.1.0 Originator address valid
    pub const SENDER_OK: Self = Self::new(2, 1, 0);
    /// 2.1.5 Destination address valid
    pub const RECIPIENT_OK: Self = Self::new(2, 1, 5);
    /// 2.6.0 Message accepted
    pub const MESSAGE_OK: Self = Self::new(2, 6, 0);
    /// 4.3.0 Other or undefined mail system status
    pub const TEMPORARY_SYSTEM: Self = Self::new(4, 3, 0);
    /// 4.4.2 Bad connection (timeout)
    pub const TIMEOUT: Self = Self::new(4, 4, 2);
    /// 4.5.3 Too many recipients
    pub const TOO_MANY_RECIPIENTS: Self = Self::new(4, 5, 3);
    /// 4.7.0 Other or undefined security status
    pub const SECURITY: Self = Self::new(4, 7, 0);
    /// 5.1.1 Bad destination mailbox address
    pub const BAD_MAILBOX: Self = Self::new(5, 1, 1);
    /// 5.3.4 Message too big for system
    pub const MESSAGE_TOO_BIG: Self = Self::new(5, 3, 4);
    /// 5.5.0 Other or undefined protocol status
    pub const PROTOCOL: Self = Self::new(5, 5, 0);
    /// 5.5.1 Invalid command
    pub const INVALID_COMMAND: Self = Self::new(5, 5, 1);
    /// 5.5.2 Syntax error
    pub const SYNTAX: Self = Self::new(5, 5, 2);
    /// 5.5.4 Invalid command arguments
    pub const INVALID_ARGUMENTS: Self = Self::new(5, 5, 4);
    /// 5.5.6 Authentication exchange line too long (used for any overlong line)
    pub const LINE_TOO_LONG: Self = Self::new(5, 5, 6);
    /// 5.6.0 Other or undefined media error
    pub const MEDIA: Self = Self::new(5, 6, 0);
    /// 5.6.7 Non-ASCII addresses not permitted
    pub const NON_ASCII_ADDRESS: Self = Self::new(5, 6, 7);
    /// 5.7.0 Other or undefined security status
    pub const POLICY: Self = Self::new(5, 7, 0);
}
