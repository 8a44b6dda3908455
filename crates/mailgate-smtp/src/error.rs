//! Error types for the SMTP server engine.
//!
//! Two layers of failure exist. [`Error`] terminates the session: transport
//! failures, injected commands, timeouts. [`Rejection`] is a recoverable
//! protocol outcome that is answered with exactly one reply while the session
//! stays open.

use std::io;

use crate::types::{EnhancedCode, Reply, ReplyCode};

/// Result type alias for SMTP server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal or configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// A command line exceeded the configured limit.
    #[error("Line exceeds maximum length of {0} bytes")]
    LineTooLong(usize),

    /// The client queued more commands than the configured pipeline depth.
    #[error("Pipeline depth exceeded: more than {0} queued commands")]
    PipelineTooDeep(usize),

    /// Plaintext bytes followed STARTTLS before the handshake started.
    #[error("Command injection: {0} bytes buffered after STARTTLS")]
    CommandInjection(usize),

    /// A read, write or handshake did not finish before its deadline.
    #[error("Operation timed out")]
    Timeout,

    /// The TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// The configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Certificate or private key could not be loaded.
    #[error("Certificate error: {0}")]
    Certificate(String),
}

impl Error {
    /// Returns the failure class of this error.
    ///
    /// Everything but an over-long line ends the session.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::LineTooLong(_) => ErrorClass::Resource,
            _ => ErrorClass::FatalTransport,
        }
    }

    /// Returns true if the session must be closed after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::FatalTransport)
    }
}

/// Classification of protocol failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed command or argument (500/501/553/555).
    Syntax,
    /// Valid command issued out of order (503).
    Sequence,
    /// Command or parameter needs an extension that is not in effect (502/504).
    Capability,
    /// A configured limit was exceeded (452/500/552).
    Resource,
    /// A collaborator is temporarily unavailable (451).
    TransientExternal,
    /// A collaborator refused the recipient or message (550/554).
    Rejected,
    /// The connection is closed unilaterally.
    FatalTransport,
}

/// A recoverable protocol failure answered with a single reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// The verb is not known, or names an extension that was not negotiated.
    #[error("Command not recognized")]
    UnrecognizedCommand,

    /// The command line is not valid text.
    #[error("Syntax error")]
    MalformedCommand,

    /// The command arguments are malformed.
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// The command is not valid in the current state.
    #[error("Bad sequence of commands: {0}")]
    BadSequence(&'static str),

    /// A command was pipelined in a session that did not negotiate PIPELINING.
    #[error("Improper use of command pipelining")]
    ImproperPipelining,

    /// The verb is recognized but not implemented.
    #[error("Command not implemented")]
    NotImplemented,

    /// STARTTLS was requested but no TLS configuration is available.
    #[error("TLS not available")]
    TlsUnavailable,

    /// STARTTLS was requested on an already secure transport.
    #[error("TLS already active")]
    TlsAlreadyActive,

    /// A MAIL parameter needs an extension that was not negotiated.
    #[error("{0} parameter not supported")]
    ParameterNotImplemented(String),

    /// A MAIL or RCPT parameter keyword is unknown.
    #[error("Unrecognized parameter: {0}")]
    UnknownParameter(String),

    /// A non-ASCII address was given without SMTPUTF8.
    #[error("Non-ASCII address requires SMTPUTF8")]
    NonAsciiAddress,

    /// A command line exceeded the configured limit.
    #[error("Line too long")]
    LineTooLong,

    /// The declared or received message size exceeds the limit.
    #[error("Message size exceeds fixed maximum message size")]
    MessageTooLarge,

    /// The recipient cap for the transaction was reached.
    #[error("Too many recipients")]
    TooManyRecipients,

    /// The body carried 8-bit octets under a 7-bit body type.
    #[error("8-bit data not permitted in 7BIT body")]
    EightBitContent,

    /// The recipient was refused by the collaborator.
    #[error("Mailbox unavailable")]
    MailboxUnavailable(Option<String>),

    /// The message was refused by the collaborator.
    #[error("Transaction failed")]
    TransactionFailed(Option<String>),

    /// The collaborator failed temporarily.
    #[error("Requested action aborted: local error in processing")]
    Temporary(Option<String>),
}

impl Rejection {
    /// Returns the failure class of this rejection.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::UnrecognizedCommand
            | Self::MalformedCommand
            | Self::Syntax(_)
            | Self::UnknownParameter(_)
            | Self::NonAsciiAddress
            | Self::EightBitContent => ErrorClass::Syntax,
            Self::BadSequence(_) | Self::ImproperPipelining | Self::TlsAlreadyActive => {
                ErrorClass::Sequence
            }
            Self::NotImplemented | Self::TlsUnavailable | Self::ParameterNotImplemented(_) => {
                ErrorClass::Capability
            }
            Self::LineTooLong | Self::MessageTooLarge | Self::TooManyRecipients => {
                ErrorClass::Resource
            }
            Self::Temporary(_) => ErrorClass::TransientExternal,
            Self::MailboxUnavailable(_) | Self::TransactionFailed(_) => ErrorClass::Rejected,
        }
    }

    /// Returns the reply code for this rejection.
    #[must_use]
    pub const fn code(&self) -> ReplyCode {
        match self {
            Self::UnrecognizedCommand | Self::MalformedCommand | Self::LineTooLong => {
                ReplyCode::SYNTAX_ERROR
            }
            Self::Syntax(_) => ReplyCode::PARAMETER_ERROR,
            Self::BadSequence(_) | Self::ImproperPipelining | Self::TlsAlreadyActive => {
                ReplyCode::BAD_SEQUENCE
            }
            Self::NotImplemented | Self::TlsUnavailable => ReplyCode::NOT_IMPLEMENTED,
            Self::ParameterNotImplemented(_) => ReplyCode::PARAMETER_NOT_IMPLEMENTED,
            Self::UnknownParameter(_) => ReplyCode::PARAMETERS_NOT_RECOGNIZED,
            Self::NonAsciiAddress => ReplyCode::MAILBOX_NAME_INVALID,
            Self::MessageTooLarge => ReplyCode::EXCEEDED_STORAGE,
            Self::TooManyRecipients => ReplyCode::INSUFFICIENT_STORAGE,
            Self::EightBitContent | Self::TransactionFailed(_) => ReplyCode::TRANSACTION_FAILED,
            Self::MailboxUnavailable(_) => ReplyCode::MAILBOX_UNAVAILABLE,
            Self::Temporary(_) => ReplyCode::LOCAL_ERROR,
        }
    }

    /// Returns the enhanced status code for this rejection.
    #[must_use]
    pub const fn enhanced_code(&self) -> EnhancedCode {
        match self {
            Self::UnrecognizedCommand
            | Self::BadSequence(_)
            | Self::NotImplemented
            | Self::TlsUnavailable
            | Self::TlsAlreadyActive => EnhancedCode::INVALID_COMMAND,
            Self::MalformedCommand | Self::Syntax(_) => EnhancedCode::SYNTAX,
            Self::ImproperPipelining => EnhancedCode::PROTOCOL,
            Self::ParameterNotImplemented(_) | Self::UnknownParameter(_) => {
                EnhancedCode::INVALID_ARGUMENTS
            }
            Self::NonAsciiAddress => EnhancedCode::NON_ASCII_ADDRESS,
            Self::LineTooLong => EnhancedCode::LINE_TOO_LONG,
            Self::MessageTooLarge => EnhancedCode::MESSAGE_TOO_BIG,
            Self::TooManyRecipients => EnhancedCode::TOO_MANY_RECIPIENTS,
            Self::EightBitContent => EnhancedCode::MEDIA,
            Self::MailboxUnavailable(_) => EnhancedCode::BAD_MAILBOX,
            Self::TransactionFailed(_) => EnhancedCode::POLICY,
            Self::Temporary(_) => EnhancedCode::TEMPORARY_SYSTEM,
        }
    }

    /// Builds the reply sent to the client.
    ///
    /// Collaborator-supplied text replaces the default message.
    #[must_use]
    pub fn reply(&self) -> Reply {
        let text = match self {
            Self::MailboxUnavailable(Some(text))
            | Self::TransactionFailed(Some(text))
            | Self::Temporary(Some(text)) => text.clone(),
            other => other.to_string(),
        };
        Reply::enhanced(self.code(), self.enhanced_code(), text)
    }
}
