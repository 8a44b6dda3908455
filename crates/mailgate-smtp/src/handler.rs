//! Collaborator interface for recipient validation and delivery.
//!
//! The engine owns the protocol; everything that decides *whether* mail is
//! wanted lives behind [`Handler`]. Calls are awaited inline, so a session
//! never processes its next command before the decision is known.

use std::future::Future;

use crate::envelope::Message;
use crate::error::Rejection;
use crate::session::SessionSummary;
use crate::types::{Mailbox, ReversePath};

/// A collaborator's verdict on a recipient or a completed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Accept, optionally replacing the reply text.
    Accept(Option<String>),
    /// Reject permanently, optionally replacing the reply text.
    Reject(Option<String>),
}

impl Decision {
    /// Accept with the default reply text.
    #[must_use]
    pub const fn accept() -> Self {
        Self::Accept(None)
    }

    /// Reject with the default reply text.
    #[must_use]
    pub const fn reject() -> Self {
        Self::Reject(None)
    }
}

/// Collaborator failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// The collaborator is temporarily unable to decide. Answered with 451.
    #[error("temporary failure: {0}")]
    Temporary(String),
    /// The collaborator failed permanently. Answered with 554.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// Converts the failure into the reply sent to the client.
    ///
    /// Internal detail stays in the logs.
    #[must_use]
    pub const fn rejection(&self) -> Rejection {
        match self {
            Self::Temporary(_) => Rejection::Temporary(None),
            Self::Permanent(_) => Rejection::TransactionFailed(None),
        }
    }
}

/// Recipient validation and message delivery.
pub trait Handler: Send + Sync + 'static {
    /// Decides whether a recipient is accepted for the given sender.
    fn check_recipient(
        &self,
        sender: &ReversePath,
        recipient: &Mailbox,
    ) -> impl Future<Output = Result<Decision, HandlerError>> + Send;

    /// Takes responsibility for a completed message.
    ///
    /// The reply to DATA or the last BDAT is sent only after this resolves.
    fn deliver(&self, message: Message) -> impl Future<Output = Result<Decision, HandlerError>> + Send;

    /// Called once when a session ends, whatever the reason.
    fn session_closed(&self, summary: &SessionSummary) {
        let _ = summary;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::types::ReplyCode;

    #[test]
    fn test_handler_errors_map_to_replies() {
        let temporary = HandlerError::Temporary("database offline".into()).rejection();
        assert_eq!(temporary.code(), ReplyCode::LOCAL_ERROR);
        assert!(!temporary.reply().message_text().contains("database"));

        let permanent = HandlerError::Permanent("disk full".into()).rejection();
        assert_eq!(permanent.code(), ReplyCode::TRANSACTION_FAILED);
    }

    #[test]
    fn test_decision_constructors() {
        assert_eq!(Decision::accept(), Decision::Accept(None));
        assert_eq!(Decision::reject(), Decision::Reject(None));
    }
}
