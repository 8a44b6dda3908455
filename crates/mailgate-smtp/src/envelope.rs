//! Envelope builder for one mail transaction.
//!
//! An [`Envelope`] is created by an accepted MAIL command, so the sender is
//! always present before the first recipient. Recipients are appended in
//! arrival order together with their outcome. A completed body turns the
//! envelope into a [`Message`] handed to the delivery collaborator.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::types::{BodyType, Mailbox, ReplyCode, ReversePath};

/// The transaction's sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Parsed reverse-path.
    pub path: ReversePath,
    /// The path exactly as received.
    pub raw: String,
    /// True if the sender requested SMTPUTF8 handling.
    pub utf8: bool,
}

/// Outcome of a RCPT command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientStatus {
    /// The recipient was accepted.
    Accepted,
    /// The recipient was refused with the given reply code.
    Rejected(ReplyCode),
}

/// A recipient together with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Parsed forward-path.
    pub mailbox: Mailbox,
    /// The path exactly as received.
    pub raw: String,
    /// Accept or reject status.
    pub status: RecipientStatus,
}

impl Recipient {
    /// Returns true if the recipient was accepted.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self.status, RecipientStatus::Accepted)
    }
}

/// An open mail transaction.
#[derive(Debug, Clone)]
pub struct Envelope {
    sender: Sender,
    recipients: Vec<Recipient>,
    accepted: usize,
    body_type: BodyType,
    declared_size: Option<usize>,
    received: usize,
}

impl Envelope {
    /// Opens a transaction for the given sender.
    #[must_use]
    pub const fn new(sender: Sender, body_type: BodyType, declared_size: Option<usize>) -> Self {
        Self {
            sender,
            recipients: Vec::new(),
            accepted: 0,
            body_type,
            declared_size,
            received: 0,
        }
    }

    /// Returns the sender.
    #[must_use]
    pub const fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Returns all recipients in arrival order.
    #[must_use]
    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Records a recipient and its outcome.
    pub fn add_recipient(&mut self, recipient: Recipient) {
        if recipient.is_accepted() {
            self.accepted += 1;
        }
        self.recipients.push(recipient);
    }

    /// Returns the number of accepted recipients.
    #[must_use]
    pub const fn accepted_count(&self) -> usize {
        self.accepted
    }

    /// Returns the number of RCPT commands recorded, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.recipients.len()
    }

    /// Returns the declared body type.
    #[must_use]
    pub const fn body_type(&self) -> BodyType {
        self.body_type
    }

    /// Returns the size announced with `SIZE=`, if any.
    #[must_use]
    pub const fn declared_size(&self) -> Option<usize> {
        self.declared_size
    }

    /// Returns true if body octets >= 0x80 are permitted.
    ///
    /// SMTPUTF8 implies 8BITMIME (RFC 6531 §3.1).
    #[must_use]
    pub const fn allows_8bit(&self) -> bool {
        self.body_type.allows_8bit() || self.sender.utf8
    }

    /// Returns the number of body octets received so far.
    #[must_use]
    pub const fn size_so_far(&self) -> usize {
        self.received
    }

    /// Updates the body size counter.
    pub const fn record_received(&mut self, received: usize) {
        self.received = received;
    }

    /// Completes the transaction with its decoded body.
    #[must_use]
    pub fn into_message(self, body: Bytes, peer: Option<SocketAddr>, secure: bool) -> Message {
        Message {
            sender: self.sender,
            recipients: self.recipients,
            body_type: self.body_type,
            body,
            peer,
            secure,
        }
    }
}

/// A completed transaction ready for delivery.
#[derive(Debug, Clone)]
pub struct Message {
    /// Sender.
    pub sender: Sender,
    /// Every recipient with its accept/reject status.
    pub recipients: Vec<Recipient>,
    /// Declared body type.
    pub body_type: BodyType,
    /// Decoded body octets.
    pub body: Bytes,
    /// Address of the client, when known.
    pub peer: Option<SocketAddr>,
    /// True if the body arrived over TLS.
    pub secure: bool,
}

impl Message {
    /// Returns the accepted recipients.
    pub fn accepted(&self) -> impl Iterator<Item = &Mailbox> {
        self.recipients
            .iter()
            .filter(|r| r.is_accepted())
            .map(|r| &r.mailbox)
    }
}
