//! Spool-directory delivery.
//!
//! Each accepted message is written as `<timestamp>-<n>.eml` next to a
//! `<timestamp>-<n>.json` sidecar describing its envelope.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use chrono::{DateTime, Utc};
use mailgate_smtp::{
    Decision, Handler, HandlerError, Mailbox, Message, RecipientStatus, ReversePath, SessionSummary,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Envelope metadata stored next to each spooled message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    /// When the message was spooled.
    pub received: DateTime<Utc>,
    /// Reverse-path, `<>` for bounces.
    pub sender: String,
    /// Accepted recipients.
    pub recipients: Vec<String>,
    /// Recipients refused during the transaction, with their reply code.
    pub rejected: Vec<(String, u16)>,
    /// Declared body type.
    pub body_type: String,
    /// Body size in octets.
    pub size: usize,
    /// Client address, when known.
    pub peer: Option<String>,
    /// True if the message arrived over TLS.
    pub secure: bool,
}

impl Sidecar {
    fn describe(message: &Message, received: DateTime<Utc>) -> Self {
        let rejected = message
            .recipients
            .iter()
            .filter_map(|r| match r.status {
                RecipientStatus::Rejected(code) => Some((r.mailbox.to_string(), code.as_u16())),
                RecipientStatus::Accepted => None,
            })
            .collect();

        Self {
            received,
            sender: message.sender.path.to_string(),
            recipients: message.accepted().map(ToString::to_string).collect(),
            rejected,
            body_type: message.body_type.to_string(),
            size: message.body.len(),
            peer: message.peer.map(|addr| addr.to_string()),
            secure: message.secure,
        }
    }
}

/// Handler that accepts mail for local domains and writes it to disk.
#[derive(Debug)]
pub struct SpoolHandler {
    dir: PathBuf,
    local_domains: Vec<String>,
    sequence: AtomicU64,
}

impl SpoolHandler {
    /// Creates the spool directory if needed.
    pub async fn create(dir: impl Into<PathBuf>, local_domains: Vec<String>) -> anyhow::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating spool directory {}", dir.display()))?;

        Ok(Self {
            dir,
            local_domains,
            sequence: AtomicU64::new(0),
        })
    }

    /// Returns the spool directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_local(&self, mailbox: &Mailbox) -> bool {
        // Postmaster without a domain is always local.
        mailbox.domain().is_empty()
            || self.local_domains.is_empty()
            || self
                .local_domains
                .iter()
                .any(|domain| domain.eq_ignore_ascii_case(mailbox.domain()))
    }

    async fn write(&self, message: &Message) -> std::io::Result<PathBuf> {
        let received = Utc::now();
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        let stem = format!("{}-{n}", received.format("%Y%m%dT%H%M%S%.6fZ"));

        let sidecar = Sidecar::describe(message, received);
        let json = serde_json::to_vec_pretty(&sidecar)?;

        let eml = self.dir.join(format!("{stem}.eml"));
        tokio::fs::write(&eml, &message.body).await?;
        tokio::fs::write(self.dir.join(format!("{stem}.json")), json).await?;
        Ok(eml)
    }
}

impl Handler for SpoolHandler {
    async fn check_recipient(&self, _sender: &ReversePath, recipient: &Mailbox) -> Result<Decision, HandlerError> {
        if self.is_local(recipient) {
            Ok(Decision::accept())
        } else {
            debug!(%recipient, "Relaying denied");
            Ok(Decision::Reject(Some(format!("<{recipient}>: relay access denied"))))
        }
    }

    async fn deliver(&self, message: Message) -> Result<Decision, HandlerError> {
        match self.write(&message).await {
            Ok(path) => {
                info!(path = %path.display(), size = message.body.len(), "Message spooled");
                Ok(Decision::accept())
            }
            Err(err) => {
                warn!(%err, dir = %self.dir.display(), "Spool write failed");
                Err(HandlerError::Temporary(err.to_string()))
            }
        }
    }

    fn session_closed(&self, summary: &SessionSummary) {
        debug!(
            delivered = summary.delivered,
            failed = summary.failed,
            reason = %summary.reason,
            "Spool session finished"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use mailgate_smtp::{BodyType, Recipient, ReplyCode, Sender};

    fn message(body: &'static [u8]) -> Message {
        Message {
            sender: Sender {
                path: ReversePath::Mailbox(Mailbox::parse("alice@remote.example", false).unwrap()),
                raw: "<alice@remote.example>".into(),
                utf8: false,
            },
            recipients: vec![
                Recipient {
                    mailbox: Mailbox::parse("bob@example.com", false).unwrap(),
                    raw: "<bob@example.com>".into(),
                    status: RecipientStatus::Accepted,
                },
                Recipient {
                    mailbox: Mailbox::parse("eve@elsewhere.example", false).unwrap(),
                    raw: "<eve@elsewhere.example>".into(),
                    status: RecipientStatus::Rejected(ReplyCode::MAILBOX_UNAVAILABLE),
                },
            ],
            body_type: BodyType::EightBitMime,
            body: body.into(),
            peer: None,
            secure: true,
        }
    }

    #[tokio::test]
    async fn test_local_domains() {
        let dir = tempfile::tempdir().unwrap();
        let handler = SpoolHandler::create(dir.path(), vec!["Example.com".into()])
            .await
            .unwrap();
        let sender = ReversePath::Null;

        let local = Mailbox::parse("bob@example.COM", false).unwrap();
        let remote = Mailbox::parse("bob@remote.example", false).unwrap();
        assert_eq!(
            handler.check_recipient(&sender, &local).await.unwrap(),
            Decision::accept()
        );
        assert!(matches!(
            handler.check_recipient(&sender, &remote).await.unwrap(),
            Decision::Reject(Some(_))
        ));
        assert_eq!(
            handler.check_recipient(&sender, &Mailbox::postmaster()).await.unwrap(),
            Decision::accept()
        );
    }

    #[tokio::test]
    async fn test_empty_domain_list_accepts_everything() {
        let dir = tempfile::tempdir().unwrap();
        let handler = SpoolHandler::create(dir.path(), Vec::new()).await.unwrap();
        let anyone = Mailbox::parse("x@anywhere.example", false).unwrap();
        assert_eq!(
            handler.check_recipient(&ReversePath::Null, &anyone).await.unwrap(),
            Decision::accept()
        );
    }

    #[tokio::test]
    async fn test_deliver_writes_message_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let handler = SpoolHandler::create(dir.path().join("spool"), Vec::new())
            .await
            .unwrap();

        let decision = handler.deliver(message(b"Subject: hi\r\n\r\nhello\r\n")).await;
        assert_eq!(decision.unwrap(), Decision::accept());

        let mut entries: Vec<PathBuf> = std::fs::read_dir(handler.dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        entries.sort();
        assert_eq!(entries.len(), 2);

        let eml = entries.iter().find(|p| p.extension().unwrap() == "eml").unwrap();
        assert_eq!(std::fs::read(eml).unwrap(), b"Subject: hi\r\n\r\nhello\r\n");

        let json = entries.iter().find(|p| p.extension().unwrap() == "json").unwrap();
        let sidecar: Sidecar = serde_json::from_slice(&std::fs::read(json).unwrap()).unwrap();
        assert_eq!(sidecar.sender, "<alice@remote.example>");
        assert_eq!(sidecar.recipients, vec!["bob@example.com".to_string()]);
        assert_eq!(sidecar.rejected, vec![("eve@elsewhere.example".to_string(), 550)]);
        assert_eq!(sidecar.body_type, "8BITMIME");
        assert!(sidecar.secure);
    }

    #[tokio::test]
    async fn test_sequence_keeps_names_unique() {
        let dir = tempfile::tempdir().unwrap();
        let handler = SpoolHandler::create(dir.path(), Vec::new()).await.unwrap();
        for _ in 0..3 {
            handler.deliver(message(b"x\r\n")).await.unwrap();
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 6);
    }
}
