//! Command handlers for greeting, transaction and transport commands.

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::engine::Reader;
use super::{Engine, Flow, Session, State};
use crate::body::BodyDecoder;
use crate::capability::Negotiated;
use crate::command::{Command, MailParameters, params};
use crate::connection::{Deadline, Upgrader};
use crate::envelope::{Envelope, Recipient, RecipientStatus, Sender};
use crate::error::{Error, Rejection, Result};
use crate::handler::{Decision, Handler};
use crate::types::{BodyType, EnhancedCode, Extension, Reply, ReplyCode};

type Outcome = std::result::Result<Reply, Rejection>;

/// RCPT commands recorded per transaction, as a multiple of `max_recipients`.
const RCPT_ATTEMPT_FACTOR: usize = 2;

impl<H: Handler, U: Upgrader> Engine<H, U> {
    pub(super) fn helo(&self, session: &mut Session, command: &Command) -> Outcome {
        let identity = params::parse_helo_argument(&command.args)?;

        session.reset_transaction();
        session.negotiated = Negotiated::helo();
        session.peer_identity = Some(identity);
        session.state = State::Greeted;

        Ok(Reply::text(ReplyCode::OK, &self.config.hostname))
    }

    pub(super) fn ehlo(&self, session: &mut Session, command: &Command) -> Outcome {
        let identity = params::parse_helo_argument(&command.args)?;

        session.reset_transaction();
        session.negotiated = Negotiated::ehlo(self.registry.eligible(session.secure));

        let mut lines = vec![format!("{} greets {identity}", self.config.hostname)];
        lines.extend(session.negotiated.extensions().iter().map(ToString::to_string));

        debug!(
            identity = %identity,
            extensions = session.negotiated.extensions().len(),
            "Extended session negotiated"
        );
        session.peer_identity = Some(identity);
        session.state = State::Greeted;

        Ok(Reply::new(ReplyCode::OK, lines))
    }

    pub(super) fn mail(&self, session: &mut Session, command: &Command) -> Outcome {
        let negotiated = &session.negotiated;
        let args = params::parse_mail(&command.args, negotiated.offers(&Extension::SmtpUtf8))?;
        let MailParameters {
            size,
            body,
            smtputf8,
        } = args.params;

        if size.is_some() && !negotiated.offers(&Extension::Size(None)) {
            return Err(Rejection::ParameterNotImplemented("SIZE".into()));
        }
        if let Some(body) = body {
            // BODY=7BIT is itself part of 8BITMIME.
            let required = body.required_extension().unwrap_or(Extension::EightBitMime);
            if !negotiated.offers(&required) {
                return Err(Rejection::ParameterNotImplemented(format!("BODY={body}")));
            }
        }
        if smtputf8 && !negotiated.offers(&Extension::SmtpUtf8) {
            return Err(Rejection::ParameterNotImplemented("SMTPUTF8".into()));
        }
        if size.is_some_and(|size| size > self.config.max_message_size) {
            return Err(Rejection::MessageTooLarge);
        }

        let text = format!("Sender {} OK", args.raw);
        debug!(sender = %args.path, ?size, ?body, smtputf8, "Transaction opened");

        let sender = Sender {
            path: args.path,
            raw: args.raw,
            utf8: smtputf8,
        };
        session.envelope = Some(Envelope::new(sender, body.unwrap_or_default(), size));
        session.state = State::HaveSender;

        Ok(Reply::enhanced(ReplyCode::OK, EnhancedCode::SENDER_OK, text))
    }

    pub(super) async fn rcpt(&self, session: &mut Session, command: &Command) -> Outcome {
        let args = params::parse_rcpt(&command.args, session.negotiated.offers(&Extension::SmtpUtf8))?;
        let Some(envelope) = session.envelope.as_mut() else {
            return Err(Rejection::BadSequence("need MAIL before RCPT"));
        };

        // Refused recipients are kept too, so the total is bounded separately.
        let attempts_exhausted =
            envelope.attempts() >= self.config.max_recipients.saturating_mul(RCPT_ATTEMPT_FACTOR);
        if attempts_exhausted || envelope.accepted_count() >= self.config.max_recipients {
            if !attempts_exhausted {
                envelope.add_recipient(Recipient {
                    mailbox: args.mailbox,
                    raw: args.raw,
                    status: RecipientStatus::Rejected(ReplyCode::INSUFFICIENT_STORAGE),
                });
            }
            return Err(Rejection::TooManyRecipients);
        }

        let verdict = self
            .handler
            .check_recipient(&envelope.sender().path, &args.mailbox)
            .await;
        let outcome = match verdict {
            Ok(Decision::Accept(text)) => {
                Ok(text.unwrap_or_else(|| format!("Recipient {} OK", args.raw)))
            }
            Ok(Decision::Reject(text)) => Err(Rejection::MailboxUnavailable(text)),
            Err(err) => {
                warn!(%err, recipient = %args.mailbox, "Recipient check failed");
                Err(err.rejection())
            }
        };

        let status = match &outcome {
            Ok(_) => RecipientStatus::Accepted,
            Err(rejection) => RecipientStatus::Rejected(rejection.code()),
        };
        debug!(recipient = %args.mailbox, ?status, "Recipient evaluated");
        envelope.add_recipient(Recipient {
            mailbox: args.mailbox,
            raw: args.raw,
            status,
        });

        let text = outcome?;
        session.state = State::HaveRecipient;
        Ok(Reply::enhanced(ReplyCode::OK, EnhancedCode::RECIPIENT_OK, text))
    }

    pub(super) fn rset(&self, session: &mut Session, command: &Command) -> Outcome {
        if !command.has_no_args() {
            return Err(Rejection::Syntax("RSET takes no arguments".into()));
        }
        if session.envelope.is_some() {
            debug!("Transaction discarded");
        }
        session.reset_transaction();
        Ok(Reply::enhanced(ReplyCode::OK, EnhancedCode::OK, "OK"))
    }

    pub(super) async fn data(&self, session: &mut Session, reader: &mut Reader, command: &Command) -> Result<Flow> {
        if !command.has_no_args() {
            let rejection = Rejection::Syntax("DATA takes no arguments".into());
            self.refuse(session, reader, rejection).await?;
            return Ok(Flow::Continue);
        }

        let (allow_8bit, binary) = match session.envelope.as_ref() {
            Some(envelope) => (
                envelope.allows_8bit(),
                envelope.body_type() == BodyType::BinaryMime,
            ),
            None => (false, false),
        };
        if binary {
            let rejection = Rejection::BadSequence("BODY=BINARYMIME requires BDAT");
            self.refuse(session, reader, rejection).await?;
            return Ok(Flow::Continue);
        }

        let start = Reply::text(ReplyCode::START_DATA, "End data with <CR><LF>.<CR><LF>");
        self.send(session, reader, &start).await?;
        session.state = State::ReceivingBody;

        let mut decoder = BodyDecoder::dotted(allow_8bit, self.config.max_message_size);
        Deadline::after(self.config.data_timeout)
            .run(reader.read_body(&mut decoder))
            .await?;

        let Some(mut envelope) = session.envelope.take() else {
            session.reset_transaction();
            self.refuse(session, reader, Rejection::BadSequence("need MAIL before DATA"))
                .await?;
            return Ok(Flow::Continue);
        };
        envelope.record_received(decoder.received());
        self.complete(session, reader, envelope, decoder.finish()).await
    }

    pub(super) async fn bdat(&self, session: &mut Session, reader: &mut Reader, command: &Command) -> Result<Flow> {
        let args = match params::parse_bdat(&command.args) {
            Ok(args) => args,
            Err(rejection) => {
                self.refuse(session, reader, rejection).await?;
                return Ok(Flow::Continue);
            }
        };

        let Some(envelope) = session.envelope.as_ref() else {
            Deadline::after(self.config.data_timeout)
                .run(reader.read_chunk(args.size, None))
                .await?;
            self.refuse(session, reader, Rejection::BadSequence("need MAIL before BDAT"))
                .await?;
            return Ok(Flow::Continue);
        };
        let allow_8bit = envelope.allows_8bit();
        let limit = self.config.max_message_size;

        session.state = State::ReceivingBody;
        let decoder = session
            .chunked
            .get_or_insert_with(|| BodyDecoder::chunked(allow_8bit, limit));
        Deadline::after(self.config.data_timeout)
            .run(reader.read_chunk(args.size, Some(&mut *decoder)))
            .await?;

        let received = decoder.received();
        let failed = decoder.failure().is_some();
        debug!(size = args.size, last = args.last, received, "BDAT chunk received");
        if let Some(envelope) = session.envelope.as_mut() {
            envelope.record_received(received);
        }

        if failed || args.last {
            if let (Some(envelope), Some(decoder)) = (session.envelope.take(), session.chunked.take()) {
                return self.complete(session, reader, envelope, decoder.finish()).await;
            }
        }

        let reply = Reply::enhanced(
            ReplyCode::OK,
            EnhancedCode::OK,
            format!("{} octets received", args.size),
        );
        self.send(session, reader, &reply).await?;
        Ok(Flow::Continue)
    }

    /// Hands a finished body to the handler and ends the transaction.
    async fn complete(
        &self,
        session: &mut Session,
        reader: &mut Reader,
        envelope: Envelope,
        body: std::result::Result<Bytes, Rejection>,
    ) -> Result<Flow> {
        session.reset_transaction();

        let outcome = match body {
            Err(rejection) => Err(rejection),
            Ok(body) => {
                let size = body.len();
                let message = envelope.into_message(body, session.peer, session.secure);
                let recipients = message.accepted().count();
                match self.handler.deliver(message).await {
                    Ok(Decision::Accept(text)) => {
                        info!(size, recipients, "Message accepted");
                        Ok(text.unwrap_or_else(|| "Message accepted for delivery".into()))
                    }
                    Ok(Decision::Reject(text)) => Err(Rejection::TransactionFailed(text)),
                    Err(err) => {
                        warn!(%err, size, "Delivery failed");
                        Err(err.rejection())
                    }
                }
            }
        };

        if outcome.is_ok() {
            session.stats.delivered += 1;
        } else {
            session.stats.failed += 1;
        }

        let outcome = outcome.map(|text| Reply::enhanced(ReplyCode::OK, EnhancedCode::MESSAGE_OK, text));
        self.respond(session, reader, outcome).await?;
        Ok(Flow::Continue)
    }

    pub(super) async fn quit(&self, session: &mut Session, reader: &mut Reader, _command: &Command) -> Result<Flow> {
        session.reset_transaction();
        let reply = Reply::enhanced(
            ReplyCode::CLOSING,
            EnhancedCode::OK,
            format!("{} closing connection", self.config.hostname),
        );
        self.send(session, reader, &reply).await?;
        Ok(Flow::Close)
    }

    /// Answers STARTTLS. The transport swap itself happens in the run loop.
    pub(super) async fn starttls(&self, session: &mut Session, reader: &mut Reader, command: &Command) -> Result<Flow> {
        if !command.has_no_args() {
            let rejection = Rejection::Syntax("STARTTLS takes no arguments".into());
            self.refuse(session, reader, rejection).await?;
            return Ok(Flow::Continue);
        }

        let buffered = reader.buffered();
        if buffered > 0 {
            return Err(Error::CommandInjection(buffered));
        }

        let reply = Reply::enhanced(ReplyCode::SERVICE_READY, EnhancedCode::OK, "Ready to start TLS");
        self.send(session, reader, &reply).await?;
        Ok(Flow::Upgrade)
    }
}
