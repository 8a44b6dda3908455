//! Session run loop: framing, admission, dispatch and teardown.

use std::net::SocketAddr;

use tracing::{Instrument, debug, info, warn};

use super::{CloseReason, Engine, Flow, Session, SessionSummary};
use crate::command::{Command, Verb, params};
use crate::connection::{BoxedTransport, CommandReader, Deadline, Transport, Upgrader};
use crate::error::{Error, Rejection, Result};
use crate::handler::Handler;
use crate::session::state::{Gate, State, gate};
use crate::types::{EnhancedCode, Extension, Reply, ReplyCode};

pub(super) type Reader = CommandReader<BoxedTransport>;

impl<H: Handler, U: Upgrader> Engine<H, U> {
    /// Runs one session on `transport` until QUIT, disconnect or a fatal error.
    ///
    /// Never fails: every outcome is reported in the returned summary, which
    /// is also passed to [`Handler::session_closed`].
    pub async fn serve<T>(&self, transport: T, peer: Option<SocketAddr>) -> SessionSummary
    where
        T: Transport + 'static,
    {
        let span = tracing::info_span!(
            "session",
            peer = %peer.map_or_else(|| "unknown".to_string(), |addr| addr.to_string())
        );

        async move {
            let mut session = Session::new(peer);
            let reader = CommandReader::new(
                Box::new(transport) as BoxedTransport,
                self.config.max_line_length,
                self.config.max_pipeline_depth,
            );

            debug!("Session started");
            let reason = self.run(&mut session, reader).await;
            let summary = session.summary(reason);
            info!(
                reason = %summary.reason,
                secure = summary.secure,
                commands = summary.commands,
                delivered = summary.delivered,
                failed = summary.failed,
                "Session closed"
            );

            self.handler.session_closed(&summary);
            summary
        }
        .instrument(span)
        .await
    }

    async fn run(&self, session: &mut Session, mut reader: Reader) -> CloseReason {
        let greeting = Reply::text(
            ReplyCode::SERVICE_READY,
            format!("{} ESMTP {}", self.config.hostname, self.config.banner),
        );
        if let Err(err) = self.send(session, &mut reader, &greeting).await {
            return self.abort(session, &mut reader, err).await;
        }

        loop {
            let deadline = Deadline::after(self.config.command_timeout);
            let line = match deadline.run(reader.read_line()).await {
                Ok(line) => line,
                Err(err) if !err.is_fatal() => {
                    debug!(%err, class = ?err.class(), "Command line refused");
                    if let Err(err) = self.refuse(session, &mut reader, Rejection::LineTooLong).await {
                        return self.abort(session, &mut reader, err).await;
                    }
                    continue;
                }
                Err(err) => return self.abort(session, &mut reader, err).await,
            };

            session.stats.commands += 1;
            let flow = match Command::parse(&line) {
                Ok(command) => self.dispatch(session, &mut reader, command).await,
                Err(rejection) => self
                    .refuse(session, &mut reader, rejection)
                    .await
                    .map(|()| Flow::Continue),
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => {
                    session.state = State::Closed;
                    if let Err(err) = reader.shutdown().await {
                        debug!(%err, "Shutdown after QUIT failed");
                    }
                    return CloseReason::Quit;
                }
                Ok(Flow::Upgrade) => match self.upgrade(session, reader).await {
                    Ok(secured) => reader = secured,
                    Err(err) => {
                        warn!(%err, "STARTTLS failed, closing connection");
                        session.state = State::Closed;
                        return CloseReason::from_error(&err);
                    }
                },
                Err(err) => return self.abort(session, &mut reader, err).await,
            }
        }
    }

    async fn dispatch(&self, session: &mut Session, reader: &mut Reader, command: Command) -> Result<Flow> {
        debug!(
            verb = %command.verb,
            offset = command.offset,
            pipelined = command.pipelined,
            state = ?session.state,
            "Command received"
        );

        if command.pipelined
            && self.config.reject_unauth_pipelining
            && !command.verb.may_end_pipeline()
            && !session.negotiated.offers(&Extension::Pipelining)
        {
            self.skip_chunk(reader, &command).await?;
            self.refuse(session, reader, Rejection::ImproperPipelining).await?;
            return Ok(Flow::Continue);
        }

        match Self::admit(session, &command) {
            Ok(()) => {}
            Err(None) => return Ok(Flow::Close),
            Err(Some(rejection)) => {
                self.skip_chunk(reader, &command).await?;
                self.refuse(session, reader, rejection).await?;
                return Ok(Flow::Continue);
            }
        }

        let outcome = match command.verb {
            Verb::Helo => self.helo(session, &command),
            Verb::Ehlo => self.ehlo(session, &command),
            Verb::Mail => self.mail(session, &command),
            Verb::Rcpt => self.rcpt(session, &command).await,
            Verb::Rset => self.rset(session, &command),
            Verb::Noop => Ok(Reply::enhanced(ReplyCode::OK, EnhancedCode::OK, "OK")),
            Verb::Data => return self.data(session, reader, &command).await,
            Verb::Bdat => return self.bdat(session, reader, &command).await,
            Verb::Quit => return self.quit(session, reader, &command).await,
            Verb::StartTls => return self.starttls(session, reader, &command).await,
            _ => Err(Rejection::NotImplemented),
        };

        self.respond(session, reader, outcome).await?;
        Ok(Flow::Continue)
    }

    /// Checks capability gating and the transition table.
    ///
    /// `Err(None)` means the session is already closed.
    fn admit(session: &Session, command: &Command) -> std::result::Result<(), Option<Rejection>> {
        if session.state != State::Connected {
            if let Some(extension) = command.verb.extension() {
                if extension == Extension::StartTls && session.secure {
                    return Err(Some(Rejection::TlsAlreadyActive));
                }
                if !session.negotiated.offers(&extension) {
                    let tls_refused = extension == Extension::StartTls && session.negotiated.is_extended();
                    return Err(Some(if tls_refused {
                        Rejection::TlsUnavailable
                    } else {
                        Rejection::UnrecognizedCommand
                    }));
                }
            }
        }

        match gate(session.state, command.verb) {
            Gate::Allow => Ok(()),
            Gate::BadSequence(reason) => Err(Some(Rejection::BadSequence(reason))),
            Gate::NotImplemented => Err(Some(Rejection::NotImplemented)),
            Gate::Unrecognized => Err(Some(Rejection::UnrecognizedCommand)),
            Gate::Closed => Err(None),
        }
    }

    /// Consumes the payload of a refused BDAT so its bytes are not read as commands.
    async fn skip_chunk(&self, reader: &mut Reader, command: &Command) -> Result<()> {
        if command.verb != Verb::Bdat {
            return Ok(());
        }
        if let Ok(args) = params::parse_bdat(&command.args) {
            debug!(size = args.size, "Discarding refused BDAT chunk");
            Deadline::after(self.config.data_timeout)
                .run(reader.read_chunk(args.size, None))
                .await?;
        }
        Ok(())
    }

    /// Swaps the transport for a TLS channel.
    async fn upgrade(&self, session: &mut Session, mut reader: Reader) -> Result<Reader> {
        let discarded = reader.discard_buffered();
        if discarded > 0 {
            warn!(discarded, "Discarded plaintext bytes at TLS upgrade");
        }
        let offset = reader.offset();
        let transport = reader.into_inner();

        let secured = Deadline::after(self.config.handshake_timeout)
            .run(self.upgrader.upgrade(transport))
            .await?;

        session.reset_for_tls();
        info!("TLS established");

        Ok(CommandReader::new(
            secured,
            self.config.max_line_length,
            self.config.max_pipeline_depth,
        )
        .starting_at(offset))
    }

    /// Ends the session after a fatal error, with a best-effort 421.
    async fn abort(&self, session: &mut Session, reader: &mut Reader, err: Error) -> CloseReason {
        let reason = CloseReason::from_error(&err);
        let notice = match &err {
            Error::Timeout => Some((EnhancedCode::TIMEOUT, "Timeout exceeded")),
            Error::CommandInjection(_) => Some((EnhancedCode::SECURITY, "Data received after STARTTLS")),
            Error::PipelineTooDeep(_) => Some((EnhancedCode::SECURITY, "Too many pipelined commands")),
            Error::ConnectionClosed | Error::Io(_) => None,
            _ => Some((EnhancedCode::TEMPORARY_SYSTEM, "Service not available")),
        };

        if reason == CloseReason::PeerClosed {
            debug!(%err, "Peer closed connection");
        } else {
            warn!(%err, state = ?session.state, "Closing session");
        }

        if let Some((enhanced, text)) = notice {
            let reply = Reply::enhanced(
                ReplyCode::SERVICE_UNAVAILABLE,
                enhanced,
                format!("{} {text}, closing connection", self.config.hostname),
            );
            let bytes = reply.encode(session.enhanced());
            let write = Deadline::after(self.config.handshake_timeout)
                .run(async {
                    reader.write_all(&bytes).await?;
                    reader.shutdown().await
                })
                .await;
            if let Err(write_err) = write {
                debug!(%write_err, "Could not deliver 421");
            }
        }

        session.state = State::Closed;
        reason
    }

    /// Sends the reply or rejection produced by a command.
    pub(super) async fn respond(
        &self,
        session: &Session,
        reader: &mut Reader,
        outcome: std::result::Result<Reply, Rejection>,
    ) -> Result<()> {
        match outcome {
            Ok(reply) => self.send(session, reader, &reply).await,
            Err(rejection) => self.refuse(session, reader, rejection).await,
        }
    }

    pub(super) async fn refuse(&self, session: &Session, reader: &mut Reader, rejection: Rejection) -> Result<()> {
        debug!(%rejection, class = ?rejection.class(), "Command rejected");
        self.send(session, reader, &rejection.reply()).await
    }

    pub(super) async fn send(&self, session: &Session, reader: &mut Reader, reply: &Reply) -> Result<()> {
        let bytes = reply.encode(session.enhanced());
        Deadline::after(self.config.command_timeout)
            .run(reader.write_all(&bytes))
            .await
    }
}
