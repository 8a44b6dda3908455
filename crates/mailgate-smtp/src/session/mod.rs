//! The per-connection SMTP session.
//!
//! An [`Engine`] holds what every session shares read-only: configuration,
//! the capability registry, the delivery handler and the TLS upgrader.
//! [`Engine::serve`] runs one session to completion on a transport. All
//! mutable protocol state lives in a [`Session`] record owned by that call,
//! so concurrent sessions share nothing mutable.

mod engine;
mod state;
mod transaction;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

pub use state::{Gate, State, gate};

use crate::body::BodyDecoder;
use crate::capability::{CapabilityRegistry, Negotiated};
use crate::config::Config;
use crate::connection::{NoTls, Upgrader};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::types::Extension;

/// A configured SMTP server engine.
///
/// Cloning is cheap; clones share configuration and collaborators.
pub struct Engine<H, U = NoTls> {
    config: Arc<Config>,
    registry: Arc<CapabilityRegistry>,
    handler: Arc<H>,
    upgrader: Arc<U>,
}

impl<H, U> Clone for Engine<H, U> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            handler: Arc::clone(&self.handler),
            upgrader: Arc::clone(&self.upgrader),
        }
    }
}

impl<H, U> fmt::Debug for Engine<H, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<H: Handler> Engine<H, NoTls> {
    /// Creates an engine without TLS support.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration does not validate.
    pub fn new(config: Config, handler: H) -> Result<Self> {
        config.validate()?;
        let registry = CapabilityRegistry::from_config(&config, false);
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            handler: Arc::new(handler),
            upgrader: Arc::new(NoTls),
        })
    }
}

impl<H: Handler, U: Upgrader> Engine<H, U> {
    /// Replaces the TLS upgrader. STARTTLS is offered if it is available.
    #[must_use]
    pub fn with_tls<V: Upgrader>(self, upgrader: V) -> Engine<H, V> {
        let registry = CapabilityRegistry::from_config(&self.config, upgrader.is_available());
        Engine {
            config: self.config,
            registry: Arc::new(registry),
            handler: self.handler,
            upgrader: Arc::new(upgrader),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the capability registry.
    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Returns the delivery handler.
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent QUIT.
    Quit,
    /// The client went away.
    PeerClosed,
    /// A read, write or handshake timed out.
    Timeout,
    /// A fatal protocol or transport error.
    Fatal(String),
}

impl CloseReason {
    fn from_error(err: &Error) -> Self {
        match err {
            Error::ConnectionClosed => Self::PeerClosed,
            Error::Io(io_err)
                if matches!(
                    io_err.kind(),
                    io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::BrokenPipe
                ) =>
            {
                Self::PeerClosed
            }
            Error::Timeout => Self::Timeout,
            other => Self::Fatal(other.to_string()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quit => f.write_str("quit"),
            Self::PeerClosed => f.write_str("peer closed"),
            Self::Timeout => f.write_str("timeout"),
            Self::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}

/// Event emitted when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Client address, when known.
    pub peer: Option<SocketAddr>,
    /// Identity the client gave in its last HELO/EHLO.
    pub peer_identity: Option<String>,
    /// True if the session ended on a TLS transport.
    pub secure: bool,
    /// Number of command lines processed.
    pub commands: usize,
    /// Messages accepted by the handler.
    pub delivered: usize,
    /// Transactions that reached the body stage and failed.
    pub failed: usize,
    /// Why the session ended.
    pub reason: CloseReason,
}

/// Counters kept for the summary.
#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    commands: usize,
    delivered: usize,
    failed: usize,
}

/// Mutable state of one connection.
#[derive(Debug)]
struct Session {
    state: State,
    negotiated: Negotiated,
    secure: bool,
    peer: Option<SocketAddr>,
    peer_identity: Option<String>,
    envelope: Option<Envelope>,
    chunked: Option<BodyDecoder>,
    stats: Stats,
}

impl Session {
    const fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            state: State::Connected,
            negotiated: Negotiated::none(),
            secure: false,
            peer,
            peer_identity: None,
            envelope: None,
            chunked: None,
            stats: Stats {
                commands: 0,
                delivered: 0,
                failed: 0,
            },
        }
    }

    /// Returns true if replies carry enhanced status codes.
    fn enhanced(&self) -> bool {
        self.negotiated.offers(&Extension::EnhancedStatusCodes)
    }

    /// Drops any open transaction.
    fn reset_transaction(&mut self) {
        self.envelope = None;
        self.chunked = None;
        self.state = self.state.after_reset();
    }

    /// Forgets everything learned before the transport became secure.
    fn reset_for_tls(&mut self) {
        self.envelope = None;
        self.chunked = None;
        self.negotiated = Negotiated::none();
        self.peer_identity = None;
        self.state = State::Connected;
        self.secure = true;
    }

    fn summary(&self, reason: CloseReason) -> SessionSummary {
        SessionSummary {
            peer: self.peer,
            peer_identity: self.peer_identity.clone(),
            secure: self.secure,
            commands: self.stats.commands,
            delivered: self.stats.delivered,
            failed: self.stats.failed,
            reason,
        }
    }
}

/// What the run loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
    Upgrade,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::envelope::Sender;
    use crate::types::{BodyType, ReversePath};

    #[test]
    fn test_close_reason_from_error() {
        assert_eq!(CloseReason::from_error(&Error::ConnectionClosed), CloseReason::PeerClosed);
        assert_eq!(CloseReason::from_error(&Error::Timeout), CloseReason::Timeout);
        assert_eq!(
            CloseReason::from_error(&Error::Io(io::Error::from(io::ErrorKind::BrokenPipe))),
            CloseReason::PeerClosed
        );
        assert!(matches!(
            CloseReason::from_error(&Error::CommandInjection(3)),
            CloseReason::Fatal(_)
        ));
    }

    #[test]
    fn test_reset_for_tls_clears_negotiation() {
        let mut session = Session::new(None);
        session.state = State::Greeted;
        session.negotiated = Negotiated::ehlo(vec![Extension::StartTls, Extension::Pipelining]);
        session.peer_identity = Some("client.example".into());

        session.reset_for_tls();

        assert_eq!(session.state, State::Connected);
        assert_eq!(session.negotiated, Negotiated::none());
        assert!(session.peer_identity.is_none());
        assert!(session.secure);
    }

    #[test]
    fn test_reset_transaction_keeps_greeting() {
        let mut session = Session::new(None);
        session.state = State::HaveSender;
        session.envelope = Some(Envelope::new(
            Sender {
                path: ReversePath::Null,
                raw: "<>".into(),
                utf8: false,
            },
            BodyType::SevenBit,
            None,
        ));

        session.reset_transaction();
        assert_eq!(session.state, State::Greeted);
        assert!(session.envelope.is_none());

        session.reset_transaction();
        assert_eq!(session.state, State::Greeted);
    }

    #[test]
    fn test_enhanced_codes_follow_negotiation() {
        let mut session = Session::new(None);
        assert!(!session.enhanced());
        session.negotiated = Negotiated::ehlo(vec![Extension::EnhancedStatusCodes]);
        assert!(session.enhanced());
    }
}
