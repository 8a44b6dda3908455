//! # mailgate-smtp
//!
//! The server side of ESMTP (RFC 5321) as a reusable protocol engine, with
//! STARTTLS, 8BITMIME, PIPELINING, SMTPUTF8, SIZE, CHUNKING and
//! ENHANCEDSTATUSCODES.
//!
//! ## Features
//!
//! - **Explicit state machine**: every (state, command) pair is decided by a
//!   single transition table
//! - **Pipelining aware**: commands are framed by byte offset and rejected
//!   in order when the client pipelines without negotiating it
//! - **STARTTLS hardening**: plaintext queued behind STARTTLS is treated as
//!   an injection attempt, and all negotiated state is dropped after the
//!   handshake
//! - **Streaming bodies**: dot-unstuffing and BDAT chunks are decoded as
//!   they arrive, with size and 8-bit limits enforced on the fly
//! - **Pluggable policy**: recipient checks and delivery live behind
//!   [`Handler`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailgate_smtp::{Config, Decision, Engine, Handler, HandlerError, Mailbox, Message, ReversePath};
//! use tokio::net::TcpListener;
//!
//! struct Sink;
//!
//! impl Handler for Sink {
//!     async fn check_recipient(&self, _: &ReversePath, _: &Mailbox) -> Result<Decision, HandlerError> {
//!         Ok(Decision::accept())
//!     }
//!
//!     async fn deliver(&self, message: Message) -> Result<Decision, HandlerError> {
//!         println!("{} bytes from {}", message.body.len(), message.sender.path);
//!         Ok(Decision::accept())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> mailgate_smtp::Result<()> {
//!     let engine = Engine::new(Config::new("mx.example.com"), Sink)?;
//!     let listener = TcpListener::bind("0.0.0.0:2525").await?;
//!
//!     loop {
//!         let (stream, peer) = listener.accept().await?;
//!         let engine = engine.clone();
//!         tokio::spawn(async move { engine.serve(stream, Some(peer)).await });
//!     }
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Connected ─HELO/EHLO→ Greeted ─MAIL→ HaveSender ─RCPT→ HaveRecipient ─DATA/BDAT→ (body)
//!     ↑                    ↑                                                  │
//!     └──── STARTTLS ──────┴──────────────── reply sent / RSET ──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`body`]: DATA and BDAT body decoding
//! - [`capability`]: Extension registry and per-session negotiation
//! - [`command`]: Command line and parameter parsing
//! - [`config`]: Engine limits and toggles
//! - [`connection`]: Framing, deadlines and TLS upgrade
//! - [`session`]: The engine and its state machine
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod body;
pub mod capability;
pub mod command;
pub mod config;
pub mod connection;
pub mod envelope;
mod error;
mod handler;
pub mod session;
pub mod types;

pub use config::{Config, ConfigBuilder};
pub use connection::{NoTls, TlsUpgrader, Transport, Upgrader};
pub use envelope::{Message, Recipient, RecipientStatus, Sender};
pub use error::{Error, ErrorClass, Rejection, Result};
pub use handler::{Decision, Handler, HandlerError};
pub use session::{CloseReason, Engine, SessionSummary, State};
pub use types::{BodyType, EnhancedCode, Extension, Mailbox, Reply, ReplyCode, ReversePath};
