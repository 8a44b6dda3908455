//! Shared harness for session tests.
//!
//! A session runs on one half of an in-memory duplex stream while the test
//! drives the other half like an SMTP client.

#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use mailgate_smtp::connection::BoxedTransport;
use mailgate_smtp::{
    Config, Decision, Engine, Handler, HandlerError, Mailbox, Message, ReversePath, SessionSummary,
    Upgrader,
};

/// Handler that records deliveries and session summaries.
///
/// Recipients with local part `unknown` are rejected, `tempfail` fails
/// temporarily. Messages whose body contains `REJECT-ME` are refused.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    pub messages: Arc<Mutex<Vec<Message>>>,
    pub summaries: Arc<Mutex<Vec<SessionSummary>>>,
}

impl RecordingHandler {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.summaries.lock().unwrap().clone()
    }
}

impl Handler for RecordingHandler {
    async fn check_recipient(&self, _sender: &ReversePath, recipient: &Mailbox) -> Result<Decision, HandlerError> {
        match recipient.local_part() {
            "unknown" => Ok(Decision::reject()),
            "tempfail" => Err(HandlerError::Temporary("directory offline".into())),
            _ => Ok(Decision::accept()),
        }
    }

    async fn deliver(&self, message: Message) -> Result<Decision, HandlerError> {
        if message.body.windows(9).any(|w| w == b"REJECT-ME") {
            return Ok(Decision::Reject(Some("Content refused".into())));
        }
        self.messages.lock().unwrap().push(message);
        Ok(Decision::accept())
    }

    fn session_closed(&self, summary: &SessionSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }
}

/// Upgrader that pretends the handshake succeeded and keeps the channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTls;

impl Upgrader for PassthroughTls {
    async fn upgrade(&self, transport: BoxedTransport) -> mailgate_smtp::Result<BoxedTransport> {
        Ok(transport)
    }
}

/// Sends engine logs to the captured test output. `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> Config {
    Config::builder("mx.test").banner("test").build().unwrap()
}

/// Client end of a session.
pub struct Client {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

/// A parsed server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl ServerReply {
    pub fn last(&self) -> &str {
        self.lines.last().map_or("", String::as_str)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

impl Client {
    pub async fn send(&mut self, data: &str) {
        self.send_bytes(data.as_bytes()).await;
    }

    pub async fn send_bytes(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Reads one possibly multi-line reply.
    pub async fn reply(&mut self) -> ServerReply {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await.unwrap();
            assert!(read > 0, "connection closed while waiting for a reply");
            assert!(line.ends_with("\r\n"), "reply line without CRLF: {line:?}");

            let code = line[..3].parse::<u16>().unwrap();
            let separator = line.as_bytes()[3];
            lines.push(line[4..line.len() - 2].to_string());
            if separator == b' ' {
                return ServerReply { code, lines };
            }
            assert_eq!(separator, b'-');
        }
    }

    /// Sends one command line and reads its reply.
    pub async fn command(&mut self, line: &str) -> ServerReply {
        self.send(&format!("{line}\r\n")).await;
        self.reply().await
    }

    /// Returns true once the server has closed its side.
    pub async fn is_closed(&mut self) -> bool {
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest).await.unwrap();
        rest.is_empty()
    }
}

/// Starts a session and returns the client end plus the session task.
pub async fn start<H, U>(engine: Engine<H, U>) -> (Client, JoinHandle<SessionSummary>)
where
    H: Handler,
    U: Upgrader,
{
    init_tracing();
    let (client, server) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(async move { engine.serve(server, None).await });

    let (read, write) = tokio::io::split(client);
    let mut client = Client {
        reader: BufReader::new(read),
        writer: write,
    };

    let greeting = client.reply().await;
    assert_eq!(greeting.code, 220);
    assert!(greeting.last().starts_with("mx.test ESMTP"));

    (client, task)
}

/// Starts a session on a default engine with a fresh recording handler.
pub async fn start_default() -> (Client, JoinHandle<SessionSummary>, RecordingHandler) {
    let handler = RecordingHandler::default();
    let engine = Engine::new(config(), handler.clone()).unwrap();
    let (client, task) = start(engine).await;
    (client, task, handler)
}
