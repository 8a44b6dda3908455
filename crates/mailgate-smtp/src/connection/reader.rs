//! Framed command reader for the server side of an SMTP connection.
//!
//! SMTP commands are CRLF-terminated lines. The reader keeps one buffer per
//! connection and serves lines from it in arrival order. A line that was
//! already complete in the buffer when it was requested was sent before the
//! client saw the previous reply, which is what pipelining means on the
//! wire; [`Line::pipelined`] records that.
//!
//! Message bodies bypass line framing: the session switches to
//! [`CommandReader::read_body`] after DATA and [`CommandReader::read_chunk`]
//! after BDAT, then returns to line mode.

#![allow(clippy::missing_errors_doc)]

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::body::BodyDecoder;
use crate::error::{Error, Result};

/// Bytes requested from the transport per read.
const READ_SIZE: usize = 8192;

/// A command line without its CRLF terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line content.
    pub bytes: Bytes,
    /// Offset of the first byte in the connection's stream.
    pub offset: u64,
    /// True if the line was complete in the buffer before it was requested.
    pub pipelined: bool,
}

/// Buffered reader and writer over a server-side transport.
#[derive(Debug)]
pub struct CommandReader<S> {
    stream: S,
    buffer: BytesMut,
    max_line: usize,
    max_depth: usize,
    offset: u64,
    queued_run: usize,
}

impl<S> CommandReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a reader with the given line length and pipeline depth limits.
    pub fn new(stream: S, max_line: usize, max_depth: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_SIZE),
            max_line,
            max_depth,
            offset: 0,
            queued_run: 0,
        }
    }

    /// Continues stream offsets from a previous reader on the same connection.
    #[must_use]
    pub const fn starting_at(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Reads the next command line.
    ///
    /// An over-long line is skipped through its CRLF before
    /// [`Error::LineTooLong`] is returned, so the caller may reply and keep
    /// reading. Serving more than the configured number of consecutive lines
    /// out of the buffer fails with [`Error::PipelineTooDeep`].
    pub async fn read_line(&mut self) -> Result<Line> {
        let pipelined = find_crlf(&self.buffer).is_some();
        if pipelined {
            self.queued_run += 1;
            if self.queued_run > self.max_depth {
                return Err(Error::PipelineTooDeep(self.max_depth));
            }
        } else {
            self.queued_run = 0;
        }

        loop {
            if let Some(pos) = find_crlf(&self.buffer) {
                if pos + 2 > self.max_line {
                    self.advance(pos + 2);
                    return Err(Error::LineTooLong(self.max_line));
                }

                let offset = self.offset;
                let mut line = self.buffer.split_to(pos + 2);
                self.offset += (pos + 2) as u64;
                line.truncate(pos);
                return Ok(Line {
                    bytes: line.freeze(),
                    offset,
                    pipelined,
                });
            }

            if self.buffer.len() >= self.max_line {
                self.skip_line().await?;
                return Err(Error::LineTooLong(self.max_line));
            }

            self.fill().await?;
        }
    }

    /// Feeds a dot-stuffed body to the decoder until its terminator.
    ///
    /// Bytes after the terminator stay buffered for the next command.
    pub async fn read_body(&mut self, decoder: &mut BodyDecoder) -> Result<()> {
        loop {
            if !self.buffer.is_empty() {
                let consumed = decoder.feed(&self.buffer);
                self.advance(consumed);
                if decoder.is_complete() {
                    return Ok(());
                }
            }
            self.fill().await?;
        }
    }

    /// Consumes exactly `len` payload bytes of a BDAT chunk.
    ///
    /// The bytes are appended to `decoder` when one is given and discarded
    /// otherwise, which keeps the stream in sync after a rejected BDAT.
    pub async fn read_chunk(&mut self, len: usize, mut decoder: Option<&mut BodyDecoder>) -> Result<()> {
        let mut remaining = len;
        while remaining > 0 {
            if self.buffer.is_empty() {
                self.fill().await?;
            }
            let take = remaining.min(self.buffer.len());
            if let Some(decoder) = decoder.as_deref_mut() {
                decoder.extend(&self.buffer[..take]);
            }
            self.advance(take);
            remaining -= take;
        }
        Ok(())
    }

    /// Returns the number of bytes received but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops every buffered byte and returns how many were dropped.
    ///
    /// Called when the transport is replaced so that nothing received before
    /// the swap can be interpreted afterwards.
    pub fn discard_buffered(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.advance(dropped);
        self.queued_run = 0;
        dropped
    }

    /// Returns the offset of the next unread byte.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Writes bytes to the transport and flushes.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shuts down the write half of the transport.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Consumes the reader and returns the transport.
    ///
    /// Buffered bytes are lost; call [`Self::discard_buffered`] first to
    /// account for them.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Reads more bytes from the transport into the buffer.
    async fn fill(&mut self) -> Result<usize> {
        self.buffer.reserve(READ_SIZE);
        let read = self.stream.read_buf(&mut self.buffer).await?;
        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        tracing::trace!(read, buffered = self.buffer.len(), "Filled read buffer");
        Ok(read)
    }

    /// Discards input through the next CRLF.
    async fn skip_line(&mut self) -> Result<()> {
        loop {
            if let Some(pos) = find_crlf(&self.buffer) {
                self.advance(pos + 2);
                return Ok(());
            }
            // Keep a trailing CR so a CRLF split across reads is still found.
            let keep = usize::from(self.buffer.last() == Some(&b'\r'));
            self.advance(self.buffer.len() - keep);
            self.fill().await?;
        }
    }

    fn advance(&mut self, count: usize) {
        self.buffer.advance(count);
        self.offset += count as u64;
    }
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
