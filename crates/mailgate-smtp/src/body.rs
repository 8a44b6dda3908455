//! Message body decoding for DATA and BDAT.
//!
//! DATA bodies are dot-stuffed (RFC 5321 §4.5.2): a line holding a single
//! `.` terminates the body and a leading `.` is removed from every other
//! line. BDAT chunks (RFC 3030) arrive with an explicit length and are taken
//! verbatim.
//!
//! Both framings validate content against the transaction's body type and
//! enforce the size limit. Once a check fails the decoder drops what it has
//! accumulated but keeps tracking framing, so the caller can consume the rest
//! of the payload and keep the session synchronised.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Rejection;

/// How the body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Dot-stuffed text terminated by `<CRLF>.<CRLF>`.
    Dotted,
    /// Length-prefixed BDAT chunks.
    Chunked,
}

/// Position within the current line of a dotted body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stuffing {
    LineStart,
    Dot,
    DotCr,
    Middle,
    CrSeen,
}

/// Incremental body decoder.
#[derive(Debug)]
pub struct BodyDecoder {
    framing: Framing,
    allow_8bit: bool,
    limit: usize,
    body: BytesMut,
    received: usize,
    state: Stuffing,
    complete: bool,
    failure: Option<Rejection>,
}

impl BodyDecoder {
    /// Creates a decoder for a dot-stuffed DATA body.
    #[must_use]
    pub fn dotted(allow_8bit: bool, limit: usize) -> Self {
        Self::new(Framing::Dotted, allow_8bit, limit)
    }

    /// Creates a decoder for BDAT chunks.
    #[must_use]
    pub fn chunked(allow_8bit: bool, limit: usize) -> Self {
        Self::new(Framing::Chunked, allow_8bit, limit)
    }

    fn new(framing: Framing, allow_8bit: bool, limit: usize) -> Self {
        Self {
            framing,
            allow_8bit,
            limit,
            body: BytesMut::new(),
            received: 0,
            state: Stuffing::LineStart,
            complete: false,
            failure: None,
        }
    }

    /// Returns the framing of this decoder.
    #[must_use]
    pub const fn framing(&self) -> Framing {
        self.framing
    }

    /// Feeds dot-stuffed input and returns how many bytes were consumed.
    ///
    /// Consumption stops right after the terminating `.<CRLF>`; any remaining
    /// bytes belong to the next command.
    pub fn feed(&mut self, input: &[u8]) -> usize {
        if self.complete {
            return 0;
        }
        for (index, &byte) in input.iter().enumerate() {
            if self.step(byte) {
                self.complete = true;
                return index + 1;
            }
        }
        input.len()
    }

    /// Appends a BDAT chunk verbatim.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.received = self.received.saturating_add(chunk.len());
        if self.failure.is_some() {
            return;
        }
        if self.received > self.limit {
            self.fail(Rejection::MessageTooLarge);
        } else if !self.allow_8bit && !chunk.is_ascii() {
            self.fail(Rejection::EightBitContent);
        } else {
            self.body.extend_from_slice(chunk);
        }
    }

    /// Returns true once the dotted terminator has been seen.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Returns the number of body octets received so far.
    #[must_use]
    pub const fn received(&self) -> usize {
        self.received
    }

    /// Returns the first validation failure, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&Rejection> {
        self.failure.as_ref()
    }

    /// Returns the decoded body, or the failure that invalidated it.
    ///
    /// # Errors
    ///
    /// Returns the recorded rejection if any octet failed validation.
    pub fn finish(self) -> Result<Bytes, Rejection> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.body.freeze()),
        }
    }

    /// Advances the dot-stuffing state machine. Returns true on the terminator.
    fn step(&mut self, byte: u8) -> bool {
        match self.state {
            Stuffing::LineStart if byte == b'.' => self.state = Stuffing::Dot,
            Stuffing::Dot if byte == b'\r' => self.state = Stuffing::DotCr,
            Stuffing::DotCr if byte == b'\n' => return true,
            Stuffing::DotCr => {
                // ".\r" followed by more text: the dot was stuffing.
                self.push_text(b'\r');
                return self.step(byte);
            }
            Stuffing::LineStart | Stuffing::Dot | Stuffing::Middle | Stuffing::CrSeen => {
                self.push_text(byte);
            }
        }
        false
    }

    fn push_text(&mut self, byte: u8) {
        self.state = match (self.state, byte) {
            (_, b'\r') => Stuffing::CrSeen,
            (Stuffing::CrSeen, b'\n') => Stuffing::LineStart,
            _ => Stuffing::Middle,
        };

        self.received = self.received.saturating_add(1);
        if self.failure.is_some() {
            return;
        }
        if self.received > self.limit {
            self.fail(Rejection::MessageTooLarge);
        } else if byte >= 0x80 && !self.allow_8bit {
            self.fail(Rejection::EightBitContent);
        } else {
            self.body.put_u8(byte);
        }
    }

    fn fail(&mut self, rejection: Rejection) {
        tracing::debug!(received = self.received, %rejection, "Body rejected");
        self.failure = Some(rejection);
        self.body = BytesMut::new();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode(input: &[u8]) -> (Result<Bytes, Rejection>, usize) {
        let mut decoder = BodyDecoder::dotted(false, 1 << 20);
        let consumed = decoder.feed(input);
        assert!(decoder.is_complete());
        (decoder.finish(), consumed)
    }

    mod dotted_tests {
        use super::*;

        #[test]
        fn simple_body() {
            let (body, consumed) = decode(b"Subject: hi\r\n\r\nHello\r\n.\r\n");
            assert_eq!(body.unwrap(), &b"Subject: hi\r\n\r\nHello\r\n"[..]);
            assert_eq!(consumed, 25);
        }

        #[test]
        fn empty_body() {
            let (body, consumed) = decode(b".\r\n");
            assert!(body.unwrap().is_empty());
            assert_eq!(consumed, 3);
        }

        #[test]
        fn double_dot_is_unstuffed() {
            let (body, _) = decode(b"..\r\n.\r\n");
            assert_eq!(body.unwrap(), &b".\r\n"[..]);
        }

        #[test]
        fn leading_dot_removed_from_text_line() {
            let (body, _) = decode(b"..hidden\r\n.x\r\n.\r\n");
            assert_eq!(body.unwrap(), &b".hidden\r\nx\r\n"[..]);
        }

        #[test]
        fn terminator_counts_once_after_stuffed_lines() {
            let mut decoder = BodyDecoder::dotted(false, 1024);
            let input = b"..\r\n..\r\n.\r\nNOOP\r\n";
            let consumed = decoder.feed(input);
            assert_eq!(&input[consumed..], b"NOOP\r\n");
            assert_eq!(decoder.finish().unwrap(), &b".\r\n.\r\n"[..]);
        }

        #[test]
        fn dot_cr_without_lf_is_text() {
            let (body, _) = decode(b".\rx\r\n.\r\n");
            assert_eq!(body.unwrap(), &b"\rx\r\n"[..]);
        }

        #[test]
        fn dot_inside_line_is_kept() {
            let (body, _) = decode(b"a.b\r\n.\r\n");
            assert_eq!(body.unwrap(), &b"a.b\r\n"[..]);
        }

        #[test]
        fn incomplete_body() {
            let mut decoder = BodyDecoder::dotted(false, 1024);
            assert_eq!(decoder.feed(b"Hello\r\n."), 8);
            assert!(!decoder.is_complete());
            assert_eq!(decoder.feed(b"\r\n"), 2);
            assert!(decoder.is_complete());
            assert_eq!(decoder.feed(b"more"), 0);
        }
    }

    mod validation_tests {
        use super::*;

        #[test]
        fn eight_bit_rejected_in_seven_bit_mode() {
            let (body, _) = decode("café\r\n.\r\n".as_bytes());
            assert_eq!(body, Err(Rejection::EightBitContent));
        }

        #[test]
        fn eight_bit_accepted_when_allowed() {
            let mut decoder = BodyDecoder::dotted(true, 1024);
            decoder.feed("café\r\n.\r\n".as_bytes());
            assert_eq!(decoder.finish().unwrap(), "café\r\n".as_bytes());
        }

        #[test]
        fn failure_keeps_framing() {
            let mut decoder = BodyDecoder::dotted(false, 1024);
            let input = "\u{e9}\r\n..\r\n.\r\nQUIT\r\n".as_bytes();
            let consumed = decoder.feed(input);
            assert_eq!(&input[consumed..], b"QUIT\r\n");
            assert_eq!(decoder.failure(), Some(&Rejection::EightBitContent));
        }

        #[test]
        fn size_limit() {
            let mut decoder = BodyDecoder::dotted(false, 4);
            decoder.feed(b"12345\r\n.\r\n");
            assert!(decoder.is_complete());
            assert_eq!(decoder.received(), 7);
            assert_eq!(decoder.finish(), Err(Rejection::MessageTooLarge));
        }

        #[test]
        fn size_limit_is_inclusive() {
            let mut decoder = BodyDecoder::dotted(false, 4);
            decoder.feed(b"ab\r\n.\r\n");
            assert_eq!(decoder.finish().unwrap(), &b"ab\r\n"[..]);
        }
    }

    mod chunked_tests {
        use super::*;

        #[test]
        fn chunks_are_verbatim() {
            let mut decoder = BodyDecoder::chunked(false, 1024);
            decoder.extend(b"..\r\n");
            decoder.extend(b".\r\n");
            assert_eq!(decoder.framing(), Framing::Chunked);
            assert_eq!(decoder.finish().unwrap(), &b"..\r\n.\r\n"[..]);
        }

        #[test]
        fn binary_chunk() {
            let mut decoder = BodyDecoder::chunked(true, 1024);
            decoder.extend(&[0, 0xff, b'\n', 0x80]);
            assert_eq!(decoder.finish().unwrap(), &[0, 0xff, b'\n', 0x80][..]);
        }

        #[test]
        fn chunk_validation() {
            let mut decoder = BodyDecoder::chunked(false, 1024);
            decoder.extend(&[0xc3, 0xa9]);
            decoder.extend(b"ok");
            assert_eq!(decoder.finish(), Err(Rejection::EightBitContent));

            let mut decoder = BodyDecoder::chunked(true, 3);
            decoder.extend(b"ab");
            decoder.extend(b"cd");
            assert_eq!(decoder.received(), 4);
            assert_eq!(decoder.finish(), Err(Rejection::MessageTooLarge));
        }
    }

    fn stuff(lines: &[String]) -> Vec<u8> {
        let mut out = Vec::new();
        for line in lines {
            if line.starts_with('.') {
                out.push(b'.');
            }
            out.extend_from_slice(line.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b".\r\n");
        out
    }

    proptest! {
        #[test]
        fn decoding_is_independent_of_chunking(
            lines in proptest::collection::vec("[.a-z ]{0,12}", 0..12),
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let input = stuff(&lines);

            let mut whole = BodyDecoder::dotted(false, 1 << 16);
            prop_assert_eq!(whole.feed(&input), input.len());

            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(input.len() + 1)).collect();
            points.sort_unstable();
            let mut pieces = BodyDecoder::dotted(false, 1 << 16);
            let mut start = 0;
            for point in points.into_iter().chain(std::iter::once(input.len())) {
                prop_assert_eq!(pieces.feed(&input[start..point]), point - start);
                start = point;
            }

            prop_assert!(pieces.is_complete());
            prop_assert_eq!(whole.finish().unwrap(), pieces.finish().unwrap());
        }

        #[test]
        fn unstuffing_restores_lines(lines in proptest::collection::vec("[.a-z]{0,8}", 0..10)) {
            let mut decoder = BodyDecoder::dotted(false, 1 << 16);
            decoder.feed(&stuff(&lines));
            let expected: Vec<u8> = lines
                .iter()
                .flat_map(|line| line.bytes().chain(*b"\r\n"))
                .collect();
            prop_assert_eq!(decoder.finish().unwrap().to_vec(), expected);
        }
    }
}
