//! Line/literal framing for client commands.
//!
//! IMAP commands are CRLF-terminated lines that may carry octet-counted
//! literals: a `{N}` or `{N+}` marker at the end of a line announces N raw
//! bytes that follow, after which the command line continues. A single
//! command may announce several literals (for example, nested inside a
//! parenthesized list).
//!
//! [`FrameBuffer`] accumulates raw socket bytes and yields complete command
//! frames. It never blocks: when the buffered bytes do not yet form a
//! complete frame it reports [`FrameEvent::NeedMoreData`]. For a
//! synchronizing `{N}` marker it asks the caller to transmit a continuation
//! request before more bytes can arrive; `{N+}` (LITERAL+) proceeds without
//! one.

#![allow(clippy::missing_errors_doc)]

use bytes::{Buf, BytesMut};

use crate::{Error, Result};

/// Initial capacity for the receive buffer.
const INITIAL_CAPACITY: usize = 4096;

/// A complete command frame.
///
/// `line` is the logical command line: every physical line of the command
/// concatenated, literal markers and interior CRLFs retained. `literals`
/// holds each literal payload in announcement order; the parser substitutes
/// them when it reaches the corresponding marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The logical command line, CRLF-terminated.
    pub line: Vec<u8>,
    /// Literal payloads in announcement order.
    pub literals: Vec<Vec<u8>>,
}

/// Outcome of polling the buffer for a frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// The buffered bytes do not yet form a complete frame.
    NeedMoreData,
    /// A synchronizing literal was announced. The caller must transmit a
    /// continuation request (`+ OK`) before the client will send the
    /// literal bytes, then keep feeding and polling.
    SendContinuation,
    /// A complete command frame.
    Frame(Frame),
}

/// A literal whose bytes are still arriving.
#[derive(Debug)]
struct PendingLiteral {
    expected: usize,
    received: Vec<u8>,
    sync: bool,
    continuation_sent: bool,
}

/// Accumulates raw bytes and produces complete command frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_line_length: usize,
    max_literal_length: usize,
    line: Vec<u8>,
    literals: Vec<Vec<u8>>,
    pending: Option<PendingLiteral>,
}

impl FrameBuffer {
    /// Creates a new frame buffer with the given limits.
    #[must_use]
    pub fn new(max_line_length: usize, max_literal_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_line_length,
            max_literal_length,
            line: Vec::new(),
            literals: Vec::new(),
            pending: None,
        }
    }

    /// Appends a chunk of bytes received from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the number of buffered, not yet consumed bytes.
    ///
    /// The connection supervisor uses this as its inbound read watermark.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` while a promised literal has not fully arrived.
    #[must_use]
    pub const fn awaiting_literal(&self) -> bool {
        self.pending.is_some()
    }

    /// Attempts to produce the next complete command frame.
    ///
    /// Fatal errors ([`Error::LineTooLong`], [`Error::LiteralTooLarge`])
    /// leave the buffer in an untrusted state; the caller must stop polling
    /// and close the connection.
    pub fn poll_frame(&mut self) -> Result<FrameEvent> {
        loop {
            // Drain arriving bytes into a pending literal first.
            if let Some(pending) = &mut self.pending {
                if pending.sync && !pending.continuation_sent {
                    pending.continuation_sent = true;
                    return Ok(FrameEvent::SendContinuation);
                }
                let needed = pending.expected - pending.received.len();
                let take = needed.min(self.buf.len());
                pending.received.extend_from_slice(&self.buf[..take]);
                self.buf.advance(take);
                if pending.received.len() < pending.expected {
                    return Ok(FrameEvent::NeedMoreData);
                }
                if let Some(done) = self.pending.take() {
                    self.literals.push(done.received);
                }
            }

            // Find the next complete physical line. The length limit applies
            // to the whole logical line, so a command cannot dodge it by
            // splitting itself across literal announcements.
            let Some(end) = find_crlf(&self.buf) else {
                if self.line.len() + self.buf.len() > self.max_line_length {
                    return Err(Error::LineTooLong {
                        limit: self.max_line_length,
                    });
                }
                return Ok(FrameEvent::NeedMoreData);
            };
            if self.line.len() + end + 2 > self.max_line_length {
                return Err(Error::LineTooLong {
                    limit: self.max_line_length,
                });
            }
            let physical = self.buf.split_to(end + 2);
            self.line.extend_from_slice(&physical);

            // A trailing {N} or {N+} marker announces a literal.
            match literal_announcement(&physical) {
                Some(Announcement { declared, sync }) => {
                    if declared > self.max_literal_length {
                        return Err(Error::LiteralTooLarge {
                            declared,
                            limit: self.max_literal_length,
                        });
                    }
                    self.pending = Some(PendingLiteral {
                        expected: declared,
                        received: Vec::with_capacity(declared),
                        sync,
                        continuation_sent: false,
                    });
                }
                None => {
                    let frame = Frame {
                        line: std::mem::take(&mut self.line),
                        literals: std::mem::take(&mut self.literals),
                    };
                    return Ok(FrameEvent::Frame(frame));
                }
            }
        }
    }

    /// Takes the next complete raw line, stripped of its CRLF.
    ///
    /// Used for continuation data that is not a command, such as SASL
    /// base64 payloads during an AUTHENTICATE exchange. Must only be called
    /// between frames, never while a frame is partially assembled.
    pub fn take_line(&mut self) -> Result<Option<Vec<u8>>> {
        debug_assert!(self.line.is_empty() && self.pending.is_none());
        let Some(end) = find_crlf(&self.buf) else {
            if self.buf.len() > self.max_line_length {
                return Err(Error::LineTooLong {
                    limit: self.max_line_length,
                });
            }
            return Ok(None);
        };
        if end + 2 > self.max_line_length {
            return Err(Error::LineTooLong {
                limit: self.max_line_length,
            });
        }
        let mut line = self.buf.split_to(end + 2).to_vec();
        line.truncate(end);
        Ok(Some(line))
    }
}

/// Finds the position of the first CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

struct Announcement {
    declared: usize,
    sync: bool,
}

/// Parses a literal marker from the end of a CRLF-terminated line.
///
/// Matches `{N}\r\n` (synchronizing) and `{N+}\r\n` (non-synchronizing).
/// Oversized counts that do not fit a `usize` saturate so that the limit
/// check rejects them instead of the parser producing a confusing BAD.
fn literal_announcement(line: &[u8]) -> Option<Announcement> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let (line, sync) = match line.strip_suffix(b"+") {
        Some(rest) => (rest, false),
        None => (line, true),
    };
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let declared = std::str::from_utf8(digits)
        .ok()?
        .parse()
        .unwrap_or(usize::MAX);
    Some(Announcement { declared, sync })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::unreadable_literal
)]
mod tests {
    use super::*;

    fn frame(buffer: &mut FrameBuffer) -> Frame {
        match buffer.poll_frame().unwrap() {
            FrameEvent::Frame(f) => f,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn plain_line() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"a1 NOOP\r\n");
        let f = frame(&mut buffer);
        assert_eq!(f.line, b"a1 NOOP\r\n");
        assert!(f.literals.is_empty());
    }

    #[test]
    fn incomplete_line_needs_more_data() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"a1 NO");
        assert_eq!(buffer.poll_frame().unwrap(), FrameEvent::NeedMoreData);
        buffer.extend(b"OP\r\n");
        assert_eq!(frame(&mut buffer).line, b"a1 NOOP\r\n");
    }

    #[test]
    fn synchronizing_literal_requests_continuation() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"a1 LOGIN {5}\r\n");
        assert_eq!(buffer.poll_frame().unwrap(), FrameEvent::SendContinuation);
        assert_eq!(buffer.poll_frame().unwrap(), FrameEvent::NeedMoreData);
        assert!(buffer.awaiting_literal());

        buffer.extend(b"hello pass\r\n");
        let f = frame(&mut buffer);
        assert_eq!(f.line, b"a1 LOGIN {5}\r\n pass\r\n");
        assert_eq!(f.literals, vec![b"hello".to_vec()]);
    }

    #[test]
    fn non_synchronizing_literal_skips_continuation() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"a1 LOGIN {5+}\r\nhello pass\r\n");
        let f = frame(&mut buffer);
        assert_eq!(f.literals, vec![b"hello".to_vec()]);
    }

    #[test]
    fn literal_bytes_arrive_in_many_chunks() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"a1 X {5+}\r\n");
        for chunk in [&b"h"[..], b"el", b"lo"] {
            assert_eq!(buffer.poll_frame().unwrap(), FrameEvent::NeedMoreData);
            buffer.extend(chunk);
        }
        assert_eq!(buffer.poll_frame().unwrap(), FrameEvent::NeedMoreData);
        buffer.extend(b"\r\n");
        let f = frame(&mut buffer);
        assert_eq!(f.literals, vec![b"hello".to_vec()]);
    }

    #[test]
    fn multiple_literals_in_one_frame() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"a1 LOGIN {4+}\r\nuser {4+}\r\npass\r\n");
        let f = frame(&mut buffer);
        assert_eq!(f.literals, vec![b"user".to_vec(), b"pass".to_vec()]);
    }

    #[test]
    fn zero_length_literal() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"a1 X {0+}\r\n\r\n");
        let f = frame(&mut buffer);
        assert_eq!(f.literals, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn pipelined_frames_come_out_in_order() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"a1 NOOP\r\na2 CAPABILITY\r\n");
        assert_eq!(frame(&mut buffer).line, b"a1 NOOP\r\n");
        assert_eq!(frame(&mut buffer).line, b"a2 CAPABILITY\r\n");
        assert_eq!(buffer.poll_frame().unwrap(), FrameEvent::NeedMoreData);
    }

    #[test]
    fn oversized_line_is_fatal() {
        let mut buffer = FrameBuffer::new(16, 1024);
        buffer.extend(b"a1 this line is much too long\r\n");
        let err = buffer.poll_frame().unwrap_err();
        assert!(matches!(err, Error::LineTooLong { limit: 16 }));
    }

    #[test]
    fn oversized_line_without_crlf_is_fatal() {
        let mut buffer = FrameBuffer::new(16, 1024);
        buffer.extend(&[b'x'; 64]);
        assert!(buffer.poll_frame().is_err());
    }

    #[test]
    fn endless_literal_announcements_hit_the_line_limit() {
        let mut buffer = FrameBuffer::new(64, 1024);
        for _ in 0..8 {
            buffer.extend(b"x {0+}\r\n");
            assert_eq!(buffer.poll_frame().unwrap(), FrameEvent::NeedMoreData);
        }
        buffer.extend(b"x {0+}\r\n");
        let err = buffer.poll_frame().unwrap_err();
        assert!(matches!(err, Error::LineTooLong { limit: 64 }));
    }

    #[test]
    fn oversized_literal_is_rejected_before_payload() {
        let mut buffer = FrameBuffer::new(8192, 100);
        buffer.extend(b"a1 APPEND INBOX {5000}\r\n");
        let err = buffer.poll_frame().unwrap_err();
        assert!(matches!(
            err,
            Error::LiteralTooLarge {
                declared: 5000,
                limit: 100,
            }
        ));
    }

    #[test]
    fn absurd_literal_count_saturates_and_is_rejected() {
        let mut buffer = FrameBuffer::new(8192, 100);
        buffer.extend(b"a1 APPEND INBOX {99999999999999999999999}\r\n");
        assert!(buffer.poll_frame().is_err());
    }

    #[test]
    fn brace_text_that_is_not_a_marker_ends_the_frame() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"a1 X {abc}\r\n");
        let f = frame(&mut buffer);
        assert_eq!(f.line, b"a1 X {abc}\r\n");
        assert!(f.literals.is_empty());
    }

    #[test]
    fn take_line_strips_crlf() {
        let mut buffer = FrameBuffer::new(8192, 1024);
        buffer.extend(b"dGVzdA==\r\nrest");
        assert_eq!(buffer.take_line().unwrap(), Some(b"dGVzdA==".to_vec()));
        assert_eq!(buffer.take_line().unwrap(), None);
        assert_eq!(buffer.buffered_len(), 4);
    }
}
