//! Per-connection protocol loop.
//!
//! One task per connection: greet, then read bytes into the frame buffer,
//! answer continuation requests, dispatch complete frames one at a time,
//! and write each response as a single batch before committing the
//! session change it carries. Pipelined commands simply queue in the
//! buffer and are answered in order.
//!
//! The loop is generic over the stream so tests can drive it with an
//! in-memory duplex pipe instead of a TCP socket.

use std::sync::Arc;
use std::time::Duration;

use imapd_proto::{
    FrameBuffer, FrameEvent, ResponseCode, ResponseUnit, Status, Tag, Untagged, encode_unit,
    parse_command,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::{AuthExchange, AuthMechanism, AuthStep};
use crate::config::ServerConfig;
use crate::dispatch::{CAPABILITIES, Dispatch, Dispatcher, Reply};
use crate::error::Result;
use crate::handler::ImapHandler;
use crate::session::{SessionAction, SessionContext};

/// Resolves when a shutdown is signalled. A dropped sender means no
/// shutdown can ever arrive, so the future parks instead of resolving.
async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Renders a short printable excerpt of a rejected line, safe to echo back
/// in a BAD response. Control bytes become dots, long lines are truncated.
fn line_excerpt(line: &[u8]) -> String {
    const MAX: usize = 64;
    let body = line.strip_suffix(b"\r\n").unwrap_or(line);
    let mut out: String = body
        .iter()
        .take(MAX)
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect();
    if body.len() > MAX {
        out.push_str("...");
    }
    out
}

/// Why the connection loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent LOGOUT.
    Logout,
    /// Client closed the socket.
    PeerClosed,
    /// Idle, literal, or lifetime timeout expired.
    TimedOut,
    /// A non-recoverable framing violation (line or literal over limit).
    ProtocolViolation,
    /// Server-initiated shutdown.
    Shutdown,
}

/// One client connection being driven by the engine.
pub struct Connection<H, S> {
    stream: S,
    peer: String,
    dispatcher: Dispatcher<H>,
    session: SessionContext,
    frames: FrameBuffer,
    read_buf: Vec<u8>,
    idle_timeout: Duration,
    literal_timeout: Duration,
    deadline: Option<Instant>,
    shutdown: watch::Receiver<bool>,
}

enum FillOutcome {
    Data,
    PeerClosed,
    TimedOut,
    Shutdown,
}

/// One step of reading continuation data during a SASL exchange.
enum AuthLine {
    Line(String),
    Closed(CloseReason),
}

impl<H, S> Connection<H, S>
where
    H: ImapHandler,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Builds a connection over `stream` identified as `peer` in logs.
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        config: &ServerConfig,
        handler: Arc<H>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            peer: peer.into(),
            dispatcher: Dispatcher::new(handler, config.command_timeout),
            session: SessionContext::new(),
            frames: FrameBuffer::new(config.max_line_length, config.max_literal_length),
            read_buf: vec![0u8; config.read_watermark],
            idle_timeout: config.idle_timeout,
            literal_timeout: config.literal_timeout,
            deadline: config
                .max_connection_lifetime
                .map(|lifetime| Instant::now() + lifetime),
            shutdown,
        }
    }

    /// Runs the protocol loop to completion.
    pub async fn run(mut self) -> Result<CloseReason> {
        self.greet().await?;
        let reason = loop {
            match self.frames.poll_frame() {
                Ok(FrameEvent::Frame(frame)) => {
                    if let Some(reason) = self.handle_frame(frame).await? {
                        break reason;
                    }
                }
                Ok(FrameEvent::SendContinuation) => {
                    self.write_unit(&ResponseUnit::Continuation {
                        text: "OK".to_string(),
                    })
                    .await?;
                }
                Ok(FrameEvent::NeedMoreData) => match self.fill().await? {
                    FillOutcome::Data => {}
                    FillOutcome::PeerClosed => break CloseReason::PeerClosed,
                    FillOutcome::TimedOut => break CloseReason::TimedOut,
                    FillOutcome::Shutdown => break CloseReason::Shutdown,
                },
                Err(err) => {
                    warn!(peer = %self.peer, error = %err, "framing violation");
                    self.write_unit(&ResponseUnit::untagged_status(
                        Status::Bad,
                        err.to_string(),
                    ))
                    .await?;
                    break CloseReason::ProtocolViolation;
                }
            }
        };
        info!(peer = %self.peer, reason = ?reason, "connection closed");
        Ok(reason)
    }

    async fn greet(&mut self) -> Result<()> {
        let caps = CAPABILITIES.iter().map(ToString::to_string).collect();
        self.write_unit(&ResponseUnit::Untagged(Untagged::Status {
            status: Status::Ok,
            code: Some(ResponseCode::Capability(caps)),
            text: "imapd ready".to_string(),
        }))
        .await
    }

    /// Parses and dispatches one frame. Returns the close reason when the
    /// frame ends the connection.
    async fn handle_frame(&mut self, frame: imapd_proto::Frame) -> Result<Option<CloseReason>> {
        let preview = line_excerpt(&frame.line);
        let command = match parse_command(frame) {
            Ok(command) => command,
            // Parse failures are per-command: report BAD and keep going.
            Err(err) => {
                debug!(peer = %self.peer, error = %err, "rejecting malformed command");
                let unit = match err {
                    imapd_proto::Error::Parse {
                        tag: Some(tag),
                        message,
                        ..
                    } => ResponseUnit::tagged(Tag::new(tag), Status::Bad, message),
                    // No tag to address, so quote the offending input instead.
                    other => ResponseUnit::untagged_status(
                        Status::Bad,
                        format!("{other} in \"{preview}\""),
                    ),
                };
                self.write_unit(&unit).await?;
                return Ok(None);
            }
        };

        match self.dispatcher.dispatch(&self.session, command).await {
            Dispatch::Reply(reply) => self.commit(reply).await,
            Dispatch::StartAuth {
                tag,
                mechanism,
                initial,
            } => self.authenticate(tag, mechanism, initial).await,
        }
    }

    /// Writes a reply as one batch, then commits its session action.
    async fn commit(&mut self, reply: Reply) -> Result<Option<CloseReason>> {
        let mut out = Vec::new();
        for unit in &reply.units {
            encode_unit(unit, &mut out);
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;

        let closing = reply.action == SessionAction::Logout;
        self.session.apply(reply.action);
        Ok(closing.then_some(CloseReason::Logout))
    }

    /// Drives a SASL exchange: continuation prompts out, base64 lines in.
    async fn authenticate(
        &mut self,
        tag: Tag,
        mechanism: AuthMechanism,
        initial: Option<String>,
    ) -> Result<Option<CloseReason>> {
        let (mut exchange, mut step) = AuthExchange::start(mechanism, initial.as_deref());
        loop {
            match step {
                AuthStep::Continue(prompt) => {
                    self.write_unit(&ResponseUnit::Continuation {
                        text: prompt.to_string(),
                    })
                    .await?;
                    match self.read_auth_line().await? {
                        AuthLine::Line(line) => step = exchange.feed(&line),
                        AuthLine::Closed(reason) => return Ok(Some(reason)),
                    }
                }
                AuthStep::Done(credentials) => {
                    let reply = self.dispatcher.finish_auth(tag, &self.session, credentials).await;
                    return self.commit(reply).await;
                }
                AuthStep::Cancelled => {
                    let reply = Reply {
                        units: vec![ResponseUnit::tagged(
                            tag,
                            Status::Bad,
                            "AUTHENTICATE cancelled",
                        )],
                        action: SessionAction::None,
                    };
                    return self.commit(reply).await;
                }
                AuthStep::Failed(text) => {
                    let reply = Reply {
                        units: vec![ResponseUnit::tagged(tag, Status::Bad, text)],
                        action: SessionAction::None,
                    };
                    return self.commit(reply).await;
                }
            }
        }
    }

    /// Reads one raw client line during a SASL exchange.
    ///
    /// Framing violations here are handled the same way as in the command
    /// loop: an untagged BAD, then the connection closes.
    async fn read_auth_line(&mut self) -> Result<AuthLine> {
        loop {
            match self.frames.take_line() {
                Ok(Some(line)) => {
                    return Ok(AuthLine::Line(String::from_utf8_lossy(&line).into_owned()));
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(peer = %self.peer, error = %err, "framing violation");
                    self.write_unit(&ResponseUnit::untagged_status(
                        Status::Bad,
                        err.to_string(),
                    ))
                    .await?;
                    return Ok(AuthLine::Closed(CloseReason::ProtocolViolation));
                }
            }
            match self.fill().await? {
                FillOutcome::Data => {}
                FillOutcome::PeerClosed => return Ok(AuthLine::Closed(CloseReason::PeerClosed)),
                FillOutcome::TimedOut => return Ok(AuthLine::Closed(CloseReason::TimedOut)),
                FillOutcome::Shutdown => return Ok(AuthLine::Closed(CloseReason::Shutdown)),
            }
        }
    }

    /// Reads more bytes, bounded by the applicable timeout.
    async fn fill(&mut self) -> Result<FillOutcome> {
        let mut timeout = if self.frames.awaiting_literal() {
            self.literal_timeout
        } else {
            self.idle_timeout
        };
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.bye("connection lifetime exceeded").await?;
                return Ok(FillOutcome::TimedOut);
            }
            timeout = timeout.min(remaining);
        }

        let read = tokio::select! {
            read = tokio::time::timeout(timeout, self.stream.read(&mut self.read_buf)) => read,
            () = wait_shutdown(&mut self.shutdown) => {
                self.bye("server shutting down").await?;
                return Ok(FillOutcome::Shutdown);
            }
        };
        match read {
            Ok(Ok(0)) => Ok(FillOutcome::PeerClosed),
            Ok(Ok(n)) => {
                self.frames.extend(&self.read_buf[..n]);
                Ok(FillOutcome::Data)
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => {
                let why = if self.frames.awaiting_literal() {
                    "timed out waiting for literal data"
                } else {
                    "idle timeout, closing connection"
                };
                self.bye(why).await?;
                Ok(FillOutcome::TimedOut)
            }
        }
    }

    async fn bye(&mut self, text: &str) -> Result<()> {
        self.write_unit(&ResponseUnit::untagged_status(Status::Bye, text))
            .await
    }

    async fn write_unit(&mut self, unit: &ResponseUnit) -> Result<()> {
        let mut out = Vec::new();
        encode_unit(unit, &mut out);
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;
    use crate::handler::{
        Credentials, FetchRequest, HandlerError, HandlerResult, MailboxInfo, MailboxSummary,
        MessageData, SelectRequest, StatusItem, StoreRequest, StoredFlags,
    };
    use crate::session::{SessionView, UserId};
    use imapd_proto::{Argument, SequenceSet};

    struct NoopHandler;

    impl ImapHandler for NoopHandler {
        async fn authenticate(
            &self,
            _s: SessionView,
            _c: Credentials,
        ) -> HandlerResult<UserId> {
            Err(HandlerError::invalid_credentials())
        }
        async fn list(
            &self,
            _s: SessionView,
            _r: String,
            _p: String,
        ) -> HandlerResult<Vec<MailboxInfo>> {
            Ok(Vec::new())
        }
        async fn select(
            &self,
            _s: SessionView,
            _r: SelectRequest,
        ) -> HandlerResult<MailboxSummary> {
            Err(HandlerError::unsupported("SELECT"))
        }
        async fn create(&self, _s: SessionView, _m: String) -> HandlerResult<()> {
            Ok(())
        }
        async fn delete(&self, _s: SessionView, _m: String) -> HandlerResult<()> {
            Ok(())
        }
        async fn rename(&self, _s: SessionView, _f: String, _t: String) -> HandlerResult<()> {
            Ok(())
        }
        async fn subscribe(&self, _s: SessionView, _m: String) -> HandlerResult<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _s: SessionView, _m: String) -> HandlerResult<()> {
            Ok(())
        }
        async fn status(
            &self,
            _s: SessionView,
            _m: String,
            _i: Vec<StatusItem>,
        ) -> HandlerResult<Vec<(StatusItem, u32)>> {
            Ok(Vec::new())
        }
        async fn append(
            &self,
            _s: SessionView,
            _r: crate::handler::AppendRequest,
        ) -> HandlerResult<Option<u32>> {
            Ok(None)
        }
        async fn fetch(
            &self,
            _s: SessionView,
            _r: FetchRequest,
        ) -> HandlerResult<Vec<MessageData>> {
            Ok(Vec::new())
        }
        async fn store(
            &self,
            _s: SessionView,
            _r: StoreRequest,
        ) -> HandlerResult<Vec<StoredFlags>> {
            Ok(Vec::new())
        }
        async fn search(
            &self,
            _s: SessionView,
            _c: Vec<Argument>,
        ) -> HandlerResult<Vec<u32>> {
            Ok(Vec::new())
        }
        async fn copy(
            &self,
            _s: SessionView,
            _set: SequenceSet,
            _m: String,
        ) -> HandlerResult<()> {
            Ok(())
        }
        async fn expunge(&self, _s: SessionView) -> HandlerResult<Vec<u32>> {
            Ok(Vec::new())
        }
    }

    const GREETING: &[u8] =
        b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN AUTH=LOGIN LITERAL+] imapd ready\r\n";

    fn connection(
        stream: tokio_test::io::Mock,
    ) -> Connection<NoopHandler, tokio_test::io::Mock> {
        let (_tx, rx) = watch::channel(false);
        Connection::new(stream, "mock", &ServerConfig::default(), Arc::new(NoopHandler), rx)
    }

    #[tokio::test]
    async fn greets_and_answers_noop() {
        let stream = tokio_test::io::Builder::new()
            .write(GREETING)
            .read(b"a1 NOOP\r\n")
            .write(b"a1 OK NOOP completed\r\n")
            .build();
        let reason = connection(stream).run().await.unwrap();
        assert_eq!(reason, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn logout_ends_the_loop() {
        let stream = tokio_test::io::Builder::new()
            .write(GREETING)
            .read(b"a1 LOGOUT\r\n")
            .write(b"* BYE server logging out\r\na1 OK LOGOUT completed\r\n")
            .build();
        let reason = connection(stream).run().await.unwrap();
        assert_eq!(reason, CloseReason::Logout);
    }

    #[tokio::test]
    async fn rejected_login_keeps_the_session_open() {
        let stream = tokio_test::io::Builder::new()
            .write(GREETING)
            .read(b"a1 LOGIN alice wrong\r\n")
            .write(b"a1 NO Invalid credentials\r\n")
            .read(b"a2 NOOP\r\n")
            .write(b"a2 OK NOOP completed\r\n")
            .build();
        let reason = connection(stream).run().await.unwrap();
        assert_eq!(reason, CloseReason::PeerClosed);
    }
}
