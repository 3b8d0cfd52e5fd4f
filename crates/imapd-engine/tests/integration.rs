//! End-to-end transcripts over an in-memory duplex pipe.

#![allow(clippy::unwrap_used, clippy::redundant_clone)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use imapd_engine::{
    CloseReason, Connection, Credentials, FetchRequest, HandlerError, HandlerResult, ImapHandler,
    MailboxInfo, MailboxSummary, MessageData, SelectRequest, ServerConfig, SessionView,
    StatusItem, StoreRequest, StoredFlags, UserId,
};
use imapd_proto::{Argument, ImapValue, SequenceSet};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const GREETING: &str =
    "* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN AUTH=LOGIN LITERAL+] imapd ready\r\n";

/// Fixed-behavior handler: password `sesame`, one mailbox `INBOX` with
/// three messages, message 2 carrying a 14-byte body.
#[derive(Default)]
struct TestHandler {
    fetch_calls: AtomicUsize,
}

impl ImapHandler for TestHandler {
    async fn authenticate(
        &self,
        _session: SessionView,
        credentials: Credentials,
    ) -> HandlerResult<UserId> {
        let (user, password) = match credentials {
            Credentials::Login { username, password } => (username, password),
            Credentials::Plain { identity, password } => (identity, password),
        };
        if password == "sesame" {
            Ok(UserId::new(user))
        } else {
            Err(HandlerError::invalid_credentials())
        }
    }

    async fn list(
        &self,
        _session: SessionView,
        _reference: String,
        _pattern: String,
    ) -> HandlerResult<Vec<MailboxInfo>> {
        Ok(vec![MailboxInfo {
            name: "INBOX".to_string(),
            delimiter: Some('/'),
            attributes: Vec::new(),
        }])
    }

    async fn select(
        &self,
        _session: SessionView,
        request: SelectRequest,
    ) -> HandlerResult<MailboxSummary> {
        if request.mailbox == "INBOX" {
            Ok(MailboxSummary {
                exists: 3,
                recent: 0,
                uid_validity: Some(1111),
                ..MailboxSummary::default()
            })
        } else {
            Err(HandlerError::no_such_mailbox(&request.mailbox))
        }
    }

    async fn create(&self, _session: SessionView, _mailbox: String) -> HandlerResult<()> {
        Ok(())
    }

    async fn delete(&self, _session: SessionView, _mailbox: String) -> HandlerResult<()> {
        Ok(())
    }

    async fn rename(
        &self,
        _session: SessionView,
        _from: String,
        _to: String,
    ) -> HandlerResult<()> {
        Ok(())
    }

    async fn subscribe(&self, _session: SessionView, _mailbox: String) -> HandlerResult<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _session: SessionView, _mailbox: String) -> HandlerResult<()> {
        Ok(())
    }

    async fn status(
        &self,
        _session: SessionView,
        _mailbox: String,
        items: Vec<StatusItem>,
    ) -> HandlerResult<Vec<(StatusItem, u32)>> {
        Ok(items.into_iter().map(|item| (item, 3)).collect())
    }

    async fn append(
        &self,
        _session: SessionView,
        _request: imapd_engine::AppendRequest,
    ) -> HandlerResult<Option<u32>> {
        Ok(None)
    }

    async fn fetch(
        &self,
        _session: SessionView,
        request: FetchRequest,
    ) -> HandlerResult<Vec<MessageData>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let items = request
            .items
            .iter()
            .map(|item| (item.clone(), ImapValue::Literal(b"Hello, world!\n".to_vec())))
            .collect();
        Ok(vec![MessageData { seq: 2, items }])
    }

    async fn store(
        &self,
        _session: SessionView,
        request: StoreRequest,
    ) -> HandlerResult<Vec<StoredFlags>> {
        Ok(vec![StoredFlags {
            seq: 1,
            flags: request.flags,
        }])
    }

    async fn search(
        &self,
        _session: SessionView,
        _criteria: Vec<Argument>,
    ) -> HandlerResult<Vec<u32>> {
        Ok(vec![1, 3])
    }

    async fn copy(
        &self,
        _session: SessionView,
        _set: SequenceSet,
        _mailbox: String,
    ) -> HandlerResult<()> {
        Ok(())
    }

    async fn expunge(&self, _session: SessionView) -> HandlerResult<Vec<u32>> {
        Ok(Vec::new())
    }
}

struct Client {
    stream: DuplexStream,
    task: JoinHandle<imapd_engine::Result<CloseReason>>,
    shutdown: watch::Sender<bool>,
}

impl Client {
    fn start(handler: Arc<TestHandler>, config: ServerConfig) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (shutdown, rx) = watch::channel(false);
        let connection = Connection::new(server, "test", &config, handler, rx);
        Self {
            stream: client,
            task: tokio::spawn(connection.run()),
            shutdown,
        }
    }

    fn with_defaults() -> Self {
        Self::start(Arc::new(TestHandler::default()), ServerConfig::default())
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Reads exactly as many bytes as `expected` and compares.
    async fn expect(&mut self, expected: &str) {
        let mut buf = vec![0u8; expected.len()];
        self.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&buf), expected);
    }

    async fn expect_eof(&mut self) {
        let mut buf = [0u8; 1];
        assert_eq!(self.stream.read(&mut buf).await.unwrap(), 0);
    }

    async fn finish(self) -> CloseReason {
        drop(self.stream);
        self.task.await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn greeting_login_logout() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 LOGIN alice sesame\r\n").await;
    client.expect("a1 OK LOGIN completed\r\n").await;

    client.send(b"a2 LOGOUT\r\n").await;
    client
        .expect("* BYE server logging out\r\na2 OK LOGOUT completed\r\n")
        .await;
    assert_eq!(client.finish().await, CloseReason::Logout);
}

#[tokio::test]
async fn select_transcript() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 LOGIN alice sesame\r\n").await;
    client.expect("a1 OK LOGIN completed\r\n").await;

    client.send(b"a2 SELECT INBOX\r\n").await;
    client
        .expect(
            "* 3 EXISTS\r\n\
             * 0 RECENT\r\n\
             * OK [UIDVALIDITY 1111]\r\n\
             a2 OK [READ-WRITE] SELECT completed\r\n",
        )
        .await;
}

#[tokio::test]
async fn synchronizing_literal_gets_continuation() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 LOGIN alice {6}\r\n").await;
    client.expect("+ OK\r\n").await;
    client.send(b"sesame\r\n").await;
    client.expect("a1 OK LOGIN completed\r\n").await;
}

#[tokio::test]
async fn non_synchronizing_literal_needs_no_continuation() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 LOGIN {5+}\r\nalice {6+}\r\nsesame\r\n").await;
    client.expect("a1 OK LOGIN completed\r\n").await;
}

#[tokio::test]
async fn pipelined_commands_answered_in_order() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 NOOP\r\na2 NOOP\r\na3 NOOP\r\n").await;
    client
        .expect("a1 OK NOOP completed\r\na2 OK NOOP completed\r\na3 OK NOOP completed\r\n")
        .await;
}

#[tokio::test]
async fn fetch_body_renders_literal() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 LOGIN alice sesame\r\n").await;
    client.expect("a1 OK LOGIN completed\r\n").await;
    client.send(b"a2 SELECT INBOX\r\n").await;
    client
        .expect(
            "* 3 EXISTS\r\n* 0 RECENT\r\n* OK [UIDVALIDITY 1111]\r\n\
             a2 OK [READ-WRITE] SELECT completed\r\n",
        )
        .await;

    client.send(b"a3 FETCH 2 BODY[]\r\n").await;
    client
        .expect("* 2 FETCH (BODY[] {14}\r\nHello, world!\n)\r\na3 OK FETCH completed\r\n")
        .await;
}

#[tokio::test]
async fn fetch_before_select_never_reaches_handler() {
    let handler = Arc::new(TestHandler::default());
    let mut client = Client::start(Arc::clone(&handler), ServerConfig::default());
    client.expect(GREETING).await;

    client.send(b"a1 FETCH 1 FLAGS\r\n").await;
    client.expect("a1 BAD Command not valid in this state\r\n").await;
    assert_eq!(handler.fetch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn commands_after_logout_are_not_processed() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 LOGOUT\r\na2 NOOP\r\n").await;
    client
        .expect("* BYE server logging out\r\na1 OK LOGOUT completed\r\n")
        .await;
    client.expect_eof().await;
    assert_eq!(client.finish().await, CloseReason::Logout);
}

#[tokio::test]
async fn malformed_command_gets_tagged_bad_and_session_continues() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 LOGIN \"unterminated\r\n").await;
    client
        .expect("a1 BAD line break inside quoted string\r\n")
        .await;
    client.send(b"a2 NOOP\r\n").await;
    client.expect("a2 OK NOOP completed\r\n").await;
}

#[tokio::test]
async fn tagless_parse_failure_quotes_the_input() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"(oops NOOP\r\n").await;
    client
        .expect(
            "* BAD parse error at position 1: expected command tag, got LParen \
             in \"(oops NOOP\"\r\n",
        )
        .await;
    client.send(b"a2 NOOP\r\n").await;
    client.expect("a2 OK NOOP completed\r\n").await;
}

#[tokio::test]
async fn oversized_literal_announcement_closes_connection() {
    let config = ServerConfig::builder("127.0.0.1", 0)
        .max_literal_length(64)
        .build();
    let mut client = Client::start(Arc::new(TestHandler::default()), config);
    client.expect(GREETING).await;

    client.send(b"a1 LOGIN alice {4096}\r\n").await;
    client
        .expect("* BAD literal of 4096 bytes exceeds maximum of 64 bytes\r\n")
        .await;
    client.expect_eof().await;
    assert_eq!(client.finish().await, CloseReason::ProtocolViolation);
}

#[tokio::test]
async fn runaway_literal_announcements_close_the_connection() {
    let config = ServerConfig::builder("127.0.0.1", 0)
        .max_line_length(64)
        .build();
    let mut client = Client::start(Arc::new(TestHandler::default()), config);
    client.expect(GREETING).await;

    // Each zero-length LITERAL+ keeps the same logical line open, so the
    // line limit must apply to the accumulated command, not each segment.
    for _ in 0..8 {
        client.send(b"a1 X {0+}\r\n").await;
    }
    client
        .expect("* BAD line exceeds maximum length of 64 bytes\r\n")
        .await;
    client.expect_eof().await;
    assert_eq!(client.finish().await, CloseReason::ProtocolViolation);
}

#[tokio::test]
async fn authenticate_plain_over_the_wire() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 AUTHENTICATE PLAIN\r\n").await;
    client.expect("+ \r\n").await;
    // base64("\0alice\0sesame")
    client.send(b"AGFsaWNlAHNlc2FtZQ==\r\n").await;
    client.expect("a1 OK AUTHENTICATE completed\r\n").await;

    client.send(b"a2 SELECT INBOX\r\n").await;
    client
        .expect(
            "* 3 EXISTS\r\n* 0 RECENT\r\n* OK [UIDVALIDITY 1111]\r\n\
             a2 OK [READ-WRITE] SELECT completed\r\n",
        )
        .await;
}

#[tokio::test]
async fn authenticate_login_prompts_twice() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 AUTHENTICATE LOGIN\r\n").await;
    client.expect("+ VXNlcm5hbWU6\r\n").await;
    client.send(b"YWxpY2U=\r\n").await;
    client.expect("+ UGFzc3dvcmQ6\r\n").await;
    client.send(b"c2VzYW1l\r\n").await;
    client.expect("a1 OK AUTHENTICATE completed\r\n").await;
}

#[tokio::test]
async fn authenticate_cancel_is_bad() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.send(b"a1 AUTHENTICATE LOGIN\r\n").await;
    client.expect("+ VXNlcm5hbWU6\r\n").await;
    client.send(b"*\r\n").await;
    client.expect("a1 BAD AUTHENTICATE cancelled\r\n").await;
    client.send(b"a2 NOOP\r\n").await;
    client.expect("a2 OK NOOP completed\r\n").await;
}

#[tokio::test]
async fn oversized_auth_line_gets_bad_then_close() {
    let config = ServerConfig::builder("127.0.0.1", 0)
        .max_line_length(64)
        .build();
    let mut client = Client::start(Arc::new(TestHandler::default()), config);
    client.expect(GREETING).await;

    client.send(b"a1 AUTHENTICATE LOGIN\r\n").await;
    client.expect("+ VXNlcm5hbWU6\r\n").await;
    let mut long_line = vec![b'A'; 100];
    long_line.extend_from_slice(b"\r\n");
    client.send(&long_line).await;
    client
        .expect("* BAD line exceeds maximum length of 64 bytes\r\n")
        .await;
    client.expect_eof().await;
    assert_eq!(client.finish().await, CloseReason::ProtocolViolation);
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_sends_bye() {
    let config = ServerConfig::builder("127.0.0.1", 0)
        .idle_timeout(Duration::from_secs(5))
        .build();
    let mut client = Client::start(Arc::new(TestHandler::default()), config);
    client.expect(GREETING).await;

    // No commands; paused time advances past the idle deadline.
    client.expect("* BYE idle timeout, closing connection\r\n").await;
    client.expect_eof().await;
    assert_eq!(client.finish().await, CloseReason::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn literal_timeout_uses_literal_deadline() {
    let config = ServerConfig::builder("127.0.0.1", 0)
        .idle_timeout(Duration::from_secs(3600))
        .literal_timeout(Duration::from_secs(10))
        .build();
    let mut client = Client::start(Arc::new(TestHandler::default()), config);
    client.expect(GREETING).await;

    client.send(b"a1 LOGIN alice {6}\r\n").await;
    client.expect("+ OK\r\n").await;
    // Promised literal bytes never arrive.
    client
        .expect("* BYE timed out waiting for literal data\r\n")
        .await;
    client.expect_eof().await;
}

#[tokio::test]
async fn shutdown_signal_says_bye() {
    let mut client = Client::with_defaults();
    client.expect(GREETING).await;

    client.shutdown.send(true).unwrap();
    client.expect("* BYE server shutting down\r\n").await;
    client.expect_eof().await;
    assert_eq!(client.finish().await, CloseReason::Shutdown);
}

#[tokio::test]
async fn serve_drains_connections_before_returning() {
    use imapd_engine::Server;
    use tokio::net::{TcpListener, TcpStream};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(ServerConfig::default(), Arc::new(TestHandler::default()));
    let handle = server.shutdown_handle();
    let serve = tokio::spawn(server.serve(listener));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut greeting = vec![0u8; GREETING.len()];
    stream.read_exact(&mut greeting).await.unwrap();
    assert_eq!(String::from_utf8_lossy(&greeting), GREETING);

    handle.shutdown();
    serve.await.unwrap().unwrap();

    // serve has returned, so the BYE must already be on the wire.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert_eq!(String::from_utf8_lossy(&rest), "* BYE server shutting down\r\n");
}
