//! Minimal in-memory IMAP server.
//!
//! Accepts any login whose password is `password`, serves a single INBOX
//! holding two canned messages, and supports enough of the command set to
//! poke at with `openssl s_client`-style plain telnet:
//!
//! ```text
//! cargo run --example memory_server
//! nc 127.0.0.1 1143
//! ```

use std::sync::Arc;

use imapd_engine::{
    AppendRequest, Credentials, FetchRequest, HandlerError, HandlerResult, ImapHandler,
    MailboxInfo, MailboxSummary, MessageData, SelectRequest, Server, ServerConfig, SessionView,
    StatusItem, StoreRequest, StoredFlags, UserId,
};
use imapd_proto::{Argument, ImapValue, SequenceSet};
use tokio::sync::Mutex;

struct Message {
    flags: Vec<String>,
    body: Vec<u8>,
}

struct MemoryStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryStore {
    fn new() -> Self {
        let canned = |body: &str| Message {
            flags: Vec::new(),
            body: body.as_bytes().to_vec(),
        };
        Self {
            messages: Mutex::new(vec![
                canned("Subject: hello\r\n\r\nfirst message\r\n"),
                canned("Subject: again\r\n\r\nsecond message\r\n"),
            ]),
        }
    }

    async fn sequence(&self, set: &SequenceSet) -> Vec<u32> {
        let len = u32::try_from(self.messages.lock().await.len()).unwrap_or(u32::MAX);
        (1..=len).filter(|&seq| contains(set, seq, len)).collect()
    }
}

fn contains(set: &SequenceSet, seq: u32, max: u32) -> bool {
    match set {
        SequenceSet::All => true,
        SequenceSet::Single(n) => n.get() == seq,
        SequenceSet::Range(lo, hi) => (lo.get()..=hi.get()).contains(&seq),
        SequenceSet::RangeFrom(lo) => (lo.get()..=max).contains(&seq),
        SequenceSet::Set(parts) => parts.iter().any(|part| contains(part, seq, max)),
    }
}

impl ImapHandler for MemoryStore {
    async fn authenticate(
        &self,
        _session: SessionView,
        credentials: Credentials,
    ) -> HandlerResult<UserId> {
        let (user, password) = match credentials {
            Credentials::Login { username, password } => (username, password),
            Credentials::Plain { identity, password } => (identity, password),
        };
        if password == "password" {
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
        if !request.mailbox.eq_ignore_ascii_case("INBOX") {
            return Err(HandlerError::no_such_mailbox(&request.mailbox));
        }
        let messages = self.messages.lock().await;
        Ok(MailboxSummary {
            exists: u32::try_from(messages.len()).unwrap_or(u32::MAX),
            recent: 0,
            unseen: messages
                .iter()
                .position(|m| !m.flags.iter().any(|f| f == "\\Seen"))
                .map(|i| u32::try_from(i).unwrap_or(u32::MAX) + 1),
            uid_validity: Some(1),
            uid_next: Some(u32::try_from(messages.len()).unwrap_or(u32::MAX) + 1),
            flags: vec!["\\Seen".to_string(), "\\Deleted".to_string()],
            permanent_flags: None,
        })
    }

    async fn create(&self, _session: SessionView, _mailbox: String) -> HandlerResult<()> {
        Err(HandlerError::unsupported("CREATE"))
    }

    async fn delete(&self, _session: SessionView, _mailbox: String) -> HandlerResult<()> {
        Err(HandlerError::unsupported("DELETE"))
    }

    async fn rename(
        &self,
        _session: SessionView,
        _from: String,
        _to: String,
    ) -> HandlerResult<()> {
        Err(HandlerError::unsupported("RENAME"))
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
        mailbox: String,
        items: Vec<StatusItem>,
    ) -> HandlerResult<Vec<(StatusItem, u32)>> {
        if !mailbox.eq_ignore_ascii_case("INBOX") {
            return Err(HandlerError::no_such_mailbox(&mailbox));
        }
        let count = u32::try_from(self.messages.lock().await.len()).unwrap_or(u32::MAX);
        Ok(items
            .into_iter()
            .map(|item| {
                let value = match item {
                    StatusItem::Messages | StatusItem::Unseen => count,
                    StatusItem::Recent => 0,
                    StatusItem::UidNext => count + 1,
                    StatusItem::UidValidity => 1,
                };
                (item, value)
            })
            .collect())
    }

    async fn append(
        &self,
        _session: SessionView,
        request: AppendRequest,
    ) -> HandlerResult<Option<u32>> {
        if !request.mailbox.eq_ignore_ascii_case("INBOX") {
            return Err(HandlerError::no_such_mailbox(&request.mailbox));
        }
        let mut messages = self.messages.lock().await;
        messages.push(Message {
            flags: request.flags,
            body: request.message,
        });
        Ok(Some(u32::try_from(messages.len()).unwrap_or(u32::MAX)))
    }

    async fn fetch(
        &self,
        _session: SessionView,
        request: FetchRequest,
    ) -> HandlerResult<Vec<MessageData>> {
        let seqs = self.sequence(&request.set).await;
        let messages = self.messages.lock().await;
        let mut out = Vec::new();
        for seq in seqs {
            let Some(message) = messages.get(seq as usize - 1) else {
                continue;
            };
            let items = request
                .items
                .iter()
                .filter_map(|item| match item.as_str() {
                    "FLAGS" => Some((
                        item.clone(),
                        ImapValue::List(
                            message.flags.iter().cloned().map(ImapValue::Atom).collect(),
                        ),
                    )),
                    "RFC822.SIZE" => Some((
                        item.clone(),
                        ImapValue::Number(u32::try_from(message.body.len()).unwrap_or(u32::MAX)),
                    )),
                    "BODY[]" | "RFC822" => {
                        Some((item.clone(), ImapValue::Literal(message.body.clone())))
                    }
                    _ => None,
                })
                .collect();
            out.push(MessageData { seq, items });
        }
        Ok(out)
    }

    async fn store(
        &self,
        _session: SessionView,
        request: StoreRequest,
    ) -> HandlerResult<Vec<StoredFlags>> {
        let seqs = self.sequence(&request.set).await;
        let mut messages = self.messages.lock().await;
        let mut out = Vec::new();
        for seq in seqs {
            let Some(message) = messages.get_mut(seq as usize - 1) else {
                continue;
            };
            match request.mode {
                imapd_engine::StoreMode::Set => message.flags = request.flags.clone(),
                imapd_engine::StoreMode::Add => {
                    for flag in &request.flags {
                        if !message.flags.contains(flag) {
                            message.flags.push(flag.clone());
                        }
                    }
                }
                imapd_engine::StoreMode::Remove => {
                    message.flags.retain(|flag| !request.flags.contains(flag));
                }
            }
            out.push(StoredFlags {
                seq,
                flags: message.flags.clone(),
            });
        }
        Ok(out)
    }

    async fn search(
        &self,
        _session: SessionView,
        _criteria: Vec<Argument>,
    ) -> HandlerResult<Vec<u32>> {
        let count = u32::try_from(self.messages.lock().await.len()).unwrap_or(u32::MAX);
        Ok((1..=count).collect())
    }

    async fn copy(
        &self,
        _session: SessionView,
        _set: SequenceSet,
        mailbox: String,
    ) -> HandlerResult<()> {
        if mailbox.eq_ignore_ascii_case("INBOX") {
            Ok(())
        } else {
            Err(HandlerError::no_such_mailbox(&mailbox))
        }
    }

    async fn expunge(&self, _session: SessionView) -> HandlerResult<Vec<u32>> {
        let mut messages = self.messages.lock().await;
        let mut expunged = Vec::new();
        let mut seq = 1u32;
        messages.retain(|message| {
            let deleted = message.flags.iter().any(|f| f == "\\Deleted");
            if deleted {
                expunged.push(seq);
            } else {
                seq += 1;
            }
            !deleted
        });
        Ok(expunged)
    }
}

#[tokio::main]
async fn main() -> imapd_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::builder("127.0.0.1", 1143)
        .max_connections(64)
        .build();
    Server::new(config, Arc::new(MemoryStore::new())).run().await
}
