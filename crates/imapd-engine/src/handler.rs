//! The handler boundary.
//!
//! The engine owns the wire; the embedding application owns the mail.
//! [`ImapHandler`] is the fixed capability set an application implements
//! once and injects at construction: one operation per command family,
//! receiving already-parsed and already-state-validated arguments plus a
//! read-only [`SessionView`], returning a structured success value or a
//! classified [`HandlerError`]. Handlers never touch wire bytes.
//!
//! All methods return `Send` futures so connections can run on any
//! executor thread; a handler is expected to suspend freely while it talks
//! to storage without blocking other connections.

use std::future::Future;

use imapd_proto::{Argument, ImapValue, SequenceSet};
use thiserror::Error;

use crate::session::{SessionView, UserId};

/// Classified handler failure.
///
/// The classification decides the response status: business-rule failures
/// become tagged NO, semantically invalid requests become tagged BAD.
/// Either way the session continues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Business-rule failure (tagged NO).
    #[error("{0}")]
    Rejected(String),
    /// Semantically invalid request (tagged BAD).
    #[error("{0}")]
    Invalid(String),
}

impl HandlerError {
    /// Failed credential verification.
    #[must_use]
    pub fn invalid_credentials() -> Self {
        Self::Rejected("Invalid credentials".to_string())
    }

    /// The named mailbox does not exist.
    #[must_use]
    pub fn no_such_mailbox(name: &str) -> Self {
        Self::Rejected(format!("No such mailbox: {name}"))
    }

    /// The operation is not supported by this handler set.
    #[must_use]
    pub fn unsupported(what: &str) -> Self {
        Self::Rejected(format!("{what} not supported"))
    }
}

/// Result type for handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Credentials assembled from LOGIN or an AUTHENTICATE exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// LOGIN command or SASL LOGIN mechanism.
    Login {
        /// Username as supplied.
        username: String,
        /// Password as supplied.
        password: String,
    },
    /// SASL PLAIN mechanism.
    Plain {
        /// Authentication identity (authcid).
        identity: String,
        /// Password.
        password: String,
    },
}

/// One mailbox in a LIST or LSUB result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxInfo {
    /// Mailbox name.
    pub name: String,
    /// Hierarchy delimiter, `None` for a flat namespace.
    pub delimiter: Option<char>,
    /// Name attributes such as `\Noselect`.
    pub attributes: Vec<String>,
}

/// A SELECT or EXAMINE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectRequest {
    /// Mailbox to open.
    pub mailbox: String,
    /// `true` for EXAMINE.
    pub read_only: bool,
}

/// Mailbox facts reported on a successful SELECT or EXAMINE.
///
/// Optional fields are omitted from the response when `None`; `exists`
/// and `recent` are always reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxSummary {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// Sequence number of the first unseen message.
    pub unseen: Option<u32>,
    /// UIDVALIDITY value.
    pub uid_validity: Option<u32>,
    /// Next UID to be assigned.
    pub uid_next: Option<u32>,
    /// Flags defined in the mailbox.
    pub flags: Vec<String>,
    /// Flags the client may change permanently.
    pub permanent_flags: Option<Vec<String>>,
}

/// STATUS data items a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusItem {
    /// Number of messages.
    Messages,
    /// Number of recent messages.
    Recent,
    /// Number of unseen messages.
    Unseen,
    /// Next UID.
    UidNext,
    /// UIDVALIDITY value.
    UidValidity,
}

impl StatusItem {
    /// Parses an item name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MESSAGES" => Some(Self::Messages),
            "RECENT" => Some(Self::Recent),
            "UNSEEN" => Some(Self::Unseen),
            "UIDNEXT" => Some(Self::UidNext),
            "UIDVALIDITY" => Some(Self::UidValidity),
            _ => None,
        }
    }

    /// Returns the wire name of the item.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "MESSAGES",
            Self::Recent => "RECENT",
            Self::Unseen => "UNSEEN",
            Self::UidNext => "UIDNEXT",
            Self::UidValidity => "UIDVALIDITY",
        }
    }
}

/// An APPEND request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    /// Target mailbox.
    pub mailbox: String,
    /// Initial flags.
    pub flags: Vec<String>,
    /// Optional internal date string as the client supplied it.
    pub date: Option<String>,
    /// The full message.
    pub message: Vec<u8>,
}

/// A FETCH request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Messages to fetch.
    pub set: SequenceSet,
    /// Requested data items, uppercased (`FLAGS`, `BODY[HEADER]`, ...).
    pub items: Vec<String>,
}

/// Data for one message in a FETCH result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    /// Message sequence number.
    pub seq: u32,
    /// Item name / value pairs, rendered in order.
    pub items: Vec<(String, ImapValue)>,
}

/// How STORE changes flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Replace the flag set.
    Set,
    /// Add flags.
    Add,
    /// Remove flags.
    Remove,
}

/// A STORE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRequest {
    /// Messages to modify.
    pub set: SequenceSet,
    /// Replace, add, or remove.
    pub mode: StoreMode,
    /// `.SILENT`: suppress the untagged FETCH echoes.
    pub silent: bool,
    /// Flags to apply.
    pub flags: Vec<String>,
}

/// New flag state for one message after STORE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFlags {
    /// Message sequence number.
    pub seq: u32,
    /// Complete flag set after the change.
    pub flags: Vec<String>,
}

/// The capability set an embedding application provides.
///
/// One operation per command family. CAPABILITY, NOOP, and LOGOUT are
/// answered by the engine itself; `noop` exists so a handler can piggyback
/// polling work and defaults to success, and `close` defaults to success
/// because the engine already clears the selected mailbox.
pub trait ImapHandler: Send + Sync + 'static {
    /// Verifies credentials, returning an opaque user handle.
    fn authenticate(
        &self,
        session: SessionView,
        credentials: Credentials,
    ) -> impl Future<Output = HandlerResult<UserId>> + Send;

    /// Lists mailboxes matching `pattern` under `reference`.
    fn list(
        &self,
        session: SessionView,
        reference: String,
        pattern: String,
    ) -> impl Future<Output = HandlerResult<Vec<MailboxInfo>>> + Send;

    /// Lists subscribed mailboxes. Defaults to the LIST result.
    fn lsub(
        &self,
        session: SessionView,
        reference: String,
        pattern: String,
    ) -> impl Future<Output = HandlerResult<Vec<MailboxInfo>>> + Send {
        self.list(session, reference, pattern)
    }

    /// Opens a mailbox for SELECT or EXAMINE.
    fn select(
        &self,
        session: SessionView,
        request: SelectRequest,
    ) -> impl Future<Output = HandlerResult<MailboxSummary>> + Send;

    /// Creates a mailbox.
    fn create(
        &self,
        session: SessionView,
        mailbox: String,
    ) -> impl Future<Output = HandlerResult<()>> + Send;

    /// Deletes a mailbox.
    fn delete(
        &self,
        session: SessionView,
        mailbox: String,
    ) -> impl Future<Output = HandlerResult<()>> + Send;

    /// Renames a mailbox.
    fn rename(
        &self,
        session: SessionView,
        from: String,
        to: String,
    ) -> impl Future<Output = HandlerResult<()>> + Send;

    /// Subscribes to a mailbox.
    fn subscribe(
        &self,
        session: SessionView,
        mailbox: String,
    ) -> impl Future<Output = HandlerResult<()>> + Send;

    /// Unsubscribes from a mailbox.
    fn unsubscribe(
        &self,
        session: SessionView,
        mailbox: String,
    ) -> impl Future<Output = HandlerResult<()>> + Send;

    /// Reports STATUS items for a mailbox without selecting it.
    fn status(
        &self,
        session: SessionView,
        mailbox: String,
        items: Vec<StatusItem>,
    ) -> impl Future<Output = HandlerResult<Vec<(StatusItem, u32)>>> + Send;

    /// Appends a message, optionally returning its UID.
    fn append(
        &self,
        session: SessionView,
        request: AppendRequest,
    ) -> impl Future<Output = HandlerResult<Option<u32>>> + Send;

    /// Fetches data items for a set of messages.
    fn fetch(
        &self,
        session: SessionView,
        request: FetchRequest,
    ) -> impl Future<Output = HandlerResult<Vec<MessageData>>> + Send;

    /// Changes flags for a set of messages.
    fn store(
        &self,
        session: SessionView,
        request: StoreRequest,
    ) -> impl Future<Output = HandlerResult<Vec<StoredFlags>>> + Send;

    /// Searches the selected mailbox. Receives the raw parsed criterion
    /// arguments; returns matching sequence numbers.
    fn search(
        &self,
        session: SessionView,
        criteria: Vec<Argument>,
    ) -> impl Future<Output = HandlerResult<Vec<u32>>> + Send;

    /// Copies messages to another mailbox.
    fn copy(
        &self,
        session: SessionView,
        set: SequenceSet,
        mailbox: String,
    ) -> impl Future<Output = HandlerResult<()>> + Send;

    /// Permanently removes messages flagged `\Deleted`, returning the
    /// expunged sequence numbers in the order they were removed.
    fn expunge(&self, session: SessionView)
    -> impl Future<Output = HandlerResult<Vec<u32>>> + Send;

    /// Called when the selected mailbox is closed.
    fn close(&self, session: SessionView) -> impl Future<Output = HandlerResult<()>> + Send {
        let _ = session;
        async { Ok(()) }
    }

    /// Called for NOOP.
    fn noop(&self, session: SessionView) -> impl Future<Output = HandlerResult<()>> + Send {
        let _ = session;
        async { Ok(()) }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn status_item_names_round_trip() {
        for item in [
            StatusItem::Messages,
            StatusItem::Recent,
            StatusItem::Unseen,
            StatusItem::UidNext,
            StatusItem::UidValidity,
        ] {
            assert_eq!(StatusItem::from_name(item.as_str()), Some(item));
        }
        assert_eq!(StatusItem::from_name("messages"), Some(StatusItem::Messages));
        assert_eq!(StatusItem::from_name("HIGHESTMODSEQ"), None);
    }

    #[test]
    fn error_helpers_classify() {
        assert!(matches!(
            HandlerError::invalid_credentials(),
            HandlerError::Rejected(_)
        ));
        assert_eq!(
            HandlerError::no_such_mailbox("Junk").to_string(),
            "No such mailbox: Junk"
        );
    }
}
