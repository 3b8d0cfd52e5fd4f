//! Server response model.
//!
//! Handler results and protocol errors are expressed as [`ResponseUnit`]s:
//! a tagged completion addressed to the triggering command, untagged status
//! and data lines prefixed `*`, or a `+` continuation request. The
//! [`encode`](crate::response::encode_unit) step renders each unit to
//! canonical wire text.

mod encode;

pub use encode::encode_unit;

use crate::command::Tag;

/// Completion status of a response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Success.
    Ok,
    /// Business-rule failure.
    No,
    /// Protocol or semantic error.
    Bad,
    /// The server is closing the connection.
    Bye,
}

impl Status {
    /// Returns the wire keyword for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
            Self::Bye => "BYE",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bracketed response code attached to a status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// ALERT: message that must be shown to the user.
    Alert,
    /// CAPABILITY listing.
    Capability(Vec<String>),
    /// READ-ONLY: mailbox selected read-only.
    ReadOnly,
    /// READ-WRITE: mailbox selected read-write.
    ReadWrite,
    /// TRYCREATE: target mailbox does not exist but could be created.
    TryCreate,
    /// UIDNEXT: next UID to be assigned.
    UidNext(u32),
    /// UIDVALIDITY: mailbox UID validity value.
    UidValidity(u32),
    /// UNSEEN: sequence number of the first unseen message.
    Unseen(u32),
    /// PERMANENTFLAGS: flags that can be changed permanently.
    PermanentFlags(Vec<String>),
}

/// A value inside an untagged data line, mirroring the argument grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImapValue {
    /// Bare atom, written as-is.
    Atom(String),
    /// Number.
    Number(u32),
    /// Text written as a quoted string, or as a literal when it contains
    /// bytes a quoted string cannot carry.
    String(String),
    /// Raw bytes, always written as a literal and never re-escaped.
    Literal(Vec<u8>),
    /// Parenthesized group, possibly nested.
    List(Vec<ImapValue>),
    /// NIL.
    Nil,
}

/// An untagged response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    /// General status line: `* OK [CODE] text`.
    Status {
        /// Line status.
        status: Status,
        /// Optional bracketed code.
        code: Option<ResponseCode>,
        /// Free text, possibly empty.
        text: String,
    },
    /// `* CAPABILITY ...`
    Capability(Vec<String>),
    /// `* N EXISTS`
    Exists(u32),
    /// `* N RECENT`
    Recent(u32),
    /// `* N EXPUNGE`
    Expunge(u32),
    /// `* FLAGS (...)`
    Flags(Vec<String>),
    /// `* LIST (attrs) delimiter name` (or `* LSUB ...`).
    List {
        /// Whether this is an LSUB rather than LIST line.
        lsub: bool,
        /// Mailbox name attributes such as `\Noselect`.
        attributes: Vec<String>,
        /// Hierarchy delimiter, NIL when flat.
        delimiter: Option<char>,
        /// Mailbox name.
        name: String,
    },
    /// `* SEARCH n1 n2 ...`
    Search(Vec<u32>),
    /// `* STATUS mailbox (ITEM n ...)`
    StatusItems {
        /// Mailbox name.
        mailbox: String,
        /// Item name / count pairs.
        items: Vec<(String, u32)>,
    },
    /// `* seq FETCH (ITEM value ...)`
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// Item name / value pairs.
        items: Vec<(String, ImapValue)>,
    },
}

/// One complete response line (plus any literal payloads it carries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseUnit {
    /// `+ text` continuation request.
    Continuation {
        /// Prompt text; empty for a bare `+ `.
        text: String,
    },
    /// Untagged `*` line.
    Untagged(Untagged),
    /// Tagged completion, echoing the triggering command's tag.
    Tagged {
        /// The echoed tag.
        tag: Tag,
        /// Completion status.
        status: Status,
        /// Optional bracketed code.
        code: Option<ResponseCode>,
        /// Free text.
        text: String,
    },
}

impl ResponseUnit {
    /// Builds a tagged completion without a response code.
    #[must_use]
    pub fn tagged(tag: Tag, status: Status, text: impl Into<String>) -> Self {
        Self::Tagged {
            tag,
            status,
            code: None,
            text: text.into(),
        }
    }

    /// Builds an untagged status line without a response code.
    #[must_use]
    pub fn untagged_status(status: Status, text: impl Into<String>) -> Self {
        Self::Untagged(Untagged::Status {
            status,
            code: None,
            text: text.into(),
        })
    }
}
