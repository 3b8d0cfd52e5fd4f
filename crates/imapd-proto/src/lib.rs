//! # imapd-proto
//!
//! Sans-I/O server-side protocol layer for IMAP4rev1: byte framing, command
//! grammar, and response encoding. No sockets, no async — the engine crate
//! (`imapd-engine`) feeds bytes in and writes bytes out.
//!
//! ## Pipeline
//!
//! ```text
//! bytes ──→ FrameBuffer ──→ Frame ──→ parse_command ──→ Command
//!                                                          │
//!                              (engine dispatches)         ▼
//! bytes ←── encode_unit ←── ResponseUnit ←───────── handler result
//! ```
//!
//! - [`frame`]: accumulates raw chunks, tracks `{N}` / `{N+}` literal
//!   markers, and yields complete command frames
//! - [`parser`]: turns a frame into a [`Command`] (tag, uppercased name,
//!   ordered atom/quoted/literal/list arguments)
//! - [`response`]: the [`ResponseUnit`] model and its wire encoder
//! - [`sequence`]: message sequence sets (`1`, `2:5`, `3:*`, ...)
//!
//! State handling, dispatch, and I/O live in the engine; this crate is
//! deliberately pure so the grammar can be tested byte-for-byte.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
mod error;
pub mod frame;
pub mod parser;
pub mod response;
pub mod sequence;

pub use command::{Argument, Command, Tag};
pub use error::{Error, Result};
pub use frame::{Frame, FrameBuffer, FrameEvent};
pub use parser::parse_command;
pub use response::{
    ImapValue, ResponseCode, ResponseUnit, Status, Untagged, encode_unit,
};
pub use sequence::{SeqNum, SequenceSet};
