//! Tokio-based IMAP4rev1 server engine.
//!
//! This crate owns everything between the TCP socket and the mail store:
//! it frames and parses commands with [`imapd_proto`], enforces the
//! session state machine, asks the embedding application's
//! [`ImapHandler`] for the answers, and writes well-formed responses back.
//! The application implements mailbox semantics; the engine guarantees
//! the wire protocol around them.
//!
//! ```no_run
//! use std::sync::Arc;
//! # use imapd_engine::{ServerConfig, Server};
//! # async fn run<H: imapd_engine::ImapHandler>(handler: Arc<H>) -> imapd_engine::Result<()> {
//! let config = ServerConfig::builder("127.0.0.1", 1143)
//!     .max_connections(256)
//!     .build();
//! Server::new(config, handler).run().await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod listener;
pub mod session;

pub use auth::AuthMechanism;
pub use config::{ServerConfig, ServerConfigBuilder};
pub use connection::{CloseReason, Connection};
pub use dispatch::{CAPABILITIES, Dispatch, Dispatcher, Reply};
pub use error::{Error, Result};
pub use handler::{
    AppendRequest, Credentials, FetchRequest, HandlerError, HandlerResult, ImapHandler,
    MailboxInfo, MailboxSummary, MessageData, SelectRequest, StatusItem, StoreMode, StoreRequest,
    StoredFlags,
};
pub use listener::{Server, ShutdownHandle};
pub use session::{
    ConnectionState, SelectedMailbox, SessionAction, SessionContext, SessionView, UserId,
};
