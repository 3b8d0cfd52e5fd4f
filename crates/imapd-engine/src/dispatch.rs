//! Command dispatch.
//!
//! Takes a parsed [`Command`] plus the current session, validates it
//! against the state table, extracts and validates arguments, invokes the
//! matching handler operation under the command timeout, and assembles the
//! complete response: zero or more untagged lines followed by exactly one
//! tagged completion. The dispatcher never writes to the socket and never
//! mutates the session; state changes travel back as a [`SessionAction`]
//! for the connection loop to commit after the response is flushed.

use std::sync::Arc;
use std::time::Duration;

use imapd_proto::{
    Argument, Command, ImapValue, ResponseCode, ResponseUnit, SequenceSet, Status, Tag, Untagged,
};
use tracing::{debug, warn};

use crate::auth::AuthMechanism;
use crate::handler::{
    AppendRequest, FetchRequest, HandlerError, ImapHandler, SelectRequest, StatusItem, StoreMode,
    StoreRequest,
};
use crate::session::{self, SelectedMailbox, SessionAction, SessionContext, Transition};

/// Capabilities advertised in the greeting and in CAPABILITY responses.
pub const CAPABILITIES: &[&str] = &["IMAP4rev1", "AUTH=PLAIN", "AUTH=LOGIN", "LITERAL+"];

/// A fully assembled response plus the session change it carries.
#[derive(Debug)]
pub struct Reply {
    /// Response units, written in order as one batch.
    pub units: Vec<ResponseUnit>,
    /// State change to commit after the response is flushed.
    pub action: SessionAction,
}

impl Reply {
    fn done(tag: Tag, status: Status, text: impl Into<String>) -> Self {
        Self {
            units: vec![ResponseUnit::tagged(tag, status, text)],
            action: SessionAction::None,
        }
    }

    fn bad(tag: Tag, text: impl Into<String>) -> Self {
        Self::done(tag, Status::Bad, text)
    }

    fn from_handler_error(tag: Tag, err: HandlerError) -> Self {
        match err {
            HandlerError::Rejected(text) => Self::done(tag, Status::No, text),
            HandlerError::Invalid(text) => Self::done(tag, Status::Bad, text),
        }
    }
}

/// Outcome of dispatching one command.
#[derive(Debug)]
pub enum Dispatch {
    /// Response assembled, write it and commit the action.
    Reply(Reply),
    /// AUTHENTICATE accepted; the connection loop runs the SASL exchange.
    StartAuth {
        /// Tag of the AUTHENTICATE command, echoed on completion.
        tag: Tag,
        /// The negotiated mechanism.
        mechanism: AuthMechanism,
        /// Initial client response from the command line, if any.
        initial: Option<String>,
    },
}

/// Routes validated commands to handler operations.
pub struct Dispatcher<H> {
    handler: Arc<H>,
    command_timeout: Duration,
}

impl<H: ImapHandler> Dispatcher<H> {
    /// Creates a dispatcher over `handler`.
    pub fn new(handler: Arc<H>, command_timeout: Duration) -> Self {
        Self {
            handler,
            command_timeout,
        }
    }

    /// Runs a handler future under the command timeout.
    async fn run<T>(
        &self,
        name: &str,
        fut: impl Future<Output = Result<T, HandlerError>>,
    ) -> Result<T, HandlerError> {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(command = name, timeout = ?self.command_timeout, "handler timed out");
                Err(HandlerError::Rejected(format!("{name} timed out")))
            }
        }
    }

    /// Dispatches one command against the current session.
    #[allow(clippy::too_many_lines)]
    pub async fn dispatch(&self, session: &SessionContext, command: Command) -> Dispatch {
        let Command { tag, name, args } = command;
        debug!(tag = tag.as_str(), command = %name, args = args.len(), "dispatching");

        if !session::is_known_command(&name) {
            return Dispatch::Reply(Reply::bad(tag, format!("Unknown command: {name}")));
        }
        let transition = session::transition(session.state(), &name);
        if transition == Transition::Rejected {
            return Dispatch::Reply(Reply::bad(tag, "Command not valid in this state"));
        }

        let view = session.view();
        let reply = match name.as_str() {
            "CAPABILITY" => {
                let caps = CAPABILITIES.iter().map(ToString::to_string).collect();
                Reply {
                    units: vec![
                        ResponseUnit::Untagged(Untagged::Capability(caps)),
                        ResponseUnit::tagged(tag, Status::Ok, "CAPABILITY completed"),
                    ],
                    action: SessionAction::None,
                }
            }
            "NOOP" => match self.run(&name, self.handler.noop(view)).await {
                Ok(()) => Reply::done(tag, Status::Ok, "NOOP completed"),
                Err(err) => Reply::from_handler_error(tag, err),
            },
            "LOGOUT" => Reply {
                units: vec![
                    ResponseUnit::untagged_status(Status::Bye, "server logging out"),
                    ResponseUnit::tagged(tag, Status::Ok, "LOGOUT completed"),
                ],
                action: SessionAction::Logout,
            },
            "LOGIN" => self.login(tag, view, &args).await,
            "AUTHENTICATE" => {
                let Some(mechanism) = args.first().and_then(Argument::to_text) else {
                    return Dispatch::Reply(Reply::bad(tag, "AUTHENTICATE expects a mechanism"));
                };
                let Some(mechanism) = AuthMechanism::from_name(&mechanism) else {
                    return Dispatch::Reply(Reply::done(
                        tag,
                        Status::No,
                        "Unsupported authentication mechanism",
                    ));
                };
                let initial = args.get(1).and_then(Argument::to_text);
                return Dispatch::StartAuth {
                    tag,
                    mechanism,
                    initial,
                };
            }
            "SELECT" | "EXAMINE" => self.select(tag, view, &name, &args).await,
            "LIST" | "LSUB" => self.list(tag, view, &name, &args).await,
            "CREATE" | "DELETE" | "SUBSCRIBE" | "UNSUBSCRIBE" => {
                let Some(mailbox) = args.first().and_then(Argument::to_text) else {
                    return Dispatch::Reply(Reply::bad(tag, format!("{name} expects a mailbox")));
                };
                let result = match name.as_str() {
                    "CREATE" => self.run(&name, self.handler.create(view, mailbox)).await,
                    "DELETE" => self.run(&name, self.handler.delete(view, mailbox)).await,
                    "SUBSCRIBE" => self.run(&name, self.handler.subscribe(view, mailbox)).await,
                    _ => self.run(&name, self.handler.unsubscribe(view, mailbox)).await,
                };
                match result {
                    Ok(()) => Reply::done(tag, Status::Ok, format!("{name} completed")),
                    Err(err) => Reply::from_handler_error(tag, err),
                }
            }
            "RENAME" => {
                let (Some(from), Some(to)) = (
                    args.first().and_then(Argument::to_text),
                    args.get(1).and_then(Argument::to_text),
                ) else {
                    return Dispatch::Reply(Reply::bad(tag, "RENAME expects two mailbox names"));
                };
                match self.run(&name, self.handler.rename(view, from, to)).await {
                    Ok(()) => Reply::done(tag, Status::Ok, "RENAME completed"),
                    Err(err) => Reply::from_handler_error(tag, err),
                }
            }
            "STATUS" => self.status(tag, view, &args).await,
            "APPEND" => self.append(tag, view, args).await,
            "FETCH" => self.fetch(tag, view, &args).await,
            "STORE" => self.store(tag, view, &args).await,
            "SEARCH" => match self.run(&name, self.handler.search(view, args)).await {
                Ok(ids) => Reply {
                    units: vec![
                        ResponseUnit::Untagged(Untagged::Search(ids)),
                        ResponseUnit::tagged(tag, Status::Ok, "SEARCH completed"),
                    ],
                    action: SessionAction::None,
                },
                Err(err) => Reply::from_handler_error(tag, err),
            },
            "COPY" => {
                let (Some(set), Some(mailbox)) = (
                    args.first().and_then(Argument::to_text),
                    args.get(1).and_then(Argument::to_text),
                ) else {
                    return Dispatch::Reply(Reply::bad(
                        tag,
                        "COPY expects a sequence set and a mailbox",
                    ));
                };
                let Ok(set) = set.parse::<SequenceSet>() else {
                    return Dispatch::Reply(Reply::bad(tag, "Invalid sequence set"));
                };
                match self.run(&name, self.handler.copy(view, set, mailbox)).await {
                    Ok(()) => Reply::done(tag, Status::Ok, "COPY completed"),
                    Err(err) => Reply::from_handler_error(tag, err),
                }
            }
            "EXPUNGE" => match self.run(&name, self.handler.expunge(view)).await {
                Ok(expunged) => {
                    let mut units: Vec<ResponseUnit> = expunged
                        .into_iter()
                        .map(|seq| ResponseUnit::Untagged(Untagged::Expunge(seq)))
                        .collect();
                    units.push(ResponseUnit::tagged(tag, Status::Ok, "EXPUNGE completed"));
                    Reply {
                        units,
                        action: SessionAction::None,
                    }
                }
                Err(err) => Reply::from_handler_error(tag, err),
            },
            "CLOSE" => match self.run(&name, self.handler.close(view)).await {
                Ok(()) => Reply {
                    units: vec![ResponseUnit::tagged(tag, Status::Ok, "CLOSE completed")],
                    action: SessionAction::ClearMailbox,
                },
                Err(err) => Reply::from_handler_error(tag, err),
            },
            _ => Reply::bad(tag, format!("Unknown command: {name}")),
        };
        Dispatch::Reply(reply)
    }

    /// Completes an AUTHENTICATE exchange with assembled credentials.
    pub async fn finish_auth(
        &self,
        tag: Tag,
        session: &SessionContext,
        credentials: crate::handler::Credentials,
    ) -> Reply {
        match self
            .run(
                "AUTHENTICATE",
                self.handler.authenticate(session.view(), credentials),
            )
            .await
        {
            Ok(user) => Reply {
                units: vec![ResponseUnit::tagged(
                    tag,
                    Status::Ok,
                    "AUTHENTICATE completed",
                )],
                action: SessionAction::BindUser(user),
            },
            Err(err) => Reply::from_handler_error(tag, err),
        }
    }

    async fn login(
        &self,
        tag: Tag,
        view: crate::session::SessionView,
        args: &[Argument],
    ) -> Reply {
        let (Some(username), Some(password)) = (
            args.first().and_then(Argument::to_text),
            args.get(1).and_then(Argument::to_text),
        ) else {
            return Reply::bad(tag, "LOGIN expects a username and a password");
        };
        let credentials = crate::handler::Credentials::Login { username, password };
        match self
            .run("LOGIN", self.handler.authenticate(view, credentials))
            .await
        {
            Ok(user) => Reply {
                units: vec![ResponseUnit::tagged(tag, Status::Ok, "LOGIN completed")],
                action: SessionAction::BindUser(user),
            },
            Err(err) => Reply::from_handler_error(tag, err),
        }
    }

    async fn select(
        &self,
        tag: Tag,
        view: crate::session::SessionView,
        name: &str,
        args: &[Argument],
    ) -> Reply {
        let Some(mailbox) = args.first().and_then(Argument::to_text) else {
            return Reply::bad(tag, format!("{name} expects a mailbox"));
        };
        let read_only = name == "EXAMINE";
        let request = SelectRequest {
            mailbox: mailbox.clone(),
            read_only,
        };
        match self.run(name, self.handler.select(view, request)).await {
            Ok(summary) => {
                let mut units = Vec::new();
                if !summary.flags.is_empty() {
                    units.push(ResponseUnit::Untagged(Untagged::Flags(summary.flags)));
                }
                units.push(ResponseUnit::Untagged(Untagged::Exists(summary.exists)));
                units.push(ResponseUnit::Untagged(Untagged::Recent(summary.recent)));
                for code in [
                    summary.unseen.map(ResponseCode::Unseen),
                    summary.permanent_flags.map(ResponseCode::PermanentFlags),
                    summary.uid_validity.map(ResponseCode::UidValidity),
                    summary.uid_next.map(ResponseCode::UidNext),
                ]
                .into_iter()
                .flatten()
                {
                    units.push(ResponseUnit::Untagged(Untagged::Status {
                        status: Status::Ok,
                        code: Some(code),
                        text: String::new(),
                    }));
                }
                units.push(ResponseUnit::Tagged {
                    tag,
                    status: Status::Ok,
                    code: Some(if read_only {
                        ResponseCode::ReadOnly
                    } else {
                        ResponseCode::ReadWrite
                    }),
                    text: format!("{name} completed"),
                });
                Reply {
                    units,
                    action: SessionAction::BindMailbox(SelectedMailbox {
                        name: mailbox,
                        read_only,
                    }),
                }
            }
            // A failed SELECT leaves no mailbox selected.
            Err(err) => {
                let mut reply = Reply::from_handler_error(tag, err);
                reply.action = SessionAction::ClearMailbox;
                reply
            }
        }
    }

    async fn list(
        &self,
        tag: Tag,
        view: crate::session::SessionView,
        name: &str,
        args: &[Argument],
    ) -> Reply {
        let (Some(reference), Some(pattern)) = (
            args.first().and_then(Argument::to_text),
            args.get(1).and_then(Argument::to_text),
        ) else {
            return Reply::bad(tag, format!("{name} expects a reference and a pattern"));
        };
        let lsub = name == "LSUB";
        let result = if lsub {
            self.run(name, self.handler.lsub(view, reference, pattern))
                .await
        } else {
            self.run(name, self.handler.list(view, reference, pattern))
                .await
        };
        match result {
            Ok(mailboxes) => {
                let mut units: Vec<ResponseUnit> = mailboxes
                    .into_iter()
                    .map(|info| {
                        ResponseUnit::Untagged(Untagged::List {
                            lsub,
                            attributes: info.attributes,
                            delimiter: info.delimiter,
                            name: info.name,
                        })
                    })
                    .collect();
                units.push(ResponseUnit::tagged(
                    tag,
                    Status::Ok,
                    format!("{name} completed"),
                ));
                Reply {
                    units,
                    action: SessionAction::None,
                }
            }
            Err(err) => Reply::from_handler_error(tag, err),
        }
    }

    async fn status(
        &self,
        tag: Tag,
        view: crate::session::SessionView,
        args: &[Argument],
    ) -> Reply {
        let Some(mailbox) = args.first().and_then(Argument::to_text) else {
            return Reply::bad(tag, "STATUS expects a mailbox");
        };
        let Some(item_args) = args.get(1).and_then(Argument::as_list) else {
            return Reply::bad(tag, "STATUS expects a parenthesized item list");
        };
        let mut items = Vec::with_capacity(item_args.len());
        for arg in item_args {
            let Some(item) = arg.to_text().as_deref().and_then(StatusItem::from_name) else {
                return Reply::bad(tag, "Unknown STATUS item");
            };
            items.push(item);
        }
        match self
            .run("STATUS", self.handler.status(view, mailbox.clone(), items))
            .await
        {
            Ok(reported) => Reply {
                units: vec![
                    ResponseUnit::Untagged(Untagged::StatusItems {
                        mailbox,
                        items: reported
                            .into_iter()
                            .map(|(item, value)| (item.as_str().to_string(), value))
                            .collect(),
                    }),
                    ResponseUnit::tagged(tag, Status::Ok, "STATUS completed"),
                ],
                action: SessionAction::None,
            },
            Err(err) => Reply::from_handler_error(tag, err),
        }
    }

    async fn append(
        &self,
        tag: Tag,
        view: crate::session::SessionView,
        mut args: Vec<Argument>,
    ) -> Reply {
        if args.len() < 2 {
            return Reply::bad(tag, "APPEND expects a mailbox and a message literal");
        }
        let Some(Argument::Literal(message)) = args.pop() else {
            return Reply::bad(tag, "APPEND message must be a literal");
        };
        let mut rest = args.into_iter();
        let Some(mailbox) = rest.next().and_then(|a| a.to_text()) else {
            return Reply::bad(tag, "APPEND expects a mailbox name");
        };
        // Optional middle arguments: a flag list and/or a date string.
        let mut flags = Vec::new();
        let mut date = None;
        for arg in rest {
            match arg {
                Argument::List(items) => {
                    flags = items.iter().filter_map(Argument::to_text).collect();
                }
                other => date = other.to_text(),
            }
        }
        let request = AppendRequest {
            mailbox,
            flags,
            date,
            message,
        };
        match self.run("APPEND", self.handler.append(view, request)).await {
            Ok(_uid) => Reply::done(tag, Status::Ok, "APPEND completed"),
            Err(err) => Reply::from_handler_error(tag, err),
        }
    }

    async fn fetch(
        &self,
        tag: Tag,
        view: crate::session::SessionView,
        args: &[Argument],
    ) -> Reply {
        let Some(set) = args.first().and_then(Argument::to_text) else {
            return Reply::bad(tag, "FETCH expects a sequence set");
        };
        let Ok(set) = set.parse::<SequenceSet>() else {
            return Reply::bad(tag, "Invalid sequence set");
        };
        let items = match args.get(1) {
            Some(Argument::List(list)) => list
                .iter()
                .filter_map(|a| a.to_text().map(|t| t.to_ascii_uppercase()))
                .collect(),
            Some(arg) => match arg.to_text() {
                Some(item) => vec![item.to_ascii_uppercase()],
                None => return Reply::bad(tag, "Invalid FETCH items"),
            },
            None => return Reply::bad(tag, "FETCH expects data items"),
        };
        let request = FetchRequest { set, items };
        match self.run("FETCH", self.handler.fetch(view, request)).await {
            Ok(messages) => {
                let mut units: Vec<ResponseUnit> = messages
                    .into_iter()
                    .map(|msg| {
                        ResponseUnit::Untagged(Untagged::Fetch {
                            seq: msg.seq,
                            items: msg.items,
                        })
                    })
                    .collect();
                units.push(ResponseUnit::tagged(tag, Status::Ok, "FETCH completed"));
                Reply {
                    units,
                    action: SessionAction::None,
                }
            }
            Err(err) => Reply::from_handler_error(tag, err),
        }
    }

    async fn store(
        &self,
        tag: Tag,
        view: crate::session::SessionView,
        args: &[Argument],
    ) -> Reply {
        let Some(set) = args.first().and_then(Argument::to_text) else {
            return Reply::bad(tag, "STORE expects a sequence set");
        };
        let Ok(set) = set.parse::<SequenceSet>() else {
            return Reply::bad(tag, "Invalid sequence set");
        };
        let Some(item) = args.get(1).and_then(Argument::to_text) else {
            return Reply::bad(tag, "STORE expects a data item");
        };
        let item = item.to_ascii_uppercase();
        let (base, silent) = match item.strip_suffix(".SILENT") {
            Some(base) => (base, true),
            None => (item.as_str(), false),
        };
        let mode = match base {
            "FLAGS" => StoreMode::Set,
            "+FLAGS" => StoreMode::Add,
            "-FLAGS" => StoreMode::Remove,
            _ => return Reply::bad(tag, "Unknown STORE data item"),
        };
        // FLAGS () is legal and clears everything; a missing third
        // argument is not.
        if args.len() < 3 {
            return Reply::bad(tag, "STORE expects a flag list");
        }
        let flags: Vec<String> = match args.get(2) {
            Some(Argument::List(list)) => list.iter().filter_map(Argument::to_text).collect(),
            _ => args[2..].iter().filter_map(Argument::to_text).collect(),
        };
        let request = StoreRequest {
            set,
            mode,
            silent,
            flags,
        };
        match self.run("STORE", self.handler.store(view, request)).await {
            Ok(stored) => {
                let mut units = Vec::new();
                if !silent {
                    for entry in stored {
                        let flags = entry.flags.into_iter().map(ImapValue::Atom).collect();
                        units.push(ResponseUnit::Untagged(Untagged::Fetch {
                            seq: entry.seq,
                            items: vec![("FLAGS".to_string(), ImapValue::List(flags))],
                        }));
                    }
                }
                units.push(ResponseUnit::tagged(tag, Status::Ok, "STORE completed"));
                Reply {
                    units,
                    action: SessionAction::None,
                }
            }
            Err(err) => Reply::from_handler_error(tag, err),
        }
    }
}
