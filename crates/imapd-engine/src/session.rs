//! Session state machine.
//!
//! Each connection carries one [`SessionContext`] owned by its supervisor.
//! Which commands are legal when is a pure lookup over
//! (state, command name); transitions into Authenticated or Selected only
//! commit after the handler reports success, so a failed SELECT can never
//! leave the session in Selected with no mailbox bound.

/// Connection state as defined by RFC 3501 section 3.
///
/// Transitions are forward-only except the explicitly allowed
/// Selected ↔ Authenticated oscillation via CLOSE and SELECT.
/// `LoggedOut` is terminal: no further commands are processed and the
/// socket closes after the final response flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Waiting for credentials.
    #[default]
    NotAuthenticated,
    /// User is authenticated; mailbox-management commands are legal.
    Authenticated,
    /// A mailbox is open; message commands are legal.
    Selected,
    /// Terminal state after LOGOUT or BYE.
    LoggedOut,
}

/// Result of the state lookup for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Legal in the current state, no state change.
    Allowed,
    /// Legal, and proposes this state once the handler succeeds.
    AllowedThen(ConnectionState),
    /// Not legal in the current state; the handler is never invoked.
    Rejected,
}

/// All command names the engine recognizes.
const KNOWN_COMMANDS: &[&str] = &[
    "CAPABILITY",
    "NOOP",
    "LOGOUT",
    "LOGIN",
    "AUTHENTICATE",
    "SELECT",
    "EXAMINE",
    "LIST",
    "LSUB",
    "CREATE",
    "DELETE",
    "RENAME",
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "STATUS",
    "APPEND",
    "FETCH",
    "STORE",
    "SEARCH",
    "COPY",
    "EXPUNGE",
    "CLOSE",
];

/// Returns `true` if `name` is a command the engine recognizes at all.
#[must_use]
pub fn is_known_command(name: &str) -> bool {
    KNOWN_COMMANDS.contains(&name)
}

/// Pure state lookup: is `name` legal in `state`, and which state does its
/// success propose?
#[must_use]
pub fn transition(state: ConnectionState, name: &str) -> Transition {
    use ConnectionState::{Authenticated, LoggedOut, NotAuthenticated, Selected};

    if state == LoggedOut {
        return Transition::Rejected;
    }

    match name {
        "CAPABILITY" | "NOOP" => Transition::Allowed,
        "LOGOUT" => Transition::AllowedThen(LoggedOut),
        "LOGIN" | "AUTHENTICATE" => match state {
            NotAuthenticated => Transition::AllowedThen(Authenticated),
            _ => Transition::Rejected,
        },
        "SELECT" | "EXAMINE" => match state {
            Authenticated | Selected => Transition::AllowedThen(Selected),
            _ => Transition::Rejected,
        },
        "LIST" | "LSUB" | "CREATE" | "DELETE" | "RENAME" | "SUBSCRIBE" | "UNSUBSCRIBE"
        | "STATUS" | "APPEND" => match state {
            Authenticated | Selected => Transition::Allowed,
            _ => Transition::Rejected,
        },
        "FETCH" | "STORE" | "SEARCH" | "COPY" | "EXPUNGE" => match state {
            Selected => Transition::Allowed,
            _ => Transition::Rejected,
        },
        "CLOSE" => match state {
            Selected => Transition::AllowedThen(Authenticated),
            _ => Transition::Rejected,
        },
        _ => Transition::Rejected,
    }
}

/// Opaque handle for an authenticated user, produced by the handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Creates a user handle.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The mailbox currently bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedMailbox {
    /// Mailbox name as the client supplied it.
    pub name: String,
    /// Whether the mailbox was opened read-only (EXAMINE).
    pub read_only: bool,
}

/// Session mutation produced by a successful dispatch.
///
/// The supervisor applies these after the reply has been queued; the
/// parser and encoder never touch session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// No state change.
    None,
    /// Bind the authenticated user and move to Authenticated.
    BindUser(UserId),
    /// Bind the selected mailbox and move to Selected.
    BindMailbox(SelectedMailbox),
    /// Clear any selected mailbox and return to Authenticated.
    ClearMailbox,
    /// Move to the terminal `LoggedOut` state.
    Logout,
}

/// Per-connection session state, owned exclusively by the supervisor.
#[derive(Debug, Default)]
pub struct SessionContext {
    state: ConnectionState,
    user: Option<UserId>,
    mailbox: Option<SelectedMailbox>,
}

/// Read-only snapshot of a session, passed to handler invocations.
#[derive(Debug, Clone)]
pub struct SessionView {
    /// Current connection state.
    pub state: ConnectionState,
    /// Authenticated user, if any.
    pub user: Option<UserId>,
    /// Selected mailbox, if any.
    pub mailbox: Option<SelectedMailbox>,
}

impl SessionContext {
    /// Creates a fresh session in `NotAuthenticated`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the authenticated user, if any.
    #[must_use]
    pub const fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Returns the selected mailbox, if any.
    #[must_use]
    pub const fn mailbox(&self) -> Option<&SelectedMailbox> {
        self.mailbox.as_ref()
    }

    /// Produces the read-only view handlers receive.
    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            user: self.user.clone(),
            mailbox: self.mailbox.clone(),
        }
    }

    /// Applies a dispatch outcome's session mutation.
    pub fn apply(&mut self, action: SessionAction) {
        if self.state == ConnectionState::LoggedOut {
            return;
        }
        match action {
            SessionAction::None => {}
            SessionAction::BindUser(user) => {
                self.user = Some(user);
                self.state = ConnectionState::Authenticated;
            }
            SessionAction::BindMailbox(mailbox) => {
                self.mailbox = Some(mailbox);
                self.state = ConnectionState::Selected;
            }
            SessionAction::ClearMailbox => {
                self.mailbox = None;
                if self.state == ConnectionState::Selected {
                    self.state = ConnectionState::Authenticated;
                }
            }
            SessionAction::Logout => {
                self.mailbox = None;
                self.state = ConnectionState::LoggedOut;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;
    use ConnectionState::{Authenticated, LoggedOut, NotAuthenticated, Selected};

    #[test]
    fn capability_and_noop_everywhere_but_logged_out() {
        for state in [NotAuthenticated, Authenticated, Selected] {
            assert_eq!(transition(state, "CAPABILITY"), Transition::Allowed);
            assert_eq!(transition(state, "NOOP"), Transition::Allowed);
        }
        assert_eq!(transition(LoggedOut, "NOOP"), Transition::Rejected);
    }

    #[test]
    fn logout_legal_in_every_live_state() {
        for state in [NotAuthenticated, Authenticated, Selected] {
            assert_eq!(
                transition(state, "LOGOUT"),
                Transition::AllowedThen(LoggedOut)
            );
        }
    }

    #[test]
    fn login_only_before_authentication() {
        assert_eq!(
            transition(NotAuthenticated, "LOGIN"),
            Transition::AllowedThen(Authenticated)
        );
        assert_eq!(transition(Authenticated, "LOGIN"), Transition::Rejected);
        assert_eq!(transition(Selected, "AUTHENTICATE"), Transition::Rejected);
    }

    #[test]
    fn select_proposes_selected_without_committing() {
        assert_eq!(
            transition(Authenticated, "SELECT"),
            Transition::AllowedThen(Selected)
        );
        // Re-selecting from Selected is the allowed oscillation.
        assert_eq!(
            transition(Selected, "EXAMINE"),
            Transition::AllowedThen(Selected)
        );
        assert_eq!(transition(NotAuthenticated, "SELECT"), Transition::Rejected);
    }

    #[test]
    fn message_commands_require_selected() {
        for name in ["FETCH", "STORE", "SEARCH", "COPY", "EXPUNGE"] {
            assert_eq!(transition(Selected, name), Transition::Allowed);
            assert_eq!(transition(Authenticated, name), Transition::Rejected);
            assert_eq!(transition(NotAuthenticated, name), Transition::Rejected);
        }
        assert_eq!(
            transition(Selected, "CLOSE"),
            Transition::AllowedThen(Authenticated)
        );
    }

    #[test]
    fn mailbox_commands_require_authenticated() {
        for name in ["LIST", "CREATE", "STATUS", "APPEND"] {
            assert_eq!(transition(Authenticated, name), Transition::Allowed);
            assert_eq!(transition(Selected, name), Transition::Allowed);
            assert_eq!(transition(NotAuthenticated, name), Transition::Rejected);
        }
    }

    #[test]
    fn known_commands() {
        assert!(is_known_command("FETCH"));
        assert!(!is_known_command("XYZZY"));
    }

    #[test]
    fn bind_user_commits_authenticated() {
        let mut session = SessionContext::new();
        session.apply(SessionAction::BindUser(UserId::new("alice")));
        assert_eq!(session.state(), Authenticated);
        assert_eq!(session.user().unwrap().as_str(), "alice");
    }

    #[test]
    fn bind_and_clear_mailbox_oscillates() {
        let mut session = SessionContext::new();
        session.apply(SessionAction::BindUser(UserId::new("alice")));
        session.apply(SessionAction::BindMailbox(SelectedMailbox {
            name: "INBOX".to_string(),
            read_only: false,
        }));
        assert_eq!(session.state(), Selected);

        session.apply(SessionAction::ClearMailbox);
        assert_eq!(session.state(), Authenticated);
        assert!(session.mailbox().is_none());
    }

    #[test]
    fn clear_mailbox_before_selection_keeps_state() {
        let mut session = SessionContext::new();
        session.apply(SessionAction::BindUser(UserId::new("alice")));
        session.apply(SessionAction::ClearMailbox);
        assert_eq!(session.state(), Authenticated);
    }

    #[test]
    fn logout_is_terminal() {
        let mut session = SessionContext::new();
        session.apply(SessionAction::Logout);
        assert_eq!(session.state(), LoggedOut);
        session.apply(SessionAction::BindUser(UserId::new("alice")));
        assert_eq!(session.state(), LoggedOut);
        assert!(session.user().is_none());
    }
}
