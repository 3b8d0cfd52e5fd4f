//! SASL exchanges for AUTHENTICATE.
//!
//! Only PLAIN and LOGIN are offered. The exchange is a small state
//! machine fed base64 lines by the connection loop; it never touches the
//! socket itself.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::handler::Credentials;

/// A supported SASL mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// RFC 4616 PLAIN: one response, `authzid NUL authcid NUL password`.
    Plain,
    /// The de facto LOGIN mechanism: two prompted responses.
    Login,
}

impl AuthMechanism {
    /// Parses a mechanism name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }
}

/// Outcome of feeding one client line into the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Send a continuation with this base64 prompt and wait for a reply.
    Continue(&'static str),
    /// Exchange complete, credentials assembled.
    Done(Credentials),
    /// Client sent `*` to abort.
    Cancelled,
    /// Malformed client data; the text goes into a tagged BAD.
    Failed(&'static str),
}

enum Phase {
    PlainResponse,
    LoginUsername,
    LoginPassword { username: String },
}

/// An in-progress AUTHENTICATE exchange.
pub struct AuthExchange {
    phase: Phase,
}

// base64 for "Username:" / "Password:".
const LOGIN_USER_PROMPT: &str = "VXNlcm5hbWU6";
const LOGIN_PASS_PROMPT: &str = "UGFzc3dvcmQ6";

impl AuthExchange {
    /// Starts an exchange for `mechanism`. When the client supplied an
    /// initial response on the command line, it is consumed immediately;
    /// otherwise the first [`AuthStep::Continue`] asks for it.
    #[must_use]
    pub fn start(mechanism: AuthMechanism, initial: Option<&str>) -> (Self, AuthStep) {
        let mut exchange = Self {
            phase: match mechanism {
                AuthMechanism::Plain => Phase::PlainResponse,
                AuthMechanism::Login => Phase::LoginUsername,
            },
        };
        let step = match initial {
            Some(line) => exchange.feed(line),
            None => AuthStep::Continue(match mechanism {
                AuthMechanism::Plain => "",
                AuthMechanism::Login => LOGIN_USER_PROMPT,
            }),
        };
        (exchange, step)
    }

    /// Feeds one client line into the exchange.
    pub fn feed(&mut self, line: &str) -> AuthStep {
        if line == "*" {
            return AuthStep::Cancelled;
        }
        let Ok(decoded) = BASE64.decode(line.trim()) else {
            return AuthStep::Failed("Invalid base64 data");
        };
        match &self.phase {
            Phase::PlainResponse => decode_plain(&decoded),
            Phase::LoginUsername => {
                let Ok(username) = String::from_utf8(decoded) else {
                    return AuthStep::Failed("Username is not valid UTF-8");
                };
                self.phase = Phase::LoginPassword { username };
                AuthStep::Continue(LOGIN_PASS_PROMPT)
            }
            Phase::LoginPassword { username } => {
                let Ok(password) = String::from_utf8(decoded) else {
                    return AuthStep::Failed("Password is not valid UTF-8");
                };
                AuthStep::Done(Credentials::Login {
                    username: username.clone(),
                    password,
                })
            }
        }
    }
}

fn decode_plain(decoded: &[u8]) -> AuthStep {
    let mut parts = decoded.splitn(3, |&b| b == 0);
    let _authzid = parts.next();
    let (Some(authcid), Some(password)) = (parts.next(), parts.next()) else {
        return AuthStep::Failed("Malformed PLAIN response");
    };
    let (Ok(identity), Ok(password)) = (
        String::from_utf8(authcid.to_vec()),
        String::from_utf8(password.to_vec()),
    ) else {
        return AuthStep::Failed("PLAIN response is not valid UTF-8");
    };
    AuthStep::Done(Credentials::Plain { identity, password })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    fn b64(data: &[u8]) -> String {
        BASE64.encode(data)
    }

    #[test]
    fn plain_with_initial_response() {
        let initial = b64(b"\0alice\0secret");
        let (_, step) = AuthExchange::start(AuthMechanism::Plain, Some(&initial));
        assert_eq!(
            step,
            AuthStep::Done(Credentials::Plain {
                identity: "alice".to_string(),
                password: "secret".to_string(),
            })
        );
    }

    #[test]
    fn plain_without_initial_response_prompts_empty() {
        let (mut exchange, step) = AuthExchange::start(AuthMechanism::Plain, None);
        assert_eq!(step, AuthStep::Continue(""));
        let step = exchange.feed(&b64(b"bob\0bob\0hunter2"));
        assert_eq!(
            step,
            AuthStep::Done(Credentials::Plain {
                identity: "bob".to_string(),
                password: "hunter2".to_string(),
            })
        );
    }

    #[test]
    fn login_prompts_username_then_password() {
        let (mut exchange, step) = AuthExchange::start(AuthMechanism::Login, None);
        assert_eq!(step, AuthStep::Continue(LOGIN_USER_PROMPT));
        assert_eq!(exchange.feed(&b64(b"carol")), AuthStep::Continue(LOGIN_PASS_PROMPT));
        assert_eq!(
            exchange.feed(&b64(b"pw")),
            AuthStep::Done(Credentials::Login {
                username: "carol".to_string(),
                password: "pw".to_string(),
            })
        );
    }

    #[test]
    fn star_cancels_mid_exchange() {
        let (mut exchange, _) = AuthExchange::start(AuthMechanism::Login, None);
        assert_eq!(exchange.feed("*"), AuthStep::Cancelled);
    }

    #[test]
    fn bad_base64_fails() {
        let (mut exchange, _) = AuthExchange::start(AuthMechanism::Plain, None);
        assert!(matches!(exchange.feed("!!!not-base64!!!"), AuthStep::Failed(_)));
    }

    #[test]
    fn plain_missing_separator_fails() {
        let (mut exchange, _) = AuthExchange::start(AuthMechanism::Plain, None);
        assert!(matches!(exchange.feed(&b64(b"no-nuls-here")), AuthStep::Failed(_)));
    }

    #[test]
    fn mechanism_names_parse_case_insensitively() {
        assert_eq!(AuthMechanism::from_name("plain"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::from_name("LOGIN"), Some(AuthMechanism::Login));
        assert_eq!(AuthMechanism::from_name("CRAM-MD5"), None);
    }
}
