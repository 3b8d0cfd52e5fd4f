//! Parsed client commands.
//!
//! A [`Command`] is the structured form of one complete command frame:
//! the client-chosen tag, the uppercased command name, and an ordered list
//! of [`Argument`] nodes.

/// Client-chosen token prefixing each command, echoed in its tagged
/// completion response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    /// Creates a new tag from a string.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single command argument node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// Bare atom, case preserved.
    Atom(String),
    /// Quoted string, already unescaped.
    Quoted(String),
    /// Octet-counted literal payload. The stored length always equals the
    /// payload length; partially received literals never reach this type.
    Literal(Vec<u8>),
    /// Parenthesized list, possibly nested.
    List(Vec<Argument>),
}

impl Argument {
    /// Returns the textual value of an atom, quoted string, or UTF-8 literal.
    ///
    /// Returns `None` for lists and for literals that are not valid UTF-8.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Atom(s) | Self::Quoted(s) => Some(s.clone()),
            Self::Literal(data) => String::from_utf8(data.clone()).ok(),
            Self::List(_) => None,
        }
    }

    /// Returns the list items if this argument is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Argument]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// A complete parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The client-chosen tag.
    pub tag: Tag,
    /// The command verb, normalized to uppercase.
    pub name: String,
    /// Ordered argument list.
    pub args: Vec<Argument>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    #[test]
    fn tag_display() {
        let tag = Tag::new("a001");
        assert_eq!(tag.as_str(), "a001");
        assert_eq!(format!("{tag}"), "a001");
    }

    #[test]
    fn argument_to_text() {
        assert_eq!(
            Argument::Atom("INBOX".to_string()).to_text(),
            Some("INBOX".to_string())
        );
        assert_eq!(
            Argument::Quoted("a b".to_string()).to_text(),
            Some("a b".to_string())
        );
        assert_eq!(
            Argument::Literal(b"hello".to_vec()).to_text(),
            Some("hello".to_string())
        );
        assert_eq!(Argument::Literal(vec![0xff, 0xfe]).to_text(), None);
        assert_eq!(Argument::List(vec![]).to_text(), None);
    }

    #[test]
    fn argument_as_list() {
        let list = Argument::List(vec![Argument::Atom("a".to_string())]);
        assert_eq!(list.as_list().unwrap().len(), 1);
        assert!(Argument::Atom("a".to_string()).as_list().is_none());
    }
}
