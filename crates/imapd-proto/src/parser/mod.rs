//! Command parser.
//!
//! Turns a complete [`Frame`] into a structured [`Command`]:
//! `tag SP command-name [SP arg-list] CRLF`. Arguments are atoms, quoted
//! strings, literals (substituted from the frame's payloads), or
//! parenthesized lists with arbitrary nesting.

#![allow(clippy::missing_errors_doc)]

mod lexer;

pub use lexer::{Lexer, Token, is_atom_char};

use crate::command::{Argument, Command, Tag};
use crate::frame::Frame;
use crate::{Error, Result};

/// Parses a complete command frame.
///
/// Errors before the tag is recognized carry `tag: None`; the caller
/// degrades those to an untagged BAD. All later errors carry the parsed
/// tag so the BAD response can be addressed to the offending command.
pub fn parse_command(frame: Frame) -> Result<Command> {
    let Frame { line, literals } = frame;
    let mut parser = Parser {
        lexer: Lexer::new(&line, literals),
    };

    let tag = parser.read_tag()?;
    parser.finish(&tag).map_err(|err| match err {
        Error::Parse {
            position, message, ..
        } => Error::Parse {
            position,
            message,
            tag: Some(tag.as_str().to_string()),
        },
        other => other,
    })
}

struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl Parser<'_> {
    /// Reads the command tag. Any non-space token is acceptable.
    fn read_tag(&mut self) -> Result<Tag> {
        match self.lexer.next_token()? {
            Token::Atom(s) => Ok(Tag::new(s)),
            token => Err(self
                .lexer
                .error(format!("expected command tag, got {token:?}"))),
        }
    }

    /// Reads the command name and arguments after the tag.
    fn finish(&mut self, tag: &Tag) -> Result<Command> {
        match self.lexer.next_token()? {
            Token::Space => {}
            token => {
                return Err(self
                    .lexer
                    .error(format!("expected space after tag, got {token:?}")));
            }
        }

        let name = match self.lexer.next_token()? {
            Token::Atom(s) => s.to_ascii_uppercase(),
            token => {
                return Err(self
                    .lexer
                    .error(format!("expected command name, got {token:?}")));
            }
        };

        let mut args = Vec::new();
        loop {
            match self.lexer.next_token()? {
                Token::Crlf => break,
                Token::Space => args.push(self.read_argument()?),
                Token::Eof => {
                    return Err(self.lexer.error("command not terminated by CRLF"));
                }
                token => {
                    return Err(self
                        .lexer
                        .error(format!("expected space before argument, got {token:?}")));
                }
            }
        }

        match self.lexer.next_token()? {
            Token::Eof => Ok(Command {
                tag: tag.clone(),
                name,
                args,
            }),
            token => Err(self
                .lexer
                .error(format!("trailing input after CRLF: {token:?}"))),
        }
    }

    fn read_argument(&mut self) -> Result<Argument> {
        match self.lexer.next_token()? {
            Token::Atom(s) => Ok(Argument::Atom(s.to_string())),
            Token::Quoted(s) => Ok(Argument::Quoted(s)),
            Token::Literal(data) => Ok(Argument::Literal(data)),
            Token::LParen => self.read_list(),
            token => Err(self.lexer.error(format!("expected argument, got {token:?}"))),
        }
    }

    /// Reads the remainder of a parenthesized list, the `(` already consumed.
    fn read_list(&mut self) -> Result<Argument> {
        let mut items = Vec::new();
        if self.lexer.peek() == Some(b')') {
            self.lexer.advance();
            return Ok(Argument::List(items));
        }
        loop {
            items.push(self.read_argument()?);
            match self.lexer.peek() {
                Some(b' ') => {
                    self.lexer.advance();
                }
                Some(b')') => {
                    self.lexer.advance();
                    return Ok(Argument::List(items));
                }
                _ => {
                    return Err(self.lexer.error("expected space or ')' in list"));
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new
)]
mod tests {
    use super::*;

    fn parse(line: &[u8]) -> Result<Command> {
        parse_command(Frame {
            line: line.to_vec(),
            literals: Vec::new(),
        })
    }

    fn parse_with(line: &[u8], literals: &[&[u8]]) -> Result<Command> {
        parse_command(Frame {
            line: line.to_vec(),
            literals: literals.iter().map(|l| l.to_vec()).collect(),
        })
    }

    #[test]
    fn bare_command() {
        let cmd = parse(b"a1 NOOP\r\n").unwrap();
        assert_eq!(cmd.tag.as_str(), "a1");
        assert_eq!(cmd.name, "NOOP");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn name_is_uppercased_tag_preserved() {
        let cmd = parse(b"Xyz9 noop\r\n").unwrap();
        assert_eq!(cmd.tag.as_str(), "Xyz9");
        assert_eq!(cmd.name, "NOOP");
    }

    #[test]
    fn atom_and_quoted_arguments() {
        let cmd = parse(b"a2 LOGIN user \"pass word\"\r\n").unwrap();
        assert_eq!(
            cmd.args,
            vec![
                Argument::Atom("user".to_string()),
                Argument::Quoted("pass word".to_string()),
            ]
        );
    }

    #[test]
    fn argument_case_is_preserved() {
        let cmd = parse(b"a3 SELECT InBoX\r\n").unwrap();
        assert_eq!(cmd.args, vec![Argument::Atom("InBoX".to_string())]);
    }

    #[test]
    fn literal_argument() {
        let cmd = parse_with(b"a4 LOGIN {4}\r\n pass\r\n", &[b"user"]).unwrap();
        assert_eq!(
            cmd.args,
            vec![
                Argument::Literal(b"user".to_vec()),
                Argument::Atom("pass".to_string()),
            ]
        );
    }

    #[test]
    fn nested_lists() {
        let cmd = parse(b"a5 FETCH 1 (FLAGS (A B) UID)\r\n").unwrap();
        assert_eq!(
            cmd.args,
            vec![
                Argument::Atom("1".to_string()),
                Argument::List(vec![
                    Argument::Atom("FLAGS".to_string()),
                    Argument::List(vec![
                        Argument::Atom("A".to_string()),
                        Argument::Atom("B".to_string()),
                    ]),
                    Argument::Atom("UID".to_string()),
                ]),
            ]
        );
    }

    #[test]
    fn empty_list() {
        let cmd = parse(b"a6 APPEND INBOX ()\r\n").unwrap();
        assert_eq!(cmd.args[1], Argument::List(vec![]));
    }

    #[test]
    fn list_with_literal_inside() {
        let cmd = parse_with(b"a7 X ({3}\r\n atom)\r\n", &[b"\x01\x02\x03"]).unwrap();
        assert_eq!(
            cmd.args,
            vec![Argument::List(vec![
                Argument::Literal(vec![1, 2, 3]),
                Argument::Atom("atom".to_string()),
            ])]
        );
    }

    #[test]
    fn unparseable_tag_has_no_tag_in_error() {
        let err = parse(b"(oops NOOP\r\n").unwrap_err();
        match err {
            Error::Parse { tag, .. } => assert!(tag.is_none()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn later_errors_carry_the_tag() {
        let err = parse(b"a8 LOGIN \"unterminated\r\n").unwrap_err();
        match err {
            Error::Parse { tag, .. } => assert_eq!(tag.as_deref(), Some("a8")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_command_name_rejected() {
        assert!(parse(b"a9 \r\n").is_err());
        assert!(parse(b"a9\r\n").is_err());
    }

    #[test]
    fn unterminated_list_rejected() {
        assert!(parse(b"a10 X (A B\r\n").is_err());
    }
}
