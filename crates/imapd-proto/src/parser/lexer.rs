//! Tokenizer for the command grammar.
//!
//! Breaks a complete frame's logical line into tokens. Literal markers are
//! resolved against the frame's pre-consumed payloads, so the parser above
//! only ever sees fully materialized [`Token::Literal`] values.

#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;

use crate::{Error, Result};

/// A single token of the command grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Bare atom.
    Atom(&'a str),
    /// Quoted string, unescaped.
    Quoted(String),
    /// Literal payload, substituted for its `{N}` marker.
    Literal(Vec<u8>),
    /// Opening parenthesis.
    LParen,
    /// Closing parenthesis.
    RParen,
    /// A single space.
    Space,
    /// Line terminator.
    Crlf,
    /// End of input.
    Eof,
}

/// Tokenizer state over one frame.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    literals: VecDeque<Vec<u8>>,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer over a frame's logical line and literal payloads.
    #[must_use]
    pub fn new(input: &'a [u8], literals: Vec<Vec<u8>>) -> Self {
        Self {
            input,
            pos: 0,
            literals: literals.into(),
        }
    }

    /// Returns the current position in the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Peeks at the current byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Advances by one byte and returns it.
    pub fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(byte) = self.peek() else {
            return Ok(Token::Eof);
        };

        match byte {
            b'\r' => {
                if self.peek_at(1) == Some(b'\n') {
                    self.skip(2);
                    Ok(Token::Crlf)
                } else {
                    Err(self.error("expected LF after CR"))
                }
            }
            b' ' => {
                self.advance();
                Ok(Token::Space)
            }
            b'(' => {
                self.advance();
                Ok(Token::LParen)
            }
            b')' => {
                self.advance();
                Ok(Token::RParen)
            }
            b'"' => self.read_quoted(),
            b'{' => self.read_literal(),
            _ if is_atom_char(byte) => self.read_atom(),
            _ => Err(self.error(format!("unexpected character {byte:#04x}"))),
        }
    }

    /// Reads a quoted string token, unescaping `\"` and `\\`.
    fn read_quoted(&mut self) -> Result<Token<'a>> {
        self.advance(); // Skip opening quote

        let mut result = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(c @ (b'"' | b'\\')) => result.push(c),
                    Some(c) => {
                        return Err(self.error(format!("invalid escape: \\{}", c as char)));
                    }
                    None => return Err(self.error("unterminated quoted string")),
                },
                Some(b'\r' | b'\n') => {
                    return Err(self.error("line break inside quoted string"));
                }
                Some(c) => result.push(c),
                None => return Err(self.error("unterminated quoted string")),
            }
        }

        let s = String::from_utf8(result)
            .map_err(|_| self.error("invalid UTF-8 in quoted string"))?;
        Ok(Token::Quoted(s))
    }

    /// Consumes a `{N}` / `{N+}` marker and substitutes its payload.
    ///
    /// The frame buffer has already collected the payload; the marker and
    /// its terminating CRLF are skipped here.
    fn read_literal(&mut self) -> Result<Token<'a>> {
        self.advance(); // Skip {

        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.advance();
        }
        if self.pos == start {
            return Err(self.error("expected digits in literal marker"));
        }
        if self.peek() == Some(b'+') {
            self.advance();
        }
        if self.advance() != Some(b'}') {
            return Err(self.error("expected } after literal size"));
        }
        if self.advance() != Some(b'\r') || self.advance() != Some(b'\n') {
            return Err(self.error("expected CRLF after literal marker"));
        }

        self.literals
            .pop_front()
            .map(Token::Literal)
            .ok_or_else(|| self.error("literal marker without payload"))
    }

    /// Reads an atom token.
    fn read_atom(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        while self.peek().is_some_and(is_atom_char) {
            self.advance();
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .map(Token::Atom)
            .map_err(|_| self.error("invalid UTF-8 in atom"))
    }

    /// Creates a parse error at the current position.
    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.pos, message)
    }
}

/// Returns `true` if the byte is a valid atom character.
///
/// Atoms are a maximal run of characters excluding SP, control characters,
/// and the specials `( ) " {`. Wildcards (`%`, `*`) and bracket characters
/// remain atom characters so LIST patterns and FETCH items like
/// `BODY[HEADER]` tokenize as single atoms.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    b > 0x20 && b != 0x7F && b != b'(' && b != b')' && b != b'"' && b != b'{'
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    fn lexer(input: &[u8]) -> Lexer<'_> {
        Lexer::new(input, Vec::new())
    }

    #[test]
    fn simple_command() {
        let mut lex = lexer(b"a1 LOGIN user pass\r\n");
        assert_eq!(lex.next_token().unwrap(), Token::Atom("a1"));
        assert_eq!(lex.next_token().unwrap(), Token::Space);
        assert_eq!(lex.next_token().unwrap(), Token::Atom("LOGIN"));
        assert_eq!(lex.next_token().unwrap(), Token::Space);
        assert_eq!(lex.next_token().unwrap(), Token::Atom("user"));
        assert_eq!(lex.next_token().unwrap(), Token::Space);
        assert_eq!(lex.next_token().unwrap(), Token::Atom("pass"));
        assert_eq!(lex.next_token().unwrap(), Token::Crlf);
        assert_eq!(lex.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn quoted_string_with_escapes() {
        let mut lex = lexer(b"\"he said \\\"hi\\\" to \\\\me\"");
        assert_eq!(
            lex.next_token().unwrap(),
            Token::Quoted("he said \"hi\" to \\me".to_string())
        );
    }

    #[test]
    fn invalid_escape_rejected() {
        let mut lex = lexer(b"\"bad \\n escape\"");
        assert!(lex.next_token().is_err());
    }

    #[test]
    fn unterminated_quoted_string_rejected() {
        let mut lex = lexer(b"\"no close");
        assert!(lex.next_token().is_err());
    }

    #[test]
    fn literal_marker_substitutes_payload() {
        let mut lex = Lexer::new(b"{5}\r\n more", vec![b"hello".to_vec()]);
        assert_eq!(lex.next_token().unwrap(), Token::Literal(b"hello".to_vec()));
        assert_eq!(lex.next_token().unwrap(), Token::Space);
        assert_eq!(lex.next_token().unwrap(), Token::Atom("more"));
    }

    #[test]
    fn literal_plus_marker() {
        let mut lex = Lexer::new(b"{5+}\r\n", vec![b"hello".to_vec()]);
        assert_eq!(lex.next_token().unwrap(), Token::Literal(b"hello".to_vec()));
        assert_eq!(lex.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn parens_and_wildcards() {
        let mut lex = lexer(b"(\\Seen %*)");
        assert_eq!(lex.next_token().unwrap(), Token::LParen);
        assert_eq!(lex.next_token().unwrap(), Token::Atom("\\Seen"));
        assert_eq!(lex.next_token().unwrap(), Token::Space);
        assert_eq!(lex.next_token().unwrap(), Token::Atom("%*"));
        assert_eq!(lex.next_token().unwrap(), Token::RParen);
    }

    #[test]
    fn bare_cr_rejected() {
        let mut lex = lexer(b"a1\rX");
        assert_eq!(lex.next_token().unwrap(), Token::Atom("a1"));
        assert!(lex.next_token().is_err());
    }

    #[test]
    fn atom_chars() {
        assert!(is_atom_char(b'A'));
        assert!(is_atom_char(b'1'));
        assert!(is_atom_char(b'%'));
        assert!(is_atom_char(b'*'));
        assert!(is_atom_char(b'['));
        assert!(is_atom_char(b']'));
        assert!(is_atom_char(b'\\'));
        assert!(!is_atom_char(b' '));
        assert!(!is_atom_char(b'('));
        assert!(!is_atom_char(b')'));
        assert!(!is_atom_char(b'"'));
        assert!(!is_atom_char(b'{'));
        assert!(!is_atom_char(0x07));
        assert!(!is_atom_char(0x7F));
    }
}
