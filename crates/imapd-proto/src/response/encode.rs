//! Wire encoding of response units.
//!
//! Every unit is CRLF-terminated. Atoms are written bare; strings are
//! quoted with backslash-escaping when a quoted string can carry them and
//! emitted as `{N}` literals otherwise; literal payloads are written raw,
//! interleaved with the textual framing.

use super::{ImapValue, ResponseCode, ResponseUnit, Status, Untagged};

/// Encodes one response unit into `buf`.
pub fn encode_unit(unit: &ResponseUnit, buf: &mut Vec<u8>) {
    match unit {
        ResponseUnit::Continuation { text } => {
            buf.extend_from_slice(b"+ ");
            buf.extend_from_slice(text.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        ResponseUnit::Untagged(untagged) => encode_untagged(untagged, buf),
        ResponseUnit::Tagged {
            tag,
            status,
            code,
            text,
        } => {
            buf.extend_from_slice(tag.as_str().as_bytes());
            buf.push(b' ');
            write_status_line(*status, code.as_ref(), text, buf);
        }
    }
}

fn encode_untagged(untagged: &Untagged, buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"* ");
    match untagged {
        Untagged::Status { status, code, text } => {
            write_status_line(*status, code.as_ref(), text, buf);
        }
        Untagged::Capability(caps) => {
            buf.extend_from_slice(b"CAPABILITY");
            for cap in caps {
                buf.push(b' ');
                buf.extend_from_slice(cap.as_bytes());
            }
            buf.extend_from_slice(b"\r\n");
        }
        Untagged::Exists(n) => {
            buf.extend_from_slice(format!("{n} EXISTS\r\n").as_bytes());
        }
        Untagged::Recent(n) => {
            buf.extend_from_slice(format!("{n} RECENT\r\n").as_bytes());
        }
        Untagged::Expunge(n) => {
            buf.extend_from_slice(format!("{n} EXPUNGE\r\n").as_bytes());
        }
        Untagged::Flags(flags) => {
            buf.extend_from_slice(b"FLAGS ");
            write_atom_list(flags, buf);
            buf.extend_from_slice(b"\r\n");
        }
        Untagged::List {
            lsub,
            attributes,
            delimiter,
            name,
        } => {
            buf.extend_from_slice(if *lsub { b"LSUB " } else { b"LIST " });
            write_atom_list(attributes, buf);
            buf.push(b' ');
            match delimiter {
                Some(c) => {
                    let mut s = String::new();
                    s.push(*c);
                    write_quoted(&s, buf);
                }
                None => buf.extend_from_slice(b"NIL"),
            }
            buf.push(b' ');
            write_astring(name, buf);
            buf.extend_from_slice(b"\r\n");
        }
        Untagged::Search(ids) => {
            buf.extend_from_slice(b"SEARCH");
            for id in ids {
                buf.extend_from_slice(format!(" {id}").as_bytes());
            }
            buf.extend_from_slice(b"\r\n");
        }
        Untagged::StatusItems { mailbox, items } => {
            buf.extend_from_slice(b"STATUS ");
            write_astring(mailbox, buf);
            buf.extend_from_slice(b" (");
            for (i, (name, count)) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                buf.extend_from_slice(format!("{name} {count}").as_bytes());
            }
            buf.extend_from_slice(b")\r\n");
        }
        Untagged::Fetch { seq, items } => {
            buf.extend_from_slice(format!("{seq} FETCH (").as_bytes());
            for (i, (name, value)) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                buf.extend_from_slice(name.as_bytes());
                buf.push(b' ');
                write_value(value, buf);
            }
            buf.extend_from_slice(b")\r\n");
        }
    }
}

/// Writes `STATUS [CODE] text\r\n` (the leading tag or `*` already emitted).
fn write_status_line(status: Status, code: Option<&ResponseCode>, text: &str, buf: &mut Vec<u8>) {
    buf.extend_from_slice(status.as_str().as_bytes());
    if let Some(code) = code {
        buf.extend_from_slice(b" [");
        write_code(code, buf);
        buf.push(b']');
    }
    if !text.is_empty() {
        buf.push(b' ');
        buf.extend_from_slice(text.as_bytes());
    }
    buf.extend_from_slice(b"\r\n");
}

fn write_code(code: &ResponseCode, buf: &mut Vec<u8>) {
    match code {
        ResponseCode::Alert => buf.extend_from_slice(b"ALERT"),
        ResponseCode::Capability(caps) => {
            buf.extend_from_slice(b"CAPABILITY");
            for cap in caps {
                buf.push(b' ');
                buf.extend_from_slice(cap.as_bytes());
            }
        }
        ResponseCode::ReadOnly => buf.extend_from_slice(b"READ-ONLY"),
        ResponseCode::ReadWrite => buf.extend_from_slice(b"READ-WRITE"),
        ResponseCode::TryCreate => buf.extend_from_slice(b"TRYCREATE"),
        ResponseCode::UidNext(n) => buf.extend_from_slice(format!("UIDNEXT {n}").as_bytes()),
        ResponseCode::UidValidity(n) => {
            buf.extend_from_slice(format!("UIDVALIDITY {n}").as_bytes());
        }
        ResponseCode::Unseen(n) => buf.extend_from_slice(format!("UNSEEN {n}").as_bytes()),
        ResponseCode::PermanentFlags(flags) => {
            buf.extend_from_slice(b"PERMANENTFLAGS ");
            write_atom_list(flags, buf);
        }
    }
}

/// Writes one data value, recursing through lists.
pub fn write_value(value: &ImapValue, buf: &mut Vec<u8>) {
    match value {
        ImapValue::Atom(s) => buf.extend_from_slice(s.as_bytes()),
        ImapValue::Number(n) => buf.extend_from_slice(n.to_string().as_bytes()),
        ImapValue::String(s) => write_string(s, buf),
        ImapValue::Literal(data) => write_literal(data, buf),
        ImapValue::List(items) => {
            buf.push(b'(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b' ');
                }
                write_value(item, buf);
            }
            buf.push(b')');
        }
        ImapValue::Nil => buf.extend_from_slice(b"NIL"),
    }
}

/// Writes an astring: bare atom when safe, quoted when escaping suffices,
/// literal otherwise.
pub fn write_astring(s: &str, buf: &mut Vec<u8>) {
    if !s.is_empty() && s.bytes().all(is_plain_atom_char) {
        buf.extend_from_slice(s.as_bytes());
    } else {
        write_string(s, buf);
    }
}

/// Writes a string value: quoted when a quoted string can carry it,
/// literal otherwise.
fn write_string(s: &str, buf: &mut Vec<u8>) {
    if s.bytes().any(needs_literal) {
        write_literal(s.as_bytes(), buf);
    } else {
        write_quoted(s, buf);
    }
}

fn write_quoted(s: &str, buf: &mut Vec<u8>) {
    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

/// Writes `{N}\r\n` followed by the raw payload, never re-escaped.
fn write_literal(data: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(format!("{{{}}}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
}

/// Bytes that may appear in a bare atom on the wire.
const fn is_plain_atom_char(b: u8) -> bool {
    b.is_ascii_graphic()
        && !matches!(b, b'(' | b')' | b'{' | b'"' | b'\\' | b'%' | b'*')
}

/// Bytes a quoted string cannot carry.
const fn needs_literal(b: u8) -> bool {
    b == b'\r' || b == b'\n' || b == 0 || !b.is_ascii()
}

fn write_atom_list(items: &[String], buf: &mut Vec<u8>) {
    buf.push(b'(');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        buf.extend_from_slice(item.as_bytes());
    }
    buf.push(b')');
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new
)]
mod tests {
    use super::*;
    use crate::command::Tag;

    fn render(unit: &ResponseUnit) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_unit(unit, &mut buf);
        buf
    }

    #[test]
    fn tagged_ok() {
        let unit = ResponseUnit::tagged(Tag::new("a1"), Status::Ok, "LOGIN completed");
        assert_eq!(render(&unit), b"a1 OK LOGIN completed\r\n");
    }

    #[test]
    fn tagged_with_code() {
        let unit = ResponseUnit::Tagged {
            tag: Tag::new("a2"),
            status: Status::Ok,
            code: Some(ResponseCode::ReadWrite),
            text: "SELECT completed".to_string(),
        };
        assert_eq!(render(&unit), b"a2 OK [READ-WRITE] SELECT completed\r\n");
    }

    #[test]
    fn untagged_code_without_text() {
        let unit = ResponseUnit::Untagged(Untagged::Status {
            status: Status::Ok,
            code: Some(ResponseCode::UidValidity(1111)),
            text: String::new(),
        });
        assert_eq!(render(&unit), b"* OK [UIDVALIDITY 1111]\r\n");
    }

    #[test]
    fn continuation() {
        let unit = ResponseUnit::Continuation {
            text: "OK".to_string(),
        };
        assert_eq!(render(&unit), b"+ OK\r\n");
    }

    #[test]
    fn exists_and_recent() {
        assert_eq!(
            render(&ResponseUnit::Untagged(Untagged::Exists(3))),
            b"* 3 EXISTS\r\n"
        );
        assert_eq!(
            render(&ResponseUnit::Untagged(Untagged::Recent(0))),
            b"* 0 RECENT\r\n"
        );
    }

    #[test]
    fn capability_line() {
        let unit = ResponseUnit::Untagged(Untagged::Capability(vec![
            "IMAP4rev1".to_string(),
            "AUTH=PLAIN".to_string(),
        ]));
        assert_eq!(render(&unit), b"* CAPABILITY IMAP4rev1 AUTH=PLAIN\r\n");
    }

    #[test]
    fn list_line_with_delimiter() {
        let unit = ResponseUnit::Untagged(Untagged::List {
            lsub: false,
            attributes: vec!["\\Noselect".to_string()],
            delimiter: Some('/'),
            name: "foo bar".to_string(),
        });
        assert_eq!(render(&unit), b"* LIST (\\Noselect) \"/\" \"foo bar\"\r\n");
    }

    #[test]
    fn list_line_without_delimiter() {
        let unit = ResponseUnit::Untagged(Untagged::List {
            lsub: true,
            attributes: vec![],
            delimiter: None,
            name: "INBOX".to_string(),
        });
        assert_eq!(render(&unit), b"* LSUB () NIL INBOX\r\n");
    }

    #[test]
    fn search_results() {
        assert_eq!(
            render(&ResponseUnit::Untagged(Untagged::Search(vec![2, 5, 9]))),
            b"* SEARCH 2 5 9\r\n"
        );
        assert_eq!(
            render(&ResponseUnit::Untagged(Untagged::Search(vec![]))),
            b"* SEARCH\r\n"
        );
    }

    #[test]
    fn status_items() {
        let unit = ResponseUnit::Untagged(Untagged::StatusItems {
            mailbox: "INBOX".to_string(),
            items: vec![("MESSAGES".to_string(), 3), ("UNSEEN".to_string(), 1)],
        });
        assert_eq!(render(&unit), b"* STATUS INBOX (MESSAGES 3 UNSEEN 1)\r\n");
    }

    #[test]
    fn fetch_with_nested_values() {
        let unit = ResponseUnit::Untagged(Untagged::Fetch {
            seq: 1,
            items: vec![
                (
                    "FLAGS".to_string(),
                    ImapValue::List(vec![ImapValue::Atom("\\Seen".to_string())]),
                ),
                ("UID".to_string(), ImapValue::Number(42)),
            ],
        });
        assert_eq!(render(&unit), b"* 1 FETCH (FLAGS (\\Seen) UID 42)\r\n");
    }

    #[test]
    fn binary_values_become_literals() {
        let unit = ResponseUnit::Untagged(Untagged::Fetch {
            seq: 2,
            items: vec![(
                "BODY[]".to_string(),
                ImapValue::Literal(b"line1\r\nline2\r\n".to_vec()),
            )],
        });
        assert_eq!(
            render(&unit),
            b"* 2 FETCH (BODY[] {14}\r\nline1\r\nline2\r\n)\r\n"
        );
    }

    #[test]
    fn strings_with_line_breaks_become_literals() {
        let mut buf = Vec::new();
        write_value(&ImapValue::String("a\r\nb".to_string()), &mut buf);
        assert_eq!(buf, b"{4}\r\na\r\nb");
    }

    #[test]
    fn quoted_escaping() {
        let mut buf = Vec::new();
        write_value(&ImapValue::String("say \"hi\" \\ bye".to_string()), &mut buf);
        assert_eq!(buf, b"\"say \\\"hi\\\" \\\\ bye\"");
    }

    #[test]
    fn astring_prefers_bare_atom() {
        let mut buf = Vec::new();
        write_astring("INBOX.Drafts", &mut buf);
        assert_eq!(buf, b"INBOX.Drafts");

        buf.clear();
        write_astring("two words", &mut buf);
        assert_eq!(buf, b"\"two words\"");

        buf.clear();
        write_astring("", &mut buf);
        assert_eq!(buf, b"\"\"");
    }
}
