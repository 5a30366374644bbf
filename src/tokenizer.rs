//! Splits a byte stream into logical SHEF message records.
//!
//! One [`MessageRecord`] covers a complete message: the `.A`/`.B`/`.E` header
//! line plus its numbered continuations, and for `.B` the body rows up to
//! `.END`. Throwaway `:...:` comments are stripped and whitespace runs are
//! collapsed before hand-off, except inside double-quoted retained comments,
//! which survive verbatim. The tokenizer never rejects input: a line that
//! matches no rule comes out as an [`MessageKind::Unrecognized`] record for
//! the decoder to drop with a warning.

use std::io::{self, BufRead};

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    A,
    B,
    E,
    Unrecognized,
}

/// One cleaned logical line of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLine {
    /// 1-based line number in the input stream.
    pub number: usize,
    pub text: String,
    /// True for `.Xn` continuation lines; false for the header line and for
    /// `.B` body rows.
    pub continuation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub kind: MessageKind,
    pub revised: bool,
    pub start_line: usize,
    /// Header remainder first, then continuations / body rows in input order.
    pub lines: Vec<RecordLine>,
    /// Present on unrecognized records: why the line matched no rule.
    pub note: Option<String>,
}

impl MessageRecord {
    fn unrecognized(number: usize, text: String, note: String) -> Self {
        MessageRecord {
            kind: MessageKind::Unrecognized,
            revised: false,
            start_line: number,
            lines: vec![RecordLine {
                number,
                text,
                continuation: false,
            }],
            note: Some(note),
        }
    }
}

enum DotLine<'a> {
    Header {
        kind: MessageKind,
        revised: bool,
        rest: &'a str,
    },
    Continuation {
        kind: MessageKind,
        sequence: u32,
        rest: &'a str,
    },
    End,
}

static DOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.([ABEabe])([Rr])?([0-9]{1,2})?(?:\s+(.*))?$").unwrap());
static END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.[Ee][Nn][Dd]\b").unwrap());

fn parse_dot_line(line: &str) -> Option<DotLine<'_>> {
    if END_RE.is_match(line) {
        return Some(DotLine::End);
    }
    let caps = DOT_RE.captures(line)?;
    let kind = match caps
        .get(1)
        .map(|m| m.as_str().to_ascii_uppercase())
        .as_deref()
    {
        Some("A") => MessageKind::A,
        Some("B") => MessageKind::B,
        Some("E") => MessageKind::E,
        _ => return None,
    };
    let revised = caps.get(2).is_some();
    let rest = caps.get(4).map(|m| m.as_str()).unwrap_or("");
    match caps.get(3) {
        Some(seq) => Some(DotLine::Continuation {
            kind,
            // two digits always fit
            sequence: seq.as_str().parse().unwrap_or(0),
            rest,
        }),
        None => Some(DotLine::Header {
            kind,
            revised,
            rest,
        }),
    }
}

/// Strip `:`-comments and collapse whitespace runs, leaving quoted retained
/// comments untouched. An inline `:note:` resumes data after the second
/// colon; an unclosed comment runs to end of line.
fn clean_line(raw: &str) -> String {
    let mut stripped = String::with_capacity(raw.len());
    let mut in_quotes = false;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                stripped.push(c);
            }
            ':' if !in_quotes => {
                for c2 in chars.by_ref() {
                    if c2 == ':' {
                        break;
                    }
                }
            }
            _ => stripped.push(c),
        }
    }

    let mut out = String::with_capacity(stripped.len());
    let mut in_quotes = false;
    let mut pending_space = false;
    for c in stripped.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        }
        if !in_quotes && c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            if !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
        }
        out.push(c);
    }
    out
}

/// Lazily yields one [`MessageRecord`] per complete message. Finite when the
/// input is finite; consumes the reader and is not restartable.
pub struct Tokenizer<R: BufRead> {
    lines: io::Lines<R>,
    line_no: usize,
    peeked: Option<(usize, String)>,
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(reader: R) -> Self {
        Tokenizer {
            lines: reader.lines(),
            line_no: 0,
            peeked: None,
        }
    }

    fn pull(&mut self) -> Option<io::Result<(usize, String)>> {
        if let Some(entry) = self.peeked.take() {
            return Some(Ok(entry));
        }
        match self.lines.next()? {
            Ok(raw) => {
                self.line_no += 1;
                Some(Ok((self.line_no, raw)))
            }
            Err(e) => Some(Err(e)),
        }
    }

    fn put_back(&mut self, entry: (usize, String)) {
        self.peeked = Some(entry);
    }

    /// Gather continuations (and, for `.B`, body rows up to `.END`) onto an
    /// open record.
    fn collect_message(
        &mut self,
        kind: MessageKind,
        revised: bool,
        start_line: usize,
        header_rest: &str,
    ) -> io::Result<MessageRecord> {
        let mut lines = vec![RecordLine {
            number: start_line,
            text: header_rest.to_string(),
            continuation: false,
        }];
        let mut expected_seq: u32 = 1;
        let mut saw_end = false;

        loop {
            let (number, raw) = match self.pull() {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(e)) => return Err(e),
            };
            let clean = clean_line(&raw);
            if clean.is_empty() {
                continue;
            }

            match parse_dot_line(&clean) {
                Some(DotLine::Continuation {
                    kind: ckind,
                    sequence,
                    rest,
                }) if ckind == kind => {
                    if sequence != expected_seq {
                        log::warn!(
                            "line {number}: continuation sequence {sequence} where {expected_seq} was expected"
                        );
                    }
                    expected_seq = sequence.wrapping_add(1);
                    lines.push(RecordLine {
                        number,
                        text: rest.to_string(),
                        continuation: true,
                    });
                }
                Some(DotLine::End) if kind == MessageKind::B => {
                    saw_end = true;
                    break;
                }
                Some(DotLine::End) => {
                    log::warn!("line {number}: stray .END outside a .B message");
                }
                None if kind == MessageKind::B && !clean.starts_with('.') => {
                    // body row
                    lines.push(RecordLine {
                        number,
                        text: clean,
                        continuation: false,
                    });
                }
                _ => {
                    // next message or anything else: this record is over
                    self.put_back((number, clean));
                    break;
                }
            }
        }

        if kind == MessageKind::B && !saw_end {
            log::warn!("line {start_line}: .B message was never closed with .END");
        }

        Ok(MessageRecord {
            kind,
            revised,
            start_line,
            lines,
            note: None,
        })
    }
}

impl<R: BufRead> Iterator for Tokenizer<R> {
    type Item = io::Result<MessageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (number, raw) = match self.pull()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            // peeked lines are already clean; cleaning is idempotent
            let clean = clean_line(&raw);
            if clean.is_empty() {
                continue;
            }

            return Some(match parse_dot_line(&clean) {
                Some(DotLine::Header {
                    kind,
                    revised,
                    rest,
                }) => self.collect_message(kind, revised, number, rest),
                Some(DotLine::Continuation { sequence, .. }) => Ok(MessageRecord::unrecognized(
                    number,
                    clean,
                    format!("continuation .{sequence} with no open message"),
                )),
                Some(DotLine::End) => Ok(MessageRecord::unrecognized(
                    number,
                    clean,
                    ".END with no open .B message".to_string(),
                )),
                None => Ok(MessageRecord::unrecognized(
                    number,
                    clean,
                    "line matches no message rule".to_string(),
                )),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(input: &str) -> Vec<MessageRecord> {
        Tokenizer::new(input.as_bytes())
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn cleans_comments_and_whitespace() {
        assert_eq!(clean_line(": whole line comment"), "");
        assert_eq!(clean_line("data : note : more\t \tdata"), "data more data");
        assert_eq!(clean_line("data : unclosed to eol"), "data");
        assert_eq!(
            clean_line("PC 0.00\"kept : verbatim  text\""),
            "PC 0.00\"kept : verbatim  text\""
        );
        assert_eq!(clean_line("   .A  X   "), ".A X");
    }

    #[test]
    fn single_a_message() {
        let recs = records(".A TNSO2 20240630 DH0000/PC 0.00/TA 78.5\n");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].kind, MessageKind::A);
        assert!(!recs[0].revised);
        assert_eq!(recs[0].lines[0].text, "TNSO2 20240630 DH0000/PC 0.00/TA 78.5");
    }

    #[test]
    fn revised_header_sets_flag() {
        let recs = records(".AR TNSO2 20240630 DH0000/PC 0.00\n");
        assert!(recs[0].revised);
        assert_eq!(recs[0].kind, MessageKind::A);
    }

    #[test]
    fn e_message_with_continuation() {
        let input = "\
.E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73
.E01 638.00/638.01
";
        let recs = records(input);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].lines.len(), 2);
        assert!(recs[0].lines[1].continuation);
        assert_eq!(recs[0].lines[1].text, "638.00/638.01");
    }

    #[test]
    fn b_message_collects_rows_until_end() {
        let input = "\
.B STR 20240601 Z DH12/HG/PC
LOC1 1.2/2.3
LOC2 4.5/6.7
.END
.A XYZ 20240601 Z DH12/HG 1.0
";
        let recs = records(input);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].kind, MessageKind::B);
        let rows: Vec<_> = recs[0]
            .lines
            .iter()
            .skip(1)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(rows, vec!["LOC1 1.2/2.3", "LOC2 4.5/6.7"]);
        assert_eq!(recs[1].kind, MessageKind::A);
    }

    #[test]
    fn back_to_back_messages_split() {
        let input = "\
.A AAA 20240601 Z DH01/HG 1.0
.A BBB 20240601 Z DH02/HG 2.0
";
        let recs = records(input);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].lines[0].text, "AAA 20240601 Z DH01/HG 1.0");
        assert_eq!(recs[1].lines[0].text, "BBB 20240601 Z DH02/HG 2.0");
    }

    #[test]
    fn junk_lines_become_unrecognized_records() {
        let recs = records("hello world\n.E5 1.0/2.0\n");
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.kind == MessageKind::Unrecognized));
        assert!(recs[0].note.is_some());
    }

    #[test]
    fn comment_lines_between_continuations_are_stitched_out() {
        let input = "\
.E KEYO2 20251107 Z DH1400/HT/DIH01/637.74
: mid-message throwaway comment
.E1 637.73
";
        let recs = records(input);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].lines.len(), 2);
    }
}
