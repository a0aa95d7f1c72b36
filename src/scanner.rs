use std::iter::{Enumerate, Peekable};
use std::str::Chars;

use crate::PrepperError;

lazy_static::lazy_static! {
    static ref DIRECTIVE_RE: regex::Regex = regex::Regex::new(r"^\s*#\s*([A-Za-z_][A-Za-z0-9_]*)?\s*(.*)$").unwrap();
}

/// Directives handed untouched to the native compiler.
const PASS_THROUGH: &[&str] = &["version", "extension", "pragma", "line", "error"];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DirectiveKind {
    Define,
    Undef,
    If,
    Ifdef,
    Ifndef,
    Elif,
    Else,
    Endif,
    Include,
}

impl DirectiveKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "define" => Self::Define,
            "undef" => Self::Undef,
            "if" => Self::If,
            "ifdef" => Self::Ifdef,
            "ifndef" => Self::Ifndef,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "endif" => Self::Endif,
            "include" => Self::Include,
            _ => return None,
        })
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Define => "define",
            Self::Undef => "undef",
            Self::If => "if",
            Self::Ifdef => "ifdef",
            Self::Ifndef => "ifndef",
            Self::Elif => "elif",
            Self::Else => "else",
            Self::Endif => "endif",
            Self::Include => "include",
        }
    }

    /// `#if`, `#ifdef`, `#ifndef`, `#elif`, `#else` and `#endif`
    pub fn is_conditional(self) -> bool {
        !matches!(self, Self::Define | Self::Undef | Self::Include)
    }
}

/// One logical directive, comments stripped and joined onto a single line
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub args: String,
}

impl Directive {
    /// Text form of the directive, as it would appear in source
    pub fn to_line(&self) -> String {
        if self.args.is_empty() {
            format!("#{}", self.kind.keyword())
        } else {
            format!("#{} {}", self.kind.keyword(), self.args)
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ScannedLine {
    /// Ordinary source text. `in_block_comment` is set when the line starts inside a
    /// `/* */` comment opened on an earlier line.
    Text {
        line: usize,
        text: String,
        in_block_comment: bool,
    },

    /// A directive the preprocessor doesn't interpret, e.g. `#version`
    PassThrough { line: usize, text: String },

    Directive { line: usize, directive: Directive },
}

impl ScannedLine {
    pub fn line(&self) -> usize {
        match self {
            Self::Text { line, .. } | Self::PassThrough { line, .. } | Self::Directive { line, .. } => {
                *line
            }
        }
    }
}

/// Line-oriented directive scanner.
///
/// Yields `ScannedLine`s with 1-based line numbers. Directive lines ending in `\` are
/// joined with their continuation lines, as are lines inside a block comment opened
/// within the directive.
pub struct Scanner<'a, S> {
    lines: Peekable<Enumerate<std::slice::Iter<'a, S>>>,
    in_block_comment: bool,
}

impl<'a, S> Scanner<'a, S>
where
    S: AsRef<str>,
{
    pub fn new(lines: &'a [S]) -> Self {
        Scanner {
            lines: lines.iter().enumerate().peekable(),
            in_block_comment: false,
        }
    }

    fn read_logical_directive(&mut self, first: &str) -> String {
        let mut text = String::new();
        let mut current = first.trim_end_matches('\r').to_owned();

        loop {
            let continued = match current.trim_end().strip_suffix('\\') {
                Some(head) => {
                    text.push_str(head);
                    true
                }
                None => {
                    text.push_str(&current);
                    false
                }
            };

            let needs_more = continued || scan_block_comment_state(&text, false);
            if !needs_more {
                break;
            }

            match self.lines.next() {
                Some((_, next)) => {
                    if !continued {
                        // Still inside a block comment opened on a previous line
                        text.push('\n');
                    }
                    current = next.as_ref().trim_end_matches('\r').to_owned();
                }
                None => break,
            }
        }

        text
    }
}

impl<'a, S> Iterator for Scanner<'a, S>
where
    S: AsRef<str>,
{
    type Item = Result<ScannedLine, PrepperError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (idx, raw) = self.lines.next()?;
        let line = idx + 1;
        let raw = raw.as_ref().trim_end_matches('\r');

        if self.in_block_comment || !raw.trim_start().starts_with('#') {
            let in_block_comment = self.in_block_comment;
            self.in_block_comment = scan_block_comment_state(raw, in_block_comment);
            return Some(Ok(ScannedLine::Text {
                line,
                text: raw.to_owned(),
                in_block_comment,
            }));
        }

        let logical = self.read_logical_directive(raw);
        let cleaned = strip_comments(&logical).replace('\n', " ");

        let caps = match DIRECTIVE_RE.captures(&cleaned) {
            Some(caps) => caps,
            None => {
                return Some(Ok(ScannedLine::PassThrough {
                    line,
                    text: cleaned.trim_end().to_owned(),
                }))
            }
        };

        let keyword = match caps.get(1) {
            Some(keyword) => keyword.as_str(),
            // Null directive
            None => {
                return Some(Ok(ScannedLine::PassThrough {
                    line,
                    text: cleaned.trim_end().to_owned(),
                }))
            }
        };

        if PASS_THROUGH.contains(&keyword) {
            return Some(Ok(ScannedLine::PassThrough {
                line,
                text: cleaned.trim_end().to_owned(),
            }));
        }

        let args = caps.get(2).map_or("", |m| m.as_str()).trim().to_owned();

        Some(match DirectiveKind::from_keyword(keyword) {
            Some(kind) => {
                log::trace!("line {}: #{} {}", line, kind.keyword(), args);
                Ok(ScannedLine::Directive {
                    line,
                    directive: Directive { kind, args },
                })
            }
            None => Err(PrepperError::UnknownDirective {
                line,
                directive: keyword.to_owned(),
            }),
        })
    }
}

/// Returns whether a block comment is still open at the end of `text`,
/// given whether one was open at its start.
fn scan_block_comment_state(text: &str, mut in_comment: bool) -> bool {
    let mut it = text.chars().peekable();

    while let Some(c) = it.next() {
        if in_comment {
            if c == '*' && it.peek() == Some(&'/') {
                let _ = it.next();
                in_comment = false;
            }
        } else if c == '/' {
            match it.peek() {
                Some('*') => {
                    let _ = it.next();
                    in_comment = true;
                }
                Some('/') => break,
                _ => {}
            }
        }
    }

    in_comment
}

/// Piece of a source line, see `split_comments`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Span<'a> {
    Code(&'a str),
    Comment(&'a str),
}

/// Splits `text` into code and comment spans, in order. `in_comment` tells whether a
/// block comment is open at the start of `text`.
pub fn split_comments(text: &str, mut in_comment: bool) -> Vec<Span<'_>> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if in_comment {
            if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                i += 2;
                spans.push(Span::Comment(&text[start..i]));
                start = i;
                in_comment = false;
                continue;
            }
        } else if bytes[i] == b'/' {
            match bytes.get(i + 1) {
                Some(b'*') => {
                    if i > start {
                        spans.push(Span::Code(&text[start..i]));
                    }
                    start = i;
                    i += 2;
                    in_comment = true;
                    continue;
                }
                Some(b'/') => {
                    if i > start {
                        spans.push(Span::Code(&text[start..i]));
                    }
                    spans.push(Span::Comment(&text[i..]));
                    return spans;
                }
                _ => {}
            }
        }
        i += 1;
    }

    if start < text.len() {
        let rest = &text[start..];
        spans.push(if in_comment {
            Span::Comment(rest)
        } else {
            Span::Code(rest)
        });
    }

    spans
}

fn skip_block_comment(it: &mut Peekable<Chars>) {
    while let Some(c) = it.next() {
        if c == '*' && it.peek() == Some(&'/') {
            let _ = it.next();
            break;
        }
    }
}

/// Replaces every `/* */` comment with one space, and cuts a `//` comment
/// (to the end of `text`) down to one space.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut it = text.chars().peekable();

    while let Some(c) = it.next() {
        if c != '/' {
            out.push(c);
            continue;
        }

        match it.peek() {
            Some('*') => {
                let _ = it.next();
                skip_block_comment(&mut it);
                out.push(' ');
            }
            Some('/') => {
                out.push(' ');
                break;
            }
            _ => out.push(c),
        }
    }

    out
}

/// True for a line holding nothing but a `//` comment, or one or more
/// complete `/* */` comments (optionally followed by a `//` comment).
pub fn is_comment_only_line(line: &str) -> bool {
    let mut rest = line.trim();

    if rest.is_empty() {
        return false;
    }

    loop {
        if rest.is_empty() || rest.starts_with("//") {
            return true;
        }

        match rest.strip_prefix("/*") {
            Some(body) => match body.find("*/") {
                Some(end) => rest = body[end + 2..].trim_start(),
                None => return false,
            },
            None => return false,
        }
    }
}
