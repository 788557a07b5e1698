use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

use crate::error::{AsmError, Diagnostic, SourcePos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Radix {
    Bin = 2,
    Dec = 10,
    Hex = 16,
}

#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),                          // identifier on its own
    Label(String),                          // identifier immediately followed by ':'
    Register(String),                       // '%' followed by an identifier
    Number { digits: String, radix: Radix }, // 42, $2A, %101010
    Str(String),                            // "..." with escapes already applied
    Directive(String),                      // '.' followed by an identifier
    PreDirective(String),                   // '@' followed by an identifier
    Param(String),                          // '&' followed by an identifier
    Origin(u16),                            // resolved `@org`, only produced by the preprocessor
    Comma,
    Hash,
    Plus,
    Minus,
    Star,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Newline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: SourcePos,
    /// Whitespace (or the start of a line) preceded this token.
    pub spaced: bool,
}

impl Token {
    pub fn is_newline(&self) -> bool {
        self.kind == TokenKind::Newline
    }

    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_newline() {
            f.write_str("end of line")
        } else {
            write!(f, "`{}`", self.text)
        }
    }
}

/// Parse literal digits into a value, rejecting anything wider than `max`.
pub fn parse_number(digits: &str, radix: Radix, max: u32) -> Option<u32> {
    u32::from_str_radix(digits, radix as u32).ok().filter(|v| *v <= max)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct LineLexer<'a> {
    file: &'a Arc<str>,
    line: u32,
    chars: Peekable<Chars<'a>>,
    col: u32, // column of the next char, 1-based
}

impl<'a> LineLexer<'a> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.col += 1;
        Some(c)
    }

    fn take_while(&mut self, buf: &mut String, pred: impl Fn(char) -> bool) {
        while let Some(&c) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            buf.push(c);
            self.bump();
        }
    }

    fn pos(&self, col: u32) -> SourcePos {
        SourcePos::new(self.file.clone(), self.line, col)
    }

    fn err(&self, col: u32, msg: impl Into<String>) -> Diagnostic {
        AsmError::Syntax(msg.into()).at(&self.pos(col))
    }

    fn named(
        &mut self,
        sigil: char,
        what: &str,
        start: u32,
    ) -> Result<(String, String), Diagnostic> {
        let mut name = String::new();
        match self.chars.peek() {
            Some(&c) if is_ident_start(c) => self.take_while(&mut name, is_ident_char),
            _ => return Err(self.err(start, format!("expected {what} name after `{sigil}`"))),
        }
        Ok((format!("{sigil}{name}"), name))
    }

    fn string(&mut self, start: u32) -> Result<(String, String), Diagnostic> {
        let mut raw = String::from('"');
        let mut value = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.err(start, "unterminated string literal"));
            };
            raw.push(c);
            match c {
                '"' => return Ok((raw, value)),
                '\\' => {
                    let Some(e) = self.bump() else {
                        return Err(self.err(start, "unterminated string literal"));
                    };
                    raw.push(e);
                    value.push(match e {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '0' => '\0',
                        '\\' => '\\',
                        '"' => '"',
                        other => {
                            let msg = format!("unknown escape `\\{other}`");
                            return Err(self.err(self.col - 2, msg));
                        }
                    });
                }
                c => value.push(c),
            }
        }
    }

    fn number(
        &mut self,
        radix: Radix,
        start: u32,
        prefix: &str,
    ) -> Result<(String, TokenKind), Diagnostic> {
        let mut digits = String::new();
        self.take_while(&mut digits, is_ident_char);
        let valid = !digits.is_empty()
            && digits.chars().all(|c| c.is_digit(radix as u32));
        if !valid {
            let what = match radix {
                Radix::Bin => "binary",
                Radix::Dec => "decimal",
                Radix::Hex => "hexadecimal",
            };
            return Err(self.err(start, format!("malformed {what} literal `{prefix}{digits}`")));
        }
        Ok((format!("{prefix}{digits}"), TokenKind::Number { digits, radix }))
    }

    fn next_token(&mut self, spaced: bool) -> Result<Token, Diagnostic> {
        let start = self.col;
        // Caller guarantees a char is available.
        let c = self.bump().unwrap_or(' ');
        let (text, kind) = match c {
            '.' => {
                let (text, name) = self.named('.', "directive", start)?;
                (text, TokenKind::Directive(name))
            }
            '@' => {
                let (text, name) = self.named('@', "preprocessor directive", start)?;
                (text, TokenKind::PreDirective(name))
            }
            '&' => {
                let (text, name) = self.named('&', "macro parameter", start)?;
                (text, TokenKind::Param(name))
            }
            '%' => match self.chars.peek() {
                Some(c) if c.is_ascii_digit() => self.number(Radix::Bin, start, "%")?,
                _ => {
                    let (text, name) = self.named('%', "register", start)?;
                    (text, TokenKind::Register(name))
                }
            },
            '$' => self.number(Radix::Hex, start, "$")?,
            '"' => {
                let (text, value) = self.string(start)?;
                (text, TokenKind::Str(value))
            }
            ',' => (c.to_string(), TokenKind::Comma),
            '#' => (c.to_string(), TokenKind::Hash),
            '+' => (c.to_string(), TokenKind::Plus),
            '-' => (c.to_string(), TokenKind::Minus),
            '*' => (c.to_string(), TokenKind::Star),
            '[' => (c.to_string(), TokenKind::LBracket),
            ']' => (c.to_string(), TokenKind::RBracket),
            '{' => (c.to_string(), TokenKind::LBrace),
            '}' => (c.to_string(), TokenKind::RBrace),
            c if c.is_ascii_digit() => {
                let mut digits = c.to_string();
                self.take_while(&mut digits, is_ident_char);
                if !digits.chars().all(|d| d.is_ascii_digit()) {
                    return Err(self.err(start, format!("malformed decimal literal `{digits}`")));
                }
                (digits.clone(), TokenKind::Number { digits, radix: Radix::Dec })
            }
            c if is_ident_start(c) => {
                let mut name = c.to_string();
                self.take_while(&mut name, is_ident_char);
                if self.chars.peek() == Some(&':') {
                    self.bump();
                    (format!("{name}:"), TokenKind::Label(name))
                } else {
                    (name.clone(), TokenKind::Ident(name))
                }
            }
            other => return Err(self.err(start, format!("unexpected character `{other}`"))),
        };
        Ok(Token { kind, text, pos: self.pos(start), spaced })
    }
}

/// Tokenize one source file. Every non-empty line ends with a `Newline`
/// token. All lexical errors of the file are returned together.
pub fn tokenize(file: &Arc<str>, src: &str) -> Result<Vec<Token>, Vec<Diagnostic>> {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (n, line) in src.lines().enumerate() {
        let mut lx = LineLexer { file, line: n as u32 + 1, chars: line.chars().peekable(), col: 1 };
        let mut spaced = true;
        let mut emitted = false;

        while let Some(&c) = lx.chars.peek() {
            if c.is_whitespace() {
                lx.bump();
                spaced = true;
                continue;
            }
            if c == ';' {
                break;
            }
            match lx.next_token(spaced) {
                Ok(tok) => {
                    tokens.push(tok);
                    emitted = true;
                }
                Err(e) => errors.push(e),
            }
            spaced = false;
        }

        if emitted {
            tokens.push(Token {
                kind: TokenKind::Newline,
                text: String::new(),
                pos: lx.pos(lx.col),
                spaced: true,
            });
        }
    }

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}
