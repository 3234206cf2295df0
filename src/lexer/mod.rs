use std::fmt;

use miette::Result;

use crate::error;
use crate::lexer::cursor::Cursor;
use crate::symbol::{self, Span, SrcOffset};

pub mod cursor;

/// A single lexical unit of assembly source.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Token {
    /// Text contained inside the token
    pub val: String,
    pub kind: TokenKind,
    /// Line number inside the file, 1-based
    pub line: u32,
    /// Location within source, for diagnostics
    pub span: Span,
    /// Code-segment offset at the point of declaration. Meaningful for
    /// `Label` tokens only; zero everywhere else.
    pub byte_index: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Opcode,
    Literal,
    Register,
    Address,
    Label,
    Comma,
    Str,
    Undefined,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenKind::Opcode => "opcode",
            TokenKind::Literal => "literal",
            TokenKind::Register => "register",
            TokenKind::Address => "address",
            TokenKind::Label => "label",
            TokenKind::Comma => "comma",
            TokenKind::Str => "string",
            TokenKind::Undefined => "undefined",
        })
    }
}

/// Scanning mode. The lexer is modal: comments, quoted strings and labels
/// suspend the normal character rules until their terminating boundary.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Comment,
    Str,
    Label,
}

/// Converts raw assembly text into a flat token sequence.
///
/// Tracks a running code-segment offset so that label declarations can be
/// tagged with the position of the instruction that follows them in a single
/// forward pass. The offset advances by the encoded size of each completed
/// token: 1 for a mnemonic or register, 4 for a literal, address or symbolic
/// reference, 0 for anything that never reaches the opcode stream (labels,
/// commas, `def` triples).
pub struct Lexer<'a> {
    src: &'a str,
    cur: Cursor<'a>,
    line: u32,
    byte_index: u32,
    /// The name token of a `def` is erased during resolution and must not
    /// advance the offset counter.
    def_name_pending: bool,
    toks: Vec<Token>,
    // Accumulation state for the pending token
    val: String,
    kind: TokenKind,
    start: usize,
    start_line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            cur: Cursor::new(src),
            line: 1,
            byte_index: 0,
            def_name_pending: false,
            toks: Vec::new(),
            val: String::new(),
            kind: TokenKind::Undefined,
            start: 0,
            start_line: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut mode = Mode::Normal;

        loop {
            let at = self.cur.pos();
            let Some(c) = self.cur.bump() else { break };

            // Carriage returns are discarded in every mode
            if c == '\r' {
                continue;
            }

            match mode {
                Mode::Comment => {
                    if c == '\n' {
                        self.line += 1;
                        mode = Mode::Normal;
                    }
                }
                Mode::Str => {
                    if c == '"' {
                        self.flush(at + 1);
                        mode = Mode::Normal;
                    } else {
                        if c == '\n' {
                            self.line += 1;
                        }
                        self.val.push(c);
                    }
                }
                Mode::Label => {
                    if c == ' ' || c == '\n' {
                        self.finish_label(at);
                        if c == '\n' {
                            self.line += 1;
                        }
                        mode = Mode::Normal;
                    } else if c != '\t' {
                        self.val.push(c);
                    }
                }
                Mode::Normal => match c {
                    ';' => {
                        self.flush(at);
                        mode = Mode::Comment;
                    }
                    '"' => {
                        self.begin(at);
                        self.kind = TokenKind::Str;
                        mode = Mode::Str;
                    }
                    ' ' | '\n' => {
                        self.flush(at);
                        if c == '\n' {
                            self.line += 1;
                        }
                    }
                    // Tabs are discarded without terminating the pending token
                    '\t' => {}
                    ',' => {
                        self.flush(at);
                        self.toks.push(Token {
                            val: ",".to_string(),
                            kind: TokenKind::Comma,
                            line: self.line,
                            span: Span::new(SrcOffset(at), 1),
                            byte_index: 0,
                        });
                    }
                    '&' => {
                        self.begin(at);
                        self.kind = TokenKind::Address;
                    }
                    ':' => {
                        self.begin(at);
                        self.kind = TokenKind::Label;
                        self.val.push(c);
                        mode = Mode::Label;
                    }
                    '-' => {
                        self.begin(at);
                        self.kind = TokenKind::Literal;
                        self.val.push(c);
                    }
                    c if c.is_ascii_alphabetic()
                        && matches!(self.kind, TokenKind::Undefined | TokenKind::Opcode) =>
                    {
                        self.begin(at);
                        self.kind = TokenKind::Opcode;
                        self.val.push(c);
                    }
                    c if c.is_ascii_digit() || self.kind == TokenKind::Literal => {
                        self.begin(at);
                        if self.kind != TokenKind::Address {
                            self.kind = TokenKind::Literal;
                        }
                        self.val.push(c);
                    }
                    _ => {
                        return Err(error::lex_unknown_char(
                            Span::new(SrcOffset(at), c.len_utf8()),
                            self.line,
                            c,
                            self.src,
                        ))
                    }
                },
            }
        }

        // End of input flushes the pending token like a whitespace boundary
        match mode {
            Mode::Label => self.finish_label(self.cur.pos()),
            _ => self.flush(self.cur.pos()),
        }

        Ok(self.toks)
    }

    /// Record the start of a new token if none is in progress.
    fn begin(&mut self, at: usize) {
        if self.val.is_empty() && self.kind == TokenKind::Undefined {
            self.start = at;
            self.start_line = self.line;
        }
    }

    /// Finalize the pending token, advancing the offset counter by the number
    /// of bytes the token will occupy in the emitted opcode stream.
    fn flush(&mut self, end: usize) {
        if self.val.is_empty() {
            self.kind = TokenKind::Undefined;
            return;
        }

        let mut kind = self.kind;
        if kind == TokenKind::Opcode && matches!(self.val.as_str(), "a" | "b" | "c" | "d") {
            kind = TokenKind::Register;
        }

        match kind {
            TokenKind::Register => self.byte_index += 1,
            TokenKind::Opcode => {
                if self.val == "def" {
                    self.def_name_pending = true;
                } else if self.def_name_pending {
                    self.def_name_pending = false;
                } else if symbol::is_reserved(&self.val) {
                    self.byte_index += 1;
                } else {
                    // Symbolic reference, emitted as a 4-byte operand once resolved
                    self.byte_index += 4;
                }
            }
            TokenKind::Literal | TokenKind::Address => self.byte_index += 4,
            _ => {}
        }

        self.push_token(kind, end, 0);
    }

    fn finish_label(&mut self, end: usize) {
        if self.val.is_empty() {
            self.kind = TokenKind::Undefined;
            return;
        }
        self.push_token(TokenKind::Label, end, self.byte_index);
    }

    fn push_token(&mut self, kind: TokenKind, end: usize, byte_index: u32) {
        self.toks.push(Token {
            val: std::mem::take(&mut self.val),
            kind,
            line: self.start_line,
            span: Span::new(SrcOffset(self.start), end - self.start),
            byte_index,
        });
        self.kind = TokenKind::Undefined;
    }
}
