//! C/C++ tokenizer
//!
//! Produces a lossless token stream: concatenating every token value gives
//! back the input text, except that preprocessor directives are normalized
//! (continuation lines joined, comments removed). Later stages work on the
//! significant subset returned by [`filter_significant`].

use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticKind, Diagnostics};

/// Token classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Identifier,
    Keyword,
    Number,
    String,
    Char,
    Punctuation,
    /// A whole directive line, starting with `#`
    Preprocessor,
    Comment,
    Whitespace,
    Newline,
}

/// A lexeme with its 1-based position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub value: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            line,
            column,
        }
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.value == punct
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.value == keyword
    }

    pub fn is_identifier(&self) -> bool {
        self.kind == TokenKind::Identifier
    }

    /// Everything except comments, whitespace and newlines
    pub fn is_significant(&self) -> bool {
        !matches!(
            self.kind,
            TokenKind::Comment | TokenKind::Whitespace | TokenKind::Newline
        )
    }

    /// Split a directive into its name and the remaining text,
    /// e.g. `#  define X 1` gives `("define", "X 1")`.
    pub fn directive(&self) -> Option<(&str, &str)> {
        if self.kind != TokenKind::Preprocessor {
            return None;
        }
        let body = self.value.trim_start().strip_prefix('#')?.trim_start();
        let end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(body.len());
        Some((&body[..end], body[end..].trim()))
    }
}

const KEYWORDS: &[&str] = &[
    // C
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool", "_Complex", "_Imaginary",
    "_Alignas", "_Alignof", "_Atomic", "_Noreturn", "_Static_assert", "_Thread_local",
    // C++
    "bool", "class", "namespace", "template", "typename", "public", "private", "protected",
    "virtual", "friend", "operator", "new", "delete", "this", "using", "try", "catch", "throw",
    "constexpr", "noexcept", "nullptr", "static_assert", "decltype", "explicit", "mutable",
];

/// Whether `word` is a reserved C/C++ keyword
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

const PUNCT3: &[&str] = &["...", "<<=", ">>=", "->*"];
const PUNCT2: &[&str] = &[
    "->", "==", "!=", "<=", ">=", "&&", "||", "<<", ">>", "++", "--", "+=", "-=", "*=", "/=",
    "%=", "&=", "|=", "^=", "::", "##",
];

/// Encoding prefixes that may precede a string or character literal
const LITERAL_PREFIXES: &[&str] = &["L", "u", "U", "u8"];

/// Single-pass tokenizer over one source text
pub struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
    diagnostics: Diagnostics,
}

impl Tokenizer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            at_line_start: true,
            tokens: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Tokenize the whole input. Never fails; problems are recovered and
    /// reported in the returned diagnostics.
    pub fn run(mut self) -> (Vec<Token>, Diagnostics) {
        while let Some(c) = self.peek(0) {
            let (line, column) = (self.line, self.column);

            if c == '\n' {
                self.bump();
                self.push(TokenKind::Newline, "\n", line, column);
                self.at_line_start = true;
                continue;
            }
            if c.is_whitespace() {
                let text = self.take_while(|c| c.is_whitespace() && c != '\n');
                self.push(TokenKind::Whitespace, text, line, column);
                continue;
            }
            if c == '/' && self.peek(1) == Some('/') {
                let text = self.take_while(|c| c != '\n');
                self.push(TokenKind::Comment, text, line, column);
                continue;
            }
            if c == '/' && self.peek(1) == Some('*') {
                let text = self.block_comment();
                self.push(TokenKind::Comment, text, line, column);
                continue;
            }
            if c == '#' && self.at_line_start {
                let text = self.directive();
                self.push(TokenKind::Preprocessor, text, line, column);
                self.at_line_start = false;
                continue;
            }

            self.at_line_start = false;

            if c == '"' || c == '\'' {
                self.literal(String::new(), line, column);
            } else if c.is_ascii_digit()
                || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit()))
            {
                let text = self.number();
                self.push(TokenKind::Number, text, line, column);
            } else if c.is_alphabetic() || c == '_' || c == '$' {
                let word = self.take_while(|c| c.is_alphanumeric() || c == '_' || c == '$');
                let quote_follows = matches!(self.peek(0), Some('"') | Some('\''));
                if quote_follows && LITERAL_PREFIXES.contains(&word.as_str()) {
                    self.literal(word, line, column);
                } else if is_keyword(&word) {
                    self.push(TokenKind::Keyword, word, line, column);
                } else {
                    self.push(TokenKind::Identifier, word, line, column);
                }
            } else {
                let text = self.punctuation();
                self.push(TokenKind::Punctuation, text, line, column);
            }
        }

        (self.tokens, self.diagnostics)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek(0)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if !pred(c) {
                break;
            }
            text.push(c);
            self.bump();
        }
        text
    }

    fn push(&mut self, kind: TokenKind, value: impl Into<String>, line: usize, column: usize) {
        self.tokens.push(Token::new(kind, value, line, column));
    }

    fn block_comment(&mut self) -> String {
        let start_line = self.line;
        let mut text = String::from("/*");
        self.bump();
        self.bump();
        loop {
            match self.peek(0) {
                None => {
                    self.diagnostics.report(
                        DiagnosticKind::TokenizeRecovery,
                        start_line,
                        "unterminated block comment",
                    );
                    return text;
                }
                Some('*') if self.peek(1) == Some('/') => {
                    self.bump();
                    self.bump();
                    text.push_str("*/");
                    return text;
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
            }
        }
    }

    /// Read a directive up to the first newline that is not escaped
    fn directive(&mut self) -> String {
        let mut text = String::new();
        loop {
            match self.peek(0) {
                None | Some('\n') => break,
                Some('\\') if self.peek(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                    text.push(' ');
                }
                Some('\\') if self.peek(1) == Some('\r') && self.peek(2) == Some('\n') => {
                    self.bump();
                    self.bump();
                    self.bump();
                    text.push(' ');
                }
                Some('/') if self.peek(1) == Some('/') => {
                    self.take_while(|c| c != '\n');
                    break;
                }
                Some('/') if self.peek(1) == Some('*') => {
                    self.block_comment();
                    text.push(' ');
                }
                Some(quote @ ('"' | '\'')) => {
                    text.push(quote);
                    self.bump();
                    while let Some(c) = self.peek(0) {
                        if c == '\n' {
                            break;
                        }
                        text.push(c);
                        self.bump();
                        if c == '\\' {
                            if let Some(escaped) = self.peek(0).filter(|&e| e != '\n') {
                                text.push(escaped);
                                self.bump();
                            }
                        } else if c == quote {
                            break;
                        }
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
            }
        }
        text.trim_end().to_string()
    }

    /// Read a string or character literal. An unterminated literal takes
    /// the rest of the input.
    fn literal(&mut self, prefix: String, line: usize, column: usize) {
        let Some(quote) = self.bump() else {
            return;
        };
        let mut text = prefix;
        text.push(quote);
        let mut terminated = false;
        while let Some(c) = self.bump() {
            text.push(c);
            if c == '\\' {
                if let Some(escaped) = self.bump() {
                    text.push(escaped);
                }
            } else if c == quote {
                terminated = true;
                break;
            }
        }
        if !terminated {
            let what = if quote == '"' { "string" } else { "character" };
            self.diagnostics.report(
                DiagnosticKind::TokenizeRecovery,
                line,
                format!("unterminated {} literal", what),
            );
        }
        let kind = if quote == '"' {
            TokenKind::String
        } else {
            TokenKind::Char
        };
        self.push(kind, text, line, column);
    }

    fn number(&mut self) -> String {
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                text.push(c);
                self.bump();
                let exponent = matches!(c, 'e' | 'E' | 'p' | 'P');
                let is_hex = text.starts_with("0x") || text.starts_with("0X");
                let signed_exponent = exponent && (!is_hex || matches!(c, 'p' | 'P'));
                if signed_exponent && matches!(self.peek(0), Some('+') | Some('-')) {
                    if let Some(sign) = self.bump() {
                        text.push(sign);
                    }
                }
            } else {
                break;
            }
        }
        text
    }

    fn punctuation(&mut self) -> String {
        for len in [3, 2] {
            let candidate: String = self.chars[self.pos..]
                .iter()
                .take(len)
                .collect();
            let table = if len == 3 { PUNCT3 } else { PUNCT2 };
            if candidate.chars().count() == len && table.contains(&candidate.as_str()) {
                for _ in 0..len {
                    self.bump();
                }
                return candidate;
            }
        }
        self.bump().map(String::from).unwrap_or_default()
    }
}

/// Tokenize `source`, discarding diagnostics
pub fn tokenize(source: &str) -> Vec<Token> {
    Tokenizer::new(source).run().0
}

/// Drop comments, whitespace and newlines
pub fn filter_significant(tokens: &[Token]) -> Vec<Token> {
    tokens.iter().filter(|t| t.is_significant()).cloned().collect()
}
