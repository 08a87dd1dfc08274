//! Lexer for Kite source text.
//!
//! Produces every token of a unit, including comment trivia, terminated by a
//! single `Eof` token. Invalid input never aborts the scan: it yields an
//! `Error` token plus a diagnostic, and scanning resumes at the next
//! whitespace or delimiter.

use crate::diagnostic::{Category, Diagnostic};
use crate::span::{FileId, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Special
    Eof,
    Error,

    // Trivia, skipped by the parser
    LineComment,
    BlockComment,

    // Identifiers and literals
    Ident,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    CharLiteral,

    // Delimiters
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Semi,     // ;
    Colon,    // :
    ColonColon, // ::
    Dot,      // .
    DotDot,   // ..
    DotDotEq, // ..=
    Arrow,    // ->
    FatArrow, // =>
    Question, // ?

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Eq,
    Lt,
    Gt,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
    Shl,
    Shr,
    EqEq,
    BangEq,
    LtEq,
    GtEq,
    AmpAmp,
    PipePipe,

    // Keywords
    As,
    Assert,
    Break,
    Class,
    Comptime,
    Const,
    Continue,
    Defer,
    Else,
    Enum,
    Extern,
    False,
    For,
    Function,
    If,
    Impl,
    Import,
    In,
    Let,
    Loop,
    Match,
    Mut,
    None,
    Raw,
    Return,
    Some,
    Static,
    Struct,
    This,
    Trait,
    True,
    Unsafe,
    While,
}

impl TokenKind {
    pub fn is_trivia(self) -> bool {
        matches!(self, TokenKind::LineComment | TokenKind::BlockComment)
    }

    pub fn is_keyword(self) -> bool {
        keyword_text(self).is_some()
    }

    /// Human-readable description used in "expected ..., found ..." messages.
    pub fn describe(self) -> &'static str {
        if let Some(text) = keyword_text(self) {
            return text;
        }
        if let Some(text) = operator_text(self) {
            return text;
        }
        match self {
            TokenKind::Eof => "end of input",
            TokenKind::Error => "invalid token",
            TokenKind::LineComment | TokenKind::BlockComment => "comment",
            TokenKind::Ident => "identifier",
            TokenKind::IntLiteral => "integer literal",
            TokenKind::FloatLiteral => "float literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::CharLiteral => "character literal",
            _ => "token",
        }
    }
}

/// Width or sign suffix attached to a numeric literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberSuffix {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Usize,
    F32,
    F64,
}

impl NumberSuffix {
    fn from_text(text: &str) -> Option<NumberSuffix> {
        Some(match text {
            "i8" => NumberSuffix::I8,
            "i16" => NumberSuffix::I16,
            "i32" => NumberSuffix::I32,
            "i64" => NumberSuffix::I64,
            "u8" => NumberSuffix::U8,
            "u16" => NumberSuffix::U16,
            "u32" => NumberSuffix::U32,
            "u64" => NumberSuffix::U64,
            "usize" => NumberSuffix::Usize,
            "f32" => NumberSuffix::F32,
            "f64" => NumberSuffix::F64,
            _ => return None,
        })
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumberSuffix::F32 | NumberSuffix::F64)
    }
}

/// Decoded value of a literal token.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Int {
        value: u64,
        suffix: Option<NumberSuffix>,
    },
    Float {
        value: f64,
        suffix: Option<NumberSuffix>,
    },
    Str(String),
    Char(char),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub value: Option<LiteralValue>,
}

impl Token {
    /// The raw source text of this token.
    pub fn text<'src>(&self, source: &'src str) -> &'src str {
        &source[self.span.start as usize..self.span.end as usize]
    }
}

#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lex a source string into tokens.
pub fn lex(file_id: FileId, source: &str) -> LexResult {
    let mut lexer = Lexer {
        file_id,
        source,
        bytes: source.as_bytes(),
        index: 0,
        line: 1,
        line_start: 0,
        previous: None,
        diagnostics: Vec::new(),
    };
    lexer.run()
}

const OPERATORS: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShlEq),
    (">>=", TokenKind::ShrEq),
    ("..=", TokenKind::DotDotEq),
    ("::", TokenKind::ColonColon),
    ("->", TokenKind::Arrow),
    ("=>", TokenKind::FatArrow),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::BangEq),
    ("<=", TokenKind::LtEq),
    (">=", TokenKind::GtEq),
    ("&&", TokenKind::AmpAmp),
    ("||", TokenKind::PipePipe),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("+=", TokenKind::PlusEq),
    ("-=", TokenKind::MinusEq),
    ("*=", TokenKind::StarEq),
    ("/=", TokenKind::SlashEq),
    ("%=", TokenKind::PercentEq),
    ("&=", TokenKind::AmpEq),
    ("|=", TokenKind::PipeEq),
    ("^=", TokenKind::CaretEq),
    ("..", TokenKind::DotDot),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    (",", TokenKind::Comma),
    (";", TokenKind::Semi),
    (":", TokenKind::Colon),
    (".", TokenKind::Dot),
    ("?", TokenKind::Question),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("&", TokenKind::Amp),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("~", TokenKind::Tilde),
    ("!", TokenKind::Bang),
    ("=", TokenKind::Eq),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
];

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("as", TokenKind::As),
    ("assert", TokenKind::Assert),
    ("break", TokenKind::Break),
    ("class", TokenKind::Class),
    ("comptime", TokenKind::Comptime),
    ("const", TokenKind::Const),
    ("continue", TokenKind::Continue),
    ("defer", TokenKind::Defer),
    ("else", TokenKind::Else),
    ("enum", TokenKind::Enum),
    ("extern", TokenKind::Extern),
    ("false", TokenKind::False),
    ("for", TokenKind::For),
    ("function", TokenKind::Function),
    ("if", TokenKind::If),
    ("impl", TokenKind::Impl),
    ("import", TokenKind::Import),
    ("in", TokenKind::In),
    ("let", TokenKind::Let),
    ("loop", TokenKind::Loop),
    ("match", TokenKind::Match),
    ("mut", TokenKind::Mut),
    ("none", TokenKind::None),
    ("raw", TokenKind::Raw),
    ("return", TokenKind::Return),
    ("some", TokenKind::Some),
    ("static", TokenKind::Static),
    ("struct", TokenKind::Struct),
    ("this", TokenKind::This),
    ("trait", TokenKind::Trait),
    ("true", TokenKind::True),
    ("unsafe", TokenKind::Unsafe),
    ("while", TokenKind::While),
];

fn keyword_text(kind: TokenKind) -> Option<&'static str> {
    KEYWORDS
        .iter()
        .find(|(_, keyword)| *keyword == kind)
        .map(|(text, _)| *text)
}

pub fn operator_text(kind: TokenKind) -> Option<&'static str> {
    OPERATORS
        .iter()
        .find(|(_, operator)| *operator == kind)
        .map(|(text, _)| *text)
}

struct Lexer<'src> {
    file_id: FileId,
    source: &'src str,
    bytes: &'src [u8],
    index: usize,
    line: u32,
    line_start: usize,
    /// Kind of the last non-trivia token, used to lex `t.0.1` as tuple indices.
    previous: Option<TokenKind>,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    fn run(&mut self) -> LexResult {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            if is_whitespace(ch) {
                self.consume_char();
                continue;
            }

            let start = self.index;
            let start_line = self.line;
            let start_column = self.column_of(start);
            let (kind, value) = match ch {
                b'/' if self.peek_next() == Some(b'/') => self.lex_line_comment(),
                b'/' if self.peek_next() == Some(b'*') => self.lex_block_comment(start),
                b'"' => self.lex_string(start),
                b'\'' => self.lex_char(start),
                b'0'..=b'9' => self.lex_number(start),
                _ if is_ident_start(ch) => (self.lex_ident_or_keyword(start), None),
                _ => match self.lex_operator() {
                    Some(kind) => (kind, None),
                    None => self.unexpected_char(start),
                },
            };

            let span = Span::new(self.file_id, start as u32, self.index as u32)
                .with_position(start_line, start_column);
            if !kind.is_trivia() {
                self.previous = Some(kind);
            }
            tokens.push(Token { kind, span, value });
        }

        let end = self.source.len() as u32;
        let eof_span = Span::new(self.file_id, end, end)
            .with_position(self.line, self.column_of(self.index));
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: eof_span,
            value: None,
        });

        LexResult {
            tokens,
            diagnostics: std::mem::take(&mut self.diagnostics),
        }
    }

    fn column_of(&self, offset: usize) -> u32 {
        self.source[self.line_start..offset].chars().count() as u32 + 1
    }

    fn error(&mut self, start: usize, message: impl Into<String>, code: &'static str) {
        let span = Span::new(self.file_id, start as u32, self.index as u32)
            .with_position(self.line_of(start), self.column_of_any(start));
        self.diagnostics
            .push(Diagnostic::error(Category::Lexical, message, span).with_code(code));
    }

    fn line_of(&self, offset: usize) -> u32 {
        let newlines = self.bytes[offset..self.index].iter().filter(|b| **b == b'\n').count();
        self.line - newlines as u32
    }

    fn column_of_any(&self, offset: usize) -> u32 {
        let line_start = self.source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        self.source[line_start..offset].chars().count() as u32 + 1
    }

    /// Skip to the next whitespace or delimiter after an invalid token.
    fn resynchronize(&mut self) {
        while let Some(ch) = self.peek_char() {
            if is_whitespace(ch) || is_delimiter(ch) {
                break;
            }
            self.consume_utf8_char();
        }
    }

    fn unexpected_char(&mut self, start: usize) -> (TokenKind, Option<LiteralValue>) {
        let ch = self.source[start..].chars().next().unwrap_or('\u{fffd}');
        self.consume_utf8_char();
        self.resynchronize();
        self.error(start, format!("unexpected character `{}`", ch.escape_debug()), "E0001");
        (TokenKind::Error, None)
    }

    fn lex_operator(&mut self) -> Option<TokenKind> {
        let rest = &self.source[self.index..];
        let (text, kind) = OPERATORS.iter().find(|(text, _)| rest.starts_with(text))?;
        for _ in 0..text.len() {
            self.consume_char();
        }
        Some(*kind)
    }

    fn lex_line_comment(&mut self) -> (TokenKind, Option<LiteralValue>) {
        while let Some(ch) = self.peek_char() {
            if ch == b'\n' {
                break;
            }
            self.consume_char();
        }
        (TokenKind::LineComment, None)
    }

    fn lex_block_comment(&mut self, start: usize) -> (TokenKind, Option<LiteralValue>) {
        self.consume_char();
        self.consume_char();
        let mut depth = 1usize;
        while depth > 0 {
            match (self.peek_char(), self.peek_next()) {
                (Some(b'/'), Some(b'*')) => {
                    self.consume_char();
                    self.consume_char();
                    depth += 1;
                }
                (Some(b'*'), Some(b'/')) => {
                    self.consume_char();
                    self.consume_char();
                    depth -= 1;
                }
                (Some(_), _) => self.consume_char(),
                (None, _) => {
                    self.error(start, "unterminated block comment", "E0003");
                    return (TokenKind::Error, None);
                }
            }
        }
        (TokenKind::BlockComment, None)
    }

    fn lex_string(&mut self, start: usize) -> (TokenKind, Option<LiteralValue>) {
        self.consume_char();
        let mut value = String::new();
        let mut valid = true;
        loop {
            match self.peek_char() {
                Some(b'"') => {
                    self.consume_char();
                    break;
                }
                Some(b'\n') | None => {
                    self.error(start, "unterminated string literal", "E0002");
                    return (TokenKind::Error, None);
                }
                Some(b'\\') => match self.lex_escape() {
                    Ok(ch) => value.push(ch),
                    Err(escape_start) => {
                        valid = false;
                        self.error(escape_start, "invalid escape sequence in string literal", "E0004");
                    }
                },
                Some(_) => {
                    let ch = self.consume_utf8_char();
                    value.push(ch);
                }
            }
        }
        if valid {
            (TokenKind::StringLiteral, Some(LiteralValue::Str(value)))
        } else {
            (TokenKind::Error, None)
        }
    }

    fn lex_char(&mut self, start: usize) -> (TokenKind, Option<LiteralValue>) {
        self.consume_char();
        let mut chars = Vec::new();
        let mut valid = true;
        loop {
            match self.peek_char() {
                Some(b'\'') => {
                    self.consume_char();
                    break;
                }
                Some(b'\n') | None => {
                    self.error(start, "unterminated character literal", "E0002");
                    return (TokenKind::Error, None);
                }
                Some(b'\\') => match self.lex_escape() {
                    Ok(ch) => chars.push(ch),
                    Err(escape_start) => {
                        valid = false;
                        self.error(escape_start, "invalid escape sequence in character literal", "E0004");
                    }
                },
                Some(_) => chars.push(self.consume_utf8_char()),
            }
        }
        if !valid {
            return (TokenKind::Error, None);
        }
        match chars.as_slice() {
            [ch] => (TokenKind::CharLiteral, Some(LiteralValue::Char(*ch))),
            [] => {
                self.error(start, "empty character literal", "E0005");
                (TokenKind::Error, None)
            }
            _ => {
                self.error(start, "character literal may only contain one character", "E0005");
                (TokenKind::Error, None)
            }
        }
    }

    /// Decode one escape sequence; the cursor sits on the backslash.
    /// On failure returns the escape's start offset.
    fn lex_escape(&mut self) -> Result<char, usize> {
        let start = self.index;
        self.consume_char();
        let Some(ch) = self.peek_char() else {
            return Err(start);
        };
        let decoded = match ch {
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'0' => '\0',
            b'\\' => '\\',
            b'\'' => '\'',
            b'"' => '"',
            b'x' => {
                self.consume_char();
                let mut value = 0u32;
                for _ in 0..2 {
                    match self.peek_char().and_then(|b| (b as char).to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit;
                            self.consume_char();
                        }
                        None => return Err(start),
                    }
                }
                return if value <= 0x7f { Ok(value as u8 as char) } else { Err(start) };
            }
            b'u' => {
                self.consume_char();
                if self.peek_char() != Some(b'{') {
                    return Err(start);
                }
                self.consume_char();
                let mut value = 0u32;
                let mut digits = 0;
                while let Some(digit) = self.peek_char().and_then(|b| (b as char).to_digit(16)) {
                    value = value.saturating_mul(16).saturating_add(digit);
                    digits += 1;
                    self.consume_char();
                }
                if self.peek_char() != Some(b'}') || digits == 0 || digits > 6 {
                    return Err(start);
                }
                self.consume_char();
                return char::from_u32(value).ok_or(start);
            }
            _ => {
                self.consume_utf8_char();
                return Err(start);
            }
        };
        self.consume_char();
        Ok(decoded)
    }

    fn lex_number(&mut self, start: usize) -> (TokenKind, Option<LiteralValue>) {
        let radix = match (self.peek_char(), self.peek_next()) {
            (Some(b'0'), Some(b'x')) => 16,
            (Some(b'0'), Some(b'o')) => 8,
            (Some(b'0'), Some(b'b')) => 2,
            _ => 10,
        };
        if radix != 10 {
            self.consume_char();
            self.consume_char();
        }

        let digits_start = self.index;
        while let Some(ch) = self.peek_char() {
            let is_digit = (ch as char).is_digit(radix) || ch == b'_';
            if !is_digit {
                break;
            }
            self.consume_char();
        }
        let mut digits_end = self.index;

        // `t.0.1` is two tuple indices, not a float.
        let after_dot = self.previous == Some(TokenKind::Dot);
        let mut is_float = false;
        if radix == 10 && !after_dot {
            if self.peek_char() == Some(b'.') && self.peek_next().is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                self.consume_char();
                while self.peek_char().is_some_and(|b| b.is_ascii_digit() || b == b'_') {
                    self.consume_char();
                }
            }
            if matches!(self.peek_char(), Some(b'e' | b'E')) {
                let sign = matches!(self.peek_next(), Some(b'+' | b'-'));
                let first_digit = self.bytes.get(self.index + 1 + sign as usize).copied();
                if first_digit.is_some_and(|b| b.is_ascii_digit()) {
                    is_float = true;
                    self.consume_char();
                    if sign {
                        self.consume_char();
                    }
                    while self.peek_char().is_some_and(|b| b.is_ascii_digit() || b == b'_') {
                        self.consume_char();
                    }
                }
            }
            digits_end = self.index;
        }

        let suffix_start = self.index;
        while self.peek_char().is_some_and(is_ident_continue) {
            self.consume_char();
        }
        let suffix_text = &self.source[suffix_start..self.index];
        let suffix = if suffix_text.is_empty() {
            None
        } else {
            match NumberSuffix::from_text(suffix_text) {
                Some(suffix) => Some(suffix),
                None => {
                    self.resynchronize();
                    self.error(start, format!("invalid suffix `{suffix_text}` for number literal"), "E0006");
                    return (TokenKind::Error, None);
                }
            }
        };

        let text: String = self.source[digits_start..digits_end]
            .chars()
            .filter(|ch| *ch != '_')
            .collect();
        if text.is_empty() {
            self.error(start, "missing digits after the integer base prefix", "E0006");
            return (TokenKind::Error, None);
        }

        if is_float || suffix.is_some_and(NumberSuffix::is_float) {
            if radix != 10 {
                self.error(start, "float literals must be written in decimal", "E0006");
                return (TokenKind::Error, None);
            }
            if is_float && suffix.is_some_and(|suffix| !suffix.is_float()) {
                self.error(start, "integer suffix on a float literal", "E0006");
                return (TokenKind::Error, None);
            }
            return match text.parse::<f64>() {
                Ok(value) => (TokenKind::FloatLiteral, Some(LiteralValue::Float { value, suffix })),
                Err(_) => {
                    self.error(start, "malformed float literal", "E0006");
                    (TokenKind::Error, None)
                }
            };
        }

        match u64::from_str_radix(&text, radix) {
            Ok(value) => (TokenKind::IntLiteral, Some(LiteralValue::Int { value, suffix })),
            Err(_) => {
                self.error(start, "integer literal is too large", "E0007");
                (TokenKind::Error, None)
            }
        }
    }

    fn lex_ident_or_keyword(&mut self, start: usize) -> TokenKind {
        while self.peek_char().is_some_and(is_ident_continue) {
            self.consume_char();
        }
        let text = &self.source[start..self.index];
        KEYWORDS
            .iter()
            .find(|(keyword, _)| *keyword == text)
            .map(|(_, kind)| *kind)
            .unwrap_or(TokenKind::Ident)
    }

    fn peek_char(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if let Some(&byte) = self.bytes.get(self.index) {
            self.index += 1;
            if byte == b'\n' {
                self.line += 1;
                self.line_start = self.index;
            }
        }
    }

    fn consume_utf8_char(&mut self) -> char {
        let ch = self.source[self.index..].chars().next().unwrap_or('\0');
        if ch == '\n' {
            self.consume_char();
        } else {
            self.index += ch.len_utf8().max(1);
        }
        ch
    }
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_delimiter(ch: u8) -> bool {
    matches!(ch, b'(' | b')' | b'{' | b'}' | b'[' | b']' | b',' | b';')
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(FileId(0), source)
            .tokens
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn distinguishes_keywords_and_identifiers() {
        assert_eq!(
            kinds("function functions let mut x"),
            [
                TokenKind::Function,
                TokenKind::Ident,
                TokenKind::Let,
                TokenKind::Mut,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn applies_maximal_munch() {
        assert_eq!(
            kinds("a <<= b >> c ..= d .. e :: f"),
            [
                TokenKind::Ident,
                TokenKind::ShlEq,
                TokenKind::Ident,
                TokenKind::Shr,
                TokenKind::Ident,
                TokenKind::DotDotEq,
                TokenKind::Ident,
                TokenKind::DotDot,
                TokenKind::Ident,
                TokenKind::ColonColon,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn decodes_numbers_with_radix_and_suffix() {
        let result = lex(FileId(0), "0xff_u8 0b1010 1_000i64 2.5e3 7f32 0o17");
        let values: Vec<_> = result.tokens.iter().filter_map(|t| t.value.clone()).collect();
        assert_eq!(
            values,
            [
                LiteralValue::Int { value: 255, suffix: Some(NumberSuffix::U8) },
                LiteralValue::Int { value: 10, suffix: None },
                LiteralValue::Int { value: 1000, suffix: Some(NumberSuffix::I64) },
                LiteralValue::Float { value: 2500.0, suffix: None },
                LiteralValue::Float { value: 7.0, suffix: Some(NumberSuffix::F32) },
                LiteralValue::Int { value: 15, suffix: None },
            ]
        );
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn range_after_integer_is_not_a_float() {
        assert_eq!(
            kinds("0..10"),
            [TokenKind::IntLiteral, TokenKind::DotDot, TokenKind::IntLiteral, TokenKind::Eof]
        );
    }

    #[test]
    fn nested_tuple_index_is_not_a_float() {
        assert_eq!(
            kinds("t.0.1"),
            [
                TokenKind::Ident,
                TokenKind::Dot,
                TokenKind::IntLiteral,
                TokenKind::Dot,
                TokenKind::IntLiteral,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn decodes_escapes() {
        let result = lex(FileId(0), r#""a\n\t\"\x41\u{1F600}" '\''"#);
        assert_eq!(
            result.tokens[0].value,
            Some(LiteralValue::Str("a\n\t\"A\u{1F600}".to_string()))
        );
        assert_eq!(result.tokens[1].value, Some(LiteralValue::Char('\'')));
    }

    #[test]
    fn invalid_escape_is_a_lexical_error() {
        let result = lex(FileId(0), r#"let s = "bad\q"; let t = 1;"#);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, Category::Lexical);
        assert!(result.tokens.iter().any(|t| t.kind == TokenKind::Error));
        // scanning continued after the literal
        assert!(result.tokens.iter().filter(|t| t.kind == TokenKind::Let).count() == 2);
    }

    #[test]
    fn unterminated_string_resynchronizes_on_next_line() {
        let result = lex(FileId(0), "let s = \"open\nlet x = 1;");
        assert_eq!(result.diagnostics.len(), 1);
        assert!(result.diagnostics[0].message.contains("unterminated string"));
        let lets = result.tokens.iter().filter(|t| t.kind == TokenKind::Let).count();
        assert_eq!(lets, 2);
    }

    #[test]
    fn illegal_character_becomes_error_token() {
        let result = lex(FileId(0), "a @@b c");
        assert_eq!(
            result.tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            [TokenKind::Ident, TokenKind::Error, TokenKind::Ident, TokenKind::Eof]
        );
        assert_eq!(result.diagnostics[0].code, Some("E0001"));
    }

    #[test]
    fn nested_block_comments_are_one_token() {
        let result = lex(FileId(0), "/* outer /* inner */ still */ x // tail");
        let kinds: Vec<_> = result.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            [TokenKind::BlockComment, TokenKind::Ident, TokenKind::LineComment, TokenKind::Eof]
        );
    }

    #[test]
    fn tracks_lines_and_columns() {
        let result = lex(FileId(0), "a\n  bc");
        let bc = &result.tokens[1];
        assert_eq!((bc.span.line, bc.span.column), (2, 3));
    }

    #[test]
    fn oversized_integer_is_rejected() {
        let result = lex(FileId(0), "18446744073709551616");
        assert_eq!(result.tokens[0].kind, TokenKind::Error);
        assert_eq!(result.diagnostics[0].code, Some("E0007"));
    }
}
