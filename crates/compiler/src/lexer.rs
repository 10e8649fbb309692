//! Lexer for the C subset.
//!
//! Turns source text into a flat token sequence terminated by an
//! end-of-file token. Trivia (whitespace, `//` and `/* */` comments) is
//! skipped, string escapes are resolved up front, and a final pass
//! reclassifies identifiers that match the keyword set.

use crate::error::CompileError;

/// Keywords recognized by the language.
pub const KEYWORDS: &[&str] = &[
    "return", "if", "else", "for", "while", "int", "void", "char", "i64", "short", "sizeof",
    "struct", "union",
];

/// The subset of keywords that can start a declaration.
pub const TYPE_KEYWORDS: &[&str] = &["int", "void", "char", "i64", "short", "struct", "union"];

/// Two-character punctuators, matched before the single-character set.
const PUNCTUATORS2: &[&str] = &["==", "!=", "<=", ">=", "->"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Punctuator,
    Keyword,
    NumericLiteral,
    StringLiteral,
    EndOfFile,
}

/// A token with its originating source slice and position.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// The source text of the token (for string literals, including the
    /// surrounding quotes).
    pub text: String,
    /// Byte offset of the token in the source.
    pub offset: usize,
    /// Line number (0-indexed)
    pub line: usize,
    /// Column number (0-indexed)
    pub column: usize,
    /// Value of a numeric literal; zero otherwise.
    pub value: i64,
    /// Decoded bytes of a string literal, including the trailing NUL.
    pub str_bytes: Option<Vec<u8>>,
}

impl Token {
    fn new(kind: TokenKind, text: String, offset: usize, line: usize, column: usize) -> Self {
        Token {
            kind,
            text,
            offset,
            line,
            column,
            value: 0,
            str_bytes: None,
        }
    }

    /// True when the token's source slice equals `text` exactly.
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    /// True when the token is the given keyword.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == keyword
    }
}

/// True when the token is a keyword that can start a declaration.
pub fn is_type_keyword(token: &Token) -> bool {
    token.kind == TokenKind::Keyword && TYPE_KEYWORDS.contains(&token.text.as_str())
}

/// True for characters that may start an identifier: `[A-Za-z_]`.
pub fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

/// True for characters that may continue an identifier: `[A-Za-z0-9_]`.
pub fn is_ident_continue(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

/// Cursor state for a single tokenize call.
struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            src: source.as_bytes(),
            pos: 0,
            line: 0,
            column: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s.as_bytes())
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        // Positions are 1-indexed for user display.
        CompileError::lex(message, self.line + 1, self.column + 1)
    }

    /// Skip whitespace and both comment forms. An unterminated block
    /// comment is fatal.
    fn skip_trivia(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start_err = self.error("unterminated block comment");
                    self.bump();
                    self.bump();
                    loop {
                        if self.peek().is_none() {
                            return Err(start_err);
                        }
                        if self.starts_with("*/") {
                            self.bump();
                            self.bump();
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, CompileError> {
        let (offset, line, column) = (self.pos, self.line, self.column);
        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[offset..self.pos])
            .expect("decimal digits are valid UTF-8")
            .to_string();
        let value: i64 = text
            .parse()
            .map_err(|_| CompileError::lex("numeric literal out of range", line + 1, column + 1))?;
        let mut token = Token::new(TokenKind::NumericLiteral, text, offset, line, column);
        token.value = value;
        Ok(token)
    }

    fn read_identifier(&mut self) -> Token {
        let (offset, line, column) = (self.pos, self.line, self.column);
        while let Some(c) = self.peek() {
            if !is_ident_continue(c) {
                break;
            }
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[offset..self.pos])
            .expect("identifier characters are valid UTF-8")
            .to_string();
        Token::new(TokenKind::Identifier, text, offset, line, column)
    }

    /// Read a string literal. The returned token carries the decoded
    /// bytes with a NUL terminator appended.
    fn read_string(&mut self) -> Result<Token, CompileError> {
        let (offset, line, column) = (self.pos, self.line, self.column);
        self.bump(); // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return Err(CompileError::lex(
                        "unterminated string literal",
                        line + 1,
                        column + 1,
                    ));
                }
                Some(b'"') => {
                    self.bump();
                    break;
                }
                Some(b'\\') => {
                    self.bump();
                    bytes.push(self.read_escape()?);
                }
                Some(c) => {
                    self.bump();
                    bytes.push(c);
                }
            }
        }
        bytes.push(0);
        let text = std::str::from_utf8(&self.src[offset..self.pos])
            .unwrap_or_default()
            .to_string();
        let mut token = Token::new(TokenKind::StringLiteral, text, offset, line, column);
        token.str_bytes = Some(bytes);
        Ok(token)
    }

    /// Resolve one escape sequence, cursor positioned after the backslash.
    /// Unknown escapes yield the literal character.
    fn read_escape(&mut self) -> Result<u8, CompileError> {
        let c = self
            .bump()
            .ok_or_else(|| self.error("unterminated string literal"))?;
        let byte = match c {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0b,
            b'\\' => b'\\',
            b'"' => b'"',
            b'\'' => b'\'',
            b'x' => {
                let mut value: u32 = 0;
                let mut digits = 0;
                while let Some(h) = self.peek() {
                    let Some(d) = (h as char).to_digit(16) else {
                        break;
                    };
                    value = value.wrapping_mul(16).wrapping_add(d);
                    digits += 1;
                    self.bump();
                }
                if digits == 0 {
                    return Err(self.error("expected hex digits after '\\x'"));
                }
                value as u8
            }
            b'0'..=b'7' => {
                // Up to three octal digits, the first already consumed.
                let mut value = (c - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(h @ b'0'..=b'7') => {
                            value = value * 8 + (h - b'0') as u32;
                            self.bump();
                        }
                        _ => break,
                    }
                }
                value as u8
            }
            other => other,
        };
        Ok(byte)
    }

    fn read_punctuator(&mut self) -> Result<Token, CompileError> {
        let (offset, line, column) = (self.pos, self.line, self.column);
        for op in PUNCTUATORS2 {
            if self.starts_with(op) {
                self.bump();
                self.bump();
                return Ok(Token::new(
                    TokenKind::Punctuator,
                    op.to_string(),
                    offset,
                    line,
                    column,
                ));
            }
        }
        match self.peek() {
            Some(c) if c.is_ascii_punctuation() => {
                self.bump();
                Ok(Token::new(
                    TokenKind::Punctuator,
                    (c as char).to_string(),
                    offset,
                    line,
                    column,
                ))
            }
            Some(c) => Err(self.error(format!("invalid character '{}'", c as char))),
            None => Err(self.error("unexpected end of input")),
        }
    }
}

/// Tokenize a compilation unit. The result always ends with an
/// `EndOfFile` token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();

    loop {
        lexer.skip_trivia()?;
        let Some(c) = lexer.peek() else {
            break;
        };

        let token = if c.is_ascii_digit() {
            lexer.read_number()?
        } else if is_ident_start(c) {
            lexer.read_identifier()
        } else if c == b'"' {
            lexer.read_string()?
        } else {
            lexer.read_punctuator()?
        };
        tokens.push(token);
    }

    tokens.push(Token::new(
        TokenKind::EndOfFile,
        String::new(),
        lexer.pos,
        lexer.line,
        lexer.column,
    ));

    convert_keywords(&mut tokens);
    Ok(tokens)
}

/// Reclassify identifiers whose text matches the keyword set.
fn convert_keywords(tokens: &mut [Token]) {
    for token in tokens {
        if token.kind == TokenKind::Identifier && KEYWORDS.contains(&token.text.as_str()) {
            token.kind = TokenKind::Keyword;
        }
    }
}
