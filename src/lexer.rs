//! Lexer for the criteria expression language.

use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    /// Current position in the input (byte index).
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    /// Returns the character at the current position without advancing.
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// Returns the character after the current one without advancing.
    fn peek_next(&self) -> Option<char> {
        self.input[self.position..].chars().nth(1)
    }

    /// Advances one character and returns it.
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Reads an integer or decimal literal. The leading digit (or minus
    /// sign) has already been consumed by the caller.
    fn read_number(&mut self, start: usize) -> Token<'a> {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }
        // a dot makes this a decimal, but only when a digit follows,
        // otherwise the dot belongs to the next token
        let mut is_decimal = false;
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            is_decimal = true;
            self.bump(); // consume '.'
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        let value_str = &self.input[start..self.position];
        let kind = if is_decimal {
            TokenKind::Decimal(value_str.parse::<f64>().unwrap_or(0.0))
        } else {
            TokenKind::Integer(value_str.parse::<i64>().unwrap_or(0))
        };
        Token { kind, span: Span::new(start, self.position) }
    }

    /// Reads a single-quoted string literal. The opening quote has already
    /// been consumed. A doubled quote (`''`) escapes a literal quote and is
    /// left doubled in the token; the parser unescapes it.
    fn read_string(&mut self, start: usize) -> Token<'a> {
        let content_start = self.position;
        while let Some(c) = self.peek() {
            if c == '\'' {
                if self.peek_next() == Some('\'') {
                    self.bump();
                    self.bump();
                    continue;
                }
                break;
            }
            self.bump();
        }
        let content_end = self.position;
        self.bump(); // consume the closing quote

        let content = &self.input[content_start..content_end];
        Token {
            kind: TokenKind::Str(content),
            span: Span::new(start, self.position),
        }
    }

    /// Reads an identifier or keyword. Identifiers may contain letters,
    /// digits and underscores.
    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let literal = &self.input[start..self.position];
        let kind = match_keyword(literal);
        Token { kind, span: Span::new(start, self.position) }
    }
}

fn match_keyword(s: &str) -> TokenKind {
    match s.to_ascii_lowercase().as_str() {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "like" => TokenKind::Like,
        "not" => TokenKind::Not,
        "is" => TokenKind::Is,
        "null" => TokenKind::Null,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "today" => TokenKind::Today,
        "now" => TokenKind::Now,
        _ => TokenKind::Identifier(s),
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let start = self.position;

        let c = self.bump()?;

        let token = match c {
            '=' => Token { kind: TokenKind::Eq, span: Span::new(start, self.position) },
            '(' => Token { kind: TokenKind::LParen, span: Span::new(start, self.position) },
            ')' => Token { kind: TokenKind::RParen, span: Span::new(start, self.position) },
            '.' => Token { kind: TokenKind::Dot, span: Span::new(start, self.position) },
            '<' => match self.peek() {
                Some('=') => {
                    self.bump();
                    Token { kind: TokenKind::Lte, span: Span::new(start, self.position) }
                }
                Some('>') => {
                    self.bump();
                    Token { kind: TokenKind::NotEq, span: Span::new(start, self.position) }
                }
                _ => Token { kind: TokenKind::Lt, span: Span::new(start, self.position) },
            },
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token { kind: TokenKind::Gte, span: Span::new(start, self.position) }
                } else {
                    Token { kind: TokenKind::Gt, span: Span::new(start, self.position) }
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token { kind: TokenKind::NotEq, span: Span::new(start, self.position) }
                } else {
                    Token { kind: TokenKind::Illegal, span: Span::new(start, self.position) }
                }
            }
            '\'' => self.read_string(start),
            '-' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_number(start),
            c if c.is_ascii_digit() => self.read_number(start),
            c if c.is_alphabetic() || c == '_' => self.read_identifier(start),
            _ => Token { kind: TokenKind::Illegal, span: Span::new(start, self.position) },
        };
        Some(token)
    }
}
