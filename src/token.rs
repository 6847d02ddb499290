//! Token definitions for the criteria expression language.

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Keywords
    And,   // "AND"
    Or,    // "OR"
    Like,  // "LIKE"
    Not,   // "NOT" (only as part of "NOT LIKE" / "IS NOT")
    Is,    // "IS"
    Null,  // "NULL"
    True,  // "TRUE"
    False, // "FALSE"
    Today, // "TODAY"
    Now,   // "NOW"

    // Literals
    Identifier(&'a str),
    Str(&'a str), // content between the quotes, '' escapes still doubled
    Integer(i64),
    Decimal(f64),

    // Punctuation
    LParen, // (
    RParen, // )
    Dot,    // .

    // Operators
    Eq,    // =
    NotEq, // <> or !=
    Gt,    // >
    Lt,    // <
    Gte,   // >=
    Lte,   // <=

    // Special
    Illegal, // An illegal/unknown character
    Eof,     // End of file
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
