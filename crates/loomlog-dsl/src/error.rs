//! Lexing and parsing errors.

/// Errors raised while scanning script text into tokens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    /// A number literal ended at the decimal point, e.g. `123.`.
    #[error("missing digit(s) after decimal")]
    NoDigitAfterDecimal,

    /// A stray `-` with no digits after it.
    #[error("invalid number")]
    InvalidNumber,

    /// A lexeme that is neither a keyword nor an identifier.
    #[error("unknown token: {0}")]
    UnknownToken(String),

    /// End of input inside a quoted string.
    #[error("unterminated string")]
    UnterminatedString,
}

/// Errors raised while parsing a token stream into AST nodes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// The lexer reported an error token.
    #[error(transparent)]
    Lex(#[from] LexError),

    /// Grammar violation at a known position.
    #[error("unexpected token: expected one of {expected} at line {line} position {pos}")]
    UnexpectedToken {
        /// Comma-separated list of what would have been accepted.
        expected: String,
        /// Line of the offending token.
        line: usize,
        /// Position of the offending token within its line.
        pos: usize,
    },

    /// An identifier was used before being defined as a source.
    #[error("undefined identifier '{id}' at line {line} position {pos}")]
    UndefinedIdentifier {
        /// The offending identifier.
        id: String,
        /// Line of the offending token.
        line: usize,
        /// Position of the offending token within its line.
        pos: usize,
    },

    /// An identifier was introduced twice.
    #[error("'{id}' is already defined at line {line} position {pos}")]
    AlreadyDefined {
        /// The offending identifier.
        id: String,
        /// Line of the offending token.
        line: usize,
        /// Position of the offending token within its line.
        pos: usize,
    },

    /// A consuming operation named an already consumed identifier.
    #[error("'{id}' is no longer consumable at line {line} position {pos}")]
    AlreadyConsumed {
        /// The offending identifier.
        id: String,
        /// Line of the offending token.
        line: usize,
        /// Position of the offending token within its line.
        pos: usize,
    },

    /// A numeric literal that does not fit its type.
    #[error("invalid {what} literal '{text}' at line {line} position {pos}")]
    InvalidLiteral {
        /// Literal kind, `int` or `number`.
        what: &'static str,
        /// The literal text.
        text: String,
        /// Line of the offending token.
        line: usize,
        /// Position of the offending token within its line.
        pos: usize,
    },

    /// The script file could not be read.
    #[error("failed to read script: {0}")]
    Script(String),
}
