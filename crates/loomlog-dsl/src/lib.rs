//! # loomlog DSL
//!
//! The front end for loomlog pipeline scripts: a streaming lexer over a
//! circular rune buffer, a push-back token stream, and a recursive-descent
//! parser producing typed AST nodes.
//!
//! ```text
//! script text ──► lexer task ──► token channel ──► TokenStream ──► parser ──► Vec<AstNode>
//! ```
//!
//! Identifier and consumption semantics are enforced at parse time, so an
//! accepted AST never names an undefined or doubly consumed stream.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

mod ast;
mod error;
mod lexbuf;
mod lexer;
mod token;

pub use ast::{
    parse_file, parse_string, AppendNode, Arg, ArgValue, AstKind, AstNode, ClassRef, CutNode,
    DupeNode, FanoutNode, JoinNode, MergeNode, NodeMeta, SinkNode, SourceNode, TagNode,
};
pub use error::{LexError, ParseError};
pub use token::{Token, TokenKind, TokenStream};

/// Spawns a lexer task over `script` and returns its token stream.
///
/// Must be called from within a tokio runtime; the lexer feeds the stream
/// from a background task.
#[must_use]
pub fn tokenize(script: &str) -> TokenStream {
    lexer::Lexer::spawn(script.to_string())
}
