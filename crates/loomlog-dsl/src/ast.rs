//! AST nodes and the recursive-descent parser.
//!
//! The parser drives the token stream and enforces identifier semantics as
//! it goes: a source identifier must be defined before use, a consuming
//! operation may not name an already consumed identifier, and a new
//! identifier may not collide with an existing one. Async sink names live
//! in their own namespace used only to disambiguate async declarations.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{LexError, ParseError};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind, TokenStream};

/// AST node discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstKind {
    /// Statement terminator.
    Eol,
    /// Literal or identifier argument.
    Arg,
    /// `qualifier.class` source reference.
    SourceClass,
    /// `source` statement.
    Source,
    /// `qualifier.class` sink reference.
    SinkClass,
    /// Synchronous `sink` statement.
    Sink,
    /// `sink … async as …` statement.
    AsyncSink,
    /// `merge` statement.
    Merge,
    /// `dupe` statement.
    Dupe,
    /// `append` statement.
    Append,
    /// `cut` statement.
    Cut,
    /// `fanout` statement.
    Fanout,
    /// `tag` statement.
    Tag,
    /// `join` statement.
    Join,
}

/// Position and reconstructed text shared by every node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    /// One-based line of the node's first token.
    pub line: usize,
    /// Position of the node's first token within its line.
    pub pos: usize,
    /// Text reconstructed from the node's tokens.
    pub text: String,
}

impl NodeMeta {
    fn from_token(token: &Token) -> Self {
        Self {
            line: token.line,
            pos: token.pos,
            text: token.text.clone(),
        }
    }

    fn push(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn push_spaced(&mut self, text: &str) {
        self.text.push(' ');
        self.text.push_str(text);
    }
}

/// A literal or identifier argument to a source or sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    /// Position and raw text.
    pub meta: NodeMeta,
    /// The parsed value.
    pub value: ArgValue,
}

/// The value carried by an [`Arg`]; exactly one of the four forms.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Unescaped string literal.
    String(String),
    /// 64-bit float literal.
    Number(f64),
    /// 64-bit integer literal.
    Int(i64),
    /// A previously defined source or sink identifier.
    Identifier(String),
}

impl Arg {
    /// The string payload, if this argument is a string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this argument is an integer literal.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match &self.value {
            ArgValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float payload, if this argument is a number literal.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match &self.value {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The identifier payload, if this argument names a stream.
    #[must_use]
    pub fn as_identifier(&self) -> Option<&str> {
        match &self.value {
            ArgValue::Identifier(id) => Some(id),
            _ => None,
        }
    }
}

/// A `qualifier.class` reference to a plugin-provided source or sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassRef {
    /// Position and raw text.
    pub meta: NodeMeta,
    /// Plugin qualifier, e.g. `file`.
    pub qualifier: String,
    /// Class within the plugin, e.g. `File`.
    pub class: String,
}

impl ClassRef {
    /// Renders the reference as `qualifier.class`.
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.qualifier, self.class)
    }
}

/// `source as ID qual.class arg[, arg]*`
#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    /// Position and reconstructed text.
    pub meta: NodeMeta,
    /// The new stream identifier.
    pub id: String,
    /// Which source class builds the stream.
    pub class: ClassRef,
    /// Factory arguments.
    pub args: Vec<Arg>,
}

/// `sink ID [async as ID] to qual.class arg[, arg]*`
#[derive(Debug, Clone, PartialEq)]
pub struct SinkNode {
    /// Position and reconstructed text.
    pub meta: NodeMeta,
    /// The stream to consume.
    pub source: String,
    /// The async sink name, when declared asynchronous.
    pub sink_id: Option<String>,
    /// Which sink class consumes the stream.
    pub class: ClassRef,
    /// Factory arguments.
    pub args: Vec<Arg>,
}

impl SinkNode {
    /// Returns true for the `async as` form.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.sink_id.is_some()
    }
}

/// `merge ID and ID as ID`
#[derive(Debug, Clone, PartialEq)]
pub struct MergeNode {
    /// Position and reconstructed text.
    pub meta: NodeMeta,
    /// First input stream; consumed.
    pub source_a: String,
    /// Second input stream; consumed.
    pub source_b: String,
    /// The new merged identifier.
    pub id: String,
}

/// `dupe ID as ID and ID`
#[derive(Debug, Clone, PartialEq)]
pub struct DupeNode {
    /// Position and reconstructed text.
    pub meta: NodeMeta,
    /// Input stream; consumed.
    pub source: String,
    /// First duplicate.
    pub target_a: String,
    /// Second duplicate.
    pub target_b: String,
}

/// `append ID to ID`
#[derive(Debug, Clone, PartialEq)]
pub struct AppendNode {
    /// Position and reconstructed text.
    pub meta: NodeMeta,
    /// Stream appended after the target; consumed.
    pub source: String,
    /// Stream extended in place; stays usable.
    pub target: String,
}

/// `cut [with STRING] ID set(NAME=INT[, NAME=INT]*)`
#[derive(Debug, Clone, PartialEq)]
pub struct CutNode {
    /// Position and reconstructed text.
    pub meta: NodeMeta,
    /// Split delimiter; one space unless `with` overrides it.
    pub delimiter: String,
    /// The stream to rewrite in place; not consumed.
    pub source: String,
    /// `(output field, piece index)` pairs in script order.
    pub field_sets: Vec<(String, i64)>,
}

/// `fanout ID as ID and ID`
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutNode {
    /// Position and reconstructed text.
    pub meta: NodeMeta,
    /// Input stream; consumed.
    pub source: String,
    /// First partition.
    pub target_a: String,
    /// Second partition.
    pub target_b: String,
}

/// `tag ID with STRING`
#[derive(Debug, Clone, PartialEq)]
pub struct TagNode {
    /// Position and reconstructed text.
    pub meta: NodeMeta,
    /// The stream to rewrite in place; not consumed.
    pub source: String,
    /// The tag to append to every entry.
    pub tag: String,
}

/// `join ID with STRING[, STRING]*`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    /// Position and reconstructed text.
    pub meta: NodeMeta,
    /// The stream to rewrite in place; not consumed.
    pub source: String,
    /// Start-line regex patterns.
    pub patterns: Vec<String>,
}

/// One parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    /// Statement terminator.
    Eol(NodeMeta),
    /// `source` statement.
    Source(SourceNode),
    /// `sink` statement, sync or async.
    Sink(SinkNode),
    /// `merge` statement.
    Merge(MergeNode),
    /// `dupe` statement.
    Dupe(DupeNode),
    /// `append` statement.
    Append(AppendNode),
    /// `cut` statement.
    Cut(CutNode),
    /// `fanout` statement.
    Fanout(FanoutNode),
    /// `tag` statement.
    Tag(TagNode),
    /// `join` statement.
    Join(JoinNode),
}

impl AstNode {
    /// Shared position and text.
    #[must_use]
    pub fn meta(&self) -> &NodeMeta {
        match self {
            Self::Eol(meta) => meta,
            Self::Source(node) => &node.meta,
            Self::Sink(node) => &node.meta,
            Self::Merge(node) => &node.meta,
            Self::Dupe(node) => &node.meta,
            Self::Append(node) => &node.meta,
            Self::Cut(node) => &node.meta,
            Self::Fanout(node) => &node.meta,
            Self::Tag(node) => &node.meta,
            Self::Join(node) => &node.meta,
        }
    }

    /// The node discriminant.
    #[must_use]
    pub fn kind(&self) -> AstKind {
        match self {
            Self::Eol(_) => AstKind::Eol,
            Self::Source(_) => AstKind::Source,
            Self::Sink(node) if node.is_async() => AstKind::AsyncSink,
            Self::Sink(_) => AstKind::Sink,
            Self::Merge(_) => AstKind::Merge,
            Self::Dupe(_) => AstKind::Dupe,
            Self::Append(_) => AstKind::Append,
            Self::Cut(_) => AstKind::Cut,
            Self::Fanout(_) => AstKind::Fanout,
            Self::Tag(_) => AstKind::Tag,
            Self::Join(_) => AstKind::Join,
        }
    }
}

/// Parses a script held in memory.
///
/// # Errors
///
/// Returns the first lex, grammar, or identifier-semantics error.
pub async fn parse_string(script: &str) -> Result<Vec<AstNode>, ParseError> {
    let stream = Lexer::spawn(script.to_string());
    Parser::new(stream).parse().await
}

/// Reads a script file and parses it.
///
/// # Errors
///
/// Returns [`ParseError::Script`] when the file cannot be read, otherwise
/// any error [`parse_string`] would return.
pub async fn parse_file(path: impl AsRef<Path>) -> Result<Vec<AstNode>, ParseError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| ParseError::Script(err.to_string()))?;
    parse_string(&text).await
}

fn unexpected(token: &Token, expected: &[&str]) -> ParseError {
    ParseError::UnexpectedToken {
        expected: expected.join(", "),
        line: token.line,
        pos: token.pos,
    }
}

fn undefined(token: &Token) -> ParseError {
    ParseError::UndefinedIdentifier {
        id: token.text.clone(),
        line: token.line,
        pos: token.pos,
    }
}

fn already_defined(token: &Token) -> ParseError {
    ParseError::AlreadyDefined {
        id: token.text.clone(),
        line: token.line,
        pos: token.pos,
    }
}

fn already_consumed(token: &Token) -> ParseError {
    ParseError::AlreadyConsumed {
        id: token.text.clone(),
        line: token.line,
        pos: token.pos,
    }
}

/// Strips the outer quotes and applies the escape table:
/// `\r \n \t \" \\`. Unknown escapes keep both characters.
fn unescape_string(text: &str) -> String {
    let inner = text.strip_prefix('"').unwrap_or(text);
    let inner = inner.strip_suffix('"').unwrap_or(inner);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

struct Parser {
    stream: TokenStream,
    sources: HashSet<String>,
    consumed: HashSet<String>,
    sinks: HashSet<String>,
}

impl Parser {
    fn new(stream: TokenStream) -> Self {
        Self {
            stream,
            sources: HashSet::new(),
            consumed: HashSet::new(),
            sinks: HashSet::new(),
        }
    }

    async fn parse(mut self) -> Result<Vec<AstNode>, ParseError> {
        let result = self.parse_nodes().await;
        if result.is_err() {
            // Unblock the lexer task before surfacing the error.
            self.stream.drain();
        }
        result
    }

    async fn parse_nodes(&mut self) -> Result<Vec<AstNode>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            let token = self.stream.peek().await;
            match token.kind {
                TokenKind::Eof => return Ok(nodes),
                TokenKind::Err => {
                    let error = token
                        .error
                        .clone()
                        .unwrap_or(LexError::UnknownToken(token.text.clone()));
                    return Err(ParseError::Lex(error));
                }
                TokenKind::Eol => {
                    let token = self.stream.next().await;
                    nodes.push(AstNode::Eol(NodeMeta::from_token(&token)));
                }
                TokenKind::Source => nodes.push(AstNode::Source(self.parse_source().await?)),
                TokenKind::Sink => nodes.push(AstNode::Sink(self.parse_sink().await?)),
                TokenKind::Merge => nodes.push(AstNode::Merge(self.parse_merge().await?)),
                TokenKind::Dupe => nodes.push(AstNode::Dupe(self.parse_dupe().await?)),
                TokenKind::Append => nodes.push(AstNode::Append(self.parse_append().await?)),
                TokenKind::Cut => nodes.push(AstNode::Cut(self.parse_cut().await?)),
                TokenKind::Fanout => nodes.push(AstNode::Fanout(self.parse_fanout().await?)),
                TokenKind::Tag => nodes.push(AstNode::Tag(self.parse_tag().await?)),
                TokenKind::Join => nodes.push(AstNode::Join(self.parse_join().await?)),
                _ => {
                    return Err(unexpected(
                        &token,
                        &[
                            "EOL", "EOF", "source", "sink", "merge", "dupe", "append", "cut",
                            "fanout", "tag", "join",
                        ],
                    ))
                }
            }
        }
    }

    /// Pulls the next token, converting a lexer error token into its
    /// typed error.
    async fn advance(&mut self) -> Result<Token, ParseError> {
        let token = self.stream.next().await;
        if token.kind == TokenKind::Err {
            let error = token
                .error
                .clone()
                .unwrap_or(LexError::UnknownToken(token.text));
            return Err(ParseError::Lex(error));
        }
        Ok(token)
    }

    async fn expect(&mut self, kind: TokenKind, expected: &[&str]) -> Result<Token, ParseError> {
        let token = self.advance().await?;
        if token.kind == kind {
            Ok(token)
        } else {
            Err(unexpected(&token, expected))
        }
    }

    async fn expect_ident(&mut self, expected: &str) -> Result<Token, ParseError> {
        self.expect(TokenKind::Ident, &[expected]).await
    }

    /// The identifier must name an existing, unconsumed source.
    fn require_live(&self, token: &Token) -> Result<(), ParseError> {
        if !self.sources.contains(&token.text) {
            return Err(undefined(token));
        }
        if self.consumed.contains(&token.text) {
            return Err(already_consumed(token));
        }
        Ok(())
    }

    /// The identifier must not collide with an existing source.
    fn require_fresh(&self, token: &Token) -> Result<(), ParseError> {
        if self.sources.contains(&token.text) {
            return Err(already_defined(token));
        }
        Ok(())
    }

    async fn require_eol(&mut self) -> Result<(), ParseError> {
        let token = self.advance().await?;
        if matches!(token.kind, TokenKind::Eol | TokenKind::Eof) {
            return Ok(());
        }
        let err = unexpected(&token, &["end of file", "end of line"]);
        self.stream.push_back(token);
        Err(err)
    }

    async fn parse_class(&mut self, what: &str) -> Result<ClassRef, ParseError> {
        let qualifier = self
            .expect(TokenKind::Ident, &[&format!("{what} class qualifier")])
            .await?;
        let mut meta = NodeMeta::from_token(&qualifier);

        let dot = self.expect(TokenKind::Dot, &["dot separator"]).await?;
        meta.push(&dot.text);

        let class = self
            .expect(TokenKind::Ident, &[&format!("{what} class identifier")])
            .await?;
        meta.push(&class.text);

        Ok(ClassRef {
            meta,
            qualifier: qualifier.text,
            class: class.text,
        })
    }

    async fn parse_arg(&mut self) -> Result<Option<Arg>, ParseError> {
        let token = self.advance().await?;
        let value = match token.kind {
            TokenKind::Str => ArgValue::String(unescape_string(&token.text)),
            TokenKind::Number => {
                let number = token.text.parse().map_err(|_| ParseError::InvalidLiteral {
                    what: "number",
                    text: token.text.clone(),
                    line: token.line,
                    pos: token.pos,
                })?;
                ArgValue::Number(number)
            }
            TokenKind::Int => {
                let int = token.text.parse().map_err(|_| ParseError::InvalidLiteral {
                    what: "int",
                    text: token.text.clone(),
                    line: token.line,
                    pos: token.pos,
                })?;
                ArgValue::Int(int)
            }
            TokenKind::Ident => {
                if !self.sources.contains(&token.text) && !self.sinks.contains(&token.text) {
                    return Err(undefined(&token));
                }
                ArgValue::Identifier(token.text.clone())
            }
            _ => {
                self.stream.push_back(token);
                return Ok(None);
            }
        };
        Ok(Some(Arg {
            meta: NodeMeta::from_token(&token),
            value,
        }))
    }

    /// Parses a possibly empty comma-separated argument list. A trailing
    /// comma is rejected.
    async fn parse_args(&mut self, meta: &mut NodeMeta) -> Result<Vec<Arg>, ParseError> {
        let mut args = Vec::new();
        loop {
            if !args.is_empty() {
                let token = self.advance().await?;
                if token.kind != TokenKind::Comma {
                    self.stream.push_back(token);
                    break;
                }
            }
            match self.parse_arg().await? {
                Some(arg) => args.push(arg),
                None if args.is_empty() => break,
                None => {
                    let next = self.stream.peek().await;
                    return Err(unexpected(&next, &["argument"]));
                }
            }
        }
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                meta.push(",");
            }
            meta.push_spaced(&arg.meta.text);
        }
        Ok(args)
    }

    async fn parse_source(&mut self) -> Result<SourceNode, ParseError> {
        let keyword = self.expect(TokenKind::Source, &["source"]).await?;
        let mut meta = NodeMeta::from_token(&keyword);

        let as_kw = self.expect(TokenKind::As, &["as"]).await?;
        meta.push_spaced(&as_kw.text);

        let id = self.expect_ident("source identifier").await?;
        self.require_fresh(&id)?;
        self.sources.insert(id.text.clone());
        meta.push_spaced(&id.text);

        let class = self.parse_class("source").await?;
        meta.push_spaced(&class.meta.text);

        let args = self.parse_args(&mut meta).await?;
        self.require_eol().await?;

        Ok(SourceNode {
            meta,
            id: id.text,
            class,
            args,
        })
    }

    async fn parse_sink(&mut self) -> Result<SinkNode, ParseError> {
        let keyword = self.expect(TokenKind::Sink, &["sink"]).await?;
        let mut meta = NodeMeta::from_token(&keyword);

        let subject = self.expect_ident("stream identifier").await?;
        self.require_live(&subject)?;
        self.consumed.insert(subject.text.clone());
        meta.push_spaced(&subject.text);

        let next = self.advance().await?;
        let mut sink_id = None;
        match next.kind {
            TokenKind::Async => {
                meta.push_spaced(&next.text);
                let as_kw = self.expect(TokenKind::As, &["as"]).await?;
                meta.push_spaced(&as_kw.text);

                let id = self.expect_ident("sink identifier").await?;
                self.require_fresh(&id)?;
                if self.sinks.contains(&id.text) {
                    return Err(already_defined(&id));
                }
                self.sinks.insert(id.text.clone());
                sink_id = Some(id.text.clone());
                meta.push_spaced(&id.text);

                let to = self.expect(TokenKind::To, &["to"]).await?;
                meta.push_spaced(&to.text);
            }
            TokenKind::To => meta.push_spaced(&next.text),
            _ => return Err(unexpected(&next, &["to", "async"])),
        }

        let class = self.parse_class("sink").await?;
        meta.push_spaced(&class.meta.text);

        let args = self.parse_args(&mut meta).await?;
        self.require_eol().await?;

        Ok(SinkNode {
            meta,
            source: subject.text,
            sink_id,
            class,
            args,
        })
    }

    async fn parse_merge(&mut self) -> Result<MergeNode, ParseError> {
        let keyword = self.expect(TokenKind::Merge, &["merge"]).await?;
        let mut meta = NodeMeta::from_token(&keyword);

        let a = self.expect_ident("source identifier").await?;
        self.require_live(&a)?;
        self.consumed.insert(a.text.clone());
        meta.push_spaced(&a.text);

        let and = self.expect(TokenKind::And, &["and"]).await?;
        meta.push_spaced(&and.text);

        let b = self.expect_ident("source identifier").await?;
        self.require_live(&b)?;
        self.consumed.insert(b.text.clone());
        meta.push_spaced(&b.text);

        let as_kw = self.expect(TokenKind::As, &["as"]).await?;
        meta.push_spaced(&as_kw.text);

        let id = self.expect_ident("merged identifier").await?;
        self.require_fresh(&id)?;
        self.sources.insert(id.text.clone());
        meta.push_spaced(&id.text);

        self.require_eol().await?;

        Ok(MergeNode {
            meta,
            source_a: a.text,
            source_b: b.text,
            id: id.text,
        })
    }

    async fn parse_dupe(&mut self) -> Result<DupeNode, ParseError> {
        let keyword = self.expect(TokenKind::Dupe, &["dupe"]).await?;
        let mut meta = NodeMeta::from_token(&keyword);

        let source = self.expect_ident("source identifier").await?;
        self.require_live(&source)?;
        self.consumed.insert(source.text.clone());
        meta.push_spaced(&source.text);

        let as_kw = self.expect(TokenKind::As, &["as"]).await?;
        meta.push_spaced(&as_kw.text);

        let a = self.expect_ident("target identifier").await?;
        self.require_fresh(&a)?;
        self.sources.insert(a.text.clone());
        meta.push_spaced(&a.text);

        let and = self.expect(TokenKind::And, &["and"]).await?;
        meta.push_spaced(&and.text);

        let b = self.expect_ident("target identifier").await?;
        self.require_fresh(&b)?;
        self.sources.insert(b.text.clone());
        meta.push_spaced(&b.text);

        self.require_eol().await?;

        Ok(DupeNode {
            meta,
            source: source.text,
            target_a: a.text,
            target_b: b.text,
        })
    }

    async fn parse_append(&mut self) -> Result<AppendNode, ParseError> {
        let keyword = self.expect(TokenKind::Append, &["append"]).await?;
        let mut meta = NodeMeta::from_token(&keyword);

        let source = self.expect_ident("source identifier").await?;
        self.require_live(&source)?;
        self.consumed.insert(source.text.clone());
        meta.push_spaced(&source.text);

        let to = self.expect(TokenKind::To, &["to"]).await?;
        meta.push_spaced(&to.text);

        let target = self.expect_ident("target identifier").await?;
        if !self.sources.contains(&target.text) {
            return Err(undefined(&target));
        }
        meta.push_spaced(&target.text);

        self.require_eol().await?;

        Ok(AppendNode {
            meta,
            source: source.text,
            target: target.text,
        })
    }

    async fn parse_cut(&mut self) -> Result<CutNode, ParseError> {
        let keyword = self.expect(TokenKind::Cut, &["cut"]).await?;
        let mut meta = NodeMeta::from_token(&keyword);
        let mut delimiter = " ".to_string();

        let mut subject = self.advance().await?;
        if subject.kind == TokenKind::With {
            meta.push_spaced(&subject.text);
            let delim = self.expect(TokenKind::Str, &["string delimiter"]).await?;
            delimiter = unescape_string(&delim.text);
            meta.push_spaced(&delim.text);
            subject = self.advance().await?;
        }
        if subject.kind != TokenKind::Ident {
            return Err(unexpected(&subject, &["source identifier"]));
        }
        if self.consumed.contains(&subject.text) {
            return Err(already_consumed(&subject));
        }
        meta.push_spaced(&subject.text);

        let set = self.expect(TokenKind::Set, &["set"]).await?;
        meta.push_spaced(&set.text);

        let lpar = self.expect(TokenKind::LPar, &["("]).await?;
        meta.push_spaced(&lpar.text);

        let mut field_sets = Vec::new();
        loop {
            if !field_sets.is_empty() {
                let sep = self.advance().await?;
                match sep.kind {
                    TokenKind::Comma => meta.push(&sep.text),
                    TokenKind::RPar => {
                        meta.push(&sep.text);
                        break;
                    }
                    _ => return Err(unexpected(&sep, &[",", ")"])),
                }
            }

            let field = self.expect_ident("field set identifier").await?;
            let eq = self.expect(TokenKind::Eq, &["="]).await?;
            let index = self.expect(TokenKind::Int, &["int field number"]).await?;
            let parsed = index
                .text
                .parse()
                .map_err(|_| ParseError::InvalidLiteral {
                    what: "int",
                    text: index.text.clone(),
                    line: index.line,
                    pos: index.pos,
                })?;
            field_sets.push((field.text.clone(), parsed));

            if field_sets.len() == 1 {
                meta.push(&field.text);
            } else {
                meta.push_spaced(&field.text);
            }
            meta.push_spaced(&eq.text);
            meta.push_spaced(&index.text);
        }

        self.require_eol().await?;

        Ok(CutNode {
            meta,
            delimiter,
            source: subject.text,
            field_sets,
        })
    }

    async fn parse_fanout(&mut self) -> Result<FanoutNode, ParseError> {
        let keyword = self.expect(TokenKind::Fanout, &["fanout"]).await?;
        let mut meta = NodeMeta::from_token(&keyword);

        let source = self.expect_ident("source identifier").await?;
        self.require_live(&source)?;
        self.consumed.insert(source.text.clone());
        meta.push_spaced(&source.text);

        let as_kw = self.expect(TokenKind::As, &["as"]).await?;
        meta.push_spaced(&as_kw.text);

        let a = self.expect_ident("target identifier").await?;
        self.require_fresh(&a)?;
        self.sources.insert(a.text.clone());
        meta.push_spaced(&a.text);

        let and = self.expect(TokenKind::And, &["and"]).await?;
        meta.push_spaced(&and.text);

        let b = self.expect_ident("target identifier").await?;
        self.require_fresh(&b)?;
        self.sources.insert(b.text.clone());
        meta.push_spaced(&b.text);

        self.require_eol().await?;

        Ok(FanoutNode {
            meta,
            source: source.text,
            target_a: a.text,
            target_b: b.text,
        })
    }

    async fn parse_tag(&mut self) -> Result<TagNode, ParseError> {
        let keyword = self.expect(TokenKind::Tag, &["tag"]).await?;
        let mut meta = NodeMeta::from_token(&keyword);

        let source = self.expect_ident("source identifier").await?;
        meta.push_spaced(&source.text);

        let with = self.expect(TokenKind::With, &["with"]).await?;
        meta.push_spaced(&with.text);

        let tag = self.expect(TokenKind::Str, &["tag string"]).await?;
        meta.push_spaced(&tag.text);

        self.require_eol().await?;

        Ok(TagNode {
            meta,
            source: source.text,
            tag: unescape_string(&tag.text),
        })
    }

    async fn parse_join(&mut self) -> Result<JoinNode, ParseError> {
        let keyword = self.expect(TokenKind::Join, &["join"]).await?;
        let mut meta = NodeMeta::from_token(&keyword);

        let source = self.expect_ident("source identifier").await?;
        meta.push_spaced(&source.text);

        let with = self.expect(TokenKind::With, &["with"]).await?;
        meta.push_spaced(&with.text);

        let first = self.expect(TokenKind::Str, &["pattern string"]).await?;
        let mut patterns = vec![unescape_string(&first.text)];
        meta.push_spaced(&first.text);

        loop {
            let token = self.advance().await?;
            if token.kind != TokenKind::Comma {
                self.stream.push_back(token);
                break;
            }
            meta.push(&token.text);
            let pattern = self.expect(TokenKind::Str, &["pattern string"]).await?;
            patterns.push(unescape_string(&pattern.text));
            meta.push_spaced(&pattern.text);
        }

        self.require_eol().await?;

        Ok(JoinNode {
            meta,
            source: source.text,
            patterns,
        })
    }
}
