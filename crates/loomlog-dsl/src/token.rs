//! Tokens and the push-back token stream between lexer and parser.

use tokio::sync::mpsc;

use crate::error::LexError;

/// Maximum number of tokens the parser may push back for look-ahead.
const PUSH_BACK_CAPACITY: usize = 64;

/// Token discriminants produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// End of input.
    Eof,
    /// Lexer failure; the token text carries the message.
    Err,
    /// End of line.
    Eol,
    /// Quoted string literal.
    Str,
    /// Decimal number literal.
    Number,
    /// Integer literal.
    Int,
    /// `(`
    LPar,
    /// `)`
    RPar,
    /// `=`
    Eq,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `as`
    As,
    /// `and`
    And,
    /// `to`
    To,
    /// `source`
    Source,
    /// `var`
    Var,
    /// `sink`
    Sink,
    /// `async`
    Async,
    /// Identifier.
    Ident,
    /// `merge`
    Merge,
    /// `dupe`
    Dupe,
    /// `append`
    Append,
    /// `cut`
    Cut,
    /// `set`
    Set,
    /// `with`
    With,
    /// `fanout`
    Fanout,
    /// `tag`
    Tag,
    /// `join`
    Join,
}

/// One token with its position in the script.
#[derive(Debug, Clone)]
pub struct Token {
    /// One-based line number.
    pub line: usize,
    /// Zero-based position within the line, counted in runes.
    pub pos: usize,
    /// Raw token text (strings keep their quotes).
    pub text: String,
    /// The token discriminant.
    pub kind: TokenKind,
    /// The typed error for [`TokenKind::Err`] tokens.
    pub error: Option<LexError>,
}

impl Token {
    pub(crate) fn eof() -> Self {
        Self {
            line: 0,
            pos: 0,
            text: String::new(),
            kind: TokenKind::Eof,
            error: None,
        }
    }
}

/// Wraps the lexer's token channel with a fixed-capacity push-back stack.
///
/// Once an error token arrives it is latched: every later [`next`] returns
/// the same error token while the channel is drained in the background to
/// unblock the lexer task.
///
/// [`next`]: TokenStream::next
pub struct TokenStream {
    rx: Option<mpsc::Receiver<Token>>,
    push_back: Vec<Token>,
    latched: Option<Token>,
}

impl TokenStream {
    pub(crate) fn new(rx: mpsc::Receiver<Token>) -> Self {
        Self {
            rx: Some(rx),
            push_back: Vec::new(),
            latched: None,
        }
    }

    /// Returns the next token: the top of the push-back stack, or the next
    /// channel token. A closed channel yields EOF tokens.
    pub async fn next(&mut self) -> Token {
        if let Some(err) = &self.latched {
            return err.clone();
        }
        if let Some(token) = self.push_back.pop() {
            return token;
        }
        let Some(rx) = self.rx.as_mut() else {
            return Token::eof();
        };
        match rx.recv().await {
            None => Token::eof(),
            Some(token) if token.kind == TokenKind::Err => {
                self.latched = Some(token.clone());
                self.drain();
                token
            }
            Some(token) => token,
        }
    }

    /// Returns the next token without consuming it.
    pub async fn peek(&mut self) -> Token {
        let token = self.next().await;
        self.push_back(token.clone());
        token
    }

    /// Pushes a token back onto the look-ahead stack.
    ///
    /// # Panics
    ///
    /// Exceeding the push-back capacity is a programmer error.
    pub fn push_back(&mut self, token: Token) {
        assert!(
            self.push_back.len() < PUSH_BACK_CAPACITY,
            "token push-back filled to capacity"
        );
        self.push_back.push(token);
    }

    /// Consumes the rest of the channel on a background task so the lexer
    /// is never left blocked on a hand-off.
    pub(crate) fn drain(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            tokio::spawn(async move { while rx.recv().await.is_some() {} });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, kind: TokenKind) -> Token {
        Token {
            line: 1,
            pos: 0,
            text: text.to_string(),
            kind,
            error: None,
        }
    }

    #[tokio::test]
    async fn next_prefers_pushed_back_tokens() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(word("source", TokenKind::Source)).await.ok();
        drop(tx);

        let mut stream = TokenStream::new(rx);
        let first = stream.next().await;
        assert_eq!(first.kind, TokenKind::Source);
        stream.push_back(first);
        assert_eq!(stream.next().await.kind, TokenKind::Source);
        assert_eq!(stream.next().await.kind, TokenKind::Eof);
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(word("as", TokenKind::As)).await.ok();
        drop(tx);

        let mut stream = TokenStream::new(rx);
        assert_eq!(stream.peek().await.kind, TokenKind::As);
        assert_eq!(stream.next().await.kind, TokenKind::As);
    }

    #[tokio::test]
    async fn error_tokens_latch() {
        let (tx, rx) = mpsc::channel(4);
        let mut bad = word("unknown token: ~", TokenKind::Err);
        bad.error = Some(LexError::UnknownToken("~".to_string()));
        tx.send(bad).await.ok();
        tx.send(word("ignored", TokenKind::Ident)).await.ok();
        drop(tx);

        let mut stream = TokenStream::new(rx);
        assert_eq!(stream.next().await.kind, TokenKind::Err);
        // Latched: later tokens never surface.
        assert_eq!(stream.next().await.kind, TokenKind::Err);
        assert_eq!(stream.next().await.kind, TokenKind::Err);
    }
}
