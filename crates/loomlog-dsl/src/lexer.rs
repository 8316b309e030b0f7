//! Streaming lexer over a circular rune buffer.
//!
//! The lexer runs as a spawned task feeding a bounded token channel; the
//! parser pulls through a [`TokenStream`]. On an error the lexer publishes
//! one error token and stops, which closes the channel behind it.

use tokio::sync::mpsc;

use crate::error::LexError;
use crate::lexbuf::RuneBuffer;
use crate::token::{Token, TokenKind, TokenStream};

const TOKEN_CHANNEL_CAPACITY: usize = 16;

const MINUS: &str = "-";
const DIGITS: &str = "0123456789";
const ALPHA: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const IDENT_TAIL: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_";

/// Why the lexer task stopped mid-scan.
enum Halt {
    /// The receiving side went away.
    Closed,
    /// A scan error to publish as an error token.
    Error(LexError),
}

pub(crate) struct Lexer {
    buf: RuneBuffer,
    tokens: mpsc::Sender<Token>,
    line: usize,
}

impl Lexer {
    /// Spawns a lexer task over `text` and returns the stream of its
    /// tokens.
    pub(crate) fn spawn(text: String) -> TokenStream {
        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let lexer = Self {
            buf: RuneBuffer::new(Box::new(text.chars().collect::<Vec<_>>().into_iter())),
            tokens: tx,
            line: 1,
        };
        tokio::spawn(lexer.run());
        TokenStream::new(rx)
    }

    async fn run(mut self) {
        loop {
            match self.step().await {
                Ok(true) => {}
                Ok(false) | Err(Halt::Closed) => return,
                Err(Halt::Error(error)) => {
                    let token = Token {
                        line: self.line,
                        pos: self.buf.pos,
                        text: error.to_string(),
                        kind: TokenKind::Err,
                        error: Some(error),
                    };
                    let _ = self.tokens.send(token).await;
                    return;
                }
            }
        }
    }

    /// Scans and publishes one token. `Ok(false)` after publishing EOF.
    async fn step(&mut self) -> Result<bool, Halt> {
        self.buf.skip_whitespace();
        let Some(c) = self.buf.read() else {
            self.buf.discard();
            self.send(Token {
                line: self.line,
                pos: self.buf.pos,
                text: String::new(),
                kind: TokenKind::Eof,
                error: None,
            })
            .await?;
            return Ok(false);
        };
        match c {
            '\n' => {
                self.post(TokenKind::Eol).await?;
                self.line += 1;
                self.buf.pos = 0;
            }
            '"' => self.scan_string().await?,
            '(' => self.post(TokenKind::LPar).await?,
            ')' => self.post(TokenKind::RPar).await?,
            '=' => self.post(TokenKind::Eq).await?,
            ',' => self.post(TokenKind::Comma).await?,
            '.' => self.post(TokenKind::Dot).await?,
            '-' => {
                self.buf.unread();
                self.scan_number().await?;
            }
            c if c.is_ascii_digit() => {
                self.buf.unread();
                self.scan_number().await?;
            }
            _ => self.scan_word().await?,
        }
        Ok(true)
    }

    /// Publishes the scanned text as a token of `kind`. The token position
    /// is the current position minus the token length.
    async fn post(&mut self, kind: TokenKind) -> Result<(), Halt> {
        let text = self.buf.consume();
        let pos = self.buf.pos.saturating_sub(text.chars().count());
        self.send(Token {
            line: self.line,
            pos,
            text,
            kind,
            error: None,
        })
        .await
    }

    async fn send(&mut self, token: Token) -> Result<(), Halt> {
        self.tokens.send(token).await.map_err(|_| Halt::Closed)
    }

    /// Scans the remainder of a quoted string. `\` escapes the next rune
    /// unconditionally; embedded newlines are permitted and the line
    /// counter catches up after the token is published.
    async fn scan_string(&mut self) -> Result<(), Halt> {
        loop {
            let Some(c) = self.buf.read() else {
                return Err(Halt::Error(LexError::UnterminatedString));
            };
            match c {
                '\\' => {
                    if self.buf.read().is_none() {
                        return Err(Halt::Error(LexError::UnterminatedString));
                    }
                }
                '"' => {
                    let newlines = self.buf.preview().matches('\n').count();
                    self.post(TokenKind::Str).await?;
                    self.line += newlines;
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    /// Scans an integer or decimal number, sign included.
    async fn scan_number(&mut self) -> Result<(), Halt> {
        self.buf.accept_one(MINUS);
        if self.buf.accept(DIGITS) == 0 {
            return Err(Halt::Error(LexError::InvalidNumber));
        }
        if self.buf.peek() == Some('.') {
            self.buf.read();
            if self.buf.accept(DIGITS) == 0 {
                return Err(Halt::Error(LexError::NoDigitAfterDecimal));
            }
            return self.post(TokenKind::Number).await;
        }
        self.post(TokenKind::Int).await
    }

    /// Scans a keyword, falling back to an identifier.
    async fn scan_word(&mut self) -> Result<(), Halt> {
        self.buf.read_until_break();
        let word = self.buf.preview();
        let keyword = match word.as_str() {
            "as" => Some(TokenKind::As),
            "and" => Some(TokenKind::And),
            "to" => Some(TokenKind::To),
            "source" => Some(TokenKind::Source),
            "var" => Some(TokenKind::Var),
            "sink" => Some(TokenKind::Sink),
            "async" => Some(TokenKind::Async),
            "merge" => Some(TokenKind::Merge),
            "dupe" => Some(TokenKind::Dupe),
            "append" => Some(TokenKind::Append),
            "cut" => Some(TokenKind::Cut),
            "set" => Some(TokenKind::Set),
            "with" => Some(TokenKind::With),
            "fanout" => Some(TokenKind::Fanout),
            "tag" => Some(TokenKind::Tag),
            "join" => Some(TokenKind::Join),
            _ => None,
        };
        if let Some(kind) = keyword {
            return self.post(kind).await;
        }

        // Identifier: rescan from the token start through the acceptors.
        let scanned = word.chars().count();
        self.buf.reset();
        let mut accepted = 0;
        if self.buf.accept_one(ALPHA) {
            accepted = 1 + self.buf.accept(IDENT_TAIL);
        }
        if accepted == scanned && accepted > 0 {
            return self.post(TokenKind::Ident).await;
        }
        Err(Halt::Error(LexError::UnknownToken(word)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(text: &str) -> Vec<Token> {
        let mut stream = Lexer::spawn(text.to_string());
        let mut tokens = Vec::new();
        loop {
            let token = stream.next().await;
            let done = matches!(token.kind, TokenKind::Eof | TokenKind::Err);
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    async fn kinds(text: &str) -> Vec<TokenKind> {
        collect(text).await.into_iter().map(|t| t.kind).collect()
    }

    #[tokio::test]
    async fn lexes_a_source_statement() {
        use TokenKind::{As, Dot, Eof, Eol, Ident, Source, Str};
        assert_eq!(
            kinds("source as blah file.Tail \"file.log\"\n").await,
            vec![Source, As, Ident, Ident, Dot, Ident, Str, Eol, Eof]
        );
    }

    #[tokio::test]
    async fn lexes_a_full_script() {
        use TokenKind::*;
        let script = concat!(
            "source as a file.File \"a.log\"\n",
            "source as b file.File \"b.log\"\n",
            "merge a and b as c\n",
            "dupe c as d and e\n",
            "append d to e\n",
            "cut with \",\" e set(first=0, last=-1)\n",
            "fanout e as f and g\n",
            "tag f with \"left\"\n",
            "join g with \"^start\", \"^begin\"\n",
            "sink f to file.File \"f.json\"\n",
            "sink g async as h to file.File \"g.json\"\n",
        );
        let expected = vec![
            Source, As, Ident, Ident, Dot, Ident, Str, Eol,
            Source, As, Ident, Ident, Dot, Ident, Str, Eol,
            Merge, Ident, And, Ident, As, Ident, Eol,
            Dupe, Ident, As, Ident, And, Ident, Eol,
            Append, Ident, To, Ident, Eol,
            Cut, With, Str, Ident, Set, LPar, Ident, Eq, Int, Comma, Ident, Eq, Int, RPar, Eol,
            Fanout, Ident, As, Ident, And, Ident, Eol,
            Tag, Ident, With, Str, Eol,
            Join, Ident, With, Str, Comma, Str, Eol,
            Sink, Ident, To, Ident, Dot, Ident, Str, Eol,
            Sink, Ident, Async, As, Ident, To, Ident, Dot, Ident, Str, Eol,
            Eof,
        ];
        assert_eq!(kinds(script).await, expected);
    }

    #[tokio::test]
    async fn lexes_numbers_with_suffixes() {
        let cases = [
            ("123", "123", TokenKind::Int),
            ("-123", "-123", TokenKind::Int),
            ("123.01", "123.01", TokenKind::Number),
            ("-123.01", "-123.01", TokenKind::Number),
            ("123abc", "123", TokenKind::Int),
            ("-123.01abc", "-123.01", TokenKind::Number),
        ];
        for (input, text, kind) in cases {
            let tokens = collect(input).await;
            assert_eq!(tokens[0].kind, kind, "input {input}");
            assert_eq!(tokens[0].text, text, "input {input}");
        }
    }

    #[tokio::test]
    async fn reports_missing_digit_after_decimal() {
        let tokens = collect("123. ").await;
        let last = tokens.last().expect("at least one token");
        assert_eq!(last.kind, TokenKind::Err);
        assert_eq!(last.error, Some(LexError::NoDigitAfterDecimal));
    }

    #[tokio::test]
    async fn reports_stray_minus() {
        let tokens = collect("- ").await;
        assert_eq!(
            tokens.last().map(|t| t.error.clone()),
            Some(Some(LexError::InvalidNumber))
        );
    }

    #[tokio::test]
    async fn reports_unknown_tokens() {
        let tokens = collect("source as _x").await;
        let last = tokens.last().expect("at least one token");
        assert_eq!(last.kind, TokenKind::Err);
        assert_eq!(last.error, Some(LexError::UnknownToken("_x".to_string())));
    }

    #[tokio::test]
    async fn reports_unterminated_strings() {
        let tokens = collect("\"no closing quote").await;
        assert_eq!(
            tokens.last().map(|t| t.error.clone()),
            Some(Some(LexError::UnterminatedString))
        );
    }

    #[tokio::test]
    async fn trailing_token_without_newline_is_kept() {
        use TokenKind::{Eof, Ident, Source, As};
        assert_eq!(
            kinds("source as trailing").await,
            vec![Source, As, Ident, Eof]
        );
    }

    #[tokio::test]
    async fn strings_may_span_lines() {
        let tokens = collect("\"line one\nline two\"\nfoo").await;
        assert_eq!(tokens[0].kind, TokenKind::Str);
        // The line counter caught up for the token after the string.
        let ident = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Ident)
            .expect("trailing identifier");
        assert_eq!(ident.line, 3);
    }

    #[tokio::test]
    async fn positions_count_from_the_line_start() {
        let tokens = collect("source as x\n").await;
        assert_eq!(tokens[0].pos, 0);
        assert_eq!(tokens[1].pos, 7);
        assert_eq!(tokens[2].pos, 10);
    }
}
