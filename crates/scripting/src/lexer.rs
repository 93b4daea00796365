//! Softcode lexer
//!
//! Context-free tokenizer over the plain text of a markup string. Offsets
//! are character offsets, so spans line up with [`MString::slice`].
//!
//! [`MString::slice`]: mush_core::MString::slice

use crate::ast::{Pronoun, Span, Substitution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `name(`
    FunctionHead,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
    Comma,
    Equals,
    Semicolon,
    /// `\X`
    Escape,
    /// `%X`
    Substitution,
    Whitespace,
    Number,
    Text,
    Eof,
}

impl TokenKind {
    /// Display form used in diagnostics
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::FunctionHead => "function",
            TokenKind::OpenParen => "'('",
            TokenKind::CloseParen => "')'",
            TokenKind::OpenBracket => "'['",
            TokenKind::CloseBracket => "']'",
            TokenKind::OpenBrace => "'{'",
            TokenKind::CloseBrace => "'}'",
            TokenKind::Comma => "','",
            TokenKind::Equals => "'='",
            TokenKind::Semicolon => "';'",
            TokenKind::Escape => "escape",
            TokenKind::Substitution => "substitution",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Number => "number",
            TokenKind::Text => "text",
            TokenKind::Eof => "<EOF>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
    /// Set for [`TokenKind::Substitution`] tokens
    pub substitution: Option<Substitution>,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '@' | '~' | '`' | '.' | '-')
}

fn is_special(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '[' | ']' | '{' | '}' | ',' | '=' | ';' | '\\' | '%'
    ) || c.is_whitespace()
}

/// Softcode lexer
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    /// Lex the whole input; the last token is always [`TokenKind::Eof`]
    pub fn tokenize(input: &str) -> Vec<Token> {
        let mut lexer = Self::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    pub fn next_token(&mut self) -> Token {
        let start = self.pos;
        let Some(ch) = self.current() else {
            return self.token(TokenKind::Eof, start);
        };

        let kind = match ch {
            '(' => self.single(TokenKind::OpenParen),
            ')' => self.single(TokenKind::CloseParen),
            '[' => self.single(TokenKind::OpenBracket),
            ']' => self.single(TokenKind::CloseBracket),
            '{' => self.single(TokenKind::OpenBrace),
            '}' => self.single(TokenKind::CloseBrace),
            ',' => self.single(TokenKind::Comma),
            '=' => self.single(TokenKind::Equals),
            ';' => self.single(TokenKind::Semicolon),
            '\\' => {
                self.pos += 1;
                if self.current().is_some() {
                    self.pos += 1;
                    TokenKind::Escape
                } else {
                    TokenKind::Text
                }
            }
            '%' => {
                self.pos += 1;
                match self.read_substitution() {
                    Some(sub) => {
                        let mut token = self.token(TokenKind::Substitution, start);
                        token.substitution = Some(sub);
                        return token;
                    }
                    None => TokenKind::Text,
                }
            }
            c if c.is_whitespace() => {
                while self.current().is_some_and(char::is_whitespace) {
                    self.pos += 1;
                }
                TokenKind::Whitespace
            }
            c if is_name_char(c) => self.read_name(),
            _ => {
                while self
                    .current()
                    .is_some_and(|c| !is_special(c) && !is_name_char(c))
                {
                    self.pos += 1;
                }
                TokenKind::Text
            }
        };
        self.token(kind, start)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn read_name(&mut self) -> TokenKind {
        let start = self.pos;
        while self.current().is_some_and(is_name_char) {
            self.pos += 1;
        }
        if self.current() == Some('(') {
            self.pos += 1;
            return TokenKind::FunctionHead;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        if word.parse::<f64>().is_ok() {
            TokenKind::Number
        } else {
            TokenKind::Text
        }
    }

    /// Called with `pos` just past the `%`. Returns `None` for a trailing `%`.
    fn read_substitution(&mut self) -> Option<Substitution> {
        let c = self.current()?;
        self.pos += 1;
        let sub = match c {
            '0'..='9' => Substitution::Argument(c as usize - '0' as usize),
            'q' | 'Q' => match self.read_register_name() {
                Some(name) => Substitution::Register(name),
                None => Substitution::Literal(c),
            },
            'i' | 'I' => match self.current().and_then(|d| d.to_digit(10)) {
                Some(d) => {
                    self.pos += 1;
                    Substitution::Iteration(d as usize)
                }
                None => Substitution::Literal(c),
            },
            '$' => match self.read_register_name() {
                Some(name) => Substitution::RegexCapture(name),
                None => Substitution::Literal(c),
            },
            'v' | 'V' | 'w' | 'W' | 'x' | 'X' => match self.current() {
                Some(n) if n.is_ascii_alphabetic() => {
                    self.pos += 1;
                    Substitution::AttributeRegister(format!(
                        "{}{}",
                        c.to_ascii_uppercase(),
                        n.to_ascii_uppercase()
                    ))
                }
                _ => Substitution::Literal(c),
            },
            'b' | 'B' => Substitution::Space,
            'r' | 'R' => Substitution::Newline,
            't' | 'T' => Substitution::Tab,
            '%' => Substitution::Percent,
            '#' => Substitution::Enactor,
            '!' => Substitution::Executor,
            '@' => Substitution::Caller,
            'n' | 'N' => Substitution::EnactorName {
                capitalized: c == 'N',
            },
            'k' | 'K' => Substitution::Moniker,
            '~' => Substitution::AccentedName,
            's' | 'S' => pronoun(Pronoun::Subjective, c),
            'o' | 'O' => pronoun(Pronoun::Objective, c),
            'p' | 'P' => pronoun(Pronoun::Possessive, c),
            'a' | 'A' => pronoun(Pronoun::Absolute, c),
            'l' | 'L' => Substitution::Location,
            'c' | 'C' | 'u' | 'U' => Substitution::CurrentCommand,
            '+' => Substitution::ArgumentCount,
            '?' => Substitution::InvocationDepth,
            other => Substitution::Literal(other),
        };
        Some(sub)
    }

    /// `X` (single alphanumeric) or `<name>`, upper-cased
    fn read_register_name(&mut self) -> Option<String> {
        match self.current()? {
            '<' => {
                let close = self.chars[self.pos..].iter().position(|&c| c == '>')?;
                let name: String = self.chars[self.pos + 1..self.pos + close].iter().collect();
                self.pos += close + 1;
                Some(name.to_ascii_uppercase())
            }
            c if c.is_ascii_alphanumeric() => {
                self.pos += 1;
                Some(c.to_ascii_uppercase().to_string())
            }
            _ => None,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token {
            kind,
            text: self.chars[start..self.pos].iter().collect(),
            span: Span::new(start, self.pos),
            substitution: None,
        }
    }
}

fn pronoun(kind: Pronoun, c: char) -> Substitution {
    Substitution::Pronoun {
        kind,
        capitalized: c.is_ascii_uppercase(),
    }
}

/// Buffered token stream with random access
///
/// The lexer runs to completion up front; the parser then moves a cursor
/// over the buffer and may look at any token.
#[derive(Debug, Clone)]
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenStream {
    pub fn fill(input: &str) -> Self {
        Self {
            tokens: Lexer::tokenize(input),
            pos: 0,
        }
    }

    pub fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    pub fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    /// Consume the current token; stays on `Eof` once reached
    pub fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    pub fn get(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }

    pub fn index(&self) -> usize {
        self.pos
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::tokenize(input).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_function_head() {
        let tokens = Lexer::tokenize("add(1,2)");
        assert_eq!(tokens[0].kind, TokenKind::FunctionHead);
        assert_eq!(tokens[0].text, "add(");
        assert_eq!(
            kinds("add(1,2)"),
            vec![
                TokenKind::FunctionHead,
                TokenKind::Number,
                TokenKind::Comma,
                TokenKind::Number,
                TokenKind::CloseParen,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_words_and_numbers() {
        assert_eq!(
            kinds("abc 12 -3.5 #7"),
            vec![
                TokenKind::Text,
                TokenKind::Whitespace,
                TokenKind::Number,
                TokenKind::Whitespace,
                TokenKind::Number,
                TokenKind::Whitespace,
                TokenKind::Text,
                TokenKind::Number,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_escapes() {
        let tokens = Lexer::tokenize("a\\,b\\");
        assert_eq!(tokens[1].kind, TokenKind::Escape);
        assert_eq!(tokens[1].span, Span::new(1, 3));
        assert_eq!(tokens[3].kind, TokenKind::Text);
        assert_eq!(tokens[3].text, "\\");
    }

    #[test]
    fn test_substitutions() {
        let subs: Vec<Option<Substitution>> = Lexer::tokenize("%0%q<foo>%qa%i1%$2%va%N%z%")
            .into_iter()
            .map(|t| t.substitution)
            .collect();
        assert_eq!(subs[0], Some(Substitution::Argument(0)));
        assert_eq!(subs[1], Some(Substitution::Register("FOO".into())));
        assert_eq!(subs[2], Some(Substitution::Register("A".into())));
        assert_eq!(subs[3], Some(Substitution::Iteration(1)));
        assert_eq!(subs[4], Some(Substitution::RegexCapture("2".into())));
        assert_eq!(subs[5], Some(Substitution::AttributeRegister("VA".into())));
        assert_eq!(subs[6], Some(Substitution::EnactorName { capitalized: true }));
        assert_eq!(subs[7], Some(Substitution::Literal('z')));
        // trailing % is plain text
        assert_eq!(subs[8], None);
    }

    #[test]
    fn test_multibyte_offsets() {
        let tokens = Lexer::tokenize("é[x]");
        assert_eq!(tokens[1].kind, TokenKind::OpenBracket);
        assert_eq!(tokens[1].span, Span::new(1, 2));
    }

    #[test]
    fn test_stream_random_access() {
        let mut stream = TokenStream::fill("a,b");
        assert_eq!(stream.get(1).map(|t| t.kind), Some(TokenKind::Comma));
        stream.advance();
        stream.advance();
        stream.advance();
        assert_eq!(stream.peek_kind(), TokenKind::Eof);
        stream.advance();
        assert_eq!(stream.peek_kind(), TokenKind::Eof);
        assert_eq!(stream.index(), 3);
    }
}
