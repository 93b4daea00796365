//! Editor-facing views of softcode and lock text
//!
//! Everything here is pure: text in, tokens or errors out. Positions are
//! 0-based lines and characters so they can be handed to an editor as is.

use crate::ast::{Argument, BraceMode, Node, Span, Substitution, Tree};
use crate::lexer::Lexer;
use crate::lexer::TokenKind;
use crate::lock::parse_lock;
use crate::parser::{self, ParseRule, SyntaxError};
use mush_core::{LineIndex, Range};
use serde::Serialize;

/// Which grammar a piece of text is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GrammarKind {
    Expression(ParseRule),
    Lock,
}

/// A raw token, before any grammar is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticToken {
    pub kind: &'static str,
    pub text: String,
    /// Character offset of the first character
    pub start_index: usize,
    /// Character offset one past the last character
    pub end_index: usize,
    pub range: Range,
}

/// Highlighting classes, in legend order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SemanticTokenType {
    Function,
    Command,
    Substitution,
    Register,
    ObjectReference,
    EscapeSequence,
    BracketSubstitution,
    BraceGroup,
    Operator,
    Keyword,
    Text,
}

impl SemanticTokenType {
    pub const LEGEND: &'static [&'static str] = &[
        "function",
        "command",
        "substitution",
        "register",
        "objectReference",
        "escapeSequence",
        "bracketSubstitution",
        "braceGroup",
        "operator",
        "keyword",
        "text",
    ];

    pub fn index(&self) -> u32 {
        *self as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemanticToken {
    pub range: Range,
    pub token_type: SemanticTokenType,
    pub text: String,
}

impl SemanticToken {
    /// Length in characters; tokens never cross a line
    pub fn len(&self) -> usize {
        self.range.end.character - self.range.start.character
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split `text` into tokens of `kind`'s grammar
pub fn tokenize(text: &str, kind: GrammarKind) -> Vec<DiagnosticToken> {
    let lines = LineIndex::new(text);
    match kind {
        GrammarKind::Expression(_) => Lexer::tokenize(text)
            .into_iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| DiagnosticToken {
                kind: t.kind.describe(),
                text: t.text,
                start_index: t.span.start,
                end_index: t.span.end,
                range: lines.range(t.span.start, t.span.end),
            })
            .collect(),
        GrammarKind::Lock => lock_tokens(text)
            .into_iter()
            .map(|(kind, span)| DiagnosticToken {
                kind: lock_token_name(kind),
                text: slice(text, span),
                start_index: span.start,
                end_index: span.end,
                range: lines.range(span.start, span.end),
            })
            .collect(),
    }
}

/// Every syntax error in `text`; empty when it parses cleanly
pub fn validate_and_get_errors(text: &str, kind: GrammarKind) -> Vec<SyntaxError> {
    match kind {
        GrammarKind::Expression(rule) => parser::parse(text, rule).errors,
        GrammarKind::Lock => match parse_lock(text) {
            Ok(_) => Vec::new(),
            Err(e) => {
                let lines = LineIndex::new(text);
                let at = lines.position(e.offset);
                let width = if e.found == "<EOF>" { 0 } else { e.found.chars().count() };
                vec![SyntaxError {
                    line: at.line,
                    column: at.character,
                    range: lines.range(e.offset, e.offset + width),
                    message: e.to_string(),
                    offending_token: Some(e.found.clone()),
                    expected_tokens: vec!["key".to_string(), "'('".to_string(), "'!'".to_string()],
                    input_text: text.to_string(),
                }]
            }
        },
    }
}

/// Highlighting tokens for `text`, in document order
pub fn semantic_tokens(text: &str, kind: GrammarKind) -> Vec<SemanticToken> {
    let mut out = Highlighter {
        chars: text.chars().collect(),
        lines: LineIndex::new(text),
        tokens: Vec::new(),
    };
    match kind {
        GrammarKind::Expression(rule) => {
            let output = parser::parse(text, rule);
            out.tree(&output.tree);
        }
        GrammarKind::Lock => {
            for (kind, span) in lock_tokens(text) {
                let token_type = match kind {
                    LockToken::Operator | LockToken::Paren => SemanticTokenType::Operator,
                    LockToken::Key => lock_key_type(&slice(text, span)),
                };
                out.push(span, token_type);
            }
        }
    }
    out.tokens
        .sort_by_key(|t| (t.range.start.line, t.range.start.character));
    out.tokens
}

/// Encode tokens in the LSP relative layout: for each token its line
/// delta, start delta, length, type index and modifier bits
pub fn encode_semantic_tokens(tokens: &[SemanticToken]) -> Vec<u32> {
    let mut sorted: Vec<&SemanticToken> = tokens.iter().collect();
    sorted.sort_by_key(|t| (t.range.start.line, t.range.start.character));

    let mut data = Vec::with_capacity(sorted.len() * 5);
    let (mut prev_line, mut prev_char) = (0, 0);
    for token in sorted {
        let start = token.range.start;
        let delta_line = start.line - prev_line;
        let delta_char = if delta_line == 0 {
            start.character - prev_char
        } else {
            start.character
        };
        data.extend([
            delta_line as u32,
            delta_char as u32,
            token.len() as u32,
            token.token_type.index(),
            0,
        ]);
        prev_line = start.line;
        prev_char = start.character;
    }
    data
}

fn slice(text: &str, span: Span) -> String {
    text.chars().skip(span.start).take(span.len()).collect()
}

struct Highlighter {
    chars: Vec<char>,
    lines: LineIndex,
    tokens: Vec<SemanticToken>,
}

impl Highlighter {
    /// Record `span`, cut at line breaks
    fn push(&mut self, span: Span, token_type: SemanticTokenType) {
        let mut start = span.start;
        for offset in span.start..span.end.min(self.chars.len()) {
            if self.chars[offset] == '\n' {
                self.push_line(start, offset, token_type);
                start = offset + 1;
            }
        }
        self.push_line(start, span.end.min(self.chars.len()), token_type);
    }

    fn push_line(&mut self, start: usize, end: usize, token_type: SemanticTokenType) {
        if start >= end {
            return;
        }
        self.tokens.push(SemanticToken {
            range: self.lines.range(start, end),
            token_type,
            text: self.chars[start..end].iter().collect(),
        });
    }

    /// Mark a single delimiter character if it is really there
    fn delimiter(&mut self, offset: usize, expected: char, token_type: SemanticTokenType) {
        if self.chars.get(offset) == Some(&expected) {
            self.push(Span::new(offset, offset + 1), token_type);
        }
    }

    fn tree(&mut self, tree: &Tree) {
        match tree {
            Tree::Expression(arg) => self.nodes(&arg.nodes),
            Tree::Command(command) => self.command(command.span),
            Tree::CommandList(commands) => {
                for command in commands {
                    self.command(command.span);
                    self.delimiter(command.span.end, ';', SemanticTokenType::Operator);
                }
            }
            Tree::CommaArgs(args) => self.separated(args, ','),
            Tree::EqSplitArgs { left, right } => {
                self.nodes(&left.nodes);
                if let Some(right) = right {
                    self.delimiter(left.span.end, '=', SemanticTokenType::Operator);
                    self.separated(right, ',');
                }
            }
            Tree::EqSplitCommand { left, right } => {
                self.nodes(&left.nodes);
                if let Some(right) = right {
                    self.delimiter(left.span.end, '=', SemanticTokenType::Operator);
                    self.nodes(&right.nodes);
                }
            }
        }
    }

    fn separated(&mut self, args: &[Argument], separator: char) {
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.delimiter(args[i - 1].span.end, separator, SemanticTokenType::Operator);
            }
            self.nodes(&arg.nodes);
        }
    }

    /// Command name, then the rest as text. Arguments are split only once
    /// the command is known, so they are not analysed further here.
    fn command(&mut self, span: Span) {
        let name_len = self.chars[span.start..span.end.min(self.chars.len())]
            .iter()
            .take_while(|c| !c.is_whitespace())
            .count();
        self.push(Span::new(span.start, span.start + name_len), SemanticTokenType::Command);
        self.push(Span::new(span.start + name_len, span.end), SemanticTokenType::Text);
    }

    fn nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.node(node);
        }
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Text(span) => self.push(*span, SemanticTokenType::Text),
            Node::Escape(span) => self.push(
                Span::new(span.start.saturating_sub(1), span.end),
                SemanticTokenType::EscapeSequence,
            ),
            Node::Substitution(sub, span) => self.push(*span, substitution_type(sub)),
            Node::Function(function) => {
                self.push(function.name_span, SemanticTokenType::Function);
                self.delimiter(function.name_span.end, '(', SemanticTokenType::Operator);
                self.separated(&function.args, ',');
                if let Some(last) = function.args.last() {
                    self.delimiter(last.span.end, ')', SemanticTokenType::Operator);
                }
            }
            Node::Bracket(body, span) => {
                self.delimiter(span.start, '[', SemanticTokenType::BracketSubstitution);
                self.nodes(body);
                self.delimiter(span.end.saturating_sub(1), ']', SemanticTokenType::BracketSubstitution);
            }
            Node::Brace(brace) => {
                self.delimiter(brace.span.start, '{', SemanticTokenType::BraceGroup);
                if brace.mode == BraceMode::Literal {
                    self.push(brace.inner, SemanticTokenType::Text);
                } else {
                    self.nodes(&brace.body);
                }
                self.delimiter(brace.inner.end, '}', SemanticTokenType::BraceGroup);
            }
        }
    }
}

fn substitution_type(sub: &Substitution) -> SemanticTokenType {
    match sub {
        Substitution::Register(_)
        | Substitution::AttributeRegister(_)
        | Substitution::Iteration(_)
        | Substitution::RegexCapture(_) => SemanticTokenType::Register,
        Substitution::Enactor | Substitution::Executor | Substitution::Caller => {
            SemanticTokenType::ObjectReference
        }
        _ => SemanticTokenType::Substitution,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockToken {
    Operator,
    Paren,
    Key,
}

fn lock_token_name(kind: LockToken) -> &'static str {
    match kind {
        LockToken::Operator => "operator",
        LockToken::Paren => "paren",
        LockToken::Key => "key",
    }
}

fn lock_key_type(key: &str) -> SemanticTokenType {
    if key.eq_ignore_ascii_case("#TRUE") || key.eq_ignore_ascii_case("#FALSE") {
        return SemanticTokenType::Keyword;
    }
    let reference = key.trim_start_matches(['=', '+', '$', '@']);
    if reference.starts_with('#') || !key.contains([':', '^', '/']) || key.starts_with('@') {
        SemanticTokenType::ObjectReference
    } else {
        SemanticTokenType::Register
    }
}

/// Operators, parentheses, and the keys between them
fn lock_tokens(text: &str) -> Vec<(LockToken, Span)> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let kind = match c {
            '&' | '|' | '!' => Some(LockToken::Operator),
            '(' | ')' => Some(LockToken::Paren),
            _ => None,
        };
        if let Some(kind) = kind {
            tokens.push((kind, Span::new(i, i + 1)));
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && !matches!(chars[i], '&' | '|' | '(' | ')') {
            i += 1;
        }
        let trailing = chars[start..i].iter().rev().take_while(|c| c.is_whitespace()).count();
        tokens.push((LockToken::Key, Span::new(start, i - trailing)));
    }
    tokens
}
