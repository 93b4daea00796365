//! Recursive-descent parser for the softcode grammar
//!
//! One grammar, several entry rules. The parser never gives up on the
//! first problem: it records a [`SyntaxError`] and keeps going so tooling
//! sees every error, while evaluation treats any error as fatal to the
//! parse.

use crate::ast::{Argument, BraceMode, BraceNode, CommandNode, FunctionNode, Node, Span, Tree};
use crate::lexer::{Token, TokenKind, TokenStream};
use crate::{Result, ScriptError};
use mush_core::{LineIndex, Range};
use serde::Serialize;

/// Grammar entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParseRule {
    /// A bare function expression (`add(1,2)[strlen(x)]`)
    Function,
    /// One command with its arguments
    SingleCommand,
    /// `;`-separated commands
    CommandList,
    /// `a,b,c`
    CommaArgs,
    /// `left=a,b,c`
    EqSplitArgs,
    /// `left=right`
    EqSplitCommand,
}

/// A structured parse diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxError {
    /// 0-based line where the problem was detected
    pub line: usize,
    /// 0-based column where the problem was detected
    pub column: usize,
    /// From the unclosed construct to the detection point
    pub range: Range,
    pub message: String,
    pub offending_token: Option<String>,
    pub expected_tokens: Vec<String>,
    pub input_text: String,
}

/// Tree plus every error found on the way
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub tree: Tree,
    pub errors: Vec<SyntaxError>,
}

impl ParseOutput {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Which tokens end an evaluation string and how it treats its contents
#[derive(Clone, Copy)]
struct Scope {
    stop: &'static [TokenKind],
    function_check: bool,
    braces: BraceMode,
}

impl Scope {
    const fn new(stop: &'static [TokenKind], function_check: bool, braces: BraceMode) -> Self {
        Self {
            stop,
            function_check,
            braces,
        }
    }

    /// Plain `(` groups keep `,` and `)` from ending the scope. Only scopes
    /// that split on those tokens track them; braces and commands do not.
    fn nests_parens(&self) -> bool {
        self.function_check
            && self
                .stop
                .iter()
                .any(|k| matches!(k, TokenKind::Comma | TokenKind::CloseParen | TokenKind::Equals))
    }
}

const NONE: &[TokenKind] = &[];
const FUNCTION_ARG: &[TokenKind] = &[TokenKind::Comma, TokenKind::CloseParen];
const BRACKET: &[TokenKind] = &[TokenKind::CloseBracket];
const BRACE: &[TokenKind] = &[TokenKind::CloseBrace];
const COMMA: &[TokenKind] = &[TokenKind::Comma];
const EQUALS: &[TokenKind] = &[TokenKind::Equals];
const SEMICOLON: &[TokenKind] = &[TokenKind::Semicolon];

/// Parse `input` with `rule`, collecting all syntax errors
pub fn parse(input: &str, rule: ParseRule) -> ParseOutput {
    let mut parser = Parser::new(input);
    let tree = parser.parse_rule(rule);
    ParseOutput {
        tree,
        errors: parser.errors,
    }
}

/// Parse `input` with `rule`, failing on the first syntax error
pub fn parse_strict(input: &str, rule: ParseRule) -> Result<Tree> {
    let output = parse(input, rule);
    match output.errors.into_iter().next() {
        Some(err) => Err(ScriptError::Syntax {
            line: err.line,
            column: err.column,
            message: err.message,
        }),
        None => Ok(output.tree),
    }
}

/// Softcode parser
pub struct Parser {
    stream: TokenStream,
    input: String,
    lines: LineIndex,
    errors: Vec<SyntaxError>,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        Self {
            stream: TokenStream::fill(input),
            input: input.to_string(),
            lines: LineIndex::new(input),
            errors: Vec::new(),
        }
    }

    pub fn parse_rule(&mut self, rule: ParseRule) -> Tree {
        match rule {
            ParseRule::Function => {
                Tree::Expression(self.evaluation_string(Scope::new(NONE, true, BraceMode::Strip)))
            }
            ParseRule::SingleCommand => Tree::Command(self.command(NONE)),
            ParseRule::CommandList => Tree::CommandList(self.command_list()),
            ParseRule::CommaArgs => Tree::CommaArgs(self.comma_args()),
            ParseRule::EqSplitArgs => {
                let left = self.command_arg(EQUALS);
                let right = self.eat(TokenKind::Equals).then(|| self.comma_args());
                Tree::EqSplitArgs { left, right }
            }
            ParseRule::EqSplitCommand => {
                let left = self.command_arg(EQUALS);
                let right = self.eat(TokenKind::Equals).then(|| self.command_arg(NONE));
                Tree::EqSplitCommand { left, right }
            }
        }
    }

    fn command_list(&mut self) -> Vec<CommandNode> {
        let mut commands = Vec::new();
        loop {
            let command = self.command(SEMICOLON);
            if !command.span.is_empty() {
                commands.push(command);
            }
            if !self.eat(TokenKind::Semicolon) {
                break;
            }
        }
        commands
    }

    /// Locate one command. Its body is scanned so that `;` inside braces or
    /// brackets does not end it, but splitting into arguments waits until
    /// the command definition is known.
    fn command(&mut self, stop: &'static [TokenKind]) -> CommandNode {
        while self.stream.peek_kind() == TokenKind::Whitespace {
            self.stream.advance();
        }
        let body = self.evaluation_string(Scope::new(stop, false, BraceMode::Literal));
        let mut end = body.span.end;
        if let Some(Node::Text(last)) = body.nodes.last() {
            let text: Vec<char> = self.input.chars().skip(last.start).take(last.len()).collect();
            let trailing = text.iter().rev().take_while(|c| c.is_whitespace()).count();
            end -= trailing;
        }
        CommandNode {
            span: Span::new(body.span.start, end),
        }
    }

    fn comma_args(&mut self) -> Vec<Argument> {
        let mut args = vec![self.command_arg(COMMA)];
        while self.eat(TokenKind::Comma) {
            args.push(self.command_arg(COMMA));
        }
        args
    }

    fn command_arg(&mut self, stop: &'static [TokenKind]) -> Argument {
        self.evaluation_string(Scope::new(stop, true, BraceMode::Literal))
    }

    fn evaluation_string(&mut self, scope: Scope) -> Argument {
        if scope.stop == FUNCTION_ARG {
            while self.stream.peek_kind() == TokenKind::Whitespace {
                self.stream.advance();
            }
        }
        let start = self.stream.peek().span.start;
        let mut nodes = Vec::new();
        let mut parens = 0usize;
        let mut first = true;

        loop {
            let kind = self.stream.peek_kind();
            if kind == TokenKind::Eof || (parens == 0 && scope.stop.contains(&kind)) {
                break;
            }
            match kind {
                TokenKind::FunctionHead if first && scope.function_check => {
                    let function = self.function();
                    nodes.push(Node::Function(function));
                }
                TokenKind::FunctionHead | TokenKind::OpenParen => {
                    if scope.nests_parens() {
                        parens += 1;
                    }
                    let token = self.stream.advance();
                    push_text(&mut nodes, token.span);
                }
                TokenKind::CloseParen => {
                    parens = parens.saturating_sub(1);
                    let token = self.stream.advance();
                    push_text(&mut nodes, token.span);
                }
                TokenKind::OpenBracket => nodes.push(self.bracket()),
                TokenKind::OpenBrace => nodes.push(self.brace(scope.braces)),
                TokenKind::Escape => {
                    let token = self.stream.advance();
                    nodes.push(Node::Escape(Span::new(token.span.start + 1, token.span.end)));
                }
                TokenKind::Substitution => {
                    let token = self.stream.advance();
                    if let Some(sub) = token.substitution {
                        nodes.push(Node::Substitution(sub, token.span));
                    }
                }
                _ => {
                    let token = self.stream.advance();
                    push_text(&mut nodes, token.span);
                }
            }
            first = false;
        }

        let end = self.stream.peek().span.start;
        Argument {
            nodes,
            span: Span::new(start, end.max(start)),
        }
    }

    fn function(&mut self) -> FunctionNode {
        let head = self.stream.advance();
        let name = head.text.trim_end_matches('(').to_string();
        let name_span = Span::new(head.span.start, head.span.end - 1);
        let mut args = Vec::new();

        loop {
            args.push(self.evaluation_string(Scope::new(FUNCTION_ARG, true, BraceMode::Strip)));
            match self.stream.peek_kind() {
                TokenKind::Comma => {
                    self.stream.advance();
                }
                TokenKind::CloseParen => {
                    self.stream.advance();
                    break;
                }
                _ => {
                    self.error_at_current(
                        &head,
                        format!("Missing ')' in call to function {}", name),
                        &[TokenKind::Comma, TokenKind::CloseParen],
                    );
                    break;
                }
            }
        }

        let end = self.last_end();
        FunctionNode {
            name,
            name_span,
            args,
            span: Span::new(head.span.start, end),
        }
    }

    fn bracket(&mut self) -> Node {
        let open = self.stream.advance();
        let body = self.evaluation_string(Scope::new(BRACKET, true, BraceMode::Strip));
        if !self.eat(TokenKind::CloseBracket) {
            self.error_at_current(&open, "Unclosed '['".to_string(), &[TokenKind::CloseBracket]);
        }
        Node::Bracket(body.nodes, Span::new(open.span.start, self.last_end()))
    }

    fn brace(&mut self, mode: BraceMode) -> Node {
        let open = self.stream.advance();
        let body = self.evaluation_string(Scope::new(BRACE, false, BraceMode::Keep));
        if !self.eat(TokenKind::CloseBrace) {
            self.error_at_current(&open, "Unclosed '{'".to_string(), &[TokenKind::CloseBrace]);
        }
        Node::Brace(BraceNode {
            body: body.nodes,
            span: Span::new(open.span.start, self.last_end()),
            inner: body.span,
            mode,
        })
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.stream.peek_kind() == kind {
            self.stream.advance();
            true
        } else {
            false
        }
    }

    /// End offset of the most recently consumed token
    fn last_end(&self) -> usize {
        self.stream
            .index()
            .checked_sub(1)
            .and_then(|i| self.stream.get(i))
            .map_or(0, |t| t.span.end)
    }

    fn error_at_current(&mut self, opener: &Token, message: String, expected: &[TokenKind]) {
        let current = self.stream.peek().clone();
        let at = self.lines.position(current.span.start);
        self.errors.push(SyntaxError {
            line: at.line,
            column: at.character,
            range: self.lines.range(opener.span.start, current.span.end.max(current.span.start)),
            message,
            offending_token: Some(if current.kind == TokenKind::Eof {
                "<EOF>".to_string()
            } else {
                current.text.clone()
            }),
            expected_tokens: expected.iter().map(|k| k.describe().to_string()).collect(),
            input_text: self.input.clone(),
        });
    }
}

/// Append a text span, merging with a directly preceding text node
fn push_text(nodes: &mut Vec<Node>, span: Span) {
    if let Some(Node::Text(prev)) = nodes.last_mut() {
        if prev.end == span.start {
            prev.end = span.end;
            return;
        }
    }
    nodes.push(Node::Text(span));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expression(input: &str) -> Argument {
        match parse_strict(input, ParseRule::Function).unwrap() {
            Tree::Expression(arg) => arg,
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_function_then_bracket() {
        let expr = expression("add(1,2)[add(5,5)]");
        assert_eq!(expr.nodes.len(), 2);
        match &expr.nodes[0] {
            Node::Function(f) => {
                assert_eq!(f.name, "add");
                assert_eq!(f.args.len(), 2);
                assert_eq!(f.span, Span::new(0, 8));
            }
            other => panic!("expected function, got {:?}", other),
        }
        assert!(matches!(&expr.nodes[1], Node::Bracket(body, _) if matches!(body[0], Node::Function(_))));
    }

    #[test]
    fn test_function_only_at_start() {
        let expr = expression("abc add(1,2)");
        assert_eq!(expr.nodes, vec![Node::Text(Span::new(0, 12))]);
    }

    #[test]
    fn test_brace_modes() {
        let expr = expression("strcat(a,{{c,d}})");
        let Node::Function(f) = &expr.nodes[0] else {
            panic!("expected function");
        };
        assert_eq!(f.args.len(), 2);
        let Node::Brace(outer) = &f.args[1].nodes[0] else {
            panic!("expected brace");
        };
        assert_eq!(outer.mode, BraceMode::Strip);
        let Node::Brace(inner) = &outer.body[0] else {
            panic!("expected nested brace");
        };
        assert_eq!(inner.mode, BraceMode::Keep);
    }

    #[test]
    fn test_plain_parens_do_not_split() {
        let expr = expression("strcat(a (b,c) d)");
        let Node::Function(f) = &expr.nodes[0] else {
            panic!("expected function");
        };
        assert_eq!(f.args.len(), 1);
    }

    #[test]
    fn test_command_list_respects_groups() {
        let tree = parse_strict("think a; @pemit me={b;c} ;think [strcat(d;e)]", ParseRule::CommandList)
            .unwrap();
        let Tree::CommandList(commands) = tree else {
            panic!("expected command list");
        };
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].span, Span::new(0, 7));
        assert_eq!(commands[1].span, Span::new(9, 24));
    }

    #[test]
    fn test_eq_split_args() {
        let tree = parse_strict("#1=a,{b,c},d", ParseRule::EqSplitArgs).unwrap();
        let Tree::EqSplitArgs { left, right } = tree else {
            panic!("expected eq split");
        };
        assert_eq!(left.span, Span::new(0, 2));
        assert_eq!(right.map(|r| r.len()), Some(3));
    }

    #[test]
    fn test_eq_split_command_keeps_later_equals() {
        let tree = parse_strict("me=a=b", ParseRule::EqSplitCommand).unwrap();
        let Tree::EqSplitCommand { right, .. } = tree else {
            panic!("expected eq split command");
        };
        assert_eq!(right.map(|r| r.span), Some(Span::new(3, 6)));
    }

    #[test]
    fn test_errors_are_collected() {
        let output = parse("add(1,2", ParseRule::Function);
        assert_eq!(output.errors.len(), 1);
        let err = &output.errors[0];
        assert_eq!((err.line, err.column), (0, 7));
        assert_eq!(err.offending_token.as_deref(), Some("<EOF>"));
        assert_eq!(err.expected_tokens, vec!["','", "')'"]);

        let output = parse("nested(call[test)", ParseRule::Function);
        assert_eq!(output.errors.len(), 2);

        assert!(parse("test[unclosed", ParseRule::Function).errors[0]
            .message
            .contains('['));
        assert!(parse("func{missing", ParseRule::Function).errors[0]
            .message
            .contains('{'));
    }

    #[test]
    fn test_strict_mode_raises() {
        let err = parse_strict("x[y", ParseRule::Function).unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 0, column: 3, .. }));
    }

    #[test]
    fn test_unbalanced_paren_inside_braces() {
        let expr = expression("strcat({a(b},c)");
        let Node::Function(f) = &expr.nodes[0] else {
            panic!("expected function");
        };
        assert_eq!(f.args.len(), 2);
        assert!(matches!(&f.args[0].nodes[0], Node::Brace(b) if b.inner == Span::new(8, 11)));
    }

    #[test]
    fn test_paren_in_command_does_not_swallow_semicolon() {
        let tree = parse_strict("think {:(};think b", ParseRule::CommandList).unwrap();
        let Tree::CommandList(commands) = tree else {
            panic!("expected command list");
        };
        assert_eq!(commands.len(), 2);

        let tree = parse_strict("think :(;think b", ParseRule::CommandList).unwrap();
        let Tree::CommandList(commands) = tree else {
            panic!("expected command list");
        };
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].span, Span::new(0, 8));
    }

    #[test]
    fn test_leading_space_before_argument_function() {
        let expr = expression("strcat( add(1,2), x)");
        let Node::Function(f) = &expr.nodes[0] else {
            panic!("expected function");
        };
        assert!(matches!(&f.args[0].nodes[0], Node::Function(inner) if inner.name == "add"));
        assert_eq!(f.args[1].nodes, vec![Node::Text(Span::new(18, 19))]);
    }

    #[test]
    fn test_stray_closers_are_text() {
        let expr = expression("a)b]c}");
        assert_eq!(expr.nodes, vec![Node::Text(Span::new(0, 6))]);
    }
}
