//! Parse tree for softcode expressions and commands
//!
//! Nodes carry character spans into the source text rather than copies of
//! it, so evaluation can slice the original markup string and keep its
//! formatting.

/// Character range `start..end` in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Pronoun substitutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pronoun {
    Subjective,
    Objective,
    Possessive,
    Absolute,
}

/// A `%`-substitution
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Substitution {
    /// `%0` - `%9`
    Argument(usize),
    /// `%qX` or `%q<name>`
    Register(String),
    /// `%iN`
    Iteration(usize),
    /// `%$N` or `%$<name>`
    RegexCapture(String),
    /// `%va` .. `%xz`
    AttributeRegister(String),
    Space,
    Newline,
    Tab,
    Percent,
    Enactor,
    Executor,
    Caller,
    EnactorName { capitalized: bool },
    Moniker,
    AccentedName,
    Pronoun { kind: Pronoun, capitalized: bool },
    Location,
    CurrentCommand,
    ArgumentCount,
    InvocationDepth,
    /// Any other `%X`, which stands for `X`
    Literal(char),
}

/// How a `{...}` group evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BraceMode {
    /// Outermost group of an evaluation string: braces removed, body evaluated
    Strip,
    /// Nested group: braces kept, body evaluated
    Keep,
    /// Command argument group: braces removed, body passed through untouched
    Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(Span),
    /// `\X`; the span covers `X` only
    Escape(Span),
    Substitution(Substitution, Span),
    Function(FunctionNode),
    /// `[...]`
    Bracket(Vec<Node>, Span),
    Brace(BraceNode),
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Text(span) | Node::Escape(span) => *span,
            Node::Substitution(_, span) | Node::Bracket(_, span) => *span,
            Node::Function(f) => f.span,
            Node::Brace(b) => b.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionNode {
    pub name: String,
    pub name_span: Span,
    pub args: Vec<Argument>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BraceNode {
    pub body: Vec<Node>,
    /// Including the braces
    pub span: Span,
    /// Between the braces
    pub inner: Span,
    pub mode: BraceMode,
}

/// One evaluation string: a function argument, a command argument, or a
/// whole function expression
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Argument {
    pub nodes: Vec<Node>,
    pub span: Span,
}

/// A single command, located but not yet split into name and arguments.
/// The command definition decides how its arguments are parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandNode {
    pub span: Span,
}

/// Result of parsing with one entry rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tree {
    Expression(Argument),
    Command(CommandNode),
    CommandList(Vec<CommandNode>),
    CommaArgs(Vec<Argument>),
    EqSplitArgs {
        left: Argument,
        right: Option<Vec<Argument>>,
    },
    EqSplitCommand {
        left: Argument,
        right: Option<Argument>,
    },
}
