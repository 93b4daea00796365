//! Tree-walking evaluator
//!
//! One [`EvalContext`] lives for one top-level evaluation. It carries the
//! limit ceilings in force when the evaluation started and the cumulative
//! counters that bound its breadth; depth and per-name recursion ride on
//! the frames themselves. A limit violation or cancellation unwinds the
//! whole walk as [`Abort`]; everything else is an in-band value.

use crate::ast::{Argument, BraceMode, FunctionNode, Node, Pronoun, Substitution, Tree};
use crate::attributes::{AttributePath, AttributeResolver};
use crate::context::Services;
use crate::error::{Abort, LimitKind};
use crate::frame::{AttributeRef, CallResult, Frame, FrameStack};
use crate::lock::LockService;
use crate::parser::{self, ParseRule, SyntaxError};
use crate::registry::FunctionBody;
use crate::services::Callee;
use crate::{Result, ScriptError};
use async_recursion::async_recursion;
use mush_config::{ConfigHandle, LimitOptions};
use mush_core::{DbRef, MString};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const PERMISSION_DENIED: &str = "#-1 PERMISSION DENIED";
pub const NO_SUCH_OBJECT: &str = "#-1 NO SUCH OBJECT VISIBLE";
pub const NO_SUCH_ATTRIBUTE: &str = "#-1 NO SUCH ATTRIBUTE";

struct EngineInner {
    services: Services,
    config: ConfigHandle,
    resolver: AttributeResolver,
    locks: LockService,
}

/// Entry points for evaluating softcode. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// How a top-level evaluation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    Completed,
    LimitExceeded(LimitKind),
    SyntaxError,
}

/// Result of a top-level evaluation.
///
/// For anything but [`EvalState::Completed`], `values` holds exactly one
/// terminal message and nothing else.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub state: EvalState,
    pub values: Vec<CallResult>,
    pub errors: Vec<SyntaxError>,
}

impl Evaluation {
    fn completed(values: Vec<CallResult>) -> Self {
        Self {
            state: EvalState::Completed,
            values,
            errors: Vec::new(),
        }
    }

    fn limit_exceeded(kind: LimitKind) -> Self {
        Self {
            state: EvalState::LimitExceeded(kind),
            values: vec![CallResult::new(MString::from(kind.message()), 0)],
            errors: Vec::new(),
        }
    }

    fn syntax_error(errors: Vec<SyntaxError>) -> Self {
        let message = errors
            .first()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown");
        Self {
            state: EvalState::SyntaxError,
            values: vec![CallResult::new(
                MString::from(format!("#-1 SYNTAX ERROR: {}", message)),
                0,
            )],
            errors,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == EvalState::Completed
    }

    /// All values, space separated
    pub fn message(&self) -> MString {
        MString::join(self.values.iter().map(|v| &v.message), &MString::from(" "))
    }
}

impl Engine {
    pub fn new(services: Services, config: ConfigHandle) -> Self {
        let resolver = AttributeResolver::new(
            Arc::clone(&services.objects),
            Arc::clone(&services.attributes),
            config.clone(),
        );
        let locks = LockService::new(Arc::clone(&services.lock_environment));
        Self {
            inner: Arc::new(EngineInner {
                services,
                config,
                resolver,
                locks,
            }),
        }
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.inner.config
    }

    pub fn resolver(&self) -> &AttributeResolver {
        &self.inner.resolver
    }

    pub fn locks(&self) -> &LockService {
        &self.inner.locks
    }

    /// Parse `text` with `rule` and evaluate it from `frame`.
    ///
    /// Only cancellation is an `Err`; syntax errors and exceeded limits
    /// come back as an [`Evaluation`] carrying one terminal message.
    pub async fn evaluate(
        &self,
        text: &MString,
        rule: ParseRule,
        frame: Frame,
        cancel: &CancellationToken,
    ) -> Result<Evaluation> {
        let executor = frame.executor;
        let output = parser::parse(text.plain(), rule);
        let evaluation = if output.is_ok() {
            let ctx = EvalContext::new(self.clone(), cancel.clone());
            let stack = FrameStack::new(frame);
            match ctx.eval_tree(text, &output.tree, &stack).await {
                Ok(values) => Evaluation::completed(values),
                Err(Abort::Limit(kind)) => {
                    tracing::warn!(
                        "Evaluation for {} aborted: {:?} limit ({} invocations, {} nodes)",
                        executor,
                        kind,
                        ctx.invocations(),
                        ctx.nodes()
                    );
                    Evaluation::limit_exceeded(kind)
                }
                Err(Abort::Cancelled) => return Err(ScriptError::Cancelled),
            }
        } else {
            tracing::debug!("Syntax errors in {:?} parse: {}", rule, output.errors.len());
            Evaluation::syntax_error(output.errors)
        };

        if is_command_rule(rule) && !evaluation.is_completed() {
            self.services()
                .notifier
                .notify(executor, executor, evaluation.message())
                .await;
        }
        Ok(evaluation)
    }

    pub async fn function_parse(&self, text: &str, frame: Frame, cancel: &CancellationToken) -> Result<Evaluation> {
        self.evaluate(&MString::from(text), ParseRule::Function, frame, cancel)
            .await
    }

    pub async fn command_parse(&self, text: &str, frame: Frame, cancel: &CancellationToken) -> Result<Evaluation> {
        self.evaluate(&MString::from(text), ParseRule::SingleCommand, frame, cancel)
            .await
    }

    pub async fn command_list_parse(
        &self,
        text: &str,
        frame: Frame,
        cancel: &CancellationToken,
    ) -> Result<Evaluation> {
        self.evaluate(&MString::from(text), ParseRule::CommandList, frame, cancel)
            .await
    }

    pub async fn comma_args_parse(&self, text: &str, frame: Frame, cancel: &CancellationToken) -> Result<Evaluation> {
        self.evaluate(&MString::from(text), ParseRule::CommaArgs, frame, cancel)
            .await
    }

    pub async fn eq_split_args_parse(
        &self,
        text: &str,
        frame: Frame,
        cancel: &CancellationToken,
    ) -> Result<Evaluation> {
        self.evaluate(&MString::from(text), ParseRule::EqSplitArgs, frame, cancel)
            .await
    }

    pub async fn eq_split_command_parse(
        &self,
        text: &str,
        frame: Frame,
        cancel: &CancellationToken,
    ) -> Result<Evaluation> {
        self.evaluate(&MString::from(text), ParseRule::EqSplitCommand, frame, cancel)
            .await
    }

    /// Run a command typed on a connection as the player bound to it
    pub async fn command_parse_for_handle(
        &self,
        handle: u64,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Evaluation> {
        let bound = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScriptError::Cancelled),
            player = self.services().connections.bound_player(handle) => player,
        };
        let player = bound.ok_or_else(|| {
            ScriptError::Collaborator(format!("no player bound to connection {}", handle))
        })?;
        self.command_parse(text, Frame::for_connection(player, handle), cancel)
            .await
    }
}

fn is_command_rule(rule: ParseRule) -> bool {
    matches!(rule, ParseRule::SingleCommand | ParseRule::CommandList)
}

/// State of one top-level evaluation
pub struct EvalContext {
    engine: Engine,
    limits: LimitOptions,
    invocations: AtomicUsize,
    nodes: AtomicUsize,
    cancel: CancellationToken,
}

impl EvalContext {
    pub fn new(engine: Engine, cancel: CancellationToken) -> Self {
        let limits = engine.config().snapshot().limits;
        Self {
            engine,
            limits,
            invocations: AtomicUsize::new(0),
            nodes: AtomicUsize::new(0),
            cancel,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn services(&self) -> &Services {
        self.engine.services()
    }

    pub fn limits(&self) -> &LimitOptions {
        &self.limits
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn nodes(&self) -> usize {
        self.nodes.load(Ordering::Relaxed)
    }

    /// Await a collaborator call, giving up if the evaluation is cancelled
    pub async fn guard<F: Future>(&self, fut: F) -> std::result::Result<F::Output, Abort> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Abort::Cancelled),
            out = fut => Ok(out),
        }
    }

    pub fn check_cancel(&self) -> std::result::Result<(), Abort> {
        if self.cancel.is_cancelled() {
            Err(Abort::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn count_invocation(&self) -> std::result::Result<(), Abort> {
        let count = self.invocations.fetch_add(1, Ordering::Relaxed) + 1;
        if count > self.limits.function_invocation_limit {
            return Err(Abort::Limit(LimitKind::Invocation));
        }
        Ok(())
    }

    fn count_node(&self) -> std::result::Result<(), Abort> {
        let count = self.nodes.fetch_add(1, Ordering::Relaxed) + 1;
        if count > self.limits.call_limit {
            return Err(Abort::Limit(LimitKind::CallLimit));
        }
        Ok(())
    }

    /// Frame for entering a named scope, checked against depth and recursion
    pub(crate) fn enter(&self, stack: &FrameStack, name: &str) -> std::result::Result<Frame, Abort> {
        let frame = stack.top().entering_function(name);
        if frame.depth > self.limits.max_depth {
            return Err(Abort::Limit(LimitKind::Depth));
        }
        if frame.recursion_count(name) > self.limits.function_recursion_limit {
            return Err(Abort::Limit(LimitKind::Recursion));
        }
        Ok(frame)
    }

    async fn eval_tree(
        &self,
        source: &MString,
        tree: &Tree,
        stack: &FrameStack,
    ) -> std::result::Result<Vec<CallResult>, Abort> {
        let depth = stack.top().depth;
        let mut values = Vec::new();
        match tree {
            Tree::Expression(arg) => {
                values.push(CallResult::new(self.eval_nodes(source, &arg.nodes, stack).await?, depth));
            }
            Tree::Command(command) => self.run_command(source, command.span, stack).await?,
            Tree::CommandList(commands) => {
                for command in commands {
                    self.run_command(source, command.span, stack).await?;
                }
            }
            Tree::CommaArgs(args) => {
                for arg in args {
                    values.push(CallResult::new(self.eval_nodes(source, &arg.nodes, stack).await?, depth));
                }
            }
            Tree::EqSplitArgs { left, right } => {
                values.push(CallResult::new(self.eval_nodes(source, &left.nodes, stack).await?, depth));
                for arg in right.iter().flatten() {
                    values.push(CallResult::new(self.eval_nodes(source, &arg.nodes, stack).await?, depth));
                }
            }
            Tree::EqSplitCommand { left, right } => {
                values.push(CallResult::new(self.eval_nodes(source, &left.nodes, stack).await?, depth));
                if let Some(right) = right {
                    values.push(CallResult::new(self.eval_nodes(source, &right.nodes, stack).await?, depth));
                }
            }
        }
        Ok(values)
    }

    /// Evaluate parsed nodes whose spans index into `source`
    #[async_recursion]
    pub async fn eval_nodes(
        &self,
        source: &MString,
        nodes: &[Node],
        stack: &FrameStack,
    ) -> std::result::Result<MString, Abort> {
        let mut out = MString::new();
        for node in nodes {
            self.count_node()?;
            match node {
                Node::Text(span) | Node::Escape(span) => out.push(&source.slice(span.start, span.end)),
                Node::Substitution(sub, _) => out.push(&self.substitute(sub, stack).await?),
                Node::Function(function) => {
                    out.push(&self.eval_function(source, function, stack).await?)
                }
                Node::Bracket(body, _) => out.push(&self.eval_nodes(source, body, stack).await?),
                Node::Brace(brace) => match brace.mode {
                    BraceMode::Strip => out.push(&self.eval_nodes(source, &brace.body, stack).await?),
                    BraceMode::Keep => {
                        out.push_str("{");
                        out.push(&self.eval_nodes(source, &brace.body, stack).await?);
                        out.push_str("}");
                    }
                    BraceMode::Literal => out.push(&source.slice(brace.inner.start, brace.inner.end)),
                },
            }
        }
        Ok(out)
    }

    /// Parse `text` as a function expression and evaluate it
    pub async fn evaluate_text(&self, text: &MString, stack: &FrameStack) -> std::result::Result<MString, Abort> {
        let output = parser::parse(text.plain(), ParseRule::Function);
        if let Some(error) = output.errors.first() {
            return Ok(MString::from(format!("#-1 SYNTAX ERROR: {}", error.message)));
        }
        match &output.tree {
            Tree::Expression(arg) => self.eval_nodes(text, &arg.nodes, stack).await,
            _ => Ok(MString::new()),
        }
    }

    async fn eval_function(
        &self,
        source: &MString,
        node: &FunctionNode,
        stack: &FrameStack,
    ) -> std::result::Result<MString, Abort> {
        self.check_cancel()?;
        let name = node.name.to_ascii_lowercase();
        let Some(definition) = self.services().functions.get(&name) else {
            return Ok(MString::from(format!(
                "#-1 FUNCTION ({}) NOT FOUND",
                name.to_ascii_uppercase()
            )));
        };

        self.count_invocation()?;
        let frame = self.enter(stack, &name)?;
        tracing::debug!("Calling {}() at depth {}", name, frame.depth);
        let inner = stack.push(frame);

        let args: &[Argument] = match node.args.as_slice() {
            [only] if only.nodes.is_empty() => &[],
            args => args,
        };
        if let Some(error) = definition.arity_error(args.len()) {
            return Ok(error);
        }

        if let Some(capability) = definition.requires {
            let callee = Callee {
                name: name.clone(),
                requires: Some(capability),
            };
            let executor = inner.top().executor;
            if !self
                .guard(self.services().permissions.can_execute(executor, &callee))
                .await?
            {
                return Ok(MString::from(PERMISSION_DENIED));
            }
        }

        let mut values = Vec::with_capacity(args.len());
        if !definition.flags.no_parse {
            for arg in args {
                values.push(self.eval_nodes(source, &arg.nodes, &inner).await?);
            }
        }

        match &definition.body {
            FunctionBody::Native(body) => Ok(body(&values)),
            FunctionBody::Engine(body) => {
                body(FunctionCall {
                    name: &name,
                    ctx: self,
                    source,
                    args,
                    values,
                    stack: &inner,
                })
                .await
            }
            FunctionBody::User { object, attribute } => match attribute.parse::<AttributePath>() {
                Ok(path) => self.call_attribute(*object, &path, values, &inner, false).await,
                Err(_) => Ok(MString::from(NO_SUCH_ATTRIBUTE)),
            },
        }
    }

    /// Evaluate an attribute's text as `object`, with `args` as `%0`-`%9`.
    ///
    /// A missing attribute evaluates to nothing. With `local`, register
    /// changes made inside stay inside.
    pub async fn call_attribute(
        &self,
        object: DbRef,
        path: &AttributePath,
        args: Vec<MString>,
        stack: &FrameStack,
        local: bool,
    ) -> std::result::Result<MString, Abort> {
        let resolution = self
            .guard(self.engine.resolver().resolve(object, path, true))
            .await?;
        let Some(found) = resolution.found() else {
            return Ok(MString::new());
        };

        let executor = stack.top().executor;
        let visual = found.attribute().is_some_and(|a| a.flags.visual);
        if !visual
            && !self
                .guard(self.services().permissions.can_examine(executor, object))
                .await?
        {
            return Ok(MString::from(PERMISSION_DENIED));
        }

        let mut frame = stack
            .top()
            .with_executor(object)
            .with_arguments(args)
            .with_attribute(AttributeRef {
                object,
                path: path.to_string(),
            });
        if local {
            frame = frame.with_local_registers();
        }
        self.evaluate_text(&found.value(), &stack.push(frame)).await
    }

    async fn object_name(&self, dbref: DbRef) -> std::result::Result<MString, Abort> {
        let object = self.guard(self.services().objects.object(dbref)).await?;
        Ok(object.map(|o| MString::from(o.name)).unwrap_or_default())
    }

    async fn substitute(&self, sub: &Substitution, stack: &FrameStack) -> std::result::Result<MString, Abort> {
        let frame = stack.top();
        let value = match sub {
            Substitution::Argument(index) => frame.argument(*index),
            Substitution::Register(name) => frame.registers.get(name).unwrap_or_default(),
            Substitution::Iteration(level) => frame
                .iteration_register(*level)
                .map(|r| r.value.clone())
                .unwrap_or_default(),
            Substitution::RegexCapture(name) => frame.capture(name).unwrap_or_default(),
            Substitution::AttributeRegister(name) => {
                let path = AttributePath::new([name]);
                self.guard(self.engine.resolver().resolve(frame.executor, &path, true))
                    .await?
                    .found()
                    .map(|found| found.value())
                    .unwrap_or_default()
            }
            Substitution::Space => MString::from(" "),
            Substitution::Newline => MString::from("\n"),
            Substitution::Tab => MString::from("\t"),
            Substitution::Percent => MString::from("%"),
            Substitution::Enactor => MString::from(frame.enactor.to_string()),
            Substitution::Executor => MString::from(frame.executor.to_string()),
            Substitution::Caller => MString::from(frame.caller.to_string()),
            Substitution::EnactorName { capitalized } => {
                let name = self.object_name(frame.enactor).await?;
                if *capitalized {
                    capitalize(name.plain())
                } else {
                    name
                }
            }
            Substitution::Moniker | Substitution::AccentedName => self.object_name(frame.enactor).await?,
            Substitution::Pronoun { kind, capitalized } => {
                let sex = self
                    .guard(self.engine.resolver().resolve(frame.enactor, &AttributePath::new(["SEX"]), true))
                    .await?
                    .found()
                    .map(|found| found.value().into_plain())
                    .unwrap_or_default();
                let word = pronoun(&sex, *kind);
                if *capitalized {
                    capitalize(word)
                } else {
                    MString::from(word)
                }
            }
            Substitution::Location => {
                let object = self.guard(self.services().objects.object(frame.executor)).await?;
                let location = object.and_then(|o| o.location).unwrap_or(DbRef::NOTHING);
                MString::from(location.to_string())
            }
            Substitution::CurrentCommand => MString::from(frame.command.as_deref().unwrap_or("")),
            Substitution::ArgumentCount => MString::from(frame.arguments.len().to_string()),
            Substitution::InvocationDepth => {
                MString::from(format!("{} {}", self.invocations(), frame.depth))
            }
            Substitution::Literal(c) => MString::from(c.to_string()),
        };
        Ok(value)
    }
}

fn capitalize(text: &str) -> MString {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => MString::from(first.to_uppercase().chain(chars).collect::<String>()),
        None => MString::new(),
    }
}

fn pronoun(sex: &str, kind: Pronoun) -> &'static str {
    let forms = match sex.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('m') => ["he", "him", "his", "his"],
        Some('f') | Some('w') => ["she", "her", "her", "hers"],
        Some('p') => ["they", "them", "their", "theirs"],
        _ => ["it", "it", "its", "its"],
    };
    match kind {
        Pronoun::Subjective => forms[0],
        Pronoun::Objective => forms[1],
        Pronoun::Possessive => forms[2],
        Pronoun::Absolute => forms[3],
    }
}

/// What an engine-aware function body receives
pub struct FunctionCall<'a> {
    pub name: &'a str,
    pub ctx: &'a EvalContext,
    pub source: &'a MString,
    pub args: &'a [Argument],
    /// Evaluated arguments; empty for `no_parse` functions
    pub values: Vec<MString>,
    pub stack: &'a FrameStack,
}

impl<'a> FunctionCall<'a> {
    pub fn arg(&self, index: usize) -> MString {
        self.values.get(index).cloned().unwrap_or_default()
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn frame(&self) -> &Frame {
        self.stack.top()
    }

    /// Argument text exactly as written
    pub fn raw(&self, index: usize) -> MString {
        self.args
            .get(index)
            .map(|arg| self.source.slice(arg.span.start, arg.span.end))
            .unwrap_or_default()
    }

    /// Evaluate an argument on demand, for `no_parse` functions
    pub async fn evaluate(&self, index: usize) -> std::result::Result<MString, Abort> {
        self.evaluate_in(index, self.stack).await
    }

    pub async fn evaluate_in(&self, index: usize, stack: &FrameStack) -> std::result::Result<MString, Abort> {
        match self.args.get(index) {
            Some(arg) => self.ctx.eval_nodes(self.source, &arg.nodes, stack).await,
            None => Ok(MString::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::standard_functions;
    use crate::commands::standard_commands;
    use crate::memory::MemoryWorld;
    use mush_config::EngineConfig;
    use mush_core::ObjectType;

    struct Fixture {
        world: Arc<MemoryWorld>,
        engine: Engine,
        wizard: DbRef,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        fn with_config(config: EngineConfig) -> Self {
            let world = Arc::new(MemoryWorld::new());
            let (_, wizard) = world.bootstrap();
            let services = Services::from_world(
                world.clone(),
                Arc::new(standard_functions()),
                Arc::new(standard_commands()),
            );
            let engine = Engine::new(services, ConfigHandle::new(config));
            Self { world, engine, wizard }
        }

        fn frame(&self) -> Frame {
            Frame::new(self.wizard, self.wizard, self.wizard)
        }

        async fn eval(&self, text: &str) -> Evaluation {
            self.engine
                .function_parse(text, self.frame(), &CancellationToken::new())
                .await
                .unwrap()
        }

        async fn value(&self, text: &str) -> String {
            self.eval(text).await.message().into_plain()
        }
    }

    fn limits(apply: impl FnOnce(&mut LimitOptions)) -> EngineConfig {
        let mut config = EngineConfig::default();
        apply(&mut config.limits);
        config
    }

    #[tokio::test]
    async fn test_bracket_splices_text() {
        let fx = Fixture::new();
        assert_eq!(fx.value("add(1,2)[add(5,5)]").await, "310");
        assert_eq!(fx.value("before [add(1,1)] after").await, "before 2 after");
    }

    #[tokio::test]
    async fn test_brace_splitting() {
        let fx = Fixture::new();
        assert_eq!(fx.value("strcat(a,b,{c,def})").await, "abc,def");
        assert_eq!(fx.value("strcat(a,b,{{c,def}})").await, "ab{c,def}");
    }

    #[tokio::test]
    async fn test_braces_hide_unbalanced_parens() {
        let fx = Fixture::new();
        assert_eq!(fx.value("strcat({a(b},c)").await, "a(bc");
        assert_eq!(fx.value("strcat({:(},x)").await, ":(x");
    }

    #[tokio::test]
    async fn test_leading_space_in_arguments() {
        let fx = Fixture::new();
        assert_eq!(fx.value("strcat( add(1,2))").await, "3");
        assert_eq!(fx.value("strcat(a, b,  c)").await, "abc");
    }

    #[tokio::test]
    async fn test_escapes() {
        let fx = Fixture::new();
        assert_eq!(fx.value(r"strcat(foo\,dog)").await, "foo,dog");
        assert_eq!(fx.value(r"strcat(foo\\,dog)").await, r"foo\dog");
        assert_eq!(fx.value(r"\[add(1,1)]").await, "[add(1,1)]");
    }

    #[tokio::test]
    async fn test_function_only_at_start() {
        let fx = Fixture::new();
        assert_eq!(fx.value("x add(1,2)").await, "x add(1,2)");
        assert_eq!(fx.value("strcat(a,x b(c,d))").await, "ax b(c,d)");
    }

    #[tokio::test]
    async fn test_in_band_errors() {
        let fx = Fixture::new();
        assert_eq!(fx.value("nosuch(1)").await, "#-1 FUNCTION (NOSUCH) NOT FOUND");
        assert_eq!(fx.value("abs(1,2)").await, "#-1 FUNCTION (ABS) EXPECTS 1 ARGUMENTS");
        assert_eq!(fx.value("strcat(x,nosuch())").await, "x#-1 FUNCTION (NOSUCH) NOT FOUND");
        assert!(fx.eval("nosuch(1)").await.is_completed());
    }

    #[tokio::test]
    async fn test_empty_call_has_no_arguments() {
        let fx = Fixture::new();
        assert_eq!(fx.value("words()").await, "0");
        assert_eq!(fx.value("strcat(,x)").await, "x");
    }

    #[tokio::test]
    async fn test_syntax_error_is_terminal() {
        let fx = Fixture::new();
        let result = fx.eval("add(1,2").await;
        assert_eq!(result.state, EvalState::SyntaxError);
        assert_eq!(result.values.len(), 1);
        assert!(result.message().plain().starts_with("#-1 SYNTAX ERROR"));
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_registers_flow_between_siblings() {
        let fx = Fixture::new();
        assert_eq!(fx.value("[setq(a,5)][r(a)]").await, "5");
        assert_eq!(fx.value("[setr(b,7)]-%qb").await, "7-7");
        assert_eq!(fx.value("r(unset)").await, "");
    }

    #[tokio::test]
    async fn test_user_function_arguments() {
        let fx = Fixture::new();
        fx.world.set_attr(fx.wizard, "SUM", "add(%0,%1)");
        assert_eq!(fx.value("u(me/sum,2,3)").await, "5");
        assert_eq!(fx.value("u(sum,4,5)").await, "9");
        assert_eq!(fx.value("u(me/missing)").await, "");
    }

    #[tokio::test]
    async fn test_ulocal_protects_registers() {
        let fx = Fixture::new();
        fx.world.set_attr(fx.wizard, "CLOBBER", "setq(a,2)");
        assert_eq!(fx.value("[setq(a,1)][ulocal(me/clobber)][r(a)]").await, "1");
        assert_eq!(fx.value("[setq(a,1)][u(me/clobber)][r(a)]").await, "2");
    }

    #[tokio::test]
    async fn test_no_parse_skips_untaken_branch() {
        let fx = Fixture::new();
        assert_eq!(fx.value("[if(0,setq(x,1))][r(x)]").await, "");
        assert_eq!(fx.value("ifelse(1,yes,setq(x,1))").await, "yes");
        assert_eq!(fx.value("lit(add(1,2))").await, "add(1,2)");
    }

    #[tokio::test]
    async fn test_self_recursion_hits_recursion_limit() {
        let fx = Fixture::with_config(limits(|l| l.function_recursion_limit = 20));
        fx.world.set_attr(fx.wizard, "LOOP", "u(me/loop)");
        let result = fx.eval("u(me/loop)").await;
        assert_eq!(result.state, EvalState::LimitExceeded(LimitKind::Recursion));
        assert_eq!(result.message().plain(), "#-1 FUNCTION RECURSION LIMIT EXCEEDED");
        assert_eq!(result.values.len(), 1);
    }

    #[tokio::test]
    async fn test_depth_boundary_is_exact() {
        let fx = Fixture::with_config(limits(|l| l.max_depth = 6));
        let nest = |n: usize| format!("{}1{}", "abs(".repeat(n), ")".repeat(n));

        let ok = fx.eval(&nest(6)).await;
        assert!(ok.is_completed());
        assert_eq!(ok.message().plain(), "1");

        let over = fx.eval(&nest(7)).await;
        assert_eq!(over.state, EvalState::LimitExceeded(LimitKind::Depth));
        assert_eq!(over.message().plain(), "#-1 MAXIMUM STACK DEPTH EXCEEDED");
    }

    #[tokio::test]
    async fn test_invocations_accumulate_across_siblings() {
        let fx = Fixture::with_config(limits(|l| l.function_invocation_limit = 10));
        assert!(fx.eval(&"[add(1,1)]".repeat(10)).await.is_completed());
        let result = fx.eval(&"[add(1,1)]".repeat(11)).await;
        assert_eq!(result.state, EvalState::LimitExceeded(LimitKind::Invocation));
    }

    #[tokio::test]
    async fn test_node_budget() {
        let fx = Fixture::with_config(limits(|l| l.call_limit = 50));
        let result = fx.eval(&"x%b".repeat(40)).await;
        assert_eq!(result.state, EvalState::LimitExceeded(LimitKind::CallLimit));
    }

    #[tokio::test]
    async fn test_limits_are_per_evaluation() {
        let fx = Fixture::with_config(limits(|l| l.function_invocation_limit = 5));
        for _ in 0..3 {
            assert_eq!(fx.value("[add(1,1)][add(1,1)][add(1,1)]").await, "222");
        }
    }

    #[tokio::test]
    async fn test_config_reload_applies_to_new_evaluations() {
        let fx = Fixture::new();
        assert!(fx.eval("abs(abs(abs(1)))").await.is_completed());
        fx.engine.config().replace(limits(|l| l.max_depth = 2));
        assert!(!fx.eval("abs(abs(abs(1)))").await.is_completed());
    }

    #[tokio::test]
    async fn test_cancelled_evaluation() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = fx.engine.function_parse("add(1,2)", fx.frame(), &cancel).await;
        assert!(matches!(result, Err(ScriptError::Cancelled)));
    }

    #[tokio::test]
    async fn test_substitutions() {
        let fx = Fixture::new();
        let me = fx.wizard.to_string();
        assert_eq!(fx.value("%#").await, me);
        assert_eq!(fx.value("%!-%@").await, format!("{}-{}", me, me));
        assert_eq!(fx.value("%n").await, "Wizard");
        assert_eq!(fx.value("a%bb%tc%%").await, "a b\tc%");
        assert_eq!(fx.value("%l").await, "#0");
        assert_eq!(fx.value("%z").await, "z");

        fx.world.set_attr(fx.wizard, "SEX", "female");
        assert_eq!(fx.value("%s %o %p %a %S").await, "she her her hers She");
        fx.world.set_attr(fx.wizard, "VA", "stored");
        assert_eq!(fx.value("%va").await, "stored");
    }

    #[tokio::test]
    async fn test_iteration() {
        let fx = Fixture::new();
        assert_eq!(fx.value("iter(a b c,%i0-[inum(0)])").await, "a-1 b-2 c-3");
        assert_eq!(fx.value("iter(a b c,[itext(0)][ibreak()])").await, "a");
        assert_eq!(fx.value("iter(x|y,##,|,;)").await, "##;##");
    }

    #[tokio::test]
    async fn test_capability_check() {
        let fx = Fixture::new();
        let room = fx.world.get(fx.wizard).and_then(|w| w.location).unwrap();
        let mortal = fx.world.create(ObjectType::Player, "Mortal", Some(room));
        fx.world.set_attr(fx.wizard, "HELLO", "hi");
        fx.world.set_attr_flags(fx.wizard, "HELLO", |f| f.visual = true);

        let frame = Frame::new(mortal.dbref, mortal.dbref, mortal.dbref);
        let cancel = CancellationToken::new();
        let out = fx
            .engine
            .function_parse(&format!("u({}/hello)", fx.wizard), frame.clone(), &cancel)
            .await
            .unwrap();
        assert_eq!(out.message().plain(), "hi");

        fx.world.set_attr(fx.wizard, "SECRET", "hidden");
        let out = fx
            .engine
            .function_parse(&format!("get({}/secret)", fx.wizard), frame, &cancel)
            .await
            .unwrap();
        assert_eq!(out.message().plain(), PERMISSION_DENIED);
    }

    #[tokio::test]
    async fn test_handle_parse_seeds_bound_player() {
        let fx = Fixture::new();
        fx.world.connect(42, fx.wizard, "127.0.0.1", "localhost");
        let cancel = CancellationToken::new();
        let result = fx
            .engine
            .command_parse_for_handle(42, "think %#", &cancel)
            .await
            .unwrap();
        assert!(result.is_completed());
        let sent = fx.world.take_notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, fx.wizard);
        assert_eq!(sent[0].message.plain(), fx.wizard.to_string());

        let missing = fx.engine.command_parse_for_handle(7, "think hi", &cancel).await;
        assert!(matches!(missing, Err(ScriptError::Collaborator(_))));
    }

    #[tokio::test]
    async fn test_argument_entry_rules() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        let out = fx
            .engine
            .comma_args_parse("add(1,1),{x,y},z", fx.frame(), &cancel)
            .await
            .unwrap();
        let values: Vec<String> = out.values.iter().map(|v| v.message.plain().to_string()).collect();
        assert_eq!(values, vec!["2", "x,y", "z"]);

        let out = fx
            .engine
            .eq_split_command_parse("left=a=b", fx.frame(), &cancel)
            .await
            .unwrap();
        let values: Vec<String> = out.values.iter().map(|v| v.message.plain().to_string()).collect();
        assert_eq!(values, vec!["left", "a=b"]);

        let out = fx
            .engine
            .eq_split_args_parse("obj=1,2", fx.frame(), &cancel)
            .await
            .unwrap();
        assert_eq!(out.values.len(), 3);
    }

    #[tokio::test]
    async fn test_deterministic() {
        let fx = Fixture::new();
        let text = "strcat(ucstr(abc),[mul(3,4)],{x,y})";
        assert_eq!(fx.value(text).await, fx.value(text).await);
    }
}
