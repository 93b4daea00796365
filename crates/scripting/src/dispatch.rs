//! Command dispatch
//!
//! A command is matched, in order, against single-character prefixes like
//! `&`, then the command registry by name, then `$pattern:action`
//! attributes on nearby objects.

use crate::ast::{Argument, BraceMode, Node, Span, Tree};
use crate::attributes::PatternMarker;
use crate::error::Abort;
use crate::eval::EvalContext;
use crate::frame::{AttributeRef, Frame, FrameStack};
use crate::lock::LockType;
use crate::parser::{self, ParseRule};
use crate::registry::{ArgMode, CommandDefinition, ParseMode};
use crate::services::Callee;
use async_recursion::async_recursion;
use mush_core::{DbRef, MString};
use std::collections::HashMap;

pub const HUH_MESSAGE: &str = "Huh?  (Type \"help\" for help.)";

/// Arguments of a command, split and evaluated per its definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    /// Everything before `=`, or the whole argument for single-argument commands
    pub left: MString,
    /// After `=` for split commands; the list for comma-list commands
    pub args: Vec<MString>,
    pub has_equals: bool,
}

impl CommandArgs {
    pub fn right(&self) -> MString {
        self.args.first().cloned().unwrap_or_default()
    }
}

/// What a command body receives
pub struct CommandCall<'a> {
    pub ctx: &'a EvalContext,
    pub name: &'a str,
    pub switches: &'a [String],
    pub args: CommandArgs,
    pub stack: &'a FrameStack,
}

impl<'a> CommandCall<'a> {
    pub fn frame(&self) -> &Frame {
        self.stack.top()
    }

    pub fn executor(&self) -> DbRef {
        self.stack.top().executor
    }

    pub fn has_switch(&self, switch: &str) -> bool {
        self.switches.iter().any(|s| s.eq_ignore_ascii_case(switch))
    }

    /// Tell the executor something
    pub async fn reply(&self, message: impl Into<MString>) -> Result<(), Abort> {
        let me = self.executor();
        self.ctx
            .guard(self.ctx.services().notifier.notify(me, me, message.into()))
            .await
    }
}

impl EvalContext {
    /// Parse `text` as a `;`-separated list and run each command in turn
    #[async_recursion]
    pub async fn run_command_list(&self, text: &MString, stack: &FrameStack) -> Result<(), Abort> {
        let output = parser::parse(text.plain(), ParseRule::CommandList);
        if let Some(error) = output.errors.first() {
            let me = stack.top().executor;
            let message = MString::from(format!("#-1 SYNTAX ERROR: {}", error.message));
            return self
                .guard(self.services().notifier.notify(me, me, message))
                .await;
        }
        if let Tree::CommandList(commands) = &output.tree {
            for command in commands {
                self.run_command(text, command.span, stack).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn run_command(&self, source: &MString, span: Span, stack: &FrameStack) -> Result<(), Abort> {
        self.check_cancel()?;
        let text = source.slice(span.start, span.end);
        let plain = text.plain().to_string();
        if plain.is_empty() {
            return Ok(());
        }

        let commands = &self.services().commands;
        if let Some(definition) = plain.chars().next().and_then(|c| commands.token(c)) {
            let rest = text.slice(1, text.len());
            return self.invoke_command(&definition, Vec::new(), rest, stack).await;
        }

        let head_len = plain.chars().take_while(|c| !c.is_whitespace()).count();
        let head: String = plain.chars().take(head_len).collect();
        let rest = text.slice(head_len, text.len()).trim();
        let mut parts = head.split('/');
        let name = parts.next().unwrap_or_default().to_ascii_uppercase();
        let switches: Vec<String> = parts
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_uppercase())
            .collect();

        if let Some(definition) = commands.get(&name) {
            return self.invoke_command(&definition, switches, rest, stack).await;
        }

        if self.run_user_commands(&plain, stack).await? == 0 {
            let me = stack.top().executor;
            self.guard(self.services().notifier.notify(me, me, MString::from(HUH_MESSAGE)))
                .await?;
        }
        Ok(())
    }

    async fn invoke_command(
        &self,
        definition: &CommandDefinition,
        switches: Vec<String>,
        rest: MString,
        stack: &FrameStack,
    ) -> Result<(), Abort> {
        self.count_invocation()?;
        let executor = stack.top().executor;
        let notifier = &self.services().notifier;

        if let Some(capability) = definition.requires {
            let callee = Callee {
                name: definition.name.clone(),
                requires: Some(capability),
            };
            if !self
                .guard(self.services().permissions.can_execute(executor, &callee))
                .await?
            {
                return self
                    .guard(notifier.notify(executor, executor, MString::from("Permission denied.")))
                    .await;
            }
        }
        if let Some(bad) = switches.iter().find(|s| !definition.accepts_switch(s)) {
            let message = format!("{} doesn't know switch {}.", definition.name, bad);
            return self
                .guard(notifier.notify(executor, executor, MString::from(message)))
                .await;
        }

        tracing::debug!("Running {} for {}", definition.name, executor);
        let frame = stack.top().with_command(&definition.name, switches.clone());
        let inner = stack.push(frame);
        let args = match self.command_args(definition, &rest, &inner).await? {
            Ok(args) => args,
            Err(message) => {
                return self
                    .guard(notifier.notify(executor, executor, MString::from(message)))
                    .await;
            }
        };

        (definition.body)(CommandCall {
            ctx: self,
            name: &definition.name,
            switches: &switches,
            args,
            stack: &inner,
        })
        .await
    }

    /// Split and evaluate the argument text. The inner `Err` is a syntax
    /// error message for the executor.
    async fn command_args(
        &self,
        definition: &CommandDefinition,
        rest: &MString,
        stack: &FrameStack,
    ) -> Result<std::result::Result<CommandArgs, String>, Abort> {
        let rule = match definition.mode {
            ArgMode::None => return Ok(Ok(CommandArgs::default())),
            ArgMode::Single => match definition.left {
                ParseMode::NoParse => {
                    return Ok(Ok(CommandArgs {
                        left: rest.clone(),
                        ..CommandArgs::default()
                    }))
                }
                ParseMode::Evaluate => ParseRule::Function,
            },
            ArgMode::CommaList => ParseRule::CommaArgs,
            ArgMode::EqSplit => ParseRule::EqSplitCommand,
            ArgMode::EqSplitList => ParseRule::EqSplitArgs,
        };

        let output = parser::parse(rest.plain(), rule);
        if let Some(error) = output.errors.first() {
            return Ok(Err(format!("#-1 SYNTAX ERROR: {}", error.message)));
        }

        let (left, right) = (definition.left, definition.right);
        let args = match &output.tree {
            Tree::Expression(arg) => CommandArgs {
                left: self.command_value(rest, arg, left, stack).await?,
                ..CommandArgs::default()
            },
            Tree::CommaArgs(list) => {
                let mut args = Vec::with_capacity(list.len());
                for arg in list {
                    args.push(self.command_value(rest, arg, left, stack).await?);
                }
                CommandArgs {
                    args,
                    ..CommandArgs::default()
                }
            }
            Tree::EqSplitCommand { left: l, right: r } => {
                let mut args = CommandArgs {
                    left: self.command_value(rest, l, left, stack).await?,
                    has_equals: r.is_some(),
                    ..CommandArgs::default()
                };
                if let Some(r) = r {
                    args.args.push(self.command_value(rest, r, right, stack).await?);
                }
                args
            }
            Tree::EqSplitArgs { left: l, right: r } => {
                let mut args = CommandArgs {
                    left: self.command_value(rest, l, left, stack).await?,
                    has_equals: r.is_some(),
                    ..CommandArgs::default()
                };
                for arg in r.iter().flatten() {
                    args.args.push(self.command_value(rest, arg, right, stack).await?);
                }
                args
            }
            _ => CommandArgs::default(),
        };
        Ok(Ok(args))
    }

    async fn command_value(
        &self,
        source: &MString,
        arg: &Argument,
        mode: ParseMode,
        stack: &FrameStack,
    ) -> Result<MString, Abort> {
        match mode {
            ParseMode::Evaluate => self.eval_nodes(source, &arg.nodes, stack).await,
            ParseMode::NoParse => Ok(literal_text(source, &arg.nodes)),
        }
    }

    /// Try `$`-commands on the executor, its surroundings and inventory.
    /// Returns how many matched.
    async fn run_user_commands(&self, text: &str, stack: &FrameStack) -> Result<usize, Abort> {
        let executor = stack.top().executor;
        let objects = &self.services().objects;
        let mut candidates = vec![executor];
        if let Some(location) = self.guard(objects.object(executor)).await?.and_then(|o| o.location) {
            candidates.push(location);
            candidates.extend(self.guard(objects.contents(location)).await?);
        }
        candidates.extend(self.guard(objects.contents(executor)).await?);
        let mut seen = std::collections::HashSet::new();
        candidates.retain(|c| seen.insert(*c));

        let mut ran = 0;
        for candidate in candidates {
            let matches = self
                .guard(self.engine().resolver().match_patterns(
                    candidate,
                    PatternMarker::Command,
                    text,
                    true,
                ))
                .await?;
            if matches.is_empty() {
                continue;
            }
            if !self
                .engine()
                .locks()
                .evaluate_ref(LockType::Command, candidate, executor)
            {
                tracing::debug!("{} failed the command lock on {}", executor, candidate);
                continue;
            }
            for found in matches {
                self.count_invocation()?;
                let mut captures: HashMap<String, MString> = found.named;
                for (i, value) in found.captures.iter().enumerate() {
                    captures.insert(i.to_string(), value.clone());
                }
                let frame = self
                    .enter(stack, &format!("${}", found.attribute))?
                    .with_executor(candidate)
                    .with_enactor(executor)
                    .with_arguments(found.captures)
                    .with_captures(captures)
                    .with_attribute(AttributeRef {
                        object: candidate,
                        path: found.attribute,
                    })
                    .with_local_registers();
                self.run_command_list(&found.action, &stack.push(frame)).await?;
                ran += 1;
            }
        }
        Ok(ran)
    }
}

/// Argument text as written, with its outermost braces removed
pub fn literal_text(source: &MString, nodes: &[Node]) -> MString {
    let mut out = MString::new();
    for node in nodes {
        match node {
            Node::Brace(brace) if brace.mode == BraceMode::Literal => {
                out.push(&source.slice(brace.inner.start, brace.inner.end));
            }
            Node::Escape(span) => out.push(&source.slice(span.start.saturating_sub(1), span.end)),
            other => {
                let span = other.span();
                out.push(&source.slice(span.start, span.end));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::standard_functions;
    use crate::commands::standard_commands;
    use crate::context::Services;
    use crate::eval::Engine;
    use crate::memory::MemoryWorld;
    use mush_config::{ConfigHandle, EngineConfig};
    use mush_core::ObjectType;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn setup() -> (Arc<MemoryWorld>, Engine, DbRef, DbRef) {
        let world = Arc::new(MemoryWorld::new());
        let (room, wizard) = world.bootstrap();
        let services = Services::from_world(
            world.clone(),
            Arc::new(standard_functions()),
            Arc::new(standard_commands()),
        );
        let engine = Engine::new(services, ConfigHandle::new(EngineConfig::default()));
        (world, engine, room, wizard)
    }

    async fn run(engine: &Engine, who: DbRef, text: &str) {
        engine
            .command_list_parse(text, Frame::new(who, who, who), &CancellationToken::new())
            .await
            .unwrap();
    }

    fn messages(world: &MemoryWorld) -> Vec<(DbRef, String)> {
        world
            .take_notifications()
            .into_iter()
            .map(|n| (n.target, n.message.into_plain()))
            .collect()
    }

    #[tokio::test]
    async fn test_command_list_runs_in_order() {
        let (world, engine, _, wizard) = setup();
        run(&engine, wizard, "think one; think [add(1,1)];think {a;b}").await;
        assert_eq!(
            messages(&world),
            vec![
                (wizard, "one".to_string()),
                (wizard, "2".to_string()),
                (wizard, "a;b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (world, engine, _, wizard) = setup();
        run(&engine, wizard, "frobnicate now").await;
        assert_eq!(messages(&world), vec![(wizard, HUH_MESSAGE.to_string())]);
    }

    #[tokio::test]
    async fn test_bad_switch() {
        let (world, engine, _, wizard) = setup();
        run(&engine, wizard, "think/loud hi").await;
        let sent = messages(&world);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("switch LOUD"));
    }

    #[tokio::test]
    async fn test_ampersand_sets_attribute_unevaluated() {
        let (world, engine, _, wizard) = setup();
        run(&engine, wizard, "&greeting me=[add(1,2)] {x}").await;
        assert_eq!(
            world.attr_value(wizard, "GREETING").as_deref(),
            Some("[add(1,2)] x")
        );
        run(&engine, wizard, "think u(me/greeting)").await;
        let sent = messages(&world);
        assert_eq!(sent.last().map(|m| m.1.as_str()), Some("3 x"));
    }

    #[tokio::test]
    async fn test_pemit_and_emit() {
        let (world, engine, room, wizard) = setup();
        let bob = world.create(ObjectType::Player, "Bob", Some(room)).dbref;
        run(&engine, wizard, "@pemit *bob=Hello [name(me)]").await;
        assert_eq!(messages(&world), vec![(bob, "Hello Wizard".to_string())]);

        run(&engine, wizard, "@emit Boom").await;
        let mut targets: Vec<DbRef> = messages(&world).into_iter().map(|m| m.0).collect();
        targets.sort();
        assert!(targets.contains(&bob));
        assert!(targets.contains(&wizard));
    }

    #[tokio::test]
    async fn test_user_command_with_captures() {
        let (world, engine, room, wizard) = setup();
        let widget = world.create(ObjectType::Thing, "Widget", Some(room)).dbref;
        world.set_attr(widget, "CMD", "$poke *:think Poked %0 by %#;think [setq(a,x)]%qa");
        run(&engine, wizard, "poke bob").await;
        assert_eq!(
            messages(&world),
            vec![
                (widget, format!("Poked bob by {}", wizard)),
                (widget, "x".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_user_command_respects_command_lock() {
        let (world, engine, room, wizard) = setup();
        let widget = world.create(ObjectType::Thing, "Widget", Some(room)).dbref;
        world.set_attr(widget, "CMD", "$poke:think ouch");
        engine
            .locks()
            .set(widget, LockType::Command, "#FALSE")
            .unwrap();
        run(&engine, wizard, "poke").await;
        assert_eq!(messages(&world), vec![(wizard, HUH_MESSAGE.to_string())]);
    }

    #[tokio::test]
    async fn test_runaway_user_command_stops() {
        let (world, engine, room, wizard) = setup();
        let widget = world.create(ObjectType::Thing, "Widget", Some(room)).dbref;
        world.set_attr(widget, "LOOP", "$spin:spin");
        let result = engine
            .command_parse("spin", Frame::new(wizard, wizard, wizard), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.is_completed());
        let sent = messages(&world);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "#-1 FUNCTION RECURSION LIMIT EXCEEDED");
    }

    #[tokio::test]
    async fn test_lock_and_unlock_commands() {
        let (world, engine, room, wizard) = setup();
        let door = world.create(ObjectType::Exit, "Door", Some(room)).dbref;
        run(&engine, wizard, &format!("@lock/enter {}=={}", door, wizard)).await;
        let stored = world.lock_text(door, LockType::Enter).unwrap();
        assert!(stored.starts_with(&format!("={}:", wizard)));

        run(&engine, wizard, &format!("think elock({}/enter,me)", door)).await;
        run(&engine, wizard, &format!("@unlock/enter {}", door)).await;
        assert!(world.lock_text(door, LockType::Enter).is_none());
        let sent = messages(&world);
        assert!(sent.iter().any(|m| m.1 == "1"));

        run(&engine, wizard, &format!("@lock {}=type^Widget", door)).await;
        assert!(world.lock_text(door, LockType::Basic).is_none());
    }

    #[test]
    fn test_literal_text_strips_outer_braces() {
        let source = MString::from(r"{a;b} c\,d");
        let output = parser::parse(source.plain(), ParseRule::EqSplitCommand);
        match output.tree {
            Tree::EqSplitCommand { left, .. } => {
                assert_eq!(literal_text(&source, &left.nodes).plain(), r"a;b c\,d");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
