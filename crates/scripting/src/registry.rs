//! Function and command registries
//!
//! Builtins are registered explicitly at startup; calling one is a single
//! map lookup by lower-case (functions) or upper-case (commands) name.

use crate::dispatch::CommandCall;
use crate::error::Abort;
use crate::eval::FunctionCall;
use crate::services::Capability;
use dashmap::DashMap;
use futures::future::BoxFuture;
use mush_core::{DbRef, MString};
use std::sync::Arc;

/// Pure function over evaluated arguments
pub type NativeFn = fn(&[MString]) -> MString;

/// Function needing the evaluator: registers, frames, collaborators
pub type EngineFn = for<'a> fn(FunctionCall<'a>) -> BoxFuture<'a, Result<MString, Abort>>;

pub type CommandFn = for<'a> fn(CommandCall<'a>) -> BoxFuture<'a, Result<(), Abort>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionFlags {
    /// Arguments reach the body unevaluated
    pub no_parse: bool,
}

#[derive(Clone)]
pub enum FunctionBody {
    Native(NativeFn),
    Engine(EngineFn),
    /// Softcode stored in an attribute, called like `u()`
    User { object: DbRef, attribute: String },
}

#[derive(Clone)]
pub struct FunctionDefinition {
    pub name: String,
    pub min_args: usize,
    /// `None` for unbounded
    pub max_args: Option<usize>,
    pub flags: FunctionFlags,
    pub requires: Option<Capability>,
    pub body: FunctionBody,
}

impl FunctionDefinition {
    pub fn native(name: &str, min_args: usize, max_args: Option<usize>, body: NativeFn) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            min_args,
            max_args,
            flags: FunctionFlags::default(),
            requires: None,
            body: FunctionBody::Native(body),
        }
    }

    pub fn engine(name: &str, min_args: usize, max_args: Option<usize>, body: EngineFn) -> Self {
        Self {
            body: FunctionBody::Engine(body),
            ..Self::native(name, min_args, max_args, |_| MString::new())
        }
    }

    /// Global function backed by an attribute, taking up to ten arguments
    pub fn user(name: &str, object: DbRef, attribute: &str) -> Self {
        Self {
            body: FunctionBody::User {
                object,
                attribute: attribute.to_ascii_uppercase(),
            },
            ..Self::native(name, 0, Some(10), |_| MString::new())
        }
    }

    pub fn no_parse(mut self) -> Self {
        self.flags.no_parse = true;
        self
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.requires = Some(capability);
        self
    }

    /// `None` when `count` arguments are acceptable, otherwise the error value
    pub fn arity_error(&self, count: usize) -> Option<MString> {
        let name = self.name.to_ascii_uppercase();
        let message = match self.max_args {
            Some(max) if count >= self.min_args && count <= max => return None,
            None if count >= self.min_args => return None,
            Some(max) if max == self.min_args => {
                format!("#-1 FUNCTION ({}) EXPECTS {} ARGUMENTS", name, max)
            }
            Some(max) if self.min_args == 0 => {
                format!("#-1 FUNCTION ({}) EXPECTS AT MOST {} ARGUMENTS", name, max)
            }
            Some(max) => format!(
                "#-1 FUNCTION ({}) EXPECTS BETWEEN {} AND {} ARGUMENTS",
                name, self.min_args, max
            ),
            None => format!("#-1 FUNCTION ({}) EXPECTS AT LEAST {} ARGUMENTS", name, self.min_args),
        };
        Some(MString::from(message))
    }
}

impl std::fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<FunctionDefinition>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition
    pub fn register(&self, definition: FunctionDefinition) {
        tracing::debug!("Registering function {}", definition.name);
        self.functions
            .insert(definition.name.to_ascii_lowercase(), Arc::new(definition));
    }

    pub fn get(&self, name: &str) -> Option<Arc<FunctionDefinition>> {
        self.functions
            .get(&name.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, name: &str) -> bool {
        self.functions.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// How a command's argument text is split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgMode {
    None,
    /// Everything after the name is one argument
    Single,
    /// `a,b,c`
    CommaList,
    /// `left=right`
    EqSplit,
    /// `left=a,b,c`
    EqSplitList,
}

/// Whether one side of a command's arguments is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Evaluate,
    NoParse,
}

#[derive(Clone)]
pub struct CommandDefinition {
    /// Upper-case name, e.g. `@PEMIT`
    pub name: String,
    pub mode: ArgMode,
    pub left: ParseMode,
    pub right: ParseMode,
    /// Accepted switches, upper-case; empty accepts none
    pub switches: Vec<String>,
    pub requires: Option<Capability>,
    /// Invoked by a leading character with no space, like `&`
    pub single_token: Option<char>,
    pub body: CommandFn,
}

impl CommandDefinition {
    pub fn new(name: &str, mode: ArgMode, body: CommandFn) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            mode,
            left: ParseMode::Evaluate,
            right: ParseMode::Evaluate,
            switches: Vec::new(),
            requires: None,
            single_token: None,
            body,
        }
    }

    pub fn parse_modes(mut self, left: ParseMode, right: ParseMode) -> Self {
        self.left = left;
        self.right = right;
        self
    }

    pub fn switches(mut self, switches: &[&str]) -> Self {
        self.switches = switches.iter().map(|s| s.to_ascii_uppercase()).collect();
        self
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.requires = Some(capability);
        self
    }

    pub fn single_token(mut self, token: char) -> Self {
        self.single_token = Some(token);
        self
    }

    pub fn accepts_switch(&self, switch: &str) -> bool {
        self.switches.iter().any(|s| s.eq_ignore_ascii_case(switch))
    }
}

impl std::fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("switches", &self.switches)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: DashMap<String, Arc<CommandDefinition>>,
    tokens: DashMap<char, Arc<CommandDefinition>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: CommandDefinition) {
        tracing::debug!("Registering command {}", definition.name);
        let definition = Arc::new(definition);
        if let Some(token) = definition.single_token {
            self.tokens.insert(token, Arc::clone(&definition));
        }
        self.commands
            .insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<Arc<CommandDefinition>> {
        self.commands
            .get(&name.to_ascii_uppercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// The command invoked by a leading `token` character
    pub fn token(&self, token: char) -> Option<Arc<CommandDefinition>> {
        self.tokens.get(&token).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(args: &[MString]) -> MString {
        args.first().cloned().unwrap_or_default()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = FunctionRegistry::new();
        registry.register(FunctionDefinition::native("Echo", 1, Some(1), echo));
        assert!(registry.get("ECHO").is_some());
        assert!(registry.get("echo").is_some());
        assert_eq!(registry.names(), vec!["echo".to_string()]);
        assert!(registry.remove("eCHo"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_arity_messages() {
        let exact = FunctionDefinition::native("abs", 1, Some(1), echo);
        assert_eq!(exact.arity_error(1), None);
        assert_eq!(
            exact.arity_error(2).map(MString::into_plain),
            Some("#-1 FUNCTION (ABS) EXPECTS 1 ARGUMENTS".into())
        );
        let open = FunctionDefinition::native("add", 2, None, echo);
        assert_eq!(open.arity_error(30), None);
        assert_eq!(
            open.arity_error(1).map(MString::into_plain),
            Some("#-1 FUNCTION (ADD) EXPECTS AT LEAST 2 ARGUMENTS".into())
        );
        let range = FunctionDefinition::native("iter", 2, Some(4), echo);
        assert_eq!(
            range.arity_error(5).map(MString::into_plain),
            Some("#-1 FUNCTION (ITER) EXPECTS BETWEEN 2 AND 4 ARGUMENTS".into())
        );
        let upto = FunctionDefinition::native("r", 0, Some(1), echo);
        assert_eq!(
            upto.arity_error(2).map(MString::into_plain),
            Some("#-1 FUNCTION (R) EXPECTS AT MOST 1 ARGUMENTS".into())
        );
    }
}
