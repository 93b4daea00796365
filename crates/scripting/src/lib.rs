//! # MUSH Scripting Engine
//!
//! Parses and evaluates MUSH softcode.
//!
//! ## Features
//! - One softcode grammar with several entry rules and full diagnostics
//! - An async evaluator with persistent frames, Q-registers, and limits
//!   that stop runaway code
//! - Boolean locks compiled to cached predicates
//! - Attribute lookup through parents and zones, with `$`/`^` pattern
//!   matching
//!
//! ## Layout
//!
//! ### Front end
//! - [`lexer`], [`parser`] and [`ast`] turn text into trees
//! - [`diagnostics`] exposes tokens, errors and highlighting to tooling
//!
//! ### Evaluation
//! - [`eval`] walks trees against a [`frame::FrameStack`]
//! - [`dispatch`] runs commands, [`builtins`] and [`commands`] supply the
//!   standard catalogue
//!
//! ### World
//! - [`services`] are the collaborator traits, [`memory`] implements them
//! - [`attributes`] resolves inherited attributes, [`lock`] gates access

pub mod ast;
pub mod attributes;
pub mod builtins;
pub mod commands;
pub mod context;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod eval;
pub mod frame;
pub mod lexer;
pub mod locate;
pub mod lock;
pub mod memory;
pub mod parser;
pub mod registry;
pub mod services;

pub use attributes::{AttributePath, AttributeResolver, Resolution};
pub use context::Services;
pub use diagnostics::{GrammarKind, SemanticToken, SemanticTokenType};
pub use error::{Abort, LimitKind, Result, ScriptError};
pub use eval::{Engine, EvalContext, EvalState, Evaluation};
pub use frame::{Frame, FrameStack};
pub use lock::{LockService, LockType};
pub use memory::MemoryWorld;
pub use parser::{ParseRule, SyntaxError};
pub use registry::{CommandRegistry, FunctionRegistry};
