//! Boolean lock expressions
//!
//! A lock is a small boolean language gating who may use, enter, or
//! otherwise interact with an object. Lock text is parsed with [`parser`],
//! turned into a reusable predicate by [`compiler`], pinned to object
//! identities by [`normalize`], and cached per object in a [`cache`]
//! owned by the [`service`].

pub mod ast;
pub mod cache;
pub mod compiler;
pub mod normalize;
pub mod parser;
pub mod service;

pub use ast::{LockAtom, LockExpr, LockTarget};
pub use cache::LockCache;
pub use compiler::{CompiledLock, LockCompiler};
pub use normalize::{normalize, normalize_as};
pub use parser::{parse_lock, LockParseError};
pub use service::LockService;

use mush_core::{DbRef, MushError, SharpObject};
use std::fmt;
use std::str::FromStr;

/// The gate a lock guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Basic,
    Enter,
    Use,
    Command,
    Listen,
    Page,
    Speech,
    Zone,
    Teleport,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Basic => "Basic",
            LockType::Enter => "Enter",
            LockType::Use => "Use",
            LockType::Command => "Command",
            LockType::Listen => "Listen",
            LockType::Page => "Page",
            LockType::Speech => "Speech",
            LockType::Zone => "Zone",
            LockType::Teleport => "Teleport",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockType {
    type Err = MushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" | "default" => Ok(LockType::Basic),
            "enter" => Ok(LockType::Enter),
            "use" => Ok(LockType::Use),
            "command" => Ok(LockType::Command),
            "listen" => Ok(LockType::Listen),
            "page" => Ok(LockType::Page),
            "speech" => Ok(LockType::Speech),
            "zone" => Ok(LockType::Zone),
            "teleport" | "tport" => Ok(LockType::Teleport),
            _ => Err(MushError::InvalidData(format!("unknown lock type: {}", s))),
        }
    }
}

/// A live connection of a player, for `ip^` and `hostname^` atoms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub ip: String,
    pub hostname: String,
}

/// World lookups a compiled lock may perform.
///
/// Locks are evaluated very often and must not suspend, so this view of
/// the database is synchronous; implementations serve it from memory.
pub trait LockEnvironment: Send + Sync {
    fn object(&self, dbref: DbRef) -> Option<SharpObject>;

    /// Objects located inside `dbref`
    fn contents(&self, dbref: DbRef) -> Vec<DbRef>;

    /// Plain value of an attribute set directly on `object`
    fn attribute(&self, object: DbRef, name: &str) -> Option<String>;

    /// Value of `name` on `object` as seen by `enactor`, for `ATTR/value`
    /// atoms. Lock evaluation cannot suspend, so the default reads the
    /// stored text without running it.
    fn evaluate_attribute(&self, object: DbRef, name: &str, enactor: DbRef) -> Option<String> {
        let _ = enactor;
        self.attribute(object, name)
    }

    /// Match `me`, `here`, or an object name from the point of view of
    /// `looker`. Without a looker only absolute names resolve.
    fn locate(&self, name: &str, looker: Option<DbRef>) -> Option<SharpObject>;

    fn connections(&self, player: DbRef) -> Vec<ConnectionInfo>;

    fn on_channel(&self, object: DbRef, channel: &str) -> bool;

    /// Persisted lock text
    fn lock_text(&self, object: DbRef, lock: LockType) -> Option<String>;

    /// Persist lock text; `None` removes the lock
    fn store_lock(&self, object: DbRef, lock: LockType, text: Option<String>);
}
