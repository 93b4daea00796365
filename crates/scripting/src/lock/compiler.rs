//! Lock compilation
//!
//! A lock tree becomes a tree of boxed closures mirroring it node for node.
//! `&` and `|` short-circuit left to right exactly as written. Patterns are
//! compiled to regexes once, here, not on every evaluation.

use super::ast::{LockAtom, LockExpr, LockTarget};
use super::cache::LockCache;
use super::parser::parse_lock;
use super::service::DEFAULT_LOCK;
use super::{LockEnvironment, LockType};
use crate::attributes::{wildcard_to_regex, WildcardStyle};
use crate::{Result, ScriptError};
use mush_core::{DbRef, ObjectRef, ObjectType, SharpObject};
use regex::Regex;
use std::sync::{Arc, Weak};

/// Indirect locks may chain through at most this many objects
pub const MAX_INDIRECT_DEPTH: usize = 10;

/// (gated, unlocker, indirection depth)
type Predicate = Arc<dyn Fn(&SharpObject, &SharpObject, usize) -> bool + Send + Sync>;

fn pred(
    f: impl Fn(&SharpObject, &SharpObject, usize) -> bool + Send + Sync + 'static,
) -> Predicate {
    Arc::new(f)
}

/// A lock ready to be evaluated against (gated, unlocker) pairs
#[derive(Clone)]
pub struct CompiledLock {
    text: String,
    predicate: Predicate,
}

impl CompiledLock {
    /// A lock that nobody passes, keeping `text` for display
    pub fn never(text: &str) -> Self {
        Self {
            text: text.to_string(),
            predicate: pred(|_, _, _| false),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn evaluate(&self, gated: &SharpObject, unlocker: &SharpObject) -> bool {
        self.evaluate_at(gated, unlocker, 0)
    }

    fn evaluate_at(&self, gated: &SharpObject, unlocker: &SharpObject, depth: usize) -> bool {
        (self.predicate)(gated, unlocker, depth)
    }
}

impl std::fmt::Debug for CompiledLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledLock").field("text", &self.text).finish()
    }
}

/// Turns lock text into [`CompiledLock`]s.
///
/// Each compiler owns a [`LockCache`]. Indirect atoms look their target
/// lock up there rather than recompiling it, and stop passing once the
/// compiler and its cache are gone.
#[derive(Clone)]
pub struct LockCompiler {
    env: Arc<dyn LockEnvironment>,
    cache: Arc<LockCache>,
}

impl LockCompiler {
    pub fn new(env: Arc<dyn LockEnvironment>) -> Self {
        Self {
            env,
            cache: Arc::new(LockCache::new()),
        }
    }

    pub fn cache(&self) -> &LockCache {
        &self.cache
    }

    pub fn compile(&self, text: &str) -> Result<CompiledLock> {
        let expr = parse_lock(text).map_err(|e| ScriptError::InvalidLock(e.to_string()))?;
        check_atoms(&expr, None)?;
        Ok(CompiledLock {
            text: text.to_string(),
            predicate: self.compile_expr(&expr)?,
        })
    }

    /// The compiled lock in force for `object`, from the cache when present.
    ///
    /// A stored lock that no longer compiles is treated as `#FALSE`.
    pub fn compiled_for(&self, object: DbRef, lock: LockType) -> Arc<CompiledLock> {
        if let Some(hit) = self.cache.get(object, lock) {
            return hit;
        }
        let seen = self.cache.generation();
        let text = self
            .env
            .lock_text(object, lock)
            .unwrap_or_else(|| DEFAULT_LOCK.to_string());
        let compiled = match self.compile(&text) {
            Ok(compiled) => compiled,
            Err(e) => {
                tracing::warn!("Stored {} lock on {} is corrupt: {}", lock, object, e);
                CompiledLock::never(&text)
            }
        };
        self.cache.fill(object, lock, Arc::new(compiled), seen)
    }

    /// Parse and check every atom without building a predicate.
    ///
    /// `candidate` is the object the lock is meant for; a lock that
    /// indirects straight back to it is rejected.
    pub fn validate(&self, text: &str, candidate: DbRef) -> bool {
        match parse_lock(text) {
            Ok(expr) => check_atoms(&expr, Some(candidate)).is_ok(),
            Err(_) => false,
        }
    }

    fn compile_expr(&self, expr: &LockExpr) -> Result<Predicate> {
        Ok(match expr {
            LockExpr::Or(a, b) => {
                let (a, b) = (self.compile_expr(a)?, self.compile_expr(b)?);
                pred(move |g, u, d| a(g, u, d) || b(g, u, d))
            }
            LockExpr::And(a, b) => {
                let (a, b) = (self.compile_expr(a)?, self.compile_expr(b)?);
                pred(move |g, u, d| a(g, u, d) && b(g, u, d))
            }
            LockExpr::Not(inner) => {
                let inner = self.compile_expr(inner)?;
                pred(move |g, u, d| !inner(g, u, d))
            }
            LockExpr::Group(inner) => self.compile_expr(inner)?,
            LockExpr::Atom(atom) => self.compile_atom(atom)?,
        })
    }

    /// Pin a target to an object; names are looked up without a looker
    fn resolve(&self, target: &LockTarget) -> Option<ObjectRef> {
        match target {
            LockTarget::Ref(r) => Some(*r),
            LockTarget::Name(name) => {
                let found = self.env.locate(name, None).map(|obj| obj.objid());
                if found.is_none() {
                    tracing::debug!("Lock names unknown object '{}'", name);
                }
                found
            }
        }
    }

    fn compile_atom(&self, atom: &LockAtom) -> Result<Predicate> {
        let env = Arc::clone(&self.env);
        let target = atom.target().and_then(|t| self.resolve(t));
        Ok(match (atom.clone(), target) {
            (LockAtom::True, _) => pred(|_, _, _| true),
            (LockAtom::False, _) => pred(|_, _, _| false),
            (LockAtom::Exact(_), Some(r)) => pred(move |_, u, _| r.matches(u)),
            (LockAtom::Carry(_), Some(r)) => pred(move |_, u, _| carries(env.as_ref(), u, r)),
            (LockAtom::Bare(_), Some(r)) => {
                pred(move |_, u, _| r.matches(u) || carries(env.as_ref(), u, r))
            }
            (LockAtom::Owner(_), Some(r)) => pred(move |_, u, _| {
                env.object(r.number)
                    .filter(|obj| r.matches(obj))
                    .is_some_and(|obj| obj.owner == u.owner)
            }),
            (LockAtom::Indirect { lock, .. }, Some(object)) => {
                let lock = match lock {
                    Some(name) => name
                        .parse::<LockType>()
                        .map_err(|e| ScriptError::InvalidLock(e.to_string()))?,
                    None => LockType::Basic,
                };
                let cache = Arc::downgrade(&self.cache);
                pred(move |_, u, depth| {
                    evaluate_indirect(&env, &cache, object, lock, u, depth)
                })
            }
            (LockAtom::Type(kind), _) => {
                let kind: ObjectType = kind
                    .parse()
                    .map_err(|_| ScriptError::InvalidLock(format!("invalid type '{}'", kind)))?;
                pred(move |_, u, _| u.kind == kind)
            }
            (LockAtom::Name(pattern), _) => {
                let re = compile_glob(&pattern)?;
                pred(move |_, u, _| re.is_match(&u.name))
            }
            (LockAtom::Flag(flag), _) => pred(move |_, u, _| u.has_flag(&flag)),
            (LockAtom::Power(power), _) => pred(move |_, u, _| u.has_power(&power)),
            (LockAtom::DbRefList(attr), _) => pred(move |g, u, _| {
                env.attribute(g.dbref, &attr).is_some_and(|list| {
                    list.split_whitespace()
                        .filter_map(|entry| entry.parse::<ObjectRef>().ok())
                        .any(|r| r.matches(u))
                })
            }),
            (LockAtom::Ip(pattern), _) => {
                let re = compile_glob(&pattern)?;
                pred(move |_, u, _| env.connections(u.dbref).iter().any(|c| re.is_match(&c.ip)))
            }
            (LockAtom::Hostname(pattern), _) => {
                let re = compile_glob(&pattern)?;
                pred(move |_, u, _| {
                    env.connections(u.dbref)
                        .iter()
                        .any(|c| re.is_match(&c.hostname))
                })
            }
            (LockAtom::Channel(channel), _) => {
                pred(move |_, u, _| env.on_channel(u.dbref, &channel))
            }
            (LockAtom::Attribute { name, pattern }, _) => {
                let re = compile_glob(&pattern)?;
                pred(move |_, u, _| {
                    env.attribute(u.dbref, &name)
                        .is_some_and(|value| re.is_match(&value))
                })
            }
            (LockAtom::Evaluation { name, value }, _) => {
                let re = compile_glob(&value)?;
                pred(move |g, u, _| {
                    env.evaluate_attribute(g.dbref, &name, u.dbref)
                        .is_some_and(|result| re.is_match(&result))
                })
            }
            (
                LockAtom::Exact(_)
                | LockAtom::Carry(_)
                | LockAtom::Bare(_)
                | LockAtom::Owner(_)
                | LockAtom::Indirect { .. },
                None,
            ) => pred(|_, _, _| false),
        })
    }
}

/// Evaluate another object's cached lock for the same unlocker
fn evaluate_indirect(
    env: &Arc<dyn LockEnvironment>,
    cache: &Weak<LockCache>,
    object: ObjectRef,
    lock: LockType,
    unlocker: &SharpObject,
    depth: usize,
) -> bool {
    if depth >= MAX_INDIRECT_DEPTH {
        tracing::debug!("Indirect lock chain too deep at {}", object);
        return false;
    }
    let Some(cache) = cache.upgrade() else {
        return false;
    };
    let Some(target) = env.object(object.number).filter(|o| object.matches(o)) else {
        return false;
    };
    let compiler = LockCompiler {
        env: Arc::clone(env),
        cache,
    };
    compiler
        .compiled_for(target.dbref, lock)
        .evaluate_at(&target, unlocker, depth + 1)
}

/// Is something matching `r` among the unlocker's contents?
fn carries(env: &dyn LockEnvironment, unlocker: &SharpObject, r: ObjectRef) -> bool {
    env.contents(unlocker.dbref).into_iter().any(|item| {
        item == r.number && env.object(item).is_some_and(|obj| r.matches(&obj))
    })
}

fn compile_glob(pattern: &str) -> Result<Regex> {
    Regex::new(&wildcard_to_regex(pattern, WildcardStyle::Plain, false))
        .map_err(|e| ScriptError::InvalidLock(e.to_string()))
}

/// Atom checks shared by compilation and validation
fn check_atoms(expr: &LockExpr, candidate: Option<DbRef>) -> Result<()> {
    let mut problem = None;
    expr.visit_atoms(&mut |atom| {
        if problem.is_some() {
            return;
        }
        problem = match atom {
            LockAtom::Type(kind) => kind
                .parse::<ObjectType>()
                .err()
                .map(|_| format!("invalid type '{}'", kind)),
            LockAtom::Indirect { object, lock } => {
                if candidate.is_some() && candidate == object.object_ref().map(|r| r.number) {
                    Some("lock refers to itself".to_string())
                } else {
                    lock.as_ref()
                        .and_then(|l| l.parse::<LockType>().err())
                        .map(|e| e.to_string())
                }
            }
            _ => None,
        };
    });
    match problem {
        Some(message) => Err(ScriptError::InvalidLock(message)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWorld;

    fn world() -> (Arc<MemoryWorld>, SharpObject, SharpObject) {
        let world = Arc::new(MemoryWorld::new());
        let room = world.create(ObjectType::Room, "Hall", None);
        let door = world.create(ObjectType::Exit, "Door", Some(room.dbref));
        let bob = world.create(ObjectType::Player, "Bob", Some(room.dbref));
        (world, door, bob)
    }

    fn check(world: &Arc<MemoryWorld>, text: &str, gated: &SharpObject, unlocker: &SharpObject) -> bool {
        LockCompiler::new(world.clone())
            .compile(text)
            .unwrap()
            .evaluate(gated, unlocker)
    }

    #[test]
    fn test_boolean_combinations() {
        let (world, door, bob) = world();
        assert!(check(&world, "(#FALSE | #TRUE) & #TRUE", &door, &bob));
        assert!(!check(&world, "#TRUE & #FALSE", &door, &bob));
        assert!(check(&world, "!#FALSE", &door, &bob));
        assert!(check(&world, "#FALSE | !(#TRUE & #FALSE)", &door, &bob));
    }

    #[test]
    fn test_exact_and_identity_atoms() {
        let (world, door, bob) = world();
        let bare = format!("={}", bob.dbref);
        let pinned = format!("={}", bob.objid());
        let stale = format!("={}:{}", bob.dbref, bob.created + 999);
        assert!(check(&world, &bare, &door, &bob));
        assert!(check(&world, &pinned, &door, &bob));
        assert!(!check(&world, &stale, &door, &bob));
    }

    #[test]
    fn test_type_flag_and_name_atoms() {
        let (world, door, bob) = world();
        world.update(bob.dbref, |o| {
            o.flags.insert("WIZARD".into());
        });
        let bob = world.get(bob.dbref).unwrap();
        assert!(check(&world, "type^player", &door, &bob));
        assert!(!check(&world, "type^THING", &door, &bob));
        assert!(check(&world, "flag^wizard", &door, &bob));
        assert!(!check(&world, "power^Builder", &door, &bob));
        assert!(check(&world, "name^B*", &door, &bob));
        assert!(!check(&world, "name^Al?", &door, &bob));
    }

    #[test]
    fn test_carry_and_owner_atoms() {
        let (world, door, bob) = world();
        let key = world.create(ObjectType::Thing, "Key", Some(bob.dbref));
        assert!(check(&world, &format!("+{}", key.dbref), &door, &bob));
        assert!(check(&world, &format!("{}", key.dbref), &door, &bob));
        assert!(!check(&world, &format!("={}", key.dbref), &door, &bob));

        world.update(key.dbref, |o| o.owner = bob.dbref);
        assert!(check(&world, &format!("${}", key.dbref), &door, &bob));
    }

    #[test]
    fn test_dbreflist_tolerates_garbage() {
        let (world, door, bob) = world();
        world.set_attr(door.dbref, "ALLOWED", &format!("junk #x {} #99", bob.dbref));
        assert!(check(&world, "dbreflist^ALLOWED", &door, &bob));
        assert!(!check(&world, "dbreflist^MISSING", &door, &bob));
        world.set_attr(door.dbref, "ALLOWED", "#-#-#");
        assert!(!check(&world, "dbreflist^allowed", &door, &bob));
    }

    #[test]
    fn test_connection_channel_and_attribute_atoms() {
        let (world, door, bob) = world();
        world.connect(7, bob.dbref, "10.0.0.5", "host.example.org");
        world.join_channel(bob.dbref, "Public");
        world.set_attr(bob.dbref, "SEX", "male");
        assert!(check(&world, "ip^10.0.*", &door, &bob));
        assert!(!check(&world, "ip^192.*", &door, &bob));
        assert!(check(&world, "hostname^*.example.org", &door, &bob));
        assert!(check(&world, "channel^public", &door, &bob));
        assert!(check(&world, "sex:m*", &door, &bob));
        assert!(!check(&world, "sex:f*", &door, &bob));
    }

    #[test]
    fn test_indirect_lock() {
        let (world, door, bob) = world();
        let gate = world.create(ObjectType::Thing, "Gate", None);
        world.store_lock_text(gate.dbref, LockType::Basic, "type^PLAYER");
        assert!(check(&world, &format!("@{}", gate.dbref), &door, &bob));
        world.store_lock_text(gate.dbref, LockType::Use, "#FALSE");
        assert!(!check(&world, &format!("@{}/use", gate.dbref), &door, &bob));
    }

    #[test]
    fn test_indirect_lock_reuses_cached_compilation() {
        let (world, door, bob) = world();
        let gate = world.create(ObjectType::Thing, "Gate", None);
        world.store_lock_text(gate.dbref, LockType::Basic, "type^PLAYER");
        let compiler = LockCompiler::new(world.clone());
        let lock = compiler.compile(&format!("@{}", gate.dbref)).unwrap();
        assert!(compiler.cache().is_empty());

        assert!(lock.evaluate(&door, &bob));
        let first = compiler.compiled_for(gate.dbref, LockType::Basic);
        assert!(lock.evaluate(&door, &bob));
        let second = compiler.compiled_for(gate.dbref, LockType::Basic);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.cache().len(), 1);

        // Text written behind the cache's back is not re-read
        world.store_lock_text(gate.dbref, LockType::Basic, "#FALSE");
        assert!(lock.evaluate(&door, &bob));
    }

    #[test]
    fn test_indirect_fails_once_compiler_is_gone() {
        let (world, door, bob) = world();
        let gate = world.create(ObjectType::Thing, "Gate", None);
        let lock = LockCompiler::new(world.clone())
            .compile(&format!("@{}", gate.dbref))
            .unwrap();
        assert!(!lock.evaluate(&door, &bob));
    }

    #[test]
    fn test_named_targets_resolve_at_compile_time() {
        let (world, door, bob) = world();
        let key = world.create(ObjectType::Thing, "Brass Key", Some(bob.dbref));
        assert!(check(&world, "=Bob", &door, &bob));
        assert!(check(&world, "+Brass Key", &door, &bob));
        assert!(!check(&world, "=Nobody", &door, &bob));
        assert!(check(&world, "!=Nobody", &door, &bob));
        world.update(key.dbref, |o| o.owner = bob.dbref);
        assert!(check(&world, "$Brass Key", &door, &bob));
    }

    #[test]
    fn test_evaluation_atom_reads_gated_object() {
        let (world, door, bob) = world();
        world.set_attr(door.dbref, "CANPASS", "Yes");
        assert!(check(&world, "canpass/y*", &door, &bob));
        assert!(!check(&world, "canpass/no", &door, &bob));
        assert!(!check(&world, "missing/*", &door, &bob));
        world.set_attr(bob.dbref, "CANPASS", "no");
        assert!(!check(&world, "canpass/no", &door, &bob));
    }

    #[test]
    fn test_indirect_cycle_terminates() {
        let (world, door, bob) = world();
        let a = world.create(ObjectType::Thing, "A", None);
        let b = world.create(ObjectType::Thing, "B", None);
        world.store_lock_text(a.dbref, LockType::Basic, &format!("@{}", b.dbref));
        world.store_lock_text(b.dbref, LockType::Basic, &format!("@{}", a.dbref));
        assert!(!check(&world, &format!("@{}", a.dbref), &door, &bob));
    }

    #[test]
    fn test_compile_rejects_bad_atoms() {
        let (world, _, _) = world();
        let compiler = LockCompiler::new(world.clone());
        assert!(compiler.compile("type^WIDGET").is_err());
        assert!(compiler.compile("#TRUE &").is_err());
        assert!(compiler.compile("@#1/Nonsense").is_err());
    }

    #[test]
    fn test_validate() {
        let (world, door, _) = world();
        let compiler = LockCompiler::new(world.clone());
        assert!(compiler.validate("type^Player | flag^WIZARD", door.dbref));
        assert!(!compiler.validate("type^Wizard", door.dbref));
        assert!(!compiler.validate("(#TRUE", door.dbref));
        assert!(!compiler.validate(&format!("@{}", door.dbref), door.dbref));
    }
}
