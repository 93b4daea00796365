//! Per-object lock storage with a compiled-lock cache

use super::ast::LockTarget;
use super::{normalize_as, parse_lock, CompiledLock, LockCompiler, LockEnvironment, LockType};
use crate::{Result, ScriptError};
use mush_core::{DbRef, SharpObject};
use std::sync::Arc;

/// Lock text used when an object has no lock of the requested type
pub const DEFAULT_LOCK: &str = "#TRUE";

/// Compile, store, and evaluate object locks.
///
/// Compiled locks are cached per `(object, lock type)`. Setting a lock
/// compiles it before anything is stored, so a failed `set` leaves the old
/// lock in force and readers never observe a half-replaced entry.
pub struct LockService {
    compiler: LockCompiler,
    env: Arc<dyn LockEnvironment>,
}

impl LockService {
    pub fn new(env: Arc<dyn LockEnvironment>) -> Self {
        Self {
            compiler: LockCompiler::new(Arc::clone(&env)),
            env,
        }
    }

    pub fn compile(&self, text: &str) -> Result<CompiledLock> {
        self.compiler.compile(text)
    }

    pub fn validate(&self, text: &str, candidate: DbRef) -> bool {
        self.compiler.validate(text, candidate)
    }

    pub fn normalize(&self, text: &str) -> String {
        normalize_as(text, self.env.as_ref(), None)
    }

    /// Replace a lock, reading `me` and `here` from the object itself.
    /// Returns the normalized text that was stored.
    pub fn set(&self, object: DbRef, lock: LockType, text: &str) -> Result<String> {
        self.set_as(object, lock, text, object)
    }

    /// Replace a lock on behalf of `setter`, whose point of view resolves
    /// object names. A name that matches nothing rejects the lock.
    pub fn set_as(&self, object: DbRef, lock: LockType, text: &str, setter: DbRef) -> Result<String> {
        let normalized = normalize_as(text, self.env.as_ref(), Some(setter));
        if let Ok(expr) = parse_lock(&normalized) {
            if let Some(LockTarget::Name(name)) = expr
                .targets()
                .into_iter()
                .find(|t| matches!(t, LockTarget::Name(_)))
            {
                return Err(ScriptError::InvalidLock(format!("no such object '{}'", name)));
            }
        }
        if !self.validate(&normalized, object) {
            return Err(ScriptError::InvalidLock(text.to_string()));
        }
        let compiled = Arc::new(self.compile(&normalized)?);
        self.env.store_lock(object, lock, Some(normalized.clone()));
        self.compiler.cache().replace(object, lock, Some(compiled));
        tracing::debug!("Set {} lock on {}: {}", lock, object, normalized);
        Ok(normalized)
    }

    /// Remove a lock, reverting to the default. Returns whether one existed.
    pub fn clear(&self, object: DbRef, lock: LockType) -> bool {
        let existed = self.env.lock_text(object, lock).is_some();
        self.env.store_lock(object, lock, None);
        self.compiler.cache().replace(object, lock, None);
        existed
    }

    /// The stored text of a lock, if one is set
    pub fn text(&self, object: DbRef, lock: LockType) -> Option<String> {
        self.env.lock_text(object, lock)
    }

    /// The compiled lock in force for `object`.
    ///
    /// A stored lock that no longer compiles is treated as `#FALSE`.
    pub fn get(&self, object: DbRef, lock: LockType) -> Arc<CompiledLock> {
        self.compiler.compiled_for(object, lock)
    }

    pub fn evaluate(&self, lock: LockType, gated: &SharpObject, unlocker: &SharpObject) -> bool {
        self.get(gated.dbref, lock).evaluate(gated, unlocker)
    }

    /// Evaluate by reference; a missing object never passes
    pub fn evaluate_ref(&self, lock: LockType, gated: DbRef, unlocker: DbRef) -> bool {
        match (self.env.object(gated), self.env.object(unlocker)) {
            (Some(g), Some(u)) => self.evaluate(lock, &g, &u),
            _ => false,
        }
    }

    /// Drop cached entries for an object, e.g. after it is recycled
    pub fn invalidate(&self, object: DbRef) {
        self.compiler.cache().invalidate(object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ConnectionInfo;
    use crate::memory::MemoryWorld;
    use mush_core::ObjectType;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{OnceLock, Weak};

    fn setup() -> (Arc<MemoryWorld>, LockService, SharpObject, SharpObject) {
        let world = Arc::new(MemoryWorld::new());
        let door = world.create(ObjectType::Exit, "Door", None);
        let bob = world.create(ObjectType::Player, "Bob", None);
        let service = LockService::new(world.clone());
        (world, service, door, bob)
    }

    #[test]
    fn test_default_lock_passes() {
        let (_, service, door, bob) = setup();
        assert!(service.evaluate(LockType::Basic, &door, &bob));
        assert!(service.text(door.dbref, LockType::Basic).is_none());
    }

    #[test]
    fn test_set_normalizes_and_caches() {
        let (world, service, door, bob) = setup();
        let stored = service
            .set(door.dbref, LockType::Enter, &format!("={}", bob.dbref))
            .unwrap();
        assert_eq!(stored, format!("={}", bob.objid()));
        assert_eq!(world.lock_text(door.dbref, LockType::Enter), Some(stored));
        assert!(service.evaluate(LockType::Enter, &door, &bob));
        assert!(service.evaluate(LockType::Basic, &door, &door));
        assert!(!service.evaluate(LockType::Enter, &door, &door));
    }

    #[test]
    fn test_identity_survives_recycling() {
        let (world, service, door, bob) = setup();
        service
            .set(door.dbref, LockType::Basic, &format!("={}", bob.dbref))
            .unwrap();
        world.recycle(bob.dbref);
        service.invalidate(door.dbref);
        let impostor = world.create(ObjectType::Player, "Mallory", None);
        assert_eq!(impostor.dbref, bob.dbref);
        assert!(!service.evaluate(LockType::Basic, &door, &impostor));
    }

    #[test]
    fn test_failed_set_keeps_old_lock() {
        let (_, service, door, bob) = setup();
        service.set(door.dbref, LockType::Basic, "type^Player").unwrap();
        assert!(service.set(door.dbref, LockType::Basic, "type^Nope").is_err());
        assert!(service.set(door.dbref, LockType::Basic, "(#TRUE").is_err());
        assert!(service.evaluate(LockType::Basic, &door, &bob));
        assert!(!service.evaluate(LockType::Basic, &door, &door));
    }

    #[test]
    fn test_corrupt_stored_lock_fails_closed() {
        let (world, service, door, bob) = setup();
        world.store_lock_text(door.dbref, LockType::Use, "&&&");
        assert!(!service.evaluate(LockType::Use, &door, &bob));
    }

    #[test]
    fn test_set_as_resolves_names_for_the_setter() {
        let (world, service, door, bob) = setup();
        let stored = service.set_as(door.dbref, LockType::Basic, "=me", bob.dbref).unwrap();
        assert_eq!(stored, format!("={}", bob.objid()));
        assert!(service.evaluate(LockType::Basic, &door, &bob));
        assert!(!service.evaluate(LockType::Basic, &door, &door));

        let stored = service.set(door.dbref, LockType::Use, "=Bob | =me").unwrap();
        assert_eq!(stored, format!("={} | ={}", bob.objid(), door.objid()));

        assert!(service.set(door.dbref, LockType::Basic, "=Nobody").is_err());
        assert_eq!(
            world.lock_text(door.dbref, LockType::Basic),
            Some(format!("={}", bob.objid()))
        );
    }

    #[test]
    fn test_indirect_follows_set() {
        let (world, service, door, bob) = setup();
        let gate = world.create(ObjectType::Thing, "Gate", None);
        service.set(gate.dbref, LockType::Basic, "type^Player").unwrap();
        service
            .set(door.dbref, LockType::Basic, &format!("@{}", gate.dbref))
            .unwrap();
        assert!(service.evaluate(LockType::Basic, &door, &bob));
        let cached = service.get(gate.dbref, LockType::Basic);
        assert!(service.evaluate(LockType::Basic, &door, &bob));
        assert!(Arc::ptr_eq(&cached, &service.get(gate.dbref, LockType::Basic)));

        service.set(gate.dbref, LockType::Basic, "#FALSE").unwrap();
        assert!(!service.evaluate(LockType::Basic, &door, &bob));
        service.clear(gate.dbref, LockType::Basic);
        assert!(service.evaluate(LockType::Basic, &door, &bob));
    }

    /// Sets a lock from inside the first read of its text, the way a
    /// concurrent `@lock` can land between a cache miss and its fill
    struct InterleavingWorld {
        world: Arc<MemoryWorld>,
        service: OnceLock<Weak<LockService>>,
        interleaved: AtomicBool,
    }

    impl LockEnvironment for InterleavingWorld {
        fn object(&self, dbref: DbRef) -> Option<SharpObject> {
            LockEnvironment::object(self.world.as_ref(), dbref)
        }

        fn contents(&self, dbref: DbRef) -> Vec<DbRef> {
            LockEnvironment::contents(self.world.as_ref(), dbref)
        }

        fn attribute(&self, object: DbRef, name: &str) -> Option<String> {
            LockEnvironment::attribute(self.world.as_ref(), object, name)
        }

        fn locate(&self, name: &str, looker: Option<DbRef>) -> Option<SharpObject> {
            LockEnvironment::locate(self.world.as_ref(), name, looker)
        }

        fn connections(&self, player: DbRef) -> Vec<ConnectionInfo> {
            LockEnvironment::connections(self.world.as_ref(), player)
        }

        fn on_channel(&self, object: DbRef, channel: &str) -> bool {
            LockEnvironment::on_channel(self.world.as_ref(), object, channel)
        }

        fn lock_text(&self, object: DbRef, lock: LockType) -> Option<String> {
            let text = LockEnvironment::lock_text(self.world.as_ref(), object, lock);
            if !self.interleaved.swap(true, Ordering::SeqCst) {
                if let Some(service) = self.service.get().and_then(Weak::upgrade) {
                    service.set(object, LockType::Basic, "#FALSE").unwrap();
                }
            }
            text
        }

        fn store_lock(&self, object: DbRef, lock: LockType, text: Option<String>) {
            LockEnvironment::store_lock(self.world.as_ref(), object, lock, text)
        }
    }

    #[test]
    fn test_set_during_cache_fill_is_not_lost() {
        let world = Arc::new(MemoryWorld::new());
        let door = world.create(ObjectType::Exit, "Door", None);
        let bob = world.create(ObjectType::Player, "Bob", None);
        let env = Arc::new(InterleavingWorld {
            world: world.clone(),
            service: OnceLock::new(),
            interleaved: AtomicBool::new(false),
        });
        let service = Arc::new(LockService::new(env.clone()));
        let _ = env.service.set(Arc::downgrade(&service));

        // The miss reads no lock, then the set lands before the fill
        service.evaluate(LockType::Basic, &door, &bob);
        assert!(env.interleaved.load(Ordering::SeqCst));
        assert_eq!(world.lock_text(door.dbref, LockType::Basic).as_deref(), Some("#FALSE"));
        assert!(!service.evaluate(LockType::Basic, &door, &bob));
        assert_eq!(service.get(door.dbref, LockType::Basic).text(), "#FALSE");
    }

    #[test]
    fn test_clear() {
        let (_, service, door, _) = setup();
        service.set(door.dbref, LockType::Basic, "#FALSE").unwrap();
        assert!(!service.evaluate_ref(LockType::Basic, door.dbref, door.dbref));
        assert!(service.clear(door.dbref, LockType::Basic));
        assert!(!service.clear(door.dbref, LockType::Basic));
        assert!(service.evaluate_ref(LockType::Basic, door.dbref, door.dbref));
    }
}
