//! In-memory world
//!
//! A self-contained database implementing every collaborator the engine
//! needs. It backs the `mushsh` shell and the test suites.

use crate::attributes::{Attribute, AttributeFlags, AttributePath, WildcardStyle, wildcard_to_regex};
use crate::error::{Result, ScriptError};
use crate::lock::{ConnectionInfo, LockEnvironment, LockType};
use crate::services::{
    AttributeStore, Callee, Capability, ConnectionRegistry, Notification, NotifySink, ObjectStore,
    PermissionOracle,
};
use async_trait::async_trait;
use dashmap::DashMap;
use mush_core::{DbRef, DbRefAllocator, MString, ObjectType, SharpObject};
use parking_lot::Mutex;
use regex::RegexBuilder;
use std::collections::{BTreeMap, HashSet};

/// Objects, attributes, locks, and connections held in memory
///
/// # Thread Safety
/// All maps are DashMaps; notifications queue behind a mutex until taken.
#[derive(Default)]
pub struct MemoryWorld {
    allocator: DbRefAllocator,
    objects: DashMap<DbRef, SharpObject>,
    /// Key: full upper-case attribute path
    attributes: DashMap<DbRef, BTreeMap<String, Attribute>>,
    locks: DashMap<(DbRef, LockType), String>,
    channels: DashMap<DbRef, HashSet<String>>,
    /// Key: connection handle
    connections: DashMap<u64, (DbRef, ConnectionInfo)>,
    outbox: Mutex<Vec<Notification>>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        tracing::debug!("Creating MemoryWorld");
        Self::default()
    }

    /// Create the starting room `#0` and a wizard `#1` standing in it
    pub fn bootstrap(&self) -> (DbRef, DbRef) {
        let room = self.create(ObjectType::Room, "Room Zero", None).dbref;
        let wizard = self.create(ObjectType::Player, "Wizard", Some(room)).dbref;
        self.update(wizard, |o| {
            o.flags.insert("WIZARD".to_string());
        });
        self.update(room, |o| o.owner = wizard);
        (room, wizard)
    }

    /// Allocate a new object, reusing recycled numbers first
    pub fn create(&self, kind: ObjectType, name: &str, location: Option<DbRef>) -> SharpObject {
        let (dbref, created) = self.allocator.allocate();
        let mut object = SharpObject::new(dbref, created, kind, name);
        object.location = location;
        tracing::debug!("Created {} {} ({})", kind.as_str(), dbref, name);
        self.objects.insert(dbref, object.clone());
        object
    }

    /// Store an object with a number chosen elsewhere
    pub fn insert(&self, object: SharpObject) {
        self.allocator.reserve(object.dbref);
        self.objects.insert(object.dbref, object);
    }

    pub fn get(&self, dbref: DbRef) -> Option<SharpObject> {
        self.objects.get(&dbref).map(|entry| entry.clone())
    }

    /// Apply `f` to an object in place. Returns false if it does not exist.
    pub fn update(&self, dbref: DbRef, f: impl FnOnce(&mut SharpObject)) -> bool {
        match self.objects.get_mut(&dbref) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }

    /// Destroy an object and everything hanging off it
    pub fn recycle(&self, dbref: DbRef) {
        if self.objects.remove(&dbref).is_none() {
            return;
        }
        self.attributes.remove(&dbref);
        self.channels.remove(&dbref);
        self.locks.retain(|(object, _), _| *object != dbref);
        self.connections.retain(|_, (player, _)| *player != dbref);
        self.allocator.recycle(dbref);
        tracing::debug!("Recycled {}", dbref);
    }

    /// Set or clear a parent, refusing loops
    pub fn set_parent(&self, child: DbRef, parent: Option<DbRef>) -> Result<()> {
        if let Some(parent) = parent {
            let mut next = Some(parent);
            let mut seen = HashSet::new();
            while let Some(current) = next {
                if current == child {
                    return Err(ScriptError::Collaborator(format!(
                        "{} is already an ancestor of {}",
                        child, parent
                    )));
                }
                if !seen.insert(current) {
                    break;
                }
                next = self.get(current).and_then(|o| o.parent);
            }
        }
        if self.update(child, |o| o.parent = parent) {
            Ok(())
        } else {
            Err(ScriptError::Collaborator(format!("no such object {}", child)))
        }
    }

    pub fn set_zone(&self, object: DbRef, zone: Option<DbRef>) -> bool {
        self.update(object, |o| o.zone = zone)
    }

    /// Set an attribute owned by the object itself, creating missing
    /// intermediate segments as empty attributes
    pub fn set_attr(&self, dbref: DbRef, name: &str, value: &str) {
        match name.parse::<AttributePath>() {
            Ok(path) => self.put_attribute(dbref, &path, MString::from(value), dbref),
            Err(e) => tracing::warn!("Bad attribute name {:?}: {}", name, e),
        }
    }

    pub fn set_attr_flags(&self, dbref: DbRef, name: &str, f: impl FnOnce(&mut AttributeFlags)) {
        let key = name.to_ascii_uppercase();
        if let Some(mut tree) = self.attributes.get_mut(&dbref) {
            if let Some(attribute) = tree.get_mut(&key) {
                f(&mut attribute.flags);
            }
        }
    }

    pub fn attr_value(&self, dbref: DbRef, name: &str) -> Option<String> {
        let key = name.to_ascii_uppercase();
        self.attributes
            .get(&dbref)
            .and_then(|tree| tree.get(&key).map(|a| a.value.plain().to_string()))
    }

    /// Bind a connection handle to a logged-in player
    pub fn connect(&self, handle: u64, player: DbRef, ip: &str, hostname: &str) {
        let info = ConnectionInfo {
            ip: ip.to_string(),
            hostname: hostname.to_string(),
        };
        self.connections.insert(handle, (player, info));
    }

    pub fn disconnect(&self, handle: u64) -> bool {
        self.connections.remove(&handle).is_some()
    }

    pub fn join_channel(&self, object: DbRef, channel: &str) {
        self.channels
            .entry(object)
            .or_default()
            .insert(channel.to_ascii_lowercase());
    }

    /// Write lock text directly, bypassing validation
    pub fn store_lock_text(&self, object: DbRef, lock: LockType, text: &str) {
        self.locks.insert((object, lock), text.to_string());
    }

    pub fn lock_text(&self, object: DbRef, lock: LockType) -> Option<String> {
        self.locks.get(&(object, lock)).map(|entry| entry.clone())
    }

    /// Drain every notification sent so far
    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.outbox.lock())
    }

    fn put_attribute(&self, object: DbRef, path: &AttributePath, value: MString, owner: DbRef) {
        let mut tree = self.attributes.entry(object).or_default();
        for depth in 1..path.len() {
            let name = path.prefix(depth).to_string();
            tree.entry(name.clone()).or_insert_with(|| Attribute {
                name,
                value: MString::new(),
                owner,
                flags: AttributeFlags::default(),
            });
        }
        let name = path.to_string();
        match tree.get_mut(&name) {
            Some(existing) => existing.value = value,
            None => {
                tree.insert(
                    name.clone(),
                    Attribute {
                        name,
                        value,
                        owner,
                        flags: AttributeFlags::default(),
                    },
                );
            }
        }
    }

    fn is_wizard(&self, dbref: DbRef) -> bool {
        self.get(dbref).is_some_and(|o| o.is_wizard())
    }
}

#[async_trait]
impl ObjectStore for MemoryWorld {
    async fn object(&self, dbref: DbRef) -> Option<SharpObject> {
        self.get(dbref)
    }

    async fn contents(&self, dbref: DbRef) -> Vec<DbRef> {
        LockEnvironment::contents(self, dbref)
    }

    async fn find_player(&self, name: &str) -> Option<DbRef> {
        self.objects
            .iter()
            .find(|entry| entry.kind == ObjectType::Player && entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.dbref)
    }
}

#[async_trait]
impl AttributeStore for MemoryWorld {
    async fn attribute_chain(&self, object: DbRef, path: &AttributePath) -> Vec<Attribute> {
        let Some(tree) = self.attributes.get(&object) else {
            return Vec::new();
        };
        (1..=path.len())
            .map_while(|depth| tree.get(&path.prefix(depth).to_string()).cloned())
            .collect()
    }

    async fn attributes(&self, object: DbRef) -> Vec<Attribute> {
        self.attributes
            .get(&object)
            .map(|tree| tree.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn set_attribute(
        &self,
        object: DbRef,
        path: &AttributePath,
        value: MString,
        owner: DbRef,
    ) -> Result<()> {
        if !self.objects.contains_key(&object) {
            return Err(ScriptError::Collaborator(format!("no such object {}", object)));
        }
        self.put_attribute(object, path, value, owner);
        Ok(())
    }

    async fn clear_attribute(&self, object: DbRef, path: &AttributePath) -> Result<bool> {
        let Some(mut tree) = self.attributes.get_mut(&object) else {
            return Ok(false);
        };
        let name = path.to_string();
        let prefix = format!("{}`", name);
        if tree.keys().any(|key| key.starts_with(&prefix)) {
            return Err(ScriptError::Collaborator(format!(
                "{} still has child attributes",
                name
            )));
        }
        Ok(tree.remove(&name).is_some())
    }

    async fn wipe_attributes(&self, object: DbRef, pattern: &str) -> Result<usize> {
        let source = wildcard_to_regex(pattern, WildcardStyle::AttributeName, false);
        let re = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| ScriptError::Collaborator(e.to_string()))?;
        let Some(mut tree) = self.attributes.get_mut(&object) else {
            return Ok(0);
        };
        let roots: Vec<String> = tree.keys().filter(|k| re.is_match(k)).cloned().collect();
        let before = tree.len();
        tree.retain(|key, _| {
            !roots
                .iter()
                .any(|root| key == root || key.starts_with(&format!("{}`", root)))
        });
        Ok(before - tree.len())
    }
}

#[async_trait]
impl PermissionOracle for MemoryWorld {
    async fn controls(&self, who: DbRef, what: DbRef) -> bool {
        if who == what || self.is_wizard(who) {
            return true;
        }
        self.get(what).is_some_and(|o| o.owner == who)
    }

    async fn can_examine(&self, who: DbRef, what: DbRef) -> bool {
        self.controls(who, what).await
    }

    async fn can_execute(&self, who: DbRef, callee: &Callee) -> bool {
        let Some(object) = self.get(who) else {
            return false;
        };
        match callee.requires {
            None => true,
            Some(Capability::Wizard) => object.is_wizard(),
            Some(Capability::Royalty) => object.is_wizard() || object.has_flag("ROYALTY"),
        }
    }

    async fn can_interact(&self, _from: DbRef, _to: DbRef) -> bool {
        true
    }
}

#[async_trait]
impl NotifySink for MemoryWorld {
    async fn notify_batch(&self, batch: Vec<Notification>) {
        for notification in &batch {
            tracing::debug!("{} -> {}: {}", notification.sender, notification.target, notification.message);
        }
        self.outbox.lock().extend(batch);
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryWorld {
    async fn bound_player(&self, handle: u64) -> Option<DbRef> {
        self.connections.get(&handle).map(|entry| entry.0)
    }
}

impl LockEnvironment for MemoryWorld {
    fn object(&self, dbref: DbRef) -> Option<SharpObject> {
        self.get(dbref)
    }

    fn contents(&self, dbref: DbRef) -> Vec<DbRef> {
        let mut contents: Vec<DbRef> = self
            .objects
            .iter()
            .filter(|entry| entry.location == Some(dbref))
            .map(|entry| entry.dbref)
            .collect();
        contents.sort();
        contents
    }

    fn attribute(&self, object: DbRef, name: &str) -> Option<String> {
        self.attr_value(object, name)
    }

    fn connections(&self, player: DbRef) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .filter(|entry| entry.0 == player)
            .map(|entry| entry.1.clone())
            .collect()
    }

    fn on_channel(&self, object: DbRef, channel: &str) -> bool {
        self.channels
            .get(&object)
            .is_some_and(|set| set.contains(&channel.to_ascii_lowercase()))
    }

    fn locate(&self, name: &str, looker: Option<DbRef>) -> Option<SharpObject> {
        let name = name.trim();
        let looker = looker.and_then(|dbref| self.get(dbref));
        if name.eq_ignore_ascii_case("me") {
            return looker;
        }
        if name.eq_ignore_ascii_case("here") {
            return looker.and_then(|o| o.location).and_then(|room| self.get(room));
        }
        let named = |o: &SharpObject| o.name.eq_ignore_ascii_case(name);
        if let Some(player) = self
            .objects
            .iter()
            .filter(|entry| entry.kind == ObjectType::Player && named(entry.value()))
            .map(|entry| entry.clone())
            .min_by_key(|o| o.dbref)
        {
            return Some(player);
        }
        if let Some(looker) = &looker {
            let mut nearby = LockEnvironment::contents(self, looker.dbref);
            if let Some(room) = looker.location {
                nearby.extend(LockEnvironment::contents(self, room));
            }
            if let Some(found) = nearby
                .into_iter()
                .filter_map(|dbref| self.get(dbref))
                .find(|o| named(o))
            {
                return Some(found);
            }
        }
        self.objects
            .iter()
            .filter(|entry| named(entry.value()))
            .map(|entry| entry.clone())
            .min_by_key(|o| o.dbref)
    }

    fn lock_text(&self, object: DbRef, lock: LockType) -> Option<String> {
        MemoryWorld::lock_text(self, object, lock)
    }

    fn store_lock(&self, object: DbRef, lock: LockType, text: Option<String>) {
        match text {
            Some(text) => {
                self.locks.insert((object, lock), text);
            }
            None => {
                self.locks.remove(&(object, lock));
            }
        }
    }
}
