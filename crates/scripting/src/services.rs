//! Collaborators the engine calls into
//!
//! The engine owns no world state. Objects, attributes, permissions and
//! output delivery all live behind these traits; every call is an await
//! point that the evaluator races against cancellation.

use crate::attributes::{Attribute, AttributePath};
use crate::Result;
use async_trait::async_trait;
use mush_core::{DbRef, MString, SharpObject};
use serde::Serialize;

/// Privilege a function or command may demand of its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Capability {
    Wizard,
    Royalty,
}

/// What is being executed, for [`PermissionOracle::can_execute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callee {
    pub name: String,
    pub requires: Option<Capability>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn object(&self, dbref: DbRef) -> Option<SharpObject>;

    async fn contents(&self, dbref: DbRef) -> Vec<DbRef>;

    async fn find_player(&self, name: &str) -> Option<DbRef>;
}

/// Attribute trees of objects. Lookups here never consult parents.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// The attributes along `path` on `object`, outermost segment first.
    /// Stops at the first missing segment, so a complete match has one
    /// entry per segment.
    async fn attribute_chain(&self, object: DbRef, path: &AttributePath) -> Vec<Attribute>;

    /// Every attribute set directly on `object`
    async fn attributes(&self, object: DbRef) -> Vec<Attribute>;

    async fn set_attribute(
        &self,
        object: DbRef,
        path: &AttributePath,
        value: MString,
        owner: DbRef,
    ) -> Result<()>;

    /// Remove one attribute. Fails if it still has children.
    async fn clear_attribute(&self, object: DbRef, path: &AttributePath) -> Result<bool>;

    /// Remove every attribute matching `pattern`, returning how many went
    async fn wipe_attributes(&self, object: DbRef, pattern: &str) -> Result<usize>;
}

#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn controls(&self, who: DbRef, what: DbRef) -> bool;

    async fn can_examine(&self, who: DbRef, what: DbRef) -> bool;

    async fn can_execute(&self, who: DbRef, callee: &Callee) -> bool;

    async fn can_interact(&self, from: DbRef, to: DbRef) -> bool;
}

/// A message bound for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub target: DbRef,
    pub sender: DbRef,
    pub message: MString,
}

#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify_batch(&self, batch: Vec<Notification>);

    async fn notify(&self, target: DbRef, sender: DbRef, message: MString) {
        self.notify_batch(vec![Notification {
            target,
            sender,
            message,
        }])
        .await;
    }
}

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// The player logged in on a connection handle
    async fn bound_player(&self, handle: u64) -> Option<DbRef>;
}
