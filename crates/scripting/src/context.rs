//! Collaborators shared by every evaluation

use crate::lock::LockEnvironment;
use crate::registry::{CommandRegistry, FunctionRegistry};
use crate::services::{AttributeStore, ConnectionRegistry, NotifySink, ObjectStore, PermissionOracle};
use std::sync::Arc;

/// Everything the engine reads from or acts on outside itself
#[derive(Clone)]
pub struct Services {
    pub objects: Arc<dyn ObjectStore>,
    pub attributes: Arc<dyn AttributeStore>,
    pub permissions: Arc<dyn PermissionOracle>,
    pub notifier: Arc<dyn NotifySink>,
    pub connections: Arc<dyn ConnectionRegistry>,
    pub lock_environment: Arc<dyn LockEnvironment>,
    pub functions: Arc<FunctionRegistry>,
    pub commands: Arc<CommandRegistry>,
}

impl Services {
    /// Services backed by one object implementing every collaborator role
    pub fn from_world<W>(world: Arc<W>, functions: Arc<FunctionRegistry>, commands: Arc<CommandRegistry>) -> Self
    where
        W: ObjectStore
            + AttributeStore
            + PermissionOracle
            + NotifySink
            + ConnectionRegistry
            + LockEnvironment
            + 'static,
    {
        Self {
            objects: world.clone(),
            attributes: world.clone(),
            permissions: world.clone(),
            notifier: world.clone(),
            connections: world.clone(),
            lock_environment: world,
            functions,
            commands,
        }
    }
}
