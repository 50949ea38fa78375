//! Handler registry: action path → handler descriptor.
//!
//! Paths are unique. Registration happens mostly at startup, but the map is
//! a [`DashMap`] so lookups on the dispatch path never observe a torn
//! insert. Re-registering a path keeps the first descriptor.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::controller::{Controller, ControllerFactory};
use crate::directory::ActorCollection;
use crate::error::RegistryError;
use crate::service::{CapabilityInfo, ThreadingMode, TypeKey};

/// Everything the pipeline needs to route one action.
///
/// Immutable once registered.
pub struct HandlerDescriptor {
    /// Service segment of the path.
    pub service_name: String,
    /// Action segment of the path.
    pub action_name: String,
    /// Capability the service exposes.
    pub capability: CapabilityInfo,
    /// Concrete controller type.
    pub controller_type: TypeKey,
    /// Queue selection for unbound calls.
    pub threading_mode: ThreadingMode,
    /// Whether unbound calls share one controller.
    pub single_instance: bool,
    /// Builds controllers for unbound calls and new actors.
    pub factory: Arc<dyn ControllerFactory>,
    /// The shared controller of a single-instance service.
    pub shared_instance: Option<Arc<dyn Controller>>,
    /// Live actors of the controller type. `None` rejects actor-bound calls.
    pub actors: Option<Arc<ActorCollection>>,
    /// Argument positions that pin `SingleQueue` calls.
    pub key_parameter_indices: Vec<usize>,
}

impl HandlerDescriptor {
    /// Action path of this handler.
    pub fn path(&self) -> String {
        crate::service::action_path(&self.service_name, &self.action_name)
    }

    /// Pinning key for an unbound `SingleQueue` call.
    ///
    /// The JSON text of each keyed argument, joined by `.`. Positions beyond
    /// the supplied arguments are skipped.
    pub fn queue_key(&self, args: &[Value]) -> String {
        self.key_parameter_indices
            .iter()
            .filter_map(|&index| args.get(index))
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("service_name", &self.service_name)
            .field("action_name", &self.action_name)
            .field("capability", &self.capability.name)
            .field("controller_type", &self.controller_type)
            .field("threading_mode", &self.threading_mode)
            .field("single_instance", &self.single_instance)
            .field("actors", &self.actors.is_some())
            .field("key_parameter_indices", &self.key_parameter_indices)
            .finish()
    }
}

/// Concurrent path → descriptor map.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<HandlerDescriptor>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `path` to `descriptor`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyExists`] if the path is taken. The existing
    /// descriptor stays in place.
    pub fn register(
        &self,
        path: impl Into<String>,
        descriptor: HandlerDescriptor,
    ) -> Result<(), RegistryError> {
        match self.handlers.entry(path.into()) {
            Entry::Occupied(occupied) => Err(RegistryError::AlreadyExists {
                path: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(descriptor));
                Ok(())
            }
        }
    }

    /// Find the handler bound to `path`.
    pub fn lookup(&self, path: &str) -> Option<Arc<HandlerDescriptor>> {
        self.handlers.get(path).map(|entry| entry.value().clone())
    }

    /// Number of registered paths.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no path is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// All registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers.clear();
    }
}
