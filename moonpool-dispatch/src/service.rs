//! Explicit service registration.
//!
//! A [`Capability`] declares the public face of a service: its name and
//! the actions it exposes. A [`Service`] binds a capability to a controller
//! type and its instance policy. Registering a service with the engine
//! produces one handler per action at `/<Service>/<Action>`.
//!
//! # Example
//!
//! ```rust,ignore
//! pub struct Greeter;
//!
//! impl Capability for Greeter {
//!     const NAME: &'static str = "Greeter";
//!     const ACTIONS: &'static [&'static str] = &["Hello", "Count"];
//! }
//!
//! engine.register(
//!     Service::with_default::<Greeter, GreeterImpl>()
//!         .single_instance()
//!         .keyed_action("Count", [0]),
//! )?;
//! ```

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::controller::{Controller, ControllerFactory, DefaultFactory};
use crate::error::RegisterError;

/// A capability: the interface a service exposes to callers and stubs.
///
/// Implemented on a marker type (or on `dyn Trait`) rather than on the
/// controller, so callers can address a service without naming its
/// implementation.
pub trait Capability: 'static {
    /// Capability name. Stubs are cached under it.
    const NAME: &'static str;

    /// Service name used in action paths. Defaults to [`Self::NAME`].
    const SERVICE: &'static str = Self::NAME;

    /// Actions declared by the capability.
    const ACTIONS: &'static [&'static str];
}

/// Runtime view of a [`Capability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityInfo {
    /// Capability name.
    pub name: &'static str,
    /// Service name used in action paths.
    pub service_name: &'static str,
    /// Declared actions.
    pub actions: &'static [&'static str],
}

impl CapabilityInfo {
    /// Describe a capability type.
    pub fn of<C: Capability + ?Sized>() -> Self {
        Self {
            name: C::NAME,
            service_name: C::SERVICE,
            actions: C::ACTIONS,
        }
    }
}

/// Key identifying either a concrete controller type or a capability.
///
/// Actor collections are reachable under both keys. Stubs can only be built
/// from the capability form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKey {
    /// A concrete controller type.
    Controller {
        /// Type id of the controller.
        id: TypeId,
        /// Type name, for diagnostics.
        name: &'static str,
    },
    /// A capability, by name.
    Capability(&'static str),
}

impl TypeKey {
    /// Key of a concrete controller type.
    pub fn controller<T: 'static>() -> Self {
        TypeKey::Controller {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Key of a capability.
    pub fn capability<C: Capability + ?Sized>() -> Self {
        TypeKey::Capability(C::NAME)
    }

    /// Human-readable name of the keyed type.
    pub fn name(&self) -> &'static str {
        match self {
            TypeKey::Controller { name, .. } => *name,
            TypeKey::Capability(name) => *name,
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How calls to an action that are not actor-bound pick their queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ThreadingMode {
    /// Round robin with load skip.
    #[default]
    Default,
    /// Pinned by the values of the key parameters.
    SingleQueue,
}

/// Registration builder binding a capability to a controller type.
pub struct Service {
    pub(crate) capability: CapabilityInfo,
    pub(crate) controller: TypeKey,
    pub(crate) factory: Arc<dyn ControllerFactory>,
    pub(crate) actions: Vec<String>,
    pub(crate) keyed: BTreeMap<String, Vec<usize>>,
    pub(crate) single_instance: bool,
    pub(crate) actors: bool,
}

impl Service {
    /// Bind capability `C` to controller type `T`, built by `factory`.
    pub fn new<C, T>(factory: impl ControllerFactory) -> Self
    where
        C: Capability + ?Sized,
        T: Controller,
    {
        let capability = CapabilityInfo::of::<C>();
        Self {
            capability,
            controller: TypeKey::controller::<T>(),
            factory: Arc::new(factory),
            actions: capability.actions.iter().map(|a| a.to_string()).collect(),
            keyed: BTreeMap::new(),
            single_instance: false,
            actors: true,
        }
    }

    /// Bind capability `C` to controller type `T`, built with `Default`.
    pub fn with_default<C, T>() -> Self
    where
        C: Capability + ?Sized,
        T: Controller + Default,
    {
        Self::new::<C, T>(DefaultFactory::<T>::new())
    }

    /// Share one controller, built at registration, across all unbound calls.
    pub fn single_instance(mut self) -> Self {
        self.single_instance = true;
        self
    }

    /// Reject actor-bound calls to this service.
    pub fn without_actors(mut self) -> Self {
        self.actors = false;
        self
    }

    /// Declare an action beyond the capability's own list.
    pub fn action(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.actions.contains(&name) {
            self.actions.push(name);
        }
        self
    }

    /// Pin unbound calls of `action` to a queue chosen from the arguments at
    /// `indices`.
    ///
    /// Calls agreeing on those arguments run in submission order. An empty
    /// index list pins every call of the action to one queue.
    pub fn keyed_action(
        mut self,
        action: impl Into<String>,
        indices: impl IntoIterator<Item = usize>,
    ) -> Self {
        self.keyed
            .insert(action.into(), indices.into_iter().collect());
        self
    }

    /// Service name used in action paths.
    pub fn name(&self) -> &'static str {
        self.capability.service_name
    }

    /// The bound capability.
    pub fn capability(&self) -> CapabilityInfo {
        self.capability
    }

    /// Key of the concrete controller type.
    pub fn controller_type(&self) -> TypeKey {
        self.controller
    }

    /// Declared actions, in declaration order.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    /// Check names, action list and key declarations.
    pub(crate) fn validate(&self) -> Result<(), RegisterError> {
        let service = self.name();
        check_name(service, service)?;
        if self.actions.is_empty() {
            return Err(RegisterError::NoActions(service.to_string()));
        }
        for action in &self.actions {
            check_name(service, action)?;
        }
        for action in self.keyed.keys() {
            if !self.actions.contains(action) {
                return Err(RegisterError::UnknownKeyedAction {
                    service: service.to_string(),
                    action: action.clone(),
                });
            }
        }
        Ok(())
    }

    /// Action path for `action`.
    pub(crate) fn path(&self, action: &str) -> String {
        action_path(self.name(), action)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("capability", &self.capability.name)
            .field("controller", &self.controller)
            .field("actions", &self.actions)
            .field("keyed", &self.keyed)
            .field("single_instance", &self.single_instance)
            .field("actors", &self.actors)
            .finish()
    }
}

/// Build `/<service>/<action>`.
pub fn action_path(service: &str, action: &str) -> String {
    format!("/{service}/{action}")
}

fn check_name(service: &str, name: &str) -> Result<(), RegisterError> {
    if name.is_empty() || name.contains('/') {
        return Err(RegisterError::InvalidName {
            service: service.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}
