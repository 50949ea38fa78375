//! Controllers: the objects that actually handle actions.
//!
//! A controller receives the action name and the positional arguments of an
//! event and returns a JSON result. One controller type may back many
//! actions; the engine routes `/Service/Action` to the service's controller
//! and passes `Action` through as a string.
//!
//! # Instances
//!
//! - Single-instance services share one controller built at registration.
//! - Other services get a fresh controller per call.
//! - Actor-bound calls reuse the controller owned by the actor entry for as
//!   long as the entry lives.
//!
//! Construction goes through the engine's [`InstanceHook`] first. When the
//! hook offers an instance it is used as-is; the service's
//! [`ControllerFactory`] runs only when the hook declines.
//!
//! # Example
//!
//! ```rust,ignore
//! #[derive(Default)]
//! struct GreeterImpl;
//!
//! #[async_trait]
//! impl Controller for GreeterImpl {
//!     async fn dispatch(
//!         &self,
//!         _ctx: &EventContext,
//!         action: &str,
//!         args: Vec<Value>,
//!     ) -> Result<Value, HandlerError> {
//!         match action {
//!             "Hello" => {
//!                 let name: String = arg(&args, 0)?;
//!                 reply(format!("Hello, {name}!"))
//!             }
//!             other => Err(HandlerError::UnknownAction(other.to_string())),
//!         }
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::EventContext;
use crate::directory::{ActorInfo, FreeReason};
use crate::error::HandlerError;
use crate::service::TypeKey;

/// Trait implemented by every handler type.
///
/// Methods take `&self`: actor state lives behind interior mutability. An
/// actor's controller is only ever invoked from the actor's bound queue, so
/// an uncontended lock is enough.
#[async_trait]
pub trait Controller: Send + Sync + 'static {
    /// Handle one action.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Identity of the event and, for actor-bound calls, the actor
    /// * `action` - Action name (the second path segment)
    /// * `args` - Positional arguments from the event
    async fn dispatch(
        &self,
        ctx: &EventContext,
        action: &str,
        args: Vec<Value>,
    ) -> Result<Value, HandlerError>;

    /// Called once before the first event of a new actor entry is handled.
    ///
    /// Runs on the actor's bound queue. If it fails, that event fails with
    /// `InnerError` and the next event addressed to the actor retries it.
    async fn on_actor_init(&self, _ctx: &EventContext) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called once when an initialized actor entry is evicted.
    async fn on_actor_free(
        &self,
        _actor: &ActorInfo,
        _reason: FreeReason,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Builds controller instances for a service.
pub trait ControllerFactory: Send + Sync + 'static {
    /// Construct a new controller.
    fn create(&self) -> Result<Arc<dyn Controller>, HandlerError>;
}

impl<F> ControllerFactory for F
where
    F: Fn() -> Result<Arc<dyn Controller>, HandlerError> + Send + Sync + 'static,
{
    fn create(&self) -> Result<Arc<dyn Controller>, HandlerError> {
        self()
    }
}

/// Factory that builds controllers with `Default::default()`.
pub struct DefaultFactory<T> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> DefaultFactory<T> {
    /// Create the factory.
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for DefaultFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Controller + Default> ControllerFactory for DefaultFactory<T> {
    fn create(&self) -> Result<Arc<dyn Controller>, HandlerError> {
        Ok(Arc::new(T::default()))
    }
}

/// What the engine is about to construct.
#[derive(Debug, Clone, Copy)]
pub struct InstanceRequest<'a> {
    /// Service the controller serves.
    pub service_name: &'a str,
    /// Concrete controller type.
    pub controller: TypeKey,
    /// Actor the instance will be bound to, if any.
    pub actor_id: Option<&'a str>,
}

/// Engine-wide interception point for controller construction.
///
/// Typically wired to a dependency container. Returning `None` falls back
/// to the service's own factory.
pub trait InstanceHook: Send + Sync + fmt::Debug {
    /// Offer an instance for the request, or decline with `None`.
    fn instance(&self, request: &InstanceRequest<'_>) -> Option<Arc<dyn Controller>>;
}

/// Build a controller: hook first, factory as fallback.
pub(crate) fn construct(
    hook: Option<&Arc<dyn InstanceHook>>,
    request: &InstanceRequest<'_>,
    factory: &dyn ControllerFactory,
) -> Result<Arc<dyn Controller>, HandlerError> {
    if let Some(instance) = hook.and_then(|hook| hook.instance(request)) {
        return Ok(instance);
    }
    factory.create()
}

/// Decode the positional argument at `index`.
///
/// # Errors
///
/// [`HandlerError::MissingArgument`] if the event carries fewer arguments,
/// [`HandlerError::InvalidArgument`] if the value does not decode into `T`.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, HandlerError> {
    let value = args.get(index).ok_or(HandlerError::MissingArgument(index))?;
    T::deserialize(value).map_err(|e| HandlerError::InvalidArgument {
        index,
        reason: e.to_string(),
    })
}

/// Encode a handler result.
pub fn reply<T: Serialize>(value: T) -> Result<Value, HandlerError> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Echo;

    #[async_trait]
    impl Controller for Echo {
        async fn dispatch(
            &self,
            _ctx: &EventContext,
            _action: &str,
            args: Vec<Value>,
        ) -> Result<Value, HandlerError> {
            Ok(Value::Array(args))
        }
    }

    struct OfferingHook(Arc<dyn Controller>);

    impl fmt::Debug for OfferingHook {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("OfferingHook").finish_non_exhaustive()
        }
    }

    impl InstanceHook for OfferingHook {
        fn instance(&self, _request: &InstanceRequest<'_>) -> Option<Arc<dyn Controller>> {
            Some(self.0.clone())
        }
    }

    #[derive(Debug)]
    struct DecliningHook;

    impl InstanceHook for DecliningHook {
        fn instance(&self, _request: &InstanceRequest<'_>) -> Option<Arc<dyn Controller>> {
            None
        }
    }

    fn request() -> InstanceRequest<'static> {
        InstanceRequest {
            service_name: "Echo",
            controller: TypeKey::controller::<Echo>(),
            actor_id: None,
        }
    }

    #[test]
    fn test_arg_decoding() {
        let args = vec![json!("world"), json!(7)];

        let name: String = arg(&args, 0).expect("decode should succeed");
        assert_eq!(name, "world");
        let n: u32 = arg(&args, 1).expect("decode should succeed");
        assert_eq!(n, 7);

        assert!(matches!(
            arg::<String>(&args, 2),
            Err(HandlerError::MissingArgument(2))
        ));
        assert!(matches!(
            arg::<u32>(&args, 0),
            Err(HandlerError::InvalidArgument { index: 0, .. })
        ));
    }

    #[test]
    fn test_offered_instance_is_honored() {
        let offered: Arc<dyn Controller> = Arc::new(Echo);
        let hook: Arc<dyn InstanceHook> = Arc::new(OfferingHook(offered.clone()));
        let factory = || -> Result<Arc<dyn Controller>, HandlerError> {
            Err(HandlerError::Construction("factory must not run".into()))
        };

        let built = construct(Some(&hook), &request(), &factory).expect("hook instance");
        assert!(Arc::ptr_eq(&built, &offered));
    }

    #[test]
    fn test_declined_hook_falls_back_to_factory() {
        let hook: Arc<dyn InstanceHook> = Arc::new(DecliningHook);
        let factory = DefaultFactory::<Echo>::new();

        assert!(construct(Some(&hook), &request(), &factory).is_ok());
        assert!(construct(None, &request(), &factory).is_ok());
    }

    #[test]
    fn test_factory_failure_propagates() {
        let factory = || -> Result<Arc<dyn Controller>, HandlerError> {
            Err(HandlerError::Construction("no database".into()))
        };
        assert!(matches!(
            construct(None, &request(), &factory),
            Err(HandlerError::Construction(_))
        ));
    }
}
