//! Client stubs: method-style calls over the dispatch pipeline.
//!
//! A [`Stub`] is bound to a capability and, optionally, an actor id. Each
//! call becomes an [`EventInput`] for `/<Service>/<Action>` carrying the
//! arguments positionally and the actor id as a property; the output is
//! mapped back to a typed result.
//!
//! Typed wrappers implement [`StubRef`] and expose ordinary async methods:
//!
//! ```rust,ignore
//! struct GreeterRef(Arc<Stub>);
//!
//! impl StubRef for GreeterRef {
//!     type Capability = Greeter;
//!     fn from_stub(stub: Arc<Stub>) -> Self { Self(stub) }
//! }
//!
//! impl GreeterRef {
//!     async fn hello(&self, name: &str) -> Result<String, StubError> {
//!         self.0.call("Hello", vec![encode(&name)?]).await
//!     }
//! }
//!
//! let greeter: GreeterRef = engine.stub(Some("u1"));
//! let greeting = greeter.hello("world").await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::engine::{EngineInner, EventEngine};
use crate::error::StubError;
use crate::event::{EventInput, EventOutput, ACTOR_NULL_TAG};
use crate::service::{action_path, Capability, CapabilityInfo};

/// Typed wrapper around a [`Stub`].
pub trait StubRef: Sized {
    /// Capability the wrapper calls.
    type Capability: Capability + ?Sized;

    /// Wrap an untyped stub.
    fn from_stub(stub: Arc<Stub>) -> Self;
}

/// Untyped stub for one capability and actor.
pub struct Stub {
    engine: Weak<EngineInner>,
    capability: CapabilityInfo,
    actor_id: String,
    paths: HashMap<&'static str, String>,
}

impl Stub {
    pub(crate) fn new(engine: Weak<EngineInner>, capability: CapabilityInfo, actor_id: String) -> Self {
        let paths = capability
            .actions
            .iter()
            .map(|action| (*action, action_path(capability.service_name, action)))
            .collect();
        Self {
            engine,
            capability,
            actor_id,
            paths,
        }
    }

    /// The capability this stub calls.
    pub fn capability(&self) -> CapabilityInfo {
        self.capability
    }

    /// The bound actor, or `None` for the null actor.
    pub fn actor_id(&self) -> Option<&str> {
        if self.actor_id == ACTOR_NULL_TAG {
            None
        } else {
            Some(&self.actor_id)
        }
    }

    /// Action path for `action`, if the capability declares it.
    pub fn path(&self, action: &str) -> Option<&str> {
        self.paths.get(action).map(String::as_str)
    }

    /// Build the event for a call without submitting it.
    pub fn input(&self, action: &str, args: Vec<Value>) -> Result<EventInput, StubError> {
        let path = self.path(action).ok_or_else(|| StubError::UnknownAction {
            capability: self.capability.name.to_string(),
            action: action.to_string(),
        })?;
        let input = EventInput::new(path).with_args(args);
        Ok(match self.actor_id() {
            Some(actor_id) => input.with_actor(actor_id),
            None => input,
        })
    }

    /// Call an action and return the raw output envelope.
    pub async fn invoke(&self, action: &str, args: Vec<Value>) -> Result<EventOutput, StubError> {
        let input = self.input(action, args)?;
        let engine = self.engine.upgrade().ok_or(StubError::EngineClosed)?;
        Ok(EventEngine::from_inner(engine).execute(input).await)
    }

    /// Call an action and return its JSON result.
    ///
    /// # Errors
    ///
    /// [`StubError::Event`] when the output is not a success, carrying its
    /// kind and message.
    pub async fn call_raw(&self, action: &str, args: Vec<Value>) -> Result<Value, StubError> {
        let output = self.invoke(action, args).await?;
        if !output.is_success() {
            return Err(StubError::Event {
                kind: output.error,
                message: output.error_message().unwrap_or_default().to_string(),
            });
        }
        Ok(output.data.into_iter().next().unwrap_or(Value::Null))
    }

    /// Call an action and decode its result into `R`.
    pub async fn call<R: DeserializeOwned>(
        &self,
        action: &str,
        args: Vec<Value>,
    ) -> Result<R, StubError> {
        let value = self.call_raw(action, args).await?;
        serde_json::from_value(value).map_err(StubError::Decode)
    }
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("capability", &self.capability.name)
            .field("actor_id", &self.actor_id)
            .finish()
    }
}

/// Encode one call argument.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Value, StubError> {
    serde_json::to_value(value).map_err(StubError::Encode)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::EventError;
    use crate::event::ACTOR_PROPERTY_KEY;

    struct Ledger;

    impl Capability for Ledger {
        const NAME: &'static str = "ILedger";
        const SERVICE: &'static str = "Ledger";
        const ACTIONS: &'static [&'static str] = &["Deposit", "Balance"];
    }

    fn detached(actor: &str) -> Stub {
        Stub::new(Weak::new(), CapabilityInfo::of::<Ledger>(), actor.to_string())
    }

    #[test]
    fn test_paths_computed_at_construction() {
        let stub = detached(ACTOR_NULL_TAG);
        assert_eq!(stub.path("Deposit"), Some("/Ledger/Deposit"));
        assert_eq!(stub.path("Balance"), Some("/Ledger/Balance"));
        assert_eq!(stub.path("Withdraw"), None);
        assert_eq!(stub.actor_id(), None);
    }

    #[test]
    fn test_input_carries_actor_unless_null() {
        let bound = detached("acct-1");
        let input = bound
            .input("Deposit", vec![json!(10)])
            .expect("input should build");
        assert_eq!(input.path, "/Ledger/Deposit");
        assert_eq!(input.data, vec![json!(10)]);
        assert_eq!(input.actor_id(), Some("acct-1"));

        let unbound = detached(ACTOR_NULL_TAG);
        let input = unbound.input("Balance", vec![]).expect("input should build");
        assert!(!input.properties.contains_key(ACTOR_PROPERTY_KEY));
    }

    #[test]
    fn test_unknown_action_is_not_support() {
        let stub = detached(ACTOR_NULL_TAG);
        let err = stub
            .input("Withdraw", vec![])
            .expect_err("undeclared action should fail");
        assert_eq!(err.kind(), EventError::NotSupport);
    }

    #[tokio::test]
    async fn test_detached_stub_reports_engine_closed() {
        let stub = detached("acct-1");
        let err = stub
            .call::<i64>("Balance", vec![])
            .await
            .expect_err("no engine behind the stub");
        assert!(matches!(err, StubError::EngineClosed));
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode("world").expect("encode"), json!("world"));
        assert_eq!(encode(&vec![1, 2]).expect("encode"), json!([1, 2]));
    }
}
