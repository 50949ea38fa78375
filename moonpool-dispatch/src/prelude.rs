//! Common imports for writing controllers and calling the engine.

pub use crate::config::{EngineConfig, EngineConfigBuilder};
pub use crate::context::EventContext;
pub use crate::controller::{arg, reply, Controller, InstanceHook, InstanceRequest};
pub use crate::directory::{ActorInfo, FreeReason};
pub use crate::engine::EventEngine;
pub use crate::error::{EventError, HandlerError, StubError};
pub use crate::event::{EventInput, EventOutput};
pub use crate::service::{Capability, Service, TypeKey};
pub use crate::stub::{encode, Stub, StubRef};

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use serde_json::{json, Value};
pub use std::sync::Arc;
pub use std::time::Duration;
