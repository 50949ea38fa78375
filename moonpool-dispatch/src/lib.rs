//! # moonpool-dispatch
//!
//! In-process, actor-style event dispatch over a fixed pool of serial
//! execution queues.
//!
//! Callers submit events addressed to `/Service/Action`. The engine resolves
//! the handler, picks a queue, runs the controller and delivers exactly one
//! [`EventOutput`]. Events that carry an actor id are bound to a long-lived
//! actor whose calls always run on the same queue, one at a time.
//!
//! ## Architecture
//!
//! ```text
//! caller ──▶ Stub (optional)
//!              │
//!              ▼
//!        EventEngine::execute ──▶ HandlerRegistry (path ▶ descriptor)
//!              │
//!              ├── actor id? ──▶ ActorDirectory (get-or-create, touch)
//!              │                      │ bound queue
//!              ▼                      ▼
//!          QueuePool ─────────▶ SerialQueue ──▶ Controller::dispatch
//!                                                     │
//!                                       EventCompletion (exactly once)
//! ```
//!
//! ## Queue selection
//!
//! | Call | Queue |
//! |------|-------|
//! | Actor-bound | The actor's bound queue, fixed for its lifetime |
//! | `SingleQueue` action | CRC32C of the keyed arguments, modulo the pool size |
//! | Anything else | Round robin, skipping queues with a backlog |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use moonpool_dispatch::prelude::*;
//!
//! let engine = EventEngine::new(EngineConfig::default())?;
//! engine.register(Service::with_default::<Greeter, GreeterImpl>().single_instance())?;
//!
//! let output = engine
//!     .execute(EventInput::new("/Greeter/Hello").with_arg("world"))
//!     .await;
//! assert!(output.is_success());
//! ```

#![deny(missing_docs)]

/// Emit a tracing event only if `$filter` admits `$level`.
///
/// The engine's configured minimum level applies even when the installed
/// subscriber is more permissive.
macro_rules! gated {
    ($filter:expr, $level:ident, $($arg:tt)+) => {
        if tracing::Level::$level <= $filter {
            tracing::event!(tracing::Level::$level, $($arg)+);
        }
    };
}

pub mod config;
pub mod context;
pub mod controller;
pub mod directory;
pub mod engine;
pub mod error;
pub mod event;
pub mod event_log;
pub mod prelude;
pub mod queue;
pub mod registry;
pub mod service;
pub mod stub;
pub mod time;

pub use config::{
    EngineConfig, EngineConfigBuilder, DEFAULT_ACTOR_FREE_TIME, DEFAULT_MAX_PENDING_PER_QUEUE,
    DEFAULT_SWEEP_INTERVAL,
};
pub use context::EventContext;
pub use controller::{
    arg, reply, Controller, ControllerFactory, DefaultFactory, InstanceHook, InstanceRequest,
};
pub use directory::{ActorCollection, ActorDirectory, ActorEntry, ActorInfo, FreeReason, SweepTask};
pub use engine::{EventCompletion, EventEngine};
pub use error::{
    ConfigError, EventError, EventLogError, HandlerError, RegisterError, RegistryError, StubError,
};
pub use event::{EventInput, EventOutput, ACTOR_NULL_TAG, ACTOR_PROPERTY_KEY};
pub use event_log::{EventLog, EventLogRecord, EventLogStore, InMemoryEventLog};
pub use queue::{QueueClosed, QueuePool, SerialQueue};
pub use registry::{HandlerDescriptor, HandlerRegistry};
pub use service::{action_path, Capability, CapabilityInfo, Service, ThreadingMode, TypeKey};
pub use stub::{encode, Stub, StubRef};
pub use time::{Clock, TokioClock};
