//! Error types for the dispatch engine.
//!
//! Two layers of errors live here:
//!
//! - [`EventError`] is the result kind carried inside every
//!   [`EventOutput`](crate::EventOutput). Callers always receive an output and
//!   must check its kind before trusting the data.
//! - The `thiserror` enums describe failures inside the engine (handler
//!   failures, registration problems, configuration, stubs, event log). They
//!   are converted into an `EventError` at the pipeline boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result kind of a dispatched event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventError {
    /// The handler ran and produced a result.
    #[default]
    Success,

    /// No handler is bound to the requested path. The event never reached a queue.
    NotFound,

    /// The handler failed, or a pipeline step before queue submission failed.
    InnerError,

    /// Caller misuse (stub for a concrete type, actor id on a non-actor service).
    NotSupport,
}

impl EventError {
    /// Check if this kind denotes success.
    pub fn is_success(&self) -> bool {
        matches!(self, EventError::Success)
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventError::Success => "Success",
            EventError::NotFound => "NotFound",
            EventError::InnerError => "InnerError",
            EventError::NotSupport => "NotSupport",
        };
        f.write_str(name)
    }
}

/// Errors returned by controllers while handling an action.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The controller does not implement the requested action.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// A positional argument was not supplied.
    #[error("missing argument at position {0}")]
    MissingArgument(usize),

    /// A positional argument could not be decoded into the declared type.
    #[error("invalid argument at position {index}: {reason}")]
    InvalidArgument {
        /// Argument position.
        index: usize,
        /// Decoder message.
        reason: String,
    },

    /// Result serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event log access failed.
    #[error("event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// Controller construction failed.
    #[error("controller construction failed: {0}")]
    Construction(String),

    /// Generic handler failure.
    #[error("handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Errors from the handler registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A handler is already bound to this path; the first registration is kept.
    #[error("action already exists: {path}")]
    AlreadyExists {
        /// The conflicting action path.
        path: String,
    },
}

/// Errors from registering a service with the engine.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// A service or action name is empty or contains `/`.
    #[error("invalid name {name:?} in service {service}")]
    InvalidName {
        /// Service being registered.
        service: String,
        /// Offending name.
        name: String,
    },

    /// The service declares no actions.
    #[error("service {0} declares no actions")]
    NoActions(String),

    /// A key parameter list was attached to an action the service does not declare.
    #[error("service {service} has no action {action} to pin by key")]
    UnknownKeyedAction {
        /// Service being registered.
        service: String,
        /// Action named by the key declaration.
        action: String,
    },

    /// The single-instance controller could not be constructed.
    #[error("service {service} controller construction failed: {source}")]
    Factory {
        /// Service being registered.
        service: String,
        /// Underlying failure.
        #[source]
        source: HandlerError,
    },
}

/// Errors from building an [`EngineConfig`](crate::EngineConfig) or engine.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The queue pool needs at least one queue.
    #[error("queue count must be at least 1")]
    ZeroQueues,

    /// Actors must stay alive for a non-zero duration.
    #[error("actor free time must be greater than zero")]
    ZeroActorFreeTime,

    /// The idle sweep period must be non-zero.
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,

    /// The engine spawns its queues on the ambient tokio runtime.
    #[error("event engine must be created inside a tokio runtime")]
    NoRuntime,
}

/// Errors surfaced by client stubs.
#[derive(Debug, Error)]
pub enum StubError {
    /// Stubs can only be created for capabilities, not concrete controller types.
    #[error("{type_name} is not a capability")]
    NotSupport {
        /// The rejected type.
        type_name: String,
    },

    /// The capability does not declare this action.
    #[error("capability {capability} has no action {action}")]
    UnknownAction {
        /// Capability name.
        capability: String,
        /// Requested action.
        action: String,
    },

    /// The dispatched event completed with a non-success kind.
    #[error("{kind}: {message}")]
    Event {
        /// Result kind from the output envelope.
        kind: EventError,
        /// Error detail from the output envelope.
        message: String,
    },

    /// An argument could not be encoded.
    #[error("argument encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The result could not be decoded into the declared return type.
    #[error("result decoding failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The engine backing this stub has been dropped.
    #[error("event engine closed")]
    EngineClosed,
}

impl StubError {
    /// Map this error onto the output envelope taxonomy.
    pub fn kind(&self) -> EventError {
        match self {
            StubError::NotSupport { .. } | StubError::UnknownAction { .. } => {
                EventError::NotSupport
            }
            StubError::Event { kind, .. } => *kind,
            StubError::Encode(_) | StubError::Decode(_) | StubError::EngineClosed => {
                EventError::InnerError
            }
        }
    }
}

/// Errors from the event-log connector and its backends.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Event log access requires an actor-bound event context.
    #[error("event log requires an actor-bound context")]
    NotActorBound,

    /// Payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend failed.
    #[error("event log backend failed: {0}")]
    Backend(String),
}
