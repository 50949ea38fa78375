//! Event envelopes exchanged between callers and the engine.
//!
//! # Design
//!
//! - `EventInput` names a handler by its action path (`/Service/Action`) and
//!   carries positional arguments as JSON values.
//! - The reserved [`ACTOR_PROPERTY_KEY`] property binds the call to an actor.
//! - `EventOutput` echoes the input's id and token and carries either the
//!   handler result or an error message, tagged with an [`EventError`] kind.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventError;

/// Property key carrying the actor id of an actor-bound event.
pub const ACTOR_PROPERTY_KEY: &str = "ACTOR";

/// Actor id used for stubs created without an actor.
pub const ACTOR_NULL_TAG: &str = "___NULL_ACTOR";

/// An event submitted to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventInput {
    /// Event id. `0` means "assign one on submission".
    pub id: i64,
    /// Caller-supplied correlation token, echoed in the output.
    pub token: String,
    /// Action path, `/Service/Action`.
    pub path: String,
    /// Positional call arguments.
    pub data: Vec<Value>,
    /// String properties. [`ACTOR_PROPERTY_KEY`] carries the actor id.
    pub properties: HashMap<String, String>,
}

impl EventInput {
    /// Create an input for the given action path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the correlation token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.data.push(arg.into());
        self
    }

    /// Replace all positional arguments.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.data = args;
        self
    }

    /// Bind the event to an actor.
    pub fn with_actor(self, actor_id: impl Into<String>) -> Self {
        self.with_property(ACTOR_PROPERTY_KEY, actor_id)
    }

    /// Set an arbitrary property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The actor id carried by this event, if any.
    ///
    /// An empty id counts as no actor.
    pub fn actor_id(&self) -> Option<&str> {
        self.properties
            .get(ACTOR_PROPERTY_KEY)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// The outcome of a dispatched event, delivered exactly once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventOutput {
    /// Id of the input this output answers.
    pub id: i64,
    /// Token echoed from the input.
    pub token: String,
    /// Result kind. Check it before trusting `data`.
    pub error: EventError,
    /// The handler result, or the error message.
    pub data: Vec<Value>,
}

impl EventOutput {
    /// Build the output shell for an input.
    pub fn for_input(input: &EventInput) -> Self {
        Self {
            id: input.id,
            token: input.token.clone(),
            error: EventError::Success,
            data: Vec::new(),
        }
    }

    /// Check if the event succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_success()
    }

    /// The error message of a failed event.
    pub fn error_message(&self) -> Option<&str> {
        if self.is_success() {
            return None;
        }
        self.data.first().and_then(Value::as_str)
    }

    /// The handler result of a successful event.
    pub fn result(&self) -> Option<&Value> {
        if self.is_success() {
            self.data.first()
        } else {
            None
        }
    }

    pub(crate) fn fail(&mut self, kind: EventError, message: impl Into<String>) {
        self.error = kind;
        self.data = vec![Value::String(message.into())];
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_input_builder() {
        let input = EventInput::new("/Greeter/Hello")
            .with_token("t-1")
            .with_arg("world")
            .with_arg(3)
            .with_actor("u1");

        assert_eq!(input.path, "/Greeter/Hello");
        assert_eq!(input.token, "t-1");
        assert_eq!(input.data, vec![json!("world"), json!(3)]);
        assert_eq!(input.actor_id(), Some("u1"));
    }

    #[test]
    fn test_empty_actor_id_is_unbound() {
        let input = EventInput::new("/Greeter/Hello").with_actor("");
        assert_eq!(input.actor_id(), None);
    }

    #[test]
    fn test_output_echoes_input() {
        let mut input = EventInput::new("/Greeter/Hello").with_token("abc");
        input.id = 42;

        let output = EventOutput::for_input(&input);
        assert_eq!(output.id, 42);
        assert_eq!(output.token, "abc");
        assert!(output.is_success());
        assert!(output.error_message().is_none());
    }

    #[test]
    fn test_failed_output_exposes_message() {
        let mut output = EventOutput::default();
        output.fail(EventError::NotFound, "nope");

        assert_eq!(output.error, EventError::NotFound);
        assert_eq!(output.error_message(), Some("nope"));
        assert!(output.result().is_none());
    }
}
