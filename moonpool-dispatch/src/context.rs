//! Per-call context handed to controllers.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::directory::ActorInfo;
use crate::error::EventLogError;
use crate::event::EventInput;
use crate::event_log::{EventLog, EventLogRecord};

/// What a controller knows about the call it is handling.
///
/// Gives access to the event identity, the bound actor (if any), the
/// engine-wide property bag and the event log.
#[derive(Debug, Clone)]
pub struct EventContext {
    id: i64,
    token: String,
    event_path: String,
    properties: HashMap<String, String>,
    queue_id: usize,
    actor: Option<ActorInfo>,
    engine_properties: Arc<DashMap<String, Value>>,
    event_log: EventLog,
}

impl EventContext {
    pub(crate) fn for_input(input: &EventInput, queue_id: usize) -> Self {
        Self {
            id: input.id,
            token: input.token.clone(),
            event_path: input.path.clone(),
            properties: input.properties.clone(),
            queue_id,
            actor: None,
            engine_properties: Arc::default(),
            event_log: EventLog::default(),
        }
    }

    pub(crate) fn with_actor(mut self, actor: ActorInfo) -> Self {
        self.actor = Some(actor);
        self
    }

    pub(crate) fn with_engine_properties(mut self, properties: Arc<DashMap<String, Value>>) -> Self {
        self.engine_properties = properties;
        self
    }

    pub(crate) fn with_event_log(mut self, event_log: EventLog) -> Self {
        self.event_log = event_log;
        self
    }

    /// Id of the event being handled.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Caller correlation token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Action path of the event, `/Service/Action`.
    pub fn event_path(&self) -> &str {
        &self.event_path
    }

    /// Index of the serial queue running this call.
    pub fn queue_id(&self) -> usize {
        self.queue_id
    }

    /// A property of the event.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The actor this call is bound to.
    pub fn actor(&self) -> Option<&ActorInfo> {
        self.actor.as_ref()
    }

    /// Id of the bound actor.
    pub fn actor_id(&self) -> Option<&str> {
        self.actor.as_ref().map(|a| a.actor_id.as_str())
    }

    /// Path of the bound actor, `/Service/actorId`.
    pub fn actor_path(&self) -> Option<&str> {
        self.actor.as_ref().map(|a| a.actor_path.as_str())
    }

    /// Read a value from the engine-wide property bag.
    pub fn engine_property(&self, key: &str) -> Option<Value> {
        self.engine_properties.get(key).map(|v| v.value().clone())
    }

    /// The event-log connector.
    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Read a record from the bound actor's event log.
    pub async fn read_event(&self, event_id: &str) -> Result<Option<EventLogRecord>, EventLogError> {
        self.event_log.read(self, event_id).await
    }

    /// Append a record to the bound actor's event log.
    ///
    /// Returns the id the backend assigned, or `None` without a backend.
    pub async fn write_event<T: Serialize>(
        &self,
        event_id: &str,
        parent_event_id: Option<&str>,
        payload: T,
    ) -> Result<Option<String>, EventLogError> {
        let payload = serde_json::to_value(payload)?;
        self.event_log
            .write(self, event_id, parent_event_id, payload)
            .await
    }
}
