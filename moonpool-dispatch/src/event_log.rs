//! Event-log connector.
//!
//! Actors record causally linked events (each record may name a parent
//! event) through their [`EventContext`]. The connector stamps the record
//! with the actor path, the event path of the current call and the wall
//! clock time, then forwards it to an injected [`EventLogStore`].
//!
//! Without a store both operations are no-ops: reads find nothing and
//! writes assign no id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::EventContext;
use crate::directory::ActorInfo;
use crate::error::EventLogError;

/// One logged actor event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    /// Id of this event.
    pub event_id: String,
    /// Event that caused this one, if any.
    pub parent_event_id: Option<String>,
    /// `/Service/actorId` of the recording actor.
    pub actor_path: String,
    /// Action path of the call that recorded the event.
    pub event_path: String,
    /// Wall clock time of the write.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub payload: Value,
}

/// Storage backend for event-log records.
#[async_trait]
pub trait EventLogStore: Send + Sync + fmt::Debug {
    /// Load a record of `actor` by id.
    async fn read(
        &self,
        actor: &ActorInfo,
        event_id: &str,
    ) -> Result<Option<EventLogRecord>, EventLogError>;

    /// Append a record. Returns the id the backend stored it under.
    async fn write(
        &self,
        actor: &ActorInfo,
        record: EventLogRecord,
    ) -> Result<Option<String>, EventLogError>;
}

/// Forwarding handle held by every [`EventContext`].
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    store: Option<Arc<dyn EventLogStore>>,
}

impl EventLog {
    /// Wrap an optional backend.
    pub fn new(store: Option<Arc<dyn EventLogStore>>) -> Self {
        Self { store }
    }

    /// Check whether a backend is attached.
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Read a record of the context's actor.
    ///
    /// # Errors
    ///
    /// [`EventLogError::NotActorBound`] if a backend is attached but the
    /// call is not actor-bound.
    pub async fn read(
        &self,
        ctx: &EventContext,
        event_id: &str,
    ) -> Result<Option<EventLogRecord>, EventLogError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let actor = ctx.actor().ok_or(EventLogError::NotActorBound)?;
        store.read(actor, event_id).await
    }

    /// Record an event of the context's actor.
    ///
    /// # Errors
    ///
    /// [`EventLogError::NotActorBound`] if a backend is attached but the
    /// call is not actor-bound; backend failures pass through.
    pub async fn write(
        &self,
        ctx: &EventContext,
        event_id: &str,
        parent_event_id: Option<&str>,
        payload: Value,
    ) -> Result<Option<String>, EventLogError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let actor = ctx.actor().ok_or(EventLogError::NotActorBound)?;
        let record = EventLogRecord {
            event_id: event_id.to_string(),
            parent_event_id: parent_event_id.map(str::to_string),
            actor_path: actor.actor_path.clone(),
            event_path: ctx.event_path().to_string(),
            timestamp: Utc::now(),
            payload,
        };
        store.write(actor, record).await
    }
}

/// Process-local [`EventLogStore`].
///
/// Records are keyed by actor path and event id. An empty event id gets a
/// generated one (`evt-<n>`).
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    records: DashMap<(String, String), EventLogRecord>,
    next_id: AtomicU64,
}

impl InMemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records caused by `parent_event_id` in the log of `actor_path`.
    pub fn children(&self, actor_path: &str, parent_event_id: &str) -> Vec<EventLogRecord> {
        let mut children: Vec<EventLogRecord> = self
            .records
            .iter()
            .filter(|entry| {
                entry.key().0 == actor_path
                    && entry.value().parent_event_id.as_deref() == Some(parent_event_id)
            })
            .map(|entry| entry.value().clone())
            .collect();
        children.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        children
    }
}

#[async_trait]
impl EventLogStore for InMemoryEventLog {
    async fn read(
        &self,
        actor: &ActorInfo,
        event_id: &str,
    ) -> Result<Option<EventLogRecord>, EventLogError> {
        let key = (actor.actor_path.clone(), event_id.to_string());
        Ok(self.records.get(&key).map(|entry| entry.value().clone()))
    }

    async fn write(
        &self,
        actor: &ActorInfo,
        mut record: EventLogRecord,
    ) -> Result<Option<String>, EventLogError> {
        if record.event_id.is_empty() {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            record.event_id = format!("evt-{n}");
        }
        let id = record.event_id.clone();
        self.records
            .insert((actor.actor_path.clone(), id.clone()), record);
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::EventInput;

    fn actor() -> ActorInfo {
        ActorInfo::new("Ledger", "acct-1")
    }

    fn context(log: EventLog, bound: bool) -> EventContext {
        let input = EventInput::new("/Ledger/Deposit").with_token("t");
        let ctx = EventContext::for_input(&input, 0).with_event_log(log);
        if bound {
            ctx.with_actor(actor())
        } else {
            ctx
        }
    }

    #[tokio::test]
    async fn test_no_backend_is_noop() {
        let ctx = context(EventLog::default(), true);
        assert!(!ctx.event_log().is_enabled());

        let written = ctx
            .write_event("e1", None, json!({"amount": 5}))
            .await
            .expect("write should succeed");
        assert!(written.is_none());
        assert!(ctx.read_event("e1").await.expect("read should succeed").is_none());

        // Unbound contexts are fine too when nothing is attached.
        let unbound = context(EventLog::default(), false);
        assert!(unbound.read_event("e1").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_stamps_paths() {
        let store = Arc::new(InMemoryEventLog::new());
        let ctx = context(EventLog::new(Some(store.clone())), true);

        let id = ctx
            .write_event("e1", None, json!({"amount": 5}))
            .await
            .expect("write should succeed");
        assert_eq!(id.as_deref(), Some("e1"));

        let record = ctx
            .read_event("e1")
            .await
            .expect("read should succeed")
            .expect("record should exist");
        assert_eq!(record.actor_path, "/Ledger/acct-1");
        assert_eq!(record.event_path, "/Ledger/Deposit");
        assert_eq!(record.payload, json!({"amount": 5}));
        assert!(record.parent_event_id.is_none());
    }

    #[tokio::test]
    async fn test_parent_linkage_and_generated_ids() {
        let store = Arc::new(InMemoryEventLog::new());
        let ctx = context(EventLog::new(Some(store.clone())), true);

        ctx.write_event("root", None, json!(1)).await.expect("write");
        let child = ctx
            .write_event("", Some("root"), json!(2))
            .await
            .expect("write")
            .expect("id should be assigned");
        assert_eq!(child, "evt-1");

        let children = store.children("/Ledger/acct-1", "root");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].event_id, "evt-1");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_unbound_context_rejected_with_backend() {
        let store = Arc::new(InMemoryEventLog::new());
        let ctx = context(EventLog::new(Some(store)), false);

        assert!(matches!(
            ctx.write_event("e1", None, json!(null)).await,
            Err(EventLogError::NotActorBound)
        ));
        assert!(matches!(
            ctx.read_event("e1").await,
            Err(EventLogError::NotActorBound)
        ));
    }
}
