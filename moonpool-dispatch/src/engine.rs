//! The dispatch pipeline.
//!
//! # Pipeline
//!
//! 1. Assign an id if the input carries none (global counter, starts at 1).
//! 2. Look the path up. Unknown paths complete with `NotFound` right away.
//! 3. Bind: actor-bound events get (or create) their actor entry, whose
//!    controller and queue take over. Other events get the shared or a
//!    fresh controller and a queue by key or by rotation.
//! 4. Submit to the queue. The job initializes a new actor, calls the
//!    controller and completes with the result, or with `InnerError` on
//!    failure or panic.
//!
//! Failures before submission complete synchronously. Every path goes
//! through a take-once completion slot, so the caller sees exactly one
//! output, including when a queued job is dropped without running.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::{EngineConfig, EngineConfigBuilder};
use crate::context::EventContext;
use crate::controller::{construct, Controller, InstanceRequest};
use crate::directory::{ActorDirectory, ActorEntry, FreeReason, SweepTask};
use crate::error::{ConfigError, EventError, HandlerError, RegisterError, StubError};
use crate::event::{EventInput, EventOutput, ACTOR_NULL_TAG};
use crate::event_log::EventLog;
use crate::queue::{QueuePool, SerialQueue};
use crate::registry::{HandlerDescriptor, HandlerRegistry};
use crate::service::{Capability, CapabilityInfo, Service, ThreadingMode, TypeKey};
use crate::stub::{Stub, StubRef};

/// Receives the output of an event. Called exactly once.
pub trait EventCompletion: Send + 'static {
    /// Deliver the output.
    fn completed(self: Box<Self>, output: EventOutput);
}

impl<F> EventCompletion for F
where
    F: FnOnce(EventOutput) + Send + 'static,
{
    fn completed(self: Box<Self>, output: EventOutput) {
        (*self)(output)
    }
}

/// Take-once holder of a completion and its output shell.
///
/// Dropping an undelivered slot completes it with `InnerError`.
struct CompletionSlot {
    output: EventOutput,
    completion: Option<Box<dyn EventCompletion>>,
}

impl CompletionSlot {
    fn new(input: &EventInput, completion: Box<dyn EventCompletion>) -> Self {
        Self {
            output: EventOutput::for_input(input),
            completion: Some(completion),
        }
    }

    fn succeed(mut self, value: Value) {
        self.output.data = vec![value];
        self.deliver();
    }

    fn fail(mut self, kind: EventError, message: impl Into<String>) {
        self.output.fail(kind, message);
        self.deliver();
    }

    fn deliver(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.completed(std::mem::take(&mut self.output));
        }
    }
}

impl Drop for CompletionSlot {
    fn drop(&mut self) {
        if self.completion.is_some() {
            let message = format!("event {} dropped before completion", self.output.id);
            self.output.fail(EventError::InnerError, message);
            self.deliver();
        }
    }
}

/// Where and with what an event runs.
struct Binding {
    controller: Arc<dyn Controller>,
    queue: Arc<SerialQueue>,
    actor: Option<Arc<ActorEntry>>,
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    registry: HandlerRegistry,
    pool: Arc<QueuePool>,
    directory: Arc<ActorDirectory>,
    capabilities: DashMap<&'static str, CapabilityInfo>,
    stubs: DashMap<(&'static str, String), Arc<Stub>>,
    properties: Arc<DashMap<String, Value>>,
    event_log: EventLog,
    next_id: AtomicI64,
    sweeper: Mutex<Option<SweepTask>>,
}

/// The event dispatch engine.
///
/// Cheap to clone; clones share the same registry, queues and actors.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EventEngine::new(EngineConfig::default())?;
/// engine.register(Service::with_default::<Greeter, GreeterImpl>())?;
///
/// let output = engine
///     .execute(EventInput::new("/Greeter/Hello").with_arg("world").with_actor("u1"))
///     .await;
/// ```
#[derive(Clone)]
pub struct EventEngine {
    inner: Arc<EngineInner>,
}

impl EventEngine {
    /// Start configuring an engine.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfig::builder()
    }

    /// Create an engine and start its idle sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if no tokio runtime is active or the configuration
    /// asks for zero queues.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let pool = Arc::new(QueuePool::new(config.queue_count(), config.log_level())?);
        let directory = Arc::new(ActorDirectory::new(pool.clone(), &config));
        let sweeper = SweepTask::spawn(
            Arc::downgrade(&directory),
            config.clock().clone(),
            config.sweep_interval(),
        )?;

        gated!(config.log_level(), INFO,
            queues = pool.len(),
            actor_free_time = ?config.actor_free_time(),
            "event engine started"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                event_log: EventLog::new(config.event_log().cloned()),
                config,
                registry: HandlerRegistry::new(),
                pool,
                directory,
                capabilities: DashMap::new(),
                stubs: DashMap::new(),
                properties: Arc::new(DashMap::new()),
                next_id: AtomicI64::new(1),
                sweeper: Mutex::new(Some(sweeper)),
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register every action of `service`.
    ///
    /// Paths already taken keep their first handler; the conflict is logged
    /// and the action skipped. Returns the number of actions registered.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid names, an empty action list, keys on
    /// undeclared actions, or a failing single-instance construction.
    pub fn register(&self, service: Service) -> Result<usize, RegisterError> {
        service.validate()?;
        let inner = &self.inner;
        let service_name = service.name();

        let shared_instance = if service.single_instance {
            let request = InstanceRequest {
                service_name,
                controller: service.controller,
                actor_id: None,
            };
            let instance = construct(
                inner.config.instance_hook(),
                &request,
                service.factory.as_ref(),
            )
            .map_err(|source| RegisterError::Factory {
                service: service_name.to_string(),
                source,
            })?;
            Some(instance)
        } else {
            None
        };

        let actors = service.actors.then(|| {
            inner
                .directory
                .collection(service.controller, TypeKey::Capability(service.capability.name))
        });
        inner
            .capabilities
            .entry(service.capability.name)
            .or_insert(service.capability);

        let mut registered = 0;
        for action in &service.actions {
            let keys = service.keyed.get(action);
            let descriptor = HandlerDescriptor {
                service_name: service_name.to_string(),
                action_name: action.clone(),
                capability: service.capability,
                controller_type: service.controller,
                threading_mode: if keys.is_some() {
                    ThreadingMode::SingleQueue
                } else {
                    ThreadingMode::Default
                },
                single_instance: service.single_instance,
                factory: service.factory.clone(),
                shared_instance: shared_instance.clone(),
                actors: actors.clone(),
                key_parameter_indices: keys.cloned().unwrap_or_default(),
            };
            let path = service.path(action);
            match inner.registry.register(path.clone(), descriptor) {
                Ok(()) => {
                    registered += 1;
                    match keys {
                        Some(keys) => {
                            gated!(inner.config.log_level(), INFO,
                                path = %path,
                                keys = ?keys,
                                "registered single-queue action"
                            );
                        }
                        None => {
                            gated!(inner.config.log_level(), DEBUG, path = %path, "registered action");
                        }
                    }
                }
                Err(e) => {
                    gated!(inner.config.log_level(), WARN, error = %e, "registration skipped");
                }
            }
        }
        Ok(registered)
    }

    /// Register a batch of services.
    ///
    /// A failing service is logged and skipped; the rest still register.
    /// Returns the total number of actions registered.
    pub fn register_all(&self, services: impl IntoIterator<Item = Service>) -> usize {
        let mut registered = 0;
        for service in services {
            let name = service.name();
            match self.register(service) {
                Ok(count) => registered += count,
                Err(e) => {
                    gated!(self.inner.config.log_level(), ERROR,
                        service = name,
                        error = %e,
                        "service registration failed"
                    );
                }
            }
        }
        registered
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Submit an event and wait for its output.
    pub async fn execute(&self, input: EventInput) -> EventOutput {
        let input = self.assign_id(input);
        let fallback = EventOutput::for_input(&input);
        let (tx, rx) = oneshot::channel();
        self.execute_with(input, move |output: EventOutput| {
            let _ = tx.send(output);
        });
        rx.await.unwrap_or_else(|_| {
            let mut output = fallback;
            output.fail(EventError::InnerError, "completion channel closed");
            output
        })
    }

    /// Submit an event; `completion` receives its output exactly once.
    ///
    /// Unknown paths and failures before queue submission complete before
    /// this returns. Everything else completes from the queue.
    pub fn execute_with(&self, input: EventInput, completion: impl EventCompletion) {
        let mut input = self.assign_id(input);
        let slot = CompletionSlot::new(&input, Box::new(completion));
        let log_level = self.inner.config.log_level();

        let Some(handler) = self.inner.registry.lookup(&input.path) else {
            let message = format!("Process event error {} not found!", input.path);
            gated!(log_level, WARN, token = %input.token, path = %input.path, "{message}");
            slot.fail(EventError::NotFound, message);
            return;
        };

        let binding = match self.bind(&handler, &input) {
            Ok(binding) => binding,
            Err((kind, message)) => {
                gated!(log_level, ERROR,
                    token = %input.token,
                    path = %input.path,
                    kind = %kind,
                    "{message}"
                );
                slot.fail(kind, message);
                return;
            }
        };

        let queue = binding.queue.clone();
        let mut ctx = EventContext::for_input(&input, queue.id())
            .with_engine_properties(self.inner.properties.clone())
            .with_event_log(self.inner.event_log.clone());
        if let Some(entry) = &binding.actor {
            ctx = ctx.with_actor(entry.info().clone());
        }
        let args = std::mem::take(&mut input.data);
        let action = handler.action_name.clone();

        gated!(log_level, DEBUG,
            token = %input.token,
            path = %input.path,
            actor_id = ctx.actor_id().unwrap_or(""),
            queue = queue.id(),
            "event submitted"
        );

        let job = async move {
            let outcome = AssertUnwindSafe(invoke(binding, &ctx, &action, args))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(value)) => slot.succeed(value),
                Ok(Err(e)) => {
                    gated!(log_level, ERROR,
                        token = %ctx.token(),
                        path = %ctx.event_path(),
                        error = %e,
                        "event handler failed"
                    );
                    slot.fail(EventError::InnerError, e.to_string());
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    gated!(log_level, ERROR,
                        token = %ctx.token(),
                        path = %ctx.event_path(),
                        "event handler panicked: {message}"
                    );
                    slot.fail(EventError::InnerError, message);
                }
            }
        };

        // A rejected job is dropped with its slot, which completes it.
        if let Err(e) = queue.submit(job) {
            gated!(log_level, ERROR, error = %e, "event not submitted");
        }
    }

    fn assign_id(&self, mut input: EventInput) -> EventInput {
        if input.id == 0 {
            input.id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        }
        input
    }

    fn bind(
        &self,
        handler: &HandlerDescriptor,
        input: &EventInput,
    ) -> Result<Binding, (EventError, String)> {
        let inner = &self.inner;
        let hook = inner.config.instance_hook();

        if let Some(actor_id) = input.actor_id() {
            let Some(collection) = &handler.actors else {
                return Err((
                    EventError::NotSupport,
                    format!(
                        "service {} does not host actors (actor {actor_id})",
                        handler.service_name
                    ),
                ));
            };
            let request = InstanceRequest {
                service_name: &handler.service_name,
                controller: handler.controller_type,
                actor_id: Some(actor_id),
            };
            let (entry, _) = inner
                .directory
                .get_or_create(collection, actor_id, &handler.service_name, || {
                    construct(hook, &request, handler.factory.as_ref())
                })
                .map_err(inner_error)?;
            return Ok(Binding {
                controller: entry.controller().clone(),
                queue: entry.queue().clone(),
                actor: Some(entry),
            });
        }

        let controller = match (&handler.shared_instance, handler.single_instance) {
            (Some(shared), true) => shared.clone(),
            _ => {
                let request = InstanceRequest {
                    service_name: &handler.service_name,
                    controller: handler.controller_type,
                    actor_id: None,
                };
                construct(hook, &request, handler.factory.as_ref()).map_err(inner_error)?
            }
        };
        let queue = match handler.threading_mode {
            ThreadingMode::SingleQueue => inner
                .pool
                .select_by_key(handler.queue_key(&input.data).as_bytes()),
            ThreadingMode::Default => inner
                .pool
                .select_by_rotation(inner.config.max_pending_per_queue()),
        };
        Ok(Binding {
            controller,
            queue,
            actor: None,
        })
    }

    // ========================================================================
    // Stubs
    // ========================================================================

    /// Get the stub for a capability and optional actor.
    ///
    /// Stubs are cached per (capability, actor); repeated calls return the
    /// same `Arc`. Only capabilities of registered services can be looked
    /// up by key.
    ///
    /// # Errors
    ///
    /// [`StubError::NotSupport`] for a concrete controller type or an
    /// unknown capability. Nothing is cached in that case.
    pub fn create_stub(
        &self,
        key: &TypeKey,
        actor_id: Option<&str>,
    ) -> Result<Arc<Stub>, StubError> {
        let not_support = || StubError::NotSupport {
            type_name: key.name().to_string(),
        };
        let TypeKey::Capability(name) = key else {
            return Err(not_support());
        };
        let capability = self
            .inner
            .capabilities
            .get(name)
            .map(|c| *c.value())
            .ok_or_else(not_support)?;
        Ok(self.stub_for(capability, actor_id))
    }

    /// Get the cached stub for capability `C`.
    pub fn capability_stub<C: Capability + ?Sized>(&self, actor_id: Option<&str>) -> Arc<Stub> {
        self.stub_for(CapabilityInfo::of::<C>(), actor_id)
    }

    /// Get a typed stub.
    pub fn stub<S: StubRef>(&self, actor_id: Option<&str>) -> S {
        S::from_stub(self.capability_stub::<S::Capability>(actor_id))
    }

    fn stub_for(&self, capability: CapabilityInfo, actor_id: Option<&str>) -> Arc<Stub> {
        let actor = actor_id
            .filter(|id| !id.is_empty())
            .unwrap_or(ACTOR_NULL_TAG)
            .to_string();
        self.inner
            .stubs
            .entry((capability.name, actor.clone()))
            .or_insert_with(|| Arc::new(Stub::new(Arc::downgrade(&self.inner), capability, actor)))
            .clone()
    }

    /// Number of cached stubs.
    pub fn stub_count(&self) -> usize {
        self.inner.stubs.len()
    }

    // ========================================================================
    // Actors
    // ========================================================================

    /// Evict one actor, or every actor of a type, regardless of deadline.
    ///
    /// `key` may name the controller type or the capability. Returns the
    /// number of evicted actors.
    ///
    /// An event that resolved an actor just before the flush removed it, but
    /// reached the actor's queue after the teardown, fails with `InnerError`.
    /// The next event for that id builds a fresh actor.
    pub async fn flush_actors(&self, key: &TypeKey, actor_id: Option<&str>) -> usize {
        let flushed = self.inner.directory.flush(key, actor_id).await;
        gated!(self.inner.config.log_level(), INFO,
            actor_type = %key,
            actor_id = actor_id.unwrap_or("*"),
            flushed,
            "actors flushed"
        );
        flushed
    }

    /// Look up a live actor.
    pub fn actor(&self, key: &TypeKey, actor_id: &str) -> Option<Arc<ActorEntry>> {
        self.inner.directory.find(key)?.get(actor_id)
    }

    /// Number of live actors.
    pub fn actor_count(&self) -> usize {
        self.inner.directory.actor_count()
    }

    /// The actor directory.
    pub fn directory(&self) -> &Arc<ActorDirectory> {
        &self.inner.directory
    }

    // ========================================================================
    // Introspection and properties
    // ========================================================================

    /// The handler bound to `path`.
    pub fn handler(&self, path: &str) -> Option<Arc<HandlerDescriptor>> {
        self.inner.registry.lookup(path)
    }

    /// All registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.inner.registry.paths()
    }

    /// Number of serial queues.
    pub fn queue_count(&self) -> usize {
        self.inner.pool.len()
    }

    /// Set an engine-wide property visible to every controller.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.properties.insert(key.into(), value.into());
    }

    /// Read an engine-wide property.
    pub fn property(&self, key: &str) -> Option<Value> {
        self.inner.properties.get(key).map(|v| v.value().clone())
    }

    /// Remove an engine-wide property.
    pub fn remove_property(&self, key: &str) -> Option<Value> {
        self.inner.properties.remove(key).map(|(_, v)| v)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop the sweep, drop handlers and stubs, and evict every actor.
    ///
    /// Returns the number of evicted actors. Not meant to run concurrently
    /// with itself.
    pub async fn shutdown(&self) -> usize {
        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }

        self.inner.registry.clear();
        self.inner.capabilities.clear();
        self.inner.stubs.clear();
        let flushed = self.inner.directory.flush_all(FreeReason::Shutdown).await;

        gated!(self.inner.config.log_level(), INFO, flushed, "event engine shut down");
        flushed
    }
}

impl fmt::Debug for EventEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEngine")
            .field("queues", &self.inner.pool.len())
            .field("handlers", &self.inner.registry.len())
            .field("actors", &self.inner.directory.actor_count())
            .field("stubs", &self.inner.stubs.len())
            .finish()
    }
}

/// Body of a submitted job: initialize the actor if needed, then dispatch.
async fn invoke(
    binding: Binding,
    ctx: &EventContext,
    action: &str,
    args: Vec<Value>,
) -> Result<Value, HandlerError> {
    if let Some(entry) = &binding.actor {
        if entry.is_freed() {
            return Err(HandlerError::failed(format!(
                "actor {} was freed before the event ran",
                entry.info().actor_path
            )));
        }
        entry.ensure_initialized(ctx).await?;
    }
    binding.controller.dispatch(ctx, action, args).await
}

fn inner_error(e: HandlerError) -> (EventError, String) {
    (EventError::InnerError, e.to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::controller::{arg, reply};

    struct Greeter;

    impl Capability for Greeter {
        const NAME: &'static str = "Greeter";
        const ACTIONS: &'static [&'static str] = &["Hello"];
    }

    #[derive(Default)]
    struct GreeterImpl;

    #[async_trait]
    impl Controller for GreeterImpl {
        async fn dispatch(
            &self,
            _ctx: &EventContext,
            action: &str,
            args: Vec<Value>,
        ) -> Result<Value, HandlerError> {
            match action {
                "Hello" => {
                    let name: String = arg(&args, 0)?;
                    reply(format!("Hello, {name}!"))
                }
                other => Err(HandlerError::UnknownAction(other.to_string())),
            }
        }
    }

    async fn engine() -> EventEngine {
        let config = EngineConfig::builder()
            .queue_count(2)
            .build()
            .expect("config should build");
        let engine = EventEngine::new(config).expect("engine should start");
        engine
            .register(Service::with_default::<Greeter, GreeterImpl>().single_instance())
            .expect("register should succeed");
        engine
    }

    #[tokio::test]
    async fn test_not_found_completes_synchronously() {
        let engine = engine().await;
        let delivered = Arc::new(StdMutex::new(Vec::new()));
        let sink = delivered.clone();

        engine.execute_with(EventInput::new("/Nope/Missing"), move |output: EventOutput| {
            sink.lock().expect("lock").push(output);
        });

        // Delivered before execute_with returned.
        let delivered = delivered.lock().expect("lock").clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].error, EventError::NotFound);
        assert_eq!(
            delivered[0].error_message(),
            Some("Process event error /Nope/Missing not found!")
        );
    }

    #[tokio::test]
    async fn test_dropped_slot_completes_with_inner_error() {
        let delivered = Arc::new(StdMutex::new(Vec::new()));
        let sink = delivered.clone();
        let mut input = EventInput::new("/Greeter/Hello");
        input.id = 9;

        let slot = CompletionSlot::new(
            &input,
            Box::new(move |output: EventOutput| sink.lock().expect("lock").push(output)),
        );
        drop(slot);

        let delivered = delivered.lock().expect("lock").clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].id, 9);
        assert_eq!(delivered[0].error, EventError::InnerError);
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_keep_explicit_ids() {
        let engine = engine().await;
        let first = engine
            .execute(EventInput::new("/Greeter/Hello").with_arg("a"))
            .await;
        let second = engine
            .execute(EventInput::new("/Greeter/Hello").with_arg("b"))
            .await;
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let mut explicit = EventInput::new("/Greeter/Hello").with_arg("c");
        explicit.id = 77;
        assert_eq!(engine.execute(explicit).await.id, 77);
    }

    #[tokio::test]
    async fn test_bad_argument_is_inner_error() {
        let engine = engine().await;
        let output = engine
            .execute(EventInput::new("/Greeter/Hello").with_arg(5))
            .await;
        assert_eq!(output.error, EventError::InnerError);
        assert!(output
            .error_message()
            .expect("message")
            .contains("invalid argument at position 0"));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked: bang");
        let boxed: Box<dyn Any + Send> = Box::new(3_u8);
        assert_eq!(panic_message(boxed.as_ref()), "handler panicked");
    }

    #[tokio::test]
    async fn test_call_resolved_before_flush_fails_after_teardown() {
        let engine = engine().await;
        let key = TypeKey::capability::<Greeter>();
        let output = engine
            .execute(EventInput::new("/Greeter/Hello").with_arg("a").with_actor("u1"))
            .await;
        assert!(output.is_success());

        // Resolve the binding, then let the flush run ahead of the call.
        let entry = engine.actor(&key, "u1").expect("actor should be live");
        let binding = Binding {
            controller: entry.controller().clone(),
            queue: entry.queue().clone(),
            actor: Some(entry.clone()),
        };
        assert_eq!(engine.flush_actors(&key, Some("u1")).await, 1);

        let input = EventInput::new("/Greeter/Hello").with_actor("u1");
        let ctx = EventContext::for_input(&input, entry.queue().id()).with_actor(entry.info().clone());
        let err = invoke(binding, &ctx, "Hello", vec![json!("late")])
            .await
            .expect_err("freed actor must not be dispatched");
        assert!(err.to_string().contains("/Greeter/u1 was freed"));

        // A fresh actor serves the next event.
        let output = engine
            .execute(EventInput::new("/Greeter/Hello").with_arg("b").with_actor("u1"))
            .await;
        assert_eq!(output.result(), Some(&json!("Hello, b!")));
    }

    #[tokio::test]
    async fn test_shutdown_forgets_capabilities() {
        let engine = engine().await;
        let key = TypeKey::capability::<Greeter>();
        engine.create_stub(&key, None).expect("stub should build");

        engine.shutdown().await;
        let err = engine
            .create_stub(&key, None)
            .expect_err("no capability after shutdown");
        assert_eq!(err.kind(), EventError::NotSupport);
        assert_eq!(engine.stub_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_properties() {
        let engine = engine().await;
        engine.set_property("region", json!("eu"));
        assert_eq!(engine.property("region"), Some(json!("eu")));
        assert_eq!(engine.remove_property("region"), Some(json!("eu")));
        assert!(engine.property("region").is_none());
    }
}
