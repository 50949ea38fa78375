//! Shared controllers and helpers for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use moonpool_dispatch::prelude::*;
use moonpool_dispatch::{ControllerFactory, EventEngine};

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("moonpool_dispatch=debug"))
        .try_init();
}

/// Engine with a small queue pool and debug logging.
pub fn engine_with(builder: EngineConfigBuilder) -> EventEngine {
    init_tracing();
    let config = builder
        .log_level(tracing::level_filters::LevelFilter::DEBUG)
        .build()
        .expect("config should build");
    EventEngine::new(config).expect("engine should start")
}

pub fn engine() -> EventEngine {
    engine_with(EngineConfig::builder().queue_count(4))
}

// ============================================================================
// Greeter: stateless, single instance
// ============================================================================

pub struct Greeter;

impl Capability for Greeter {
    const NAME: &'static str = "Greeter";
    const ACTIONS: &'static [&'static str] = &["Hello", "Boom", "Region"];
}

pub struct GreeterImpl {
    pub greeting: String,
    pub calls: AtomicUsize,
}

impl Default for GreeterImpl {
    fn default() -> Self {
        Self::with_greeting("Hello")
    }
}

impl GreeterImpl {
    pub fn with_greeting(greeting: &str) -> Self {
        Self {
            greeting: greeting.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Controller for GreeterImpl {
    async fn dispatch(
        &self,
        ctx: &EventContext,
        action: &str,
        args: Vec<Value>,
    ) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match action {
            "Hello" => {
                let name: String = arg(&args, 0)?;
                reply(format!("{}, {name}!", self.greeting))
            }
            "Boom" => panic!("greeter exploded"),
            "Region" => Ok(ctx.engine_property("region").unwrap_or(Value::Null)),
            other => Err(HandlerError::UnknownAction(other.to_string())),
        }
    }
}

/// Typed stub for [`Greeter`].
pub struct GreeterRef(pub Arc<Stub>);

impl StubRef for GreeterRef {
    type Capability = Greeter;

    fn from_stub(stub: Arc<Stub>) -> Self {
        Self(stub)
    }
}

impl GreeterRef {
    pub async fn hello(&self, name: &str) -> Result<String, StubError> {
        self.0.call("Hello", vec![encode(name)?]).await
    }
}

// ============================================================================
// Counter: actor with lifecycle probes
// ============================================================================

pub struct Counter;

impl Capability for Counter {
    const NAME: &'static str = "ICounter";
    const SERVICE: &'static str = "Counter";
    const ACTIONS: &'static [&'static str] = &["Add", "Whoami", "Record"];
}

/// Observes every counter instance built from one factory.
#[derive(Default)]
pub struct Probe {
    pub created: AtomicUsize,
    pub inits: AtomicUsize,
    pub dispatches: AtomicUsize,
    pub fail_first_init: AtomicBool,
    pub frees: Mutex<Vec<(String, FreeReason)>>,
}

impl Probe {
    pub fn frees(&self) -> Vec<(String, FreeReason)> {
        self.frees.lock().expect("lock").clone()
    }

    /// Factory building counters that report to this probe.
    pub fn factory(self: &Arc<Self>) -> impl ControllerFactory {
        let probe = self.clone();
        move || -> Result<Arc<dyn Controller>, HandlerError> {
            let serial = probe.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Arc::new(CounterImpl {
                serial,
                count: Mutex::new(0),
                probe: probe.clone(),
            }))
        }
    }
}

pub struct CounterImpl {
    pub serial: usize,
    pub count: Mutex<i64>,
    pub probe: Arc<Probe>,
}

#[async_trait]
impl Controller for CounterImpl {
    async fn dispatch(
        &self,
        ctx: &EventContext,
        action: &str,
        args: Vec<Value>,
    ) -> Result<Value, HandlerError> {
        self.probe.dispatches.fetch_add(1, Ordering::SeqCst);
        match action {
            "Add" => {
                let n: i64 = arg(&args, 0)?;
                let mut count = self.count.lock().expect("lock");
                *count += n;
                reply(*count)
            }
            "Whoami" => reply(json!({
                "serial": self.serial,
                "queue": ctx.queue_id(),
                "actor_path": ctx.actor_path(),
            })),
            "Record" => {
                let event_id: String = arg(&args, 0)?;
                let parent: Option<String> = arg(&args, 1)?;
                let id = ctx
                    .write_event(&event_id, parent.as_deref(), json!({ "from": ctx.token() }))
                    .await?;
                reply(id)
            }
            other => Err(HandlerError::UnknownAction(other.to_string())),
        }
    }

    async fn on_actor_init(&self, ctx: &EventContext) -> Result<(), HandlerError> {
        self.probe.inits.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_first_init.swap(false, Ordering::SeqCst) {
            return Err(HandlerError::failed(format!(
                "init of {} refused",
                ctx.actor_path().unwrap_or("?")
            )));
        }
        Ok(())
    }

    async fn on_actor_free(&self, actor: &ActorInfo, reason: FreeReason) -> Result<(), HandlerError> {
        self.probe
            .frees
            .lock()
            .expect("lock")
            .push((actor.actor_path.clone(), reason));
        Ok(())
    }
}

/// Typed stub for [`Counter`].
pub struct CounterRef(pub Arc<Stub>);

impl StubRef for CounterRef {
    type Capability = Counter;

    fn from_stub(stub: Arc<Stub>) -> Self {
        Self(stub)
    }
}

impl CounterRef {
    pub async fn add(&self, n: i64) -> Result<i64, StubError> {
        self.0.call("Add", vec![encode(&n)?]).await
    }
}

pub fn counter_service(probe: &Arc<Probe>) -> Service {
    Service::new::<Counter, CounterImpl>(probe.factory())
}

// ============================================================================
// Ledger: keyed single-queue actions
// ============================================================================

pub struct Ledger;

impl Capability for Ledger {
    const NAME: &'static str = "Ledger";
    const ACTIONS: &'static [&'static str] = &["Append"];
}

/// Records, per account, the values appended and the queue that ran them.
#[derive(Default)]
pub struct LedgerImpl {
    pub entries: Mutex<HashMap<String, Vec<(i64, usize)>>>,
}

#[async_trait]
impl Controller for LedgerImpl {
    async fn dispatch(
        &self,
        ctx: &EventContext,
        action: &str,
        args: Vec<Value>,
    ) -> Result<Value, HandlerError> {
        match action {
            "Append" => {
                let account: String = arg(&args, 0)?;
                let value: i64 = arg(&args, 1)?;
                // Suspend mid-call so interleaving would show up.
                tokio::task::yield_now().await;
                self.entries
                    .lock()
                    .expect("lock")
                    .entry(account)
                    .or_default()
                    .push((value, ctx.queue_id()));
                reply(value)
            }
            other => Err(HandlerError::UnknownAction(other.to_string())),
        }
    }
}

/// Hook offering a fixed greeter for the Greeter service.
pub struct GreeterHook {
    pub instance: Arc<dyn Controller>,
}

impl std::fmt::Debug for GreeterHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GreeterHook").finish_non_exhaustive()
    }
}

impl InstanceHook for GreeterHook {
    fn instance(&self, request: &InstanceRequest<'_>) -> Option<Arc<dyn Controller>> {
        (request.service_name == Greeter::SERVICE).then(|| self.instance.clone())
    }
}
