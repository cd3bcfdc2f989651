//! Bridge core
//!
//! The bridge owns the script executors, the native module registry and the three
//! queues, and moves calls between them:
//!
//! ```text
//!   native code                      Script queue                  Native-Modules queue
//!   ───────────                      ────────────                  ────────────────────
//!   call_function ──(outbound)──►  executor.call_function
//!   Callback::invoke               executor.invoke_callback
//!                                        │ batch of NativeCalls
//!                                        └──(inbound)──────────►  registry.call_method ...
//!                                                                  on_batch_complete
//!                                                                  pending -= 1
//! ```
//!
//! Every outbound call bumps the pending-call counter; the end of the batch it
//! produced brings it back down. Listeners hear about 0→1 (busy) and N→0 (idle)
//! on the Native-Modules queue.
//!
//! # Example
//!
//! ```
//! use otter_bridge::{Bridge, LoopbackExecutor, NativeModuleRegistry};
//!
//! let bridge = Bridge::builder()
//!     .modules(NativeModuleRegistry::builder())
//!     .executor(LoopbackExecutor::new())
//!     .build()
//!     .unwrap();
//! bridge.run_script("", "main.js").unwrap();
//! bridge.destroy();
//! assert!(bridge.is_destroyed());
//! ```

use crate::callback::CallbackInvoker;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult, QueueError};
use crate::executor::{
    MODULE_CONFIG_GLOBAL, MemoryPressure, NativeCall, NativeCallBatch, NativeHooks, ScriptCall,
    ScriptExecutor,
};
use crate::module::{ModuleRegistryBuilder, NativeModule, NativeModuleRegistry};
use crate::queue::{QueueConfiguration, QueuePanicHandler};
use crate::script_module::{ScriptCallSink, ScriptModule, ScriptModuleRegistry};
use crate::soft_exception;
use crate::token::RuntimeToken;
use crate::value::{ReadableArray, Value, WritableArray};
use crossbeam_utils::Backoff;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, error, info_span, trace, warn};

/// Observer of the pending-call counter
///
/// All notifications except `on_bridge_destroyed` run on the Native-Modules queue.
pub trait BridgeIdleListener: Send + Sync {
    fn on_transition_to_bridge_idle(&self);

    fn on_transition_to_bridge_busy(&self);

    /// Called once, after teardown, on the thread that destroyed the bridge
    fn on_bridge_destroyed(&self) {}
}

/// What to do after a native exception was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Keep the bridge running
    Continue,
    /// Destroy the bridge from the UI queue
    TearDown,
}

/// Receives native-module failures, script errors and queue panics
pub type NativeExceptionHandler = Arc<dyn Fn(&BridgeError) -> Escalation + Send + Sync>;

fn default_exception_handler(escalate: bool) -> NativeExceptionHandler {
    Arc::new(move |err| {
        error!(error = %err, caller_caused = err.is_caller_caused(), "Bridge exception");
        if escalate && !err.is_caller_caused() {
            Escalation::TearDown
        } else {
            Escalation::Continue
        }
    })
}

/// Bridge lifecycle, in order. Never goes backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BridgeState {
    Constructed,
    Running,
    BeingDestroyed,
    Destroyed,
}

/// Call counters for one bridge
#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Calls and callback replies sent to script
    pub script_calls: AtomicU64,
    /// Native calls dispatched from script batches
    pub native_calls: AtomicU64,
    /// Native calls that returned an error
    pub native_failures: AtomicU64,
    /// Calls dropped because the bridge was torn down or not loaded
    pub dropped_calls: AtomicU64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            script_calls: self.script_calls.load(Ordering::Relaxed),
            native_calls: self.native_calls.load(Ordering::Relaxed),
            native_failures: self.native_failures.load(Ordering::Relaxed),
            dropped_calls: self.dropped_calls.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of bridge statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStatsSnapshot {
    pub script_calls: u64,
    pub native_calls: u64,
    pub native_failures: u64,
    pub dropped_calls: u64,
}

/// Builder for a [`Bridge`]
pub struct BridgeBuilder {
    config: BridgeConfig,
    modules: ModuleRegistryBuilder,
    executor: Option<Box<dyn ScriptExecutor>>,
    exception_handler: Option<NativeExceptionHandler>,
    idle_listeners: Vec<Arc<dyn BridgeIdleListener>>,
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self {
            config: BridgeConfig::default(),
            modules: ModuleRegistryBuilder::new(),
            executor: None,
            exception_handler: None,
            idle_listeners: Vec::new(),
        }
    }
}

impl BridgeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Native modules to register
    pub fn modules(mut self, modules: ModuleRegistryBuilder) -> Self {
        self.modules = modules;
        self
    }

    /// Executor for the main runtime instance
    pub fn executor(mut self, executor: impl ScriptExecutor) -> Self {
        self.executor = Some(Box::new(executor));
        self
    }

    /// Replace the default exception handler
    pub fn exception_handler(
        mut self,
        handler: impl Fn(&BridgeError) -> Escalation + Send + Sync + 'static,
    ) -> Self {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    pub fn idle_listener(mut self, listener: Arc<dyn BridgeIdleListener>) -> Self {
        self.idle_listeners.push(listener);
        self
    }

    /// Start the queues and register the main runtime instance
    pub fn build(self) -> BridgeResult<Bridge> {
        crate::init();
        let executor = self
            .executor
            .ok_or_else(|| BridgeError::Config("a script executor is required".to_string()))?;
        let exception_handler = self
            .exception_handler
            .unwrap_or_else(|| default_exception_handler(self.config.escalate_native_exceptions));

        // Queue panics are routed to the bridge once it exists.
        let bridge_cell: Arc<OnceLock<Weak<BridgeInner>>> = Arc::new(OnceLock::new());
        let cell = bridge_cell.clone();
        let panic_handler: QueuePanicHandler = Arc::new(move |err| {
            match cell.get().and_then(Weak::upgrade) {
                Some(inner) => inner.handle_exception(err.into()),
                None => error!(error = %err, "Queue panicked with no bridge attached"),
            }
        });
        let queues = QueueConfiguration::create(&self.config.queues, panic_handler)?;
        let registry = self.modules.build();

        let main_token = RuntimeToken::new("main");
        let mut instances = HashMap::new();
        instances.insert(
            main_token.id(),
            Arc::new(RuntimeInstance {
                token: main_token.clone(),
                executor: Mutex::new(executor),
            }),
        );

        let inner = Arc::new_cyclic(|weak: &Weak<BridgeInner>| {
            let sink: Weak<dyn ScriptCallSink> = weak.clone();
            BridgeInner {
                config: self.config,
                queues,
                registry,
                script_modules: ScriptModuleRegistry::new(sink),
                main_token,
                instances: RwLock::new(instances),
                pending_calls: AtomicUsize::new(0),
                script_loaded: AtomicBool::new(false),
                accept_calls: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                being_destroyed: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                teardown_complete: AtomicBool::new(false),
                inbound_lock: Mutex::new(()),
                outbound_lock: Mutex::new(()),
                pre_load: Mutex::new(Vec::new()),
                idle_listeners: RwLock::new(self.idle_listeners),
                exception_handler,
                stats: BridgeStats::default(),
                self_ref: weak.clone(),
            }
        });
        let _ = bridge_cell.set(Arc::downgrade(&inner));
        debug!(modules = inner.registry.len(), "Bridge constructed");
        Ok(Bridge { inner })
    }
}

struct RuntimeInstance {
    token: RuntimeToken,
    executor: Mutex<Box<dyn ScriptExecutor>>,
}

enum Outbound {
    Function(ScriptCall),
    Callback { id: u64, args: Vec<Value> },
}

struct BridgeInner {
    config: BridgeConfig,
    queues: QueueConfiguration,
    registry: NativeModuleRegistry,
    script_modules: ScriptModuleRegistry,
    main_token: RuntimeToken,
    instances: RwLock<HashMap<u64, Arc<RuntimeInstance>>>,
    pending_calls: AtomicUsize,
    script_loaded: AtomicBool,
    accept_calls: AtomicBool,
    initialized: AtomicBool,
    being_destroyed: AtomicBool,
    destroyed: AtomicBool,
    teardown_complete: AtomicBool,
    // Held together only by `destroy`, inbound first.
    inbound_lock: Mutex<()>,
    outbound_lock: Mutex<()>,
    pre_load: Mutex<Vec<(RuntimeToken, Outbound)>>,
    idle_listeners: RwLock<Vec<Arc<dyn BridgeIdleListener>>>,
    exception_handler: NativeExceptionHandler,
    stats: BridgeStats,
    self_ref: Weak<BridgeInner>,
}

/// Sync native calls made by an executor, bound to the calling instance
struct SyncHooks<'a> {
    inner: &'a BridgeInner,
    token: &'a RuntimeToken,
}

impl NativeHooks for SyncHooks<'_> {
    fn call_sync(&self, module_id: u32, method_id: u32, args: Vec<Value>) -> BridgeResult<Value> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(BridgeError::illegal_state("bridge has been destroyed"));
        }
        trace!(module_id, method_id, "Sync native call");
        self.inner.registry.call_sync_method(
            self.token,
            &self.inner.invoker(),
            module_id,
            method_id,
            ReadableArray::new(args),
        )
    }
}

impl BridgeInner {
    fn invoker(&self) -> Weak<dyn CallbackInvoker> {
        self.self_ref.clone()
    }

    fn instance(&self, token: &RuntimeToken) -> Option<Arc<RuntimeInstance>> {
        self.instances.read().get(&token.id()).cloned()
    }

    /// Take one of the call locks, giving up once teardown has started
    fn acquire<'a>(&self, lock: &'a Mutex<()>) -> Option<MutexGuard<'a, ()>> {
        let backoff = Backoff::new();
        let timeout = self.config.call_lock_timeout();
        loop {
            if self.being_destroyed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(guard) = lock.try_lock_for(timeout) {
                return Some(guard);
            }
            backoff.snooze();
        }
    }

    fn drop_call(&self, what: &str) {
        self.stats.dropped_calls.fetch_add(1, Ordering::Relaxed);
        warn!(call = what, "Dropping call, bridge has been torn down");
    }

    fn notify_listeners(&self, notify: fn(&dyn BridgeIdleListener)) {
        let listeners = self.idle_listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        self.queues.native_modules_queue().run_on_queue(move || {
            for listener in &listeners {
                notify(listener.as_ref());
            }
        });
    }

    fn increment_pending(&self) {
        if self.pending_calls.fetch_add(1, Ordering::AcqRel) == 0 {
            self.notify_listeners(|l| l.on_transition_to_bridge_busy());
        }
    }

    fn decrement_pending(&self) {
        match self
            .pending_calls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(1) => self.notify_listeners(|l| l.on_transition_to_bridge_idle()),
            Ok(_) => {}
            Err(_) => {
                soft_exception::report("Bridge", "pending call counter decremented below zero")
            }
        }
    }

    fn handle_exception(&self, err: BridgeError) {
        match (self.exception_handler)(&err) {
            Escalation::Continue => {}
            Escalation::TearDown => {
                if self.being_destroyed.load(Ordering::Acquire) {
                    return;
                }
                warn!(error = %err, "Tearing down bridge after exception");
                let weak = self.self_ref.clone();
                self.queues.ui_queue().run_on_queue(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.destroy();
                    }
                });
            }
        }
    }

    // Outbound: native -> script

    fn call_script(&self, token: RuntimeToken, call: Outbound) {
        if token == self.main_token && !self.accept_calls.load(Ordering::Acquire) {
            let mut pre_load = self.pre_load.lock();
            // Re-check under the lock: run_script flips the flag while holding it.
            if !self.accept_calls.load(Ordering::Acquire) {
                let buffer = self.config.buffer_calls_before_load
                    && !self.being_destroyed.load(Ordering::Acquire);
                if buffer {
                    trace!("Buffering call until the bundle is loaded");
                    pre_load.push((token, call));
                } else {
                    self.drop_call("before load");
                }
                return;
            }
        }
        self.enqueue_outbound(token, call);
    }

    fn enqueue_outbound(&self, token: RuntimeToken, call: Outbound) {
        let Some(_outbound) = self.acquire(&self.outbound_lock) else {
            self.drop_call("outbound");
            return;
        };
        if self.destroyed.load(Ordering::Acquire) {
            self.drop_call("outbound");
            return;
        }

        self.stats.script_calls.fetch_add(1, Ordering::Relaxed);
        self.increment_pending();
        let weak = self.self_ref.clone();
        let accepted = self.queues.script_queue().run_on_queue(move || {
            if let Some(inner) = weak.upgrade() {
                inner.run_outbound(&token, call);
            }
        });
        if !accepted {
            self.decrement_pending();
        }
    }

    fn run_outbound(&self, token: &RuntimeToken, call: Outbound) {
        let Some(instance) = self.instance(token) else {
            warn!(token = token.id(), "Dropping call, runtime instance is gone");
            self.decrement_pending();
            return;
        };
        let result = {
            let mut executor = instance.executor.lock();
            let hooks = SyncHooks {
                inner: self,
                token: &instance.token,
            };
            match &call {
                Outbound::Function(call) => {
                    let _span =
                        info_span!("script_call", module = %call.module, method = %call.method)
                            .entered();
                    if let Some(trace_name) = &call.trace_name {
                        trace!(trace = %trace_name, "Calling script function");
                    }
                    executor.call_function(call, &hooks)
                }
                Outbound::Callback { id, args } => {
                    trace!(callback = id, "Invoking script callback");
                    executor.invoke_callback(*id, args, &hooks)
                }
            }
        };
        match result {
            Ok(batch) => self.dispatch_batch(&instance.token, batch, true),
            Err(err) => {
                self.handle_exception(err.into());
                // The entry still ended; close its batch.
                self.dispatch_batch(&instance.token, NativeCallBatch::new(), true);
            }
        }
    }

    // Inbound: script -> native

    fn dispatch_batch(&self, token: &RuntimeToken, batch: NativeCallBatch, counted: bool) {
        if batch.is_empty() && !counted {
            return;
        }
        let Some(_inbound) = self.acquire(&self.inbound_lock) else {
            self.drop_call("inbound");
            return;
        };
        if self.destroyed.load(Ordering::Acquire) {
            self.drop_call("inbound");
            return;
        }

        let native = self.queues.native_modules_queue();
        let had_calls = !batch.is_empty();
        trace!(calls = batch.len(), "Dispatching native call batch");
        for call in batch.calls {
            let weak = self.self_ref.clone();
            let token = token.clone();
            native.run_on_queue(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.call_native(&token, call);
                }
            });
        }

        let weak = self.self_ref.clone();
        native.run_on_queue(move || {
            if let Some(inner) = weak.upgrade() {
                if had_calls {
                    inner.registry.on_batch_complete();
                }
                if counted {
                    inner.decrement_pending();
                }
            }
        });
    }

    fn call_native(&self, token: &RuntimeToken, call: NativeCall) {
        if self.destroyed.load(Ordering::Acquire) {
            self.drop_call("native");
            return;
        }
        self.stats.native_calls.fetch_add(1, Ordering::Relaxed);
        let NativeCall {
            module_id,
            method_id,
            args,
        } = call;
        trace!(module_id, method_id, "Native call");
        if let Err(err) = self.registry.call_method(
            token,
            &self.invoker(),
            module_id,
            method_id,
            ReadableArray::new(args),
        ) {
            self.stats.native_failures.fetch_add(1, Ordering::Relaxed);
            self.handle_exception(err);
        }
    }

    // Lifecycle

    fn module_config_json(&self, web_worker: bool) -> BridgeResult<String> {
        let config = self.registry.module_config(web_worker)?;
        Ok(serde_json::to_string(&config)?)
    }

    /// Queue config delivery and bundle evaluation for one instance
    fn load_instance(
        &self,
        instance: Arc<RuntimeInstance>,
        config: String,
        source: String,
        source_url: String,
    ) -> BridgeResult<()> {
        let weak = self.self_ref.clone();
        let accepted = self.queues.script_queue().run_on_queue(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let _span = info_span!("load_script", url = %source_url).entered();
            let result = {
                let mut executor = instance.executor.lock();
                let hooks = SyncHooks {
                    inner: &inner,
                    token: &instance.token,
                };
                executor
                    .set_global_variable(MODULE_CONFIG_GLOBAL, &config)
                    .and_then(|()| executor.load_script(&source, &source_url, &hooks))
            };
            match result {
                Ok(batch) => inner.dispatch_batch(&instance.token, batch, false),
                Err(err) => inner.handle_exception(err.into()),
            }
        });
        if accepted {
            Ok(())
        } else {
            Err(QueueError::ShutDown(self.queues.script_queue().name().to_string()).into())
        }
    }

    fn run_script(&self, source: String, source_url: String) -> BridgeResult<()> {
        if self.being_destroyed.load(Ordering::Acquire) {
            self.drop_call("run_script");
            return Ok(());
        }
        if self.script_loaded.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::illegal_state("run_script may only be called once"));
        }
        debug!(url = %source_url, "Running script bundle");

        let instance = self
            .instance(&self.main_token)
            .ok_or_else(|| BridgeError::illegal_state("main runtime instance is gone"))?;
        let config = self.module_config_json(false)?;
        self.load_instance(instance, config, source, source_url)?;

        let mut pre_load = self.pre_load.lock();
        if !pre_load.is_empty() {
            debug!(calls = pre_load.len(), "Flushing calls made before load");
        }
        for (token, call) in pre_load.drain(..) {
            self.enqueue_outbound(token, call);
        }
        self.accept_calls.store(true, Ordering::Release);
        Ok(())
    }

    fn destroy(&self) {
        if self.being_destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _span = info_span!("bridge_destroy").entered();
        debug!("Destroying bridge");

        {
            let _inbound = self.inbound_lock.lock();
            let _outbound = self.outbound_lock.lock();
            self.destroyed.store(true, Ordering::Release);
            self.pre_load.lock().clear();

            if let Some(inner) = self.self_ref.upgrade() {
                let notified = self
                    .queues
                    .native_modules_queue()
                    .call_on_queue(move || inner.registry.notify_instance_destroyed());
                if let Err(err) = notified {
                    warn!(error = %err, "Could not notify native modules of teardown");
                }
            }

            let instances: Vec<_> = self.instances.write().drain().map(|(_, i)| i).collect();
            let destroyed = self.queues.script_queue().call_on_queue(move || {
                for instance in instances {
                    instance.executor.lock().destroy();
                }
            });
            if let Err(err) = destroyed {
                warn!(error = %err, "Could not destroy script executors");
            }
        }

        self.queues.destroy();

        let was_idle = self.pending_calls.swap(0, Ordering::AcqRel) == 0;
        let listeners = self.idle_listeners.read().clone();
        for listener in &listeners {
            if !was_idle {
                listener.on_transition_to_bridge_idle();
            }
            listener.on_bridge_destroyed();
        }

        self.script_modules.clear();
        self.teardown_complete.store(true, Ordering::Release);
        debug!("Bridge destroyed");
    }

    fn state(&self) -> BridgeState {
        if self.teardown_complete.load(Ordering::Acquire) {
            BridgeState::Destroyed
        } else if self.being_destroyed.load(Ordering::Acquire) {
            BridgeState::BeingDestroyed
        } else if self.script_loaded.load(Ordering::Acquire) {
            BridgeState::Running
        } else {
            BridgeState::Constructed
        }
    }
}

impl CallbackInvoker for BridgeInner {
    fn invoke_callback(&self, token: &RuntimeToken, callback_id: u64, args: WritableArray) {
        self.call_script(
            token.clone(),
            Outbound::Callback {
                id: callback_id,
                args: args.into_vec(),
            },
        );
    }
}

impl ScriptCallSink for BridgeInner {
    fn call_script_function(&self, token: &RuntimeToken, call: ScriptCall) {
        self.call_script(token.clone(), Outbound::Function(call));
    }
}

/// Handle to a running bridge. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Deliver the module config and evaluate the bundle in the main instance.
    ///
    /// Calls buffered before this point are flushed after the bundle is queued.
    /// A second call fails with [`BridgeError::IllegalState`]. After destroy the
    /// call is dropped.
    pub fn run_script(
        &self,
        source: impl Into<String>,
        source_url: impl Into<String>,
    ) -> BridgeResult<()> {
        self.inner.run_script(source.into(), source_url.into())
    }

    /// Call `module.method(args)` in the main instance. Never blocks on script.
    pub fn call_function(&self, module: &str, method: &str, args: WritableArray) {
        self.inner
            .call_script_function(&self.inner.main_token, ScriptCall::new(module, method, args));
    }

    /// Reply to a script callback in the instance behind `token`
    pub fn invoke_callback(&self, token: &RuntimeToken, callback_id: u64, args: WritableArray) {
        CallbackInvoker::invoke_callback(self.inner.as_ref(), token, callback_id, args);
    }

    /// Allow native modules to initialize. Valid once, after `run_script`.
    /// After destroy the call is dropped.
    pub fn initialize(&self) -> BridgeResult<()> {
        if self.inner.being_destroyed.load(Ordering::Acquire) {
            self.inner.drop_call("initialize");
            return Ok(());
        }
        if !self.inner.script_loaded.load(Ordering::Acquire) {
            return Err(BridgeError::illegal_state("initialize called before run_script"));
        }
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::illegal_state("bridge already initialized"));
        }
        let weak = Arc::downgrade(&self.inner);
        let accepted = self.inner.queues.native_modules_queue().run_on_queue(move || {
            if let Some(inner) = weak.upgrade() {
                inner.registry.notify_instance_initialized();
            }
        });
        if !accepted {
            self.inner.drop_call("initialize");
        }
        Ok(())
    }

    /// Tear the bridge down. Idempotent.
    ///
    /// Blocks until native modules were notified and every executor was
    /// destroyed. Must not be called from inside an executor entry point.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BridgeState {
        self.inner.state()
    }

    pub fn main_token(&self) -> &RuntimeToken {
        &self.inner.main_token
    }

    /// Script module stub bound to the main instance
    pub fn script_module<T: ScriptModule>(&self) -> Arc<T> {
        self.inner.script_modules.get::<T>(&self.inner.main_token)
    }

    /// Script module stub bound to another runtime instance
    pub fn script_module_for<T: ScriptModule>(&self, token: &RuntimeToken) -> Arc<T> {
        self.inner.script_modules.get::<T>(token)
    }

    /// Typed access to a native module, creating it if needed
    pub fn native_module<M: NativeModule>(&self) -> BridgeResult<Arc<M>> {
        Ok(self.inner.registry.module::<M>()?)
    }

    pub fn has_native_module(&self, name: &str) -> bool {
        self.inner.registry.has_module(name)
    }

    /// Register more native modules on a live bridge.
    ///
    /// Once the bundle is running the main instance gets a refreshed module config.
    pub fn extend_native_modules(&self, modules: ModuleRegistryBuilder) -> BridgeResult<Vec<u32>> {
        let ids = self.inner.registry.extend(modules)?;
        if self.inner.script_loaded.load(Ordering::Acquire) {
            let config = self.inner.module_config_json(false)?;
            self.set_global_variable(MODULE_CONFIG_GLOBAL, config);
        }
        Ok(ids)
    }

    pub fn add_idle_listener(&self, listener: Arc<dyn BridgeIdleListener>) {
        self.inner.idle_listeners.write().push(listener);
    }

    pub fn remove_idle_listener(&self, listener: &Arc<dyn BridgeIdleListener>) {
        self.inner
            .idle_listeners
            .write()
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
    }

    /// Start another runtime instance (a worker) and evaluate `source` in it.
    ///
    /// The instance sees only modules that support web workers. Fails with
    /// [`BridgeError::IllegalState`] after destroy, since there is no token to hand out.
    pub fn create_runtime_instance(
        &self,
        label: &str,
        executor: impl ScriptExecutor,
        source: impl Into<String>,
        source_url: impl Into<String>,
    ) -> BridgeResult<RuntimeToken> {
        if self.inner.being_destroyed.load(Ordering::Acquire) {
            return Err(BridgeError::illegal_state("bridge has been destroyed"));
        }
        let token = RuntimeToken::new(label);
        let instance = Arc::new(RuntimeInstance {
            token: token.clone(),
            executor: Mutex::new(Box::new(executor)),
        });
        let config = self.inner.module_config_json(true)?;
        self.inner
            .instances
            .write()
            .insert(token.id(), instance.clone());
        debug!(label, token = token.id(), "Created runtime instance");
        self.inner
            .load_instance(instance, config, source.into(), source_url.into())?;
        Ok(token)
    }

    /// Destroy a runtime instance created with
    /// [`create_runtime_instance`](Self::create_runtime_instance)
    pub fn destroy_runtime_instance(&self, token: &RuntimeToken) -> BridgeResult<()> {
        if *token == self.inner.main_token {
            return Err(BridgeError::illegal_state(
                "the main runtime instance is destroyed with the bridge",
            ));
        }
        let Some(instance) = self.inner.instances.write().remove(&token.id()) else {
            return Ok(());
        };
        self.inner.script_modules.remove_instance(token.id());
        debug!(token = token.id(), "Destroying runtime instance");
        let accepted = self.inner.queues.script_queue().run_on_queue(move || {
            instance.executor.lock().destroy();
        });
        if !accepted {
            warn!(token = token.id(), "Script queue gone before instance teardown");
        }
        Ok(())
    }

    /// Set a global in the main instance
    pub fn set_global_variable(&self, name: &str, json: impl Into<String>) {
        let name = name.to_string();
        let json = json.into();
        let weak = Arc::downgrade(&self.inner);
        let accepted = self.inner.queues.script_queue().run_on_queue(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Some(instance) = inner.instance(&inner.main_token) {
                let result = instance.executor.lock().set_global_variable(&name, &json);
                if let Err(err) = result {
                    inner.handle_exception(err.into());
                }
            }
        });
        if !accepted {
            self.inner.drop_call("set_global_variable");
        }
    }

    /// Forward a memory pressure signal to every executor
    pub fn handle_memory_pressure(&self, level: MemoryPressure) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.queues.script_queue().run_on_queue(move || {
            if let Some(inner) = weak.upgrade() {
                let instances: Vec<_> = inner.instances.read().values().cloned().collect();
                for instance in instances {
                    instance.executor.lock().handle_memory_pressure(level);
                }
            }
        });
    }

    /// Number of outbound calls whose batch has not completed
    pub fn pending_calls(&self) -> usize {
        self.inner.pending_calls.load(Ordering::Acquire)
    }

    pub fn queues(&self) -> &QueueConfiguration {
        &self.inner.queues
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}
