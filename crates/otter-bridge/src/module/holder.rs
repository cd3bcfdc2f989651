//! Lazy, thread-safe module lifecycle
//!
//! ```text
//!  Uninstantiated ──► Creating ──► CreatedUninitialized ──► Initializing ──► Initialized
//!        │                                  │                                    │
//!        └──────────────────────────────────┴─────────────► Destroyed ◄──────────┘
//! ```
//!
//! Creation is single-flight: the first caller runs the provider while concurrent
//! callers block on the same cell and observe the same instance. Initialization
//! runs once, and only after the registry has marked modules initializable. When
//! that mark arrives before creation finishes, the creating caller initializes the
//! module right after creating it.

use super::{ModuleDescriptor, NativeModule};
use crate::error::{BridgeResult, ModuleError};
use crate::method::{CallContext, MethodDescriptor, MethodKind, describe_module};
use crate::value::Value;
use parking_lot::Once;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering, fence};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// Lifecycle state of a [`ModuleHolder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HolderState {
    Uninstantiated = 0,
    Creating = 1,
    CreatedUninitialized = 2,
    Initializing = 3,
    Initialized = 4,
    Destroyed = 5,
}

impl HolderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HolderState::Uninstantiated,
            1 => HolderState::Creating,
            2 => HolderState::CreatedUninitialized,
            3 => HolderState::Initializing,
            4 => HolderState::Initialized,
            _ => HolderState::Destroyed,
        }
    }
}

/// A created module, usable both as a trait object and for downcasting
#[derive(Clone)]
pub struct ModuleInstance {
    module: Arc<dyn NativeModule>,
    any: Arc<dyn Any + Send + Sync>,
}

impl ModuleInstance {
    pub fn new<M: NativeModule>(module: M) -> Self {
        let module = Arc::new(module);
        Self {
            any: module.clone(),
            module,
        }
    }

    pub fn module(&self) -> &dyn NativeModule {
        self.module.as_ref()
    }

    pub fn as_any(&self) -> &dyn Any {
        self.any.as_ref()
    }

    pub fn downcast<M: NativeModule>(&self) -> Option<Arc<M>> {
        self.any.clone().downcast::<M>().ok()
    }
}

type Provider = Box<dyn Fn() -> ModuleInstance + Send + Sync>;
type MethodsBuilder = fn(&str) -> Result<Vec<MethodDescriptor>, ModuleError>;

/// Lazily constructed module plus its cached dispatch table
pub struct ModuleHolder {
    descriptor: ModuleDescriptor,
    module_type: TypeId,
    provider: Provider,
    build_methods: MethodsBuilder,
    instance: OnceLock<ModuleInstance>,
    methods: OnceLock<Result<Arc<[MethodDescriptor]>, ModuleError>>,
    init: Once,
    initializable: AtomicBool,
    state: AtomicU8,
}

impl ModuleHolder {
    pub fn new<M, F>(descriptor: ModuleDescriptor, provider: F) -> Self
    where
        M: NativeModule,
        F: Fn() -> M + Send + Sync + 'static,
    {
        Self {
            descriptor,
            module_type: TypeId::of::<M>(),
            provider: Box::new(move || ModuleInstance::new(provider())),
            build_methods: describe_module::<M>,
            instance: OnceLock::new(),
            methods: OnceLock::new(),
            init: Once::new(),
            initializable: AtomicBool::new(false),
            state: AtomicU8::new(HolderState::Uninstantiated as u8),
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn module_type(&self) -> TypeId {
        self.module_type
    }

    pub fn state(&self) -> HolderState {
        HolderState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn has_instance(&self) -> bool {
        self.instance.get().is_some()
    }

    /// The instance if it was already created, without creating it
    pub fn instance_if_created(&self) -> Option<&ModuleInstance> {
        self.instance.get()
    }

    /// Dispatch table, built on first use
    pub fn methods(&self) -> Result<&[MethodDescriptor], ModuleError> {
        let methods = self
            .methods
            .get_or_init(|| (self.build_methods)(self.name()).map(Arc::from));
        match methods {
            Ok(methods) => Ok(methods),
            Err(e) => Err(e.clone()),
        }
    }

    /// Get the module, creating and (when allowed) initializing it first
    pub fn module(&self) -> Result<&ModuleInstance, ModuleError> {
        if self.state() == HolderState::Destroyed {
            return Err(ModuleError::Destroyed(self.name().to_string()));
        }
        let instance = self.instance.get_or_init(|| {
            let instance = self.create();
            fence(Ordering::SeqCst);
            if self.initializable.load(Ordering::SeqCst) {
                self.initialize_once(&instance);
            }
            instance
        });
        // Covers a mark that raced with creation
        fence(Ordering::SeqCst);
        if self.initializable.load(Ordering::SeqCst) {
            self.initialize_once(instance);
        }
        if self.state() == HolderState::Destroyed {
            return Err(ModuleError::Destroyed(self.name().to_string()));
        }
        Ok(instance)
    }

    /// Allow initialization; initializes now if the module already exists
    pub(crate) fn mark_initializable(&self) {
        self.initializable.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        if let Some(instance) = self.instance.get() {
            self.initialize_once(instance);
        }
    }

    /// Tear the module down. Only the first call has an effect.
    pub(crate) fn destroy(&self) {
        let previous = HolderState::from_u8(
            self.state
                .swap(HolderState::Destroyed as u8, Ordering::AcqRel),
        );
        if previous == HolderState::Destroyed {
            return;
        }
        if let Some(instance) = self.instance.get() {
            debug!(module = self.name(), "Destroying native module");
            instance.module().on_instance_destroy();
        }
    }

    /// Dispatch a method by id. `sync` selects the synchronous call path.
    pub(crate) fn invoke(
        &self,
        method_id: u32,
        ctx: &CallContext<'_>,
        sync: bool,
    ) -> BridgeResult<Option<Value>> {
        let methods = self.methods()?;
        let method = methods
            .get(method_id as usize)
            .ok_or_else(|| ModuleError::UnknownMethodId {
                module: self.name().to_string(),
                method_id,
            })?;
        if sync != (method.kind() == MethodKind::Sync) {
            return Err(ModuleError::WrongMethodKind {
                module: self.name().to_string(),
                method: method.name().to_string(),
                expected: if sync { "sync" } else { "async" },
            }
            .into());
        }
        trace!(module = self.name(), method = method.name(), "Invoking native method");
        let instance = self.module()?;
        method.invoke(self.name(), instance.as_any(), ctx)
    }

    fn create(&self) -> ModuleInstance {
        self.transition(HolderState::Uninstantiated, HolderState::Creating);
        // A panicking provider leaves the holder retryable.
        let rollback = scopeguard::guard_on_unwind((), |()| {
            let _ = self.state.compare_exchange(
                HolderState::Creating as u8,
                HolderState::Uninstantiated as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        });
        debug!(module = self.name(), "Creating native module");
        let instance = (self.provider)();
        scopeguard::ScopeGuard::into_inner(rollback);
        self.transition(HolderState::Creating, HolderState::CreatedUninitialized);
        instance
    }

    fn initialize_once(&self, instance: &ModuleInstance) {
        self.init.call_once(|| {
            if !self.transition(HolderState::CreatedUninitialized, HolderState::Initializing) {
                return;
            }
            debug!(module = self.name(), "Initializing native module");
            instance.module().initialize();
            self.transition(HolderState::Initializing, HolderState::Initialized);
        });
    }

    /// Move `from` → `to`. Losing to a concurrent destroy is allowed; anything
    /// else is a broken invariant.
    fn transition(&self, from: HolderState, to: HolderState) -> bool {
        match self.state.compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) if current == HolderState::Destroyed as u8 => false,
            Err(current) => panic!(
                "Native module '{}' cannot move from {:?} to {:?}: currently {:?}",
                self.name(),
                from,
                to,
                HolderState::from_u8(current)
            ),
        }
    }
}

impl fmt::Debug for ModuleHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHolder")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::MethodTable;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, Mutex};
    use std::thread::{self, ThreadId};

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        initialized: AtomicUsize,
        destroyed: AtomicUsize,
        creator: Mutex<Option<ThreadId>>,
        initializer: Mutex<Option<ThreadId>>,
    }

    struct Storage {
        counters: Arc<Counters>,
    }

    impl NativeModule for Storage {
        fn methods(table: &mut MethodTable<Self>) {
            table.method("ping", |_: &Storage| true);
        }

        fn initialize(&self) {
            self.counters.initialized.fetch_add(1, Ordering::SeqCst);
            *self.counters.initializer.lock().unwrap() = Some(thread::current().id());
        }

        fn on_instance_destroy(&self) {
            self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn holder(counters: &Arc<Counters>) -> ModuleHolder {
        let counters = counters.clone();
        ModuleHolder::new(ModuleDescriptor::new("Storage"), move || {
            counters.created.fetch_add(1, Ordering::SeqCst);
            *counters.creator.lock().unwrap() = Some(thread::current().id());
            thread::yield_now();
            Storage {
                counters: counters.clone(),
            }
        })
    }

    #[test]
    fn test_lazy_creation() {
        let counters = Arc::new(Counters::default());
        let holder = holder(&counters);
        assert_eq!(holder.state(), HolderState::Uninstantiated);
        assert_eq!(holder.methods().unwrap().len(), 1);
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);

        holder.module().unwrap();
        assert_eq!(holder.state(), HolderState::CreatedUninitialized);
        assert_eq!(counters.initialized.load(Ordering::SeqCst), 0);

        holder.mark_initializable();
        assert_eq!(holder.state(), HolderState::Initialized);
        assert_eq!(counters.initialized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mark_before_create_initializes_on_creation() {
        let counters = Arc::new(Counters::default());
        let holder = holder(&counters);
        holder.mark_initializable();
        assert_eq!(holder.state(), HolderState::Uninstantiated);
        holder.module().unwrap();
        assert_eq!(holder.state(), HolderState::Initialized);
        assert_eq!(counters.initialized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_access() {
        const THREADS: usize = 16;
        let counters = Arc::new(Counters::default());
        let holder = Arc::new(holder(&counters));
        holder.mark_initializable();
        let barrier = Arc::new(Barrier::new(THREADS));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let holder = holder.clone();
                let barrier = barrier.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let instance = holder.module().unwrap();
                    let ptr = Arc::as_ptr(&instance.downcast::<Storage>().unwrap()) as usize;
                    seen.lock().unwrap().push(ptr);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.initialized.load(Ordering::SeqCst), 1);
        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|ptr| *ptr == seen[0]));
        let creator = *counters.creator.lock().unwrap();
        assert!(creator.is_some());
        assert_eq!(*counters.initializer.lock().unwrap(), creator);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let counters = Arc::new(Counters::default());
        let holder = holder(&counters);
        holder.module().unwrap();
        holder.destroy();
        holder.destroy();
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(holder.state(), HolderState::Destroyed);
        assert!(matches!(holder.module(), Err(ModuleError::Destroyed(_))));
    }

    #[test]
    fn test_destroy_without_instance_skips_hook() {
        let counters = Arc::new(Counters::default());
        let holder = holder(&counters);
        holder.destroy();
        holder.mark_initializable();
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_provider_can_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counters = Arc::new(Counters::default());
        let holder = {
            let attempts = attempts.clone();
            let counters = counters.clone();
            ModuleHolder::new(ModuleDescriptor::new("Flaky"), move || {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first construction fails");
                }
                Storage {
                    counters: counters.clone(),
                }
            })
        };
        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = holder.module();
        }));
        assert!(first.is_err());
        assert_eq!(holder.state(), HolderState::Uninstantiated);
        assert!(holder.module().is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
