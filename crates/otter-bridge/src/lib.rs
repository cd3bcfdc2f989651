//! otter-bridge - call bridge between a native host and an embedded script runtime.
//!
//! Script code calls *native modules* by numeric id; native code calls *script
//! modules* through typed stubs. Everything crossing the boundary is a tagged
//! [`Value`], and replies travel back as single-shot [`Callback`]s or
//! [`Promise`]s.
//!
//! # Features
//!
//! - **Lazy modules**: native modules are created on first use, exactly once, even
//!   under concurrent first calls
//! - **Typed methods**: handlers are plain closures; argument extraction and the
//!   signature string are derived from their parameter types
//! - **Three queues**: UI, Native-Modules and Script threads; the executor is only
//!   ever touched from the Script queue
//! - **Idle tracking**: listeners see busy/idle transitions of outstanding calls
//! - **Deadlock-free teardown**: destroy is idempotent and never races the hot path
//!
//! # Example
//!
//! ```
//! use otter_bridge::prelude::*;
//!
//! #[derive(Default)]
//! struct Clock;
//!
//! impl NativeModule for Clock {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method("now", |_: &Clock| 1_700_000_000.0_f64);
//!     }
//! }
//!
//! let mut modules = NativeModuleRegistry::builder();
//! modules.add(ModuleDescriptor::new("Clock"), Clock::default).unwrap();
//!
//! let bridge = Bridge::builder()
//!     .modules(modules)
//!     .executor(LoopbackExecutor::new().on_load(|scope, _| {
//!         let now = scope.call_sync("Clock", "now", vec![])?;
//!         assert_eq!(now, Value::from(1_700_000_000.0));
//!         Ok(())
//!     }))
//!     .build()
//!     .unwrap();
//!
//! bridge.run_script("bundle", "main.js").unwrap();
//! bridge.destroy();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Bridge                             │
//! │  run_script / call_function / invoke_callback / destroy      │
//! └──────────────────────────────────────────────────────────────┘
//!        │ outbound (Script queue)            ▲ inbound batches
//!        ↓                                    │
//! ┌──────────────────────┐        ┌──────────────────────────────┐
//! │   ScriptExecutor     │        │     NativeModuleRegistry     │
//! │  (one per runtime    │ ─────► │  ModuleHolder (lazy, once)   │
//! │   instance)          │        │  MethodDescriptor dispatch   │
//! └──────────────────────┘        └──────────────────────────────┘
//!        ▲                                    │
//!        └──── Callback / Promise replies ────┘
//! ```

pub mod bridge;
pub mod callback;
pub mod config;
pub mod error;
pub mod executor;
pub mod method;
pub mod module;
pub mod promise;
pub mod queue;
pub mod script_module;
pub mod soft_exception;
pub mod token;
pub mod value;

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub use bridge::{
    Bridge, BridgeBuilder, BridgeIdleListener, BridgeState, BridgeStats, BridgeStatsSnapshot,
    Escalation, NativeExceptionHandler,
};
pub use callback::{Callback, CallbackInvoker};
pub use config::BridgeConfig;
pub use error::{
    ArgumentError, BridgeError, BridgeResult, CallbackError, ModuleError, QueueError,
    ScriptError, ValueError,
};
pub use executor::{
    LoopbackExecutor, MemoryPressure, NativeCall, NativeCallBatch, NativeHooks, ScriptCall,
    ScriptExecutor, ScriptScope,
};
pub use method::{ArgumentType, FromArgument, IntoReturn, MethodDescriptor, MethodKind, MethodTable};
pub use module::{
    HolderState, ModuleDescriptor, ModuleHolder, ModuleRegistryBuilder, NativeModule,
    NativeModuleRegistry,
};
pub use promise::Promise;
pub use queue::{MessageQueueThread, QueueConfiguration, QueueConfigurationSpec, QueueSpec};
pub use script_module::{ScriptModule, ScriptModuleInvoker, ScriptModuleRegistry};
pub use soft_exception::{SoftException, reset_soft_exception_logger, set_soft_exception_logger};
pub use token::RuntimeToken;
pub use value::{Dynamic, ReadableArray, ReadableMap, Value, ValueType, WritableArray, WritableMap};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-time process setup. Safe to call any number of times; returns `true`
/// only for the call that did the work.
///
/// [`BridgeBuilder::build`] calls this.
pub fn init() -> bool {
    if INITIALIZED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return false;
    }
    debug!(version = env!("CARGO_PKG_VERSION"), "otter-bridge initialized");
    true
}

pub mod prelude {
    pub use crate::bridge::{Bridge, BridgeBuilder, BridgeIdleListener, BridgeState, Escalation};
    pub use crate::callback::Callback;
    pub use crate::config::BridgeConfig;
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::executor::{LoopbackExecutor, ScriptExecutor, ScriptScope};
    pub use crate::method::MethodTable;
    pub use crate::module::{ModuleDescriptor, NativeModule, NativeModuleRegistry};
    pub use crate::promise::Promise;
    pub use crate::script_module::ScriptModule;
    pub use crate::token::RuntimeToken;
    pub use crate::value::{
        Dynamic, ReadableArray, ReadableMap, Value, WritableArray, WritableMap,
    };
    pub use crate::{array, map, script_module};
}
