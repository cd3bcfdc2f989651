//! Script executor seam
//!
//! The bridge never talks to a script engine directly. It drives a
//! [`ScriptExecutor`] from the Script queue, and the executor answers every
//! entry point with the batch of native calls the script made while running.
//! Returning a batch marks the end of that batch.

mod loopback;

pub use loopback::{LoopbackExecutor, ScriptFn, ScriptScope};

use crate::error::{BridgeResult, ScriptError};
use crate::value::{Value, WritableArray};

/// Global variable carrying the module configuration document (JSON)
pub const MODULE_CONFIG_GLOBAL: &str = "__bridgeConfig";

/// One native call requested by script code
#[derive(Debug, Clone, PartialEq)]
pub struct NativeCall {
    pub module_id: u32,
    pub method_id: u32,
    pub args: Vec<Value>,
}

/// Native calls queued by script code during one entry into the runtime
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeCallBatch {
    pub calls: Vec<NativeCall>,
}

impl NativeCallBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, module_id: u32, method_id: u32, args: Vec<Value>) {
        self.calls.push(NativeCall {
            module_id,
            method_id,
            args,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}

/// A call from native code into a script module
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptCall {
    pub module: String,
    pub method: String,
    pub args: Vec<Value>,
    pub trace_name: Option<String>,
}

impl ScriptCall {
    pub fn new(module: impl Into<String>, method: impl Into<String>, args: WritableArray) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
            args: args.into_vec(),
            trace_name: None,
        }
    }
}

/// Memory pressure levels forwarded to executors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    UiHidden,
    Moderate,
    Critical,
}

/// Synchronous native calls made by script code while it runs.
///
/// Only valid on the Script queue, during an executor entry point.
pub trait NativeHooks {
    fn call_sync(&self, module_id: u32, method_id: u32, args: Vec<Value>) -> BridgeResult<Value>;
}

/// A script engine driven by the bridge.
///
/// Every method runs on the Script queue.
pub trait ScriptExecutor: Send + 'static {
    fn set_global_variable(&mut self, name: &str, json: &str) -> Result<(), ScriptError>;

    fn load_script(
        &mut self,
        source: &str,
        source_url: &str,
        hooks: &dyn NativeHooks,
    ) -> Result<NativeCallBatch, ScriptError>;

    fn call_function(
        &mut self,
        call: &ScriptCall,
        hooks: &dyn NativeHooks,
    ) -> Result<NativeCallBatch, ScriptError>;

    fn invoke_callback(
        &mut self,
        callback_id: u64,
        args: &[Value],
        hooks: &dyn NativeHooks,
    ) -> Result<NativeCallBatch, ScriptError>;

    fn handle_memory_pressure(&mut self, _level: MemoryPressure) {}

    /// Release the engine. Called once, after which no other method is called.
    fn destroy(&mut self);
}
