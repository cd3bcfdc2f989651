//! In-process executor whose "script" is host closures
//!
//! `LoopbackExecutor` stands in for a real engine when embedding or testing the
//! bridge: script module functions, callbacks and the bundle body are Rust
//! closures that receive a [`ScriptScope`] to call back into native modules.
//!
//! ```
//! use otter_bridge::executor::LoopbackExecutor;
//!
//! let executor = LoopbackExecutor::new()
//!     .on_load(|scope, _source| scope.call_native("Logger", "log", vec!["booted".into()]))
//!     .function("App", "ping", |scope, args| {
//!         scope.call_native("Logger", "log", args.to_vec())
//!     });
//! ```

use super::{
    MODULE_CONFIG_GLOBAL, MemoryPressure, NativeCallBatch, NativeHooks, ScriptCall,
    ScriptExecutor,
};
use crate::error::ScriptError;
use crate::module::REMOTE_MODULE_CONFIG;
use crate::value::Value;
use std::collections::HashMap;
use tracing::{debug, trace};

/// A script module function
pub type ScriptFn =
    Box<dyn FnMut(&mut ScriptScope<'_>, &[Value]) -> Result<(), ScriptError> + Send>;
type CallbackFn =
    Box<dyn FnOnce(&mut ScriptScope<'_>, &[Value]) -> Result<(), ScriptError> + Send>;
type LoadFn = Box<dyn FnMut(&mut ScriptScope<'_>, &str) -> Result<(), ScriptError> + Send>;
type PressureFn = Box<dyn FnMut(MemoryPressure) + Send>;

struct RemoteModule {
    id: u32,
    methods: HashMap<String, u32>,
    constants: Option<Value>,
}

#[derive(Default)]
struct ModuleTable {
    modules: HashMap<String, RemoteModule>,
}

impl ModuleTable {
    fn parse(json: &str) -> Result<Self, ScriptError> {
        let invalid = |what: &str| ScriptError::evaluation(format!("invalid module config: {what}"));
        let document: serde_json::Value =
            serde_json::from_str(json).map_err(|e| invalid(&e.to_string()))?;
        let config = document
            .get(REMOTE_MODULE_CONFIG)
            .and_then(serde_json::Value::as_object)
            .ok_or_else(|| invalid("missing remoteModuleConfig"))?;

        let mut modules = HashMap::with_capacity(config.len());
        for (name, module) in config {
            let id = module
                .get("moduleID")
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| invalid("missing moduleID"))?;
            let mut methods = HashMap::new();
            if let Some(table) = module.get("methods").and_then(serde_json::Value::as_object) {
                for (method, entry) in table {
                    let method_id = entry
                        .get("methodID")
                        .and_then(serde_json::Value::as_u64)
                        .ok_or_else(|| invalid("missing methodID"))?;
                    methods.insert(method.clone(), method_id as u32);
                }
            }
            let constants = module.get("constants").cloned().map(Value::from);
            modules.insert(
                name.clone(),
                RemoteModule {
                    id: id as u32,
                    methods,
                    constants,
                },
            );
        }
        Ok(Self { modules })
    }

    fn resolve(&self, module: &str, method: &str) -> Result<(u32, u32), ScriptError> {
        let unknown = || ScriptError::evaluation(format!("{module}.{method} is not a native method"));
        let remote = self.modules.get(module).ok_or_else(unknown)?;
        let method_id = remote.methods.get(method).ok_or_else(unknown)?;
        Ok((remote.id, *method_id))
    }
}

#[derive(Default)]
struct Callbacks {
    next_id: u64,
    pending: HashMap<u64, CallbackFn>,
}

/// What script code can do while it runs
pub struct ScriptScope<'a> {
    batch: &'a mut NativeCallBatch,
    hooks: &'a dyn NativeHooks,
    modules: &'a ModuleTable,
    globals: &'a HashMap<String, String>,
    callbacks: &'a mut Callbacks,
}

impl ScriptScope<'_> {
    /// Queue an async native call, resolving ids through the module config
    pub fn call_native(
        &mut self,
        module: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), ScriptError> {
        let (module_id, method_id) = self.modules.resolve(module, method)?;
        self.call_native_by_id(module_id, method_id, args);
        Ok(())
    }

    /// Queue an async native call by raw ids
    pub fn call_native_by_id(&mut self, module_id: u32, method_id: u32, args: Vec<Value>) {
        trace!(module_id, method_id, "Script queued native call");
        self.batch.push(module_id, method_id, args);
    }

    /// Call a sync native method and get its value immediately
    pub fn call_sync(
        &mut self,
        module: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let (module_id, method_id) = self.modules.resolve(module, method)?;
        self.hooks
            .call_sync(module_id, method_id, args)
            .map_err(|e| ScriptError::evaluation(e.to_string()))
    }

    /// Register a one-shot callback and get the id to pass to native code
    pub fn callback<F>(&mut self, f: F) -> Value
    where
        F: FnOnce(&mut ScriptScope<'_>, &[Value]) -> Result<(), ScriptError> + Send + 'static,
    {
        self.callbacks.next_id += 1;
        let id = self.callbacks.next_id;
        self.callbacks.pending.insert(id, Box::new(f));
        Value::Number(id as f64)
    }

    pub fn global(&self, name: &str) -> Option<&str> {
        self.globals.get(name).map(String::as_str)
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.modules.contains_key(name)
    }

    /// Constants exported by a native module
    pub fn constants(&self, module: &str) -> Option<&Value> {
        self.modules.modules.get(module)?.constants.as_ref()
    }
}

/// Executor running host closures as script code
#[derive(Default)]
pub struct LoopbackExecutor {
    functions: HashMap<String, HashMap<String, ScriptFn>>,
    on_load: Option<LoadFn>,
    on_memory_pressure: Option<PressureFn>,
    modules: ModuleTable,
    globals: HashMap<String, String>,
    callbacks: Callbacks,
    loaded: bool,
    destroyed: bool,
}

impl LoopbackExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable script module function
    pub fn function<F>(mut self, module: &str, method: &str, f: F) -> Self
    where
        F: FnMut(&mut ScriptScope<'_>, &[Value]) -> Result<(), ScriptError> + Send + 'static,
    {
        self.functions
            .entry(module.to_string())
            .or_default()
            .insert(method.to_string(), Box::new(f));
        self
    }

    /// Body run when the bundle is loaded
    pub fn on_load<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut ScriptScope<'_>, &str) -> Result<(), ScriptError> + Send + 'static,
    {
        self.on_load = Some(Box::new(f));
        self
    }

    pub fn on_memory_pressure<F>(mut self, f: F) -> Self
    where
        F: FnMut(MemoryPressure) + Send + 'static,
    {
        self.on_memory_pressure = Some(Box::new(f));
        self
    }

    fn ensure_alive(&self) -> Result<(), ScriptError> {
        if self.destroyed {
            Err(ScriptError::Destroyed)
        } else {
            Ok(())
        }
    }
}

impl ScriptExecutor for LoopbackExecutor {
    fn set_global_variable(&mut self, name: &str, json: &str) -> Result<(), ScriptError> {
        self.ensure_alive()?;
        if name == MODULE_CONFIG_GLOBAL {
            self.modules = ModuleTable::parse(json)?;
        }
        self.globals.insert(name.to_string(), json.to_string());
        Ok(())
    }

    fn load_script(
        &mut self,
        source: &str,
        source_url: &str,
        hooks: &dyn NativeHooks,
    ) -> Result<NativeCallBatch, ScriptError> {
        self.ensure_alive()?;
        debug!(source_url, "Loading loopback bundle");
        self.loaded = true;
        let mut batch = NativeCallBatch::new();
        let Self {
            on_load,
            modules,
            globals,
            callbacks,
            ..
        } = self;
        if let Some(on_load) = on_load {
            let mut scope = ScriptScope {
                batch: &mut batch,
                hooks,
                modules,
                globals,
                callbacks,
            };
            on_load(&mut scope, source)?;
        }
        Ok(batch)
    }

    fn call_function(
        &mut self,
        call: &ScriptCall,
        hooks: &dyn NativeHooks,
    ) -> Result<NativeCallBatch, ScriptError> {
        self.ensure_alive()?;
        let mut batch = NativeCallBatch::new();
        let Self {
            functions,
            modules,
            globals,
            callbacks,
            ..
        } = self;
        let function = functions
            .get_mut(call.module.as_str())
            .and_then(|methods| methods.get_mut(call.method.as_str()))
            .ok_or_else(|| ScriptError::UnknownFunction {
                module: call.module.clone(),
                method: call.method.clone(),
            })?;
        let mut scope = ScriptScope {
            batch: &mut batch,
            hooks,
            modules,
            globals,
            callbacks,
        };
        function(&mut scope, &call.args)?;
        Ok(batch)
    }

    fn invoke_callback(
        &mut self,
        callback_id: u64,
        args: &[Value],
        hooks: &dyn NativeHooks,
    ) -> Result<NativeCallBatch, ScriptError> {
        self.ensure_alive()?;
        let callback = self
            .callbacks
            .pending
            .remove(&callback_id)
            .ok_or(ScriptError::UnknownCallback(callback_id))?;
        let mut batch = NativeCallBatch::new();
        let mut scope = ScriptScope {
            batch: &mut batch,
            hooks,
            modules: &self.modules,
            globals: &self.globals,
            callbacks: &mut self.callbacks,
        };
        callback(&mut scope, args)?;
        Ok(batch)
    }

    fn handle_memory_pressure(&mut self, level: MemoryPressure) {
        debug!(?level, "Loopback executor memory pressure");
        if let Some(on_memory_pressure) = self.on_memory_pressure.as_mut() {
            on_memory_pressure(level);
        }
    }

    fn destroy(&mut self) {
        debug!(loaded = self.loaded, "Destroying loopback executor");
        self.destroyed = true;
        self.functions.clear();
        self.callbacks.pending.clear();
        self.on_load = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeResult, ModuleError};
    use serde_json::json;

    struct NoHooks;

    impl NativeHooks for NoHooks {
        fn call_sync(&self, module_id: u32, _: u32, _: Vec<Value>) -> BridgeResult<Value> {
            Err(ModuleError::UnknownModuleId(module_id).into())
        }
    }

    struct EchoHooks;

    impl NativeHooks for EchoHooks {
        fn call_sync(&self, _: u32, _: u32, args: Vec<Value>) -> BridgeResult<Value> {
            Ok(Value::Array(args))
        }
    }

    fn config() -> String {
        json!({
            "remoteModuleConfig": {
                "Logger": {"moduleID": 3, "methods": {"log": {"methodID": 1}}},
                "Device": {"moduleID": 4, "methods": {"scale": {"methodID": 0}}, "constants": {"os": "test"}},
            }
        })
        .to_string()
    }

    #[test]
    fn test_load_resolves_native_ids() {
        let mut executor = LoopbackExecutor::new().on_load(|scope, source| {
            assert_eq!(source, "bundle");
            assert_eq!(scope.constants("Device"), Some(&Value::from(json!({"os": "test"}))));
            scope.call_native("Logger", "log", vec!["hello".into()])
        });
        executor
            .set_global_variable(MODULE_CONFIG_GLOBAL, &config())
            .unwrap();
        let batch = executor.load_script("bundle", "test.js", &NoHooks).unwrap();
        assert_eq!(batch.calls.len(), 1);
        assert_eq!(batch.calls[0].module_id, 3);
        assert_eq!(batch.calls[0].method_id, 1);
    }

    #[test]
    fn test_unknown_function_and_callback() {
        let mut executor = LoopbackExecutor::new();
        let call = ScriptCall::new("App", "missing", crate::array![]);
        assert!(matches!(
            executor.call_function(&call, &NoHooks),
            Err(ScriptError::UnknownFunction { .. })
        ));
        assert_eq!(
            executor.invoke_callback(8, &[], &NoHooks).unwrap_err(),
            ScriptError::UnknownCallback(8)
        );
    }

    #[test]
    fn test_callbacks_are_one_shot() {
        let mut executor = LoopbackExecutor::new().function("App", "start", |scope, _| {
            let id = scope.callback(|scope, args| {
                scope.call_native_by_id(9, 9, args.to_vec());
                Ok(())
            });
            scope.call_native_by_id(1, 2, vec![id]);
            Ok(())
        });
        let batch = executor
            .call_function(&ScriptCall::new("App", "start", crate::array![]), &NoHooks)
            .unwrap();
        let id = batch.calls[0].args[0].as_f64().unwrap() as u64;

        let batch = executor.invoke_callback(id, &[Value::from(5)], &NoHooks).unwrap();
        assert_eq!(batch.calls[0].args, vec![Value::from(5)]);
        assert!(executor.invoke_callback(id, &[], &NoHooks).is_err());
    }

    #[test]
    fn test_sync_hook() {
        let mut executor = LoopbackExecutor::new().function("App", "measure", |scope, _| {
            let value = scope.call_sync("Device", "scale", vec![Value::from(2)])?;
            assert_eq!(value, Value::Array(vec![Value::from(2)]));
            Ok(())
        });
        executor
            .set_global_variable(MODULE_CONFIG_GLOBAL, &config())
            .unwrap();
        executor
            .call_function(&ScriptCall::new("App", "measure", crate::array![]), &EchoHooks)
            .unwrap();
    }

    #[test]
    fn test_destroyed_executor_refuses_work() {
        let mut executor = LoopbackExecutor::new();
        executor.destroy();
        assert_eq!(
            executor.load_script("", "x.js", &NoHooks).unwrap_err(),
            ScriptError::Destroyed
        );
    }
}
