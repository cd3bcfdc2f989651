//! Script modules: script-side objects native code can call
//!
//! A script module is a plain struct holding a [`ScriptModuleInvoker`]; each of
//! its methods forwards `(token, module, method, args)` to the bridge and returns
//! immediately. The [`script_module!`](crate::script_module!) macro generates
//! such structs from a method list.
//!
//! # Example
//!
//! ```
//! otter_bridge::script_module! {
//!     /// Events delivered to script listeners
//!     pub struct DeviceEventEmitter as "RCTDeviceEventEmitter" {
//!         fn emit(event: &str, payload: otter_bridge::value::WritableMap);
//!     }
//! }
//! ```

use crate::executor::ScriptCall;
use crate::token::{RuntimeToken, WeakRuntimeToken};
use crate::value::WritableArray;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::warn;

/// Receives outbound calls into a script runtime instance
pub trait ScriptCallSink: Send + Sync {
    fn call_script_function(&self, token: &RuntimeToken, call: ScriptCall);
}

/// A native-side stub for one script module
pub trait ScriptModule: Send + Sync + 'static {
    /// Module name as registered in the script runtime
    const NAME: &'static str;

    fn from_invoker(invoker: ScriptModuleInvoker) -> Self;
}

/// Forwards stub method calls to the bridge
#[derive(Clone)]
pub struct ScriptModuleInvoker {
    token: WeakRuntimeToken,
    module: &'static str,
    sink: Weak<dyn ScriptCallSink>,
}

impl ScriptModuleInvoker {
    pub fn new(token: &RuntimeToken, module: &'static str, sink: Weak<dyn ScriptCallSink>) -> Self {
        Self {
            token: token.downgrade(),
            module,
            sink,
        }
    }

    pub fn module(&self) -> &'static str {
        self.module
    }

    /// Fire-and-forget call. Dropped with a warning once the runtime instance or
    /// the bridge is gone.
    pub fn invoke(&self, method: &str, args: WritableArray) {
        self.invoke_traced(method, args, None);
    }

    /// Same as [`invoke`](Self::invoke), tagging the call with a trace name
    pub fn invoke_traced(&self, method: &str, args: WritableArray, trace_name: Option<String>) {
        let Some(token) = self.token.upgrade() else {
            warn!(
                module = self.module,
                method, "Dropping script module call, runtime instance is gone"
            );
            return;
        };
        let Some(sink) = self.sink.upgrade() else {
            warn!(
                module = self.module,
                method, "Dropping script module call, bridge is gone"
            );
            return;
        };
        let mut call = ScriptCall::new(self.module, method, args);
        call.trace_name = trace_name;
        sink.call_script_function(&token, call);
    }
}

struct InstanceStubs {
    token: WeakRuntimeToken,
    stubs: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

/// Per-runtime-instance cache of script module stubs
pub struct ScriptModuleRegistry {
    sink: Weak<dyn ScriptCallSink>,
    instances: DashMap<u64, InstanceStubs>,
}

impl ScriptModuleRegistry {
    pub fn new(sink: Weak<dyn ScriptCallSink>) -> Self {
        Self {
            sink,
            instances: DashMap::new(),
        }
    }

    /// Stub of `T` bound to `token`, created on first request
    pub fn get<T: ScriptModule>(&self, token: &RuntimeToken) -> Arc<T> {
        self.purge_dead();
        let mut entry = self
            .instances
            .entry(token.id())
            .or_insert_with(|| InstanceStubs {
                token: token.downgrade(),
                stubs: HashMap::new(),
            });

        if let Some(stub) = entry.stubs.get(&TypeId::of::<T>()) {
            if let Ok(stub) = stub.clone().downcast::<T>() {
                return stub;
            }
        }
        let stub = Arc::new(T::from_invoker(ScriptModuleInvoker::new(
            token,
            T::NAME,
            self.sink.clone(),
        )));
        entry.stubs.insert(TypeId::of::<T>(), stub.clone());
        stub
    }

    /// Forget every stub bound to `token_id`
    pub fn remove_instance(&self, token_id: u64) {
        self.instances.remove(&token_id);
    }

    /// Drop stubs whose runtime instance token is dead
    pub fn purge_dead(&self) {
        self.instances.retain(|_, stubs| stubs.token.is_alive());
    }

    pub fn clear(&self) {
        self.instances.clear();
    }

    /// Number of runtime instances with cached stubs
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __script_method_name {
    ($method:ident) => {
        stringify!($method)
    };
    ($method:ident, $script_name:literal) => {
        $script_name
    };
}

/// Declare a script module stub
///
/// Every listed method becomes a `pub fn` that packs its arguments into a
/// [`WritableArray`](crate::value::WritableArray) and forwards them. A method may
/// be renamed on the script side with `fn rust_name as "scriptName"(...)`.
#[macro_export]
macro_rules! script_module {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident as $script_name:literal {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident $(as $method_script_name:literal)? ( $($arg:ident : $ty:ty),* $(,)? );
            )*
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            invoker: $crate::script_module::ScriptModuleInvoker,
        }

        impl $crate::script_module::ScriptModule for $name {
            const NAME: &'static str = $script_name;

            fn from_invoker(invoker: $crate::script_module::ScriptModuleInvoker) -> Self {
                Self { invoker }
            }
        }

        impl $name {
            $(
                $(#[$method_meta])*
                pub fn $method(&self, $($arg: $ty),*) {
                    #[allow(unused_mut)]
                    let mut args = $crate::value::WritableArray::new();
                    $( args.push($arg); )*
                    self.invoker.invoke(
                        $crate::__script_method_name!($method $(, $method_script_name)?),
                        args,
                    );
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, WritableMap};
    use parking_lot::Mutex;

    crate::script_module! {
        struct AppRegistry as "AppRegistry" {
            fn run_application as "runApplication"(app_key: &str, params: WritableMap);
            fn unmount(tag: i32);
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(u64, ScriptCall)>>,
    }

    impl ScriptCallSink for RecordingSink {
        fn call_script_function(&self, token: &RuntimeToken, call: ScriptCall) {
            self.calls.lock().push((token.id(), call));
        }
    }

    fn setup() -> (Arc<RecordingSink>, ScriptModuleRegistry) {
        let sink = Arc::new(RecordingSink::default());
        let weak: Weak<dyn ScriptCallSink> = Arc::downgrade(&sink) as Weak<dyn ScriptCallSink>;
        (sink, ScriptModuleRegistry::new(weak))
    }

    #[test]
    fn test_stub_forwards_call() {
        let (sink, registry) = setup();
        let token = RuntimeToken::new("main");
        let app = registry.get::<AppRegistry>(&token);
        app.run_application("Demo", crate::map! { "rootTag" => 1 });
        app.unmount(1);

        let calls = sink.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, token.id());
        assert_eq!(calls[0].1.module, "AppRegistry");
        assert_eq!(calls[0].1.method, "runApplication");
        assert_eq!(calls[0].1.args[0], Value::from("Demo"));
        assert_eq!(calls[1].1.method, "unmount");
    }

    #[test]
    fn test_stubs_cached_per_token() {
        let (_sink, registry) = setup();
        let main = RuntimeToken::new("main");
        let worker = RuntimeToken::new("worker");
        let a = registry.get::<AppRegistry>(&main);
        let b = registry.get::<AppRegistry>(&main);
        let c = registry.get::<AppRegistry>(&worker);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.instance_count(), 2);
    }

    #[test]
    fn test_dead_token_drops_call_and_entry() {
        let (sink, registry) = setup();
        let worker = RuntimeToken::new("worker");
        let stub = registry.get::<AppRegistry>(&worker);
        drop(worker);
        stub.unmount(3);
        assert!(sink.calls.lock().is_empty());

        registry.purge_dead();
        assert_eq!(registry.instance_count(), 0);
    }
}
