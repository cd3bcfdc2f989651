//! Native module registry
//!
//! Modules are addressed by name from host code and by numeric id from script
//! code; the id of a module is its registration index and never changes, even
//! when a later registration overrides it.

use super::{ModuleDescriptor, ModuleHolder, NativeModule};
use crate::callback::CallbackInvoker;
use crate::error::{BridgeResult, ModuleError};
use crate::method::CallContext;
use crate::token::RuntimeToken;
use crate::value::{ReadableArray, Value};
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Top-level key of the module configuration document
pub const REMOTE_MODULE_CONFIG: &str = "remoteModuleConfig";

#[derive(Default)]
struct Modules {
    holders: Vec<Arc<ModuleHolder>>,
    by_name: HashMap<String, usize>,
    by_type: HashMap<TypeId, usize>,
}

impl Modules {
    fn check(&self, holder: &ModuleHolder) -> Result<(), ModuleError> {
        if self.by_name.contains_key(holder.name()) && !holder.descriptor().can_override_existing() {
            return Err(ModuleError::Duplicate {
                name: holder.name().to_string(),
            });
        }
        Ok(())
    }

    /// Insert a holder, returning its id and the holder it overrode, if any
    fn insert(
        &mut self,
        holder: Arc<ModuleHolder>,
    ) -> Result<(u32, Option<Arc<ModuleHolder>>), ModuleError> {
        self.check(&holder)?;
        let name = holder.name().to_string();
        let module_type = holder.module_type();
        let (index, replaced) = match self.by_name.get(&name) {
            Some(&existing) => {
                debug!(module = %name, "Overriding native module");
                let replaced = std::mem::replace(&mut self.holders[existing], holder);
                self.by_type.remove(&replaced.module_type());
                (existing, Some(replaced))
            }
            None => {
                self.holders.push(holder);
                self.by_name.insert(name, self.holders.len() - 1);
                (self.holders.len() - 1, None)
            }
        };
        self.by_type.insert(module_type, index);
        Ok((index as u32, replaced))
    }
}

/// Collects module registrations before the registry is built
#[derive(Default)]
pub struct ModuleRegistryBuilder {
    modules: Modules,
}

impl ModuleRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. A second module with the same name is rejected unless
    /// its descriptor allows overriding the first.
    pub fn add<M, F>(&mut self, descriptor: ModuleDescriptor, provider: F) -> Result<&mut Self, ModuleError>
    where
        M: NativeModule,
        F: Fn() -> M + Send + Sync + 'static,
    {
        // Nothing is created before build, so an overridden holder has no instance
        self.modules
            .insert(Arc::new(ModuleHolder::new(descriptor, provider)))?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.modules.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.holders.is_empty()
    }

    /// Freeze the registrations and create eager modules
    pub fn build(self) -> NativeModuleRegistry {
        let registry = NativeModuleRegistry {
            modules: RwLock::new(self.modules),
            initializable: AtomicBool::new(false),
        };
        registry.create_eager_modules(&registry.holders());
        registry
    }
}

/// Name and id indexed set of module holders
pub struct NativeModuleRegistry {
    modules: RwLock<Modules>,
    initializable: AtomicBool,
}

impl NativeModuleRegistry {
    pub fn builder() -> ModuleRegistryBuilder {
        ModuleRegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.modules.read().holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn holder(&self, module_id: u32) -> Option<Arc<ModuleHolder>> {
        self.modules.read().holders.get(module_id as usize).cloned()
    }

    pub fn holder_by_name(&self, name: &str) -> Option<Arc<ModuleHolder>> {
        let modules = self.modules.read();
        let index = *modules.by_name.get(name)?;
        modules.holders.get(index).cloned()
    }

    pub fn module_id(&self, name: &str) -> Option<u32> {
        self.modules.read().by_name.get(name).map(|&index| index as u32)
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.read().by_name.contains_key(name)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.holders()
            .iter()
            .map(|holder| holder.name().to_string())
            .collect()
    }

    /// Typed lookup; creates the module on first access
    pub fn module<M: NativeModule>(&self) -> Result<Arc<M>, ModuleError> {
        let holder = {
            let modules = self.modules.read();
            let index = modules
                .by_type
                .get(&TypeId::of::<M>())
                .copied()
                .ok_or_else(|| ModuleError::UnknownModule(std::any::type_name::<M>().to_string()))?;
            modules.holders[index].clone()
        };
        holder
            .module()?
            .downcast::<M>()
            .ok_or_else(|| ModuleError::TypeMismatch(holder.name().to_string()))
    }

    /// Add more modules to a live registry. Returns the ids of the new holders.
    ///
    /// A module overriding a live one keeps its id; the replaced instance is
    /// destroyed.
    pub fn extend(&self, builder: ModuleRegistryBuilder) -> Result<Vec<u32>, ModuleError> {
        let mut ids = Vec::with_capacity(builder.len());
        let mut added = Vec::with_capacity(builder.len());
        let mut replaced = Vec::new();
        {
            let mut modules = self.modules.write();
            for holder in &builder.modules.holders {
                modules.check(holder)?;
            }
            for holder in builder.modules.holders {
                added.push(holder.clone());
                let (id, old) = modules.insert(holder)?;
                ids.push(id);
                replaced.extend(old);
            }
        }

        for old in replaced {
            debug!(module = old.name(), "Destroying overridden module");
            old.destroy();
        }
        if self.initializable.load(Ordering::SeqCst) {
            for holder in &added {
                holder.mark_initializable();
            }
        }
        self.create_eager_modules(&added);
        Ok(ids)
    }

    fn holders(&self) -> Vec<Arc<ModuleHolder>> {
        self.modules.read().holders.clone()
    }

    fn create_eager_modules(&self, holders: &[Arc<ModuleHolder>]) {
        for holder in holders {
            if holder.descriptor().needs_eager_init() {
                if let Err(e) = holder.module() {
                    debug!(module = holder.name(), error = %e, "Skipping eager module");
                }
            }
        }
    }

    /// Mark every module initializable, initializing those already created
    pub fn notify_instance_initialized(&self) {
        self.initializable.store(true, Ordering::SeqCst);
        for holder in self.holders() {
            holder.mark_initializable();
        }
    }

    /// Tear down every module. Repeated calls are no-ops per holder.
    pub fn notify_instance_destroyed(&self) {
        for holder in self.holders() {
            holder.destroy();
        }
    }

    /// End-of-batch hook, sent only to created modules that asked for it
    pub fn on_batch_complete(&self) {
        for holder in self.holders() {
            if !holder.descriptor().has_batch_complete() {
                continue;
            }
            if let Some(instance) = holder.instance_if_created() {
                instance.module().on_batch_complete();
            }
        }
    }

    /// Dispatch an async or promise method call coming from script
    pub fn call_method(
        &self,
        token: &RuntimeToken,
        invoker: &Weak<dyn CallbackInvoker>,
        module_id: u32,
        method_id: u32,
        args: ReadableArray,
    ) -> BridgeResult<()> {
        let holder = self
            .holder(module_id)
            .ok_or(ModuleError::UnknownModuleId(module_id))?;
        let ctx = CallContext::new(&args, token, invoker);
        holder.invoke(method_id, &ctx, false).map(|_| ())
    }

    /// Dispatch a synchronous method and return its value
    pub fn call_sync_method(
        &self,
        token: &RuntimeToken,
        invoker: &Weak<dyn CallbackInvoker>,
        module_id: u32,
        method_id: u32,
        args: ReadableArray,
    ) -> BridgeResult<Value> {
        let holder = self
            .holder(module_id)
            .ok_or(ModuleError::UnknownModuleId(module_id))?;
        let ctx = CallContext::new(&args, token, invoker);
        Ok(holder.invoke(method_id, &ctx, true)?.unwrap_or_default())
    }

    /// Render the configuration document sent to a runtime instance.
    ///
    /// With `web_worker` set, only modules that support workers are listed.
    /// Modules declaring constants are created so their constants can be read.
    pub fn module_config(&self, web_worker: bool) -> BridgeResult<Value> {
        let mut config = BTreeMap::new();
        for (module_id, holder) in self.holders().iter().enumerate() {
            let descriptor = holder.descriptor();
            if web_worker && !descriptor.supports_web_workers() {
                continue;
            }

            let mut methods = BTreeMap::new();
            for (method_id, method) in holder.methods()?.iter().enumerate() {
                let mut entry = BTreeMap::new();
                entry.insert("methodID".to_string(), Value::from(method_id as u32));
                entry.insert("type".to_string(), Value::from(method.kind().as_str()));
                methods.insert(method.name().to_string(), Value::Map(entry));
            }

            let mut module = BTreeMap::new();
            module.insert("moduleID".to_string(), Value::from(module_id as u32));
            module.insert("methods".to_string(), Value::Map(methods));
            if descriptor.supports_web_workers() {
                module.insert("supportsWebWorkers".to_string(), Value::Bool(true));
            }
            if descriptor.has_constants() {
                if let Some(constants) = holder.module()?.module().constants() {
                    module.insert("constants".to_string(), constants.into_value());
                }
            }
            config.insert(descriptor.name().to_string(), Value::Map(module));
        }

        let mut document = BTreeMap::new();
        document.insert(REMOTE_MODULE_CONFIG.to_string(), Value::Map(config));
        Ok(Value::Map(document))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::tests::recording;
    use crate::method::MethodTable;
    use crate::value::WritableMap;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Timing {
        batches: AtomicUsize,
    }

    impl NativeModule for Timing {
        fn methods(table: &mut MethodTable<Self>) {
            table.method("createTimer", |_: &Timing, _: i32, _: f64| {});
        }

        fn on_batch_complete(&self) {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct DeviceInfo;

    impl NativeModule for DeviceInfo {
        fn methods(table: &mut MethodTable<Self>) {
            table.method("getScale", |_: &DeviceInfo| 2.0f64);
        }

        fn constants(&self) -> Option<WritableMap> {
            Some(crate::map! { "platform" => "test" })
        }
    }

    struct DeviceInfoV2;

    impl NativeModule for DeviceInfoV2 {}

    struct Tracked {
        destroyed: Arc<AtomicUsize>,
    }

    impl NativeModule for Tracked {
        fn on_instance_destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry() -> NativeModuleRegistry {
        let mut builder = ModuleRegistryBuilder::new();
        builder
            .add(
                ModuleDescriptor::new("Timing").with_batch_complete().web_workers(),
                Timing::default,
            )
            .unwrap()
            .add(ModuleDescriptor::new("DeviceInfo").with_constants(), || DeviceInfo)
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_duplicate_without_override() {
        let mut builder = ModuleRegistryBuilder::new();
        builder.add(ModuleDescriptor::new("DeviceInfo"), || DeviceInfo).unwrap();
        let err = builder
            .add(ModuleDescriptor::new("DeviceInfo"), || DeviceInfoV2)
            .err()
            .unwrap();
        assert_eq!(
            err,
            ModuleError::Duplicate {
                name: "DeviceInfo".to_string()
            }
        );
    }

    #[test]
    fn test_override_keeps_id() {
        let mut builder = ModuleRegistryBuilder::new();
        builder
            .add(ModuleDescriptor::new("Timing"), Timing::default)
            .unwrap()
            .add(ModuleDescriptor::new("DeviceInfo"), || DeviceInfo)
            .unwrap()
            .add(
                ModuleDescriptor::new("DeviceInfo").overrides_existing(),
                || DeviceInfoV2,
            )
            .unwrap();
        let registry = builder.build();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.module_id("DeviceInfo"), Some(1));
        assert!(registry.module::<DeviceInfoV2>().is_ok());
        assert!(registry.module::<DeviceInfo>().is_err());
    }

    #[test]
    fn test_module_config_document() {
        let registry = registry();
        let config = registry.module_config(false).unwrap().to_json().unwrap();
        assert_eq!(
            config,
            json!({
                "remoteModuleConfig": {
                    "Timing": {
                        "moduleID": 0,
                        "methods": {"createTimer": {"methodID": 0, "type": "async"}},
                        "supportsWebWorkers": true,
                    },
                    "DeviceInfo": {
                        "moduleID": 1,
                        "methods": {"getScale": {"methodID": 0, "type": "sync"}},
                        "constants": {"platform": "test"},
                    },
                }
            })
        );
        // constants forced creation of DeviceInfo only
        assert!(registry.holder(1).unwrap().has_instance());
        assert!(!registry.holder(0).unwrap().has_instance());

        let worker = registry.module_config(true).unwrap().to_json().unwrap();
        assert_eq!(
            worker["remoteModuleConfig"].as_object().unwrap().len(),
            1
        );
    }

    #[test]
    fn test_batch_complete_does_not_force_creation() {
        let registry = registry();
        registry.on_batch_complete();
        assert!(!registry.holder(0).unwrap().has_instance());

        let timing = registry.module::<Timing>().unwrap();
        registry.on_batch_complete();
        registry.on_batch_complete();
        assert_eq!(timing.batches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_call_dispatch_errors() {
        let registry = registry();
        let (_recorder, weak) = recording();
        let token = RuntimeToken::new("main");

        let err = registry
            .call_method(&token, &weak, 9, 0, ReadableArray::default())
            .unwrap_err();
        assert!(err.is_caller_caused());

        let err = registry
            .call_method(&token, &weak, 0, 4, ReadableArray::default())
            .unwrap_err();
        assert!(err.to_string().contains("Unknown method id 4"));

        // getScale is sync and refuses the async path
        let err = registry
            .call_method(&token, &weak, 1, 0, ReadableArray::default())
            .unwrap_err();
        assert!(err.to_string().contains("cannot be called on the async path"));

        let scale = registry
            .call_sync_method(&token, &weak, 1, 0, ReadableArray::default())
            .unwrap();
        assert_eq!(scale, Value::Number(2.0));
    }

    #[test]
    fn test_extend_live_registry() {
        let registry = registry();
        registry.notify_instance_initialized();
        let mut more = ModuleRegistryBuilder::new();
        more.add(ModuleDescriptor::new("Extra").eager_init(), || DeviceInfoV2)
            .unwrap();
        let ids = registry.extend(more).unwrap();
        assert_eq!(ids, vec![2]);
        let holder = registry.holder(2).unwrap();
        assert_eq!(holder.state(), crate::module::HolderState::Initialized);

        let mut clash = ModuleRegistryBuilder::new();
        clash.add(ModuleDescriptor::new("Timing"), Timing::default).unwrap();
        assert!(registry.extend(clash).is_err());
    }

    #[test]
    fn test_extend_override_replaces_live_module() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = destroyed.clone();
        let mut builder = ModuleRegistryBuilder::new();
        builder
            .add(ModuleDescriptor::new("Tracked"), move || Tracked {
                destroyed: counter.clone(),
            })
            .unwrap();
        let registry = builder.build();
        registry.notify_instance_initialized();
        let old = registry.holder(0).unwrap();
        old.module().unwrap();

        let mut more = ModuleRegistryBuilder::new();
        more.add(
            ModuleDescriptor::new("Tracked").overrides_existing().eager_init(),
            || DeviceInfoV2,
        )
        .unwrap();
        assert_eq!(registry.extend(more).unwrap(), vec![0]);

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(old.state(), crate::module::HolderState::Destroyed);
        assert!(old.module().is_err());

        let holder = registry.holder(0).unwrap();
        assert!(holder.instance_if_created().is_some());
        assert_eq!(holder.state(), crate::module::HolderState::Initialized);
        assert!(registry.module::<DeviceInfoV2>().is_ok());
        assert!(registry.module::<Tracked>().is_err());

        registry.notify_instance_destroyed();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }
}
