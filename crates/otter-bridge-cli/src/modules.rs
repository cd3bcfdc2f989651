//! Sample native modules exposed to demo bundles.

use otter_bridge::prelude::*;
use otter_bridge::{ModuleError, ModuleRegistryBuilder};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

/// Prints messages from script
#[derive(Default)]
pub struct Logger;

impl NativeModule for Logger {
    fn methods(table: &mut MethodTable<Self>) {
        table
            .method("log", |_: &Logger, message: String| {
                println!("{message}");
            })
            .method("warn", |_: &Logger, message: String| {
                eprintln!("warning: {message}");
            });
    }
}

/// Static facts about the host
#[derive(Default)]
pub struct DeviceInfo;

impl NativeModule for DeviceInfo {
    fn methods(table: &mut MethodTable<Self>) {
        table
            .method("getName", |_: &DeviceInfo, reply: Callback| {
                reply.invoke(array![format!("otter-{}", std::env::consts::OS)])
            })
            .method("pixelRatio", |_: &DeviceInfo| 2.0_f64);
    }

    fn constants(&self) -> Option<WritableMap> {
        Some(map! {
            "os" => std::env::consts::OS,
            "arch" => std::env::consts::ARCH,
            "bridgeVersion" => env!("CARGO_PKG_VERSION"),
        })
    }
}

/// In-memory key/value store
#[derive(Default)]
pub struct Storage {
    items: Mutex<HashMap<String, String>>,
    writes: Mutex<usize>,
}

impl NativeModule for Storage {
    fn methods(table: &mut MethodTable<Self>) {
        table
            .method("setItem", |s: &Storage, key: String, value: String| {
                s.items.lock().insert(key, value);
                *s.writes.lock() += 1;
            })
            .method("getItem", |s: &Storage, key: String, promise: Promise| {
                match s.items.lock().get(&key) {
                    Some(value) => promise.resolve(value.as_str()),
                    None => promise.reject_with_message("E_NOT_FOUND", &format!("no item '{key}'")),
                }
            })
            .method("removeItem", |s: &Storage, key: String| {
                s.items.lock().remove(&key);
            });
    }

    fn on_batch_complete(&self) {
        let mut writes = self.writes.lock();
        if *writes > 0 {
            info!(writes = *writes, "Storage flushed");
            *writes = 0;
        }
    }

    fn on_instance_destroy(&self) {
        info!(items = self.items.lock().len(), "Storage closed");
    }
}

/// Registrations for every sample module
pub fn demo_modules() -> Result<ModuleRegistryBuilder, ModuleError> {
    let mut modules = NativeModuleRegistry::builder();
    modules
        .add(ModuleDescriptor::new("Logger").web_workers(), Logger::default)?
        .add(
            ModuleDescriptor::new("DeviceInfo").with_constants().eager_init(),
            DeviceInfo::default,
        )?
        .add(
            ModuleDescriptor::new("Storage").with_batch_complete(),
            Storage::default,
        )?;
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_module_config() {
        let registry = demo_modules().unwrap().build();
        let config = registry.module_config(false).unwrap().to_json().unwrap();
        let modules = &config["remoteModuleConfig"];

        assert_eq!(modules["Logger"]["moduleID"], 0);
        assert_eq!(modules["Logger"]["supportsWebWorkers"], true);
        assert_eq!(modules["DeviceInfo"]["methods"]["pixelRatio"]["type"], "sync");
        assert_eq!(modules["Storage"]["methods"]["getItem"]["type"], "promise");
        assert_eq!(modules["DeviceInfo"]["constants"]["os"], std::env::consts::OS);
    }

    #[test]
    fn test_worker_config_lists_logger_only() {
        let registry = demo_modules().unwrap().build();
        let config = registry.module_config(true).unwrap().to_json().unwrap();
        let modules = config["remoteModuleConfig"].as_object().unwrap();
        assert_eq!(modules.keys().collect::<Vec<_>>(), vec!["Logger"]);
    }
}
