//! Native modules: the units of functionality script code can call
//!
//! A module is any `Send + Sync` type implementing [`NativeModule`]. It is
//! registered with a [`ModuleDescriptor`] and a provider closure; the
//! [`ModuleHolder`] creates it lazily and drives its lifecycle.

mod holder;
mod registry;

pub use holder::{HolderState, ModuleHolder, ModuleInstance};
pub use registry::{ModuleRegistryBuilder, NativeModuleRegistry, REMOTE_MODULE_CONFIG};

use crate::method::MethodTable;
use crate::value::WritableMap;

/// A native module callable from script code
pub trait NativeModule: Send + Sync + 'static {
    /// Declare the methods exposed to script. Method ids follow declaration order.
    fn methods(_table: &mut MethodTable<Self>)
    where
        Self: Sized,
    {
    }

    /// Runs once after the bridge marks modules initializable
    fn initialize(&self) {}

    /// Runs once when the bridge is torn down
    fn on_instance_destroy(&self) {}

    /// Runs at the end of every script batch that made native calls.
    /// Only dispatched when the descriptor declares the capability.
    fn on_batch_complete(&self) {}

    /// Constants exported in the module configuration document.
    /// Only queried when the descriptor declares them.
    fn constants(&self) -> Option<WritableMap> {
        None
    }
}

/// Immutable registration metadata for one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    name: String,
    can_override_existing: bool,
    has_constants: bool,
    needs_eager_init: bool,
    has_batch_complete: bool,
    supports_web_workers: bool,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            can_override_existing: false,
            has_constants: false,
            needs_eager_init: false,
            has_batch_complete: false,
            supports_web_workers: false,
        }
    }

    /// Allow this module to replace an earlier one with the same name
    pub fn overrides_existing(mut self) -> Self {
        self.can_override_existing = true;
        self
    }

    pub fn with_constants(mut self) -> Self {
        self.has_constants = true;
        self
    }

    /// Create the module when the registry is built instead of on first use
    pub fn eager_init(mut self) -> Self {
        self.needs_eager_init = true;
        self
    }

    pub fn with_batch_complete(mut self) -> Self {
        self.has_batch_complete = true;
        self
    }

    /// Expose the module to worker runtime instances
    pub fn web_workers(mut self) -> Self {
        self.supports_web_workers = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_override_existing(&self) -> bool {
        self.can_override_existing
    }

    pub fn has_constants(&self) -> bool {
        self.has_constants
    }

    pub fn needs_eager_init(&self) -> bool {
        self.needs_eager_init
    }

    pub fn has_batch_complete(&self) -> bool {
        self.has_batch_complete
    }

    pub fn supports_web_workers(&self) -> bool {
        self.supports_web_workers
    }
}
