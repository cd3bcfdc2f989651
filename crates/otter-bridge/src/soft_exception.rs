//! Soft exceptions
//!
//! Recoverable invariant violations that should be visible in development but
//! must not take the bridge down, e.g. a pending-call counter decremented below
//! zero. They go to a process-wide logger that defaults to `tracing::warn!`.

use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// A reported soft exception
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftException {
    pub category: String,
    pub message: String,
}

type SoftExceptionLogger = dyn Fn(&SoftException) + Send + Sync + 'static;

static SOFT_EXCEPTION_LOGGER: OnceLock<Mutex<Arc<SoftExceptionLogger>>> = OnceLock::new();

fn logger() -> &'static Mutex<Arc<SoftExceptionLogger>> {
    SOFT_EXCEPTION_LOGGER.get_or_init(|| Mutex::new(Arc::new(default_soft_exception_logger)))
}

fn default_soft_exception_logger(exception: &SoftException) {
    warn!(target: "otter", category = %exception.category, "{}", exception.message);
}

/// Replace the process-wide logger
pub fn set_soft_exception_logger(handler: impl Fn(&SoftException) + Send + Sync + 'static) {
    *logger().lock() = Arc::new(handler);
}

/// Restore the default `tracing` logger
pub fn reset_soft_exception_logger() {
    *logger().lock() = Arc::new(default_soft_exception_logger);
}

pub fn report(category: &str, message: impl Into<String>) {
    let exception = SoftException {
        category: category.to_string(),
        message: message.into(),
    };
    // Clone out so a logger may itself report without deadlocking.
    let handler = logger().lock().clone();
    handler(&exception);
}
