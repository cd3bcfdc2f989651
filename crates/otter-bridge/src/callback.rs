//! Single-shot callbacks handed to native methods
//!
//! A callback is a reply slot owned by script code. Native code may invoke it
//! exactly once; the reply is routed to the runtime instance that made the call.

use crate::error::CallbackError;
use crate::token::RuntimeToken;
use crate::value::WritableArray;
use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Delivers callback replies to a script runtime instance
pub trait CallbackInvoker: Send + Sync {
    /// Queue "invoke callback `callback_id` with `args`" for the instance behind `token`
    fn invoke_callback(&self, token: &RuntimeToken, callback_id: u64, args: WritableArray);
}

/// A reply slot that may be invoked once
pub struct Callback {
    token: RuntimeToken,
    id: u64,
    invoked: AtomicBool,
    invoker: Weak<dyn CallbackInvoker>,
}

impl Callback {
    pub fn new(token: RuntimeToken, id: u64, invoker: Weak<dyn CallbackInvoker>) -> Self {
        Self {
            token,
            id,
            invoked: AtomicBool::new(false),
            invoker,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &RuntimeToken {
        &self.token
    }

    pub fn is_invoked(&self) -> bool {
        self.invoked.load(Ordering::Acquire)
    }

    /// Send `args` back to script.
    ///
    /// Fails with [`CallbackError::DoubleInvocation`] on every call after the
    /// first. If the bridge is already gone the reply is dropped with a warning.
    pub fn invoke(&self, args: WritableArray) -> Result<(), CallbackError> {
        if self.invoked.swap(true, Ordering::AcqRel) {
            return Err(CallbackError::DoubleInvocation { id: self.id });
        }
        match self.invoker.upgrade() {
            Some(invoker) => invoker.invoke_callback(&self.token, self.id, args),
            None => warn!(
                callback_id = self.id,
                token = ?self.token,
                "Dropping callback reply, bridge is gone"
            ),
        }
        Ok(())
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("token", &self.token)
            .field("id", &self.id)
            .field("invoked", &self.is_invoked())
            .finish()
    }
}
