//! Runtime-instance tokens
//!
//! A bridge may host more than one script execution context (the main runtime and
//! any workers). Every reply and every outbound call carries the token of the
//! context it belongs to.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

struct TokenInner {
    id: u64,
    label: String,
}

/// Identity of one script execution context
#[derive(Clone)]
pub struct RuntimeToken {
    inner: Arc<TokenInner>,
}

impl RuntimeToken {
    /// Create a token with a fresh process-unique id
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn downgrade(&self) -> WeakRuntimeToken {
        WeakRuntimeToken {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for RuntimeToken {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for RuntimeToken {}

impl Hash for RuntimeToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for RuntimeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeToken({}#{})", self.inner.label, self.inner.id)
    }
}

/// Non-owning token reference; dead once every [`RuntimeToken`] clone is dropped
#[derive(Clone)]
pub struct WeakRuntimeToken {
    id: u64,
    inner: Weak<TokenInner>,
}

impl WeakRuntimeToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn upgrade(&self) -> Option<RuntimeToken> {
        self.inner.upgrade().map(|inner| RuntimeToken { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakRuntimeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakRuntimeToken(#{}, alive: {})", self.id, self.is_alive())
    }
}
