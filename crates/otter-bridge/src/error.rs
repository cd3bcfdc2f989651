//! Error types for otter-bridge
//!
//! Each layer of the bridge owns a small error enum; [`BridgeError`] unifies them
//! for the public entry points. Failures raised by native method bodies travel as
//! [`BridgeError::Native`] and keep their original type for downcasting.

use crate::value::ValueType;
use thiserror::Error;

/// Errors raised while reading or converting tagged values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    /// Value had a different tag than the accessor expected
    #[error("Expected {expected}, got {actual}")]
    UnexpectedType {
        expected: ValueType,
        actual: ValueType,
    },

    /// Array index past the end
    #[error("Index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Map lookup for a missing key
    #[error("No such key: {0}")]
    NoSuchKey(String),

    /// Host value outside the supported type set
    #[error("Unsupported value: {0}")]
    Unsupported(String),
}

impl ValueError {
    pub(crate) fn unexpected(expected: ValueType, actual: ValueType) -> Self {
        Self::UnexpectedType { expected, actual }
    }
}

/// Errors raised while turning an incoming argument array into typed parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgumentError {
    /// Incoming array length differs from the slots the method consumes
    #[error("{method}: expected {expected}, got {actual} arguments")]
    Count {
        method: String,
        expected: usize,
        actual: usize,
    },

    /// A single argument (or slot range) had the wrong type
    #[error("{source} (constructing arguments for {method} at argument index {range})")]
    Type {
        method: String,
        range: String,
        #[source]
        source: ValueError,
    },
}

/// Continuation misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    /// A single-shot callback was invoked a second time
    #[error("Callback {id} was already invoked; a callback may only be invoked once")]
    DoubleInvocation { id: u64 },
}

/// Module lookup and registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// No module registered under this id
    #[error("Unknown native module id {0}")]
    UnknownModuleId(u32),

    /// No module registered under this name
    #[error("Unknown native module '{0}'")]
    UnknownModule(String),

    /// Module exists but has no method with this id
    #[error("Unknown method id {method_id} on module '{module}'")]
    UnknownMethodId { module: String, method_id: u32 },

    /// Two modules registered under one name without override permission
    #[error("Native module '{name}' tried to override an existing module without permission")]
    Duplicate { name: String },

    /// Two methods with the same name in one module
    #[error("Method overloading is unsupported: {module}.{method}")]
    DuplicateMethod { module: String, method: String },

    /// Method declaration violates a marshalling rule
    #[error("Invalid method {module}.{method}: {reason}")]
    InvalidMethod {
        module: String,
        method: String,
        reason: String,
    },

    /// Method kind does not match the call path that reached it
    #[error("{module}.{method} cannot be called on the {expected} path")]
    WrongMethodKind {
        module: String,
        method: String,
        expected: &'static str,
    },

    /// Module was torn down with its bridge
    #[error("Native module '{0}' has been destroyed")]
    Destroyed(String),

    /// Typed lookup asked for a different Rust type than the one registered
    #[error("Native module '{0}' is not of the requested type")]
    TypeMismatch(String),
}

/// Queue thread errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Queue thread could not be spawned
    #[error("Failed to spawn queue thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Queue already quit; the task was not accepted
    #[error("Queue '{0}' has been shut down")]
    ShutDown(String),

    /// Task was accepted but never produced a result
    #[error("Task on queue '{0}' did not complete")]
    TaskDropped(String),

    /// Task panicked on the queue thread
    #[error("Task on queue '{queue}' panicked: {message}")]
    Panicked { queue: String, message: String },
}

/// Failures reported by a script executor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// Script code raised an error
    #[error("Script error: {0}")]
    Evaluation(String),

    /// Callable module function not registered in the runtime
    #[error("Script function {module}.{method} is not registered")]
    UnknownFunction { module: String, method: String },

    /// Callback id not known to the runtime
    #[error("Script callback {0} is not registered")]
    UnknownCallback(u64),

    /// Executor was already torn down
    #[error("Script executor has been destroyed")]
    Destroyed,
}

impl ScriptError {
    /// Create an evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }
}

/// Errors that can occur during bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Error returned by a native method body, unchanged
    #[error(transparent)]
    Native(anyhow::Error),

    /// Configuration document could not be parsed or rendered
    #[error("Invalid bridge configuration: {0}")]
    Config(String),

    /// Lifecycle call made in the wrong state
    #[error("Illegal bridge state: {0}")]
    IllegalState(String),
}

impl BridgeError {
    /// Create an illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Whether the error was caused by the calling script rather than native code.
    ///
    /// Caller-caused errors are recoverable on the script side and never tear
    /// the bridge down by themselves.
    pub fn is_caller_caused(&self) -> bool {
        match self {
            Self::Value(_) | Self::Argument(_) | Self::Script(_) => true,
            Self::Module(err) => matches!(
                err,
                ModuleError::UnknownModuleId(_)
                    | ModuleError::UnknownModule(_)
                    | ModuleError::UnknownMethodId { .. }
                    | ModuleError::WrongMethodKind { .. }
            ),
            _ => false,
        }
    }

    /// Borrow the native method failure, if this is one
    pub fn as_native(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Native(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_error_message() {
        let err = ArgumentError::Count {
            method: "Calculator.add".to_string(),
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "Calculator.add: expected 3, got 2 arguments");
    }

    #[test]
    fn test_type_error_names_range() {
        let err = ArgumentError::Type {
            method: "Net.fetch".to_string(),
            range: "2-3".to_string(),
            source: ValueError::unexpected(ValueType::Number, ValueType::String),
        };
        let text = err.to_string();
        assert!(text.contains("argument index 2-3"));
        assert!(text.contains("Expected Number, got String"));
    }

    #[test]
    fn test_native_error_is_transparent() {
        #[derive(Debug, thiserror::Error)]
        #[error("disk full")]
        struct DiskFull;

        let err = BridgeError::Native(anyhow::Error::new(DiskFull));
        assert_eq!(err.to_string(), "disk full");
        assert!(err.as_native().unwrap().downcast_ref::<DiskFull>().is_some());
        assert!(!err.is_caller_caused());
    }

    #[test]
    fn test_caller_caused_classification() {
        assert!(BridgeError::from(ModuleError::UnknownModuleId(7)).is_caller_caused());
        assert!(!BridgeError::from(CallbackError::DoubleInvocation { id: 1 }).is_caller_caused());
        assert!(!BridgeError::from(ModuleError::Destroyed("Timing".into())).is_caller_caused());
    }
}
