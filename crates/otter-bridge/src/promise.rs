//! Two-sided continuation for promise-returning native methods
//!
//! A promise wraps the resolve/reject callback pair passed by script code. It
//! settles at most once: whichever of `resolve` or `reject` runs first wins and
//! every later attempt is silently ignored. Plain [`Callback`]s, in contrast,
//! fail on a second invocation.

use crate::callback::Callback;
use crate::value::{Value, WritableArray, WritableMap};
use parking_lot::Mutex;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::path::Path;
use tracing::warn;

/// Error code used when the rejecting code supplies none
pub const DEFAULT_ERROR_CODE: &str = "EUNSPECIFIED";
/// Message used when neither a message nor a cause is supplied
pub const DEFAULT_ERROR_MESSAGE: &str = "Error not specified.";
/// Upper bound on captured native stack frames
pub const MAX_STACK_FRAMES: usize = 50;

#[derive(Default)]
struct Settlers {
    resolve: Option<Callback>,
    reject: Option<Callback>,
}

/// Resolve/reject pair for one promise
pub struct Promise {
    settlers: Mutex<Settlers>,
}

impl Promise {
    pub fn new(resolve: Option<Callback>, reject: Option<Callback>) -> Self {
        Self {
            settlers: Mutex::new(Settlers { resolve, reject }),
        }
    }

    /// Whether resolve or reject already ran
    pub fn is_settled(&self) -> bool {
        let settlers = self.settlers.lock();
        settlers.resolve.is_none() && settlers.reject.is_none()
    }

    fn take(&self) -> Settlers {
        std::mem::take(&mut *self.settlers.lock())
    }

    /// Resolve with `value`; no-op once settled
    pub fn resolve(&self, value: impl Into<Value>) {
        let Some(resolve) = self.take().resolve else {
            return;
        };
        let mut args = WritableArray::new();
        args.push(value);
        if let Err(e) = resolve.invoke(args) {
            warn!(error = %e, "Promise resolve callback rejected the reply");
        }
    }

    /// Reject with a structured error; no-op once settled.
    ///
    /// The error map carries `code`, `message`, `userInfo` (null when absent) and
    /// `nativeStack`. `nativeStack` is empty without a cause; with one it is the
    /// backtrace of the thread calling `reject`, captured at that point, not the
    /// cause's own. A `&dyn Error` exposes no backtrace on stable Rust.
    pub fn reject(
        &self,
        code: Option<&str>,
        message: Option<&str>,
        cause: Option<&(dyn Error + 'static)>,
        user_info: Option<WritableMap>,
    ) {
        let Some(reject) = self.take().reject else {
            return;
        };
        let error = error_map(code, message, cause, user_info);
        let mut args = WritableArray::with_capacity(1);
        args.push_map(error);
        if let Err(e) = reject.invoke(args) {
            warn!(error = %e, "Promise reject callback rejected the reply");
        }
    }

    pub fn reject_with_message(&self, code: &str, message: &str) {
        self.reject(Some(code), Some(message), None, None);
    }

    /// Reject with `cause`'s message. See [`Promise::reject`] for `nativeStack`.
    pub fn reject_with_error(&self, code: &str, cause: &(dyn Error + 'static)) {
        self.reject(Some(code), None, Some(cause), None);
    }

    pub fn reject_with_user_info(&self, code: &str, message: &str, user_info: WritableMap) {
        self.reject(Some(code), Some(message), None, Some(user_info));
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Build the rejection payload sent to script. With a cause, `nativeStack` is
/// the calling thread's backtrace.
pub fn error_map(
    code: Option<&str>,
    message: Option<&str>,
    cause: Option<&(dyn Error + 'static)>,
    user_info: Option<WritableMap>,
) -> WritableMap {
    let mut map = WritableMap::new();
    map.put_string("code", code.unwrap_or(DEFAULT_ERROR_CODE));

    let message = match (message, cause) {
        (Some(message), _) => message.to_string(),
        (None, Some(cause)) => cause.to_string(),
        (None, None) => DEFAULT_ERROR_MESSAGE.to_string(),
    };
    map.put_string("message", message);

    match user_info {
        Some(user_info) => map.put_map("userInfo", user_info),
        None => map.put_null("userInfo"),
    }

    let stack = match cause {
        Some(_) => capture_native_stack(),
        None => WritableArray::new(),
    };
    map.put_array("nativeStack", stack);
    map
}

/// Frames of the current thread, innermost first
fn capture_native_stack() -> WritableArray {
    let backtrace = Backtrace::force_capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return WritableArray::new();
    }
    parse_backtrace(&backtrace.to_string())
        .into_iter()
        .take(MAX_STACK_FRAMES)
        .map(StackFrame::into_value)
        .collect()
}

#[derive(Debug, Default, PartialEq)]
struct StackFrame {
    class: String,
    method: String,
    file: Option<String>,
    line: Option<u32>,
}

impl StackFrame {
    fn from_symbol(symbol: &str) -> Self {
        let (class, method) = match symbol.rsplit_once("::") {
            Some((class, method)) => (class.to_string(), method.to_string()),
            None => (String::new(), symbol.to_string()),
        };
        Self {
            class,
            method,
            ..Self::default()
        }
    }

    fn set_location(&mut self, location: &str) {
        // "<path>:<line>:<column>"
        let mut parts = location.rsplitn(3, ':');
        let _column = parts.next();
        let line = parts.next().and_then(|l| l.parse().ok());
        if let Some(path) = parts.next() {
            self.file = Path::new(path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            self.line = line;
        }
    }

    fn into_value(self) -> Value {
        let mut frame = WritableMap::new();
        frame.put_string("class", self.class);
        frame.put_string("methodName", self.method);
        frame.put("file", self.file);
        frame.put("lineNumber", self.line);
        frame.into_value()
    }
}

/// Parse the `Display` form of a std backtrace into frames
fn parse_backtrace(text: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                frame.set_location(location);
            }
            continue;
        }
        if let Some((index, symbol)) = trimmed.split_once(": ") {
            if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
                frames.push(StackFrame::from_symbol(symbol.trim()));
            }
        }
    }
    frames
}
