//! Single-thread message queues
//!
//! The bridge runs on three dedicated threads, each draining its own FIFO:
//!
//! ```text
//!   ┌──────────┐   ┌─────────────────┐   ┌──────────┐
//!   │    UI    │   │ Native-Modules  │   │  Script  │
//!   └──────────┘   └─────────────────┘   └──────────┘
//!    teardown        native method         executor
//!    escalation      calls, hooks,         calls, callback
//!                    idle/busy             replies
//! ```
//!
//! Every cross-queue call is a full enqueue. Only construction and teardown use
//! the blocking [`MessageQueueThread::call_on_queue`].

use crate::error::QueueError;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use serde::Deserialize;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, error, info_span, warn};

/// Work item run on a queue thread
pub type QueueTask = Box<dyn FnOnce() + Send + 'static>;

/// Receives panics caught on a queue thread
pub type QueuePanicHandler = Arc<dyn Fn(QueueError) + Send + Sync>;

enum Message {
    Task(QueueTask),
    Quit,
}

/// A named thread executing tasks one at a time in arrival order
pub struct MessageQueueThread {
    name: String,
    sender: Sender<Message>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl MessageQueueThread {
    /// Spawn the queue thread
    pub fn start(
        name: impl Into<String>,
        stack_size: Option<usize>,
        panic_handler: QueuePanicHandler,
    ) -> Result<Arc<Self>, QueueError> {
        let name = name.into();
        let (sender, receiver) = unbounded();

        let mut builder = std::thread::Builder::new().name(name.clone());
        if let Some(stack_size) = stack_size {
            builder = builder.stack_size(stack_size);
        }
        let loop_name = name.clone();
        let handle = builder
            .spawn(move || run_queue(loop_name, receiver, panic_handler))
            .map_err(|source| QueueError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Arc::new(Self {
            name,
            sender,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
            running: AtomicBool::new(true),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enqueue `task`. Returns `false` if the queue has quit.
    pub fn run_on_queue(&self, task: impl FnOnce() + Send + 'static) -> bool {
        if !self.is_running() {
            warn!(queue = %self.name, "Dropping task, queue has been shut down");
            return false;
        }
        self.sender.send(Message::Task(Box::new(task))).is_ok()
    }

    /// Run `f` on the queue and wait for its result.
    ///
    /// Runs inline when called from the queue's own thread.
    pub fn call_on_queue<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_on_thread() {
            return Ok(f());
        }
        let (tx, rx) = bounded(1);
        let accepted = self.run_on_queue(move || {
            let _ = tx.send(f());
        });
        if !accepted {
            return Err(QueueError::ShutDown(self.name.clone()));
        }
        rx.recv()
            .map_err(|_| QueueError::TaskDropped(self.name.clone()))
    }

    pub fn is_on_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Abort unless running on this queue's thread
    #[track_caller]
    pub fn assert_is_on_thread(&self) {
        assert!(
            self.is_on_thread(),
            "Expected to be on queue '{}', but running on thread {:?}",
            self.name,
            std::thread::current().name()
        );
    }

    /// Stop accepting tasks and wait for the thread to exit.
    ///
    /// Tasks already running finish; tasks still queued are dropped. When called
    /// from the queue's own thread the thread exits after the current task.
    pub fn quit_synchronous(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.sender.send(Message::Quit);
        if self.is_on_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!(queue = %self.name, "Queue thread exited by panic");
            }
        }
    }
}

impl std::fmt::Debug for MessageQueueThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueueThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

fn run_queue(name: String, receiver: Receiver<Message>, panic_handler: QueuePanicHandler) {
    let _span = info_span!("queue", name = %name).entered();
    debug!("Queue thread starting");

    while let Ok(message) = receiver.recv() {
        match message {
            Message::Task(task) => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                    let message = panic_message(payload.as_ref());
                    error!(panic = %message, "Task panicked on queue");
                    panic_handler(QueueError::Panicked {
                        queue: name.clone(),
                        message,
                    });
                }
            }
            Message::Quit => break,
        }
    }

    debug!("Queue thread stopped");
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Thread name and optional stack size for one queue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    #[serde(default)]
    pub stack_size: Option<usize>,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
        }
    }
}

/// Specs for the three bridge queues
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfigurationSpec {
    pub ui: QueueSpec,
    pub native_modules: QueueSpec,
    pub script: QueueSpec,
}

impl Default for QueueConfigurationSpec {
    fn default() -> Self {
        Self {
            ui: QueueSpec::new("otter-ui"),
            native_modules: QueueSpec::new("otter-native-modules"),
            script: QueueSpec::new("otter-script"),
        }
    }
}

/// The UI, Native-Modules and Script queues of one bridge
#[derive(Debug)]
pub struct QueueConfiguration {
    ui: Arc<MessageQueueThread>,
    native_modules: Arc<MessageQueueThread>,
    script: Arc<MessageQueueThread>,
}

impl QueueConfiguration {
    pub fn create(
        spec: &QueueConfigurationSpec,
        panic_handler: QueuePanicHandler,
    ) -> Result<Self, QueueError> {
        let ui = MessageQueueThread::start(
            spec.ui.name.clone(),
            spec.ui.stack_size,
            panic_handler.clone(),
        )?;
        let native_modules = MessageQueueThread::start(
            spec.native_modules.name.clone(),
            spec.native_modules.stack_size,
            panic_handler.clone(),
        )?;
        let script = MessageQueueThread::start(
            spec.script.name.clone(),
            spec.script.stack_size,
            panic_handler,
        )?;
        Ok(Self {
            ui,
            native_modules,
            script,
        })
    }

    pub fn ui_queue(&self) -> &Arc<MessageQueueThread> {
        &self.ui
    }

    pub fn native_modules_queue(&self) -> &Arc<MessageQueueThread> {
        &self.native_modules
    }

    pub fn script_queue(&self) -> &Arc<MessageQueueThread> {
        &self.script
    }

    /// Quit all three queues
    pub fn destroy(&self) {
        self.native_modules.quit_synchronous();
        self.script.quit_synchronous();
        self.ui.quit_synchronous();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn silent() -> QueuePanicHandler {
        Arc::new(|_| {})
    }

    #[test]
    fn test_fifo_order() {
        let queue = MessageQueueThread::start("test-fifo", None, silent()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100 {
            let seen = seen.clone();
            assert!(queue.run_on_queue(move || seen.lock().push(i)));
        }
        queue.call_on_queue(|| ()).unwrap();
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
        queue.quit_synchronous();
    }

    #[test]
    fn test_thread_identity() {
        let queue = MessageQueueThread::start("test-identity", None, silent()).unwrap();
        assert!(!queue.is_on_thread());
        let q = queue.clone();
        let on_thread = queue.call_on_queue(move || {
            q.assert_is_on_thread();
            q.is_on_thread()
        });
        assert!(on_thread.unwrap());
        queue.quit_synchronous();
    }

    #[test]
    #[should_panic(expected = "Expected to be on queue 'test-assert'")]
    fn test_assert_off_thread_panics() {
        let queue = MessageQueueThread::start("test-assert", None, silent()).unwrap();
        queue.assert_is_on_thread();
    }

    #[test]
    fn test_call_on_queue_inline_from_own_thread() {
        let queue = MessageQueueThread::start("test-inline", None, silent()).unwrap();
        let q = queue.clone();
        let value = queue
            .call_on_queue(move || q.call_on_queue(|| 7).unwrap())
            .unwrap();
        assert_eq!(value, 7);
        queue.quit_synchronous();
    }

    #[test]
    fn test_panics_go_to_handler() {
        let panics = Arc::new(AtomicUsize::new(0));
        let counter = panics.clone();
        let handler: QueuePanicHandler = Arc::new(move |err| {
            assert!(matches!(err, QueueError::Panicked { .. }));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let queue = MessageQueueThread::start("test-panic", None, handler).unwrap();
        queue.run_on_queue(|| panic!("boom"));
        let result = queue.call_on_queue(|| -> i32 { panic!("again") });
        assert!(matches!(result, Err(QueueError::TaskDropped(_))));
        assert_eq!(queue.call_on_queue(|| 1).unwrap(), 1);
        assert_eq!(panics.load(Ordering::SeqCst), 2);
        queue.quit_synchronous();
    }

    #[test]
    fn test_quit_rejects_new_tasks() {
        let queue = MessageQueueThread::start("test-quit", None, silent()).unwrap();
        queue.quit_synchronous();
        queue.quit_synchronous();
        assert!(!queue.run_on_queue(|| {}));
        assert!(matches!(
            queue.call_on_queue(|| 1),
            Err(QueueError::ShutDown(_))
        ));
    }

    #[test]
    fn test_configuration_names() {
        let config = QueueConfiguration::create(&QueueConfigurationSpec::default(), silent()).unwrap();
        let name = config
            .script_queue()
            .call_on_queue(|| std::thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("otter-script"));
        config.destroy();
        assert!(!config.ui_queue().is_running());
    }
}
