//! Serialized task queue with busy/done backpressure signals
//!
//! Tasks run one at a time, strictly in the order they were scheduled. A
//! drain session starts when the first task lands on an idle queue and ends
//! when the queue is empty again. Within a session:
//! - `Busy` fires at most once, either when the session has been running
//!   for `busy_delay` or as soon as `busy_depth` tasks are waiting
//! - `Done` fires exactly once, when the last task has finished
//!
//! A task that fails or panics is logged and the queue moves on.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default time a session may run before it is reported busy
pub const DEFAULT_BUSY_DELAY: Duration = Duration::from_secs(2);

/// Default number of waiting tasks that reports busy immediately
pub const DEFAULT_BUSY_DEPTH: usize = 4;

/// A scheduled unit of work
pub type Task = BoxFuture<'static, anyhow::Result<()>>;

/// Backpressure signal emitted by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSignal {
    /// The current session is long or deep
    Busy,
    /// The queue drained to empty
    Done,
}

/// Busy thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub busy_delay: Duration,
    pub busy_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            busy_delay: DEFAULT_BUSY_DELAY,
            busy_depth: DEFAULT_BUSY_DEPTH,
        }
    }
}

struct State {
    /// Waiting tasks; the running task is not in here
    tasks: VecDeque<Task>,
    draining: bool,
    busy_signaled: bool,
    /// Incremented per drain session so stale busy timers are ignored
    session: u64,
    busy_timer: Option<JoinHandle<()>>,
}

struct Inner {
    config: QueueConfig,
    state: Mutex<State>,
    signals: broadcast::Sender<QueueSignal>,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// FIFO task queue drained by a single loop
///
/// Cloning is cheap; clones schedule onto the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (signals, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State {
                    tasks: VecDeque::new(),
                    draining: false,
                    busy_signaled: false,
                    session: 0,
                    busy_timer: None,
                }),
                signals,
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Receive busy/done signals emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<QueueSignal> {
        self.inner.signals.subscribe()
    }

    /// Append a task; starts a drain session if the queue is idle
    ///
    /// Safe to call at any time, including from inside a running task.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        state.tasks.push_back(task.boxed());

        if !state.draining {
            state.draining = true;
            state.busy_signaled = false;
            state.session += 1;
            let session = state.session;
            debug!("task queue session {} started", session);

            state.busy_timer = Some(tokio::spawn(busy_timer(self.inner.clone(), session)));

            // The head starts right away; only the rest counts as waiting
            if let Some(first) = state.tasks.pop_front() {
                tokio::spawn(drain(self.inner.clone(), first));
            }
        }

        if state.tasks.len() >= self.inner.config.busy_depth {
            self.inner.signal_busy(&mut state);
        }
    }

    /// Number of waiting tasks (excluding the one running)
    pub fn len(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.inner.state.lock().draining
    }

    /// Tasks that finished successfully
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Tasks that returned an error or panicked
    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Wait until the current session (if any) has drained
    pub async fn wait_idle(&self) {
        let mut signals = self.subscribe();
        if !self.is_draining() {
            return;
        }
        loop {
            match signals.recv().await {
                Ok(QueueSignal::Done) | Err(broadcast::error::RecvError::Closed) => return,
                Ok(QueueSignal::Busy) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if !self.is_draining() {
                        return;
                    }
                }
            }
        }
    }
}

impl Inner {
    fn signal_busy(&self, state: &mut State) {
        if state.draining && !state.busy_signaled {
            state.busy_signaled = true;
            debug!(
                "task queue busy ({} waiting, session {})",
                state.tasks.len(),
                state.session
            );
            let _ = self.signals.send(QueueSignal::Busy);
        }
    }

    async fn run_one(&self, task: Task) {
        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(())) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!("queued task failed: {:#}", e);
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!("queued task panicked");
            }
        }
    }
}

async fn busy_timer(inner: Arc<Inner>, session: u64) {
    tokio::time::sleep(inner.config.busy_delay).await;
    let mut state = inner.state.lock();
    if state.session == session {
        inner.signal_busy(&mut state);
    }
}

async fn drain(inner: Arc<Inner>, first: Task) {
    let mut next = Some(first);
    while let Some(task) = next {
        inner.run_one(task).await;

        let mut state = inner.state.lock();
        next = state.tasks.pop_front();
        if next.is_none() {
            state.draining = false;
            state.busy_signaled = false;
            if let Some(timer) = state.busy_timer.take() {
                timer.abort();
            }
            debug!("task queue session {} drained", state.session);
            // Emitted under the lock so a new session's Busy cannot overtake it
            let _ = inner.signals.send(QueueSignal::Done);
        }
    }
}
