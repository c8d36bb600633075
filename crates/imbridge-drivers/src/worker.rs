//! Dedicated background execution context for a driver.
//!
//! Each driver owns one [`Worker`]: a named OS thread running a
//! single-threaded tokio runtime. Callers talk to it through a command
//! channel; every command carries a [`Reply`] slot that the caller waits on
//! with a bounded timeout. Stopping is cooperative through a
//! [`CancellationToken`], with a bounded join after which the thread is
//! detached.

use crate::error::DriverError;
use crate::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Grace given to tasks still alive on the worker's runtime at exit.
const RUNTIME_GRACE: Duration = Duration::from_millis(500);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// What the worker body receives.
pub struct WorkerContext<C> {
    /// Commands sent through [`WorkerHandle::call`] or [`WorkerHandle::send`].
    pub commands: mpsc::UnboundedReceiver<C>,

    /// Cancelled when the worker is asked to stop.
    pub cancel: CancellationToken,
}

/// One-shot reply slot attached to a command.
#[derive(Debug)]
pub struct Reply<R>(std_mpsc::SyncSender<R>);

impl<R> Reply<R> {
    /// Answer the caller. A caller that already timed out is ignored.
    pub fn send(self, value: R) {
        let _ = self.0.try_send(value);
    }
}

/// Cloneable sending side of a worker's command channel.
#[derive(Debug)]
pub struct WorkerHandle<C> {
    commands: mpsc::UnboundedSender<C>,
}

impl<C> Clone for WorkerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<C> WorkerHandle<C> {
    /// Send a command and block until it is answered or `timeout` elapses.
    ///
    /// Must not be called from inside the worker itself.
    pub fn call<R>(&self, make: impl FnOnce(Reply<R>) -> C, timeout: Duration) -> Result<R> {
        let (tx, rx) = std_mpsc::sync_channel(1);
        self.commands
            .send(make(Reply(tx)))
            .map_err(|_| DriverError::WorkerGone)?;

        match rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(DriverError::Timeout),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(DriverError::WorkerGone),
        }
    }

    /// Fire-and-forget command.
    pub fn send(&self, command: C) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| DriverError::WorkerGone)
    }
}

/// Signals the owner when the worker thread ends, including on panic.
struct ExitGuard(std_mpsc::Sender<()>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// A running worker thread.
pub struct Worker<C> {
    id: u64,
    name: String,
    handle: WorkerHandle<C>,
    cancel: CancellationToken,
    exited: std_mpsc::Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl<C> std::fmt::Debug for Worker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<C: Send + 'static> Worker<C> {
    /// Start a worker thread running `body` to completion.
    pub fn spawn<F, Fut>(name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(WorkerContext<C>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let name = name.into();
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (exited_tx, exited_rx) = std_mpsc::channel();
        let cancel = CancellationToken::new();

        let ctx = WorkerContext {
            commands: commands_rx,
            cancel: cancel.clone(),
        };
        let thread_name = name.clone();

        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            let _exit = ExitGuard(exited_tx);
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Worker {} failed to build runtime: {}", thread_name, e);
                    return;
                }
            };

            runtime.block_on(body(ctx));
            runtime.shutdown_timeout(RUNTIME_GRACE);
            debug!("Worker {} exited", thread_name);
        })?;

        debug!("Spawned worker {} (#{})", name, id);

        Ok(Self {
            id,
            name,
            handle: WorkerHandle {
                commands: commands_tx,
            },
            cancel,
            exited: exited_rx,
            thread: Some(thread),
        })
    }
}

impl<C> Worker<C> {
    /// Process-unique worker number.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command handle for this worker.
    pub fn handle(&self) -> WorkerHandle<C> {
        self.handle.clone()
    }

    /// Cancellation token observed by the worker body.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the thread has ended.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Cancel the worker and wait up to `timeout` for it to end.
    ///
    /// Returns `false` if the thread was still running at the deadline, in
    /// which case it is detached.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.cancel.cancel();

        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        warn!("Worker {} panicked", self.name);
                    }
                }
                true
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    "Worker {} did not stop within {:?}, detaching",
                    self.name, timeout
                );
                self.thread.take();
                false
            }
        }
    }
}

impl<C> Drop for Worker<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Outcome of waiting for a worker to report startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The worker reported success.
    Ready,
    /// The worker reported a startup error.
    Failed(String),
    /// Nothing was reported in time.
    TimedOut,
    /// The worker ended without reporting.
    Gone,
}

/// Worker side of the startup signal. The first report wins.
#[derive(Debug, Clone)]
pub struct ReadySignal(std_mpsc::SyncSender<std::result::Result<(), String>>);

impl ReadySignal {
    pub fn ready(&self) {
        let _ = self.0.try_send(Ok(()));
    }

    pub fn failed(&self, reason: impl Into<String>) {
        let _ = self.0.try_send(Err(reason.into()));
    }
}

/// Caller side of the startup signal.
#[derive(Debug)]
pub struct ReadyWait(std_mpsc::Receiver<std::result::Result<(), String>>);

impl ReadyWait {
    /// Block until the worker reports, ends, or `timeout` elapses.
    pub fn wait(self, timeout: Duration) -> Readiness {
        match self.0.recv_timeout(timeout) {
            Ok(Ok(())) => Readiness::Ready,
            Ok(Err(reason)) => Readiness::Failed(reason),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Readiness::TimedOut,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Readiness::Gone,
        }
    }
}

/// Create a startup signal pair.
pub fn readiness() -> (ReadySignal, ReadyWait) {
    let (tx, rx) = std_mpsc::sync_channel(1);
    (ReadySignal(tx), ReadyWait(rx))
}
