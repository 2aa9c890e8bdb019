//! Forked execution inside another process's namespaces
//!
//! Each call forks the current process. The child joins the target
//! namespaces, runs the caller's closure, writes one [`protocol`] message to
//! a pipe and exits with `_exit`. The parent reads that message on a blocking
//! task and races it against the deadline.
//!
//! Only the forking thread exists in the child. The child therefore never
//! touches tokio, never logs and never returns into the caller's stack; it
//! uses [`crate::raw`] for its own I/O. The closure itself must not depend on
//! threads or runtimes of the parent either.

#![allow(unsafe_code)]

use crate::{
    config::{ExecutorConfig, DEFAULT_KILL_SIGNAL},
    namespace::{NamespaceHandles, NamespaceRef},
    pipe::{ChildEnd, ParentEnd, ResultPipe},
    protocol, raw, switcher, NsForkError, Result,
};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag};
use nix::unistd::{fork, ForkResult, Pid};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::{self, Display};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Correlates the log lines of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

impl CallId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", std::process::id(), self.0)
    }
}

/// Runs closures in forked children
#[derive(Debug, Clone)]
pub struct ForkExecutor {
    config: ExecutorConfig,
    signal: Signal,
}

impl Default for ForkExecutor {
    fn default() -> Self {
        Self {
            config: ExecutorConfig::default(),
            signal: DEFAULT_KILL_SIGNAL,
        }
    }
}

impl ForkExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        let signal = config.signal()?;
        Ok(Self { config, signal })
    }

    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `logic` inside the network and mount namespaces of `ns`.
    ///
    /// Returns the closure's value, its error as [`NsForkError::Logic`], or
    /// the failure of the machinery around it. `timeout` counts from the
    /// start of the call; when it expires the child is signalled and any
    /// later response is discarded.
    pub async fn run_in_namespace<T, E, F>(
        &self,
        ns: &NamespaceRef,
        timeout: Duration,
        logic: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let call_id = CallId::next();
        let span = tracing::info_span!("ns_call", %call_id, ns = %ns.dir().display());
        let deadline = Instant::now() + timeout;

        let started = span.in_scope(|| -> Result<_> {
            info!(?timeout, "entering namespace");
            let handles = ns.resolve()?;
            spawn_child(Some(&handles), logic)
        });

        let (child, end) = match started {
            Ok(started) => started,
            Err(e) => {
                span.in_scope(|| warn!(error = %e, "namespace call setup failed"));
                return Err(e);
            }
        };
        self.await_child(child, end, deadline, timeout)
            .instrument(span)
            .await
    }

    /// Run `logic` in a forked child without switching namespaces.
    pub async fn run_forked<T, E, F>(&self, timeout: Duration, logic: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let call_id = CallId::next();
        let span = tracing::info_span!("ns_call", %call_id, ns = "host");
        let deadline = Instant::now() + timeout;

        let (child, end) = span.in_scope(|| spawn_child(None, logic))?;
        self.await_child(child, end, deadline, timeout)
            .instrument(span)
            .await
    }

    async fn await_child<T: DeserializeOwned>(
        &self,
        child: Pid,
        end: ParentEnd,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        let initial = self.config.initial_buffer_size;
        let reap = self.config.reap_children;
        let slot = Arc::new(ChildSlot::new(child));
        let reader_slot = Arc::clone(&slot);
        let span = tracing::Span::current();

        tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            let message = end.read_message(initial);
            drop(end);
            // After a timeout nobody is listening and the message is dropped
            let _ = tx.send(message);
            if reap {
                reader_slot.reap();
            }
        });

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(message)) => {
                let message = message?;
                debug!(pid = %child, bytes = message.len(), "received namespace response");
                let outcome = protocol::decode(&message);
                match &outcome {
                    Ok(_) => info!(pid = %child, "exiting namespace"),
                    Err(e) => info!(pid = %child, error = %e, "namespace call failed"),
                }
                outcome
            }
            Ok(Err(_)) => Err(NsForkError::ReaderLost),
            Err(_) => {
                warn!(pid = %child, ?timeout, signal = %self.signal, "namespace call timed out");
                match slot.signal(self.signal) {
                    Ok(true) => {}
                    Ok(false) => debug!(pid = %child, "namespace child already reaped"),
                    Err(e) => warn!(pid = %child, error = %e, "failed to signal namespace child"),
                }
                Err(NsForkError::Timeout(timeout))
            }
        }
    }
}

/// Create the pipe and fork. Returns only in the parent.
fn spawn_child<T, E, F>(target: Option<&NamespaceHandles>, logic: F) -> Result<(Pid, ParentEnd)>
where
    T: Serialize,
    E: Display,
    F: FnOnce() -> std::result::Result<T, E>,
{
    let pipe = ResultPipe::new()?;

    // SAFETY: the child restricts itself to raw syscalls, the caller's logic
    // and serialization, then leaves through _exit
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!(pid = %child, "forked namespace child");
            Ok((child, pipe.into_parent()))
        }
        Ok(ForkResult::Child) => child_main(pipe.into_child(), target, logic),
        Err(e) => Err(NsForkError::Fork(e)),
    }
}

fn child_main<T, E, F>(end: ChildEnd, target: Option<&NamespaceHandles>, logic: F) -> !
where
    T: Serialize,
    E: Display,
    F: FnOnce() -> std::result::Result<T, E>,
{
    let switched = target.map_or(Ok(()), |h| switcher::switch(h.mount(), h.net()));

    let message = match switched {
        Ok(()) => match catch_unwind(AssertUnwindSafe(logic)) {
            Ok(outcome) => protocol::encode(&outcome),
            Err(panic) => protocol::encode_err(&format!(
                "namespace logic panicked: {}",
                panic_message(panic.as_ref())
            )),
        },
        Err(e) => protocol::encode_err(&e),
    };

    end.send(&message);
    raw::exit_immediately(0)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// A forked child shared by the reader and the timeout path.
///
/// Signalling and reaping happen under one lock, so a signal never reaches
/// a pid that was reaped and possibly handed to another process.
#[derive(Debug)]
struct ChildSlot {
    pid: Pid,
    reaped: Mutex<bool>,
}

impl ChildSlot {
    const fn new(pid: Pid) -> Self {
        Self {
            pid,
            reaped: Mutex::new(false),
        }
    }

    /// Send `signal` unless the child is already reaped. Returns whether it
    /// was sent.
    fn signal(&self, signal: Signal) -> nix::Result<bool> {
        let reaped = self.reaped.lock();
        if *reaped {
            return Ok(false);
        }
        kill(self.pid, signal).map(|()| true)
    }

    /// Wait for the child to exit, then reap it.
    ///
    /// The wait itself happens outside the lock and leaves the child a
    /// zombie, which keeps its pid reserved until the lock is taken.
    fn reap(&self) {
        if let Err(e) = wait_exited(self.pid) {
            debug!(pid = %self.pid, error = %e, "could not wait for namespace child");
            return;
        }

        let mut reaped = self.reaped.lock();
        match waitpid(self.pid, None) {
            Ok(status) => debug!(pid = %self.pid, ?status, "reaped namespace child"),
            Err(e) => debug!(pid = %self.pid, error = %e, "could not reap namespace child"),
        }
        *reaped = true;
    }
}

fn wait_exited(pid: Pid) -> nix::Result<()> {
    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Err(Errno::EINTR) => {}
            other => return other.map(drop),
        }
    }
}

/// Run `logic` inside `ns` with the default executor.
pub async fn run_in_namespace<T, E, F>(ns: &NamespaceRef, timeout: Duration, logic: F) -> Result<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    E: Display,
    F: FnOnce() -> std::result::Result<T, E>,
{
    ForkExecutor::default()
        .run_in_namespace(ns, timeout, logic)
        .await
}

/// Run `logic` in a forked child of the current namespaces with the default
/// executor.
pub async fn run_forked<T, E, F>(timeout: Duration, logic: F) -> Result<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    E: Display,
    F: FnOnce() -> std::result::Result<T, E>,
{
    ForkExecutor::default().run_forked(timeout, logic).await
}
