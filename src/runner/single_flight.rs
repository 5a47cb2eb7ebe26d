//! Single-flight execution slot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, Instrument};

use super::{RunnerError, RunnerResult};

/// A named slot that runs at most one background operation at a time.
///
/// Cloning a runner yields another handle to the same slot.
#[derive(Debug, Clone)]
pub struct SingleFlightRunner {
    name: Arc<str>,
    running: Arc<watch::Sender<bool>>,
}

/// Returns the slot to idle when dropped, including when the task unwinds.
struct IdleGuard {
    name: Arc<str>,
    running: Arc<watch::Sender<bool>>,
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(runner = %self.name, "Operation panicked; releasing slot");
        }
        self.running.send_replace(false);
    }
}

impl SingleFlightRunner {
    /// Create an idle runner
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            name: Arc::from(name.into()),
            running: Arc::new(tx),
        }
    }

    /// Slot name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start `operation` on a background task.
    ///
    /// Fails with [`RunnerError::Busy`] without starting anything if the slot
    /// already has an execution in flight. Otherwise exactly one of
    /// `on_success` / `on_failure` is invoked from the background task once
    /// the operation finishes; neither is ever called from inside `run`.
    pub fn run<T, E, Fut, S, F>(&self, operation: Fut, on_success: S, on_failure: F) -> RunnerResult<()>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        let runtime =
            Handle::try_current().map_err(|_| RunnerError::NoRuntime(self.name.to_string()))?;

        let claimed = self.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !claimed {
            debug!(runner = %self.name, "Rejected run: slot busy");
            return Err(RunnerError::Busy(self.name.to_string()));
        }

        let guard = IdleGuard {
            name: self.name.clone(),
            running: self.running.clone(),
        };
        let span = tracing::debug_span!("runner", name = %self.name);

        runtime.spawn(
            async move {
                debug!("Operation started");
                match operation.await {
                    Ok(value) => {
                        debug!("Operation succeeded");
                        on_success(value);
                    }
                    Err(err) => {
                        debug!("Operation failed");
                        on_failure(err);
                    }
                }
                // The slot stays busy until the callback has returned.
                drop(guard);
            }
            .instrument(span),
        );

        Ok(())
    }

    /// Whether an execution is in flight (non-blocking)
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Wait until the current execution (if any) has finished.
    ///
    /// With `None` waits indefinitely. Returns `true` if the slot is idle and
    /// `false` if the timeout elapsed first; the operation keeps running in
    /// the background either way.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.running.subscribe();
        let idle = async move {
            let idle = rx.wait_for(|running| !*running).await.is_ok();
            idle
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, idle).await.unwrap_or(false),
            None => idle.await,
        }
    }
}
