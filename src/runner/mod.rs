//! Single-flight asynchronous task runners
//!
//! A [`SingleFlightRunner`] is a named slot for one long-running operation
//! (opening a connection, running an extraction). The operation runs on a
//! background tokio task, at most once at a time per slot, and reports its
//! outcome through exactly one of two callbacks.
//!
//! A [`RunnerRegistry`] is the lookup table an extractor keeps of its slots,
//! one per operation kind.
//!
//! # Example
//!
//! ```no_run
//! use grid_extract::runner::SingleFlightRunner;
//!
//! # async fn example() {
//! let runner = SingleFlightRunner::new("extract");
//! runner
//!     .run(
//!         async { Ok::<_, std::io::Error>(42) },
//!         |value| println!("done: {value}"),
//!         |err| eprintln!("failed: {err}"),
//!     )
//!     .expect("slot is idle");
//! runner.wait(None).await;
//! # }
//! ```

pub mod registry;
pub mod single_flight;

pub use registry::RunnerRegistry;
pub use single_flight::SingleFlightRunner;

/// Runner errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    /// The slot already has an execution in flight
    #[error("operation '{0}' is already running")]
    Busy(String),

    /// No runner registered under this name
    #[error("no runner named '{0}'")]
    NotFound(String),

    /// A runner with this name is already registered
    #[error("runner '{0}' is already registered")]
    Duplicate(String),

    /// `run` was called outside a tokio runtime
    #[error("operation '{0}' cannot start: no tokio runtime available")]
    NoRuntime(String),
}

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;
