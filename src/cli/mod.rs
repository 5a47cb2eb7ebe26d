//! CLI command implementations

pub mod error;
pub mod extract;
pub mod request;

pub use error::CliError;
pub use extract::{Cli, Commands, OutputFormat};
pub use request::RequestFile;
