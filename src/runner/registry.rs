//! Named collection of single-flight runners

use std::collections::HashMap;

use super::{RunnerError, RunnerResult, SingleFlightRunner};

/// Lookup table of runners, one per operation kind.
///
/// The registry adds no synchronization of its own; every call is delegated
/// to the runner it finds.
#[derive(Debug, Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, SingleFlightRunner>,
}

impl RunnerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding one idle runner per distinct name in `names`;
    /// repeated names collapse into one runner
    pub fn with_runners<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let runners = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), SingleFlightRunner::new(name))
            })
            .collect();
        Self { runners }
    }

    /// Register a new idle runner under `name`
    pub fn add_runner(&mut self, name: impl Into<String>) -> RunnerResult<&SingleFlightRunner> {
        let name = name.into();
        if self.runners.contains_key(&name) {
            return Err(RunnerError::Duplicate(name));
        }
        Ok(self
            .runners
            .entry(name.clone())
            .or_insert_with(|| SingleFlightRunner::new(name)))
    }

    /// Look up the runner registered under `name`
    pub fn get_runner(&self, name: &str) -> RunnerResult<&SingleFlightRunner> {
        self.runners
            .get(name)
            .ok_or_else(|| RunnerError::NotFound(name.to_string()))
    }

    /// Names of all registered runners, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.runners.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether any registered runner has an execution in flight
    pub fn any_running(&self) -> bool {
        self.runners.values().any(SingleFlightRunner::is_running)
    }
}
