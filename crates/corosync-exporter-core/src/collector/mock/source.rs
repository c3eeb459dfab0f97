//! Scripted statistics source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::collector::traits::{SourceError, StatsSource};

#[derive(Debug, Clone)]
enum Response {
    Output(String),
    Fail(String),
}

/// Statistics source returning canned output per prefix.
///
/// Clones share state, so a test can keep a handle and change the responses
/// while a collector owns another clone.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    responses: Arc<Mutex<HashMap<String, Response>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MockSource::set_output`].
    pub fn with_output(self, prefix: &str, output: impl Into<String>) -> Self {
        self.set_output(prefix, output);
        self
    }

    /// Makes `list(prefix)` return `output`.
    pub fn set_output(&self, prefix: &str, output: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(prefix.to_string(), Response::Output(output.into()));
    }

    /// Makes `list(prefix)` fail with [`SourceError::Unavailable`].
    pub fn set_failure(&self, prefix: &str, message: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(prefix.to_string(), Response::Fail(message.into()));
    }

    /// Prefixes requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatsSource for MockSource {
    fn list(&self, prefix: &str) -> Result<String, SourceError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prefix.to_string());

        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(prefix)
            .cloned();
        match response {
            Some(Response::Output(out)) => Ok(out),
            Some(Response::Fail(msg)) => Err(SourceError::Unavailable(msg)),
            None => Err(SourceError::Unavailable(format!("no output for {}", prefix))),
        }
    }
}
