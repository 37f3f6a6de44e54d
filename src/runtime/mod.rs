//! Reference execution of IR modules
//!
//! Used to check that extraction preserves behavior: run a function before
//! and after the pass and compare results, memory and the recorded remote
//! calls.

mod interpreter;
pub mod memory;

pub use interpreter::{Interpreter, RemoteCall};
pub use memory::{global_pointer, owning_core, Memory};

use crate::{Error, Result};
use serde::Deserialize;

/// Interpreter limits and primitive bindings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterpreterOptions {
    /// Maximum instructions executed across all calls
    pub max_steps: u64,
    /// Maximum nesting of calls
    pub max_call_depth: usize,
    /// Maximum memory size in bytes
    pub memory_limit: u64,
    /// Symbol served as `resolve_owning_core`
    pub owning_core_symbol: String,
    /// Symbol served as `call_on`
    pub call_on_symbol: String,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_call_depth: 256,
            memory_limit: 16 << 20,
            owning_core_symbol: "resolve_owning_core".to_string(),
            call_on_symbol: "call_on".to_string(),
        }
    }
}

impl InterpreterOptions {
    /// Parses options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))
    }
}
