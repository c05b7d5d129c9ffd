//! Unified error type for the orchestration layer.

use thiserror::Error;
use wirelang_core::{CompileError, ParseError, RuntimeFault};

#[derive(Debug, Error)]
pub enum WirelangError {
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),
    #[error("run failed: {0}")]
    Runtime(#[from] RuntimeFault),
}

impl WirelangError {
    /// Pipeline stage the error came from, for log tags and exit codes.
    pub fn phase(&self) -> &'static str {
        match self {
            WirelangError::Parse(_) => "parse",
            WirelangError::Compile(_) => "compile",
            WirelangError::Runtime(_) => "run",
        }
    }
}
