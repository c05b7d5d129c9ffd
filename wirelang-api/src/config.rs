//! Run configuration.

use serde::{Deserialize, Serialize};

/// Options controlling one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Print the compiled instruction listing before running.
    pub dump_code: bool,
    /// Re-print the parsed program (serializer round trip) instead of the
    /// run result.
    pub serialize_only: bool,
}
