//! Output types returned by the orchestration entry points.

/// Result of a full run.
#[derive(Debug)]
pub struct RunOutput {
    /// Display text of the final accumulator.
    pub text: String,
    /// Instruction listing, present when `RunConfig::dump_code` is set.
    pub listing: Option<String>,
}
