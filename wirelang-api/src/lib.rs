//! Wirelang API - Execution orchestration layer
//!
//! Provides a unified execution interface, including:
//! - Execution flow orchestration (parse, compile, run)
//! - Configuration abstraction (RunConfig)
//! - Unified error handling (WirelangError)
//!
//! For CLI convenience, this crate holds a shared default toolchain.
//! For library use, prefer the explicit `run(source, &config)` API.

use once_cell::sync::Lazy;
use tracing::{debug, info};

use wirelang_core::factory::BaseNodeFactory;
use wirelang_core::{Graph, Language, Parser, Serializer, TypeRegistry, Vm};

pub mod config;
pub mod error;
pub mod types;

pub use config::RunConfig;
pub use error::WirelangError;
pub use types::RunOutput;

// Re-export core types
pub use wirelang_core;
pub use wirelang_core::{Value, VmState};

/// Immutable pieces every run needs: the type registry and the language
/// definition built on top of it.
pub struct Toolchain {
    registry: TypeRegistry,
    language: Language,
}

impl Toolchain {
    pub fn new() -> Self {
        let registry = TypeRegistry::with_primitives();
        let language = Language::wirelang(&registry);
        Toolchain { registry, language }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// Parse `source` into a fresh graph.
    pub fn parse(&self, source: &str) -> Result<Graph, WirelangError> {
        let factory = BaseNodeFactory::new(&self.registry);
        let graph = Parser::new(&self.language, &self.registry, &factory).parse(source)?;
        debug!(nodes = graph.node_count(), "parse completed");
        Ok(graph)
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Toolchain::new()
    }
}

static TOOLCHAIN: Lazy<Toolchain> = Lazy::new(Toolchain::new);

/// Shared default toolchain.
pub fn toolchain() -> &'static Toolchain {
    &TOOLCHAIN
}

/// Execute with explicit configuration
///
/// This is the recommended API for library users.
pub fn run(source: &str, config: &RunConfig) -> Result<RunOutput, WirelangError> {
    info!("starting execution");

    let tc = toolchain();
    let mut graph = tc.parse(source)?;

    if config.serialize_only {
        let text = Serializer::new(tc.language(), &graph).serialize();
        return Ok(RunOutput {
            text,
            listing: None,
        });
    }

    let mut vm = Vm::new();
    vm.load(&graph)?;

    let listing = if config.dump_code {
        vm.code().map(|code| code.to_string())
    } else {
        None
    };

    vm.run(&mut graph, tc.language())?;
    info!("execution completed");

    Ok(RunOutput {
        text: vm.acc().to_display_string(),
        listing,
    })
}

/// Compile `source` and return the instruction listing without running it.
pub fn compile(source: &str) -> Result<String, WirelangError> {
    let tc = toolchain();
    let graph = tc.parse(source)?;
    let mut vm = Vm::new();
    vm.load(&graph)?;
    let code = vm.code().expect("load stores the compiled program");
    Ok(code.to_string())
}

/// Parse `source` and print it back from the graph.
pub fn serialize(source: &str) -> Result<String, WirelangError> {
    let tc = toolchain();
    let graph = tc.parse(source)?;
    Ok(Serializer::new(tc.language(), &graph).serialize())
}

/// Quick run with default config.
pub fn quick_run(source: &str) -> Result<RunOutput, WirelangError> {
    run(source, &RunConfig::default())
}
