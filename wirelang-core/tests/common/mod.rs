//! Test helpers
//!
//! End-to-end plumbing: build the default language, parse a source string,
//! load it into a VM and run it to completion.

use wirelang_core::factory::{slots, BaseNodeFactory};
use wirelang_core::{Graph, Language, Parser, Serializer, TypeRegistry, Vm};

/// Outcome of a full run: the final accumulator plus the mutated graph.
pub struct ExecResult {
    pub acc: String,
    pub graph: Graph,
}

#[derive(Debug)]
pub enum ExecError {
    Parse(String),
    Compile(String),
    Runtime(String),
}

/// Parse, compile, load and run `source`.
pub fn run_code(source: &str) -> Result<ExecResult, ExecError> {
    let registry = TypeRegistry::with_primitives();
    let language = Language::wirelang(&registry);
    let factory = BaseNodeFactory::new(&registry);

    let mut graph = Parser::new(&language, &registry, &factory)
        .parse(source)
        .map_err(|e| ExecError::Parse(e.to_string()))?;

    let mut vm = Vm::new();
    vm.load(&graph).map_err(|e| ExecError::Compile(e.to_string()))?;
    vm.run(&mut graph, &language)
        .map_err(|e| ExecError::Runtime(e.to_string()))?;

    Ok(ExecResult {
        acc: vm.acc().to_display_string(),
        graph,
    })
}

/// Display text of a program-level variable after a run.
pub fn variable_text(graph: &Graph, name: &str) -> String {
    let root = graph.root().expect("program root");
    let var = graph.find_variable(root, name).expect("variable exists");
    let value = graph.member_named(var, slots::VALUE).expect("value member");
    graph.member(value).value.to_display_string()
}

/// Parse then re-print.
pub fn round_trip(source: &str) -> String {
    let registry = TypeRegistry::with_primitives();
    let language = Language::wirelang(&registry);
    let factory = BaseNodeFactory::new(&registry);
    let graph = Parser::new(&language, &registry, &factory)
        .parse(source)
        .expect("source parses");
    Serializer::new(&language, &graph).serialize()
}
