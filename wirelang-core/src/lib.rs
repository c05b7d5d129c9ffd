//! Wirelang Core - Language core (pure logic, no IO)
//!
//! Contains the type registry, the typed value container, the node graph,
//! the parser, the text serializer, the bytecode compiler and the virtual
//! machine. Only operates on in-memory data structures; no file IO or
//! terminal output.
//!
//! The registry, language and factory are explicit values passed by
//! reference, not global state.

pub mod compiler;
pub mod factory;
pub mod graph;
pub mod language;
pub mod parser;
pub mod reflection;
pub mod serializer;
pub mod value;
pub mod vm;

// Re-export common types
pub use compiler::{Code, CompileError, Compiler};
pub use factory::{BaseNodeFactory, NodeFactory};
pub use graph::{Graph, MemberId, NodeId};
pub use language::Language;
pub use parser::{ParseError, Parser};
pub use reflection::{TypeRegistry, TypeId};
pub use serializer::Serializer;
pub use value::{TypeError, Value, ValueData};
pub use vm::{RuntimeFault, Vm, VmState};
