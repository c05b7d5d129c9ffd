//! Node factory
//!
//! The parser never assembles nodes by hand; it asks a `NodeFactory` so a
//! graphical frontend can substitute nodes wired with view components.
//! `BaseNodeFactory` is the non-visual implementation the core runs on.

use crate::graph::{Graph, NodeId, NodeKind, VariableInfo, Way};
use crate::language::{FunctionSig, Operator};
use crate::reflection::{TypeId, TypeRegistry};

/// Creates nodes pre-wired with the members their kind requires.
pub trait NodeFactory {
    fn new_program(&self, graph: &mut Graph) -> NodeId;
    fn new_scope(&self, graph: &mut Graph) -> NodeId;
    fn new_instruction(&self, graph: &mut Graph) -> NodeId;
    fn new_variable(&self, graph: &mut Graph, ty: TypeId, name: &str, scope: NodeId) -> NodeId;
    fn new_literal(&self, graph: &mut Graph, ty: TypeId) -> NodeId;
    fn new_binary_op(&self, graph: &mut Graph, op: &Operator) -> NodeId;
    fn new_unary_op(&self, graph: &mut Graph, op: &Operator) -> NodeId;
    fn new_function(&self, graph: &mut Graph, sig: &FunctionSig) -> NodeId;
    fn new_conditional(&self, graph: &mut Graph) -> NodeId;
    fn new_for_loop(&self, graph: &mut Graph) -> NodeId;
    fn new_while_loop(&self, graph: &mut Graph) -> NodeId;
    /// Featureless node, mostly useful to tests and editors.
    fn new_node(&self, graph: &mut Graph) -> NodeId;
}

/// Member names shared between factory, compiler, serializer and VM.
pub mod slots {
    pub const VALUE: &str = "value";
    pub const ROOT: &str = "root";
    pub const LVALUE: &str = "lvalue";
    pub const RVALUE: &str = "rvalue";
    pub const RESULT: &str = "result";
    pub const CONDITION: &str = "condition";
    pub const INIT: &str = "init";
    pub const ITER: &str = "iter";
}

/// Headless factory backed by a type registry.
pub struct BaseNodeFactory<'r> {
    registry: &'r TypeRegistry,
    any: TypeId,
}

impl<'r> BaseNodeFactory<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        let any = registry.id_of("any").expect("primitives registered");
        Self { registry, any }
    }
}

impl NodeFactory for BaseNodeFactory<'_> {
    fn new_program(&self, graph: &mut Graph) -> NodeId {
        let id = graph.add_node(NodeKind::Program);
        graph.set_root(id);
        id
    }

    fn new_scope(&self, graph: &mut Graph) -> NodeId {
        graph.add_node(NodeKind::Scope)
    }

    fn new_instruction(&self, graph: &mut Graph) -> NodeId {
        let id = graph.add_node(NodeKind::Instruction { end_token: None });
        graph.add_member(id, slots::ROOT, Way::In, self.any, self.registry);
        id
    }

    fn new_variable(&self, graph: &mut Graph, ty: TypeId, name: &str, scope: NodeId) -> NodeId {
        let id = graph.add_node(NodeKind::Variable(VariableInfo {
            name: name.to_string(),
            ..Default::default()
        }));
        graph.add_member(id, slots::VALUE, Way::InOut, ty, self.registry);
        graph.declare_variable(scope, name, id);
        id
    }

    fn new_literal(&self, graph: &mut Graph, ty: TypeId) -> NodeId {
        let id = graph.add_node(NodeKind::Literal);
        graph.add_member(id, slots::VALUE, Way::Out, ty, self.registry);
        id
    }

    fn new_binary_op(&self, graph: &mut Graph, op: &Operator) -> NodeId {
        let id = graph.add_node(NodeKind::BinaryOp {
            op: op.clone(),
            token: None,
        });
        graph.add_member(id, slots::LVALUE, Way::In, self.any, self.registry);
        graph.add_member(id, slots::RVALUE, Way::In, self.any, self.registry);
        graph.add_member(id, slots::RESULT, Way::Out, self.any, self.registry);
        id
    }

    fn new_unary_op(&self, graph: &mut Graph, op: &Operator) -> NodeId {
        let id = graph.add_node(NodeKind::UnaryOp {
            op: op.clone(),
            token: None,
        });
        graph.add_member(id, slots::LVALUE, Way::In, self.any, self.registry);
        graph.add_member(id, slots::RESULT, Way::Out, self.any, self.registry);
        id
    }

    fn new_function(&self, graph: &mut Graph, sig: &FunctionSig) -> NodeId {
        let id = graph.add_node(NodeKind::Function(sig.clone()));
        for (arg_name, arg_ty) in &sig.args {
            graph.add_member(id, arg_name, Way::In, *arg_ty, self.registry);
        }
        graph.add_member(id, slots::RESULT, Way::Out, sig.return_type, self.registry);
        id
    }

    fn new_conditional(&self, graph: &mut Graph) -> NodeId {
        let id = graph.add_node(NodeKind::Conditional {
            if_token: None,
            else_token: None,
        });
        graph.add_member(id, slots::CONDITION, Way::In, self.any, self.registry);
        id
    }

    fn new_for_loop(&self, graph: &mut Graph) -> NodeId {
        let id = graph.add_node(NodeKind::ForLoop { for_token: None });
        graph.add_member(id, slots::INIT, Way::In, self.any, self.registry);
        graph.add_member(id, slots::CONDITION, Way::In, self.any, self.registry);
        graph.add_member(id, slots::ITER, Way::In, self.any, self.registry);
        id
    }

    fn new_while_loop(&self, graph: &mut Graph) -> NodeId {
        let id = graph.add_node(NodeKind::WhileLoop { while_token: None });
        graph.add_member(id, slots::CONDITION, Way::In, self.any, self.registry);
        id
    }

    fn new_node(&self, graph: &mut Graph) -> NodeId {
        graph.add_node(NodeKind::Plain)
    }
}
