//! Graph model
//!
//! Programs are mutable directed graphs of typed nodes. Nodes and members
//! live in arenas behind stable integer handles; every relation (containment,
//! control-flow order, data edges) is an index list into those arenas, so
//! there are no owning pointers to dangle.
//!
//! Three relation families coexist:
//! - containment (`parent`/`children`) governs destruction order and scoping,
//! - predecessor/successor links order instructions inside a scope,
//! - data edges connect an output member to at most one input member.

use crate::language::{FunctionSig, Operator, Token};
use crate::reflection::{TypeId, TypeRegistry};
use crate::value::Value;
use indexmap::IndexMap;
use thiserror::Error;

/// Stable handle to a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const INVALID: NodeId = NodeId(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable handle to a member in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberId(u32);

impl MemberId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Directions a member accepts connections in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Way {
    None,
    In,
    Out,
    InOut,
}

impl Way {
    pub fn allows_in(self) -> bool {
        matches!(self, Way::In | Way::InOut)
    }

    pub fn allows_out(self) -> bool {
        matches!(self, Way::Out | Way::InOut)
    }
}

/// Named, typed, directional value slot on a node.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub owner: NodeId,
    pub way: Way,
    pub value: Value,
    /// Producing member, when a data edge ends here.
    pub input: Option<MemberId>,
    /// Consuming members fed by this one.
    pub outputs: Vec<MemberId>,
    /// Source token, kept for lossless re-printing.
    pub token: Option<Token>,
}

/// Directed data connection between two members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub src: MemberId,
    pub dst: MemberId,
}

/// Variable bookkeeping carried by `NodeKind::Variable`.
#[derive(Debug, Clone, Default)]
pub struct VariableInfo {
    pub name: String,
    pub type_token: Option<Token>,
    pub identifier_token: Option<Token>,
    pub assign_token: Option<Token>,
    /// Instruction that declared this variable, set by the parser.
    pub declaration: Option<NodeId>,
}

/// Closed set of node kinds, dispatched by matching.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Root node; owns the global scope.
    Program,
    /// Braced block with its own variable table.
    Scope,
    /// One statement; its `root` member reads the statement's value.
    Instruction { end_token: Option<Token> },
    Literal,
    Variable(VariableInfo),
    BinaryOp {
        op: Operator,
        token: Option<Token>,
    },
    UnaryOp {
        op: Operator,
        token: Option<Token>,
    },
    Function(FunctionSig),
    Conditional {
        if_token: Option<Token>,
        else_token: Option<Token>,
    },
    ForLoop { for_token: Option<Token> },
    WhileLoop { while_token: Option<Token> },
    /// Featureless node (editor glue, tests).
    Plain,
}

impl NodeKind {
    pub fn label(&self) -> String {
        match self {
            NodeKind::Program => "program".to_string(),
            NodeKind::Scope => "scope".to_string(),
            NodeKind::Instruction { .. } => "instruction".to_string(),
            NodeKind::Literal => "literal".to_string(),
            NodeKind::Variable(info) => format!("var {}", info.name),
            NodeKind::BinaryOp { op, .. } => format!("operator{}", op.identifier),
            NodeKind::UnaryOp { op, .. } => format!("operator{}", op.identifier),
            NodeKind::Function(sig) => format!("{}()", sig.identifier),
            NodeKind::Conditional { .. } => "if".to_string(),
            NodeKind::ForLoop { .. } => "for".to_string(),
            NodeKind::WhileLoop { .. } => "while".to_string(),
            NodeKind::Plain => "node".to_string(),
        }
    }
}

/// Scope component: declared variables + scope braces.
///
/// The instruction list is the owner's ordered children.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub variables: IndexMap<String, NodeId>,
    pub begin_token: Option<Token>,
    pub end_token: Option<Token>,
}

/// Graph vertex representing one language construct.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub members: Vec<MemberId>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub predecessors: Vec<NodeId>,
    pub successors: Vec<NodeId>,
    pub dirty: bool,
    pub scope: Option<Scope>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        let scope = matches!(
            kind,
            NodeKind::Program | NodeKind::Scope
        )
        .then(Scope::default);
        Self {
            kind,
            members: Vec::new(),
            parent: None,
            children: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            dirty: true,
            scope,
        }
    }

    pub fn label(&self) -> String {
        self.kind.label()
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.kind, NodeKind::Variable(_))
    }

    pub fn has_scope(&self) -> bool {
        self.scope.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("member does not accept an inbound connection")]
    WayMismatchIn,
    #[error("member does not accept an outbound connection")]
    WayMismatchOut,
    #[error("input member already has a producer")]
    AlreadyConnected,
    #[error("node has no member named '{0}'")]
    NoSuchMember(String),
}

/// Arena-backed program graph.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    members: Vec<Member>,
    edges: Vec<Edge>,
    root: Option<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // -- arena access -----------------------------------------------------

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn member(&self, id: MemberId) -> &Member {
        &self.members[id.index()]
    }

    pub fn member_mut(&mut self, id: MemberId) -> &mut Member {
        &mut self.members[id.index()]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    // -- construction -----------------------------------------------------

    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind));
        id
    }

    pub fn add_member(
        &mut self,
        owner: NodeId,
        name: &str,
        way: Way,
        ty: TypeId,
        registry: &TypeRegistry,
    ) -> MemberId {
        let id = MemberId(self.members.len() as u32);
        self.members.push(Member {
            name: name.to_string(),
            owner,
            way,
            value: Value::undefined(ty, registry),
            input: None,
            outputs: Vec::new(),
            token: None,
        });
        self.node_mut(owner).members.push(id);
        id
    }

    /// Member of `node` named `name`.
    pub fn member_named(&self, node: NodeId, name: &str) -> Result<MemberId, GraphError> {
        self.node(node)
            .members
            .iter()
            .copied()
            .find(|id| self.member(*id).name == name)
            .ok_or_else(|| GraphError::NoSuchMember(name.to_string()))
    }

    /// Connect a data edge `src -> dst`.
    ///
    /// `dst` must allow In, `src` must allow Out, and an input member takes
    /// at most one inbound edge.
    pub fn connect(&mut self, src: MemberId, dst: MemberId) -> Result<(), GraphError> {
        if !self.member(src).way.allows_out() {
            return Err(GraphError::WayMismatchOut);
        }
        if !self.member(dst).way.allows_in() {
            return Err(GraphError::WayMismatchIn);
        }
        if self.member(dst).input.is_some() {
            return Err(GraphError::AlreadyConnected);
        }
        self.member_mut(dst).input = Some(src);
        self.member_mut(src).outputs.push(dst);
        self.edges.push(Edge { src, dst });
        Ok(())
    }

    /// Remove the inbound edge of `dst`, if any.
    pub fn disconnect(&mut self, dst: MemberId) {
        if let Some(src) = self.member_mut(dst).input.take() {
            self.member_mut(src).outputs.retain(|id| *id != dst);
            self.edges.retain(|edge| !(edge.src == src && edge.dst == dst));
        }
    }

    /// Attach `child` under `parent`; consecutive children are chained with
    /// predecessor/successor links (control-flow order).
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(previous) = self.node(parent).children.last().copied() {
            self.node_mut(previous).successors.push(child);
            self.node_mut(child).predecessors.push(previous);
        }
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parent = Some(parent);
    }

    /// Detach `child` from its parent, clearing order links.
    pub fn remove_child(&mut self, child: NodeId) {
        let Some(parent) = self.node_mut(child).parent.take() else {
            return;
        };
        self.node_mut(parent).children.retain(|id| *id != child);
        let predecessors = std::mem::take(&mut self.node_mut(child).predecessors);
        for pred in predecessors {
            self.node_mut(pred).successors.retain(|id| *id != child);
        }
        let successors = std::mem::take(&mut self.node_mut(child).successors);
        for succ in successors {
            self.node_mut(succ).predecessors.retain(|id| *id != child);
        }
    }

    // -- scope lookups ----------------------------------------------------

    /// Innermost scope node at or above `node`.
    pub fn enclosing_scope(&self, node: NodeId) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.node(id).has_scope() {
                return Some(id);
            }
            current = self.node(id).parent;
        }
        None
    }

    /// Resolve `name` in `scope` or any enclosing scope.
    pub fn find_variable(&self, scope: NodeId, name: &str) -> Option<NodeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(scope) = &self.node(id).scope {
                if let Some(var) = scope.variables.get(name) {
                    return Some(*var);
                }
            }
            current = self.node(id).parent;
        }
        None
    }

    /// Declare a variable in `scope`'s table. Returns false when the name is
    /// already taken in that same scope.
    pub fn declare_variable(&mut self, scope: NodeId, name: &str, variable: NodeId) -> bool {
        let Some(table) = self.node_mut(scope).scope.as_mut() else {
            return false;
        };
        if table.variables.contains_key(name) {
            return false;
        }
        table.variables.insert(name.to_string(), variable);
        true
    }

    // -- values through connections ---------------------------------------

    /// Value a member reads: its producer's value when connected, its own
    /// stored value otherwise.
    pub fn resolved_value(&self, member: MemberId) -> &Value {
        match self.member(member).input {
            Some(src) => &self.member(src).value,
            None => &self.member(member).value,
        }
    }

    // -- dirty bookkeeping ------------------------------------------------

    /// Mark every consumer downstream of `member` dirty (cycle-guarded).
    ///
    /// The producing node itself is left alone so its initializer does not
    /// re-run.
    pub fn mark_downstream_dirty(&mut self, member: MemberId) {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack: Vec<MemberId> = self.member(member).outputs.clone();
        while let Some(consumer) = stack.pop() {
            let owner = self.member(consumer).owner;
            if visited[owner.index()] {
                continue;
            }
            visited[owner.index()] = true;
            self.node_mut(owner).dirty = true;
            // fan out through every member this node produces
            let member_ids = self.node(owner).members.clone();
            for id in member_ids {
                stack.extend(self.member(id).outputs.iter().copied());
            }
        }
    }

    /// Backward traversal powering dirty-propagation evaluation.
    ///
    /// Starting at `start`, follows input edges into nodes that are still
    /// dirty, depth-first, inputs before consumers; the returned order is the
    /// evaluation order. Cycles are cut by the visited set. A clean start
    /// node yields an empty traversal.
    pub fn collect_dirty_upstream(&self, start: NodeId) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        self.collect_dirty_rec(start, &mut visited, &mut order);
        order
    }

    fn collect_dirty_rec(&self, node: NodeId, visited: &mut [bool], order: &mut Vec<NodeId>) {
        if visited[node.index()] || !self.node(node).dirty {
            return;
        }
        visited[node.index()] = true;
        for member_id in &self.node(node).members {
            if let Some(src) = self.member(*member_id).input {
                self.collect_dirty_rec(self.member(src).owner, visited, order);
            }
        }
        order.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::TypeRegistry;

    fn setup() -> (Graph, TypeRegistry) {
        (Graph::new(), TypeRegistry::with_primitives())
    }

    fn double(registry: &TypeRegistry) -> TypeId {
        registry.id_of("double").unwrap()
    }

    #[test]
    fn test_connect_validates_ways() {
        let (mut graph, registry) = setup();
        let a = graph.add_node(NodeKind::Plain);
        let b = graph.add_node(NodeKind::Plain);
        let out = graph.add_member(a, "out", Way::Out, double(&registry), &registry);
        let inp = graph.add_member(b, "in", Way::In, double(&registry), &registry);

        assert_eq!(graph.connect(inp, out), Err(GraphError::WayMismatchOut));
        assert!(graph.connect(out, inp).is_ok());
        assert_eq!(graph.member(inp).input, Some(out));
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_single_inbound_edge() {
        let (mut graph, registry) = setup();
        let a = graph.add_node(NodeKind::Plain);
        let out1 = graph.add_member(a, "out1", Way::Out, double(&registry), &registry);
        let out2 = graph.add_member(a, "out2", Way::Out, double(&registry), &registry);
        let b = graph.add_node(NodeKind::Plain);
        let inp = graph.add_member(b, "in", Way::In, double(&registry), &registry);

        graph.connect(out1, inp).unwrap();
        assert_eq!(graph.connect(out2, inp), Err(GraphError::AlreadyConnected));
    }

    #[test]
    fn test_disconnect_cleans_edge_lists() {
        let (mut graph, registry) = setup();
        let a = graph.add_node(NodeKind::Plain);
        let out = graph.add_member(a, "out", Way::Out, double(&registry), &registry);
        let b = graph.add_node(NodeKind::Plain);
        let inp = graph.add_member(b, "in", Way::In, double(&registry), &registry);

        graph.connect(out, inp).unwrap();
        graph.disconnect(inp);
        assert_eq!(graph.member(inp).input, None);
        assert!(graph.member(out).outputs.is_empty());
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_children_are_flow_ordered() {
        let (mut graph, _) = setup();
        let scope = graph.add_node(NodeKind::Scope);
        let first = graph.add_node(NodeKind::Plain);
        let second = graph.add_node(NodeKind::Plain);
        graph.add_child(scope, first);
        graph.add_child(scope, second);

        assert_eq!(graph.node(first).successors, vec![second]);
        assert_eq!(graph.node(second).predecessors, vec![first]);
        assert_eq!(graph.node(second).parent, Some(scope));
    }

    #[test]
    fn test_variable_resolution_walks_scopes() {
        let (mut graph, _) = setup();
        let program = graph.add_node(NodeKind::Program);
        let inner = graph.add_node(NodeKind::Scope);
        graph.add_child(program, inner);
        let var = graph.add_node(NodeKind::Variable(VariableInfo {
            name: "x".to_string(),
            ..Default::default()
        }));
        assert!(graph.declare_variable(program, "x", var));
        assert!(!graph.declare_variable(program, "x", var), "duplicate name");

        assert_eq!(graph.find_variable(inner, "x"), Some(var));
        assert_eq!(graph.find_variable(inner, "y"), None);
    }

    #[test]
    fn test_dirty_traversal_skips_clean_upstream() {
        let (mut graph, registry) = setup();
        // literal -> unary -> sink
        let literal = graph.add_node(NodeKind::Literal);
        let lit_out = graph.add_member(literal, "value", Way::Out, double(&registry), &registry);
        let sink = graph.add_node(NodeKind::Plain);
        let sink_in = graph.add_member(sink, "in", Way::In, double(&registry), &registry);
        graph.connect(lit_out, sink_in).unwrap();

        let order = graph.collect_dirty_upstream(sink);
        assert_eq!(order, vec![literal, sink]);

        for id in order {
            graph.node_mut(id).dirty = false;
        }
        assert!(graph.collect_dirty_upstream(sink).is_empty());
    }

    #[test]
    fn test_downstream_dirtying_reaches_transitive_readers() {
        let (mut graph, registry) = setup();
        // var -> add -> cmp
        let var = graph.add_node(NodeKind::Variable(VariableInfo::default()));
        let var_out = graph.add_member(var, "value", Way::InOut, double(&registry), &registry);
        let add = graph.add_node(NodeKind::Plain);
        let add_in = graph.add_member(add, "lvalue", Way::In, double(&registry), &registry);
        let add_out = graph.add_member(add, "result", Way::Out, double(&registry), &registry);
        let cmp = graph.add_node(NodeKind::Plain);
        let cmp_in = graph.add_member(cmp, "lvalue", Way::In, double(&registry), &registry);
        graph.connect(var_out, add_in).unwrap();
        graph.connect(add_out, cmp_in).unwrap();

        for id in [var, add, cmp] {
            graph.node_mut(id).dirty = false;
        }
        graph.mark_downstream_dirty(var_out);

        assert!(!graph.node(var).dirty, "assigned variable stays clean");
        assert!(graph.node(add).dirty);
        assert!(graph.node(cmp).dirty);
    }

    #[test]
    fn test_dirty_traversal_is_cycle_guarded() {
        let (mut graph, registry) = setup();
        let a = graph.add_node(NodeKind::Plain);
        let a_in = graph.add_member(a, "in", Way::In, double(&registry), &registry);
        let a_out = graph.add_member(a, "out", Way::Out, double(&registry), &registry);
        let b = graph.add_node(NodeKind::Plain);
        let b_in = graph.add_member(b, "in", Way::In, double(&registry), &registry);
        let b_out = graph.add_member(b, "out", Way::Out, double(&registry), &registry);
        graph.connect(a_out, b_in).unwrap();
        graph.connect(b_out, a_in).unwrap();

        let order = graph.collect_dirty_upstream(a);
        assert_eq!(order.len(), 2);
    }
}
