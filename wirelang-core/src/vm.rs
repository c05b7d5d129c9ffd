//! Virtual machine
//!
//! A two-register machine executing compiled `Code` against the graph it was
//! compiled from. `call eval m<n>` performs dirty-propagation evaluation: a
//! backward walk from the target member's producer, following input edges
//! into still-dirty nodes only, evaluating in dependency order. Each visited
//! node is marked clean before it runs; an assignment then re-dirties every
//! downstream reader of the written variable, which is what keeps loop bodies
//! re-evaluating while untouched statements stay settled.
//!
//! `run` and `step_over` are two termination predicates around the same
//! single-step primitive; `step_over` pauses after each `call` boundary.

use crate::compiler::{Code, CompileError, Compiler, Instr, OpCode, Operands, Register};
use crate::factory::slots;
use crate::graph::{Graph, MemberId, NodeId, NodeKind};
use crate::language::Language;
use crate::value::{TypeError, Value, ValueData};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Idle,
    Loaded,
    Running,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeFault {
    #[error("unrecognized opcode/operand pairing at instruction {0}")]
    UnknownOpcode(usize),
    #[error("operator input is not connected")]
    UnresolvedConnection,
    #[error("no implementation for operator '{0}'")]
    UnknownOperator(String),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// What one executed instruction did to the control flow.
struct StepOutcome {
    finished: bool,
    was_call: bool,
}

/// Two-register bytecode interpreter with stepwise debugging.
pub struct Vm {
    state: VmState,
    code: Option<Code>,
    cursor: usize,
    current_node: Option<NodeId>,
    acc: Value,
    flag: Value,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self {
            state: VmState::Idle,
            code: None,
            cursor: 0,
            current_node: None,
            acc: blank(),
            flag: blank(),
        }
    }

    // -- loading ----------------------------------------------------------

    /// Compile and load a program. On failure any previously loaded program
    /// is left untouched.
    pub fn load(&mut self, graph: &Graph) -> Result<(), CompileError> {
        let code = Compiler::compile(graph)?;
        self.load_code(code);
        Ok(())
    }

    /// Load already-compiled code, replacing the previous program.
    pub fn load_code(&mut self, code: Code) {
        debug!(instruction_count = code.instructions().len(), "program loaded");
        self.code = Some(code);
        self.cursor = 0;
        self.current_node = None;
        self.state = VmState::Loaded;
    }

    // -- execution --------------------------------------------------------

    /// Execute the loaded program to completion.
    pub fn run(&mut self, graph: &mut Graph, language: &Language) -> Result<(), RuntimeFault> {
        if self.code.is_none() {
            return Ok(());
        }
        self.cursor = 0;
        self.state = VmState::Running;
        loop {
            match self.step(graph, language) {
                Ok(outcome) if outcome.finished => break,
                Ok(_) => {}
                Err(fault) => {
                    // a fault kills the run, not the host
                    self.halt();
                    return Err(fault);
                }
            }
        }
        self.halt();
        Ok(())
    }

    /// Advance to the next `call` boundary or to the end of the program.
    ///
    /// Debugging granularity is one evaluable expression.
    pub fn step_over(&mut self, graph: &mut Graph, language: &Language) -> Result<(), RuntimeFault> {
        if self.code.is_none() {
            return Ok(());
        }
        if matches!(self.state, VmState::Loaded | VmState::Idle) {
            self.cursor = 0;
        }
        self.state = VmState::Running;
        loop {
            match self.step(graph, language) {
                Ok(outcome) if outcome.finished => {
                    self.halt();
                    return Ok(());
                }
                Ok(outcome) if outcome.was_call => {
                    self.state = VmState::Paused;
                    return Ok(());
                }
                Ok(_) => {}
                Err(fault) => {
                    self.halt();
                    return Err(fault);
                }
            }
        }
    }

    /// Cancel the current run. Values already written stay written.
    pub fn stop(&mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.state = VmState::Idle;
        self.cursor = 0;
        self.current_node = None;
    }

    fn step(&mut self, graph: &mut Graph, language: &Language) -> Result<StepOutcome, RuntimeFault> {
        let instr = match &self.code {
            Some(code) => match code.instructions().get(self.cursor) {
                Some(instr) => instr.clone(),
                None => return Ok(StepOutcome { finished: true, was_call: false }),
            },
            None => return Ok(StepOutcome { finished: true, was_call: false }),
        };
        trace!(%instr, "step");

        let mut was_call = false;
        match (instr.opcode, instr.operands) {
            (OpCode::Mov, Operands::Registers { dst, src }) => {
                *self.register_mut(dst) = self.register(src).clone();
                self.cursor += 1;
            }
            (OpCode::Cmp, Operands::Registers { dst, src }) => {
                let equal = self.register(dst).data() == self.register(src).data();
                self.flag = Value::from_data(ValueData::Bool(equal));
                self.cursor += 1;
            }
            (OpCode::Jmp, Operands::Offset(offset)) => {
                self.jump(offset)?;
            }
            (OpCode::Jne, Operands::Offset(offset)) => {
                if self.flag.as_bool() {
                    self.cursor += 1;
                } else {
                    self.jump(offset)?;
                }
            }
            (OpCode::Call, Operands::EvalMember(member)) => {
                self.eval_member(graph, language, member)?;
                self.cursor += 1;
                was_call = true;
            }
            (OpCode::Call, Operands::UnsetVars(scope)) => {
                unset_vars(graph, scope);
                self.cursor += 1;
                was_call = true;
            }
            (OpCode::Ret, Operands::None) => {
                return Ok(StepOutcome { finished: true, was_call: false });
            }
            _ => return Err(RuntimeFault::UnknownOpcode(self.cursor)),
        }
        Ok(StepOutcome { finished: false, was_call })
    }

    fn jump(&mut self, offset: i64) -> Result<(), RuntimeFault> {
        let target = self.cursor as i64 + offset;
        if target < 0 {
            return Err(RuntimeFault::UnknownOpcode(self.cursor));
        }
        self.cursor = target as usize;
        Ok(())
    }

    // -- evaluation -------------------------------------------------------

    /// Dirty-propagation evaluation rooted at `member`.
    fn eval_member(
        &mut self,
        graph: &mut Graph,
        language: &Language,
        member: MemberId,
    ) -> Result<(), RuntimeFault> {
        let start = match graph.member(member).input {
            Some(src) => graph.member(src).owner,
            None => graph.member(member).owner,
        };
        let order = graph.collect_dirty_upstream(start);
        for node in order {
            self.current_node = Some(node);
            // clean first: an assignment re-dirties its readers (itself
            // included) and that mark must survive this pass
            graph.node_mut(node).dirty = false;
            self.eval_node(graph, language, node)?;
        }
        let value = graph.resolved_value(member).clone();
        graph.member_mut(member).value.assign_value(&value)?;
        self.acc = value;
        Ok(())
    }

    fn eval_node(
        &mut self,
        graph: &mut Graph,
        language: &Language,
        node: NodeId,
    ) -> Result<(), RuntimeFault> {
        let kind = graph.node(node).kind.clone();
        match kind {
            NodeKind::BinaryOp { op, .. } if op.identifier == "=" => {
                let lvalue = slot(graph, node, slots::LVALUE)?;
                let rvalue = slot(graph, node, slots::RVALUE)?;
                let target = graph
                    .member(lvalue)
                    .input
                    .ok_or(RuntimeFault::UnresolvedConnection)?;
                let incoming = graph.resolved_value(rvalue).clone();
                graph.member_mut(target).value.assign_value(&incoming)?;
                graph.mark_downstream_dirty(target);

                let written = graph.member(target).value.clone();
                let result = slot(graph, node, slots::RESULT)?;
                graph.member_mut(result).value = written;
            }
            NodeKind::BinaryOp { op, .. } => {
                let lvalue = slot(graph, node, slots::LVALUE)?;
                let rvalue = slot(graph, node, slots::RVALUE)?;
                let lhs = graph.resolved_value(lvalue).clone();
                let rhs = graph.resolved_value(rvalue).clone();
                let value = language
                    .apply_binary(&op.identifier, &lhs, &rhs)
                    .ok_or_else(|| RuntimeFault::UnknownOperator(op.identifier.clone()))?;
                let result = slot(graph, node, slots::RESULT)?;
                graph.member_mut(result).value = value;
            }
            NodeKind::UnaryOp { op, .. } => {
                let lvalue = slot(graph, node, slots::LVALUE)?;
                let operand = graph.resolved_value(lvalue).clone();
                let value = language
                    .apply_unary(&op.identifier, &operand)
                    .ok_or_else(|| RuntimeFault::UnknownOperator(op.identifier.clone()))?;
                let result = slot(graph, node, slots::RESULT)?;
                graph.member_mut(result).value = value;
            }
            NodeKind::Function(sig) => {
                let mut args = Vec::with_capacity(sig.args.len());
                for (arg_name, _) in &sig.args {
                    let arg_slot = slot(graph, node, arg_name)?;
                    args.push(graph.resolved_value(arg_slot).clone());
                }
                let value = language
                    .apply_function(&sig, &args)
                    .ok_or_else(|| RuntimeFault::UnknownOperator(sig.identifier.clone()))?;
                let result = slot(graph, node, slots::RESULT)?;
                graph.member_mut(result).value = value;
            }
            NodeKind::Variable(_) => {
                let value = slot(graph, node, slots::VALUE)?;
                match graph.member(value).input {
                    Some(src) => {
                        // declaration with initializer: copy it in, coerced
                        // to the declared type
                        let init = graph.member(src).value.clone();
                        graph.member_mut(value).value.assign_value(&init)?;
                    }
                    None => graph.member_mut(value).value.define(),
                }
            }
            // literals hold their value; structural nodes compute nothing
            _ => {}
        }
        Ok(())
    }

    // -- inspection -------------------------------------------------------

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn code(&self) -> Option<&Code> {
        self.code.as_ref()
    }

    pub fn acc(&self) -> &Value {
        &self.acc
    }

    pub fn flag(&self) -> &Value {
        &self.flag
    }

    /// Node the evaluator visited last, for editor highlighting.
    pub fn current_node(&self) -> Option<NodeId> {
        self.current_node
    }

    pub fn next_instruction(&self) -> Option<&Instr> {
        self.code.as_ref()?.instructions().get(self.cursor)
    }

    /// Formatted text of the instruction about to execute.
    pub fn next_instruction_text(&self) -> Option<String> {
        self.next_instruction().map(Instr::to_string)
    }

    fn register(&self, register: Register) -> &Value {
        match register {
            Register::Acc => &self.acc,
            Register::Flag => &self.flag,
        }
    }

    fn register_mut(&mut self, register: Register) -> &mut Value {
        match register {
            Register::Acc => &mut self.acc,
            Register::Flag => &mut self.flag,
        }
    }
}

/// Release a scope's variables: undefine their storage and re-dirty the
/// variable nodes so re-entering the scope re-runs the initializers.
fn unset_vars(graph: &mut Graph, scope: NodeId) {
    let variables: Vec<NodeId> = graph
        .node(scope)
        .scope
        .as_ref()
        .map(|table| table.variables.values().copied().collect())
        .unwrap_or_default();
    for var in variables {
        if let Ok(value) = graph.member_named(var, slots::VALUE) {
            graph.member_mut(value).value.undefine();
        }
        graph.node_mut(var).dirty = true;
    }
}

fn slot(graph: &Graph, node: NodeId, name: &str) -> Result<MemberId, RuntimeFault> {
    graph
        .member_named(node, name)
        .map_err(|_| RuntimeFault::UnresolvedConnection)
}

fn blank() -> Value {
    let mut value = Value::from_data(ValueData::Double(0.0));
    value.undefine();
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::BaseNodeFactory;
    use crate::parser::Parser;
    use crate::reflection::TypeRegistry;

    struct Fixture {
        registry: TypeRegistry,
        language: Language,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = TypeRegistry::with_primitives();
            let language = Language::wirelang(&registry);
            Self { registry, language }
        }

        fn parse(&self, source: &str) -> Graph {
            let factory = BaseNodeFactory::new(&self.registry);
            Parser::new(&self.language, &self.registry, &factory)
                .parse(source)
                .unwrap()
        }

        fn run(&self, source: &str) -> (Graph, Vm) {
            let mut graph = self.parse(source);
            let mut vm = Vm::new();
            vm.load(&graph).unwrap();
            vm.run(&mut graph, &self.language).unwrap();
            (graph, vm)
        }

        fn variable_text(&self, graph: &Graph, name: &str) -> String {
            let root = graph.root().unwrap();
            let var = graph.find_variable(root, name).unwrap();
            let value = graph.member_named(var, slots::VALUE).unwrap();
            graph.member(value).value.to_display_string()
        }
    }

    #[test]
    fn test_comparison_leaves_result_in_acc() {
        let fixture = Fixture::new();
        let (_, vm) = fixture.run("double b = 6; b > 5;");
        assert_eq!(vm.acc().to_display_string(), "true");
        assert_eq!(vm.state(), VmState::Idle);
    }

    #[test]
    fn test_conditional_picks_false_branch() {
        let fixture = Fixture::new();
        let (graph, _) = fixture.run("double a = 1; if(a > 5){ a = 2; } else { a = 3; }");
        assert_eq!(fixture.variable_text(&graph, "a"), "3");
    }

    #[test]
    fn test_loop_concatenates_digits() {
        let fixture = Fixture::new();
        let source = "string res = \"\"; double n = 0; for(n = 0; n < 10; n = n + 1){ res = res + n; } res;";
        let (graph, vm) = fixture.run(source);
        assert_eq!(fixture.variable_text(&graph, "res"), "0123456789");
        assert_eq!(vm.acc().to_display_string(), "0123456789");
    }

    #[test]
    fn test_while_loop_counts_up() {
        let fixture = Fixture::new();
        let (graph, vm) = fixture.run("double n = 0; while(n < 5){ n = n + 1; } n;");
        assert_eq!(fixture.variable_text(&graph, "n"), "5");
        assert_eq!(vm.acc().to_display_string(), "5");
    }

    #[test]
    fn test_second_run_reaches_same_result() {
        let fixture = Fixture::new();
        let source = "double n = 0; double acc = 0; for(n = 0; n < 5; n = n + 1){ acc = acc + n; }";
        let mut graph = fixture.parse(source);
        let mut vm = Vm::new();
        vm.load(&graph).unwrap();
        vm.run(&mut graph, &fixture.language).unwrap();
        assert_eq!(fixture.variable_text(&graph, "acc"), "10");
        vm.run(&mut graph, &fixture.language).unwrap();
        assert_eq!(fixture.variable_text(&graph, "acc"), "10");
    }

    #[test]
    fn test_settled_statement_yields_empty_traversal() {
        let fixture = Fixture::new();
        let (graph, _) = fixture.run("double a = 7; a;");
        let root = graph.root().unwrap();
        let var = graph.find_variable(root, "a").unwrap();
        assert!(graph.collect_dirty_upstream(var).is_empty());
    }

    #[test]
    fn test_step_over_pauses_at_call_boundaries() {
        let fixture = Fixture::new();
        let mut graph = fixture.parse("double a = 1; a + 1;");
        let mut vm = Vm::new();
        vm.load(&graph).unwrap();
        assert_eq!(vm.state(), VmState::Loaded);

        vm.step_over(&mut graph, &fixture.language).unwrap();
        assert_eq!(vm.state(), VmState::Paused);
        assert_eq!(vm.acc().to_display_string(), "1");

        vm.step_over(&mut graph, &fixture.language).unwrap();
        assert_eq!(vm.state(), VmState::Paused);
        assert_eq!(vm.acc().to_display_string(), "2");

        vm.step_over(&mut graph, &fixture.language).unwrap();
        assert_eq!(vm.state(), VmState::Idle);
    }

    #[test]
    fn test_failed_load_keeps_previous_program() {
        let fixture = Fixture::new();
        let mut graph = fixture.parse("double a = 40 + 2;");
        let mut vm = Vm::new();
        vm.load(&graph).unwrap();

        assert!(vm.load(&Graph::new()).is_err());
        assert!(vm.code().is_some());
        vm.run(&mut graph, &fixture.language).unwrap();
        assert_eq!(fixture.variable_text(&graph, "a"), "42");
    }

    #[test]
    fn test_mismatched_operands_fault_the_run() {
        let fixture = Fixture::new();
        let mut graph = fixture.parse("double a = 1;");
        let instr = Instr {
            index: 0,
            opcode: OpCode::Mov,
            operands: Operands::Offset(3),
            comment: String::new(),
        };
        let mut vm = Vm::new();
        vm.load_code(Code::raw(vec![instr], graph.root().unwrap()));
        let fault = vm.run(&mut graph, &fixture.language).unwrap_err();
        assert_eq!(fault, RuntimeFault::UnknownOpcode(0));
        assert_eq!(vm.state(), VmState::Idle);
    }

    #[test]
    fn test_cmp_sets_flag_from_register_equality() {
        let fixture = Fixture::new();
        let mut graph = fixture.parse("double a = 1;");
        let program = graph.root().unwrap();
        let statement = graph.node(program).children[0];
        let root_slot = graph.member_named(statement, slots::ROOT).unwrap();
        let instr = |index, opcode, operands| Instr {
            index,
            opcode,
            operands,
            comment: String::new(),
        };

        // registers differ: acc holds 1, flag is still blank
        let mut vm = Vm::new();
        vm.load_code(Code::raw(
            vec![
                instr(0, OpCode::Call, Operands::EvalMember(root_slot)),
                instr(1, OpCode::Cmp, Operands::Registers { dst: Register::Acc, src: Register::Flag }),
                instr(2, OpCode::Ret, Operands::None),
            ],
            program,
        ));
        vm.run(&mut graph, &fixture.language).unwrap();
        assert!(!vm.flag().as_bool());

        // copying acc into flag first makes the registers compare equal
        vm.load_code(Code::raw(
            vec![
                instr(0, OpCode::Call, Operands::EvalMember(root_slot)),
                instr(1, OpCode::Mov, Operands::Registers { dst: Register::Flag, src: Register::Acc }),
                instr(2, OpCode::Cmp, Operands::Registers { dst: Register::Acc, src: Register::Flag }),
                instr(3, OpCode::Ret, Operands::None),
            ],
            program,
        ));
        vm.run(&mut graph, &fixture.language).unwrap();
        assert!(vm.flag().as_bool());
    }

    #[test]
    fn test_next_instruction_text_format() {
        let fixture = Fixture::new();
        let graph = fixture.parse("double a = 1;");
        let mut vm = Vm::new();
        vm.load(&graph).unwrap();
        let text = vm.next_instruction_text().unwrap();
        assert!(text.starts_with("0: call"));
        assert!(text.contains(';'));
    }

    #[test]
    fn test_unary_and_function_evaluation() {
        let fixture = Fixture::new();
        let (_, vm) = fixture.run("double a = -3; pow(2, 8) + a;");
        assert_eq!(vm.acc().to_display_string(), "253");
    }
}
