//! Graph to bytecode
//!
//! Linearizes a program graph into a flat instruction list for the VM.
//! Control flow compiles to relative jumps; jump targets are emitted as
//! logical labels first and resolved to offsets once the whole stream
//! exists, so no instruction is rewritten while still being built.

use crate::factory::slots;
use crate::graph::{Graph, MemberId, NodeId, NodeKind};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Machine registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Accumulator; receives every evaluated value.
    Acc,
    /// Compare result store; drives `jne`.
    Flag,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Acc => write!(f, "%acc"),
            Register::Flag => write!(f, "%flag"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Mov,
    Cmp,
    Jmp,
    Jne,
    Call,
    Ret,
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Mov => "mov",
            OpCode::Cmp => "cmp",
            OpCode::Jmp => "jmp",
            OpCode::Jne => "jne",
            OpCode::Call => "call",
            OpCode::Ret => "ret",
        };
        write!(f, "{name}")
    }
}

/// Operand payload of one instruction.
///
/// Kept separate from the opcode so the VM can reject a pairing it does not
/// implement instead of trusting the compiler blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    Registers { dst: Register, src: Register },
    /// Signed offset relative to the instruction's own index.
    Offset(i64),
    EvalMember(MemberId),
    UnsetVars(NodeId),
}

impl fmt::Display for Operands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operands::None => Ok(()),
            Operands::Registers { dst, src } => write!(f, "{dst}, {src}"),
            Operands::Offset(offset) => write!(f, "{offset:+}"),
            Operands::EvalMember(member) => write!(f, "eval m{}", member.index()),
            Operands::UnsetVars(node) => write!(f, "unset n{}", node.index()),
        }
    }
}

/// One compiled instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub index: usize,
    pub opcode: OpCode,
    pub operands: Operands,
    pub comment: String,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = format!("{} {}", self.opcode, self.operands);
        write!(f, "{}: {:<24} ; {}", self.index, body.trim_end(), self.comment)
    }
}

/// Immutable compiled program.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    instructions: Vec<Instr>,
    root: NodeId,
}

impl Code {
    /// Hand-assembled code; offsets are trusted as-is.
    pub fn raw(instructions: Vec<Instr>, root: NodeId) -> Self {
        Self { instructions, root }
    }

    pub fn instructions(&self) -> &[Instr] {
        &self.instructions
    }

    pub fn root(&self) -> NodeId {
        self.root
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instructions {
            writeln!(f, "{instr}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("variable '{0}' is used but never declared")]
    UndeclaredVariable(String),
    #[error("graph does not hold a compilable program")]
    InvalidProgram,
}

/// Position of a not-yet-resolved jump, and the label it waits for.
#[derive(Debug, Clone, Copy)]
struct Fixup {
    at: usize,
    label: usize,
}

/// Two-pass assembler: emit with labels, resolve offsets at the end.
#[derive(Default)]
struct Assembler {
    instructions: Vec<Instr>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Assembler {
    fn emit(&mut self, opcode: OpCode, operands: Operands, comment: impl Into<String>) -> usize {
        let index = self.instructions.len();
        self.instructions.push(Instr {
            index,
            opcode,
            operands,
            comment: comment.into(),
        });
        index
    }

    fn new_label(&mut self) -> usize {
        self.labels.push(None);
        self.labels.len() - 1
    }

    /// Pin `label` to the next emitted instruction.
    fn bind(&mut self, label: usize) {
        self.labels[label] = Some(self.instructions.len());
    }

    fn emit_jump(&mut self, opcode: OpCode, label: usize, comment: impl Into<String>) {
        let at = self.emit(opcode, Operands::Offset(0), comment);
        self.fixups.push(Fixup { at, label });
    }

    fn resolve(mut self, root: NodeId) -> Result<Code, CompileError> {
        for fixup in &self.fixups {
            let Some(target) = self.labels[fixup.label] else {
                return Err(CompileError::InvalidProgram);
            };
            self.instructions[fixup.at].operands =
                Operands::Offset(target as i64 - fixup.at as i64);
        }
        Ok(Code {
            instructions: self.instructions,
            root,
        })
    }
}

/// Compiles a program graph into `Code`.
pub struct Compiler;

impl Compiler {
    /// Validate, then linearize. No `Code` is produced when validation fails.
    pub fn compile(graph: &Graph) -> Result<Code, CompileError> {
        let Some(root) = graph.root() else {
            return Err(CompileError::InvalidProgram);
        };
        if !matches!(graph.node(root).kind, NodeKind::Program) {
            return Err(CompileError::InvalidProgram);
        }
        Self::check_declarations(graph, root)?;

        let mut asm = Assembler::default();
        for child in graph.node(root).children.clone() {
            Self::compile_statement(&mut asm, graph, child)?;
        }
        asm.emit(OpCode::Ret, Operands::None, "end of program");
        let code = asm.resolve(root)?;
        debug!(instruction_count = code.instructions().len(), "compiled");
        Ok(code)
    }

    /// Every variable node reachable from the root must sit in a scope's
    /// variable table.
    fn check_declarations(graph: &Graph, root: NodeId) -> Result<(), CompileError> {
        let mut declared = vec![false; graph.node_count()];
        let mut reachable = vec![false; graph.node_count()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if reachable[id.index()] {
                continue;
            }
            reachable[id.index()] = true;
            let node = graph.node(id);
            if let Some(scope) = &node.scope {
                for var in scope.variables.values() {
                    declared[var.index()] = true;
                }
            }
            stack.extend(node.children.iter().copied());
            for member in &node.members {
                if let Some(src) = graph.member(*member).input {
                    stack.push(graph.member(src).owner);
                }
            }
        }

        for id in graph.node_ids() {
            if !reachable[id.index()] {
                continue;
            }
            if let NodeKind::Variable(info) = &graph.node(id).kind {
                if !declared[id.index()] {
                    return Err(CompileError::UndeclaredVariable(info.name.clone()));
                }
            }
        }
        Ok(())
    }

    fn compile_statement(asm: &mut Assembler, graph: &Graph, node: NodeId) -> Result<(), CompileError> {
        match &graph.node(node).kind {
            NodeKind::Instruction { .. } => {
                let slot = Self::slot(graph, node, slots::ROOT)?;
                let label = Self::producer_label(graph, slot);
                asm.emit(
                    OpCode::Call,
                    Operands::EvalMember(slot),
                    format!("evaluate {label}"),
                );
                Ok(())
            }
            NodeKind::Scope => Self::compile_scope(asm, graph, node),
            NodeKind::Conditional { .. } => Self::compile_conditional(asm, graph, node),
            NodeKind::ForLoop { .. } => Self::compile_for_loop(asm, graph, node),
            NodeKind::WhileLoop { .. } => Self::compile_while_loop(asm, graph, node),
            _ => Err(CompileError::InvalidProgram),
        }
    }

    fn compile_scope(asm: &mut Assembler, graph: &Graph, node: NodeId) -> Result<(), CompileError> {
        for child in graph.node(node).children.clone() {
            Self::compile_statement(asm, graph, child)?;
        }
        // leaving the scope releases its variables so re-entry re-initializes
        asm.emit(
            OpCode::Call,
            Operands::UnsetVars(node),
            "unset scope variables",
        );
        Ok(())
    }

    fn compile_condition(asm: &mut Assembler, graph: &Graph, node: NodeId, exit: usize) -> Result<(), CompileError> {
        let condition = Self::slot(graph, node, slots::CONDITION)?;
        asm.emit(
            OpCode::Call,
            Operands::EvalMember(condition),
            "evaluate condition",
        );
        asm.emit(
            OpCode::Mov,
            Operands::Registers {
                dst: Register::Flag,
                src: Register::Acc,
            },
            "store condition",
        );
        asm.emit_jump(OpCode::Jne, exit, "skip when condition is false");
        Ok(())
    }

    fn compile_conditional(asm: &mut Assembler, graph: &Graph, node: NodeId) -> Result<(), CompileError> {
        let alternative = asm.new_label();
        Self::compile_condition(asm, graph, node, alternative)?;

        let branches = graph.node(node).children.clone();
        let [true_branch, rest @ ..] = branches.as_slice() else {
            return Err(CompileError::InvalidProgram);
        };
        Self::compile_statement(asm, graph, *true_branch)?;
        match rest {
            [] => asm.bind(alternative),
            [false_branch] => {
                let end = asm.new_label();
                asm.emit_jump(OpCode::Jmp, end, "jump over alternative");
                asm.bind(alternative);
                Self::compile_statement(asm, graph, *false_branch)?;
                asm.bind(end);
            }
            _ => return Err(CompileError::InvalidProgram),
        }
        Ok(())
    }

    fn compile_for_loop(asm: &mut Assembler, graph: &Graph, node: NodeId) -> Result<(), CompileError> {
        let init = Self::slot(graph, node, slots::INIT)?;
        asm.emit(OpCode::Call, Operands::EvalMember(init), "evaluate init");

        let check = asm.new_label();
        let exit = asm.new_label();
        asm.bind(check);
        Self::compile_condition(asm, graph, node, exit)?;

        let children = graph.node(node).children.clone();
        let [body] = children.as_slice() else {
            return Err(CompileError::InvalidProgram);
        };
        Self::compile_statement(asm, graph, *body)?;

        let iter = Self::slot(graph, node, slots::ITER)?;
        asm.emit(OpCode::Call, Operands::EvalMember(iter), "evaluate iteration");
        asm.emit_jump(OpCode::Jmp, check, "loop back to condition");
        asm.bind(exit);
        Ok(())
    }

    fn compile_while_loop(asm: &mut Assembler, graph: &Graph, node: NodeId) -> Result<(), CompileError> {
        let check = asm.new_label();
        let exit = asm.new_label();
        asm.bind(check);
        Self::compile_condition(asm, graph, node, exit)?;

        let children = graph.node(node).children.clone();
        let [body] = children.as_slice() else {
            return Err(CompileError::InvalidProgram);
        };
        Self::compile_statement(asm, graph, *body)?;

        asm.emit_jump(OpCode::Jmp, check, "loop back to condition");
        asm.bind(exit);
        Ok(())
    }

    fn slot(graph: &Graph, node: NodeId, name: &str) -> Result<MemberId, CompileError> {
        graph
            .member_named(node, name)
            .map_err(|_| CompileError::InvalidProgram)
    }

    fn producer_label(graph: &Graph, slot: MemberId) -> String {
        match graph.member(slot).input {
            Some(src) => graph.node(graph.member(src).owner).label(),
            None => "<unconnected>".to_string(),
        }
    }
}
