//! Graph to source text
//!
//! The inverse of the parser: walks the graph and re-prints it. Tokens the
//! parser stored (keywords, identifiers, operators, braces, terminators) are
//! replayed with their original surrounding whitespace, so untouched subtrees
//! come back byte-identical. Parentheses and separators are printed in
//! canonical form and re-inserted wherever operator precedence requires them,
//! which also covers graphs that were built or edited without ever being
//! parsed.

use crate::factory::slots;
use crate::graph::{Graph, MemberId, NodeId, NodeKind};
use crate::language::{Language, Token, TokenKind};
use crate::value::ValueData;

pub struct Serializer<'a> {
    language: &'a Language,
    graph: &'a Graph,
}

impl<'a> Serializer<'a> {
    pub fn new(language: &'a Language, graph: &'a Graph) -> Self {
        Self { language, graph }
    }

    /// Print the whole program.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.graph.root() {
            for child in &self.graph.node(root).children {
                self.statement(&mut out, *child);
            }
        }
        out
    }

    /// Print a single expression rooted at `member`.
    pub fn serialize_member(&self, member: MemberId) -> String {
        let mut out = String::new();
        self.expression(&mut out, member);
        out
    }

    // -- statements -------------------------------------------------------

    fn statement(&self, out: &mut String, node: NodeId) {
        match &self.graph.node(node).kind {
            NodeKind::Instruction { end_token } => {
                self.instruction_body(out, node);
                self.token_or(out, end_token, TokenKind::EndOfInstruction);
            }
            NodeKind::Scope => self.scope(out, node),
            NodeKind::Conditional { if_token, else_token } => {
                self.conditional(out, node, if_token, else_token)
            }
            NodeKind::ForLoop { for_token } => self.for_loop(out, node, for_token),
            NodeKind::WhileLoop { while_token } => self.while_loop(out, node, while_token),
            _ => {}
        }
    }

    fn instruction_body(&self, out: &mut String, node: NodeId) {
        let Ok(root) = self.graph.member_named(node, slots::ROOT) else {
            return;
        };
        let Some(producer) = self.graph.member(root).input else {
            return;
        };
        // the declaring instruction prints the full `type name = init` form;
        // every other mention of the variable is a bare name
        let owner = self.graph.member(producer).owner;
        if let NodeKind::Variable(info) = &self.graph.node(owner).kind {
            if info.declaration == Some(node) {
                self.declaration(out, owner);
                return;
            }
        }
        self.input_member(out, root, false);
    }

    fn scope(&self, out: &mut String, node: NodeId) {
        let (begin, end) = match &self.graph.node(node).scope {
            Some(scope) => (scope.begin_token.clone(), scope.end_token.clone()),
            None => (None, None),
        };
        self.token_or(out, &begin, TokenKind::BeginScope);
        for child in &self.graph.node(node).children {
            self.statement(out, *child);
        }
        self.token_or(out, &end, TokenKind::EndScope);
    }

    fn conditional(
        &self,
        out: &mut String,
        node: NodeId,
        if_token: &Option<Token>,
        else_token: &Option<Token>,
    ) {
        self.token_or(out, if_token, TokenKind::KeywordIf);
        out.push_str(self.language.canonical(TokenKind::OpenParen));
        self.input(out, node, slots::CONDITION, false);
        out.push_str(self.language.canonical(TokenKind::CloseParen));

        let children = &self.graph.node(node).children;
        if let Some(true_branch) = children.first() {
            self.statement(out, *true_branch);
        }
        if let Some(alternative) = children.get(1) {
            self.token_or(out, else_token, TokenKind::KeywordElse);
            self.statement(out, *alternative);
        }
    }

    fn for_loop(&self, out: &mut String, node: NodeId, for_token: &Option<Token>) {
        self.token_or(out, for_token, TokenKind::KeywordFor);
        out.push_str(self.language.canonical(TokenKind::OpenParen));
        self.input(out, node, slots::INIT, true);
        out.push_str(self.language.canonical(TokenKind::EndOfInstruction));
        self.input(out, node, slots::CONDITION, false);
        out.push_str(self.language.canonical(TokenKind::EndOfInstruction));
        self.input(out, node, slots::ITER, false);
        out.push_str(self.language.canonical(TokenKind::CloseParen));
        if let Some(body) = self.graph.node(node).children.first() {
            self.statement(out, *body);
        }
    }

    fn while_loop(&self, out: &mut String, node: NodeId, while_token: &Option<Token>) {
        self.token_or(out, while_token, TokenKind::KeywordWhile);
        out.push_str(self.language.canonical(TokenKind::OpenParen));
        self.input(out, node, slots::CONDITION, false);
        out.push_str(self.language.canonical(TokenKind::CloseParen));
        if let Some(body) = self.graph.node(node).children.first() {
            self.statement(out, *body);
        }
    }

    fn declaration(&self, out: &mut String, var: NodeId) {
        let NodeKind::Variable(info) = &self.graph.node(var).kind else {
            return;
        };
        let Ok(value) = self.graph.member_named(var, slots::VALUE) else {
            return;
        };
        match &info.type_token {
            Some(token) => token.render(out),
            None => {
                out.push_str(self.graph.member(value).value.type_label());
                out.push(' ');
            }
        }
        match &info.identifier_token {
            Some(token) => token.render(out),
            None => out.push_str(&info.name),
        }
        if self.graph.member(value).input.is_some() {
            match &info.assign_token {
                Some(token) => token.render(out),
                None => out.push_str(" = "),
            }
            self.input_member(out, value, false);
        }
    }

    // -- expressions ------------------------------------------------------

    /// Print the expression feeding `node`'s input slot `name`.
    fn input(&self, out: &mut String, node: NodeId, name: &str, allow_declaration: bool) {
        if let Ok(slot) = self.graph.member_named(node, name) {
            self.input_member(out, slot, allow_declaration);
        }
    }

    fn input_member(&self, out: &mut String, slot: MemberId, allow_declaration: bool) {
        let Some(producer) = self.graph.member(slot).input else {
            return;
        };
        let owner = self.graph.member(producer).owner;
        if let NodeKind::Variable(info) = &self.graph.node(owner).kind {
            // a declaration sitting in a loop header keeps its full form
            if allow_declaration && info.declaration.is_none() && info.type_token.is_some() {
                self.declaration(out, owner);
                return;
            }
            // bare reference; its whitespace lives on the consuming slot
            let name = info.name.clone();
            self.wrapped(out, &self.graph.member(slot).token, &name);
            return;
        }
        self.expression(out, producer);
    }

    /// Print the expression produced by `member`.
    fn expression(&self, out: &mut String, member: MemberId) {
        let owner = self.graph.member(member).owner;
        match &self.graph.node(owner).kind {
            NodeKind::Literal => self.literal(out, member),
            NodeKind::Variable(info) => out.push_str(&info.name),
            NodeKind::BinaryOp { op, token } => {
                self.operand(out, owner, slots::LVALUE, Self::wrap_left(self.graph, owner, op.precedence));
                match token {
                    Some(token) => token.render(out),
                    None => {
                        out.push(' ');
                        out.push_str(&op.identifier);
                        out.push(' ');
                    }
                }
                self.operand(out, owner, slots::RVALUE, Self::wrap_right(self.graph, owner, op.precedence));
            }
            NodeKind::UnaryOp { op, token } => {
                match token {
                    Some(token) => token.render(out),
                    None => out.push_str(&op.identifier),
                }
                // a compound operand needs parentheses to keep binding
                let wrap = Self::slot_is_binary(self.graph, owner, slots::LVALUE).is_some();
                self.operand(out, owner, slots::LVALUE, wrap);
            }
            NodeKind::Function(sig) => {
                self.wrapped(out, &self.graph.member(member).token, &sig.identifier);
                out.push_str(self.language.canonical(TokenKind::OpenParen));
                for (position, (arg_name, _)) in sig.args.iter().enumerate() {
                    if position > 0 {
                        out.push_str(self.language.canonical(TokenKind::Separator));
                    }
                    self.input(out, owner, arg_name, false);
                }
                out.push_str(self.language.canonical(TokenKind::CloseParen));
            }
            _ => out.push_str(&self.graph.member(member).value.to_display_string()),
        }
    }

    fn operand(&self, out: &mut String, node: NodeId, name: &str, wrap: bool) {
        if wrap {
            out.push_str(self.language.canonical(TokenKind::OpenParen));
            self.input(out, node, name, false);
            out.push_str(self.language.canonical(TokenKind::CloseParen));
        } else {
            self.input(out, node, name, false);
        }
    }

    fn literal(&self, out: &mut String, member: MemberId) {
        let value = &self.graph.member(member).value;
        let text = match value.data() {
            ValueData::Str(s) => format!("\"{s}\""),
            _ => value.to_display_string(),
        };
        self.wrapped(out, &self.graph.member(member).token, &text);
    }

    /// Print `text` inside the stored token's whitespace, when there is one.
    fn wrapped(&self, out: &mut String, token: &Option<Token>, text: &str) {
        match token {
            Some(token) => {
                out.push_str(&token.prefix);
                out.push_str(text);
                out.push_str(&token.suffix);
            }
            None => out.push_str(text),
        }
    }

    fn token_or(&self, out: &mut String, token: &Option<Token>, kind: TokenKind) {
        match token {
            Some(token) => token.render(out),
            None => out.push_str(self.language.canonical(kind)),
        }
    }

    // a left operand keeps its parentheses only when it binds looser than
    // its parent; equal precedence re-associates left on its own
    fn wrap_left(graph: &Graph, node: NodeId, parent: u8) -> bool {
        matches!(Self::slot_is_binary(graph, node, slots::LVALUE), Some(inner) if inner < parent)
    }

    // on the right, equal precedence must be parenthesized to survive a
    // round trip (`a - (b - c)`); assignment chains are the exception. a
    // unary right operand is always bracketed (`7 - (-3)`)
    fn wrap_right(graph: &Graph, node: NodeId, parent: u8) -> bool {
        if Self::slot_is_unary(graph, node, slots::RVALUE) {
            return true;
        }
        matches!(Self::slot_is_binary(graph, node, slots::RVALUE), Some(inner) if parent > 0 && inner <= parent)
    }

    /// Precedence of the binary operator feeding `name`, if that is what
    /// the slot is connected to.
    fn slot_is_binary(graph: &Graph, node: NodeId, name: &str) -> Option<u8> {
        let slot = graph.member_named(node, name).ok()?;
        let producer = graph.member(slot).input?;
        match &graph.node(graph.member(producer).owner).kind {
            NodeKind::BinaryOp { op, .. } => Some(op.precedence),
            _ => None,
        }
    }

    fn slot_is_unary(graph: &Graph, node: NodeId, name: &str) -> bool {
        let Ok(slot) = graph.member_named(node, name) else {
            return false;
        };
        let Some(producer) = graph.member(slot).input else {
            return false;
        };
        matches!(
            graph.node(graph.member(producer).owner).kind,
            NodeKind::UnaryOp { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{BaseNodeFactory, NodeFactory};
    use crate::language::Arity;
    use crate::parser::Parser;
    use crate::reflection::TypeRegistry;

    fn round_trip(source: &str) -> String {
        let registry = TypeRegistry::with_primitives();
        let language = Language::wirelang(&registry);
        let factory = BaseNodeFactory::new(&registry);
        let graph = Parser::new(&language, &registry, &factory).parse(source).unwrap();
        Serializer::new(&language, &graph).serialize()
    }

    #[test]
    fn test_declaration_round_trips() {
        let source = "double bob = 50;";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_whitespace_and_comments_survive() {
        let source = "  double bob  =  50 ; // fifty\nbob + 1;";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_variable_reference_prints_bare_name() {
        let source = "string val = \"hi\";val;";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_conditional_round_trips() {
        let source = "double a = 1;if(a > 0){ a = 2; }else{ a = 3; }";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_for_loop_round_trips() {
        let source = "double n = 0;for(n = 0;n < 10;n = n + 1){ n; }";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_parentheses_reappear_where_precedence_needs_them() {
        let source = "double a = (1 + 2)*3;";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_redundant_parentheses_are_dropped() {
        assert_eq!(round_trip("double a = (1)+(2 * 3);"), "double a = 1+2 * 3;");
    }

    #[test]
    fn test_right_associative_subtraction_keeps_parens() {
        let source = "double a = 8 - (4 - 2);";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_assignment_chain_has_no_parens() {
        let source = "double a = 0;double b = 0;a = b = 2;";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_unary_over_compound_operand() {
        let source = "double a = -(1 + 2);double b = -a;";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_while_loop_round_trips() {
        let source = "double n = 0;while(n < 3){ n = n + 1; }";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_unary_right_operand_keeps_parens() {
        let source = "double a = 8 - (-3);";
        assert_eq!(round_trip(source), source);
        assert_eq!(round_trip("double a = 8 - -3;"), source);
    }

    #[test]
    fn test_function_call_round_trips() {
        let source = "double a = pow(2, 8);";
        assert_eq!(round_trip(source), source);
    }

    #[test]
    fn test_structural_graph_prints_canonically() {
        let registry = TypeRegistry::with_primitives();
        let language = Language::wirelang(&registry);
        let factory = BaseNodeFactory::new(&registry);
        let mut graph = Graph::new();
        let program = factory.new_program(&mut graph);

        let double = registry.id_of("double").unwrap();
        let lit = factory.new_literal(&mut graph, double);
        let lit_value = graph.member_named(lit, slots::VALUE).unwrap();
        graph.member_mut(lit_value).value = crate::value::Value::from_data(ValueData::Double(7.0));

        let op = language.find_operator("+", Arity::Binary).unwrap().clone();
        let add = factory.new_binary_op(&mut graph, &op);
        let lvalue = graph.member_named(add, slots::LVALUE).unwrap();
        let rvalue = graph.member_named(add, slots::RVALUE).unwrap();
        graph.connect(lit_value, lvalue).unwrap();
        graph.connect(lit_value, rvalue).unwrap();

        let instr = factory.new_instruction(&mut graph);
        let root = graph.member_named(instr, slots::ROOT).unwrap();
        let result = graph.member_named(add, slots::RESULT).unwrap();
        graph.connect(result, root).unwrap();
        graph.add_child(program, instr);

        assert_eq!(Serializer::new(&language, &graph).serialize(), "7 + 7;");
    }

    #[test]
    fn test_structural_unary_rvalue_is_bracketed() {
        let registry = TypeRegistry::with_primitives();
        let language = Language::wirelang(&registry);
        let factory = BaseNodeFactory::new(&registry);
        let mut graph = Graph::new();
        let program = factory.new_program(&mut graph);

        let double = registry.id_of("double").unwrap();
        let seven = factory.new_literal(&mut graph, double);
        let seven_value = graph.member_named(seven, slots::VALUE).unwrap();
        graph.member_mut(seven_value).value = crate::value::Value::from_data(ValueData::Double(7.0));
        let three = factory.new_literal(&mut graph, double);
        let three_value = graph.member_named(three, slots::VALUE).unwrap();
        graph.member_mut(three_value).value = crate::value::Value::from_data(ValueData::Double(3.0));

        let minus = language.find_operator("-", Arity::Unary).unwrap().clone();
        let negate = factory.new_unary_op(&mut graph, &minus);
        let negate_operand = graph.member_named(negate, slots::LVALUE).unwrap();
        let negate_result = graph.member_named(negate, slots::RESULT).unwrap();
        graph.connect(three_value, negate_operand).unwrap();

        let sub = language.find_operator("-", Arity::Binary).unwrap().clone();
        let subtract = factory.new_binary_op(&mut graph, &sub);
        let lvalue = graph.member_named(subtract, slots::LVALUE).unwrap();
        let rvalue = graph.member_named(subtract, slots::RVALUE).unwrap();
        let result = graph.member_named(subtract, slots::RESULT).unwrap();
        graph.connect(seven_value, lvalue).unwrap();
        graph.connect(negate_result, rvalue).unwrap();

        let instr = factory.new_instruction(&mut graph);
        let root = graph.member_named(instr, slots::ROOT).unwrap();
        graph.connect(result, root).unwrap();
        graph.add_child(program, instr);

        assert_eq!(Serializer::new(&language, &graph).serialize(), "7 - (-3);");
    }
}
