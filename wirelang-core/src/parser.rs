//! Source text to graph
//!
//! Two stages: a tokenizer driven by the language's ordered rule list, then a
//! backtracking recursive-descent pass that builds nodes through a
//! `NodeFactory`. Ignored characters (whitespace, comments) are folded into
//! token prefixes/suffixes so the serializer can re-print the source exactly.
//!
//! Grammar rules return `Ok(None)` after rolling the ribbon back when the
//! input is simply not theirs; semantic problems (duplicate declaration,
//! unknown identifier) abort the whole parse. A failed parse never leaks a
//! partial graph.

use crate::factory::{slots, NodeFactory};
use crate::graph::{Graph, MemberId, NodeId, NodeKind};
use crate::language::{Arity, Language, Token, TokenKind};
use crate::reflection::TypeRegistry;
use crate::value::{Value, ValueData};
use std::fmt;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnexpectedToken { found: String, expected: &'static str },
    UnexpectedEof { expected: &'static str },
    DuplicateDeclaration { name: String },
    UnknownIdentifier { name: String },
}

/// A syntax or naming error, located by byte offset in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ParseErrorKind::UnexpectedToken { found, expected } => write!(
                f,
                "syntax error at offset {}: expected {expected}, found '{found}'",
                self.offset
            ),
            ParseErrorKind::UnexpectedEof { expected } => write!(
                f,
                "syntax error at offset {}: expected {expected}, found end of input",
                self.offset
            ),
            ParseErrorKind::DuplicateDeclaration { name } => write!(
                f,
                "syntax error at offset {}: '{name}' is already declared in this scope",
                self.offset
            ),
            ParseErrorKind::UnknownIdentifier { name } => write!(
                f,
                "syntax error at offset {}: unknown identifier '{name}'",
                self.offset
            ),
        }
    }
}

impl std::error::Error for ParseError {}

/// Split `source` into tokens using the language's rule list.
///
/// First matching rule wins. Ignored text is appended to the previous token's
/// suffix, or kept as the next token's prefix when nothing precedes it.
pub fn tokenize(language: &Language, source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut pending_prefix = String::new();
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let hit = language
            .rules()
            .iter()
            .find_map(|(regex, kind)| regex.find(rest).map(|m| (m.end(), *kind)));
        let Some((len, kind)) = hit else {
            let found = rest.chars().next().map(String::from).unwrap_or_default();
            return Err(ParseError {
                kind: ParseErrorKind::UnexpectedToken { found, expected: "a token" },
                offset: pos,
            });
        };
        let word = &rest[..len];
        if kind == TokenKind::Ignore {
            match tokens.last_mut() {
                Some(previous) => previous.suffix.push_str(word),
                None => pending_prefix.push_str(word),
            }
        } else {
            let mut token = Token::new(kind, word, pos);
            token.prefix = std::mem::take(&mut pending_prefix);
            tokens.push(token);
        }
        pos += len;
    }
    Ok(tokens)
}

/// Token stream with nested transactions.
///
/// `start_transaction`/`rollback` let grammar rules try an interpretation and
/// restore the cursor when it does not pan out.
struct TokenRibbon {
    tokens: Vec<Token>,
    cursor: usize,
    transactions: Vec<usize>,
}

impl TokenRibbon {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            cursor: 0,
            transactions: Vec::new(),
        }
    }

    fn can_eat(&self, count: usize) -> bool {
        self.cursor + count <= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn peek_at(&self, distance: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + distance)
    }

    fn eat(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn eat_if(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek().map(|token| token.kind) == Some(kind) {
            self.eat()
        } else {
            None
        }
    }

    fn start_transaction(&mut self) {
        self.transactions.push(self.cursor);
    }

    fn commit(&mut self) {
        self.transactions.pop();
    }

    fn rollback(&mut self) {
        if let Some(saved) = self.transactions.pop() {
            self.cursor = saved;
        }
    }

    /// Offset to report an error at: the current token, or just past the end.
    fn offset(&self) -> usize {
        match self.peek() {
            Some(token) => token.offset,
            None => self
                .tokens
                .last()
                .map(|token| token.offset + token.word.len())
                .unwrap_or(0),
        }
    }
}

/// Mutable parse state threaded through the grammar rules.
struct Session {
    graph: Graph,
    ribbon: TokenRibbon,
    scopes: Vec<NodeId>,
}

impl Session {
    fn scope(&self) -> NodeId {
        *self.scopes.last().expect("scope stack holds at least the program")
    }
}

/// A parsed expression: the member producing its value, plus the source
/// token of a bare variable reference. Reference tokens travel with the
/// expression and land on the consuming slot, so each usage site keeps its
/// own surrounding whitespace even though all references share one member.
type ParsedExpr = (MemberId, Option<Token>);

/// Recursive-descent parser producing a graph through a `NodeFactory`.
pub struct Parser<'a> {
    language: &'a Language,
    registry: &'a TypeRegistry,
    factory: &'a dyn NodeFactory,
}

impl<'a> Parser<'a> {
    pub fn new(
        language: &'a Language,
        registry: &'a TypeRegistry,
        factory: &'a dyn NodeFactory,
    ) -> Self {
        Self {
            language,
            registry,
            factory,
        }
    }

    /// Parse a whole program. The returned graph's root is the program node.
    pub fn parse(&self, source: &str) -> Result<Graph, ParseError> {
        let tokens = tokenize(self.language, source)?;
        if tokens.is_empty() {
            return Err(ParseError {
                kind: ParseErrorKind::UnexpectedEof { expected: "a statement" },
                offset: 0,
            });
        }
        trace!(token_count = tokens.len(), "tokenized");

        let mut graph = Graph::new();
        let program = self.factory.new_program(&mut graph);
        let mut session = Session {
            graph,
            ribbon: TokenRibbon::new(tokens),
            scopes: vec![program],
        };

        self.parse_block_contents(&mut session, program)?;
        if session.ribbon.can_eat(1) {
            return Err(self.unexpected(&session, "a statement"));
        }
        Ok(session.graph)
    }

    // -- statements -------------------------------------------------------

    fn parse_block_contents(&self, s: &mut Session, parent: NodeId) -> Result<(), ParseError> {
        while s.ribbon.peek().is_some_and(|token| token.kind != TokenKind::EndScope) {
            if self.parse_conditional(s, parent)?.is_some()
                || self.parse_for_loop(s, parent)?.is_some()
                || self.parse_while_loop(s, parent)?.is_some()
                || self.parse_scope(s, parent)?.is_some()
                || self.parse_instruction(s, parent)?.is_some()
            {
                continue;
            }
            return Err(self.unexpected(s, "a statement"));
        }
        Ok(())
    }

    fn parse_instruction(&self, s: &mut Session, parent: NodeId) -> Result<Option<NodeId>, ParseError> {
        let Some(expr) = self.parse_expression(s, 0, None)? else {
            return Ok(None);
        };
        let end_token = s.ribbon.eat_if(TokenKind::EndOfInstruction);
        let instr = self.factory.new_instruction(&mut s.graph);
        if let NodeKind::Instruction { end_token: slot } = &mut s.graph.node_mut(instr).kind {
            *slot = end_token;
        }
        let root = self.slot(&s.graph, instr, slots::ROOT);
        self.connect(s, expr.clone(), root);
        s.graph.add_child(parent, instr);

        // a declaration remembers the instruction it appeared in, so the
        // serializer re-prints the `type name` form there and a bare name
        // everywhere else
        let producer = s.graph.member(expr.0).owner;
        if let NodeKind::Variable(info) = &mut s.graph.node_mut(producer).kind {
            if info.declaration.is_none() && info.type_token.is_some() {
                info.declaration = Some(instr);
            }
        }
        Ok(Some(instr))
    }

    fn parse_scope(&self, s: &mut Session, parent: NodeId) -> Result<Option<NodeId>, ParseError> {
        let Some(begin_token) = s.ribbon.eat_if(TokenKind::BeginScope) else {
            return Ok(None);
        };
        let node = self.factory.new_scope(&mut s.graph);
        s.graph.add_child(parent, node);
        s.scopes.push(node);
        self.parse_block_contents(s, node)?;
        s.scopes.pop();
        let Some(end_token) = s.ribbon.eat_if(TokenKind::EndScope) else {
            return Err(self.unexpected(s, "'}'"));
        };
        if let Some(scope) = s.graph.node_mut(node).scope.as_mut() {
            scope.begin_token = Some(begin_token);
            scope.end_token = Some(end_token);
        }
        Ok(Some(node))
    }

    fn parse_conditional(&self, s: &mut Session, parent: NodeId) -> Result<Option<NodeId>, ParseError> {
        let Some(if_token) = s.ribbon.eat_if(TokenKind::KeywordIf) else {
            return Ok(None);
        };
        self.expect(s, TokenKind::OpenParen, "'('")?;
        let Some(condition) = self.parse_expression(s, 0, None)? else {
            return Err(self.unexpected(s, "a condition"));
        };
        self.expect(s, TokenKind::CloseParen, "')'")?;

        let node = self.factory.new_conditional(&mut s.graph);
        s.graph.add_child(parent, node);
        let condition_slot = self.slot(&s.graph, node, slots::CONDITION);
        self.connect(s, condition, condition_slot);


        if self.parse_scope(s, node)?.is_none() {
            return Err(self.unexpected(s, "'{'"));
        }
        let else_token = s.ribbon.eat_if(TokenKind::KeywordElse);
        if else_token.is_some() {
            // either a plain else scope or a chained `else if`
            if self.parse_conditional(s, node)?.is_none() && self.parse_scope(s, node)?.is_none() {
                return Err(self.unexpected(s, "'{' or 'if'"));
            }
        }
        if let NodeKind::Conditional {
            if_token: if_slot,
            else_token: else_slot,
        } = &mut s.graph.node_mut(node).kind
        {
            *if_slot = Some(if_token);
            *else_slot = else_token;
        }
        Ok(Some(node))
    }

    fn parse_for_loop(&self, s: &mut Session, parent: NodeId) -> Result<Option<NodeId>, ParseError> {
        let Some(for_token) = s.ribbon.eat_if(TokenKind::KeywordFor) else {
            return Ok(None);
        };
        self.expect(s, TokenKind::OpenParen, "'('")?;

        let node = self.factory.new_for_loop(&mut s.graph);
        s.graph.add_child(parent, node);
        if let NodeKind::ForLoop { for_token: slot } = &mut s.graph.node_mut(node).kind {
            *slot = Some(for_token);
        }

        for (name, terminator, expected) in [
            (slots::INIT, Some(TokenKind::EndOfInstruction), "';'"),
            (slots::CONDITION, Some(TokenKind::EndOfInstruction), "';'"),
            (slots::ITER, None, "')'"),
        ] {
            let Some(expr) = self.parse_expression(s, 0, None)? else {
                return Err(self.unexpected(s, "an expression"));
            };
            let dst = self.slot(&s.graph, node, name);
            self.connect(s, expr, dst);
            if let Some(kind) = terminator {
                self.expect(s, kind, expected)?;
            }
        }
        self.expect(s, TokenKind::CloseParen, "')'")?;

        if self.parse_scope(s, node)?.is_none() {
            return Err(self.unexpected(s, "'{'"));
        }
        Ok(Some(node))
    }

    fn parse_while_loop(&self, s: &mut Session, parent: NodeId) -> Result<Option<NodeId>, ParseError> {
        let Some(while_token) = s.ribbon.eat_if(TokenKind::KeywordWhile) else {
            return Ok(None);
        };
        self.expect(s, TokenKind::OpenParen, "'('")?;
        let Some(condition) = self.parse_expression(s, 0, None)? else {
            return Err(self.unexpected(s, "a condition"));
        };
        self.expect(s, TokenKind::CloseParen, "')'")?;

        let node = self.factory.new_while_loop(&mut s.graph);
        s.graph.add_child(parent, node);
        if let NodeKind::WhileLoop { while_token: slot } = &mut s.graph.node_mut(node).kind {
            *slot = Some(while_token);
        }
        let condition_slot = self.slot(&s.graph, node, slots::CONDITION);
        self.connect(s, condition, condition_slot);

        if self.parse_scope(s, node)?.is_none() {
            return Err(self.unexpected(s, "'{'"));
        }
        Ok(Some(node))
    }

    // -- expressions ------------------------------------------------------

    /// Parse an expression, returning the member that produces its value.
    ///
    /// `left_override` feeds an already-parsed left side back in so binary
    /// chains associate left (`a - b - c` is `(a - b) - c`).
    fn parse_expression(
        &self,
        s: &mut Session,
        min_precedence: u8,
        left_override: Option<ParsedExpr>,
    ) -> Result<Option<ParsedExpr>, ParseError> {
        let left = match left_override {
            Some(expr) => Some(expr),
            None => self.parse_operand(s)?,
        };
        let Some(left) = left else {
            return Ok(None);
        };
        match self.parse_binary(s, min_precedence, left.clone())? {
            Some(result) => self.parse_expression(s, min_precedence, Some(result)),
            None => Ok(Some(left)),
        }
    }

    fn parse_operand(&self, s: &mut Session) -> Result<Option<ParsedExpr>, ParseError> {
        if let Some(member) = self.parse_parenthesized(s)? {
            return Ok(Some(member));
        }
        if let Some(member) = self.parse_unary(s)? {
            return Ok(Some(member));
        }
        if let Some(member) = self.parse_function_call(s)? {
            return Ok(Some(member));
        }
        if let Some(member) = self.parse_variable_declaration(s)? {
            return Ok(Some(member));
        }
        self.parse_atom(s)
    }

    fn parse_binary(
        &self,
        s: &mut Session,
        min_precedence: u8,
        left: ParsedExpr,
    ) -> Result<Option<ParsedExpr>, ParseError> {
        let Some(token) = s.ribbon.peek() else {
            return Ok(None);
        };
        if token.kind != TokenKind::Operator {
            return Ok(None);
        }
        let Some(op) = self.language.find_operator(&token.word, Arity::Binary).cloned() else {
            return Ok(None);
        };
        // yield to the caller's operator when it binds at least as tight;
        // precedence 0 (assignment) always proceeds, making it right-associative
        if op.precedence <= min_precedence && min_precedence > 0 {
            return Ok(None);
        }
        let token = s.ribbon.eat().expect("peeked token is present");

        let Some(right) = self.parse_expression(s, op.precedence, None)? else {
            return Err(self.unexpected(s, "an expression"));
        };
        let node = self.factory.new_binary_op(&mut s.graph, &op);
        if let NodeKind::BinaryOp { token: slot, .. } = &mut s.graph.node_mut(node).kind {
            *slot = Some(token);
        }
        let lvalue = self.slot(&s.graph, node, slots::LVALUE);
        let rvalue = self.slot(&s.graph, node, slots::RVALUE);
        self.connect(s, left, lvalue);
        self.connect(s, right, rvalue);
        Ok(Some((self.slot(&s.graph, node, slots::RESULT), None)))
    }

    fn parse_unary(&self, s: &mut Session) -> Result<Option<ParsedExpr>, ParseError> {
        if s.ribbon.peek().map(|token| token.kind) != Some(TokenKind::Operator) {
            return Ok(None);
        }
        s.ribbon.start_transaction();
        let Some(token) = s.ribbon.eat_if(TokenKind::Operator) else {
            s.ribbon.rollback();
            return Ok(None);
        };
        let Some(op) = self.language.find_operator(&token.word, Arity::Unary).cloned() else {
            s.ribbon.rollback();
            return Ok(None);
        };

        // unary binds a single operand, never a binary chain
        let operand = match self.parse_parenthesized(s)? {
            Some(member) => Some(member),
            None => match self.parse_unary(s)? {
                Some(member) => Some(member),
                None => match self.parse_function_call(s)? {
                    Some(member) => Some(member),
                    None => self.parse_atom(s)?,
                },
            },
        };
        let Some(operand) = operand else {
            return Err(self.unexpected(s, "an expression"));
        };
        s.ribbon.commit();

        let node = self.factory.new_unary_op(&mut s.graph, &op);
        if let NodeKind::UnaryOp { token: slot, .. } = &mut s.graph.node_mut(node).kind {
            *slot = Some(token);
        }
        let lvalue = self.slot(&s.graph, node, slots::LVALUE);
        self.connect(s, operand, lvalue);
        Ok(Some((self.slot(&s.graph, node, slots::RESULT), None)))
    }

    fn parse_parenthesized(&self, s: &mut Session) -> Result<Option<ParsedExpr>, ParseError> {
        if s.ribbon.eat_if(TokenKind::OpenParen).is_none() {
            return Ok(None);
        }
        let Some(expr) = self.parse_expression(s, 0, None)? else {
            return Err(self.unexpected(s, "an expression"));
        };
        self.expect(s, TokenKind::CloseParen, "')'")?;
        Ok(Some(expr))
    }

    fn parse_function_call(&self, s: &mut Session) -> Result<Option<ParsedExpr>, ParseError> {
        let is_call = s.ribbon.peek().map(|token| token.kind) == Some(TokenKind::Identifier)
            && s.ribbon.peek_at(1).map(|token| token.kind) == Some(TokenKind::OpenParen);
        if !is_call {
            return Ok(None);
        }
        s.ribbon.start_transaction();
        let name_token = s.ribbon.eat().expect("peeked token is present");
        s.ribbon.eat();

        let mut args = Vec::new();
        if s.ribbon.peek().map(|token| token.kind) != Some(TokenKind::CloseParen) {
            loop {
                let Some(arg) = self.parse_expression(s, 0, None)? else {
                    return Err(self.unexpected(s, "an expression"));
                };
                args.push(arg);
                if s.ribbon.eat_if(TokenKind::Separator).is_none() {
                    break;
                }
            }
        }
        self.expect(s, TokenKind::CloseParen, "')'")?;

        let Some(sig) = self.language.find_function(&name_token.word, args.len()).cloned() else {
            // not a known function; let the atom rule report the identifier
            s.ribbon.rollback();
            return Ok(None);
        };
        s.ribbon.commit();

        let node = self.factory.new_function(&mut s.graph, &sig);
        for ((arg_name, _), arg) in sig.args.iter().zip(args) {
            let dst = self.slot(&s.graph, node, arg_name);
            self.connect(s, arg, dst);
        }
        let result = self.slot(&s.graph, node, slots::RESULT);
        s.graph.member_mut(result).token = Some(name_token);
        Ok(Some((result, None)))
    }

    fn parse_variable_declaration(&self, s: &mut Session) -> Result<Option<ParsedExpr>, ParseError> {
        let is_declaration = s.ribbon.peek().map(|token| token.kind) == Some(TokenKind::KeywordType)
            && s.ribbon.peek_at(1).map(|token| token.kind) == Some(TokenKind::Identifier);
        if !is_declaration {
            return Ok(None);
        }
        let type_token = s.ribbon.eat().expect("peeked token is present");
        let identifier_token = s.ribbon.eat().expect("peeked token is present");
        let name = identifier_token.word.clone();

        let scope = s.scope();
        let already_declared = s
            .graph
            .node(scope)
            .scope
            .as_ref()
            .is_some_and(|table| table.variables.contains_key(&name));
        if already_declared {
            return Err(ParseError {
                kind: ParseErrorKind::DuplicateDeclaration { name },
                offset: identifier_token.offset,
            });
        }

        let ty = self
            .registry
            .id_of(&type_token.word)
            .expect("type keywords are registered");
        let var = self.factory.new_variable(&mut s.graph, ty, &name, scope);
        let value = self.slot(&s.graph, var, slots::VALUE);

        let mut assign_token = None;
        if s.ribbon.peek().is_some_and(|token| {
            token.kind == TokenKind::Operator && token.word == "="
        }) {
            assign_token = s.ribbon.eat();
            let Some(init) = self.parse_expression(s, 0, None)? else {
                return Err(self.unexpected(s, "an expression"));
            };
            self.connect(s, init, value);
        }
        if let NodeKind::Variable(info) = &mut s.graph.node_mut(var).kind {
            info.type_token = Some(type_token);
            info.identifier_token = Some(identifier_token);
            info.assign_token = assign_token;
        }
        Ok(Some((value, None)))
    }

    fn parse_atom(&self, s: &mut Session) -> Result<Option<ParsedExpr>, ParseError> {
        let Some(token) = s.ribbon.peek().cloned() else {
            return Ok(None);
        };
        match token.kind {
            TokenKind::LiteralDouble => {
                s.ribbon.eat();
                let number = token.word.parse::<f64>().unwrap_or(0.0);
                Ok(Some((self.make_literal(s, "double", ValueData::Double(number), token), None)))
            }
            TokenKind::LiteralBool => {
                s.ribbon.eat();
                let truth = token.word == "true";
                Ok(Some((self.make_literal(s, "bool", ValueData::Bool(truth), token), None)))
            }
            TokenKind::LiteralString => {
                s.ribbon.eat();
                let text = token.word[1..token.word.len() - 1].to_string();
                Ok(Some((self.make_literal(s, "string", ValueData::Str(text), token), None)))
            }
            TokenKind::Identifier => {
                s.ribbon.eat();
                let Some(var) = s.graph.find_variable(s.scope(), &token.word) else {
                    return Err(ParseError {
                        kind: ParseErrorKind::UnknownIdentifier { name: token.word },
                        offset: token.offset,
                    });
                };
                let value = self.slot(&s.graph, var, slots::VALUE);
                Ok(Some((value, Some(token))))
            }
            _ => Ok(None),
        }
    }

    // -- helpers ----------------------------------------------------------

    fn make_literal(&self, s: &mut Session, ty: &str, data: ValueData, token: Token) -> MemberId {
        let ty = self.registry.id_of(ty).expect("primitives are registered");
        let node = self.factory.new_literal(&mut s.graph, ty);
        let value = self.slot(&s.graph, node, slots::VALUE);
        let member = s.graph.member_mut(value);
        member.value = Value::from_data(data);
        member.token = Some(token);
        value
    }

    fn slot(&self, graph: &Graph, node: NodeId, name: &str) -> MemberId {
        graph.member_named(node, name).expect("factory pre-wires members")
    }

    /// Connect an expression's producer into `dst`, parking a reference
    /// token (if the expression is a bare variable) on the consuming slot.
    fn connect(&self, s: &mut Session, src: ParsedExpr, dst: MemberId) {
        s.graph
            .connect(src.0, dst)
            .expect("factory members have compatible ways");
        s.graph.member_mut(dst).token = src.1;
    }

    fn expect(
        &self,
        s: &mut Session,
        kind: TokenKind,
        expected: &'static str,
    ) -> Result<Token, ParseError> {
        match s.ribbon.eat_if(kind) {
            Some(token) => Ok(token),
            None => Err(self.unexpected(s, expected)),
        }
    }

    fn unexpected(&self, s: &Session, expected: &'static str) -> ParseError {
        match s.ribbon.peek() {
            Some(token) => ParseError {
                kind: ParseErrorKind::UnexpectedToken {
                    found: token.word.clone(),
                    expected,
                },
                offset: token.offset,
            },
            None => ParseError {
                kind: ParseErrorKind::UnexpectedEof { expected },
                offset: s.ribbon.offset(),
            },
        }
    }
}
