//! Language definition
//!
//! Operator table, function table and token dictionary, consumed by the
//! parser and the serializer. Built once at startup and immutable after.
//!
//! Tokenization is an ordered `(regex, kind)` rule list, first match wins;
//! the list is runtime data so alternative dialects only need another
//! `Language` value.

use crate::reflection::{TypeId, TypeRegistry};
use crate::value::Value;
use regex::Regex;

/// Lexical category of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Whitespace and comments, folded into neighbor prefixes/suffixes.
    Ignore,
    KeywordIf,
    KeywordElse,
    KeywordFor,
    KeywordWhile,
    /// A type keyword (`double`, `string`, `bool`, `any`).
    KeywordType,
    LiteralBool,
    LiteralDouble,
    LiteralString,
    Identifier,
    Operator,
    OpenParen,
    CloseParen,
    BeginScope,
    EndScope,
    Separator,
    EndOfInstruction,
}

/// One source token, with the surrounding text it owns.
///
/// `prefix` and `suffix` carry ignored characters (whitespace, comments) so a
/// graph produced by parsing can be re-printed losslessly.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub word: String,
    pub prefix: String,
    pub suffix: String,
    /// Byte offset of `word` in the source text.
    pub offset: usize,
}

impl Token {
    pub fn new(kind: TokenKind, word: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            word: word.into(),
            prefix: String::new(),
            suffix: String::new(),
            offset,
        }
    }

    /// prefix + word + suffix, as it appeared in the source.
    pub fn render(&self, out: &mut String) {
        out.push_str(&self.prefix);
        out.push_str(&self.word);
        out.push_str(&self.suffix);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Unary,
    Binary,
}

/// One entry of the operator table.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub identifier: String,
    pub precedence: u8,
    pub arity: Arity,
}

impl Operator {
    fn new(identifier: &str, arity: Arity, precedence: u8) -> Self {
        Self {
            identifier: identifier.to_string(),
            precedence,
            arity,
        }
    }
}

/// Signature of a callable function (`pow(double, double) -> double`).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub identifier: String,
    pub args: Vec<(String, TypeId)>,
    pub return_type: TypeId,
}

/// A complete language: token rules + operator table + function table.
pub struct Language {
    rules: Vec<(Regex, TokenKind)>,
    operators: Vec<Operator>,
    functions: Vec<FunctionSig>,
}

impl Language {
    /// The default wirelang dialect.
    pub fn wirelang(registry: &TypeRegistry) -> Self {
        let rule = |pattern: &str, kind: TokenKind| {
            // anchored: rules only ever match at the cursor
            (Regex::new(&format!("^(?:{pattern})")).expect("token rule must compile"), kind)
        };

        let rules = vec![
            rule(r"[ \t\r\n]+", TokenKind::Ignore),
            rule(r"//[^\n]*", TokenKind::Ignore),
            rule(r"/\*(?s:.)*?\*/", TokenKind::Ignore),
            rule(r"if\b", TokenKind::KeywordIf),
            rule(r"else\b", TokenKind::KeywordElse),
            rule(r"for\b", TokenKind::KeywordFor),
            rule(r"while\b", TokenKind::KeywordWhile),
            rule(r"(?:double|string|bool|any)\b", TokenKind::KeywordType),
            rule(r"(?:true|false)\b", TokenKind::LiteralBool),
            rule(r"[0-9]+(?:\.[0-9]+)?", TokenKind::LiteralDouble),
            rule(r#""[^"]*""#, TokenKind::LiteralString),
            rule(r"[a-zA-Z_][a-zA-Z0-9_]*", TokenKind::Identifier),
            rule(r"==|!=|>=|<=|&&|\|\||[-+*/><=!]", TokenKind::Operator),
            rule(r"\(", TokenKind::OpenParen),
            rule(r"\)", TokenKind::CloseParen),
            rule(r"\{", TokenKind::BeginScope),
            rule(r"\}", TokenKind::EndScope),
            rule(r",", TokenKind::Separator),
            rule(r";", TokenKind::EndOfInstruction),
        ];

        let operators = vec![
            Operator::new("-", Arity::Unary, 5),
            Operator::new("!", Arity::Unary, 5),
            Operator::new("/", Arity::Binary, 20),
            Operator::new("*", Arity::Binary, 20),
            Operator::new("+", Arity::Binary, 10),
            Operator::new("-", Arity::Binary, 10),
            Operator::new("||", Arity::Binary, 10),
            Operator::new("&&", Arity::Binary, 10),
            Operator::new(">=", Arity::Binary, 10),
            Operator::new("<=", Arity::Binary, 10),
            Operator::new("==", Arity::Binary, 10),
            Operator::new("!=", Arity::Binary, 10),
            Operator::new(">", Arity::Binary, 10),
            Operator::new("<", Arity::Binary, 10),
            Operator::new("=", Arity::Binary, 0),
        ];

        let double = registry.id_of("double").expect("primitives registered");
        let functions = vec![
            FunctionSig {
                identifier: "pow".to_string(),
                args: vec![("base".to_string(), double), ("exp".to_string(), double)],
                return_type: double,
            },
            FunctionSig {
                identifier: "min".to_string(),
                args: vec![("lhs".to_string(), double), ("rhs".to_string(), double)],
                return_type: double,
            },
            FunctionSig {
                identifier: "max".to_string(),
                args: vec![("lhs".to_string(), double), ("rhs".to_string(), double)],
                return_type: double,
            },
        ];

        Self {
            rules,
            operators,
            functions,
        }
    }

    /// Ordered token rules; first match wins.
    pub fn rules(&self) -> &[(Regex, TokenKind)] {
        &self.rules
    }

    pub fn find_operator(&self, identifier: &str, arity: Arity) -> Option<&Operator> {
        self.operators
            .iter()
            .find(|op| op.arity == arity && op.identifier == identifier)
    }

    pub fn find_function(&self, identifier: &str, arg_count: usize) -> Option<&FunctionSig> {
        self.functions
            .iter()
            .find(|sig| sig.identifier == identifier && sig.args.len() == arg_count)
    }

    /// Canonical text of a structural token kind.
    pub fn canonical(&self, kind: TokenKind) -> &'static str {
        match kind {
            TokenKind::OpenParen => "(",
            TokenKind::CloseParen => ")",
            TokenKind::BeginScope => "{",
            TokenKind::EndScope => "}",
            TokenKind::Separator => ", ",
            TokenKind::EndOfInstruction => ";",
            TokenKind::KeywordIf => "if",
            TokenKind::KeywordElse => "else",
            TokenKind::KeywordFor => "for",
            TokenKind::KeywordWhile => "while",
            _ => "",
        }
    }

    /// Pure binary operator application (assignment is handled by the VM).
    pub fn apply_binary(&self, identifier: &str, lhs: &Value, rhs: &Value) -> Option<Value> {
        use crate::value::ValueData;

        let data = match identifier {
            "+" => {
                // string concatenation wins as soon as one side is a string
                if matches!(lhs.data(), ValueData::Str(_)) || matches!(rhs.data(), ValueData::Str(_)) {
                    ValueData::Str(format!("{}{}", lhs.to_display_string(), rhs.to_display_string()))
                } else {
                    ValueData::Double(lhs.as_double() + rhs.as_double())
                }
            }
            "-" => ValueData::Double(lhs.as_double() - rhs.as_double()),
            "*" => ValueData::Double(lhs.as_double() * rhs.as_double()),
            "/" => ValueData::Double(lhs.as_double() / rhs.as_double()),
            ">" => ValueData::Bool(lhs.as_double() > rhs.as_double()),
            "<" => ValueData::Bool(lhs.as_double() < rhs.as_double()),
            ">=" => ValueData::Bool(lhs.as_double() >= rhs.as_double()),
            "<=" => ValueData::Bool(lhs.as_double() <= rhs.as_double()),
            "==" => ValueData::Bool(equals(lhs, rhs)),
            "!=" => ValueData::Bool(!equals(lhs, rhs)),
            "&&" => ValueData::Bool(lhs.as_bool() && rhs.as_bool()),
            "||" => ValueData::Bool(lhs.as_bool() || rhs.as_bool()),
            _ => return None,
        };
        Some(wrap(data))
    }

    pub fn apply_unary(&self, identifier: &str, operand: &Value) -> Option<Value> {
        use crate::value::ValueData;

        let data = match identifier {
            "-" => ValueData::Double(-operand.as_double()),
            "!" => ValueData::Bool(!operand.as_bool()),
            _ => return None,
        };
        Some(wrap(data))
    }

    pub fn apply_function(&self, sig: &FunctionSig, args: &[Value]) -> Option<Value> {
        use crate::value::ValueData;

        let data = match (sig.identifier.as_str(), args) {
            ("pow", [base, exp]) => ValueData::Double(base.as_double().powf(exp.as_double())),
            ("min", [lhs, rhs]) => ValueData::Double(lhs.as_double().min(rhs.as_double())),
            ("max", [lhs, rhs]) => ValueData::Double(lhs.as_double().max(rhs.as_double())),
            _ => return None,
        };
        Some(wrap(data))
    }
}

/// Build an anonymous result value around computed data.
fn wrap(data: crate::value::ValueData) -> Value {
    Value::from_data(data)
}

fn equals(lhs: &Value, rhs: &Value) -> bool {
    use crate::value::ValueData;

    match (lhs.data(), rhs.data()) {
        (ValueData::Str(_), _) | (_, ValueData::Str(_)) => {
            lhs.to_display_string() == rhs.to_display_string()
        }
        (ValueData::Bool(_), _) | (_, ValueData::Bool(_)) => lhs.as_bool() == rhs.as_bool(),
        _ => lhs.as_double() == rhs.as_double(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn language() -> Language {
        Language::wirelang(&TypeRegistry::with_primitives())
    }

    #[test]
    fn test_operator_lookup_respects_arity() {
        let language = language();
        assert_eq!(language.find_operator("-", Arity::Unary).unwrap().precedence, 5);
        assert_eq!(language.find_operator("-", Arity::Binary).unwrap().precedence, 10);
        assert!(language.find_operator("**", Arity::Binary).is_none());
    }

    #[test]
    fn test_mul_binds_tighter_than_add() {
        let language = language();
        let mul = language.find_operator("*", Arity::Binary).unwrap();
        let add = language.find_operator("+", Arity::Binary).unwrap();
        let assign = language.find_operator("=", Arity::Binary).unwrap();
        assert!(mul.precedence > add.precedence);
        assert_eq!(assign.precedence, 0);
    }

    #[test]
    fn test_rules_are_anchored_and_ordered() {
        let language = language();
        // keyword rules must come before the identifier rule
        let keyword_pos = language
            .rules()
            .iter()
            .position(|(_, kind)| *kind == TokenKind::KeywordIf)
            .unwrap();
        let ident_pos = language
            .rules()
            .iter()
            .position(|(_, kind)| *kind == TokenKind::Identifier)
            .unwrap();
        assert!(keyword_pos < ident_pos);

        let (regex, _) = &language.rules()[keyword_pos];
        assert!(regex.find("if(x)").is_some());
        assert!(regex.find("  if").is_none(), "rules only match at the cursor");
    }

    #[test]
    fn test_string_concat_on_plus() {
        let language = language();
        let registry = TypeRegistry::with_primitives();
        let mut s = Value::undefined(registry.id_of("string").unwrap(), &registry);
        s.assign_str("n=").unwrap();
        let mut d = Value::undefined(registry.id_of("double").unwrap(), &registry);
        d.assign_double(4.0).unwrap();

        let result = language.apply_binary("+", &s, &d).unwrap();
        assert_eq!(result.to_display_string(), "n=4");
    }

    #[test]
    fn test_function_table() {
        let language = language();
        let sig = language.find_function("pow", 2).unwrap().clone();
        let registry = TypeRegistry::with_primitives();
        let mut a = Value::undefined(registry.id_of("double").unwrap(), &registry);
        a.assign_double(2.0).unwrap();
        let mut b = Value::undefined(registry.id_of("double").unwrap(), &registry);
        b.assign_double(10.0).unwrap();
        let result = language.apply_function(&sig, &[a, b]).unwrap();
        assert_eq!(result.as_double(), 1024.0);
    }
}
