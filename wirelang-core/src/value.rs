//! Typed value container
//!
//! A `Value` stores exactly one of double/bool/string/node-handle, coerced so
//! the active tag always matches the declared type. The write-coercion rules
//! live in one table (`coerce`) and match the legacy behavior exactly:
//! bool -> string gives `"true"`/`"false"`, bool -> double gives 1.0/0.0,
//! double -> string trims trailing zeros.

use crate::graph::NodeId;
use crate::reflection::{Primitive, TypeId, TypeRegistry};
use thiserror::Error;

/// Tagged storage of a `Value`.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    Double(f64),
    Bool(bool),
    Str(String),
    Ptr(NodeId),
}

impl ValueData {
    fn default_for(primitive: Primitive) -> Self {
        match primitive {
            Primitive::Bool => ValueData::Bool(false),
            Primitive::Str => ValueData::Str(String::new()),
            Primitive::NodePtr => ValueData::Ptr(NodeId::INVALID),
            // any/void/i16/double all store a double by default
            _ => ValueData::Double(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error("cannot convert a {from} into a {to}")]
    IncompatibleConversion { from: &'static str, to: &'static str },
}

/// Format a double the way the language prints it: no trailing zeros,
/// integral values without a decimal point.
pub fn format_double(value: f64) -> String {
    if value == f64::trunc(value) && value.is_finite() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Coerce incoming data into the storage expected by `target`.
///
/// One `(source tag, target tag)` table instead of per-operation switches.
fn coerce(target: Primitive, incoming: ValueData) -> Result<ValueData, TypeError> {
    match (incoming, target) {
        // identity
        (data @ ValueData::Double(_), Primitive::Double | Primitive::I16 | Primitive::Any | Primitive::Void) => Ok(data),
        (data @ ValueData::Bool(_), Primitive::Bool) => Ok(data),
        (data @ ValueData::Str(_), Primitive::Str) => Ok(data),
        (data @ ValueData::Ptr(_), Primitive::NodePtr) => Ok(data),

        // to double
        (ValueData::Bool(b), Primitive::Double | Primitive::I16) => {
            Ok(ValueData::Double(if b { 1.0 } else { 0.0 }))
        }
        (ValueData::Str(s), Primitive::Double | Primitive::I16) => {
            // legacy rule: a string converts to its character count
            Ok(ValueData::Double(s.chars().count() as f64))
        }

        // to bool
        (ValueData::Double(d), Primitive::Bool) => Ok(ValueData::Bool(d != 0.0)),
        (ValueData::Str(s), Primitive::Bool) => Ok(ValueData::Bool(!s.is_empty())),

        // to string
        (ValueData::Double(d), Primitive::Str) => Ok(ValueData::Str(format_double(d))),
        (ValueData::Bool(b), Primitive::Str) => {
            Ok(ValueData::Str(if b { "true" } else { "false" }.to_string()))
        }

        // `any` storage keeps whatever arrives
        (data, Primitive::Any | Primitive::Void) => Ok(data),

        (ValueData::Ptr(_), _) => Err(TypeError::IncompatibleConversion { from: "node", to: target_name(target) }),
        (incoming, _) => Err(TypeError::IncompatibleConversion {
            from: data_name(&incoming),
            to: target_name(target),
        }),
    }
}

fn data_name(data: &ValueData) -> &'static str {
    match data {
        ValueData::Double(_) => "double",
        ValueData::Bool(_) => "bool",
        ValueData::Str(_) => "string",
        ValueData::Ptr(_) => "node",
    }
}

fn target_name(primitive: Primitive) -> &'static str {
    match primitive {
        Primitive::Any => "any",
        Primitive::Void => "void",
        Primitive::Bool => "bool",
        Primitive::I16 => "i16",
        Primitive::Double => "double",
        Primitive::Str => "string",
        Primitive::NodePtr => "node",
    }
}

/// A typed value owned by a graph member.
///
/// `defined` tracks whether anything was ever assigned; undefining keeps the
/// storage (and its tag) in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    ty: TypeId,
    primitive: Primitive,
    data: ValueData,
    defined: bool,
}

impl Value {
    /// Undefined value of the given declared type.
    pub fn undefined(ty: TypeId, registry: &TypeRegistry) -> Self {
        let primitive = registry.primitive_of(ty);
        Self {
            ty,
            primitive,
            data: ValueData::default_for(primitive),
            defined: false,
        }
    }

    /// Defined value whose declared type matches the data's tag.
    pub fn from_data(data: ValueData) -> Self {
        let (name, primitive) = match &data {
            ValueData::Double(_) => ("double", Primitive::Double),
            ValueData::Bool(_) => ("bool", Primitive::Bool),
            ValueData::Str(_) => ("string", Primitive::Str),
            ValueData::Ptr(_) => ("node", Primitive::NodePtr),
        };
        Self {
            ty: TypeId::of(name),
            primitive,
            data,
            defined: true,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.ty
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    pub fn data(&self) -> &ValueData {
        &self.data
    }

    pub fn is_defined(&self) -> bool {
        self.defined
    }

    /// Mark defined without touching the stored data.
    pub fn define(&mut self) {
        self.defined = true;
    }

    pub fn undefine(&mut self) {
        self.defined = false;
    }

    /// Change the declared type; resets to that type's default when it
    /// actually changes.
    pub fn set_type(&mut self, ty: TypeId, registry: &TypeRegistry) {
        let primitive = registry.primitive_of(ty);
        if primitive != self.primitive {
            self.data = ValueData::default_for(primitive);
            self.defined = false;
        }
        self.ty = ty;
        self.primitive = primitive;
    }

    /// Assign raw data, coerced to the declared type.
    pub fn assign(&mut self, data: ValueData) -> Result<(), TypeError> {
        self.data = coerce(self.primitive, data)?;
        self.defined = true;
        Ok(())
    }

    pub fn assign_double(&mut self, value: f64) -> Result<(), TypeError> {
        self.assign(ValueData::Double(value))
    }

    pub fn assign_bool(&mut self, value: bool) -> Result<(), TypeError> {
        self.assign(ValueData::Bool(value))
    }

    pub fn assign_str(&mut self, value: impl Into<String>) -> Result<(), TypeError> {
        self.assign(ValueData::Str(value.into()))
    }

    /// Copy another value's data in, coercing to our declared type.
    pub fn assign_value(&mut self, other: &Value) -> Result<(), TypeError> {
        if !other.defined {
            self.undefine();
            return Ok(());
        }
        self.assign(other.data.clone())
    }

    // read conversions, same table as writes

    pub fn as_double(&self) -> f64 {
        match &self.data {
            ValueData::Double(d) => *d,
            ValueData::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ValueData::Str(s) => s.chars().count() as f64,
            ValueData::Ptr(_) => 0.0,
        }
    }

    pub fn as_bool(&self) -> bool {
        match &self.data {
            ValueData::Double(d) => *d != 0.0,
            ValueData::Bool(b) => *b,
            ValueData::Str(s) => !s.is_empty(),
            ValueData::Ptr(id) => *id != NodeId::INVALID,
        }
    }

    pub fn to_display_string(&self) -> String {
        match &self.data {
            ValueData::Double(d) => format_double(*d),
            ValueData::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            ValueData::Str(s) => s.clone(),
            ValueData::Ptr(id) => format!("[node {}]", id.index()),
        }
    }

    /// Keyword naming the declared primitive.
    pub fn type_label(&self) -> &'static str {
        target_name(self.primitive)
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match &self.data {
            ValueData::Ptr(id) if *id != NodeId::INVALID => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of(name: &str, registry: &TypeRegistry) -> Value {
        Value::undefined(registry.id_of(name).unwrap(), registry)
    }

    #[test]
    fn test_bool_to_string_coercion() {
        let registry = TypeRegistry::with_primitives();
        let mut value = value_of("string", &registry);
        value.assign_bool(true).unwrap();
        assert_eq!(value.data(), &ValueData::Str("true".to_string()));
        value.assign_bool(false).unwrap();
        assert_eq!(value.data(), &ValueData::Str("false".to_string()));
    }

    #[test]
    fn test_bool_to_double_coercion() {
        let registry = TypeRegistry::with_primitives();
        let mut value = value_of("double", &registry);
        value.assign_bool(true).unwrap();
        assert_eq!(value.data(), &ValueData::Double(1.0));
        value.assign_bool(false).unwrap();
        assert_eq!(value.data(), &ValueData::Double(0.0));
    }

    #[test]
    fn test_double_to_string_trims_zeros() {
        assert_eq!(format_double(50.0), "50");
        assert_eq!(format_double(0.0), "0");
        assert_eq!(format_double(1.5), "1.5");
        assert_eq!(format_double(-3.0), "-3");
    }

    #[test]
    fn test_string_truthiness() {
        let registry = TypeRegistry::with_primitives();
        let mut value = value_of("string", &registry);
        value.assign_str("").unwrap();
        assert!(!value.as_bool());
        value.assign_str("x").unwrap();
        assert!(value.as_bool());
    }

    #[test]
    fn test_legacy_string_to_double_is_length() {
        let registry = TypeRegistry::with_primitives();
        let mut value = value_of("double", &registry);
        value.assign_str("abcd").unwrap();
        assert_eq!(value.data(), &ValueData::Double(4.0));
    }

    #[test]
    fn test_undefine_keeps_storage_tag() {
        let registry = TypeRegistry::with_primitives();
        let mut value = value_of("double", &registry);
        value.assign_double(7.0).unwrap();
        value.undefine();
        assert!(!value.is_defined());
        assert_eq!(value.data(), &ValueData::Double(7.0));
    }

    #[test]
    fn test_set_type_resets_on_change() {
        let registry = TypeRegistry::with_primitives();
        let mut value = value_of("double", &registry);
        value.assign_double(7.0).unwrap();
        value.set_type(registry.id_of("string").unwrap(), &registry);
        assert!(!value.is_defined());
        assert_eq!(value.data(), &ValueData::Str(String::new()));
    }

    #[test]
    fn test_ptr_rejects_scalar_target() {
        let registry = TypeRegistry::with_primitives();
        let mut value = value_of("double", &registry);
        let err = value.assign(ValueData::Ptr(NodeId::INVALID)).unwrap_err();
        assert!(matches!(err, TypeError::IncompatibleConversion { .. }));
    }
}
