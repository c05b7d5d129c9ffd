//! Type registry and descriptors
//!
//! Types are registered once at startup, keyed by a stable name hash.
//! The registry is an explicit value passed by reference into the parser,
//! compiler and serializer; there is no global state.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use thiserror::Error;

/// Stable identifier for a registered type (FNV-1a hash of its name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u64);

impl TypeId {
    /// Hash a type name into its id.
    pub fn of(name: &str) -> Self {
        // FNV-1a, 64-bit
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in name.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        TypeId(hash)
    }
}

/// Primitive storage category of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// Wildcard, compatible with everything.
    Any,
    Void,
    Bool,
    /// Legacy narrow integer, implicitly widened to `Double`.
    I16,
    Double,
    Str,
    /// Handle to a graph node.
    NodePtr,
}

/// Immutable-after-registration type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub name: String,
    pub id: TypeId,
    pub primitive: Primitive,
    pub is_pointer: bool,
    pub is_reference: bool,
    pub is_const: bool,
    parents: BTreeSet<TypeId>,
    children: BTreeSet<TypeId>,
}

impl TypeInfo {
    fn new(name: &str, primitive: Primitive) -> Self {
        Self {
            name: name.to_string(),
            id: TypeId::of(name),
            primitive,
            is_pointer: matches!(primitive, Primitive::NodePtr),
            is_reference: false,
            is_const: false,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }

    /// Full display name, with const/pointer decorations.
    pub fn fullname(&self) -> String {
        let mut result = String::new();
        if self.is_const {
            result.push_str("const ");
        }
        result.push_str(&self.name);
        if self.is_pointer {
            result.push('*');
        } else if self.is_reference {
            result.push('&');
        }
        result
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflectionError {
    #[error("no type registered under hash {0:#x}")]
    NotFound(u64),
}

/// Registry of all known types.
///
/// Registration order is deterministic (base types before derived ones);
/// after startup the registry is only read.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    by_id: BTreeMap<TypeId, TypeInfo>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the language primitives.
    pub fn with_primitives() -> Self {
        let mut registry = Self::new();
        registry.register("any", Primitive::Any);
        registry.register("void", Primitive::Void);
        registry.register("bool", Primitive::Bool);
        registry.register("i16", Primitive::I16);
        registry.register("double", Primitive::Double);
        registry.register("string", Primitive::Str);
        registry.register("node", Primitive::NodePtr);
        registry
    }

    /// Create-or-return a descriptor for `name`.
    pub fn register(&mut self, name: &str, primitive: Primitive) -> TypeId {
        let id = TypeId::of(name);
        self.by_id.entry(id).or_insert_with(|| TypeInfo::new(name, primitive));
        id
    }

    pub fn get(&self, id: TypeId) -> Result<&TypeInfo, ReflectionError> {
        self.by_id.get(&id).ok_or(ReflectionError::NotFound(id.0))
    }

    pub fn contains(&self, id: TypeId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Link `parent` as a direct parent of `child`, in both directions.
    pub fn add_parent(&mut self, child: TypeId, parent: TypeId) -> Result<(), ReflectionError> {
        if !self.contains(child) {
            return Err(ReflectionError::NotFound(child.0));
        }
        if !self.contains(parent) {
            return Err(ReflectionError::NotFound(parent.0));
        }
        self.by_id.get_mut(&child).unwrap().parents.insert(parent);
        self.by_id.get_mut(&parent).unwrap().children.insert(child);
        Ok(())
    }

    /// Transitive closure over parents.
    ///
    /// Checks self (when `include_self`), then direct parents, then recurses
    /// into each parent.
    pub fn is_child_of(&self, ty: TypeId, maybe_parent: TypeId, include_self: bool) -> bool {
        if include_self && ty == maybe_parent {
            return true;
        }
        let Ok(info) = self.get(ty) else {
            return false;
        };
        if info.parents.is_empty() {
            return false;
        }
        if info.parents.contains(&maybe_parent) {
            return true;
        }
        info.parents
            .iter()
            .any(|parent| self.is_child_of(*parent, maybe_parent, true))
    }

    /// Legacy implicit conversion rule.
    ///
    /// Allowed when either side is `any`, when the underlying primitives are
    /// identical, when both are pointers, or for the i16 -> double widening.
    pub fn is_implicitly_convertible(&self, from: TypeId, to: TypeId) -> bool {
        let (Ok(lhs), Ok(rhs)) = (self.get(from), self.get(to)) else {
            return false;
        };
        if lhs.primitive == Primitive::Any || rhs.primitive == Primitive::Any {
            return true;
        }
        if lhs.primitive == rhs.primitive {
            return true;
        }
        if lhs.is_pointer && rhs.is_pointer {
            return true;
        }
        lhs.primitive == Primitive::I16 && rhs.primitive == Primitive::Double
    }

    /// Resolve the id of a primitive keyword (`"double"`, `"string"`, ...).
    pub fn id_of(&self, name: &str) -> Option<TypeId> {
        let id = TypeId::of(name);
        self.contains(id).then_some(id)
    }

    /// Primitive category of a type, `Any` when unknown.
    pub fn primitive_of(&self, id: TypeId) -> Primitive {
        self.get(id).map(|info| info.primitive).unwrap_or(Primitive::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = TypeRegistry::new();
        let a = registry.register("double", Primitive::Double);
        let b = registry.register("double", Primitive::Double);
        assert_eq!(a, b);
        assert_eq!(registry.get(a).unwrap().name, "double");
    }

    #[test]
    fn test_unregistered_hash_fails() {
        let registry = TypeRegistry::with_primitives();
        let missing = TypeId::of("quaternion");
        assert_eq!(registry.get(missing), Err(ReflectionError::NotFound(missing.0)));
    }

    #[test]
    fn test_is_child_of_direct() {
        let mut registry = TypeRegistry::new();
        let base = registry.register("base", Primitive::Any);
        let derived = registry.register("derived", Primitive::Any);
        registry.add_parent(derived, base).unwrap();
        assert!(registry.is_child_of(derived, base, false));
        assert!(!registry.is_child_of(base, derived, false));
    }

    #[test]
    fn test_is_child_of_transitive() {
        let mut registry = TypeRegistry::new();
        let a = registry.register("a", Primitive::Any);
        let b = registry.register("b", Primitive::Any);
        let c = registry.register("c", Primitive::Any);
        registry.add_parent(b, a).unwrap();
        registry.add_parent(c, b).unwrap();
        assert!(registry.is_child_of(c, a, false));
    }

    #[test]
    fn test_self_check_requires_flag() {
        let mut registry = TypeRegistry::new();
        let a = registry.register("a", Primitive::Any);
        assert!(registry.is_child_of(a, a, true));
        assert!(!registry.is_child_of(a, a, false));
    }

    #[test]
    fn test_implicit_conversion_rules() {
        let registry = TypeRegistry::with_primitives();
        let any = registry.id_of("any").unwrap();
        let double = registry.id_of("double").unwrap();
        let string = registry.id_of("string").unwrap();
        let i16 = registry.id_of("i16").unwrap();

        assert!(registry.is_implicitly_convertible(any, string));
        assert!(registry.is_implicitly_convertible(double, any));
        assert!(registry.is_implicitly_convertible(double, double));
        assert!(registry.is_implicitly_convertible(i16, double));
        assert!(!registry.is_implicitly_convertible(double, i16));
        assert!(!registry.is_implicitly_convertible(string, double));
    }

    #[test]
    fn test_fullname_decorations() {
        let registry = TypeRegistry::with_primitives();
        let ptr = registry.id_of("node").unwrap();
        assert_eq!(registry.get(ptr).unwrap().fullname(), "node*");

        let mut info = TypeInfo::new("double", Primitive::Double);
        info.is_const = true;
        assert_eq!(info.fullname(), "const double");
    }
}
