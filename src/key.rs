//! Identity keys for types, members and proxy cache entries.

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;

/// Identity of a type in the interception model.
///
/// Concrete types compare by `TypeId` only (the name is carried for
/// diagnostics). Generic parameters of a generic member are keyed by their
/// position, so `fn echo<T>(value: T)` has the single parameter
/// `TypeKey::GenericParam(0)`.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::TypeKey;
///
/// let a = TypeKey::of::<i32>();
/// assert_eq!(a, TypeKey::of::<i32>());
/// assert_ne!(a, TypeKey::of::<u32>());
/// assert_eq!(a.name(), "i32");
///
/// trait Clock: Send + Sync {}
/// let t = TypeKey::of::<dyn Clock>();
/// assert!(t.name().contains("Clock"));
/// ```
#[derive(Debug, Clone, Copy)]
pub enum TypeKey {
    /// Concrete type (including trait objects) with TypeId and name
    Type(TypeId, &'static str),
    /// Generic parameter by position within the member's generic list
    GenericParam(usize),
}

impl TypeKey {
    /// Key for a Rust type.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeKey::Type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// Key for the generic parameter at `position`.
    pub fn generic(position: usize) -> Self {
        TypeKey::GenericParam(position)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            TypeKey::Type(_, name) => name,
            TypeKey::GenericParam(_) => "<generic>",
        }
    }

    /// True for the unit type, which classifies as a no-value return.
    pub fn is_unit(&self) -> bool {
        matches!(self, TypeKey::Type(id, _) if *id == TypeId::of::<()>())
    }
}

impl PartialEq for TypeKey {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeKey::Type(a, _), TypeKey::Type(b, _)) => a == b,
            (TypeKey::GenericParam(a), TypeKey::GenericParam(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    #[inline(always)]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            TypeKey::Type(id, _) => {
                0u8.hash(state);
                id.hash(state);
            }
            TypeKey::GenericParam(position) => {
                1u8.hash(state);
                position.hash(state);
            }
        }
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKey::Type(_, name) => f.write_str(name),
            TypeKey::GenericParam(position) => write!(f, "T{}", position),
        }
    }
}

/// Kind of member a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Method,
    /// Property read accessor
    Getter,
    /// Property write accessor
    Setter,
}

/// One parameter of a member signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamKey {
    pub ty: TypeKey,
    pub by_ref: bool,
}

/// Signature identity of a member.
///
/// Two members match when name, kind, generic arity and the full parameter
/// list (types and by-reference flags) are equal. This is the matching rule
/// used both for finding an implementation's override of a service member and
/// for collecting markers from base types and interfaces.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::MemberKey;
///
/// let add = MemberKey::method("add").param::<i32>().param::<i32>();
/// assert_eq!(add, MemberKey::method("add").param::<i32>().param::<i32>());
/// assert_ne!(add, MemberKey::method("add").param::<i64>().param::<i32>());
/// assert_eq!(add.to_string(), "add(i32, i32)");
///
/// let swap = MemberKey::method("swap").by_ref::<i32>().by_ref::<i32>();
/// assert_eq!(swap.by_ref_positions(), vec![0, 1]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberKey {
    name: Cow<'static, str>,
    kind: MemberKind,
    generic_arity: usize,
    params: Vec<ParamKey>,
}

impl MemberKey {
    /// Key for a method with no parameters yet.
    pub fn method(name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(name, MemberKind::Method)
    }

    /// Key for a property read accessor.
    pub fn getter(property: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(property, MemberKind::Getter)
    }

    /// Key for a property write accessor taking a `T`.
    pub fn setter<T: ?Sized + 'static>(property: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(property, MemberKind::Setter).param::<T>()
    }

    fn with_kind(name: impl Into<Cow<'static, str>>, kind: MemberKind) -> Self {
        Self {
            name: name.into(),
            kind,
            generic_arity: 0,
            params: Vec::new(),
        }
    }

    /// Appends a by-value parameter.
    pub fn param<T: ?Sized + 'static>(self) -> Self {
        self.push(TypeKey::of::<T>(), false)
    }

    /// Appends a by-reference parameter.
    pub fn by_ref<T: ?Sized + 'static>(self) -> Self {
        self.push(TypeKey::of::<T>(), true)
    }

    /// Appends a by-value parameter typed by the generic parameter at `position`.
    pub fn generic_param(self, position: usize) -> Self {
        self.push(TypeKey::generic(position), false)
    }

    /// Appends a parameter from an explicit key.
    pub fn push(mut self, ty: TypeKey, by_ref: bool) -> Self {
        self.params.push(ParamKey { ty, by_ref });
        self
    }

    /// Sets the number of generic parameters.
    pub fn generic(mut self, arity: usize) -> Self {
        self.generic_arity = arity;
        self
    }

    /// Member name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method, getter or setter.
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    /// Number of type parameters; zero for non-generic members.
    pub fn generic_arity(&self) -> usize {
        self.generic_arity
    }

    /// True for members with type parameters.
    pub fn is_generic(&self) -> bool {
        self.generic_arity > 0
    }

    /// Parameter list in declaration order.
    pub fn params(&self) -> &[ParamKey] {
        &self.params
    }

    /// Positions of by-reference parameters, ascending.
    pub fn by_ref_positions(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.by_ref)
            .map(|(i, _)| i)
            .collect()
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MemberKind::Method => {}
            MemberKind::Getter => f.write_str("get ")?,
            MemberKind::Setter => f.write_str("set ")?,
        }
        f.write_str(&self.name)?;
        if self.generic_arity > 0 {
            write!(f, "<{}>", self.generic_arity)?;
        }
        if self.kind == MemberKind::Getter && self.params.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if p.by_ref {
                f.write_str("&mut ")?;
            }
            write!(f, "{}", p.ty)?;
        }
        f.write_str(")")
    }
}

/// Memoization key for synthesized proxy types: (service type, implementation type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyCacheKey {
    pub service: TypeKey,
    pub implementation: TypeKey,
}

impl ProxyCacheKey {
    /// Key for a service/implementation pair.
    pub fn new(service: TypeKey, implementation: TypeKey) -> Self {
        Self { service, implementation }
    }
}

impl fmt::Display for ProxyCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.service, self.implementation)
    }
}
