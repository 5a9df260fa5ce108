//! Declarative type model.
//!
//! Interception metadata is declared once at composition time through
//! [`TypeDescriptor`] and [`MemberDescriptor`] builders and never discovered
//! at runtime. A descriptor records what the planner needs to know about a
//! service or implementation type: its kind, inheritance (base class and
//! interfaces), the members it declares, and the interceptor markers placed
//! on each member.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::adapter::MethodTarget;
use crate::key::{MemberKey, TypeKey};
use crate::marker::InterceptorMarker;
use crate::registration::AnyArc;
use crate::synthesis::ProxyObject;

/// Kind of a described type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Interface,
    Class,
    /// Value types cannot be subclassed or proxied
    ValueType,
    /// The universal root every class implicitly extends
    Root,
}

/// Declared return type of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnType {
    Unit,
    Value(TypeKey),
    /// Future resolving to no value
    Future,
    /// Future resolving to a value of the given type
    FutureOf(TypeKey),
}

/// Maps a proxy object to the value consumers resolve for the service.
pub type Surface = Arc<dyn Fn(Arc<ProxyObject>) -> AnyArc + Send + Sync>;

/// One declared member (method or property accessor).
///
/// Members are virtual by default, matching the usual shape of service
/// contracts; call [`non_virtual`](Self::non_virtual) for members a subclass
/// cannot override.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::{MemberDescriptor, ReturnType, TypeKey};
///
/// let add = MemberDescriptor::method("add")
///     .param::<i32>()
///     .param::<i32>()
///     .returns::<i32>();
///
/// assert_eq!(add.key().to_string(), "add(i32, i32)");
/// assert_eq!(add.return_type(), ReturnType::Value(TypeKey::of::<i32>()));
/// assert!(add.is_virtual());
/// assert!(add.markers().is_empty());
/// ```
#[derive(Clone)]
pub struct MemberDescriptor {
    key: MemberKey,
    returns: ReturnType,
    markers: Vec<InterceptorMarker>,
    opt_out: bool,
    is_virtual: bool,
    is_abstract: bool,
    target: Option<MethodTarget>,
}

impl MemberDescriptor {
    /// Method member.
    pub fn method(name: &'static str) -> Self {
        Self::from_key(MemberKey::method(name))
    }

    /// Property getter member.
    pub fn getter(property: &'static str) -> Self {
        Self::from_key(MemberKey::getter(property))
    }

    /// Property setter member taking a `T`.
    pub fn setter<T: ?Sized + 'static>(property: &'static str) -> Self {
        Self::from_key(MemberKey::setter::<T>(property))
    }

    /// Member with an explicit identity.
    pub fn from_key(key: MemberKey) -> Self {
        Self {
            key,
            returns: ReturnType::Unit,
            markers: Vec::new(),
            opt_out: false,
            is_virtual: true,
            is_abstract: false,
            target: None,
        }
    }

    /// Appends a by-value parameter.
    pub fn param<T: ?Sized + 'static>(mut self) -> Self {
        self.key = self.key.param::<T>();
        self
    }

    /// Appends a by-reference parameter.
    pub fn by_ref<T: ?Sized + 'static>(mut self) -> Self {
        self.key = self.key.by_ref::<T>();
        self
    }

    /// Declares `arity` type parameters.
    pub fn generic(mut self, arity: usize) -> Self {
        self.key = self.key.generic(arity);
        self
    }

    /// Appends a parameter typed by the member's type parameter at `position`.
    pub fn generic_param(mut self, position: usize) -> Self {
        self.key = self.key.generic_param(position);
        self
    }

    /// Declares a synchronous return of `T`; `()` means no value.
    pub fn returns<T: ?Sized + 'static>(mut self) -> Self {
        let ty = TypeKey::of::<T>();
        self.returns = if ty.is_unit() {
            ReturnType::Unit
        } else {
            ReturnType::Value(ty)
        };
        self
    }

    /// Declares a future resolving to `T`; `()` means a future of no value.
    pub fn returns_future<T: ?Sized + 'static>(mut self) -> Self {
        let ty = TypeKey::of::<T>();
        self.returns = if ty.is_unit() {
            ReturnType::Future
        } else {
            ReturnType::FutureOf(ty)
        };
        self
    }

    /// Declares a return typed by the member's generic parameter at `position`.
    pub fn returns_generic(mut self, position: usize) -> Self {
        self.returns = ReturnType::Value(TypeKey::generic(position));
        self
    }

    /// Sets the return type directly.
    pub fn return_type_of(mut self, returns: ReturnType) -> Self {
        self.returns = returns;
        self
    }

    /// Appends a marker; declaration order is execution order.
    pub fn marker(mut self, marker: InterceptorMarker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Disables interception for this member regardless of other markers.
    pub fn opt_out(mut self) -> Self {
        self.opt_out = true;
        self
    }

    /// Marks the member as not overridable.
    pub fn non_virtual(mut self) -> Self {
        self.is_virtual = false;
        self
    }

    /// Marks the member as abstract; it may have no target.
    pub fn abstract_member(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Callable the proxy forwards to for this member.
    pub fn target(mut self, target: MethodTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Identity of the member.
    pub fn key(&self) -> &MemberKey {
        &self.key
    }

    /// Declared return type.
    pub fn return_type(&self) -> ReturnType {
        self.returns
    }

    /// Markers in declaration order.
    pub fn markers(&self) -> &[InterceptorMarker] {
        &self.markers
    }

    /// True when the member opted out of interception.
    pub fn is_opt_out(&self) -> bool {
        self.opt_out
    }

    /// True for virtual members.
    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// True for abstract members.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Whether a subclass may replace this member.
    pub fn is_overridable(&self) -> bool {
        self.is_virtual || self.is_abstract
    }

    /// Callable the proxy forwards to, if declared.
    pub fn method_target(&self) -> Option<&MethodTarget> {
        self.target.as_ref()
    }
}

impl fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("key", &self.key.to_string())
            .field("returns", &self.returns)
            .field("markers", &self.markers.len())
            .field("opt_out", &self.opt_out)
            .field("virtual", &self.is_virtual)
            .field("abstract", &self.is_abstract)
            .field("target", &self.target.is_some())
            .finish()
    }
}

/// A member together with the type that declares it.
#[derive(Clone, Debug)]
pub struct ResolvedMember {
    pub declaring: Arc<TypeDescriptor>,
    pub member: Arc<MemberDescriptor>,
}

static ROOT: Lazy<Arc<TypeDescriptor>> = Lazy::new(|| {
    let key = TypeKey::Type(TypeId::of::<dyn Any + Send + Sync>(), "object");
    TypeBuilder::new(key, TypeKind::Root, None)
        .member(MemberDescriptor::method("to_string").returns::<String>())
        .member(MemberDescriptor::method("hash_code").returns::<u64>())
        .member(MemberDescriptor::method("equals").param::<AnyArc>().returns::<bool>())
        .build()
});

/// Metadata for a service or implementation type.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::{MemberDescriptor, TypeDescriptor, TypeKind};
///
/// trait Greeter: Send + Sync {}
/// struct ConsoleGreeter;
///
/// let service = TypeDescriptor::interface::<dyn Greeter>()
///     .member(MemberDescriptor::method("greet").param::<String>().returns::<String>())
///     .build();
///
/// let implementation = TypeDescriptor::class::<ConsoleGreeter>()
///     .implements(service.clone())
///     .default_constructor()
///     .build();
///
/// assert_eq!(service.kind(), TypeKind::Interface);
/// assert_eq!(implementation.all_interfaces().len(), 1);
/// assert!(implementation.base_chain().is_empty());
/// ```
pub struct TypeDescriptor {
    key: TypeKey,
    kind: TypeKind,
    sealed: bool,
    is_abstract: bool,
    default_constructor: bool,
    opt_out: bool,
    base: Option<Arc<TypeDescriptor>>,
    interfaces: Vec<Arc<TypeDescriptor>>,
    members: Vec<Arc<MemberDescriptor>>,
    surface: Option<Surface>,
}

impl TypeDescriptor {
    /// Interface type.
    pub fn interface<S: ?Sized + 'static>() -> TypeBuilder {
        TypeBuilder::new(TypeKey::of::<S>(), TypeKind::Interface, None)
    }

    /// Class type; extends the universal root unless [`TypeBuilder::extends`] says otherwise.
    pub fn class<T: ?Sized + 'static>() -> TypeBuilder {
        TypeBuilder::new(TypeKey::of::<T>(), TypeKind::Class, Some(Self::root()))
    }

    /// Value type; always sealed.
    pub fn value_type<T: 'static>() -> TypeBuilder {
        let mut builder = TypeBuilder::new(TypeKey::of::<T>(), TypeKind::ValueType, None);
        builder.sealed = true;
        builder
    }

    /// The universal root type.
    pub fn root() -> Arc<TypeDescriptor> {
        ROOT.clone()
    }

    /// Type identity.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.key.name()
    }

    /// Interface, class, value type or root.
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// True for interfaces.
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// True for the universal root.
    pub fn is_root(&self) -> bool {
        self.kind == TypeKind::Root
    }

    /// True for value types.
    pub fn is_value_type(&self) -> bool {
        self.kind == TypeKind::ValueType
    }

    /// True when the type cannot be derived from.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// True for abstract classes.
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// True when the type has a parameterless constructor.
    pub fn has_default_constructor(&self) -> bool {
        self.default_constructor
    }

    /// True when the type opted out of interception.
    pub fn is_opt_out(&self) -> bool {
        self.opt_out
    }

    /// Direct base class.
    pub fn base(&self) -> Option<&Arc<TypeDescriptor>> {
        self.base.as_ref()
    }

    /// Interfaces declared directly on this type.
    pub fn interfaces(&self) -> &[Arc<TypeDescriptor>] {
        &self.interfaces
    }

    /// Members declared directly on this type.
    pub fn members(&self) -> &[Arc<MemberDescriptor>] {
        &self.members
    }

    /// Typed proxy surface, when the type is a proxied service.
    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    /// Member declared directly on this type with the given identity.
    pub fn declared(&self, key: &MemberKey) -> Option<&Arc<MemberDescriptor>> {
        self.members.iter().find(|m| m.key() == key)
    }

    /// Base classes from the nearest outward, excluding the universal root.
    pub fn base_chain(&self) -> Vec<Arc<TypeDescriptor>> {
        let mut chain = Vec::new();
        let mut current = self.base.clone();
        while let Some(ty) = current {
            if ty.is_root() {
                break;
            }
            current = ty.base.clone();
            chain.push(ty);
        }
        chain
    }

    /// Every interface reachable from this type, each listed once.
    ///
    /// Walks this type's interfaces, the interfaces those extend, and the
    /// interfaces of every base class. Diamond paths collapse onto the first
    /// visit.
    pub fn all_interfaces(&self) -> Vec<Arc<TypeDescriptor>> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();

        let mut roots: Vec<&Arc<TypeDescriptor>> = self.interfaces.iter().collect();
        let chain = self.base_chain();
        for base in &chain {
            roots.extend(base.interfaces.iter());
        }
        for iface in roots {
            collect_interfaces(iface, &mut visited, &mut out);
        }
        out
    }

    /// Finds the most-derived declaration of `key` visible on this type.
    ///
    /// Looks at own members, then the base chain; interface types also see
    /// members of the interfaces they extend.
    pub fn resolve_member(self: &Arc<Self>, key: &MemberKey) -> Option<ResolvedMember> {
        if let Some(member) = self.declared(key) {
            return Some(ResolvedMember {
                declaring: self.clone(),
                member: member.clone(),
            });
        }
        for base in self.base_chain() {
            if let Some(member) = base.declared(key) {
                let member = member.clone();
                return Some(ResolvedMember { declaring: base, member });
            }
        }
        if self.is_interface() {
            for iface in self.all_interfaces() {
                if let Some(member) = iface.declared(key) {
                    let member = member.clone();
                    return Some(ResolvedMember { declaring: iface, member });
                }
            }
        }
        None
    }

    /// Every instance member a proxy of this type exposes, most-derived first.
    ///
    /// Classes contribute their own and their base classes' members; interfaces
    /// their own and their inherited interfaces' members. Members of the
    /// universal root are never included.
    pub fn instance_members(self: &Arc<Self>) -> Vec<ResolvedMember> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        let mut sources = vec![self.clone()];
        if self.is_interface() {
            sources.extend(self.all_interfaces());
        } else {
            sources.extend(self.base_chain());
        }

        for declaring in sources {
            for member in &declaring.members {
                if seen.insert(member.key().clone()) {
                    out.push(ResolvedMember {
                        declaring: declaring.clone(),
                        member: member.clone(),
                    });
                }
            }
        }
        out
    }

    /// True when `other` is this type, one of its base classes or interfaces.
    pub fn is_assignable_to(&self, other: &TypeDescriptor) -> bool {
        if self.key == other.key {
            return true;
        }
        if other.is_interface() {
            return self.all_interfaces().iter().any(|i| i.key == other.key);
        }
        self.base_chain().iter().any(|b| b.key == other.key)
    }
}

fn collect_interfaces(
    iface: &Arc<TypeDescriptor>,
    visited: &mut HashSet<TypeKey>,
    out: &mut Vec<Arc<TypeDescriptor>>,
) {
    if !visited.insert(iface.key) {
        return;
    }
    out.push(iface.clone());
    for parent in &iface.interfaces {
        collect_interfaces(parent, visited, out);
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("sealed", &self.sealed)
            .field("abstract", &self.is_abstract)
            .field("default_constructor", &self.default_constructor)
            .field("opt_out", &self.opt_out)
            .field("base", &self.base.as_ref().map(|b| b.name()))
            .field("interfaces", &self.interfaces.iter().map(|i| i.name()).collect::<Vec<_>>())
            .field("members", &self.members.len())
            .finish()
    }
}

/// Fluent builder for [`TypeDescriptor`].
pub struct TypeBuilder {
    key: TypeKey,
    kind: TypeKind,
    sealed: bool,
    is_abstract: bool,
    default_constructor: bool,
    opt_out: bool,
    base: Option<Arc<TypeDescriptor>>,
    interfaces: Vec<Arc<TypeDescriptor>>,
    members: Vec<Arc<MemberDescriptor>>,
    surface: Option<Surface>,
}

impl TypeBuilder {
    fn new(key: TypeKey, kind: TypeKind, base: Option<Arc<TypeDescriptor>>) -> Self {
        Self {
            key,
            kind,
            sealed: false,
            is_abstract: false,
            default_constructor: false,
            opt_out: false,
            base,
            interfaces: Vec::new(),
            members: Vec::new(),
            surface: None,
        }
    }

    /// Forbids derivation.
    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }

    /// Marks the type abstract.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// The type has an accessible parameterless constructor.
    pub fn default_constructor(mut self) -> Self {
        self.default_constructor = true;
        self
    }

    /// Sets the base class.
    pub fn extends(mut self, base: Arc<TypeDescriptor>) -> Self {
        self.base = Some(base);
        self
    }

    /// Adds an implemented interface.
    pub fn implements(mut self, iface: Arc<TypeDescriptor>) -> Self {
        self.interfaces.push(iface);
        self
    }

    /// Declares a member on this type.
    pub fn member(mut self, member: MemberDescriptor) -> Self {
        self.members.push(Arc::new(member));
        self
    }

    /// Type-level opt-out: members declared here are never intercepted.
    pub fn opt_out(mut self) -> Self {
        self.opt_out = true;
        self
    }

    /// Typed proxy surface for a service type.
    ///
    /// The closure turns a proxy object into the handle consumers resolve,
    /// stored the same way trait registrations are (`Arc<Arc<S>>`).
    pub fn surface<S, F>(self, f: F) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<ProxyObject>) -> Arc<S> + Send + Sync + 'static,
    {
        self.surface_with(move |proxy| Arc::new(f(proxy)) as AnyArc)
    }

    /// Untyped proxy surface producing the stored value directly.
    pub fn surface_with<F>(mut self, f: F) -> Self
    where
        F: Fn(Arc<ProxyObject>) -> AnyArc + Send + Sync + 'static,
    {
        self.surface = Some(Arc::new(f));
        self
    }

    /// Finishes the descriptor.
    pub fn build(self) -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor {
            key: self.key,
            kind: self.kind,
            sealed: self.sealed,
            is_abstract: self.is_abstract,
            default_constructor: self.default_constructor,
            opt_out: self.opt_out,
            base: self.base,
            interfaces: self.interfaces,
            members: self.members,
            surface: self.surface,
        })
    }
}
