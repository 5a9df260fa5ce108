//! Member classification: marker gathering, return shapes and override plans.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::config::ValidationMode;
use crate::error::{InterceptError, InterceptResult};
use crate::key::{MemberKey, TypeKey};
use crate::marker::InterceptorMarker;
use crate::model::{MemberDescriptor, ReturnType, TypeDescriptor};

/// Call shape of a member, derived from its declared return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    Void,
    Value(TypeKey),
    AsyncVoid,
    AsyncValue(TypeKey),
}

impl ReturnShape {
    /// Shape of a declared return type; unit values count as void.
    pub fn of(returns: ReturnType) -> Self {
        match returns {
            ReturnType::Unit => ReturnShape::Void,
            ReturnType::Value(ty) if ty.is_unit() => ReturnShape::Void,
            ReturnType::Value(ty) => ReturnShape::Value(ty),
            ReturnType::Future => ReturnShape::AsyncVoid,
            ReturnType::FutureOf(ty) if ty.is_unit() => ReturnShape::AsyncVoid,
            ReturnType::FutureOf(ty) => ReturnShape::AsyncValue(ty),
        }
    }

    /// True for future-returning shapes.
    pub fn is_async(&self) -> bool {
        matches!(self, ReturnShape::AsyncVoid | ReturnShape::AsyncValue(_))
    }

    /// True when the shape produces a value.
    pub fn returns_value(&self) -> bool {
        matches!(self, ReturnShape::Value(_) | ReturnShape::AsyncValue(_))
    }
}

impl fmt::Display for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnShape::Void => f.write_str("void"),
            ReturnShape::Value(ty) => write!(f, "{}", ty),
            ReturnShape::AsyncVoid => f.write_str("future<()>"),
            ReturnShape::AsyncValue(ty) => write!(f, "future<{}>", ty),
        }
    }
}

/// Interception plan for one member.
///
/// Built once when the member is classified and immutable afterwards. The
/// executable marker list keeps declaration order: the first entry runs
/// outermost.
#[derive(Clone)]
pub struct MethodOverridePlan {
    member: Arc<MemberDescriptor>,
    declaring_type: TypeKey,
    shape: ReturnShape,
    gathered: Vec<InterceptorMarker>,
    markers: Arc<[InterceptorMarker]>,
    generic: bool,
    by_ref_positions: Arc<[usize]>,
    opted_out: bool,
}

impl MethodOverridePlan {
    /// True iff at least one gathered marker can run on this member's shape.
    pub fn is_required(&self) -> bool {
        !self.markers.is_empty()
    }

    /// Identity of the planned member.
    pub fn key(&self) -> &MemberKey {
        self.member.key()
    }

    /// Most-derived declaration of the member.
    pub fn member(&self) -> &Arc<MemberDescriptor> {
        &self.member
    }

    /// Type holding the most-derived declaration of the member.
    pub fn declaring_type(&self) -> TypeKey {
        self.declaring_type
    }

    /// Return shape the chain runs in.
    pub fn shape(&self) -> ReturnShape {
        self.shape
    }

    /// Executable markers in declaration order.
    pub fn markers(&self) -> &[InterceptorMarker] {
        &self.markers
    }

    pub(crate) fn shared_markers(&self) -> Arc<[InterceptorMarker]> {
        self.markers.clone()
    }

    /// Every gathered marker, executable or not, in gathering order.
    pub fn gathered(&self) -> &[InterceptorMarker] {
        &self.gathered
    }

    /// Gathered markers whose capability does not fit the shape; kept as metadata only.
    pub fn inert(&self) -> Vec<&InterceptorMarker> {
        self.gathered
            .iter()
            .filter(|m| !m.supports(&self.shape))
            .collect()
    }

    /// The terminal target is resolved against concrete type arguments per call.
    pub fn is_generic(&self) -> bool {
        self.generic
    }

    /// Parameter positions passed by reference.
    pub fn by_ref_positions(&self) -> &[usize] {
        &self.by_ref_positions
    }

    pub(crate) fn shared_by_ref_positions(&self) -> Arc<[usize]> {
        self.by_ref_positions.clone()
    }

    /// True when an opt-out disabled interception.
    pub fn is_opted_out(&self) -> bool {
        self.opted_out
    }
}

impl fmt::Debug for MethodOverridePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodOverridePlan")
            .field("member", &self.member.key().to_string())
            .field("declaring_type", &self.declaring_type)
            .field("shape", &self.shape)
            .field(
                "markers",
                &self.markers.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("inert", &self.inert().len())
            .field("generic", &self.generic)
            .field("by_ref_positions", &self.by_ref_positions)
            .field("opted_out", &self.opted_out)
            .finish()
    }
}

/// Builds [`MethodOverridePlan`]s from the declarative type model.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::{
///     InterceptorMarker, MemberDescriptor, MemberKey, MethodClassifier, ReturnShape,
///     TypeDescriptor, TypeKey, VoidInterceptor,
/// };
///
/// struct Audit;
/// impl VoidInterceptor for Audit {}
///
/// trait Jobs: Send + Sync {}
/// struct JobRunner;
///
/// let service = TypeDescriptor::interface::<dyn Jobs>()
///     .member(
///         MemberDescriptor::method("run")
///             .param::<u32>()
///             .marker(InterceptorMarker::sync_void(Audit)),
///     )
///     .build();
/// let implementation = TypeDescriptor::class::<JobRunner>()
///     .implements(service)
///     .member(MemberDescriptor::method("run").param::<u32>())
///     .build();
///
/// let plan = MethodClassifier::default()
///     .classify(&implementation, &MemberKey::method("run").param::<u32>())
///     .unwrap();
/// assert_eq!(plan.shape(), ReturnShape::Void);
/// assert!(plan.is_required());
/// assert_eq!(plan.declaring_type(), TypeKey::of::<JobRunner>());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodClassifier {
    validation: ValidationMode,
}

impl MethodClassifier {
    /// Classifier with the given validation mode.
    pub fn new(validation: ValidationMode) -> Self {
        Self { validation }
    }

    /// Validation mode applied to inert markers.
    pub fn validation(&self) -> ValidationMode {
        self.validation
    }

    /// Ordered marker list for `key` as seen from `implementation`.
    ///
    /// Declarations along the implementation's class chain come first (most
    /// derived outward, universal root excluded), then every reachable
    /// interface, each visited once. An opt-out on the most-derived
    /// declaration, its declaring type, or the implementation type yields an
    /// empty list.
    pub fn gather_markers(
        &self,
        implementation: &Arc<TypeDescriptor>,
        key: &MemberKey,
    ) -> Vec<InterceptorMarker> {
        match implementation.resolve_member(key) {
            Some(resolved)
                if resolved.member.is_opt_out()
                    || resolved.declaring.is_opt_out()
                    || implementation.is_opt_out() =>
            {
                Vec::new()
            }
            _ => collect_markers(implementation, key),
        }
    }

    /// Classifies one member of `implementation`.
    ///
    /// Fails with `MissingOverrideMethod` when no declaration matches `key`
    /// exactly (name, kind, generic arity, parameter types and by-ref flags).
    pub fn classify(
        &self,
        implementation: &Arc<TypeDescriptor>,
        key: &MemberKey,
    ) -> InterceptResult<MethodOverridePlan> {
        if key.name().is_empty() {
            return Err(InterceptError::NullArgument("member name"));
        }

        let resolved = implementation.resolve_member(key).ok_or_else(|| {
            InterceptError::MissingOverrideMethod {
                implementation: implementation.name(),
                member: key.to_string(),
            }
        })?;

        let shape = ReturnShape::of(resolved.member.return_type());
        let opted_out = resolved.member.is_opt_out()
            || resolved.declaring.is_opt_out()
            || implementation.is_opt_out();

        let gathered = if opted_out {
            Vec::new()
        } else {
            collect_markers(implementation, key)
        };

        let (executable, inert): (Vec<_>, Vec<_>) =
            gathered.iter().cloned().partition(|m| m.supports(&shape));

        if let Some(marker) = inert.first() {
            if self.validation == ValidationMode::Strict {
                return Err(InterceptError::ShapeMismatch {
                    member: key.to_string(),
                    marker: marker.name(),
                });
            }
            for marker in &inert {
                tracing::warn!(
                    member = %key,
                    implementation = implementation.name(),
                    marker = marker.name(),
                    capability = ?marker.capability(),
                    shape = %shape,
                    "marker does not fit the member's return shape and will not run"
                );
            }
        }

        Ok(MethodOverridePlan {
            declaring_type: resolved.declaring.key(),
            member: resolved.member,
            shape,
            gathered,
            markers: executable.into(),
            generic: key.is_generic(),
            by_ref_positions: key.by_ref_positions().into(),
            opted_out,
        })
    }
}

fn collect_markers(implementation: &Arc<TypeDescriptor>, key: &MemberKey) -> Vec<InterceptorMarker> {
    let mut markers = Vec::new();

    let mut chain = vec![implementation.clone()];
    chain.extend(implementation.base_chain());
    for ty in &chain {
        if let Some(member) = ty.declared(key) {
            markers.extend(member.markers().iter().cloned());
        }
    }

    // all_interfaces already collapses diamonds; the set also guards against
    // the implementation itself being an interface listed by a base.
    let mut visited: HashSet<TypeKey> = chain.iter().map(|t| t.key()).collect();
    for iface in implementation.all_interfaces() {
        if !visited.insert(iface.key()) {
            continue;
        }
        if let Some(member) = iface.declared(key) {
            markers.extend(member.markers().iter().cloned());
        }
    }
    markers
}
