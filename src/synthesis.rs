//! Proxy type synthesis.
//!
//! [`TypeSynthesisBackend`] turns a set of member plans into a constructible
//! proxy type. The bundled [`DispatchTableBackend`] needs no code generation:
//! its proxy types are a table from member identity to plan and target,
//! consulted by one generic [`ProxyObject`] at call time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{self, BoxFuture};

use crate::adapter::{BoundTarget, Invoker, MethodTarget};
use crate::chain::ChainRunner;
use crate::classifier::{MethodOverridePlan, ReturnShape};
use crate::context::{Arguments, InvocationContext, Value};
use crate::error::{CallResult, InterceptError, InterceptResult};
use crate::key::{MemberKey, TypeKey};
use crate::model::{Surface, TypeDescriptor};
use crate::provider::Resolver;
use crate::registration::{AnyArc, HeldInstance};

/// Shape of the synthesized type relative to service and implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynthesisStrategy {
    /// Implements the service interface around a held instance; every
    /// required member is routed through its chain.
    WrapInterface,
    /// Subclass of an abstract implementation; every member is overridden.
    SubclassAlwaysProxy,
    /// Subclass holding an instance field; non-required members forward to it.
    SubclassWrapField,
    /// Subclass replaying the implementation's construction; overrides call the base member.
    TrueSubclass,
}

impl fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SynthesisStrategy::WrapInterface => "wrap-interface",
            SynthesisStrategy::SubclassAlwaysProxy => "subclass-always-proxy",
            SynthesisStrategy::SubclassWrapField => "subclass-wrap-field",
            SynthesisStrategy::TrueSubclass => "true-subclass",
        };
        f.write_str(name)
    }
}

/// One member of a proxy type: its plan and the target it forwards to.
#[derive(Clone, Debug)]
pub struct MemberBinding {
    pub plan: Arc<MethodOverridePlan>,
    /// Absent only for abstract members, which fail when the chain reaches them
    pub target: Option<MethodTarget>,
}

/// Everything a backend needs to build a proxy type.
pub struct SynthesisRequest {
    pub service: Arc<TypeDescriptor>,
    pub implementation: Arc<TypeDescriptor>,
    pub strategy: SynthesisStrategy,
    pub members: Vec<MemberBinding>,
}

/// A synthesized proxy type.
pub trait ProxyType: Send + Sync {
    fn service(&self) -> TypeKey;

    fn implementation(&self) -> TypeKey;

    fn strategy(&self) -> SynthesisStrategy;

    /// Plans of every member the proxy exposes.
    fn plans(&self) -> Vec<Arc<MethodOverridePlan>>;

    /// Builds a proxy around `held`, returning the value consumers resolve.
    fn construct(&self, services: Arc<dyn Resolver>, held: HeldInstance) -> InterceptResult<AnyArc>;
}

/// Produces proxy types from member plans.
pub trait TypeSynthesisBackend: Send + Sync {
    fn synthesize(&self, request: SynthesisRequest) -> InterceptResult<Arc<dyn ProxyType>>;
}

/// Backend building interpreted dispatch tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchTableBackend;

impl TypeSynthesisBackend for DispatchTableBackend {
    fn synthesize(&self, request: SynthesisRequest) -> InterceptResult<Arc<dyn ProxyType>> {
        let surface = request.service.surface().cloned().ok_or(
            InterceptError::UnsupportedProxyTarget {
                service: request.service.name(),
                reason: "service type declares no proxy surface",
            },
        )?;

        let mut table = HashMap::with_capacity(request.members.len());
        for binding in request.members {
            let member = binding.plan.member();
            let overridable =
                request.strategy == SynthesisStrategy::WrapInterface || member.is_overridable();
            let intercept = binding.plan.is_required() && overridable;
            if binding.plan.is_required() && !overridable {
                tracing::warn!(
                    member = %binding.plan.key(),
                    implementation = request.implementation.name(),
                    "member has interceptors but cannot be overridden; calls go straight to the instance"
                );
            }
            table.insert(
                binding.plan.key().clone(),
                DispatchEntry {
                    plan: binding.plan,
                    target: binding.target,
                    intercept,
                },
            );
        }

        Ok(Arc::new(DispatchProxyType {
            service: request.service.key(),
            implementation: request.implementation.key(),
            strategy: request.strategy,
            table: Arc::new(table),
            surface,
        }))
    }
}

#[derive(Clone)]
struct DispatchEntry {
    plan: Arc<MethodOverridePlan>,
    target: Option<MethodTarget>,
    intercept: bool,
}

/// Proxy type produced by [`DispatchTableBackend`].
pub struct DispatchProxyType {
    service: TypeKey,
    implementation: TypeKey,
    strategy: SynthesisStrategy,
    table: Arc<HashMap<MemberKey, DispatchEntry>>,
    surface: Surface,
}

impl DispatchProxyType {
    /// Whether calls to `member` run through a chain.
    pub fn intercepts(&self, member: &MemberKey) -> bool {
        self.table.get(member).map(|e| e.intercept).unwrap_or(false)
    }

    /// Number of members in the dispatch table.
    pub fn member_count(&self) -> usize {
        self.table.len()
    }
}

impl ProxyType for DispatchProxyType {
    fn service(&self) -> TypeKey {
        self.service
    }

    fn implementation(&self) -> TypeKey {
        self.implementation
    }

    fn strategy(&self) -> SynthesisStrategy {
        self.strategy
    }

    fn plans(&self) -> Vec<Arc<MethodOverridePlan>> {
        self.table.values().map(|e| e.plan.clone()).collect()
    }

    fn construct(&self, services: Arc<dyn Resolver>, held: HeldInstance) -> InterceptResult<AnyArc> {
        let mut bound = HashMap::with_capacity(self.table.len());
        for (key, entry) in self.table.iter() {
            if let Some(target) = &entry.target {
                bound.insert(key.clone(), target.bind(&held)?);
            }
        }
        let proxy = Arc::new(ProxyObject {
            service: self.service,
            services,
            held,
            table: self.table.clone(),
            bound,
        });
        Ok((self.surface)(proxy))
    }
}

impl fmt::Debug for DispatchProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchProxyType")
            .field("service", &self.service)
            .field("implementation", &self.implementation)
            .field("strategy", &self.strategy)
            .field("members", &self.table.len())
            .finish()
    }
}

/// Result of a proxied call.
///
/// Carries the returned value and the argument array as it stood when the
/// call finished, for by-reference write-back.
#[derive(Debug)]
pub struct CallOutcome {
    value: Value,
    arguments: Arguments,
    by_ref: Arc<[usize]>,
}

impl CallOutcome {
    /// Result of the call.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Final argument array, including by-reference outputs.
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Copies the final value of by-reference parameter `position` into `slot`.
    pub fn write_back<T: Clone + 'static>(&self, position: usize, slot: &mut T) -> InterceptResult<()> {
        if !self.by_ref.contains(&position) {
            return Err(InterceptError::NotByRef(position));
        }
        *slot = self.arguments.arg::<T>(position)?;
        Ok(())
    }

    /// Unwraps the result into the concrete return type.
    pub fn into_value<T: 'static>(self) -> InterceptResult<T> {
        self.value.downcast::<T>()
    }
}

/// Instance of a dispatch-table proxy.
///
/// A service's surface holds one of these and forwards each trait method to
/// [`call`](Self::call) / [`invoke`](Self::invoke) (or their async forms).
/// Members whose plan is not required, and members the strategy cannot
/// override, go straight to the held instance without a chain.
pub struct ProxyObject {
    service: TypeKey,
    services: Arc<dyn Resolver>,
    held: HeldInstance,
    table: Arc<HashMap<MemberKey, DispatchEntry>>,
    bound: HashMap<MemberKey, BoundTarget>,
}

struct Prepared {
    entry: DispatchEntry,
    invoker: Arc<dyn Invoker>,
    ctx: InvocationContext,
}

impl ProxyObject {
    /// Service type this proxy stands in for.
    pub fn service_type(&self) -> TypeKey {
        self.service
    }

    /// Service-provider handle the proxy was constructed with.
    pub fn services(&self) -> &Arc<dyn Resolver> {
        &self.services
    }

    /// The wrapped original instance.
    pub fn held(&self) -> &HeldInstance {
        &self.held
    }

    /// Override plan for a member.
    pub fn plan(&self, member: &MemberKey) -> Option<&Arc<MethodOverridePlan>> {
        self.table.get(member).map(|e| &e.plan)
    }

    /// Whether calls to the member run a chain.
    pub fn is_intercepted(&self, member: &MemberKey) -> bool {
        self.table.get(member).map(|e| e.intercept).unwrap_or(false)
    }

    fn prepare(
        &self,
        member: &MemberKey,
        type_arguments: &[TypeKey],
        arguments: Arguments,
    ) -> InterceptResult<Prepared> {
        let entry = self
            .table
            .get(member)
            .cloned()
            .ok_or_else(|| InterceptError::UnknownMember {
                service: self.service.name(),
                member: member.to_string(),
            })?;

        if member.generic_arity() != type_arguments.len() {
            return Err(InterceptError::TargetShape(format!(
                "{} expects {} type argument(s), got {}",
                member,
                member.generic_arity(),
                type_arguments.len()
            )));
        }

        let invoker = match self.bound.get(member) {
            Some(bound) => bound.invoker(type_arguments)?,
            None => Arc::new(AbstractMember(member.to_string())) as Arc<dyn Invoker>,
        };

        let ctx = InvocationContext::new(
            self.services.clone(),
            self.service,
            member.clone(),
            type_arguments.to_vec(),
            arguments,
        );
        Ok(Prepared { entry, invoker, ctx })
    }

    /// Calls a synchronous member.
    pub fn call(&self, member: &MemberKey, arguments: Arguments) -> CallResult<CallOutcome> {
        self.call_generic(member, &[], arguments)
    }

    /// Calls a synchronous generic member with concrete type arguments.
    pub fn call_generic(
        &self,
        member: &MemberKey,
        type_arguments: &[TypeKey],
        arguments: Arguments,
    ) -> CallResult<CallOutcome> {
        let Prepared { entry, invoker, ctx } = self.prepare(member, type_arguments, arguments)?;
        let shape = entry.plan.shape();
        if shape.is_async() {
            return Err(InterceptError::TargetShape(format!(
                "{} returns a future; use call_async",
                member
            ))
            .into());
        }

        let value = if entry.intercept {
            ChainRunner::new(entry.plan.shared_markers(), invoker).run(&shape, &ctx)?
        } else {
            let value = invoker.invoke(&ctx)?;
            if shape == ReturnShape::Void {
                Value::unit()
            } else {
                value
            }
        };

        Ok(CallOutcome {
            value,
            arguments: ctx.arguments(),
            by_ref: entry.plan.shared_by_ref_positions(),
        })
    }

    /// Calls a future-returning member.
    pub fn call_async(
        &self,
        member: &MemberKey,
        arguments: Arguments,
    ) -> BoxFuture<'static, CallResult<CallOutcome>> {
        self.call_generic_async(member, &[], arguments)
    }

    /// Calls a future-returning generic member with concrete type arguments.
    pub fn call_generic_async(
        &self,
        member: &MemberKey,
        type_arguments: &[TypeKey],
        arguments: Arguments,
    ) -> BoxFuture<'static, CallResult<CallOutcome>> {
        let Prepared { entry, invoker, ctx } = match self.prepare(member, type_arguments, arguments) {
            Ok(prepared) => prepared,
            Err(e) => return Box::pin(future::ready(Err(e.into()))),
        };
        let shape = entry.plan.shape();
        if !shape.is_async() {
            let err = InterceptError::TargetShape(format!("{} does not return a future; use call", member));
            return Box::pin(future::ready(Err(err.into())));
        }

        let pending = if entry.intercept {
            ChainRunner::new(entry.plan.shared_markers(), invoker).run_async(&shape, &ctx)
        } else {
            invoker.invoke_async(&ctx)
        };
        let by_ref = entry.plan.shared_by_ref_positions();
        Box::pin(async move {
            let value = pending.await?;
            let value = if shape == ReturnShape::AsyncVoid {
                Value::unit()
            } else {
                value
            };
            Ok(CallOutcome {
                value,
                arguments: ctx.arguments(),
                by_ref,
            })
        })
    }

    /// Calls a synchronous member and unwraps its result as `R`.
    pub fn invoke<R: 'static>(&self, member: &MemberKey, arguments: Arguments) -> CallResult<R> {
        Ok(self.call(member, arguments)?.into_value::<R>()?)
    }

    /// Calls a synchronous member returning no value.
    pub fn invoke_void(&self, member: &MemberKey, arguments: Arguments) -> CallResult<()> {
        self.call(member, arguments).map(|_| ())
    }

    /// Calls a synchronous generic member and unwraps its result as `R`.
    pub fn invoke_generic<R: 'static>(
        &self,
        member: &MemberKey,
        type_arguments: &[TypeKey],
        arguments: Arguments,
    ) -> CallResult<R> {
        Ok(self
            .call_generic(member, type_arguments, arguments)?
            .into_value::<R>()?)
    }

    /// Calls a future-returning member and unwraps its result as `R`.
    pub fn invoke_async<R: Send + 'static>(
        &self,
        member: &MemberKey,
        arguments: Arguments,
    ) -> BoxFuture<'static, CallResult<R>> {
        let pending = self.call_async(member, arguments);
        Box::pin(async move { Ok(pending.await?.into_value::<R>()?) })
    }

    /// Calls a member returning a future of no value.
    pub fn invoke_async_void(
        &self,
        member: &MemberKey,
        arguments: Arguments,
    ) -> BoxFuture<'static, CallResult<()>> {
        let pending = self.call_async(member, arguments);
        Box::pin(async move { pending.await.map(|_| ()) })
    }
}

impl fmt::Debug for ProxyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyObject")
            .field("service", &self.service)
            .field("members", &self.table.len())
            .finish()
    }
}

/// Terminal for an abstract member with no body.
struct AbstractMember(String);

impl Invoker for AbstractMember {
    fn invoke(&self, _ctx: &InvocationContext) -> CallResult<Value> {
        Err(InterceptError::MissingMethodTarget(self.0.clone()).into())
    }

    fn invoke_async(&self, ctx: &InvocationContext) -> BoxFuture<'static, CallResult<Value>> {
        Box::pin(future::ready(self.invoke(ctx)))
    }
}
