//! Invocation adapters: uniform `invoke(arguments) -> result` over member targets.
//!
//! A [`MethodTarget`] is declared on a member descriptor and bound to the held
//! instance when a proxy is constructed. Two adapter strategies exist:
//!
//! - [`MethodTarget::interface`]: the target is reached through the service
//!   trait object; the held instance is downcast on every call.
//! - [`MethodTarget::compiled`]: the concrete implementation type is known; the
//!   instance is downcast once at binding and the typed entry point is called
//!   directly afterwards.
//!
//! Adapters execute the real call exactly once per `invoke` and return its
//! error unchanged.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;

use crate::context::{Arguments, InvocationContext, Value};
use crate::error::{CallResult, InterceptError, InterceptResult};
use crate::key::TypeKey;
use crate::registration::{AnyArc, HeldInstance};

/// Terminal invocation of a chain.
pub trait Invoker: Send + Sync {
    /// Runs the real call with the context's current arguments.
    fn invoke(&self, ctx: &InvocationContext) -> CallResult<Value>;

    /// Async form; synchronous targets complete immediately.
    fn invoke_async(&self, ctx: &InvocationContext) -> BoxFuture<'static, CallResult<Value>>;
}

/// Invoker backed by a plain closure.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::{args, FnInvoker, InvocationContext, Invoker, MemberKey, TypeKey, Value};
///
/// let add = FnInvoker::new(|ctx: &InvocationContext| {
///     Ok(Value::new(ctx.arg::<i32>(0)? + ctx.arg::<i32>(1)?))
/// });
/// let ctx = InvocationContext::detached(
///     TypeKey::of::<()>(),
///     MemberKey::method("add"),
///     args![2i32, 3i32],
/// );
/// assert_eq!(add.invoke(&ctx).unwrap().downcast::<i32>().unwrap(), 5);
/// ```
pub struct FnInvoker<F> {
    f: F,
}

impl<F> FnInvoker<F>
where
    F: Fn(&InvocationContext) -> CallResult<Value> + Send + Sync,
{
    /// Wraps a closure as an invoker.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Invoker for FnInvoker<F>
where
    F: Fn(&InvocationContext) -> CallResult<Value> + Send + Sync,
{
    fn invoke(&self, ctx: &InvocationContext) -> CallResult<Value> {
        (self.f)(ctx)
    }

    fn invoke_async(&self, ctx: &InvocationContext) -> BoxFuture<'static, CallResult<Value>> {
        Box::pin(future::ready((self.f)(ctx)))
    }
}

type SyncBody<X> = Arc<dyn Fn(&X, &mut Arguments) -> CallResult<Value> + Send + Sync>;
type AsyncBody<X> =
    Arc<dyn Fn(Arc<X>, Arguments) -> BoxFuture<'static, CallResult<Value>> + Send + Sync>;

enum Body<X: ?Sized> {
    Sync(SyncBody<X>),
    Async(AsyncBody<X>),
}

impl<X: ?Sized> Clone for Body<X> {
    fn clone(&self) -> Self {
        match self {
            Body::Sync(f) => Body::Sync(f.clone()),
            Body::Async(f) => Body::Async(f.clone()),
        }
    }
}

impl<X: ?Sized + Send + Sync + 'static> Body<X> {
    fn call(&self, receiver: &Arc<X>, ctx: &InvocationContext) -> CallResult<Value> {
        match self {
            Body::Sync(f) => {
                // The body sees a snapshot; writing it back makes by-ref
                // mutations visible to the markers that unwind after it.
                let mut arguments = ctx.arguments();
                let result = f(receiver.as_ref(), &mut arguments);
                ctx.replace_arguments(arguments);
                result
            }
            Body::Async(_) => Err(InterceptError::TargetShape(format!(
                "{} returns a future and must be called asynchronously",
                ctx.member()
            ))
            .into()),
        }
    }

    fn call_async(
        &self,
        receiver: &Arc<X>,
        ctx: &InvocationContext,
    ) -> BoxFuture<'static, CallResult<Value>> {
        match self {
            Body::Sync(_) => Box::pin(future::ready(self.call(receiver, ctx))),
            Body::Async(f) => f(receiver.clone(), ctx.arguments()),
        }
    }
}

/// Dispatches through the service trait object held by the proxy.
struct InterfaceAdapter<S: ?Sized> {
    instance: AnyArc,
    body: Body<S>,
}

impl<S: ?Sized + Send + Sync + 'static> InterfaceAdapter<S> {
    fn receiver(&self) -> InterceptResult<&Arc<S>> {
        self.instance
            .downcast_ref::<Arc<S>>()
            .ok_or(InterceptError::TypeMismatch(std::any::type_name::<S>()))
    }
}

impl<S: ?Sized + Send + Sync + 'static> Invoker for InterfaceAdapter<S> {
    fn invoke(&self, ctx: &InvocationContext) -> CallResult<Value> {
        let receiver = self.receiver()?;
        self.body.call(receiver, ctx)
    }

    fn invoke_async(&self, ctx: &InvocationContext) -> BoxFuture<'static, CallResult<Value>> {
        match self.receiver() {
            Ok(receiver) => self.body.call_async(receiver, ctx),
            Err(e) => Box::pin(future::ready(Err(e.into()))),
        }
    }
}

/// Typed entry point bound to the concrete implementation.
struct CompiledAdapter<T> {
    target: Arc<T>,
    body: Body<T>,
}

impl<T: Send + Sync + 'static> Invoker for CompiledAdapter<T> {
    fn invoke(&self, ctx: &InvocationContext) -> CallResult<Value> {
        self.body.call(&self.target, ctx)
    }

    fn invoke_async(&self, ctx: &InvocationContext) -> BoxFuture<'static, CallResult<Value>> {
        self.body.call_async(&self.target, ctx)
    }
}

/// Adapter strategy a target uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Interface,
    Compiled,
    /// Resolved per call against the generic type arguments
    Generic,
}

type Binder = Arc<dyn Fn(&HeldInstance) -> InterceptResult<Arc<dyn Invoker>> + Send + Sync>;
type GenericResolver = Arc<dyn Fn(&[TypeKey]) -> InterceptResult<MethodTarget> + Send + Sync>;

#[derive(Clone)]
enum TargetKind {
    Bound(Binder),
    Generic(GenericResolver),
}

/// Callable a proxied member forwards to.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::{CallResult, MethodTarget};
///
/// trait Calculator: Send + Sync {
///     fn add(&self, a: i32, b: i32) -> CallResult<i32>;
/// }
///
/// let target = MethodTarget::interface::<dyn Calculator, i32, _>(|calc, args| {
///     calc.add(args.arg(0)?, args.arg(1)?)
/// });
/// assert!(!target.is_async());
/// ```
#[derive(Clone)]
pub struct MethodTarget {
    kind: TargetKind,
    adapter: AdapterKind,
    is_async: bool,
}

impl MethodTarget {
    /// Synchronous target reached through the service trait object `S`.
    ///
    /// The proxy must hold the instance as `Arc<S>`, which is how trait
    /// registrations store it. The body may mutate `args`; by-reference
    /// parameters are read back from there.
    pub fn interface<S, R, F>(f: F) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(&S, &mut Arguments) -> CallResult<R> + Send + Sync + 'static,
    {
        let body: Body<S> = Body::Sync(Arc::new(move |s: &S, a: &mut Arguments| {
            f(s, a).map(Value::new)
        }));
        Self::interface_body(body, false)
    }

    /// Future-returning target reached through the service trait object `S`.
    pub fn interface_async<S, R, F, Fut>(f: F) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(Arc<S>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<R>> + Send + 'static,
    {
        let body: Body<S> = Body::Async(Arc::new(
            move |s: Arc<S>, a: Arguments| -> BoxFuture<'static, CallResult<Value>> {
                let fut = f(s, a);
                Box::pin(async move { fut.await.map(Value::new) })
            },
        ));
        Self::interface_body(body, true)
    }

    fn interface_body<S: ?Sized + Send + Sync + 'static>(body: Body<S>, is_async: bool) -> Self {
        let binder: Binder = Arc::new(move |held: &HeldInstance| -> InterceptResult<Arc<dyn Invoker>> {
            let adapter = InterfaceAdapter::<S> {
                instance: held.exposed.clone(),
                body: body.clone(),
            };
            adapter.receiver()?;
            Ok(Arc::new(adapter) as Arc<dyn Invoker>)
        });
        Self {
            kind: TargetKind::Bound(binder),
            adapter: AdapterKind::Interface,
            is_async,
        }
    }

    /// Synchronous target on the concrete implementation `T`.
    pub fn compiled<T, R, F>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(&T, &mut Arguments) -> CallResult<R> + Send + Sync + 'static,
    {
        let body: Body<T> = Body::Sync(Arc::new(move |t: &T, a: &mut Arguments| {
            f(t, a).map(Value::new)
        }));
        Self::compiled_body(body, false)
    }

    /// Future-returning target on the concrete implementation `T`.
    pub fn compiled_async<T, R, F, Fut>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(Arc<T>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult<R>> + Send + 'static,
    {
        let body: Body<T> = Body::Async(Arc::new(
            move |t: Arc<T>, a: Arguments| -> BoxFuture<'static, CallResult<Value>> {
                let fut = f(t, a);
                Box::pin(async move { fut.await.map(Value::new) })
            },
        ));
        Self::compiled_body(body, true)
    }

    fn compiled_body<T: Send + Sync + 'static>(body: Body<T>, is_async: bool) -> Self {
        let binder: Binder = Arc::new(move |held: &HeldInstance| -> InterceptResult<Arc<dyn Invoker>> {
            let target = held
                .instance
                .clone()
                .downcast::<T>()
                .or_else(|_| held.exposed.clone().downcast::<T>())
                .map_err(|_| InterceptError::TypeMismatch(std::any::type_name::<T>()))?;
            Ok(Arc::new(CompiledAdapter {
                target,
                body: body.clone(),
            }) as Arc<dyn Invoker>)
        });
        Self {
            kind: TargetKind::Bound(binder),
            adapter: AdapterKind::Compiled,
            is_async,
        }
    }

    /// Target chosen per call from the member's concrete type arguments.
    ///
    /// Instantiations are cached per proxy instance, so `resolve` runs once
    /// per distinct type-argument list.
    pub fn generic<F>(resolve: F) -> Self
    where
        F: Fn(&[TypeKey]) -> InterceptResult<MethodTarget> + Send + Sync + 'static,
    {
        Self {
            kind: TargetKind::Generic(Arc::new(resolve)),
            adapter: AdapterKind::Generic,
            is_async: false,
        }
    }

    /// Which adapter the target dispatches through.
    pub fn adapter_kind(&self) -> AdapterKind {
        self.adapter
    }

    /// True for future-returning targets; generic targets report per instantiation.
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Binds the target to a held instance.
    pub fn bind(&self, held: &HeldInstance) -> InterceptResult<BoundTarget> {
        match &self.kind {
            TargetKind::Bound(binder) => Ok(BoundTarget::Ready(binder(held)?)),
            TargetKind::Generic(resolve) => Ok(BoundTarget::Generic(GenericTarget {
                resolve: resolve.clone(),
                held: held.clone(),
                instantiations: Arc::new(Mutex::new(HashMap::new())),
            })),
        }
    }
}

impl fmt::Debug for MethodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTarget")
            .field("adapter", &self.adapter)
            .field("async", &self.is_async)
            .finish()
    }
}

/// A generic target awaiting its type arguments.
#[derive(Clone)]
pub struct GenericTarget {
    resolve: GenericResolver,
    held: HeldInstance,
    instantiations: Arc<Mutex<HashMap<Vec<TypeKey>, Arc<dyn Invoker>>>>,
}

impl GenericTarget {
    /// Invoker for one type-argument list, resolved once and cached.
    pub fn instantiate(&self, type_arguments: &[TypeKey]) -> InterceptResult<Arc<dyn Invoker>> {
        if let Some(invoker) = self.instantiations.lock().get(type_arguments) {
            return Ok(invoker.clone());
        }
        let target = (self.resolve)(type_arguments)?;
        let invoker = match target.bind(&self.held)? {
            BoundTarget::Ready(invoker) => invoker,
            BoundTarget::Generic(_) => {
                return Err(InterceptError::TargetShape(
                    "generic target resolved to another generic target".to_string(),
                ))
            }
        };
        self.instantiations
            .lock()
            .entry(type_arguments.to_vec())
            .or_insert(invoker.clone());
        Ok(invoker)
    }
}

/// A target bound to one proxy instance.
#[derive(Clone)]
pub enum BoundTarget {
    Ready(Arc<dyn Invoker>),
    Generic(GenericTarget),
}

impl BoundTarget {
    /// Invoker for a call with the given type arguments.
    pub fn invoker(&self, type_arguments: &[TypeKey]) -> InterceptResult<Arc<dyn Invoker>> {
        match self {
            BoundTarget::Ready(invoker) => Ok(invoker.clone()),
            BoundTarget::Generic(generic) => generic.instantiate(type_arguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::key::MemberKey;

    trait Counter: Send + Sync {
        fn add(&self, n: u32) -> u32;
    }

    struct Fixed(u32);

    impl Counter for Fixed {
        fn add(&self, n: u32) -> u32 {
            self.0 + n
        }
    }

    fn ctx(arguments: Arguments) -> InvocationContext {
        InvocationContext::detached(TypeKey::of::<dyn Counter>(), MemberKey::method("add"), arguments)
    }

    fn held_trait() -> HeldInstance {
        let service: Arc<dyn Counter> = Arc::new(Fixed(10));
        HeldInstance::shared(Arc::new(service) as AnyArc)
    }

    #[test]
    fn interface_adapter_dispatches_through_trait_object() {
        let target = MethodTarget::interface::<dyn Counter, u32, _>(|c, a| Ok(c.add(a.arg(0)?)));
        let BoundTarget::Ready(invoker) = target.bind(&held_trait()).unwrap() else {
            panic!("expected a ready target");
        };
        let value = invoker.invoke(&ctx(args![5u32])).unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 15);
    }

    #[test]
    fn compiled_adapter_binds_concrete_instance() {
        let target = MethodTarget::compiled::<Fixed, u32, _>(|f, a| Ok(f.0 * a.arg::<u32>(0)?));
        let held = HeldInstance::shared(Arc::new(Fixed(3)) as AnyArc);
        let invoker = target.bind(&held).unwrap().invoker(&[]).unwrap();
        let value = invoker.invoke(&ctx(args![4u32])).unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 12);
    }

    #[test]
    fn binding_to_the_wrong_instance_fails() {
        let target = MethodTarget::compiled::<Fixed, u32, _>(|f, _| Ok(f.0));
        let held = HeldInstance::shared(Arc::new("nope") as AnyArc);
        assert!(matches!(target.bind(&held), Err(InterceptError::TypeMismatch(_))));
    }

    #[test]
    fn sync_body_writes_mutated_arguments_back() {
        let target = MethodTarget::interface::<dyn Counter, (), _>(|c, a| {
            let bumped = c.add(a.arg(0)?);
            a.set(0, bumped)?;
            Ok(())
        });
        let invoker = target.bind(&held_trait()).unwrap().invoker(&[]).unwrap();
        let ctx = ctx(args![1u32]);
        invoker.invoke(&ctx).unwrap();
        assert_eq!(ctx.arg::<u32>(0).unwrap(), 11);
    }

    #[test]
    fn async_body_rejects_sync_invocation() {
        let target = MethodTarget::compiled_async::<Fixed, u32, _, _>(|f, _| async move { Ok(f.0) });
        let held = HeldInstance::shared(Arc::new(Fixed(7)) as AnyArc);
        let invoker = target.bind(&held).unwrap().invoker(&[]).unwrap();

        let err = invoker.invoke(&ctx(Arguments::new())).unwrap_err();
        assert!(err.downcast_ref::<InterceptError>().is_some());

        let value = futures::executor::block_on(invoker.invoke_async(&ctx(Arguments::new()))).unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 7);
    }

    #[test]
    fn generic_targets_instantiate_per_type_argument_list() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let resolutions = Arc::new(AtomicUsize::new(0));
        let counted = resolutions.clone();
        let target = MethodTarget::generic(move |types| {
            counted.fetch_add(1, Ordering::SeqCst);
            let name = types[0].name();
            Ok(MethodTarget::compiled::<Fixed, &'static str, _>(move |_, _| Ok(name)))
        });
        let held = HeldInstance::shared(Arc::new(Fixed(0)) as AnyArc);
        let bound = target.bind(&held).unwrap();

        let a = bound.invoker(&[TypeKey::of::<u8>()]).unwrap();
        let _ = bound.invoker(&[TypeKey::of::<u8>()]).unwrap();
        let b = bound.invoker(&[TypeKey::of::<String>()]).unwrap();
        assert_eq!(resolutions.load(Ordering::SeqCst), 2);

        let out = a.invoke(&ctx(Arguments::new())).unwrap();
        assert_eq!(out.downcast::<&'static str>().unwrap(), "u8");
        let out = b.invoke(&ctx(Arguments::new())).unwrap();
        assert_eq!(out.downcast::<&'static str>().unwrap(), "alloc::string::String");
    }
}
