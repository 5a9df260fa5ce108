//! Per-call state: type-erased values, argument arrays and the invocation context.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{CallResult, InterceptError, InterceptResult};
use crate::key::{MemberKey, TypeKey};
use crate::provider::{EmptyResolver, Resolver};

/// Type-erased call result.
///
/// Void members produce `Value::unit()`. Inside an async chain, a sync-value
/// marker sees its continuation's result as a *pending* value wrapping the
/// rest of the chain; the async runner awaits it with [`Value::resolve`].
pub struct Value {
    inner: Box<dyn Any + Send>,
    type_name: &'static str,
}

struct Pending(BoxFuture<'static, CallResult<Value>>);

impl Value {
    /// Wraps a finished result.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            inner: Box::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// The `()` result of void members.
    pub fn unit() -> Self {
        Self::new(())
    }

    /// Wraps a not-yet-completed call.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = CallResult<Value>> + Send + 'static,
    {
        Self {
            inner: Box::new(Pending(Box::pin(future))),
            type_name: "pending",
        }
    }

    /// True for a call that has not completed yet.
    pub fn is_pending(&self) -> bool {
        self.inner.is::<Pending>()
    }

    /// True when the value holds a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Type name of the held value, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrows the value as a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Unwraps into the concrete result type.
    pub fn downcast<T: 'static>(self) -> InterceptResult<T> {
        self.inner
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| InterceptError::TypeMismatch(std::any::type_name::<T>()))
    }

    /// Awaits pending values until a ready one is produced.
    pub async fn resolve(self) -> CallResult<Value> {
        let mut current = self;
        loop {
            let type_name = current.type_name;
            match current.inner.downcast::<Pending>() {
                Ok(pending) => current = pending.0.await?,
                Err(inner) => return Ok(Value { inner, type_name }),
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value").field("type", &self.type_name).finish()
    }
}

#[derive(Clone)]
struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Packed argument array of one call.
///
/// Slots are cheap to clone, so a chain that retries can hand the same
/// arguments to the real method more than once.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::{args, Arguments};
///
/// let mut a: Arguments = args![2i32, "three".to_string()];
/// assert_eq!(a.len(), 2);
/// assert_eq!(a.arg::<i32>(0).unwrap(), 2);
///
/// a.set(0, 5i32).unwrap();
/// assert_eq!(*a.get::<i32>(0).unwrap(), 5);
/// assert!(a.get::<u64>(0).is_err());
/// ```
#[derive(Clone, Default)]
pub struct Arguments {
    slots: Vec<Slot>,
}

impl Arguments {
    /// Creates an empty argument array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style push.
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    /// Appends an argument.
    pub fn push<T: Send + Sync + 'static>(&mut self, value: T) {
        self.slots.push(Slot {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        });
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Borrows argument `index` as a `T`.
    pub fn get<T: 'static>(&self, index: usize) -> InterceptResult<&T> {
        self.slot(index)?
            .value
            .downcast_ref::<T>()
            .ok_or(InterceptError::TypeMismatch(std::any::type_name::<T>()))
    }

    /// Cloned value of the argument at `index`.
    pub fn arg<T: Clone + 'static>(&self, index: usize) -> InterceptResult<T> {
        self.get::<T>(index).cloned()
    }

    /// Replaces the argument at `index`.
    pub fn set<T: Send + Sync + 'static>(&mut self, index: usize, value: T) -> InterceptResult<()> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(InterceptError::ArgumentIndex { index, len })?;
        *slot = Slot {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        };
        Ok(())
    }

    /// Type name of argument `index`, if present.
    pub fn type_name(&self, index: usize) -> Option<&'static str> {
        self.slots.get(index).map(|s| s.type_name)
    }

    fn slot(&self, index: usize) -> InterceptResult<&Slot> {
        self.slots.get(index).ok_or(InterceptError::ArgumentIndex {
            index,
            len: self.slots.len(),
        })
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| s.type_name))
            .finish()
    }
}

/// Builds an [`Arguments`] array from a list of expressions.
#[macro_export]
macro_rules! args {
    () => { $crate::Arguments::new() };
    ($($value:expr),+ $(,)?) => {
        $crate::Arguments::new()$(.with($value))+
    };
}

struct ContextInner {
    services: Arc<dyn Resolver>,
    service: TypeKey,
    member: MemberKey,
    generic_arguments: Vec<TypeKey>,
    arguments: Mutex<Arguments>,
    items: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    started: Instant,
}

/// State of one in-flight call.
///
/// Created fresh for every top-level call and dropped when the call returns.
/// Cloning yields another handle to the same call, which is how async
/// continuations carry it across suspension points.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::{args, InvocationContext, MemberKey, TypeKey};
///
/// trait Calculator {}
/// let ctx = InvocationContext::detached(
///     TypeKey::of::<dyn Calculator>(),
///     MemberKey::method("add").param::<i32>().param::<i32>(),
///     args![2i32, 3i32],
/// );
///
/// ctx.set_arg(1, 4i32).unwrap();
/// assert_eq!(ctx.arg::<i32>(1).unwrap(), 4);
///
/// ctx.set_item("attempt", 1u32);
/// assert_eq!(ctx.item::<u32>("attempt"), Some(1));
/// ```
#[derive(Clone)]
pub struct InvocationContext {
    inner: Arc<ContextInner>,
}

impl InvocationContext {
    /// Context for one call on `member` of `service`.
    pub fn new(
        services: Arc<dyn Resolver>,
        service: TypeKey,
        member: MemberKey,
        generic_arguments: Vec<TypeKey>,
        arguments: Arguments,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                services,
                service,
                member,
                generic_arguments,
                arguments: Mutex::new(arguments),
                items: Mutex::new(HashMap::new()),
                started: Instant::now(),
            }),
        }
    }

    /// Context with no backing container.
    pub fn detached(service: TypeKey, member: MemberKey, arguments: Arguments) -> Self {
        Self::new(Arc::new(EmptyResolver), service, member, Vec::new(), arguments)
    }

    /// Service-provider handle the proxy was constructed with.
    pub fn services(&self) -> &Arc<dyn Resolver> {
        &self.inner.services
    }

    /// Service type the proxy stands in for.
    pub fn service_type(&self) -> TypeKey {
        self.inner.service
    }

    /// Member being called.
    pub fn member(&self) -> &MemberKey {
        &self.inner.member
    }

    /// Concrete type arguments of a generic member call.
    pub fn generic_arguments(&self) -> &[TypeKey] {
        &self.inner.generic_arguments
    }

    /// Snapshot of the current argument array.
    pub fn arguments(&self) -> Arguments {
        self.inner.arguments.lock().clone()
    }

    /// Clones argument `index` as a `T`.
    pub fn arg<T: Clone + 'static>(&self, index: usize) -> InterceptResult<T> {
        self.inner.arguments.lock().arg::<T>(index)
    }

    /// Overwrites argument `index`.
    pub fn set_arg<T: Send + Sync + 'static>(&self, index: usize, value: T) -> InterceptResult<()> {
        self.inner.arguments.lock().set(index, value)
    }

    /// Replaces the whole argument array.
    pub fn replace_arguments(&self, arguments: Arguments) {
        *self.inner.arguments.lock() = arguments;
    }

    /// Runs `f` with exclusive access to the argument array.
    pub fn with_arguments<R>(&self, f: impl FnOnce(&mut Arguments) -> R) -> R {
        f(&mut self.inner.arguments.lock())
    }

    /// Stores call-scoped data for markers further down the chain.
    pub fn set_item<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.inner.items.lock().insert(key.into(), Arc::new(value));
    }

    /// Reads an item stored by an earlier marker.
    pub fn item<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.inner.items.lock().get(key)?.downcast_ref::<T>().cloned()
    }

    /// Time since the call entered the chain.
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("service", &self.inner.service)
            .field("member", &self.inner.member.to_string())
            .field("generic_arguments", &self.inner.generic_arguments)
            .finish()
    }
}
