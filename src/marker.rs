//! Interceptor markers: declared interception points and their call-shape capability.
//!
//! A marker wraps exactly one of the four interceptor traits. Each trait has a
//! transparent default (`run` simply continues the chain), so a concrete
//! interceptor only overrides what it needs.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::{AsyncValueNext, AsyncVoidNext, ValueNext, VoidNext};
use crate::classifier::ReturnShape;
use crate::context::{InvocationContext, Value};
use crate::error::CallResult;

/// Interceptor for members that return no value.
pub trait VoidInterceptor: Send + Sync {
    fn run(&self, ctx: &InvocationContext, next: VoidNext) -> CallResult<()> {
        next.run(ctx)
    }
}

/// Interceptor for members that return a value.
///
/// Also runs on future-returning members: there the continuation yields a
/// pending [`Value`] wrapping the remainder of the chain, so the interceptor
/// wraps the call itself rather than its eventual output.
pub trait ValueInterceptor: Send + Sync {
    fn run(&self, ctx: &InvocationContext, next: ValueNext) -> CallResult<Value> {
        next.run(ctx)
    }
}

/// Interceptor for members returning a future of no value.
#[async_trait]
pub trait AsyncVoidInterceptor: Send + Sync {
    async fn run_async(&self, ctx: &InvocationContext, next: AsyncVoidNext) -> CallResult<()> {
        next.run(ctx).await
    }
}

/// Interceptor for members returning a future of a value.
#[async_trait]
pub trait AsyncValueInterceptor: Send + Sync {
    async fn run_async(&self, ctx: &InvocationContext, next: AsyncValueNext) -> CallResult<Value> {
        next.run(ctx).await
    }
}

/// Declared call-shape capability of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    SyncVoid,
    SyncValue,
    AsyncVoid,
    AsyncValue,
}

impl Capability {
    /// Whether a marker with this capability executes on a member of `shape`.
    ///
    /// Sync-value also covers async-value; async-void does not cover void.
    pub fn supports(self, shape: &ReturnShape) -> bool {
        matches!(
            (self, shape),
            (Capability::SyncVoid, ReturnShape::Void)
                | (Capability::SyncValue, ReturnShape::Value(_))
                | (Capability::SyncValue, ReturnShape::AsyncValue(_))
                | (Capability::AsyncVoid, ReturnShape::AsyncVoid)
                | (Capability::AsyncValue, ReturnShape::AsyncValue(_))
        )
    }
}

#[derive(Clone)]
pub(crate) enum Interceptor {
    Void(Arc<dyn VoidInterceptor>),
    Value(Arc<dyn ValueInterceptor>),
    AsyncVoid(Arc<dyn AsyncVoidInterceptor>),
    AsyncValue(Arc<dyn AsyncValueInterceptor>),
}

/// Constructor argument recorded on a marker declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerArg {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for MarkerArg {
    fn from(v: bool) -> Self {
        MarkerArg::Bool(v)
    }
}

impl From<i64> for MarkerArg {
    fn from(v: i64) -> Self {
        MarkerArg::Int(v)
    }
}

impl From<i32> for MarkerArg {
    fn from(v: i32) -> Self {
        MarkerArg::Int(v as i64)
    }
}

impl From<f64> for MarkerArg {
    fn from(v: f64) -> Self {
        MarkerArg::Float(v)
    }
}

impl From<&str> for MarkerArg {
    fn from(v: &str) -> Self {
        MarkerArg::Str(v.to_string())
    }
}

impl From<String> for MarkerArg {
    fn from(v: String) -> Self {
        MarkerArg::Str(v)
    }
}

/// Positional and named arguments of a marker declaration, kept verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerArgs {
    pub positional: Vec<MarkerArg>,
    pub named: Vec<(String, MarkerArg)>,
}

impl MarkerArgs {
    /// Looks up a named argument.
    pub fn named(&self, name: &str) -> Option<&MarkerArg> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// True when the declaration carried no arguments.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// One declared interception point.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::{
///     Capability, InterceptorMarker, InvocationContext, ValueInterceptor, Value, ValueNext,
///     CallResult,
/// };
///
/// struct FixedFortyTwo;
///
/// impl ValueInterceptor for FixedFortyTwo {
///     fn run(&self, _ctx: &InvocationContext, _next: ValueNext) -> CallResult<Value> {
///         Ok(Value::new(42i32))
///     }
/// }
///
/// let marker = InterceptorMarker::sync_value(FixedFortyTwo).with_named("reason", "demo");
/// assert_eq!(marker.capability(), Capability::SyncValue);
/// assert!(marker.name().ends_with("FixedFortyTwo"));
/// ```
#[derive(Clone)]
pub struct InterceptorMarker {
    name: &'static str,
    args: MarkerArgs,
    interceptor: Interceptor,
}

impl InterceptorMarker {
    /// Marker for a synchronous void interceptor.
    pub fn sync_void<I: VoidInterceptor + 'static>(interceptor: I) -> Self {
        Self::from_parts(std::any::type_name::<I>(), Interceptor::Void(Arc::new(interceptor)))
    }

    /// Marker for a synchronous value interceptor.
    pub fn sync_value<I: ValueInterceptor + 'static>(interceptor: I) -> Self {
        Self::from_parts(std::any::type_name::<I>(), Interceptor::Value(Arc::new(interceptor)))
    }

    /// Marker for an async void interceptor.
    pub fn async_void<I: AsyncVoidInterceptor + 'static>(interceptor: I) -> Self {
        Self::from_parts(
            std::any::type_name::<I>(),
            Interceptor::AsyncVoid(Arc::new(interceptor)),
        )
    }

    /// Marker for an async value interceptor.
    pub fn async_value<I: AsyncValueInterceptor + 'static>(interceptor: I) -> Self {
        Self::from_parts(
            std::any::type_name::<I>(),
            Interceptor::AsyncValue(Arc::new(interceptor)),
        )
    }

    fn from_parts(name: &'static str, interceptor: Interceptor) -> Self {
        Self {
            name,
            args: MarkerArgs::default(),
            interceptor,
        }
    }

    /// Overrides the diagnostic name (defaults to the interceptor's type name).
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Appends a positional declaration argument.
    pub fn with_arg(mut self, value: impl Into<MarkerArg>) -> Self {
        self.args.positional.push(value.into());
        self
    }

    /// Appends a named declaration argument.
    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<MarkerArg>) -> Self {
        self.args.named.push((name.into(), value.into()));
        self
    }

    /// Diagnostic name of the marker.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declaration arguments, kept verbatim.
    pub fn args(&self) -> &MarkerArgs {
        &self.args
    }

    /// Which interceptor shape the marker carries.
    pub fn capability(&self) -> Capability {
        match self.interceptor {
            Interceptor::Void(_) => Capability::SyncVoid,
            Interceptor::Value(_) => Capability::SyncValue,
            Interceptor::AsyncVoid(_) => Capability::AsyncVoid,
            Interceptor::AsyncValue(_) => Capability::AsyncValue,
        }
    }

    /// Whether the marker can run on a member of this shape.
    pub fn supports(&self, shape: &ReturnShape) -> bool {
        self.capability().supports(shape)
    }

    pub(crate) fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }
}

impl fmt::Debug for InterceptorMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorMarker")
            .field("name", &self.name)
            .field("capability", &self.capability())
            .field("args", &self.args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TypeKey;

    struct Transparent;
    impl VoidInterceptor for Transparent {}
    impl AsyncVoidInterceptor for Transparent {}

    #[test]
    fn capability_matrix() {
        let value = ReturnShape::Value(TypeKey::of::<i32>());
        let async_value = ReturnShape::AsyncValue(TypeKey::of::<i32>());

        assert!(Capability::SyncVoid.supports(&ReturnShape::Void));
        assert!(!Capability::SyncVoid.supports(&ReturnShape::AsyncVoid));
        assert!(Capability::SyncValue.supports(&value));
        assert!(Capability::SyncValue.supports(&async_value));
        assert!(!Capability::SyncValue.supports(&ReturnShape::AsyncVoid));
        assert!(Capability::AsyncVoid.supports(&ReturnShape::AsyncVoid));
        assert!(!Capability::AsyncVoid.supports(&ReturnShape::Void));
        assert!(Capability::AsyncValue.supports(&async_value));
        assert!(!Capability::AsyncValue.supports(&value));
    }

    #[test]
    fn args_are_kept_in_declaration_order() {
        let marker = InterceptorMarker::sync_void(Transparent)
            .with_arg(3)
            .with_arg("x")
            .with_named("retries", 2);
        assert_eq!(
            marker.args().positional,
            vec![MarkerArg::Int(3), MarkerArg::Str("x".into())]
        );
        assert_eq!(marker.args().named("retries"), Some(&MarkerArg::Int(2)));
        assert_eq!(marker.args().named("missing"), None);
    }

    #[test]
    fn same_type_can_back_different_capabilities() {
        let sync = InterceptorMarker::sync_void(Transparent);
        let asynchronous = InterceptorMarker::async_void(Transparent);
        assert_eq!(sync.capability(), Capability::SyncVoid);
        assert_eq!(asynchronous.capability(), Capability::AsyncVoid);
        assert_eq!(sync.name(), asynchronous.name());
    }
}
