//! Chain execution: ordered markers around a terminal invocation.
//!
//! A chain is an immutable marker list plus the terminal [`Invoker`]. The
//! position within the chain is never stored on a shared runner: each
//! continuation handle carries the index of the marker it enters next, and
//! hands the marker a fresh handle one step further along. Calling a handle
//! twice re-enters at the same position, which is what makes retries work,
//! and an error unwinding out of a marker leaves nothing to restore.
//!
//! ```text
//! run(position):
//!   if position == markers.len():  terminal.invoke(ctx)
//!   else:                          markers[position].run(ctx, next(position + 1))
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::adapter::Invoker;
use crate::classifier::ReturnShape;
use crate::context::{InvocationContext, Value};
use crate::error::{CallResult, InterceptError};
use crate::marker::{Interceptor, InterceptorMarker};

struct ChainState {
    markers: Arc<[InterceptorMarker]>,
    terminal: Arc<dyn Invoker>,
}

#[derive(Clone)]
struct Cursor {
    state: Arc<ChainState>,
    position: usize,
}

impl Cursor {
    fn start(state: Arc<ChainState>) -> Self {
        Self { state, position: 0 }
    }

    fn marker(&self) -> Option<&InterceptorMarker> {
        self.state.markers.get(self.position)
    }

    fn advance(&self) -> Self {
        Self {
            state: self.state.clone(),
            position: self.position + 1,
        }
    }

    fn mismatch(&self, marker: &InterceptorMarker, shape: &'static str) -> crate::error::BoxError {
        InterceptError::ShapeMismatch {
            member: shape.to_string(),
            marker: marker.name(),
        }
        .into()
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position)
            .field("len", &self.state.markers.len())
            .finish()
    }
}

/// Continuation handle for no-value chains.
#[derive(Clone, Debug)]
pub struct VoidNext {
    cursor: Cursor,
}

impl VoidNext {
    /// Runs the rest of the chain.
    pub fn run(&self, ctx: &InvocationContext) -> CallResult<()> {
        let cursor = &self.cursor;
        match cursor.marker() {
            None => cursor.state.terminal.invoke(ctx).map(|_| ()),
            Some(marker) => match marker.interceptor() {
                Interceptor::Void(i) => i.run(ctx, VoidNext { cursor: cursor.advance() }),
                _ => Err(cursor.mismatch(marker, "void")),
            },
        }
    }

    /// Index of the marker this handle enters next.
    pub fn position(&self) -> usize {
        self.cursor.position
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ValueMode {
    Immediate,
    /// Inside an async chain: the rest of the chain is handed back unawaited
    Deferred,
}

/// Continuation handle for value-returning chains.
///
/// On a future-returning member the handle runs in deferred mode: `run`
/// returns a pending [`Value`] wrapping the remainder of the chain, which the
/// async runner awaits after the marker returns.
#[derive(Clone, Debug)]
pub struct ValueNext {
    cursor: Cursor,
    mode: ValueMode,
}

impl ValueNext {
    /// Runs the rest of the chain.
    pub fn run(&self, ctx: &InvocationContext) -> CallResult<Value> {
        if self.mode == ValueMode::Deferred {
            let rest = AsyncValueNext {
                cursor: self.cursor.clone(),
            };
            return Ok(Value::pending(rest.run(ctx)));
        }

        let cursor = &self.cursor;
        match cursor.marker() {
            None => cursor.state.terminal.invoke(ctx),
            Some(marker) => match marker.interceptor() {
                Interceptor::Value(i) => i.run(
                    ctx,
                    ValueNext {
                        cursor: cursor.advance(),
                        mode: ValueMode::Immediate,
                    },
                ),
                _ => Err(cursor.mismatch(marker, "value")),
            },
        }
    }

    /// True when `run` yields a pending value rather than a finished one.
    pub fn is_deferred(&self) -> bool {
        self.mode == ValueMode::Deferred
    }

    /// Index of the marker this continuation runs next.
    pub fn position(&self) -> usize {
        self.cursor.position
    }
}

/// Continuation handle for chains returning a future of no value.
#[derive(Clone, Debug)]
pub struct AsyncVoidNext {
    cursor: Cursor,
}

impl AsyncVoidNext {
    /// Runs the rest of the chain.
    ///
    /// The returned future owns its own handle to the call context, so it can
    /// be stored or spawned.
    pub fn run(&self, ctx: &InvocationContext) -> BoxFuture<'static, CallResult<()>> {
        let cursor = self.cursor.clone();
        let ctx = ctx.clone();
        Box::pin(async move {
            let interceptor = cursor.marker().map(|m| (m.name(), m.interceptor().clone()));
            match interceptor {
                None => cursor.state.terminal.invoke_async(&ctx).await.map(|_| ()),
                Some((_, Interceptor::AsyncVoid(i))) => {
                    let next = AsyncVoidNext {
                        cursor: cursor.advance(),
                    };
                    i.run_async(&ctx, next).await
                }
                Some((name, _)) => Err(InterceptError::ShapeMismatch {
                    member: "future<()>".to_string(),
                    marker: name,
                }
                .into()),
            }
        })
    }

    /// Index of the marker this continuation runs next.
    pub fn position(&self) -> usize {
        self.cursor.position
    }
}

/// Continuation handle for chains returning a future of a value.
#[derive(Clone, Debug)]
pub struct AsyncValueNext {
    cursor: Cursor,
}

impl AsyncValueNext {
    /// Runs the rest of the chain.
    ///
    /// Sync-value markers met along the way run with a deferred
    /// [`ValueNext`]; whatever they return is awaited here if it is pending.
    pub fn run(&self, ctx: &InvocationContext) -> BoxFuture<'static, CallResult<Value>> {
        let cursor = self.cursor.clone();
        let ctx = ctx.clone();
        Box::pin(async move {
            let interceptor = cursor.marker().map(|m| (m.name(), m.interceptor().clone()));
            match interceptor {
                None => cursor.state.terminal.invoke_async(&ctx).await,
                Some((_, Interceptor::AsyncValue(i))) => {
                    let next = AsyncValueNext {
                        cursor: cursor.advance(),
                    };
                    i.run_async(&ctx, next).await
                }
                Some((_, Interceptor::Value(i))) => {
                    let next = ValueNext {
                        cursor: cursor.advance(),
                        mode: ValueMode::Deferred,
                    };
                    let value = i.run(&ctx, next)?;
                    value.resolve().await
                }
                Some((name, _)) => Err(InterceptError::ShapeMismatch {
                    member: "future<value>".to_string(),
                    marker: name,
                }
                .into()),
            }
        })
    }

    /// Index of the marker this continuation runs next.
    pub fn position(&self) -> usize {
        self.cursor.position
    }
}

/// Executes one ordered marker list around a terminal invocation.
///
/// Built fresh for every top-level call. Markers run in list order on the way
/// in and, for those that continue, unwind in reverse order with the terminal
/// call innermost.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use ferrous_intercept::{
///     args, CallResult, ChainRunner, FnInvoker, InterceptorMarker, InvocationContext,
///     MemberKey, TypeKey, Value, ValueInterceptor, ValueNext,
/// };
///
/// struct Double;
///
/// impl ValueInterceptor for Double {
///     fn run(&self, ctx: &InvocationContext, next: ValueNext) -> CallResult<Value> {
///         let inner = next.run(ctx)?.downcast::<i32>()?;
///         Ok(Value::new(inner * 2))
///     }
/// }
///
/// let runner = ChainRunner::new(
///     vec![InterceptorMarker::sync_value(Double)].into(),
///     Arc::new(FnInvoker::new(|ctx: &InvocationContext| {
///         Ok(Value::new(ctx.arg::<i32>(0)? + ctx.arg::<i32>(1)?))
///     })),
/// );
/// let ctx = InvocationContext::detached(
///     TypeKey::of::<()>(),
///     MemberKey::method("add").param::<i32>().param::<i32>(),
///     args![2i32, 3i32],
/// );
/// let result = runner.run_value(&ctx).unwrap();
/// assert_eq!(result.downcast::<i32>().unwrap(), 10);
/// ```
pub struct ChainRunner {
    state: Arc<ChainState>,
}

impl ChainRunner {
    /// Chain of `markers` around `terminal`, outermost first.
    pub fn new(markers: Arc<[InterceptorMarker]>, terminal: Arc<dyn Invoker>) -> Self {
        Self {
            state: Arc::new(ChainState { markers, terminal }),
        }
    }

    /// Number of markers in the chain.
    pub fn len(&self) -> usize {
        self.state.markers.len()
    }

    /// True when calls go straight to the terminal.
    pub fn is_empty(&self) -> bool {
        self.state.markers.is_empty()
    }

    fn cursor(&self) -> Cursor {
        Cursor::start(self.state.clone())
    }

    /// Runs a synchronous void chain.
    pub fn run_void(&self, ctx: &InvocationContext) -> CallResult<()> {
        tracing::trace!(member = %ctx.member(), markers = self.len(), "entering chain");
        let result = VoidNext { cursor: self.cursor() }.run(ctx);
        tracing::trace!(member = %ctx.member(), ok = result.is_ok(), "leaving chain");
        result
    }

    /// Runs a synchronous value chain.
    pub fn run_value(&self, ctx: &InvocationContext) -> CallResult<Value> {
        tracing::trace!(member = %ctx.member(), markers = self.len(), "entering chain");
        let next = ValueNext {
            cursor: self.cursor(),
            mode: ValueMode::Immediate,
        };
        let result = next.run(ctx);
        tracing::trace!(member = %ctx.member(), ok = result.is_ok(), "leaving chain");
        result
    }

    /// Runs a future-returning void chain.
    pub fn run_async_void(&self, ctx: &InvocationContext) -> BoxFuture<'static, CallResult<()>> {
        tracing::trace!(member = %ctx.member(), markers = self.len(), "entering async chain");
        AsyncVoidNext { cursor: self.cursor() }.run(ctx)
    }

    /// Runs a future-returning value chain.
    pub fn run_async_value(&self, ctx: &InvocationContext) -> BoxFuture<'static, CallResult<Value>> {
        tracing::trace!(member = %ctx.member(), markers = self.len(), "entering async chain");
        AsyncValueNext { cursor: self.cursor() }.run(ctx)
    }

    /// Runs a synchronous chain of the given shape; void shapes yield `Value::unit()`.
    pub fn run(&self, shape: &ReturnShape, ctx: &InvocationContext) -> CallResult<Value> {
        match shape {
            ReturnShape::Void => self.run_void(ctx).map(|_| Value::unit()),
            ReturnShape::Value(_) => self.run_value(ctx),
            ReturnShape::AsyncVoid | ReturnShape::AsyncValue(_) => {
                Err(InterceptError::TargetShape(format!(
                    "{} returns a future and must be called asynchronously",
                    ctx.member()
                ))
                .into())
            }
        }
    }

    /// Runs an async chain of the given shape; void shapes yield `Value::unit()`.
    pub fn run_async(
        &self,
        shape: &ReturnShape,
        ctx: &InvocationContext,
    ) -> BoxFuture<'static, CallResult<Value>> {
        match shape {
            ReturnShape::AsyncVoid => {
                let fut = self.run_async_void(ctx);
                Box::pin(async move { fut.await.map(|_| Value::unit()) })
            }
            ReturnShape::AsyncValue(_) => self.run_async_value(ctx),
            ReturnShape::Void | ReturnShape::Value(_) => {
                let err = InterceptError::TargetShape(format!(
                    "{} does not return a future",
                    ctx.member()
                ));
                Box::pin(futures::future::ready(Err(err.into())))
            }
        }
    }
}

impl fmt::Debug for ChainRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainRunner")
            .field(
                "markers",
                &self.state.markers.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
