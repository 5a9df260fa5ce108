//! # ferrous-intercept
//!
//! Marker-driven method interception for dependency-injected services.
//!
//! Interceptor markers are attached to members of described service and
//! implementation types. When a service collection is planned, every
//! registration whose members carry markers is rewritten to construct a proxy;
//! calls through the proxy run an ordered chain of interceptors around the
//! real call.
//!
//! ## Features
//!
//! - **Four call shapes**: no value, value, future of no value, future of a value
//! - **Ordered chains**: declaration order on the way in, reverse order on the way out
//! - **Re-entrant continuations**: a marker may call `next` more than once (retries)
//! - **Memoized planning**: one proxy type per service/implementation pair, thread-safe
//! - **Lifetimes preserved**: Singleton, Scoped and Transient registrations stay as they were
//! - **By-reference parameters**: final argument values are written back to the caller
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ferrous_intercept::*;
//!
//! trait Calculator: Send + Sync {
//!     fn add(&self, a: i32, b: i32) -> CallResult<i32>;
//! }
//!
//! struct Adder;
//! impl Calculator for Adder {
//!     fn add(&self, a: i32, b: i32) -> CallResult<i32> {
//!         Ok(a + b)
//!     }
//! }
//!
//! // The typed face of the proxy: forwards each method to the proxy object.
//! struct CalculatorProxy(Arc<ProxyObject>);
//! impl Calculator for CalculatorProxy {
//!     fn add(&self, a: i32, b: i32) -> CallResult<i32> {
//!         let member = MemberKey::method("add").param::<i32>().param::<i32>();
//!         self.0.invoke(&member, args![a, b])
//!     }
//! }
//!
//! struct Doubling;
//! impl ValueInterceptor for Doubling {
//!     fn run(&self, ctx: &InvocationContext, next: ValueNext) -> CallResult<Value> {
//!         let inner = next.run(ctx)?.downcast::<i32>()?;
//!         Ok(Value::new(inner * 2))
//!     }
//! }
//!
//! let planner = ProxyPlanner::new();
//! planner.describe(
//!     TypeDescriptor::interface::<dyn Calculator>()
//!         .member(
//!             MemberDescriptor::method("add")
//!                 .param::<i32>()
//!                 .param::<i32>()
//!                 .returns::<i32>()
//!                 .marker(InterceptorMarker::sync_value(Doubling))
//!                 .target(MethodTarget::interface::<dyn Calculator, i32, _>(|calc, args| {
//!                     calc.add(args.arg(0)?, args.arg(1)?)
//!                 })),
//!         )
//!         .surface::<dyn Calculator, _>(|proxy| Arc::new(CalculatorProxy(proxy)) as Arc<dyn Calculator>)
//!         .build(),
//! );
//!
//! let mut services = ServiceCollection::new();
//! services.add_trait_instance::<dyn Calculator>(Arc::new(Adder));
//! services.intercept_with(&planner).unwrap();
//!
//! let provider = services.build();
//! let calculator = provider.get_required_trait::<dyn Calculator>();
//! assert_eq!(calculator.add(2, 3).unwrap(), 10);
//! ```
//!
//! ## Async Members
//!
//! Future-returning members run [`AsyncVoidInterceptor`] / [`AsyncValueInterceptor`]
//! markers. A [`ValueInterceptor`] may also sit on a future-returning member:
//! its continuation then yields a pending [`Value`] that the chain awaits once
//! the marker returns, so the marker wraps the call rather than its output.
//!
//! ## Configuration
//!
//! [`InterceptionOptions`] selects lenient or strict marker validation and
//! optional plan logging. Options can be read from the environment
//! ([`VALIDATION_ENV`], [`LOG_PLANS_ENV`]) or, with the `config` feature, from JSON.

pub mod adapter;
pub mod chain;
pub mod classifier;
pub mod collection;
pub mod config;
pub mod context;
pub mod error;
pub mod key;
pub mod marker;
pub mod model;
pub mod observer;
pub mod planner;
pub mod provider;
pub mod registration;
pub mod synthesis;

pub use adapter::{AdapterKind, BoundTarget, FnInvoker, GenericTarget, Invoker, MethodTarget};
pub use chain::{AsyncValueNext, AsyncVoidNext, ChainRunner, ValueNext, VoidNext};
pub use classifier::{MethodClassifier, MethodOverridePlan, ReturnShape};
pub use collection::ServiceCollection;
pub use config::{InterceptionOptions, ValidationMode, LOG_PLANS_ENV, VALIDATION_ENV};
pub use context::{Arguments, InvocationContext, Value};
pub use error::{BoxError, CallResult, InterceptError, InterceptResult};
pub use key::{MemberKey, MemberKind, ParamKey, ProxyCacheKey, TypeKey};
pub use marker::{
    AsyncValueInterceptor, AsyncVoidInterceptor, Capability, InterceptorMarker, MarkerArg,
    MarkerArgs, ValueInterceptor, VoidInterceptor,
};
pub use model::{
    MemberDescriptor, ResolvedMember, ReturnType, Surface, TypeBuilder, TypeDescriptor, TypeKind,
};
pub use observer::{LoggingObserver, PlanObserver, PlanOutcome};
pub use planner::{ProxyCacheEntry, ProxyPlanner};
pub use provider::{EmptyResolver, Resolver, ResolverExt, Scope, ServiceProvider};
pub use registration::{
    AnyArc, Constructor, Exposer, HeldInstance, ImplementationSource, Lifetime, ServiceRegistration,
};
pub use synthesis::{
    CallOutcome, DispatchProxyType, DispatchTableBackend, MemberBinding, ProxyObject, ProxyType,
    SynthesisRequest, SynthesisStrategy, TypeSynthesisBackend,
};

// Interceptor implementations need the same attribute the traits are declared with.
pub use async_trait::async_trait;
