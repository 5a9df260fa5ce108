#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ferrous_intercept::*;
use parking_lot::Mutex;

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().clone()
}

pub trait Calculator: Send + Sync {
    fn add(&self, a: i32, b: i32) -> CallResult<i32>;
    fn divide(&self, dividend: i32, divisor: i32, remainder: &mut i32) -> CallResult<i32>;
    fn reset(&self) -> CallResult<()>;
}

pub fn add_key() -> MemberKey {
    MemberKey::method("add").param::<i32>().param::<i32>()
}

pub fn divide_key() -> MemberKey {
    MemberKey::method("divide")
        .param::<i32>()
        .param::<i32>()
        .by_ref::<i32>()
}

pub fn reset_key() -> MemberKey {
    MemberKey::method("reset")
}

/// Real implementation; every body execution bumps `calls` and logs "real".
pub struct CountingCalculator {
    pub calls: Arc<AtomicUsize>,
    pub journal: Journal,
}

impl CountingCalculator {
    pub fn new(calls: Arc<AtomicUsize>, journal: Journal) -> Self {
        Self { calls, journal }
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().push("real".to_string());
    }
}

impl Calculator for CountingCalculator {
    fn add(&self, a: i32, b: i32) -> CallResult<i32> {
        self.touch();
        Ok(a + b)
    }

    fn divide(&self, dividend: i32, divisor: i32, remainder: &mut i32) -> CallResult<i32> {
        self.touch();
        if divisor == 0 {
            return Err(Box::new(DivideByZero));
        }
        *remainder = dividend % divisor;
        Ok(dividend / divisor)
    }

    fn reset(&self) -> CallResult<()> {
        self.touch();
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct DivideByZero;

impl std::fmt::Display for DivideByZero {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("division by zero")
    }
}

impl std::error::Error for DivideByZero {}

/// Typed face of a calculator proxy.
pub struct CalculatorProxy(pub Arc<ProxyObject>);

impl Calculator for CalculatorProxy {
    fn add(&self, a: i32, b: i32) -> CallResult<i32> {
        self.0.invoke(&add_key(), args![a, b])
    }

    fn divide(&self, dividend: i32, divisor: i32, remainder: &mut i32) -> CallResult<i32> {
        let outcome = self.0.call(&divide_key(), args![dividend, divisor, *remainder])?;
        outcome.write_back(2, remainder)?;
        Ok(outcome.into_value::<i32>()?)
    }

    fn reset(&self) -> CallResult<()> {
        self.0.invoke_void(&reset_key(), args![])
    }
}

pub fn add_member() -> MemberDescriptor {
    MemberDescriptor::method("add")
        .param::<i32>()
        .param::<i32>()
        .returns::<i32>()
        .target(MethodTarget::interface::<dyn Calculator, i32, _>(|calc, args| {
            calc.add(args.arg(0)?, args.arg(1)?)
        }))
}

pub fn divide_member() -> MemberDescriptor {
    MemberDescriptor::method("divide")
        .param::<i32>()
        .param::<i32>()
        .by_ref::<i32>()
        .returns::<i32>()
        .target(MethodTarget::interface::<dyn Calculator, i32, _>(|calc, args| {
            let mut remainder = args.arg::<i32>(2)?;
            let quotient = calc.divide(args.arg(0)?, args.arg(1)?, &mut remainder);
            args.set(2, remainder)?;
            quotient
        }))
}

pub fn reset_member() -> MemberDescriptor {
    MemberDescriptor::method("reset").target(MethodTarget::interface::<dyn Calculator, (), _>(
        |calc, _| calc.reset(),
    ))
}

fn with_markers(member: MemberDescriptor, markers: Vec<InterceptorMarker>) -> MemberDescriptor {
    markers.into_iter().fold(member, |m, marker| m.marker(marker))
}

/// Calculator interface description with the given markers on `add` and `divide`.
pub fn calculator_service(
    add_markers: Vec<InterceptorMarker>,
    divide_markers: Vec<InterceptorMarker>,
) -> Arc<TypeDescriptor> {
    TypeDescriptor::interface::<dyn Calculator>()
        .member(with_markers(add_member(), add_markers))
        .member(with_markers(divide_member(), divide_markers))
        .member(reset_member())
        .surface::<dyn Calculator, _>(|proxy| Arc::new(CalculatorProxy(proxy)) as Arc<dyn Calculator>)
        .build()
}

/// Plans a singleton calculator registration and resolves it.
pub fn resolve_calculator(
    planner: &ProxyPlanner,
    calls: Arc<AtomicUsize>,
    journal: Journal,
) -> Arc<dyn Calculator> {
    let mut services = ServiceCollection::new();
    services.add_trait_instance::<dyn Calculator>(Arc::new(CountingCalculator::new(calls, journal)));
    services.intercept_with(planner).unwrap();
    services.build().get_required_trait::<dyn Calculator>()
}

/// Logs "<name>-enter" / "<name>-exit" around the continuation, for every call shape.
pub struct Log {
    pub name: &'static str,
    pub journal: Journal,
}

impl Log {
    pub fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: journal.clone(),
        }
    }

    fn enter(&self) {
        self.journal.lock().push(format!("{}-enter", self.name));
    }

    fn exit(&self) {
        self.journal.lock().push(format!("{}-exit", self.name));
    }
}

impl VoidInterceptor for Log {
    fn run(&self, ctx: &InvocationContext, next: VoidNext) -> CallResult<()> {
        self.enter();
        let result = next.run(ctx);
        self.exit();
        result
    }
}

impl ValueInterceptor for Log {
    fn run(&self, ctx: &InvocationContext, next: ValueNext) -> CallResult<Value> {
        self.enter();
        let result = next.run(ctx);
        self.exit();
        result
    }
}

#[async_trait]
impl AsyncVoidInterceptor for Log {
    async fn run_async(&self, ctx: &InvocationContext, next: AsyncVoidNext) -> CallResult<()> {
        self.enter();
        let result = next.run(ctx).await;
        self.exit();
        result
    }
}

#[async_trait]
impl AsyncValueInterceptor for Log {
    async fn run_async(&self, ctx: &InvocationContext, next: AsyncValueNext) -> CallResult<Value> {
        self.enter();
        let result = next.run(ctx).await;
        self.exit();
        result
    }
}

pub fn log_value(name: &'static str, journal: &Journal) -> InterceptorMarker {
    InterceptorMarker::sync_value(Log::new(name, journal)).named(name)
}

pub fn log_void(name: &'static str, journal: &Journal) -> InterceptorMarker {
    InterceptorMarker::sync_void(Log::new(name, journal)).named(name)
}

/// Rewrites every i32 argument as itself times one, then continues.
pub struct DoubleAndContinue;

impl ValueInterceptor for DoubleAndContinue {
    fn run(&self, ctx: &InvocationContext, next: ValueNext) -> CallResult<Value> {
        ctx.with_arguments(|args| -> InterceptResult<()> {
            for index in 0..args.len() {
                if let Ok(v) = args.arg::<i32>(index) {
                    args.set(index, v * 1)?;
                }
            }
            Ok(())
        })?;
        next.run(ctx)
    }
}

/// Returns 42 without continuing.
pub struct FixedFortyTwo;

impl ValueInterceptor for FixedFortyTwo {
    fn run(&self, _ctx: &InvocationContext, _next: ValueNext) -> CallResult<Value> {
        Ok(Value::new(42i32))
    }
}

/// Calls the continuation up to `attempts` times until it succeeds.
pub struct Retry {
    pub attempts: usize,
}

impl ValueInterceptor for Retry {
    fn run(&self, ctx: &InvocationContext, next: ValueNext) -> CallResult<Value> {
        let mut result = next.run(ctx);
        let mut attempt = 1;
        while result.is_err() && attempt < self.attempts {
            attempt += 1;
            result = next.run(ctx);
        }
        result
    }
}
