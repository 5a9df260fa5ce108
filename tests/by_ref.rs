mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use ferrous_intercept::*;

fn calculator_with_divide_markers(markers: Vec<InterceptorMarker>) -> (Arc<dyn Calculator>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let planner = ProxyPlanner::new();
    planner.describe(calculator_service(Vec::new(), markers));
    (resolve_calculator(&planner, calls.clone(), journal()), calls)
}

/// Proxy object for the calculator, reached without the typed surface.
fn raw_proxy(divide_markers: Vec<InterceptorMarker>) -> Arc<ProxyObject> {
    let planner = ProxyPlanner::new();
    let service = TypeDescriptor::interface::<dyn Calculator>()
        .member(add_member().marker(InterceptorMarker::sync_value(DoubleAndContinue)))
        .member(divide_markers.into_iter().fold(divide_member(), |m, marker| m.marker(marker)))
        .member(reset_member())
        .surface_with(|proxy| proxy as AnyArc)
        .build();
    planner.describe(service.clone());

    let calc: Arc<dyn Calculator> =
        Arc::new(CountingCalculator::new(Arc::new(AtomicUsize::new(0)), journal()));
    let entry = planner.entry(&service, &service).unwrap();
    entry
        .proxy_type()
        .unwrap()
        .construct(Arc::new(EmptyResolver), HeldInstance::shared(Arc::new(calc)))
        .unwrap()
        .downcast::<ProxyObject>()
        .unwrap()
}

/// Answers 0 and leaves the arguments alone.
struct Zero;

impl ValueInterceptor for Zero {
    fn run(&self, _ctx: &InvocationContext, _next: ValueNext) -> CallResult<Value> {
        Ok(Value::new(0i32))
    }
}

/// Answers 0 and writes `remainder` into the by-reference slot.
struct WriteRemainder(i32);

impl ValueInterceptor for WriteRemainder {
    fn run(&self, ctx: &InvocationContext, _next: ValueNext) -> CallResult<Value> {
        ctx.set_arg(2, self.0)?;
        Ok(Value::new(0i32))
    }
}

/// Records the by-reference slot as the body left it.
struct Observe(Journal);

impl ValueInterceptor for Observe {
    fn run(&self, ctx: &InvocationContext, next: ValueNext) -> CallResult<Value> {
        let before = ctx.arg::<i32>(2)?;
        let result = next.run(ctx);
        let after = ctx.arg::<i32>(2)?;
        self.0.lock().push(format!("{}->{}", before, after));
        result
    }
}

#[test]
fn body_output_reaches_the_caller_through_markers() {
    let log = journal();
    let (calc, calls) = calculator_with_divide_markers(vec![InterceptorMarker::sync_value(Observe(log.clone()))]);

    let mut remainder = -1;
    assert_eq!(calc.divide(17, 5, &mut remainder).unwrap(), 3);
    assert_eq!(remainder, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&log), vec!["-1->2"]);
}

#[test]
fn short_circuit_keeps_the_callers_value() {
    let (calc, calls) = calculator_with_divide_markers(vec![InterceptorMarker::sync_value(Zero)]);

    let mut remainder = 99;
    assert_eq!(calc.divide(17, 5, &mut remainder).unwrap(), 0);
    assert_eq!(remainder, 99);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn markers_can_write_by_reference_slots() {
    let (calc, _) = calculator_with_divide_markers(vec![InterceptorMarker::sync_value(WriteRemainder(7))]);

    let mut remainder = 99;
    assert_eq!(calc.divide(17, 5, &mut remainder).unwrap(), 0);
    assert_eq!(remainder, 7);
}

#[test]
fn failed_calls_do_not_write_back() {
    let (calc, _) = calculator_with_divide_markers(vec![InterceptorMarker::sync_value(Observe(journal()))]);

    let mut remainder = 4;
    assert!(calc.divide(1, 0, &mut remainder).is_err());
    assert_eq!(remainder, 4);
}

#[test]
fn outcomes_expose_final_arguments() {
    let proxy = raw_proxy(vec![InterceptorMarker::sync_value(WriteRemainder(3))]);
    let divide = divide_key();

    let outcome = proxy.call(&divide, args![9i32, 2i32, 0i32]).unwrap();
    assert_eq!(outcome.arguments().arg::<i32>(2).unwrap(), 3);
    assert_eq!(outcome.value().downcast_ref::<i32>(), Some(&0));

    let mut slot = 0;
    outcome.write_back(2, &mut slot).unwrap();
    assert_eq!(slot, 3);
}

#[test]
fn write_back_rejects_by_value_positions() {
    let proxy = raw_proxy(Vec::new());

    let outcome = proxy.call(&add_key(), args![1i32, 2i32]).unwrap();
    let mut slot = 0;
    assert_eq!(outcome.write_back(0, &mut slot), Err(InterceptError::NotByRef(0)));
    assert_eq!(slot, 0);

    let outcome = proxy.call(&divide_key(), args![9i32, 2i32, 0i32]).unwrap();
    assert_eq!(outcome.write_back(1, &mut slot), Err(InterceptError::NotByRef(1)));
}

#[test]
fn unknown_members_are_call_errors() {
    let proxy = raw_proxy(Vec::new());
    let err = proxy
        .call(&MemberKey::method("multiply").param::<i32>().param::<i32>(), args![1i32, 2i32])
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InterceptError>(),
        Some(InterceptError::UnknownMember { .. })
    ));
}

#[test]
fn by_ref_positions_are_part_of_member_identity() {
    let proxy = raw_proxy(Vec::new());
    // Same name and types, but the third parameter passed by value
    let by_value = MemberKey::method("divide").param::<i32>().param::<i32>().param::<i32>();
    assert!(proxy.plan(&by_value).is_none());
    assert_eq!(proxy.plan(&divide_key()).unwrap().by_ref_positions(), &[2]);
}
