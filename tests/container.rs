mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use ferrous_intercept::*;

fn counting_registration(services: &mut ServiceCollection, lifetime: Lifetime, built: &Arc<AtomicUsize>) {
    let built = built.clone();
    services.add_trait_factory::<dyn Calculator, _>(lifetime, move |_| {
        built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingCalculator::new(Arc::new(AtomicUsize::new(0)), journal())) as Arc<dyn Calculator>)
    });
}

fn intercepting_planner() -> ProxyPlanner {
    let planner = ProxyPlanner::new();
    planner.describe(calculator_service(vec![InterceptorMarker::sync_value(FixedFortyTwo)], Vec::new()));
    planner
}

#[test]
fn intercepted_singletons_are_shared() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut services = ServiceCollection::new();
    counting_registration(&mut services, Lifetime::Singleton, &built);
    services.intercept_with(&intercepting_planner()).unwrap();
    let provider = services.build();

    let a = provider.get_required_trait::<dyn Calculator>();
    let b = provider.create_scope().get_required_trait::<dyn Calculator>();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.add(1, 1).unwrap(), 42);
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn intercepted_transients_wrap_fresh_instances() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut services = ServiceCollection::new();
    counting_registration(&mut services, Lifetime::Transient, &built);
    services.intercept_with(&intercepting_planner()).unwrap();
    let provider = services.build();

    let a = provider.get_required_trait::<dyn Calculator>();
    let b = provider.get_required_trait::<dyn Calculator>();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(b.add(1, 1).unwrap(), 42);
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[test]
fn intercepted_scoped_services_live_per_scope() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut services = ServiceCollection::new();
    counting_registration(&mut services, Lifetime::Scoped, &built);
    services.intercept_with(&intercepting_planner()).unwrap();
    let provider = services.build();

    let first = provider.create_scope();
    let second = provider.create_scope();
    let a = first.get_required_trait::<dyn Calculator>();
    let b = first.get_required_trait::<dyn Calculator>();
    let c = second.get_required_trait::<dyn Calculator>();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(built.load(Ordering::SeqCst), 2);
    assert!(matches!(
        provider.get_trait::<dyn Calculator>(),
        Err(InterceptError::WrongLifetime(_))
    ));
}

#[test]
fn other_registrations_are_untouched() {
    let mut services = ServiceCollection::new();
    services.add_instance(String::from("plain"));
    counting_registration(&mut services, Lifetime::Singleton, &Arc::new(AtomicUsize::new(0)));
    services.intercept_with(&intercepting_planner()).unwrap();

    let provider = services.build();
    assert!(!provider.registration(&TypeKey::of::<String>()).unwrap().is_intercepted());
    assert!(provider
        .registration(&TypeKey::of::<dyn Calculator>())
        .unwrap()
        .is_intercepted());
    assert_eq!(*provider.get_required::<String>(), "plain");
}

struct Offset(i32);

/// Adds the registered offset to the result, resolved per call from the proxy's services.
struct AddOffset;

impl ValueInterceptor for AddOffset {
    fn run(&self, ctx: &InvocationContext, next: ValueNext) -> CallResult<Value> {
        let offset = ctx.services().get::<Offset>()?;
        let sum = next.run(ctx)?.downcast::<i32>()?;
        Ok(Value::new(sum + offset.0))
    }
}

#[test]
fn markers_resolve_services_through_the_context() {
    let planner = ProxyPlanner::new();
    planner.describe(calculator_service(vec![InterceptorMarker::sync_value(AddOffset)], Vec::new()));

    let mut services = ServiceCollection::new();
    services.add_instance(Offset(100));
    counting_registration(&mut services, Lifetime::Transient, &Arc::new(AtomicUsize::new(0)));
    services.intercept_with(&planner).unwrap();

    let calc = services.build().get_required_trait::<dyn Calculator>();
    assert_eq!(calc.add(2, 3).unwrap(), 105);
}

#[test]
fn missing_services_inside_markers_surface_as_call_errors() {
    let planner = ProxyPlanner::new();
    planner.describe(calculator_service(vec![InterceptorMarker::sync_value(AddOffset)], Vec::new()));

    let mut services = ServiceCollection::new();
    counting_registration(&mut services, Lifetime::Transient, &Arc::new(AtomicUsize::new(0)));
    services.intercept_with(&planner).unwrap();

    let calc = services.build().get_required_trait::<dyn Calculator>();
    let err = calc.add(2, 3).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InterceptError>(),
        Some(InterceptError::NotFound(_))
    ));
}

trait Greeter: Send + Sync {
    fn greet(&self, name: String) -> CallResult<String>;
    fn id(&self) -> CallResult<u32>;
}

fn greet_key() -> MemberKey {
    MemberKey::method("greet").param::<String>()
}

fn id_key() -> MemberKey {
    MemberKey::method("id")
}

struct GreeterProxy(Arc<ProxyObject>);

impl Greeter for GreeterProxy {
    fn greet(&self, name: String) -> CallResult<String> {
        self.0.invoke(&greet_key(), args![name])
    }

    fn id(&self) -> CallResult<u32> {
        self.0.invoke(&id_key(), args![])
    }
}

struct English {
    calls: Arc<AtomicUsize>,
}

impl Greeter for English {
    fn greet(&self, name: String) -> CallResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("hello {}", name))
    }

    fn id(&self) -> CallResult<u32> {
        Ok(1)
    }
}

struct Shout;

impl ValueInterceptor for Shout {
    fn run(&self, ctx: &InvocationContext, next: ValueNext) -> CallResult<Value> {
        let text = next.run(ctx)?.downcast::<String>()?;
        Ok(Value::new(text.to_uppercase()))
    }
}

struct Forty;

impl ValueInterceptor for Forty {
    fn run(&self, _ctx: &InvocationContext, _next: ValueNext) -> CallResult<Value> {
        Ok(Value::new(40u32))
    }
}

/// Greeter as a class: `greet` is virtual, `id` is not.
fn greeter_base() -> TypeBuilder {
    TypeDescriptor::class::<dyn Greeter>()
        .member(
            MemberDescriptor::from_key(greet_key())
                .returns::<String>()
                .marker(InterceptorMarker::sync_value(Shout))
                .target(MethodTarget::interface::<dyn Greeter, String, _>(|g, args| {
                    g.greet(args.arg(0)?)
                })),
        )
        .member(
            MemberDescriptor::from_key(id_key())
                .returns::<u32>()
                .non_virtual()
                .marker(InterceptorMarker::sync_value(Forty))
                .target(MethodTarget::interface::<dyn Greeter, u32, _>(|g, _| g.id())),
        )
        .surface::<dyn Greeter, _>(|proxy| Arc::new(GreeterProxy(proxy)) as Arc<dyn Greeter>)
}

#[test]
fn derived_classes_are_proxied_by_subclassing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let base = greeter_base().build();
    let planner = ProxyPlanner::new();
    planner.describe(base.clone());
    planner.describe(
        TypeDescriptor::class::<English>()
            .extends(base)
            .default_constructor()
            // Redeclared with a typed entry point on the concrete class
            .member(
                MemberDescriptor::from_key(greet_key())
                    .returns::<String>()
                    .target(MethodTarget::compiled::<English, String, _>(|e, args| {
                        e.greet(args.arg(0)?)
                    })),
            )
            .build(),
    );

    let seen = calls.clone();
    let mut services = ServiceCollection::new();
    services.add_trait_type::<dyn Greeter, English, _, _>(
        Lifetime::Singleton,
        move |_| Ok(English { calls: seen.clone() }),
        |e| e as Arc<dyn Greeter>,
    );
    services.intercept_with(&planner).unwrap();

    let (key, entry) = planner.cached_entries().remove(0);
    assert_eq!(key, ProxyCacheKey::new(TypeKey::of::<dyn Greeter>(), TypeKey::of::<English>()));
    assert_eq!(
        entry.proxy_type().unwrap().strategy(),
        SynthesisStrategy::TrueSubclass
    );

    let greeter = services.build().get_required_trait::<dyn Greeter>();
    assert_eq!(greeter.greet("ada".to_string()).unwrap(), "HELLO ADA");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Non-virtual members cannot be overridden and go straight to the instance
    assert_eq!(greeter.id().unwrap(), 1);
}

#[test]
fn abstract_members_without_a_body_fail_when_reached() {
    let log = journal();
    let planner = ProxyPlanner::new();
    planner.describe(
        TypeDescriptor::class::<dyn Greeter>()
            .abstract_type()
            .member(
                MemberDescriptor::from_key(greet_key())
                    .returns::<String>()
                    .abstract_member()
                    .marker(log_value("L", &log)),
            )
            .member(
                MemberDescriptor::from_key(id_key())
                    .returns::<u32>()
                    .target(MethodTarget::interface::<dyn Greeter, u32, _>(|g, _| g.id())),
            )
            .surface::<dyn Greeter, _>(|proxy| Arc::new(GreeterProxy(proxy)) as Arc<dyn Greeter>)
            .build(),
    );

    let mut services = ServiceCollection::new();
    services.add_trait_factory::<dyn Greeter, _>(Lifetime::Transient, |_| {
        Ok(Arc::new(English {
            calls: Arc::new(AtomicUsize::new(0)),
        }) as Arc<dyn Greeter>)
    });
    services.intercept_with(&planner).unwrap();
    let (_, entry) = planner.cached_entries().remove(0);
    assert_eq!(
        entry.proxy_type().unwrap().strategy(),
        SynthesisStrategy::SubclassAlwaysProxy
    );

    let greeter = services.build().get_required_trait::<dyn Greeter>();
    let err = greeter.greet("ada".to_string()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InterceptError>(),
        Some(InterceptError::MissingMethodTarget(_))
    ));
    assert_eq!(entries(&log), vec!["L-enter", "L-exit"]);
    assert_eq!(greeter.id().unwrap(), 1);
}
