//! Proxy planning: strategy selection, memoization and registration rewrite.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use crate::classifier::{MethodClassifier, MethodOverridePlan};
use crate::config::InterceptionOptions;
use crate::error::{InterceptError, InterceptResult};
use crate::key::{ProxyCacheKey, TypeKey};
use crate::model::{ResolvedMember, TypeDescriptor};
use crate::observer::{LoggingObserver, Observers, PlanObserver, PlanOutcome};
use crate::provider::Resolver;
use crate::registration::{Constructor, ImplementationSource, ServiceRegistration};
use crate::synthesis::{
    DispatchTableBackend, MemberBinding, ProxyType, SynthesisRequest, SynthesisStrategy,
    TypeSynthesisBackend,
};

/// Memoized planning result for one (service, implementation) pair.
#[derive(Clone)]
pub enum ProxyCacheEntry {
    /// No member needs interception
    Primitive,
    Synthesized(Arc<dyn ProxyType>),
}

impl ProxyCacheEntry {
    /// True when no member needed interception.
    pub fn is_primitive(&self) -> bool {
        matches!(self, ProxyCacheEntry::Primitive)
    }

    /// Synthesized proxy type, if any.
    pub fn proxy_type(&self) -> Option<&Arc<dyn ProxyType>> {
        match self {
            ProxyCacheEntry::Primitive => None,
            ProxyCacheEntry::Synthesized(ty) => Some(ty),
        }
    }
}

impl fmt::Debug for ProxyCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyCacheEntry::Primitive => f.write_str("Primitive"),
            ProxyCacheEntry::Synthesized(ty) => f
                .debug_struct("Synthesized")
                .field("service", &ty.service())
                .field("implementation", &ty.implementation())
                .field("strategy", &ty.strategy())
                .finish(),
        }
    }
}

/// Decides, per registration, whether a proxy is needed and rewrites the
/// registration to construct it.
///
/// Type metadata is registered up front with [`describe`](Self::describe).
/// Results are memoized per (service, implementation) pair; concurrent
/// planning of the same pair classifies and synthesizes exactly once, with
/// every other caller reusing the winner's entry.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use ferrous_intercept::*;
///
/// trait Clock: Send + Sync {
///     fn now(&self) -> CallResult<u64>;
/// }
///
/// struct FixedClock;
/// impl Clock for FixedClock {
///     fn now(&self) -> CallResult<u64> {
///         Ok(7)
///     }
/// }
///
/// // No markers anywhere: the pair is primitive and the registration is kept.
/// let planner = ProxyPlanner::new();
/// planner.describe(
///     TypeDescriptor::interface::<dyn Clock>()
///         .member(
///             MemberDescriptor::method("now")
///                 .returns::<u64>()
///                 .target(MethodTarget::interface::<dyn Clock, u64, _>(|c, _| c.now())),
///         )
///         .build(),
/// );
///
/// let mut services = ServiceCollection::new();
/// services.add_trait_instance::<dyn Clock>(Arc::new(FixedClock));
/// services.intercept_with(&planner).unwrap();
/// assert_eq!(planner.synthesized_count(), 0);
///
/// let provider = services.build();
/// assert_eq!(provider.get_required_trait::<dyn Clock>().now().unwrap(), 7);
/// ```
pub struct ProxyPlanner {
    types: RwLock<HashMap<TypeKey, Arc<TypeDescriptor>>>,
    classifier: MethodClassifier,
    backend: Arc<dyn TypeSynthesisBackend>,
    cache: Mutex<HashMap<ProxyCacheKey, Arc<OnceCell<ProxyCacheEntry>>>>,
    synthesized: AtomicUsize,
    observers: Observers,
}

impl ProxyPlanner {
    /// Planner with default options.
    pub fn new() -> Self {
        Self::with_options(InterceptionOptions::default())
    }

    /// Planner configured from `options`.
    pub fn with_options(options: InterceptionOptions) -> Self {
        let mut observers = Observers::default();
        if options.log_plans {
            observers.add(Arc::new(LoggingObserver::new()));
        }
        Self {
            types: RwLock::new(HashMap::new()),
            classifier: MethodClassifier::new(options.validation),
            backend: Arc::new(DispatchTableBackend),
            cache: Mutex::new(HashMap::new()),
            synthesized: AtomicUsize::new(0),
            observers,
        }
    }

    /// Replaces the synthesis backend.
    pub fn with_backend(mut self, backend: Arc<dyn TypeSynthesisBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Adds a planning observer.
    pub fn add_observer(&mut self, observer: Arc<dyn PlanObserver>) -> &mut Self {
        self.observers.add(observer);
        self
    }

    /// Registers type metadata. Later descriptions of the same type replace earlier ones.
    pub fn describe(&self, descriptor: Arc<TypeDescriptor>) -> &Self {
        self.types.write().insert(descriptor.key(), descriptor);
        self
    }

    /// Registered metadata for a type.
    pub fn descriptor(&self, key: &TypeKey) -> Option<Arc<TypeDescriptor>> {
        self.types.read().get(key).cloned()
    }

    /// Classifier used for every member.
    pub fn classifier(&self) -> &MethodClassifier {
        &self.classifier
    }

    /// Number of proxy types synthesized so far.
    pub fn synthesized_count(&self) -> usize {
        self.synthesized.load(Ordering::Acquire)
    }

    /// Memoized entries, keyed by pair.
    pub fn cached_entries(&self) -> Vec<(ProxyCacheKey, ProxyCacheEntry)> {
        self.cache
            .lock()
            .iter()
            .filter_map(|(key, cell)| cell.get().map(|entry| (*key, entry.clone())))
            .collect()
    }

    /// Synthesis strategy for a service/implementation pair.
    pub fn strategy_for(
        &self,
        service: &TypeDescriptor,
        implementation: &TypeDescriptor,
    ) -> InterceptResult<SynthesisStrategy> {
        if service.is_value_type() {
            return Err(InterceptError::UnsupportedProxyTarget {
                service: service.name(),
                reason: "service type is a value type",
            });
        }
        if service.is_sealed() {
            return Err(InterceptError::UnsupportedProxyTarget {
                service: service.name(),
                reason: "service type is sealed",
            });
        }
        if service.is_interface() {
            return Ok(SynthesisStrategy::WrapInterface);
        }
        if implementation.is_sealed() || implementation.is_value_type() {
            return Err(InterceptError::UnsupportedProxyTarget {
                service: service.name(),
                reason: "implementation type is sealed",
            });
        }
        if implementation.is_abstract() {
            return Ok(SynthesisStrategy::SubclassAlwaysProxy);
        }
        if implementation.has_default_constructor() && service.key() == implementation.key() {
            return Ok(SynthesisStrategy::SubclassWrapField);
        }
        Ok(SynthesisStrategy::TrueSubclass)
    }

    /// Memoized planning result for a pair, computing it on first request.
    pub fn entry(
        &self,
        service: &Arc<TypeDescriptor>,
        implementation: &Arc<TypeDescriptor>,
    ) -> InterceptResult<ProxyCacheEntry> {
        let key = ProxyCacheKey::new(service.key(), implementation.key());
        let cell = self
            .cache
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(entry) = cell.get() {
            tracing::debug!(pair = %key, "proxy cache hit");
            self.observers.cache_hit(&key);
            return Ok(entry.clone());
        }

        let mut computed = false;
        let entry = cell.get_or_try_init(|| {
            computed = true;
            self.compute(&key, service, implementation)
        })?;
        if !computed {
            tracing::debug!(pair = %key, "proxy cache hit after concurrent planning");
            self.observers.cache_hit(&key);
        }
        Ok(entry.clone())
    }

    fn compute(
        &self,
        key: &ProxyCacheKey,
        service: &Arc<TypeDescriptor>,
        implementation: &Arc<TypeDescriptor>,
    ) -> InterceptResult<ProxyCacheEntry> {
        let started = Instant::now();
        self.observers.planning(key);

        let strategy = self.strategy_for(service, implementation)?;
        let members = self.candidate_members(service, implementation, strategy)?;

        let mut plans = Vec::with_capacity(members.len());
        for resolved in &members {
            let plan = self.classifier.classify(implementation, resolved.member.key())?;
            if self.observers.has_observers() {
                for marker in plan.inert() {
                    self.observers.inert_marker(key, plan.key(), marker);
                }
            }
            plans.push(Arc::new(plan));
        }

        if !plans.iter().any(|p| p.is_required()) {
            tracing::debug!(pair = %key, members = plans.len(), "no member requires interception");
            self.observers.planned(key, PlanOutcome::Primitive, started.elapsed());
            return Ok(ProxyCacheEntry::Primitive);
        }

        let members = plans
            .into_iter()
            .map(|plan| {
                let target = self.target_for(service, implementation, &plan)?;
                Ok(MemberBinding { plan, target })
            })
            .collect::<InterceptResult<Vec<_>>>()?;

        let proxy_type = self.backend.synthesize(SynthesisRequest {
            service: service.clone(),
            implementation: implementation.clone(),
            strategy,
            members,
        })?;
        self.synthesized.fetch_add(1, Ordering::AcqRel);

        tracing::debug!(pair = %key, %strategy, "synthesized proxy type");
        self.observers
            .planned(key, PlanOutcome::Synthesized(strategy), started.elapsed());
        Ok(ProxyCacheEntry::Synthesized(proxy_type))
    }

    /// Members the proxy type must expose.
    fn candidate_members(
        &self,
        service: &Arc<TypeDescriptor>,
        implementation: &Arc<TypeDescriptor>,
        strategy: SynthesisStrategy,
    ) -> InterceptResult<Vec<ResolvedMember>> {
        if strategy == SynthesisStrategy::WrapInterface {
            if service.key() != implementation.key() && !implementation.is_assignable_to(service) {
                return Err(InterceptError::UnsupportedProxyTarget {
                    service: service.name(),
                    reason: "implementation does not implement the service interface",
                });
            }
            let members = service.instance_members();
            for resolved in &members {
                if implementation.resolve_member(resolved.member.key()).is_none() {
                    return Err(InterceptError::MissingOverrideMethod {
                        implementation: implementation.name(),
                        member: resolved.member.key().to_string(),
                    });
                }
            }
            return Ok(members);
        }

        if service.key() != implementation.key() && !implementation.is_assignable_to(service) {
            return Err(InterceptError::UnsupportedProxyTarget {
                service: service.name(),
                reason: "implementation does not derive from the service class",
            });
        }
        Ok(implementation.instance_members())
    }

    /// Most-derived target for a member: implementation chain first, then the service.
    ///
    /// A synchronous member bound to a future-returning target is rejected here.
    fn target_for(
        &self,
        service: &Arc<TypeDescriptor>,
        implementation: &Arc<TypeDescriptor>,
        plan: &MethodOverridePlan,
    ) -> InterceptResult<Option<crate::adapter::MethodTarget>> {
        let key = plan.key();
        let mut chain = vec![implementation.clone()];
        chain.extend(implementation.base_chain());
        chain.push(service.clone());
        chain.extend(implementation.all_interfaces());

        let target = chain
            .iter()
            .filter_map(|ty| ty.declared(key))
            .find_map(|m| m.method_target().cloned());

        match target {
            Some(target) if target.is_async() && !plan.shape().is_async() => {
                Err(InterceptError::TargetShape(format!(
                    "{} is synchronous but its target returns a future",
                    key
                )))
            }
            Some(target) => Ok(Some(target)),
            None if plan.member().is_abstract() => Ok(None),
            None => Err(InterceptError::MissingMethodTarget(key.to_string())),
        }
    }

    /// Rewrites a registration to construct a proxy when any member needs one.
    ///
    /// Registrations that are already intercepted, whose service type is
    /// undescribed, sealed or a value type, or whose pair is primitive come
    /// back unchanged. Otherwise the result keeps the service type and lifetime
    /// and constructs the proxy from the services handle plus the original
    /// instance.
    pub fn plan(&self, registration: ServiceRegistration) -> InterceptResult<ServiceRegistration> {
        if registration.is_intercepted() {
            tracing::debug!(service = %registration.service, "registration already intercepted");
            return Ok(registration);
        }

        let Some(service) = self.descriptor(&registration.service) else {
            tracing::trace!(service = %registration.service, "no type metadata; registration kept");
            return Ok(registration);
        };

        if service.is_sealed() || service.is_value_type() {
            let key = ProxyCacheKey::new(service.key(), registration.implementation_key());
            tracing::debug!(pair = %key, "sealed or value service type; registration kept");
            self.observers
                .planned(&key, PlanOutcome::Identity, std::time::Duration::ZERO);
            return Ok(registration);
        }

        let implementation = self.implementation_for(&service, &registration)?;
        match self.entry(&service, &implementation)? {
            ProxyCacheEntry::Primitive => Ok(registration),
            ProxyCacheEntry::Synthesized(proxy_type) => Ok(rewrite(registration, proxy_type)),
        }
    }

    fn implementation_for(
        &self,
        service: &Arc<TypeDescriptor>,
        registration: &ServiceRegistration,
    ) -> InterceptResult<Arc<TypeDescriptor>> {
        let key = registration.implementation_key();
        if key == service.key() {
            return Ok(service.clone());
        }
        match self.descriptor(&key) {
            Some(descriptor) => Ok(descriptor),
            // Interface metadata alone is enough to wrap an undescribed implementation.
            None if service.is_interface() => Ok(service.clone()),
            None => Err(InterceptError::UnsupportedProxyTarget {
                service: service.name(),
                reason: "implementation type is not described",
            }),
        }
    }
}

fn rewrite(original: ServiceRegistration, proxy_type: Arc<dyn ProxyType>) -> ServiceRegistration {
    let source = original.clone();
    let construct: Constructor = Arc::new(move |services: &Arc<dyn Resolver>| {
        let held = source.create_held(services)?;
        proxy_type.construct(services.clone(), held)
    });
    ServiceRegistration {
        service: original.service,
        implementation_type: original.implementation_type,
        source: ImplementationSource::Factory(construct),
        lifetime: original.lifetime,
        intercepted: true,
    }
}

impl Default for ProxyPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProxyPlanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyPlanner")
            .field("types", &self.types.read().len())
            .field("classifier", &self.classifier)
            .field("cached", &self.cache.lock().len())
            .field("synthesized", &self.synthesized_count())
            .finish()
    }
}
