//! Service registration collection.

use std::sync::Arc;

use crate::error::InterceptResult;
use crate::key::TypeKey;
use crate::planner::ProxyPlanner;
use crate::provider::{Resolver, ServiceProvider};
use crate::registration::{
    identity_exposer, trait_exposer, AnyArc, ImplementationSource, Lifetime, ServiceRegistration,
};

/// Ordered list of service registrations.
///
/// Concrete services are stored as `Arc<T>`, trait services as
/// `Arc<Arc<dyn S>>`. When the same service is registered more than once the
/// last registration wins.
///
/// [`intercept_with`](Self::intercept_with) hands every registration to a
/// [`ProxyPlanner`], replacing those that need interception with registrations
/// that construct proxies.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ferrous_intercept::{Lifetime, ResolverExt, ServiceCollection};
///
/// trait Store: Send + Sync {
///     fn name(&self) -> &'static str;
/// }
///
/// struct MemoryStore;
/// impl Store for MemoryStore {
///     fn name(&self) -> &'static str {
///         "memory"
///     }
/// }
///
/// let mut services = ServiceCollection::new();
/// services.add_trait_type::<dyn Store, MemoryStore, _, _>(
///     Lifetime::Singleton,
///     |_| Ok(MemoryStore),
///     |s| s as Arc<dyn Store>,
/// );
///
/// let provider = services.build();
/// assert_eq!(provider.get_required_trait::<dyn Store>().name(), "memory");
/// ```
#[derive(Default, Clone)]
pub struct ServiceCollection {
    registrations: Vec<ServiceRegistration>,
}

impl ServiceCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container-constructed concrete type.
    pub fn add<T, F>(&mut self, lifetime: Lifetime, constructor: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Arc<dyn Resolver>) -> InterceptResult<T> + Send + Sync + 'static,
    {
        let source = ImplementationSource::Type {
            construct: Arc::new(move |r: &Arc<dyn Resolver>| Ok(Arc::new(constructor(r)?) as AnyArc)),
            expose: identity_exposer(),
        };
        self.add_registration(
            ServiceRegistration::new(TypeKey::of::<T>(), source, lifetime)
                .with_implementation(TypeKey::of::<T>()),
        )
    }

    /// Registers a pre-built singleton value.
    pub fn add_instance<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.add_registration(ServiceRegistration::new(
            TypeKey::of::<T>(),
            ImplementationSource::Instance(Arc::new(value)),
            Lifetime::Singleton,
        ))
    }

    /// Registers a pre-built singleton trait object.
    pub fn add_trait_instance<S>(&mut self, value: Arc<S>) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.add_registration(ServiceRegistration::new(
            TypeKey::of::<S>(),
            ImplementationSource::Instance(Arc::new(value)),
            Lifetime::Singleton,
        ))
    }

    /// Registers a trait service built by a factory.
    ///
    /// The implementation type is unknown to the container, so planning wraps
    /// the trait using the service description alone.
    pub fn add_trait_factory<S, F>(&mut self, lifetime: Lifetime, factory: F) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
        F: Fn(&Arc<dyn Resolver>) -> InterceptResult<Arc<S>> + Send + Sync + 'static,
    {
        let source = ImplementationSource::Factory(Arc::new(move |r: &Arc<dyn Resolver>| {
            Ok(Arc::new(factory(r)?) as AnyArc)
        }));
        self.add_registration(ServiceRegistration::new(TypeKey::of::<S>(), source, lifetime))
    }

    /// Registers a trait service implemented by a container-constructed type.
    ///
    /// `upcast` converts the concrete instance to the trait object; it is
    /// nearly always `|t| t as Arc<dyn S>`.
    pub fn add_trait_type<S, T, F, U>(&mut self, lifetime: Lifetime, constructor: F, upcast: U) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(&Arc<dyn Resolver>) -> InterceptResult<T> + Send + Sync + 'static,
        U: Fn(Arc<T>) -> Arc<S> + Send + Sync + 'static,
    {
        let source = ImplementationSource::Type {
            construct: Arc::new(move |r: &Arc<dyn Resolver>| Ok(Arc::new(constructor(r)?) as AnyArc)),
            expose: trait_exposer::<S, T, U>(upcast),
        };
        self.add_registration(
            ServiceRegistration::new(TypeKey::of::<S>(), source, lifetime)
                .with_implementation(TypeKey::of::<T>()),
        )
    }

    /// Adds a prebuilt registration.
    pub fn add_registration(&mut self, registration: ServiceRegistration) -> &mut Self {
        self.registrations.push(registration);
        self
    }

    /// Registrations in insertion order.
    pub fn registrations(&self) -> &[ServiceRegistration] {
        &self.registrations
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Plans every registration, replacing those that need a proxy.
    ///
    /// Planning errors leave the collection untouched. Running this twice is
    /// harmless: already-intercepted registrations pass through.
    pub fn intercept_with(&mut self, planner: &ProxyPlanner) -> InterceptResult<&mut Self> {
        let planned = self
            .registrations
            .iter()
            .map(|r| planner.plan(r.clone()))
            .collect::<InterceptResult<Vec<_>>>()?;
        let rewritten = planned.iter().filter(|r| r.is_intercepted()).count();
        tracing::debug!(
            registrations = planned.len(),
            intercepted = rewritten,
            "planned service collection"
        );
        self.registrations = planned;
        Ok(self)
    }

    /// Builds the provider; later registrations of a service win.
    pub fn build(self) -> ServiceProvider {
        ServiceProvider::new(self.registrations)
    }
}

impl std::fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCollection")
            .field("registrations", &self.registrations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ResolverExt;

    struct Config(&'static str);
    struct Repo {
        config: Arc<Config>,
    }

    #[test]
    fn constructors_resolve_dependencies() {
        let mut services = ServiceCollection::new();
        services.add_instance(Config("db"));
        services.add(Lifetime::Transient, |r| {
            Ok(Repo {
                config: r.get::<Config>()?,
            })
        });
        assert_eq!(services.len(), 2);

        let provider = services.build();
        let repo = provider.get_required::<Repo>();
        assert_eq!(repo.config.0, "db");
    }

    #[test]
    fn last_registration_wins() {
        let mut services = ServiceCollection::new();
        services.add_instance(1u8).add_instance(2u8);
        assert_eq!(*services.build().get_required::<u8>(), 2);
    }

    #[test]
    fn factory_errors_propagate() {
        let mut services = ServiceCollection::new();
        services.add(Lifetime::Singleton, |r| Ok(Repo { config: r.get::<Config>()? }));
        let provider = services.build();
        assert!(matches!(
            provider.get::<Repo>(),
            Err(crate::InterceptError::NotFound(_))
        ));
    }
}
