//! Service resolution: the resolver traits, the root provider and scopes.
//!
//! Proxies carry an `Arc<dyn Resolver>` handle to the provider or scope that
//! constructed them, and interceptors reach it through the invocation
//! context, so the resolver trait stays object-safe. Generic convenience
//! methods live on [`ResolverExt`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::error::{InterceptError, InterceptResult};
use crate::key::TypeKey;
use crate::registration::{AnyArc, Lifetime, ServiceRegistration};

/// Object-safe service resolution.
///
/// Instances come back in their stored form: `Arc<T>` for concrete services
/// and `Arc<Arc<dyn S>>` for trait services.
pub trait Resolver: Send + Sync {
    /// Resolves the stored form of the service registered under `key`.
    fn resolve_any(&self, key: &TypeKey) -> InterceptResult<AnyArc>;
}

/// Typed resolution built on [`Resolver`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ferrous_intercept::{ResolverExt, ServiceCollection};
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
/// impl Greeter for English {
///     fn greet(&self) -> String {
///         "hello".into()
///     }
/// }
///
/// let mut services = ServiceCollection::new();
/// services.add_instance(42usize);
/// services.add_trait_instance::<dyn Greeter>(Arc::new(English));
///
/// let provider = services.build();
/// assert_eq!(*provider.get_required::<usize>(), 42);
/// assert_eq!(provider.get_required_trait::<dyn Greeter>().greet(), "hello");
/// assert!(provider.get::<String>().is_err());
/// ```
pub trait ResolverExt: Resolver {
    /// Resolves a concrete service type.
    fn get<T: Send + Sync + 'static>(&self) -> InterceptResult<Arc<T>> {
        let any = self.resolve_any(&TypeKey::of::<T>())?;
        any.downcast::<T>()
            .map_err(|_| InterceptError::TypeMismatch(std::any::type_name::<T>()))
    }

    /// Resolves a trait service.
    fn get_trait<S: ?Sized + Send + Sync + 'static>(&self) -> InterceptResult<Arc<S>> {
        let any = self.resolve_any(&TypeKey::of::<S>())?;
        // Trait services are stored as Arc<Arc<dyn S>>
        any.downcast::<Arc<S>>()
            .map(|stored| (*stored).clone())
            .map_err(|_| InterceptError::TypeMismatch(std::any::type_name::<S>()))
    }

    /// Resolves a concrete service type, panicking if it cannot be resolved.
    ///
    /// # Panics
    ///
    /// Panics with the resolution error when [`get`](Self::get) fails: the
    /// service is unregistered, scoped and resolved from the root, or its
    /// factory returned an error.
    fn get_required<T: Send + Sync + 'static>(&self) -> Arc<T> {
        match self.get::<T>() {
            Ok(service) => service,
            Err(e) => panic!(
                "Failed to resolve required service {}: {}",
                std::any::type_name::<T>(),
                e
            ),
        }
    }

    /// Resolves a trait service, panicking if it cannot be resolved.
    ///
    /// # Panics
    ///
    /// Panics with the resolution error when [`get_trait`](Self::get_trait) fails.
    fn get_required_trait<S: ?Sized + Send + Sync + 'static>(&self) -> Arc<S> {
        match self.get_trait::<S>() {
            Ok(service) => service,
            Err(e) => panic!(
                "Failed to resolve required trait {}: {}",
                std::any::type_name::<S>(),
                e
            ),
        }
    }
}

impl<R: Resolver + ?Sized> ResolverExt for R {}

/// Resolver with no registrations. Every lookup fails with `NotFound`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyResolver;

impl Resolver for EmptyResolver {
    fn resolve_any(&self, key: &TypeKey) -> InterceptResult<AnyArc> {
        Err(InterceptError::NotFound(key.name()))
    }
}

struct Entry {
    registration: ServiceRegistration,
    singleton: OnceCell<AnyArc>,
}

struct ProviderInner {
    entries: HashMap<TypeKey, Entry>,
}

/// Root provider built from a [`ServiceCollection`](crate::ServiceCollection).
///
/// Singletons are created on first resolution and cached for the provider's
/// lifetime. Scoped services can only be resolved from a [`Scope`]. Cloning is
/// cheap and shares the singleton cache.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ferrous_intercept::{InterceptError, Lifetime, ResolverExt, ServiceCollection};
///
/// struct RequestId(u32);
///
/// let mut services = ServiceCollection::new();
/// services.add(Lifetime::Scoped, |_| Ok(RequestId(7)));
///
/// let provider = services.build();
/// assert_eq!(
///     provider.get::<RequestId>().err(),
///     Some(InterceptError::WrongLifetime("Cannot resolve scoped service from root provider"))
/// );
///
/// let scope = provider.create_scope();
/// let a = scope.get_required::<RequestId>();
/// let b = scope.get_required::<RequestId>();
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(a.0, 7);
/// ```
#[derive(Clone)]
pub struct ServiceProvider {
    inner: Arc<ProviderInner>,
}

impl ServiceProvider {
    pub(crate) fn new(registrations: Vec<ServiceRegistration>) -> Self {
        let mut entries = HashMap::with_capacity(registrations.len());
        // Later registrations of the same service replace earlier ones
        for registration in registrations {
            entries.insert(
                registration.service,
                Entry {
                    registration,
                    singleton: OnceCell::new(),
                },
            );
        }
        Self {
            inner: Arc::new(ProviderInner { entries }),
        }
    }

    /// Creates a scope for resolving scoped services.
    pub fn create_scope(&self) -> Scope {
        Scope {
            inner: Arc::new(ScopeInner {
                root: self.clone(),
                scoped: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The registration serving `key`, as it stands after any planning.
    pub fn registration(&self, key: &TypeKey) -> Option<&ServiceRegistration> {
        self.inner.entries.get(key).map(|e| &e.registration)
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn handle(&self) -> Arc<dyn Resolver> {
        Arc::new(self.clone())
    }

    fn entry(&self, key: &TypeKey) -> InterceptResult<&Entry> {
        self.inner
            .entries
            .get(key)
            .ok_or(InterceptError::NotFound(key.name()))
    }

    fn singleton(&self, entry: &Entry) -> InterceptResult<AnyArc> {
        entry
            .singleton
            .get_or_try_init(|| {
                tracing::trace!(service = %entry.registration.service, "creating singleton");
                entry.registration.create(&self.handle())
            })
            .cloned()
    }
}

impl Resolver for ServiceProvider {
    fn resolve_any(&self, key: &TypeKey) -> InterceptResult<AnyArc> {
        let entry = self.entry(key)?;
        match entry.registration.lifetime {
            Lifetime::Singleton => self.singleton(entry),
            Lifetime::Scoped => Err(InterceptError::WrongLifetime(
                "Cannot resolve scoped service from root provider",
            )),
            Lifetime::Transient => entry.registration.create(&self.handle()),
        }
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.inner.entries.len())
            .finish()
    }
}

struct ScopeInner {
    root: ServiceProvider,
    scoped: Mutex<HashMap<TypeKey, AnyArc>>,
}

/// Resolution scope.
///
/// Scoped services are cached per scope; singletons come from the root
/// provider; transients are created fresh with the scope as their resolver.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// The root provider this scope was created from.
    pub fn root(&self) -> &ServiceProvider {
        &self.inner.root
    }

    fn handle(&self) -> Arc<dyn Resolver> {
        Arc::new(self.clone())
    }

    fn scoped(&self, key: &TypeKey, registration: &ServiceRegistration) -> InterceptResult<AnyArc> {
        if let Some(existing) = self.inner.scoped.lock().get(key) {
            return Ok(existing.clone());
        }
        // Created outside the lock so the factory may resolve other scoped services
        let created = registration.create(&self.handle())?;
        let mut scoped = self.inner.scoped.lock();
        Ok(scoped.entry(*key).or_insert(created).clone())
    }
}

impl Resolver for Scope {
    fn resolve_any(&self, key: &TypeKey) -> InterceptResult<AnyArc> {
        let root = &self.inner.root;
        let entry = root.entry(key)?;
        match entry.registration.lifetime {
            Lifetime::Singleton => root.singleton(entry),
            Lifetime::Scoped => self.scoped(key, &entry.registration),
            Lifetime::Transient => entry.registration.create(&self.handle()),
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("scoped", &self.inner.scoped.lock().len())
            .finish()
    }
}
