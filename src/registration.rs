//! Service registration records and lifetimes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{InterceptError, InterceptResult};
use crate::key::TypeKey;
use crate::provider::Resolver;

/// Type-erased Arc for storage
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Builds an instance from a service-provider handle.
pub type Constructor = Arc<dyn Fn(&Arc<dyn Resolver>) -> InterceptResult<AnyArc> + Send + Sync>;

/// Converts an implementation instance into the form consumers resolve.
pub type Exposer = Arc<dyn Fn(AnyArc) -> InterceptResult<AnyArc> + Send + Sync>;

/// Service lifetimes controlling instance caching behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Single instance per root provider, cached forever
    Singleton,
    /// Single instance per scope, cached for the scope's lifetime
    Scoped,
    /// New instance per resolution, never cached
    Transient,
}

/// How a registration produces its instance.
#[derive(Clone)]
pub enum ImplementationSource {
    /// Container-constructed implementation type.
    ///
    /// `construct` yields the concrete implementation (`Arc<T>`); `expose`
    /// turns it into the stored service form (`Arc<T>` for concrete services,
    /// `Arc<Arc<dyn S>>` for trait services).
    Type { construct: Constructor, expose: Exposer },
    /// User factory yielding the service form directly.
    Factory(Constructor),
    /// Pre-built instance in service form.
    Instance(AnyArc),
}

impl fmt::Debug for ImplementationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImplementationSource::Type { .. } => f.write_str("Type"),
            ImplementationSource::Factory(_) => f.write_str("Factory"),
            ImplementationSource::Instance(_) => f.write_str("Instance"),
        }
    }
}

/// The original instance a proxy wraps, in both forms.
///
/// `instance` is what the registration built (the concrete implementation for
/// type registrations); `exposed` is what consumers would have resolved.
#[derive(Clone)]
pub struct HeldInstance {
    pub instance: AnyArc,
    pub exposed: AnyArc,
}

impl HeldInstance {
    /// Instance whose built and resolved forms coincide.
    pub fn shared(instance: AnyArc) -> Self {
        Self {
            exposed: instance.clone(),
            instance,
        }
    }
}

/// One container entry: service type, implementation and lifetime.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use ferrous_intercept::{ImplementationSource, Lifetime, ServiceRegistration, TypeKey};
///
/// let reg = ServiceRegistration::new(
///     TypeKey::of::<String>(),
///     ImplementationSource::Instance(Arc::new("hello".to_string())),
///     Lifetime::Singleton,
/// );
/// assert_eq!(reg.implementation_key(), TypeKey::of::<String>());
/// assert!(!reg.is_intercepted());
/// ```
#[derive(Clone)]
pub struct ServiceRegistration {
    pub service: TypeKey,
    pub implementation_type: Option<TypeKey>,
    pub source: ImplementationSource,
    pub lifetime: Lifetime,
    pub(crate) intercepted: bool,
}

impl ServiceRegistration {
    /// Registration of `service` built by `source`.
    pub fn new(service: TypeKey, source: ImplementationSource, lifetime: Lifetime) -> Self {
        Self {
            service,
            implementation_type: None,
            source,
            lifetime,
            intercepted: false,
        }
    }

    /// Records the concrete implementation type.
    pub fn with_implementation(mut self, implementation: TypeKey) -> Self {
        self.implementation_type = Some(implementation);
        self
    }

    /// Implementation type used for planning; defaults to the service type.
    pub fn implementation_key(&self) -> TypeKey {
        self.implementation_type.unwrap_or(self.service)
    }

    /// True once the registration has been rewritten to construct a proxy.
    pub fn is_intercepted(&self) -> bool {
        self.intercepted
    }

    /// Builds the instance consumers resolve.
    pub fn create(&self, services: &Arc<dyn Resolver>) -> InterceptResult<AnyArc> {
        match &self.source {
            ImplementationSource::Type { construct, expose } => expose(construct(services)?),
            ImplementationSource::Factory(factory) => factory(services),
            ImplementationSource::Instance(instance) => Ok(instance.clone()),
        }
    }

    /// Builds the original instance in both forms, for a proxy to hold.
    pub fn create_held(&self, services: &Arc<dyn Resolver>) -> InterceptResult<HeldInstance> {
        match &self.source {
            ImplementationSource::Type { construct, expose } => {
                let instance = construct(services)?;
                let exposed = expose(instance.clone())?;
                Ok(HeldInstance { instance, exposed })
            }
            ImplementationSource::Factory(factory) => Ok(HeldInstance::shared(factory(services)?)),
            ImplementationSource::Instance(instance) => Ok(HeldInstance::shared(instance.clone())),
        }
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("service", &self.service)
            .field("implementation_type", &self.implementation_type)
            .field("source", &self.source)
            .field("lifetime", &self.lifetime)
            .field("intercepted", &self.intercepted)
            .finish()
    }
}

/// Exposer that stores the implementation unchanged.
pub(crate) fn identity_exposer() -> Exposer {
    Arc::new(|instance| Ok(instance))
}

/// Exposer that downcasts to `T` and upcasts to the trait object `S`.
pub(crate) fn trait_exposer<S, T, U>(upcast: U) -> Exposer
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + Sync + 'static,
    U: Fn(Arc<T>) -> Arc<S> + Send + Sync + 'static,
{
    Arc::new(move |instance: AnyArc| {
        let concrete = instance
            .downcast::<T>()
            .map_err(|_| InterceptError::TypeMismatch(std::any::type_name::<T>()))?;
        Ok(Arc::new(upcast(concrete)) as AnyArc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EmptyResolver;

    trait Shape: Send + Sync {
        fn sides(&self) -> u32;
    }
    struct Square;
    impl Shape for Square {
        fn sides(&self) -> u32 {
            4
        }
    }

    #[test]
    fn type_source_keeps_both_forms() {
        let reg = ServiceRegistration::new(
            TypeKey::of::<dyn Shape>(),
            ImplementationSource::Type {
                construct: Arc::new(|_| Ok(Arc::new(Square) as AnyArc)),
                expose: trait_exposer::<dyn Shape, Square, _>(|s| s as Arc<dyn Shape>),
            },
            Lifetime::Transient,
        )
        .with_implementation(TypeKey::of::<Square>());

        let services: Arc<dyn Resolver> = Arc::new(EmptyResolver);
        let held = reg.create_held(&services).unwrap();
        assert!(held.instance.downcast_ref::<Square>().is_some());
        let exposed = held.exposed.downcast_ref::<Arc<dyn Shape>>().unwrap();
        assert_eq!(exposed.sides(), 4);

        let created = reg.create(&services).unwrap();
        assert!(created.downcast_ref::<Arc<dyn Shape>>().is_some());
        assert_eq!(reg.implementation_key(), TypeKey::of::<Square>());
    }
}
