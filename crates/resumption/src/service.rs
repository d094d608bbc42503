//! Service lifetimes and the factories that create services on demand

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::context::ServiceContext;
use crate::error::{BoxError, ServiceError};

/// How long a resolved service instance lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceLifetime {
    /// Shared by every step of one execution, disposed when the execution ends
    Execution,
    /// Shared by the requests of one step, disposed when the step completes
    Step,
}

/// Identifies a service by its Rust type
#[derive(Clone, Copy)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
}

impl ServiceType {
    pub fn of<S: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<S>(),
            name: type_name::<S>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Services that release resources when their scope ends
pub trait Dispose {
    fn dispose(&self) -> Result<(), BoxError>;
}

pub(crate) type Disposer = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// A freshly created service instance together with its lifetime
pub struct LivingService {
    pub(crate) instance: Arc<dyn Any + Send + Sync>,
    pub(crate) lifetime: ServiceLifetime,
    pub(crate) disposer: Option<Disposer>,
}

impl LivingService {
    pub fn new<S: Any + Send + Sync>(service: S, lifetime: ServiceLifetime) -> Self {
        Self::from_arc(Arc::new(service), lifetime)
    }

    pub fn from_arc<S: Any + Send + Sync>(service: Arc<S>, lifetime: ServiceLifetime) -> Self {
        Self {
            instance: service,
            lifetime,
            disposer: None,
        }
    }

    /// A service whose [`Dispose`] implementation runs when its scope ends
    pub fn disposable<S>(service: S, lifetime: ServiceLifetime) -> Self
    where
        S: Dispose + Any + Send + Sync,
    {
        let service = Arc::new(service);
        let handle = service.clone();
        Self::from_arc(service, lifetime).with_disposer(move || handle.dispose())
    }

    pub fn with_disposer<F>(mut self, disposer: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.disposer = Some(Box::new(disposer));
        self
    }

    pub fn lifetime(&self) -> ServiceLifetime {
        self.lifetime
    }

    pub(crate) fn dispose(self) -> Result<(), BoxError> {
        match self.disposer {
            Some(disposer) => disposer(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for LivingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivingService")
            .field("lifetime", &self.lifetime)
            .field("disposable", &self.disposer.is_some())
            .finish_non_exhaustive()
    }
}

/// Creates service instances on demand.
///
/// Returning `Ok(None)` means the factory does not know the requested type. The
/// `services` argument lets a factory resolve the services its product depends on.
pub trait ServiceFactory: Send + Sync {
    fn create_service(
        &self,
        service_type: ServiceType,
        services: &ServiceContext,
    ) -> Result<Option<LivingService>, ServiceError>;
}

impl<F: ServiceFactory + ?Sized> ServiceFactory for Arc<F> {
    fn create_service(
        &self,
        service_type: ServiceType,
        services: &ServiceContext,
    ) -> Result<Option<LivingService>, ServiceError> {
        (**self).create_service(service_type, services)
    }
}

/// A factory that supports no service types
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroServiceFactory;

impl ServiceFactory for ZeroServiceFactory {
    fn create_service(
        &self,
        _service_type: ServiceType,
        _services: &ServiceContext,
    ) -> Result<Option<LivingService>, ServiceError> {
        Ok(None)
    }
}

/// Asks a list of factories in order, remembering which one answered for each type
#[derive(Default)]
pub struct AggregateServiceFactory {
    factories: Vec<Box<dyn ServiceFactory>>,
    answered_by: DashMap<ServiceType, usize>,
}

impl AggregateServiceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, factory: impl ServiceFactory + 'static) -> Self {
        self.factories.push(Box::new(factory));
        self
    }
}

impl ServiceFactory for AggregateServiceFactory {
    fn create_service(
        &self,
        service_type: ServiceType,
        services: &ServiceContext,
    ) -> Result<Option<LivingService>, ServiceError> {
        let known = self.answered_by.get(&service_type).map(|index| *index);
        if let Some(index) = known {
            return self.factories[index].create_service(service_type, services);
        }

        for (index, factory) in self.factories.iter().enumerate() {
            if let Some(service) = factory.create_service(service_type, services)? {
                self.answered_by.insert(service_type, index);
                return Ok(Some(service));
            }
        }
        Ok(None)
    }
}

type Constructor =
    Box<dyn Fn(&ServiceContext) -> Result<LivingService, BoxError> + Send + Sync>;

/// A factory assembled from per-type constructor closures.
///
/// ```rust
/// use resumption::{FnServiceFactory, ServiceLifetime};
///
/// #[derive(Default)]
/// struct Settings {
///     endpoint: String,
/// }
///
/// let factory = FnServiceFactory::new().with_service(ServiceLifetime::Execution, |_| {
///     Ok(Settings { endpoint: "https://example.org".into() })
/// });
/// ```
#[derive(Default)]
pub struct FnServiceFactory {
    constructors: HashMap<TypeId, Constructor>,
}

impl FnServiceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `S` with a fixed lifetime
    pub fn with_service<S, F>(self, lifetime: ServiceLifetime, constructor: F) -> Self
    where
        S: Any + Send + Sync,
        F: Fn(&ServiceContext) -> Result<S, BoxError> + Send + Sync + 'static,
    {
        self.with_living_service::<S, _>(move |services| {
            constructor(services).map(|service| LivingService::new(service, lifetime))
        })
    }

    /// Register a constructor that decides the lifetime and disposal of `S` itself
    pub fn with_living_service<S, F>(mut self, constructor: F) -> Self
    where
        S: Any + Send + Sync,
        F: Fn(&ServiceContext) -> Result<LivingService, BoxError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(TypeId::of::<S>(), Box::new(constructor));
        self
    }
}

impl ServiceFactory for FnServiceFactory {
    fn create_service(
        &self,
        service_type: ServiceType,
        services: &ServiceContext,
    ) -> Result<Option<LivingService>, ServiceError> {
        let Some(constructor) = self.constructors.get(&service_type.id()) else {
            return Ok(None);
        };
        constructor(services)
            .map(Some)
            .map_err(|error| ServiceError::creation(service_type.name(), error))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Clock;
    struct Ledger;

    #[test]
    fn test_service_type_identity() {
        assert_eq!(ServiceType::of::<Clock>(), ServiceType::of::<Clock>());
        assert_ne!(ServiceType::of::<Clock>(), ServiceType::of::<Ledger>());
        assert!(ServiceType::of::<Clock>().name().ends_with("Clock"));
    }

    #[test]
    fn test_zero_factory_supports_nothing() {
        let services = ServiceContext::new(Arc::new(ZeroServiceFactory));
        let created = ZeroServiceFactory
            .create_service(ServiceType::of::<Clock>(), &services)
            .unwrap();
        assert!(created.is_none());
    }

    #[test]
    fn test_fn_factory() {
        let factory = FnServiceFactory::new()
            .with_service(ServiceLifetime::Step, |_| Ok(Clock));
        let services = ServiceContext::new(Arc::new(ZeroServiceFactory));

        let created = factory
            .create_service(ServiceType::of::<Clock>(), &services)
            .unwrap()
            .unwrap();
        assert_eq!(created.lifetime(), ServiceLifetime::Step);
        assert!(created.instance.downcast_ref::<Clock>().is_some());

        let missing = factory
            .create_service(ServiceType::of::<Ledger>(), &services)
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_fn_factory_creation_failure() {
        let factory = FnServiceFactory::new()
            .with_service::<Clock, _>(ServiceLifetime::Step, |_| Err("no clock".into()));
        let services = ServiceContext::new(Arc::new(ZeroServiceFactory));

        let error = factory
            .create_service(ServiceType::of::<Clock>(), &services)
            .unwrap_err();
        assert!(matches!(error, ServiceError::Creation { .. }));
    }

    #[test]
    fn test_aggregate_factory_remembers_answers() {
        struct Counting {
            calls: Arc<AtomicUsize>,
        }

        impl ServiceFactory for Counting {
            fn create_service(
                &self,
                _service_type: ServiceType,
                _services: &ServiceContext,
            ) -> Result<Option<LivingService>, ServiceError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let factory = AggregateServiceFactory::new()
            .with_factory(Counting { calls: calls.clone() })
            .with_factory(
                FnServiceFactory::new().with_service(ServiceLifetime::Execution, |_| Ok(Ledger)),
            );
        let services = ServiceContext::new(Arc::new(ZeroServiceFactory));

        for _ in 0..3 {
            let created = factory
                .create_service(ServiceType::of::<Ledger>(), &services)
                .unwrap();
            assert!(created.is_some());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disposable_service_runs_disposer() {
        struct Connection {
            closed: Arc<AtomicUsize>,
        }

        impl Dispose for Connection {
            fn dispose(&self) -> Result<(), BoxError> {
                self.closed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let closed = Arc::new(AtomicUsize::new(0));
        let service = LivingService::disposable(
            Connection {
                closed: closed.clone(),
            },
            ServiceLifetime::Execution,
        );
        service.dispose().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
