//! Service resolution scoped to one execution and its steps

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::error::ServiceError;
use crate::service::{Disposer, LivingService, ServiceFactory, ServiceLifetime, ServiceType};

/// Instances resolved within one scope, disposed in reverse order of creation
#[derive(Default)]
struct ServiceCache {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    disposal_stack: Vec<(&'static str, Disposer)>,
}

impl ServiceCache {
    fn insert(&mut self, service_type: ServiceType, service: LivingService) {
        self.services.insert(service_type.id(), service.instance);
        if let Some(disposer) = service.disposer {
            self.disposal_stack.push((service_type.name(), disposer));
        }
    }

    fn dispose(mut self) -> Result<(), ServiceError> {
        let mut errors = Vec::new();
        while let Some((name, disposer)) = self.disposal_stack.pop() {
            trace!(service = name, "disposing service");
            if let Err(error) = disposer() {
                debug!(service = name, error = %error, "service disposal failed");
                errors.push(Arc::from(error));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Disposal(errors))
        }
    }
}

struct Scopes {
    /// `None` once the execution has been disposed
    execution: Option<ServiceCache>,
    /// `None` between steps
    step: Option<ServiceCache>,
}

impl Scopes {
    fn find(&self, id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.step
            .as_ref()
            .and_then(|step| step.services.get(&id))
            .or_else(|| {
                self.execution
                    .as_ref()
                    .and_then(|execution| execution.services.get(&id))
            })
            .cloned()
    }
}

enum StepLocal {}
enum ExecutionLocal {}

/// Resolves services for the requests of one execution.
///
/// Step-scoped instances are shared by all requests prepared in the same step and
/// disposed when the step completes. Execution-scoped instances live until the
/// execution context is finished or dropped.
pub struct ServiceContext {
    factory: Arc<dyn ServiceFactory>,
    scopes: Mutex<Scopes>,
}

impl ServiceContext {
    pub fn new(factory: Arc<dyn ServiceFactory>) -> Self {
        Self {
            factory,
            scopes: Mutex::new(Scopes {
                execution: Some(ServiceCache::default()),
                step: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Scopes> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a service of type `S` through the service factory.
    ///
    /// The first request for a type creates it; later requests within its lifetime get
    /// the same instance.
    pub fn get_service<S: Any + Send + Sync>(&self) -> Result<Arc<S>, ServiceError> {
        let service_type = ServiceType::of::<S>();
        self.resolve(service_type, || {
            self.factory
                .create_service(service_type, self)?
                .ok_or(ServiceError::NotSupported {
                    type_name: service_type.name(),
                })
        })
    }

    /// A default-constructed instance of `S` shared by the current step
    pub fn step_local<S: Default + Any + Send + Sync>(&self) -> Result<Arc<S>, ServiceError> {
        self.resolve(ServiceType::of::<(StepLocal, S)>(), || {
            Ok(LivingService::new(S::default(), ServiceLifetime::Step))
        })
    }

    /// A default-constructed instance of `S` shared by the whole execution
    pub fn execution_local<S: Default + Any + Send + Sync>(
        &self,
    ) -> Result<Arc<S>, ServiceError> {
        self.resolve(ServiceType::of::<(ExecutionLocal, S)>(), || {
            Ok(LivingService::new(S::default(), ServiceLifetime::Execution))
        })
    }

    fn resolve<S, F>(&self, service_type: ServiceType, create: F) -> Result<Arc<S>, ServiceError>
    where
        S: Any + Send + Sync,
        F: FnOnce() -> Result<LivingService, ServiceError>,
    {
        let type_name = std::any::type_name::<S>();
        if let Some(found) = self.lock().find(service_type.id()) {
            return downcast(found, type_name);
        }

        // The lock is released while creating so that factories can resolve the
        // services their product depends on.
        let created = create()?;
        let instance = downcast::<S>(created.instance.clone(), type_name)?;

        let mut scopes = self.lock();
        if let Some(existing) = scopes.find(service_type.id()) {
            drop(scopes);
            trace!(service = type_name, "discarding concurrently created service");
            if let Err(error) = created.dispose() {
                warn!(service = type_name, error = %error, "failed to dispose discarded service");
            }
            return downcast(existing, type_name);
        }

        let scope = match created.lifetime {
            ServiceLifetime::Execution => scopes
                .execution
                .as_mut()
                .ok_or(ServiceError::Disposed { type_name })?,
            ServiceLifetime::Step => scopes
                .step
                .as_mut()
                .ok_or(ServiceError::NoActiveStep { type_name })?,
        };
        trace!(service = type_name, lifetime = ?created.lifetime, "created service");
        scope.insert(service_type, created);
        Ok(instance)
    }

    /// Open a fresh step scope, disposing any scope left open by an earlier step
    pub(crate) fn begin_step(&self) -> Result<(), ServiceError> {
        let previous = self.lock().step.replace(ServiceCache::default());
        previous.map_or(Ok(()), ServiceCache::dispose)
    }

    /// Dispose the services of the current step
    pub(crate) fn end_step(&self) -> Result<(), ServiceError> {
        let step = self.lock().step.take();
        step.map_or(Ok(()), ServiceCache::dispose)
    }

    /// Dispose every remaining service. Later calls are no-ops.
    pub(crate) fn dispose(&self) -> Result<(), ServiceError> {
        let step = self.end_step();
        let execution = self.lock().execution.take();
        ServiceError::merge(step, execution.map_or(Ok(()), ServiceCache::dispose))
    }
}

impl Drop for ServiceContext {
    fn drop(&mut self) {
        if let Err(error) = self.dispose() {
            warn!(error = %error, "failed to dispose services of a dropped execution");
        }
    }
}

fn downcast<S: Any + Send + Sync>(
    instance: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
) -> Result<Arc<S>, ServiceError> {
    instance
        .downcast::<S>()
        .map_err(|_| ServiceError::WrongType { type_name })
}
