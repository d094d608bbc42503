//! The contract every data request implements

use std::any::type_name;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;

use crate::context::ServiceContext;
use crate::error::BoxError;
use crate::key::Key;
use crate::response::Value;
use crate::BoxFuture;

/// A prepared, not yet started retrieval of a request's value
pub type Retrieval = BoxFuture<'static, Result<Value, BoxError>>;

/// An object describing a unit of work against a data source.
///
/// Preparation happens while the step is being assembled and must not start any work;
/// the returned [`Retrieval`] is only polled once the step executes. This is where
/// batching services do their job: `prepare` can register the request with a
/// step-scoped service and return a future that waits for the batch to be sent.
///
/// The defaults describe an opaque mutation: no identity, so it is never deduplicated
/// or cached, and every execution invalidates the responses cached for its data source.
pub trait DataRequest: Send + Sync + 'static {
    /// Identifies requests that retrieve the same value
    fn identity(&self) -> Option<Key> {
        None
    }

    /// Groups requests whose caches are invalidated together
    fn data_source(&self) -> Option<Key> {
        None
    }

    /// Requests in the same group run strictly one after another
    fn sequence_group(&self) -> Option<Key> {
        None
    }

    /// Whether running the request twice yields the same value
    fn idempotent(&self) -> bool {
        false
    }

    /// Whether running the request may change its data source
    fn mutation(&self) -> bool {
        true
    }

    /// Human readable name used in logs and execution events
    fn name(&self) -> String {
        match self.identity() {
            Some(identity) => format!("{identity:?}"),
            None => type_name::<Self>().to_string(),
        }
    }

    fn prepare(&self, services: &ServiceContext) -> Result<Retrieval, BoxError>;
}

/// A request that is known to produce values of type [`TypedRequest::Output`]
pub trait TypedRequest: DataRequest {
    type Output: Clone + Send + Sync + 'static;
}

type Run = Arc<dyn Fn() -> Retrieval + Send + Sync>;

/// A request built from an async closure, configured with builder methods.
///
/// ```rust,no_run
/// use resumption::{AsyncRequest, DataTask};
///
/// let request = AsyncRequest::new(|| async { Ok::<_, std::io::Error>(42u32) })
///     .with_identity("answer")
///     .with_data_source("oracle")
///     .read_only();
/// let task = DataTask::request(request);
/// ```
pub struct AsyncRequest<T> {
    run: Run,
    identity: Option<Key>,
    data_source: Option<Key>,
    sequence_group: Option<Key>,
    idempotent: bool,
    mutation: bool,
    name: Option<String>,
    _output: PhantomData<fn() -> T>,
}

impl<T> AsyncRequest<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut, E>(run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let boxed: Run = Arc::new(move || {
            let retrieval = run();
            async move {
                retrieval
                    .await
                    .map(|value| Arc::new(value) as Value)
                    .map_err(Into::into)
            }
            .boxed()
        });

        Self {
            run: boxed,
            identity: None,
            data_source: None,
            sequence_group: None,
            idempotent: false,
            mutation: true,
            name: None,
            _output: PhantomData,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<Key>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_data_source(mut self, data_source: impl Into<Key>) -> Self {
        self.data_source = Some(data_source.into());
        self
    }

    pub fn with_sequence_group(mut self, group: impl Into<Key>) -> Self {
        self.sequence_group = Some(group.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark the request as a side-effect free read: idempotent and not a mutation
    pub fn read_only(mut self) -> Self {
        self.idempotent = true;
        self.mutation = false;
        self
    }

    pub fn with_mutation(mut self, mutation: bool) -> Self {
        self.mutation = mutation;
        self
    }
}

impl<T> DataRequest for AsyncRequest<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn identity(&self) -> Option<Key> {
        self.identity.clone()
    }

    fn data_source(&self) -> Option<Key> {
        self.data_source.clone()
    }

    fn sequence_group(&self) -> Option<Key> {
        self.sequence_group.clone()
    }

    fn idempotent(&self) -> bool {
        self.idempotent
    }

    fn mutation(&self) -> bool {
        self.mutation
    }

    fn name(&self) -> String {
        match (&self.name, &self.identity) {
            (Some(name), _) => name.clone(),
            (None, Some(identity)) => format!("{identity:?}"),
            (None, None) => format!("AsyncRequest<{}>", type_name::<T>()),
        }
    }

    fn prepare(&self, _services: &ServiceContext) -> Result<Retrieval, BoxError> {
        Ok((self.run)())
    }
}

impl<T> TypedRequest for AsyncRequest<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;
}
