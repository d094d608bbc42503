//! Resumption - Batching Data Task Executor
//!
//! An execution engine for data-fetching code written as ordinary sequential logic.
//! A [`DataTask`] describes a computation that needs remote data; whenever it needs a
//! request answered it suspends and hands the request to the driver. Concurrently
//! composed tasks suspend together, so their requests are answered in one step.
//!
//! # Overview
//!
//! Resumption provides a task model and driver where:
//! - Tasks are built with `map`, `bind`, [`sum`], [`join_all`] and `zip`
//! - Requests issued by concurrent branches are batched into a single step
//! - Identical idempotent requests within a step share one retrieval
//! - Responses are cached per data source and invalidated by mutations
//! - Requests in the same sequence group run one after another
//! - Services are resolved per step or per execution and disposed in reverse order
//! - [`DataStream`]s yield sequences whose items are fetched by tasks
//!
//! # Example
//!
//! ```rust
//! use resumption::{execute, join_all, AsyncRequest, BoxError, DataTask, ZeroServiceFactory};
//!
//! fn user_name(id: u64) -> DataTask<String> {
//!     DataTask::request(
//!         AsyncRequest::new(move || async move { Ok::<_, BoxError>(format!("user-{id}")) })
//!             .with_identity(id)
//!             .with_data_source("users")
//!             .read_only(),
//!     )
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), resumption::TaskError> {
//!     // Both lookups of user 1 share one retrieval
//!     let names = join_all([1, 2, 1].map(user_name));
//!     let names = execute(names, ZeroServiceFactory).await?;
//!
//!     assert_eq!(names, ["user-1", "user-2", "user-1"]);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod combinator;
pub mod context;
pub mod error;
pub mod executor;
pub mod key;
pub mod reporter;
pub mod request;
pub mod response;
mod scheduler;
pub mod service;
pub mod stream;
pub mod task;
pub mod types;

#[cfg(test)]
mod test_support;

pub use batch::Batch;
pub use cache::ResponseCache;
pub use combinator::{for_each, join_all, sum};
pub use context::ServiceContext;
pub use error::{
    AggregateError, BoxError, ConfigError, ConfigResult, ServiceError, SharedError, TaskError,
    TaskResult,
};
pub use executor::{execute, ExecutionContext};
pub use key::Key;
pub use reporter::{
    ExecutionEvent, ExecutionReporter, MultiReporter, NoOpReporter, TracingReporter,
};
pub use request::{AsyncRequest, DataRequest, Retrieval, TypedRequest};
pub use response::{Response, Value};
pub use service::{
    AggregateServiceFactory, Dispose, FnServiceFactory, LivingService, ServiceFactory,
    ServiceLifetime, ServiceType, ZeroServiceFactory,
};
pub use stream::{Advance, DataStream};
pub use task::{DataTask, Requests, RequestsPending, Resume, StepState};
pub use types::{ExecutionId, ExecutionStats, ExecutorConfig, Limit};

/// A boxed future that is Send and can be used across thread boundaries
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;
