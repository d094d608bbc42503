//! Error types for the resumption execution engine

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A boxed error that can be sent across thread boundaries
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A reference-counted error, shared by every call site that observes the same failure
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// The error a data task fails with
///
/// Ordinary failures (raised by task-composing code, or captured while preparing or
/// executing a request) are [`TaskError::Failed`] and can be intercepted with
/// [`DataTask::try_catch`](crate::DataTask::try_catch). The abort signal and batch shape
/// errors are never intercepted.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("{0}")]
    Failed(SharedError),

    #[error("This data task has been aborted due to an unhandled error in a concurrently composed task")]
    Aborted,

    #[error(transparent)]
    Aggregate(AggregateError),

    #[error("Batch shape mismatch: expected {expected}, found {found}")]
    BatchShape { expected: String, found: String },

    #[error("Response type mismatch: expected a value of type {expected}")]
    ResponseType { expected: &'static str },

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

/// Result type alias for data task operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
#[error("{0}")]
struct Message(String);

impl TaskError {
    /// Create an ordinary failure from a message
    pub fn msg<S: Into<String>>(message: S) -> Self {
        TaskError::Failed(Arc::new(Message(message.into())))
    }

    /// Create an ordinary failure from any error
    pub fn new<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        TaskError::Failed(Arc::new(error))
    }

    /// Create an ordinary failure from a boxed error, keeping task errors intact
    pub fn from_boxed(error: BoxError) -> Self {
        match error.downcast::<TaskError>() {
            Ok(task_error) => *task_error,
            Err(other) => TaskError::Failed(Arc::from(other)),
        }
    }

    /// Check if this is the abort signal
    pub fn is_aborted(&self) -> bool {
        matches!(self, TaskError::Aborted)
    }

    /// Check if a `try_catch` handler may intercept this error
    pub fn is_catchable(&self) -> bool {
        !matches!(self, TaskError::Aborted | TaskError::BatchShape { .. })
    }

    /// Look for an error of a concrete type behind an ordinary failure
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            TaskError::Failed(error) => error.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Combine the errors of two concurrently composed branches.
    ///
    /// The abort signal only survives if both sides were aborted; otherwise the real
    /// failures are flattened into one [`AggregateError`].
    pub fn combine(self, other: TaskError) -> TaskError {
        match (self, other) {
            (TaskError::Aborted, other) => other,
            (this, TaskError::Aborted) => this,
            (this, other) => {
                let mut errors = Vec::new();
                this.flatten_into(&mut errors);
                other.flatten_into(&mut errors);
                TaskError::Aggregate(AggregateError { errors })
            }
        }
    }

    /// Combine any number of branch errors, `None` if there are none
    pub fn combine_all<I: IntoIterator<Item = TaskError>>(errors: I) -> Option<TaskError> {
        errors.into_iter().reduce(TaskError::combine)
    }

    fn flatten_into(self, errors: &mut Vec<TaskError>) {
        match self {
            TaskError::Aggregate(aggregate) => errors.extend(aggregate.errors),
            error => errors.push(error),
        }
    }

    pub(crate) fn shape<E: Into<String>, F: Into<String>>(expected: E, found: F) -> Self {
        TaskError::BatchShape {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Failures of two or more concurrently composed branches
#[derive(Debug, Clone)]
pub struct AggregateError {
    errors: Vec<TaskError>,
}

impl AggregateError {
    /// The individual failures, in branch order
    pub fn errors(&self) -> &[TaskError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<TaskError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} concurrent tasks failed", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(f, "{separator}{error}")?;
        }
        Ok(())
    }
}

impl StdError for AggregateError {}

/// Errors related to service resolution and disposal
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error("The service type {type_name} is not supported by the service factory")]
    NotSupported { type_name: &'static str },

    #[error("The service factory produced an instance of the wrong type for {type_name}")]
    WrongType { type_name: &'static str },

    #[error("The step-scoped service {type_name} was requested outside of an execution step")]
    NoActiveStep { type_name: &'static str },

    #[error("The service {type_name} was requested after the execution context was disposed")]
    Disposed { type_name: &'static str },

    #[error("Failed to create service {type_name}: {source}")]
    Creation {
        type_name: &'static str,
        source: SharedError,
    },

    #[error("{} service(s) failed to dispose", .0.len())]
    Disposal(Vec<SharedError>),
}

impl ServiceError {
    /// Create a creation failure for a service type
    pub fn creation(type_name: &'static str, error: BoxError) -> Self {
        ServiceError::Creation {
            type_name,
            source: Arc::from(error),
        }
    }

    /// Merge two disposal outcomes so that no failure is dropped
    pub(crate) fn merge(
        first: Result<(), ServiceError>,
        second: Result<(), ServiceError>,
    ) -> Result<(), ServiceError> {
        match (first, second) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(error), Ok(())) | (Ok(()), Err(error)) => Err(error),
            (Err(first), Err(second)) => {
                let mut errors = first.into_shared();
                errors.extend(second.into_shared());
                Err(ServiceError::Disposal(errors))
            }
        }
    }

    fn into_shared(self) -> Vec<SharedError> {
        match self {
            ServiceError::Disposal(errors) => errors,
            other => vec![Arc::new(other)],
        }
    }
}

/// Errors related to executor configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid max concurrent requests: {value} (must be > 0)")]
    InvalidMaxConcurrentRequests { value: usize },
}

impl ConfigError {
    /// Create an invalid max concurrent requests error
    pub fn invalid_max_concurrent_requests(value: usize) -> Self {
        ConfigError::InvalidMaxConcurrentRequests { value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connection refused")]
    struct ConnectionRefused;

    #[test]
    fn test_error_creation() {
        let error = TaskError::msg("boom");
        assert!(matches!(error, TaskError::Failed(_)));
        assert_eq!(error.to_string(), "boom");

        let error = TaskError::new(ConnectionRefused);
        assert!(error.downcast_ref::<ConnectionRefused>().is_some());
        assert_eq!(error.to_string(), "connection refused");
    }

    #[test]
    fn test_from_boxed_keeps_task_errors() {
        let boxed: BoxError = Box::new(TaskError::Aborted);
        assert!(TaskError::from_boxed(boxed).is_aborted());

        let boxed: BoxError = Box::new(ConnectionRefused);
        let error = TaskError::from_boxed(boxed);
        assert!(error.downcast_ref::<ConnectionRefused>().is_some());
    }

    #[test]
    fn test_catchability() {
        assert!(TaskError::msg("x").is_catchable());
        assert!(!TaskError::Aborted.is_catchable());
        assert!(!TaskError::shape("leaf", "branch2").is_catchable());
        assert!(TaskError::ResponseType { expected: "u32" }.is_catchable());
    }

    #[test]
    fn test_combine_drops_abort_signal() {
        let combined = TaskError::Aborted.combine(TaskError::msg("left"));
        assert_eq!(combined.to_string(), "left");

        let combined = TaskError::msg("right").combine(TaskError::Aborted);
        assert_eq!(combined.to_string(), "right");

        assert!(TaskError::Aborted.combine(TaskError::Aborted).is_aborted());
    }

    #[test]
    fn test_combine_flattens_aggregates() {
        let combined = TaskError::msg("a")
            .combine(TaskError::msg("b"))
            .combine(TaskError::msg("c"));

        let TaskError::Aggregate(aggregate) = combined else {
            panic!("Expected aggregate error");
        };
        let messages: Vec<_> = aggregate.errors().iter().map(ToString::to_string).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
        assert_eq!(aggregate.to_string(), "3 concurrent tasks failed: a; b; c");
    }

    #[test]
    fn test_combine_all() {
        assert!(TaskError::combine_all(Vec::new()).is_none());
        let single = TaskError::combine_all(vec![TaskError::msg("only")]).unwrap();
        assert_eq!(single.to_string(), "only");
    }

    #[test]
    fn test_service_error_merge() {
        let merged = ServiceError::merge(
            Err(ServiceError::Disposal(vec![Arc::new(ConnectionRefused)])),
            Err(ServiceError::NotSupported { type_name: "Conn" }),
        );
        let Err(ServiceError::Disposal(errors)) = merged else {
            panic!("Expected disposal error");
        };
        assert_eq!(errors.len(), 2);

        assert!(ServiceError::merge(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn test_config_error_helpers() {
        let error = ConfigError::invalid_max_concurrent_requests(0);
        assert_eq!(error, ConfigError::InvalidMaxConcurrentRequests { value: 0 });
    }
}
