//! The outcome of a single request execution

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use crate::error::{TaskError, TaskResult};

/// A type-erased response value, shared between every task that requested it
pub type Value = Arc<dyn Any + Send + Sync>;

/// Either the value a request produced or the failure that prevented it.
///
/// Failures are captured rather than raised so that they can be cached, shared between
/// deduplicated requests and re-raised only where the response is consumed.
#[derive(Clone)]
pub enum Response {
    Success(Value),
    Failure(TaskError),
}

impl Response {
    pub fn from_value<T: Any + Send + Sync>(value: T) -> Self {
        Response::Success(Arc::new(value))
    }

    pub fn from_error(error: TaskError) -> Self {
        Response::Failure(error)
    }

    pub fn has_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    /// The success value, re-raising the captured failure
    pub fn success(&self) -> TaskResult<&Value> {
        match self {
            Response::Success(value) => Ok(value),
            Response::Failure(error) => Err(error.clone()),
        }
    }

    pub fn into_success(self) -> TaskResult<Value> {
        match self {
            Response::Success(value) => Ok(value),
            Response::Failure(error) => Err(error),
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Response::Success(_) => None,
            Response::Failure(error) => Some(error),
        }
    }

    /// The success value as a `T`, re-raising the captured failure
    pub fn value<T: Any + Clone>(&self) -> TaskResult<T> {
        self.success()?
            .downcast_ref::<T>()
            .cloned()
            .ok_or(TaskError::ResponseType {
                expected: type_name::<T>(),
            })
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Success(_) => f.write_str("Success(..)"),
            Response::Failure(error) => f.debug_tuple("Failure").field(error).finish(),
        }
    }
}
