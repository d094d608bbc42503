//! Requests and a synchronous driver shared by the unit tests

use std::sync::Arc;

use futures::FutureExt;

use crate::batch::Batch;
use crate::context::ServiceContext;
use crate::error::{BoxError, TaskError, TaskResult};
use crate::key::Key;
use crate::request::{DataRequest, Retrieval, TypedRequest};
use crate::response::{Response, Value};
use crate::task::{DataTask, StepState};

/// An idempotent read that answers with its own value
pub(crate) struct Echo(pub(crate) u32);

impl Echo {
    pub(crate) fn new(value: u32) -> Self {
        Echo(value)
    }
}

impl DataRequest for Echo {
    fn identity(&self) -> Option<Key> {
        Some(Key::new(self.0))
    }

    fn data_source(&self) -> Option<Key> {
        Some(Key::from("echo"))
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn mutation(&self) -> bool {
        false
    }

    fn prepare(&self, _services: &ServiceContext) -> Result<Retrieval, BoxError> {
        let value = self.0;
        Ok(async move { Ok(Arc::new(value) as Value) }.boxed())
    }
}

impl TypedRequest for Echo {
    type Output = u32;
}

pub(crate) fn echo(value: u32) -> DataTask<u32> {
    DataTask::request(Echo(value))
}

/// Answers echo requests with their value and everything else with a failure
pub(crate) fn echo_response(request: &Arc<dyn DataRequest>) -> Response {
    match request
        .identity()
        .and_then(|identity| identity.downcast_ref::<u32>().copied())
    {
        Some(value) => Response::from_value(value),
        None => Response::from_error(TaskError::msg("not an echo request")),
    }
}

/// Drive a task to completion without an executor, answering echo requests
pub(crate) fn run_sync<T: Send + 'static>(task: DataTask<T>) -> TaskResult<T> {
    run_sync_with(task, echo_response)
}

/// Drive a task to completion without an executor
pub(crate) fn run_sync_with<T, F>(task: DataTask<T>, mut respond: F) -> TaskResult<T>
where
    T: Send + 'static,
    F: FnMut(&Arc<dyn DataRequest>) -> Response,
{
    let mut task = task;
    loop {
        match task.step()? {
            StepState::Result(value) => return Ok(value),
            StepState::Pending(pending) => {
                let responses: Batch<Response> = pending.requests().map_ref(&mut respond);
                task = pending.resume(responses)?;
            }
        }
    }
}
