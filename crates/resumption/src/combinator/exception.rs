//! Intercepting failures and running cleanup

use tracing::trace;

use crate::error::{TaskError, TaskResult};
use crate::task::{DataTask, RequestsPending, StepState};

impl<T: Send + 'static> DataTask<T> {
    /// Recover from a failure of this task with the task `handler` builds.
    ///
    /// The handler sees every failure raised while this task runs, including failed
    /// responses re-raised by its requests. It never sees the abort signal or batch
    /// shape errors; those always propagate.
    pub fn try_catch<F>(self, handler: F) -> Self
    where
        F: FnOnce(TaskError) -> DataTask<T> + Send + 'static,
    {
        DataTask::from_step(move || step_try_catch(self, handler))
    }

    /// Run `on_exit` exactly once when this task finishes, fails or is aborted
    pub fn try_finally<F>(self, on_exit: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        DataTask::from_step(move || step_try_finally(self, on_exit))
    }

    /// Build a task around `resource` and release the resource once that task finishes,
    /// fails or is aborted
    pub fn bracket<R, B, F>(resource: R, body: B, release: F) -> Self
    where
        R: Send + 'static,
        B: FnOnce(&R) -> DataTask<T>,
        F: FnOnce(R) + Send + 'static,
    {
        body(&resource).try_finally(move || release(resource))
    }
}

fn step_try_catch<T, F>(wrapped: DataTask<T>, handler: F) -> TaskResult<StepState<T>>
where
    T: Send + 'static,
    F: FnOnce(TaskError) -> DataTask<T> + Send + 'static,
{
    match wrapped.step() {
        Ok(StepState::Result(value)) => Ok(StepState::Result(value)),
        Ok(StepState::Pending(pending)) => {
            let (requests, resume) = pending.into_parts();
            Ok(StepState::Pending(RequestsPending::new(
                requests,
                move |responses| match resume(responses) {
                    Ok(next) => Ok(next.try_catch(handler)),
                    Err(error) if error.is_catchable() => {
                        trace!(%error, "handling failure of resumed task");
                        Ok(handler(error))
                    }
                    Err(error) => Err(error),
                },
            )))
        }
        Err(error) if error.is_catchable() => {
            trace!(%error, "handling task failure");
            handler(error).step()
        }
        Err(error) => Err(error),
    }
}

fn step_try_finally<T, F>(wrapped: DataTask<T>, on_exit: F) -> TaskResult<StepState<T>>
where
    T: Send + 'static,
    F: FnOnce() + Send + 'static,
{
    match wrapped.step() {
        Ok(StepState::Pending(pending)) => {
            let (requests, resume) = pending.into_parts();
            Ok(StepState::Pending(RequestsPending::new(
                requests,
                move |responses| match resume(responses) {
                    Ok(next) => Ok(next.try_finally(on_exit)),
                    Err(error) => {
                        on_exit();
                        Err(error)
                    }
                },
            )))
        }
        finished => {
            on_exit();
            finished
        }
    }
}
