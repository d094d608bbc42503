//! Winding down a task whose concurrently composed sibling failed

use tracing::trace;

use crate::batch::Batch;
use crate::error::{TaskError, TaskResult};
use crate::task::{DataTask, RequestsPending, StepState};

/// Step `task` and then abort it, see [`abort_state`]
pub(crate) fn abort_task<T: Send + 'static>(task: DataTask<T>, cause: TaskError) -> TaskError {
    abort_state(task.step(), cause)
}

/// Abort a task that is already suspended, see [`abort_state`]
pub(crate) fn abort_pending<T: Send + 'static>(
    pending: RequestsPending<T>,
    cause: TaskError,
) -> TaskError {
    abort_state(Ok(StepState::Pending(pending)), cause)
}

/// Resume a task with [`Batch::Abort`] until it stops suspending, giving its cleanup
/// handlers the chance to run.
///
/// Returns the error to propagate in place of the task's result: `cause` itself if the
/// task winds down quietly, or `cause` combined with whatever the task failed with
/// while winding down.
pub(crate) fn abort_state<T: Send + 'static>(
    state: TaskResult<StepState<T>>,
    cause: TaskError,
) -> TaskError {
    let mut state = state;
    loop {
        match state {
            Ok(StepState::Result(_)) => return cause,
            Err(error) => return cause.combine(error),
            Ok(StepState::Pending(pending)) => {
                trace!(requests = pending.requests().len(), "aborting suspended task");
                state = pending
                    .resume(Batch::Abort)
                    .and_then(DataTask::step);
            }
        }
    }
}
