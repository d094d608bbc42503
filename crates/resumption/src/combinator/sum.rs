//! Concurrent composition of any number of tasks

use std::sync::Arc;

use crate::batch::Batch;
use crate::combinator::abort::{abort_pending, abort_task};
use crate::error::{TaskError, TaskResult};
use crate::task::{DataTask, RequestsPending, Resume, StepState};

type Add<S, T> = Arc<dyn Fn(S, T) -> S + Send + Sync>;

/// Run `tasks` concurrently and fold their results into `initial` with `add`.
///
/// Results are folded in the order of `tasks`, whatever order they finish in. If any
/// task fails, the others are aborted and the failures are combined.
///
/// ```rust
/// use resumption::{sum, DataTask};
///
/// let total = sum((1..=4).map(DataTask::ready), 0, |acc, n| acc + n);
/// ```
pub fn sum<T, S, I, F>(tasks: I, initial: S, add: F) -> DataTask<S>
where
    T: Send + 'static,
    S: Send + 'static,
    I: IntoIterator<Item = DataTask<T>>,
    F: Fn(S, T) -> S + Send + Sync + 'static,
{
    let tasks: Vec<DataTask<T>> = tasks.into_iter().collect();
    let add: Add<S, T> = Arc::new(add);
    DataTask::from_step(move || step_sum(tasks, initial, add))
}

/// Run `tasks` concurrently and collect their results in order
pub fn join_all<T, I>(tasks: I) -> DataTask<Vec<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = DataTask<T>>,
{
    let tasks: Vec<DataTask<T>> = tasks.into_iter().collect();
    let capacity = tasks.len();
    sum(tasks, Vec::with_capacity(capacity), |mut values, value| {
        values.push(value);
        values
    })
}

fn step_sum<T, S>(tasks: Vec<DataTask<T>>, initial: S, add: Add<S, T>) -> TaskResult<StepState<S>>
where
    T: Send + 'static,
    S: Send + 'static,
{
    let mut sum = initial;
    let mut pending = Vec::new();
    let mut errors = Vec::new();

    for task in tasks {
        match task.step() {
            // A pending task earlier in the list must be folded first
            Ok(StepState::Result(value)) if pending.is_empty() && errors.is_empty() => {
                sum = add(sum, value);
            }
            Ok(StepState::Result(value)) => pending.push(Slot::Done(value)),
            Ok(StepState::Pending(suspended)) => pending.push(Slot::Pending(suspended)),
            Err(error) => errors.push(error),
        }
    }

    if let Some(cause) = TaskError::combine_all(errors) {
        return Err(pending.into_iter().fold(cause, |cause, slot| match slot {
            Slot::Done(_) => cause,
            Slot::Pending(suspended) => abort_pending(suspended, cause),
        }));
    }

    if pending.is_empty() {
        return Ok(StepState::Result(sum));
    }
    Ok(StepState::Pending(resume_slots(pending, sum, add)))
}

/// A task that is still running, or one that finished after an earlier task suspended
enum Slot<T> {
    Done(T),
    Pending(RequestsPending<T>),
}

enum Resuming<T> {
    Done(T),
    Waiting(Resume<T>),
}

fn resume_slots<T, S>(slots: Vec<Slot<T>>, sum: S, add: Add<S, T>) -> RequestsPending<S>
where
    T: Send + 'static,
    S: Send + 'static,
{
    let mut requests = Vec::new();
    let mut resumes = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            Slot::Done(value) => resumes.push(Resuming::Done(value)),
            Slot::Pending(suspended) => {
                let (batch, resume) = suspended.into_parts();
                requests.push(batch);
                resumes.push(Resuming::Waiting(resume));
            }
        }
    }
    let count = requests.len();

    RequestsPending::new(Batch::BranchN(requests), move |responses| {
        let mut responses = match responses {
            Batch::Abort => (0..count).map(|_| Batch::Abort).collect(),
            responses => responses.into_branch_n(count)?,
        }
        .into_iter();

        let mut next = Vec::with_capacity(resumes.len());
        let mut errors = Vec::new();
        for slot in resumes {
            match slot {
                Resuming::Done(value) => next.push(DataTask::ready(value)),
                Resuming::Waiting(resume) => {
                    let response = responses.next().unwrap_or(Batch::Abort);
                    match resume(response) {
                        Ok(task) => next.push(task),
                        Err(error) => errors.push(error),
                    }
                }
            }
        }

        if let Some(cause) = TaskError::combine_all(errors) {
            return Err(next.into_iter().fold(cause, |cause, task| abort_task(task, cause)));
        }
        Ok(DataTask::from_step(move || step_sum(next, sum, add)))
    })
}
