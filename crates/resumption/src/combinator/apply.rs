//! Concurrent composition of two tasks

use crate::batch::Batch;
use crate::combinator::abort::{abort_state, abort_task};
use crate::error::TaskResult;
use crate::task::{DataTask, RequestsPending, StepState};

impl<A: Send + 'static> DataTask<A> {
    /// Run two tasks concurrently and pair their results.
    ///
    /// The requests of both tasks are merged into the same step. If one side fails, the
    /// other is aborted so that its cleanup handlers run before the failure propagates.
    pub fn zip<B: Send + 'static>(self, other: DataTask<B>) -> DataTask<(A, B)> {
        DataTask::from_step(move || step_zip(self, other))
    }

    /// Run two tasks concurrently and combine their results with `f`
    pub fn zip_with<B, U, F>(self, other: DataTask<B>, f: F) -> DataTask<U>
    where
        B: Send + 'static,
        U: Send + 'static,
        F: FnOnce(A, B) -> U + Send + 'static,
    {
        self.zip(other).map(move |(a, b)| f(a, b))
    }
}

impl<F: Send + 'static> DataTask<F> {
    /// Apply the function this task produces to the result of `input`, running both
    /// tasks concurrently
    pub fn apply<A, U>(self, input: DataTask<A>) -> DataTask<U>
    where
        A: Send + 'static,
        U: Send + 'static,
        F: FnOnce(A) -> U,
    {
        self.zip(input).map(|(f, a)| f(a))
    }
}

fn step_zip<A, B>(left: DataTask<A>, right: DataTask<B>) -> TaskResult<StepState<(A, B)>>
where
    A: Send + 'static,
    B: Send + 'static,
{
    match (left.step(), right.step()) {
        (Ok(left), Ok(right)) => Ok(combine_states(left, right)),
        (Err(left), Err(right)) => Err(left.combine(right)),
        (Err(cause), Ok(survivor)) => Err(abort_state(Ok(survivor), cause)),
        (Ok(survivor), Err(cause)) => Err(abort_state(Ok(survivor), cause)),
    }
}

fn combine_states<A, B>(left: StepState<A>, right: StepState<B>) -> StepState<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    match (left, right) {
        (StepState::Result(a), StepState::Result(b)) => StepState::Result((a, b)),
        (StepState::Pending(left), StepState::Result(b)) => {
            StepState::Pending(left.map(move |next| next.map(move |a| (a, b))))
        }
        (StepState::Result(a), StepState::Pending(right)) => {
            StepState::Pending(right.map(move |next| next.map(move |b| (a, b))))
        }
        (StepState::Pending(left), StepState::Pending(right)) => {
            StepState::Pending(both_pending(left, right))
        }
    }
}

fn both_pending<A, B>(left: RequestsPending<A>, right: RequestsPending<B>) -> RequestsPending<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    let (left_requests, resume_left) = left.into_parts();
    let (right_requests, resume_right) = right.into_parts();

    RequestsPending::new(
        Batch::branch2(left_requests, right_requests),
        move |responses| {
            let (left_responses, right_responses) = match responses {
                Batch::Abort => (Batch::Abort, Batch::Abort),
                responses => responses.into_branch2()?,
            };
            match (resume_left(left_responses), resume_right(right_responses)) {
                (Ok(left), Ok(right)) => Ok(left.zip(right)),
                (Err(left), Err(right)) => Err(left.combine(right)),
                (Err(cause), Ok(survivor)) => Err(abort_task(survivor, cause)),
                (Ok(survivor), Err(cause)) => Err(abort_task(survivor, cause)),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::TaskError;
    use crate::request::DataRequest;
    use crate::response::Response;
    use crate::test_support::{echo, echo_response, run_sync, run_sync_with, Echo};

    #[test]
    fn test_zip_of_ready_tasks() {
        let task = DataTask::ready(1).zip(DataTask::ready("one"));
        assert!(matches!(task.step(), Ok(StepState::Result((1, "one")))));
    }

    #[test]
    fn test_zip_merges_requests_into_one_step() {
        let task = echo(1).zip(echo(2));
        let StepState::Pending(pending) = task.step().unwrap() else {
            panic!("Expected the zip to suspend");
        };
        let requests = pending.requests();
        assert_eq!(requests.kind(), "branch2");
        assert_eq!(requests.len(), 2);
    }

    #[test]
    fn test_zip_with_one_side_ready() {
        let task = DataTask::ready(10).zip_with(echo(5), |a, b| a + b);
        assert_eq!(run_sync(task).unwrap(), 15);

        let task = echo(5).zip_with(DataTask::ready(10), |a, b| a * b);
        assert_eq!(run_sync(task).unwrap(), 50);
    }

    #[test]
    fn test_zip_across_multiple_steps() {
        let steps = Arc::new(Mutex::new(Vec::new()));
        let left = echo(1).bind(|n| echo(n + 1)).bind(|n| echo(n + 1));
        let right = echo(10);
        let recorded = steps.clone();
        let result = run_sync_with(left.zip(right), move |request| {
            recorded.lock().unwrap().push(request.name());
            echo_response(request)
        })
        .unwrap();
        assert_eq!(result, (3, 10));
        assert_eq!(steps.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_apply() {
        let task = DataTask::ready(|n: u32| n * 3).apply(echo(7));
        assert_eq!(run_sync(task).unwrap(), 21);
    }

    #[test]
    fn test_zip_shape_mismatch_fails_fast() {
        let StepState::Pending(pending) = echo(1).zip(echo(2)).step().unwrap() else {
            panic!("Expected the zip to suspend");
        };
        let error = pending
            .resume(Batch::Leaf(Response::from_value(1u32)))
            .unwrap_err();
        assert!(matches!(error, TaskError::BatchShape { .. }));
    }

    #[test]
    fn test_failing_side_aborts_sibling_with_single_error() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = cleanups.clone();
        let sibling = echo(1).try_finally(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let failing = DataTask::<u32>::fail(TaskError::msg("left failed"));

        let error = run_sync(failing.zip(sibling)).unwrap_err();
        assert_eq!(error.to_string(), "left failed");
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_after_resumption_aborts_sibling() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = cleanups.clone();
        let sibling = echo(1)
            .bind(|n| echo(n + 1))
            .try_finally(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let failing = echo(1).bind(|_| DataTask::<u32>::fail(TaskError::msg("left failed")));

        let error = run_sync(sibling.zip(failing)).unwrap_err();
        assert_eq!(error.to_string(), "left failed");
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sibling_failing_during_abort_gives_aggregate() {
        let sibling = DataTask::<u32>::from_step(|| {
            let request: Arc<dyn DataRequest> = Arc::new(Echo::new(1));
            Ok(StepState::Pending(RequestsPending::new(
                Batch::Leaf(request),
                |responses| match responses {
                    Batch::Abort => Err(TaskError::msg("cleanup failed")),
                    responses => responses.into_leaf()?.value::<u32>().map(DataTask::ready),
                },
            )))
        });
        let failing = DataTask::<u32>::fail(TaskError::msg("left failed"));

        let TaskError::Aggregate(aggregate) = run_sync(failing.zip(sibling)).unwrap_err() else {
            panic!("Expected an aggregate error");
        };
        let messages: Vec<_> = aggregate.errors().iter().map(ToString::to_string).collect();
        assert_eq!(messages, vec!["left failed", "cleanup failed"]);
    }

    #[test]
    fn test_both_sides_failing_gives_aggregate() {
        let left = echo(1).bind(|_| DataTask::<u32>::fail(TaskError::msg("left")));
        let right = echo(2).bind(|_| DataTask::<u32>::fail(TaskError::msg("right")));

        let TaskError::Aggregate(aggregate) = run_sync(left.zip(right)).unwrap_err() else {
            panic!("Expected an aggregate error");
        };
        assert_eq!(aggregate.errors().len(), 2);
    }

    #[test]
    fn test_aborted_zip_forwards_abort_to_both_sides() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let left_counter = cleanups.clone();
        let right_counter = cleanups.clone();
        let left = echo(1).try_finally(move || {
            left_counter.fetch_add(1, Ordering::SeqCst);
        });
        let right = echo(2).try_finally(move || {
            right_counter.fetch_add(1, Ordering::SeqCst);
        });

        let StepState::Pending(pending) = left.zip(right).step().unwrap() else {
            panic!("Expected the zip to suspend");
        };
        let error = pending.resume(Batch::Abort).unwrap_err();
        assert!(error.is_aborted());
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }
}
