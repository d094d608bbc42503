//! Transforming and combining data streams

use tracing::trace;

use crate::error::TaskError;
use crate::stream::DataStream;
use crate::task::DataTask;

impl<T: Send + 'static> DataStream<T> {
    pub fn map<U, F>(self, mut f: F) -> DataStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        DataStream::from_fn(move || {
            self.next()
                .map(move |advance| advance.map(|(item, rest)| (f(item), rest.map(f))))
        })
    }

    /// Replace every item with the result of the task `f` builds for it
    pub fn and_then<U, F>(self, mut f: F) -> DataStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> DataTask<U> + Send + 'static,
    {
        DataStream::from_fn(move || {
            self.next().bind(move |advance| match advance {
                Some((item, rest)) => f(item).map(move |value| Some((value, rest.and_then(f)))),
                None => DataTask::ready(None),
            })
        })
    }

    pub fn filter<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        DataStream::from_fn(move || {
            self.next().bind(move |advance| match advance {
                Some((item, rest)) if predicate(&item) => {
                    DataTask::ready(Some((item, rest.filter(predicate))))
                }
                Some((_, rest)) => rest.filter(predicate).next(),
                None => DataTask::ready(None),
            })
        })
    }

    /// Stop after `count` items without fetching any further
    pub fn take(self, count: usize) -> Self {
        DataStream::from_fn(move || {
            if count == 0 {
                drop(self);
                return DataTask::ready(None);
            }
            self.next()
                .map(move |advance| advance.map(|(item, rest)| (item, rest.take(count - 1))))
        })
    }

    /// Yield items until the task `predicate` builds for one of them finishes with `false`
    pub fn take_while<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&T) -> DataTask<bool> + Send + 'static,
    {
        DataStream::from_fn(move || {
            self.next().bind(move |advance| match advance {
                Some((item, rest)) => predicate(&item)
                    .map(move |keep| keep.then(|| (item, rest.take_while(predicate)))),
                None => DataTask::ready(None),
            })
        })
    }

    /// Replace every item with the stream `f` builds for it, flattening the result
    pub fn flat_map<U, F>(self, mut f: F) -> DataStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> DataStream<U> + Send + 'static,
    {
        DataStream::from_fn(move || {
            self.next().bind(move |advance| match advance {
                Some((item, rest)) => f(item)
                    .chain(DataStream::lazy(move || rest.flat_map(f)))
                    .next(),
                None => DataTask::ready(None),
            })
        })
    }

    /// The items of this stream followed by those of `other`
    pub fn chain(self, other: DataStream<T>) -> Self {
        DataStream::from_fn(move || {
            self.next().bind(move |advance| match advance {
                Some((item, rest)) => DataTask::ready(Some((item, rest.chain(other)))),
                None => other.next(),
            })
        })
    }

    /// Pair up the items of two streams, fetching both sides in the same step.
    ///
    /// The result ends as soon as either side does.
    pub fn zip<U: Send + 'static>(self, other: DataStream<U>) -> DataStream<(T, U)> {
        self.zip_with(other, |left, right| DataTask::ready((left, right)))
    }

    /// Combine the items of two streams pairwise with the task `f` builds
    pub fn zip_with<U, V, F>(self, other: DataStream<U>, mut f: F) -> DataStream<V>
    where
        U: Send + 'static,
        V: Send + 'static,
        F: FnMut(T, U) -> DataTask<V> + Send + 'static,
    {
        DataStream::from_fn(move || {
            self.next().zip(other.next()).bind(move |advances| match advances {
                (Some((left, left_rest)), Some((right, right_rest))) => f(left, right)
                    .map(move |value| Some((value, left_rest.zip_with(right_rest, f)))),
                _ => DataTask::ready(None),
            })
        })
    }

    /// Continue with the stream `handler` builds once fetching an item fails.
    ///
    /// Items already yielded stay yielded. Only the first failure is handled; the
    /// replacement stream is not guarded.
    pub fn try_catch<F>(self, handler: F) -> Self
    where
        F: FnOnce(TaskError) -> DataStream<T> + Send + 'static,
    {
        DataStream::from_fn(move || {
            self.next()
                .map(Ok::<_, TaskError>)
                .try_catch(|error| DataTask::ready(Err(error)))
                .bind(move |advance| match advance {
                    Ok(Some((item, rest))) => {
                        DataTask::ready(Some((item, rest.try_catch(handler))))
                    }
                    Ok(None) => DataTask::ready(None),
                    Err(error) => {
                        trace!(%error, "replacing failed stream");
                        handler(error).next()
                    }
                })
        })
    }

    /// Run `on_exit` exactly once when this stream ends, fails, or is dropped before
    /// reaching its end
    pub fn try_finally<F>(self, on_exit: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        guarded(self, OnExit(Some(on_exit)))
    }
}

impl<T: Send + 'static> DataTask<T> {
    /// Continue with the stream built from this task's result
    pub fn bind_stream<U, F>(self, f: F) -> DataStream<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> DataStream<U> + Send + 'static,
    {
        DataStream::from_fn(move || self.bind(move |value| f(value).next()))
    }
}

struct OnExit<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for OnExit<F> {
    fn drop(&mut self) {
        if let Some(on_exit) = self.0.take() {
            on_exit();
        }
    }
}

fn guarded<T, F>(stream: DataStream<T>, guard: OnExit<F>) -> DataStream<T>
where
    T: Send + 'static,
    F: FnOnce() + Send + 'static,
{
    DataStream::from_fn(move || {
        stream
            .next()
            .map(move |advance| advance.map(|(item, rest)| (item, guarded(rest, guard))))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::task::StepState;
    use crate::test_support::{echo, echo_response, run_sync, run_sync_with};

    fn fetched(values: Vec<u32>) -> DataStream<u32> {
        DataStream::iter(values).and_then(echo)
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = count.clone();
        (count, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Fails with "bad item" when fetching `failing`
    fn failing_at(values: Vec<u32>, failing: u32) -> DataStream<u32> {
        DataStream::iter(values).and_then(move |n| {
            if n == failing {
                DataTask::fail(TaskError::msg("bad item"))
            } else {
                echo(n)
            }
        })
    }

    #[test]
    fn test_map_and_filter() {
        let stream = fetched(vec![1, 2, 3, 4, 5])
            .filter(|n| n % 2 == 1)
            .map(|n| n * 10);
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![10, 30, 50]);
    }

    #[test]
    fn test_filter_skips_long_runs() {
        let task = DataStream::iter(0..10_000u32)
            .filter(|n| n % 1_000 == 0)
            .collect();
        let Ok(StepState::Result(items)) = task.step() else {
            panic!("Expected the stream to finish in one step");
        };
        assert_eq!(items.len(), 10);
    }

    #[test]
    fn test_take_fetches_no_further() {
        let mut requests = 0;
        let task = fetched(vec![1, 2, 3, 4]).take(2).collect();
        let items = run_sync_with(task, |request| {
            requests += 1;
            echo_response(request)
        });
        assert_eq!(items.unwrap(), vec![1, 2]);
        assert_eq!(requests, 2);
    }

    #[test]
    fn test_take_of_endless_stream() {
        let items = run_sync(DataStream::iter(1u32..).take(3).collect()).unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn test_take_while_uses_task_predicate() {
        let stream = fetched(vec![1, 2, 5, 3]).take_while(|n| echo(*n).map(|n| n < 4));
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_flat_map_flattens_in_order() {
        let stream = fetched(vec![1, 2, 3]).flat_map(|n| DataStream::iter(vec![n; n as usize]));
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![1, 2, 2, 3, 3, 3]);
    }

    #[test]
    fn test_flat_map_skips_empty_inner_streams() {
        let stream = DataStream::iter(vec![0u32, 2, 0]).flat_map(|n| fetched((0..n).collect()));
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_chain_appends() {
        let stream = fetched(vec![1, 2]).chain(DataStream::once(3));
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_zip_fetches_both_sides_in_one_step() {
        let task = fetched(vec![1, 2]).zip(fetched(vec![10, 20, 30])).collect();
        let StepState::Pending(pending) = task.step().unwrap() else {
            panic!("Expected the streams to suspend");
        };
        assert_eq!(pending.requests().len(), 2);
    }

    #[test]
    fn test_zip_ends_with_shorter_side() {
        let task = fetched(vec![1, 2]).zip(fetched(vec![10, 20, 30])).collect();
        assert_eq!(run_sync(task).unwrap(), vec![(1, 10), (2, 20)]);
    }

    #[test]
    fn test_zip_with_task() {
        let stream = fetched(vec![1, 2]).zip_with(fetched(vec![3, 4]), |a, b| echo(a + b));
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![4, 6]);
    }

    #[test]
    fn test_bind_stream() {
        let stream = echo(3).bind_stream(|n| DataStream::iter(0..n));
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_try_catch_continues_with_handler_stream() {
        let stream = failing_at(vec![1, 2, 3, 4], 3).try_catch(|error| {
            assert_eq!(error.to_string(), "bad item");
            DataStream::once(0)
        });
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_try_catch_passes_items_through() {
        let stream = fetched(vec![1, 2]).try_catch(|_| DataStream::once(0));
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_failure_propagates_without_handler() {
        let error = run_sync(failing_at(vec![1, 2], 2).collect()).unwrap_err();
        assert_eq!(error.to_string(), "bad item");
    }

    #[test]
    fn test_try_finally_runs_once_at_end() {
        let (count, on_exit) = counter();
        let stream = fetched(vec![1, 2]).try_finally(on_exit);
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![1, 2]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_finally_runs_once_when_stopped_early() {
        let (count, on_exit) = counter();
        let stream = DataStream::iter(1u32..).try_finally(on_exit).take(2);
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![1, 2]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_finally_runs_once_on_failure() {
        let (count, on_exit) = counter();
        let stream = failing_at(vec![1, 2, 3], 2).try_finally(on_exit);
        assert!(run_sync(stream.collect()).is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_finally_runs_when_dropped_unadvanced() {
        let (count, on_exit) = counter();
        drop(fetched(vec![1]).try_finally(on_exit));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
