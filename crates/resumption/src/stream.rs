//! Sequences of values produced by data tasks
//!
//! A [`DataStream`] yields its items one at a time, and fetching each item is a
//! [`DataTask`]. Advancing a stream therefore takes part in step batching like any
//! other task: two streams zipped together fetch their next items in the same step.
//!
//! Streams are persistent. [`DataStream::next`] consumes the stream and hands back the
//! rest alongside the item, so a consumer that stops early simply drops the rest.
//! Cleanup registered with [`DataStream::try_finally`] runs at that point.

use std::fmt;

use crate::task::DataTask;

/// The outcome of advancing a stream: an item and the rest of the stream, or the end
pub type Advance<T> = Option<(T, DataStream<T>)>;

type AdvanceFn<T> = Box<dyn FnOnce() -> DataTask<Advance<T>> + Send>;

/// A lazily produced sequence whose items are fetched by data tasks.
///
/// ```rust
/// use resumption::DataStream;
///
/// let evens = DataStream::iter(1..)
///     .filter(|n: &u32| n % 2 == 0)
///     .take(3)
///     .collect();
/// ```
pub struct DataStream<T> {
    advance: AdvanceFn<T>,
}

impl<T: Send + 'static> DataStream<T> {
    /// A stream defined by the task that fetches its first item
    pub fn from_fn<F>(advance: F) -> Self
    where
        F: FnOnce() -> DataTask<Advance<T>> + Send + 'static,
    {
        Self {
            advance: Box::new(advance),
        }
    }

    pub fn empty() -> Self {
        Self::from_fn(|| DataTask::ready(None))
    }

    /// A stream of exactly one item
    pub fn once(value: T) -> Self {
        Self::from_fn(move || DataTask::ready(Some((value, DataStream::empty()))))
    }

    /// A stream of the items of an iterator, pulled as the stream is advanced
    pub fn iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_items(items.into_iter())
    }

    fn from_items<It>(mut items: It) -> Self
    where
        It: Iterator<Item = T> + Send + 'static,
    {
        Self::from_fn(move || {
            let advance = items.next().map(|value| (value, DataStream::from_items(items)));
            DataTask::ready(advance)
        })
    }

    /// A stream of the single item `task` finishes with
    pub fn from_task(task: DataTask<T>) -> Self {
        Self::from_fn(move || task.map(|value| Some((value, DataStream::empty()))))
    }

    /// Defer building a stream until it is first advanced
    pub fn lazy<F>(f: F) -> Self
    where
        F: FnOnce() -> DataStream<T> + Send + 'static,
    {
        Self::from_fn(move || f().next())
    }

    /// Fetch the next item, handing back the rest of the stream with it
    pub fn next(self) -> DataTask<Advance<T>> {
        DataTask::lazy(self.advance)
    }

    /// Run `f` for every item in order, each task starting once the previous one finished
    pub fn for_each<F, U>(self, f: F) -> DataTask<()>
    where
        F: FnMut(T) -> DataTask<U> + Send + 'static,
        U: Send + 'static,
    {
        for_each_rest(self, f)
    }

    /// Combine every item into an accumulator
    pub fn fold<S, F>(self, initial: S, f: F) -> DataTask<S>
    where
        S: Send + 'static,
        F: FnMut(S, T) -> S + Send + 'static,
    {
        fold_rest(self, initial, f)
    }

    pub fn collect(self) -> DataTask<Vec<T>> {
        self.fold(Vec::new(), |mut items, item| {
            items.push(item);
            items
        })
    }
}

fn for_each_rest<T, F, U>(stream: DataStream<T>, mut f: F) -> DataTask<()>
where
    T: Send + 'static,
    F: FnMut(T) -> DataTask<U> + Send + 'static,
    U: Send + 'static,
{
    stream.next().bind(move |advance| match advance {
        Some((item, rest)) => f(item).bind(move |_| for_each_rest(rest, f)),
        None => DataTask::ready(()),
    })
}

fn fold_rest<T, S, F>(stream: DataStream<T>, state: S, mut f: F) -> DataTask<S>
where
    T: Send + 'static,
    S: Send + 'static,
    F: FnMut(S, T) -> S + Send + 'static,
{
    stream.next().bind(move |advance| match advance {
        Some((item, rest)) => {
            let state = f(state, item);
            fold_rest(rest, state, f)
        }
        None => DataTask::ready(state),
    })
}

impl<T> fmt::Debug for DataStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::task::StepState;
    use crate::test_support::{echo, run_sync};

    fn fetched(values: Vec<u32>) -> DataStream<u32> {
        DataStream::iter(values).and_then(echo)
    }

    #[test]
    fn test_iter_yields_items_in_order() {
        let items = run_sync(DataStream::iter(vec![3u32, 1, 2]).collect()).unwrap();
        assert_eq!(items, vec![3, 1, 2]);
    }

    #[test]
    fn test_empty_and_once() {
        assert!(run_sync(DataStream::<u32>::empty().collect()).unwrap().is_empty());
        assert_eq!(run_sync(DataStream::once(7u32).collect()).unwrap(), vec![7]);
    }

    #[test]
    fn test_next_hands_back_the_rest() {
        let task = DataStream::iter(vec![1u32, 2]).next().bind(|advance| match advance {
            Some((first, rest)) => rest.collect().map(move |rest| (first, rest)),
            None => DataTask::fail(crate::error::TaskError::msg("stream ended early")),
        });
        assert_eq!(run_sync(task).unwrap(), (1, vec![2]));
    }

    #[test]
    fn test_from_task_yields_its_result() {
        let items = run_sync(DataStream::from_task(echo(9)).collect()).unwrap();
        assert_eq!(items, vec![9]);
    }

    #[test]
    fn test_item_waits_for_its_request() {
        let task = DataStream::from_task(echo(1)).collect();
        let StepState::Pending(pending) = task.step().unwrap() else {
            panic!("Expected the stream to wait for its request");
        };
        assert_eq!(pending.requests().len(), 1);
    }

    #[test]
    fn test_lazy_defers_construction() {
        let built = Arc::new(Mutex::new(false));
        let flag = built.clone();
        let stream = DataStream::lazy(move || {
            *flag.lock().unwrap() = true;
            DataStream::once(1u32)
        });
        assert!(!*built.lock().unwrap());
        assert_eq!(run_sync(stream.collect()).unwrap(), vec![1]);
        assert!(*built.lock().unwrap());
    }

    #[test]
    fn test_fold_accumulates() {
        let total = run_sync(fetched(vec![1, 2, 3, 4]).fold(0, |total, n| total + n)).unwrap();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_for_each_runs_tasks_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let task = DataStream::iter(vec![2u32, 5, 1]).for_each(move |n| {
            let recorded = recorded.clone();
            echo(n).map(move |n| recorded.lock().unwrap().push(n))
        });
        run_sync(task).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2, 5, 1]);
    }

    #[test]
    fn test_long_streams_do_not_recurse() {
        let total = DataStream::iter(0..10_000u64).fold(0, |total, n| total + n);
        assert!(matches!(task_result(total), Some(49_995_000)));
    }

    fn task_result<T: Send + 'static>(task: DataTask<T>) -> Option<T> {
        match task.step() {
            Ok(StepState::Result(value)) => Some(value),
            _ => None,
        }
    }
}
