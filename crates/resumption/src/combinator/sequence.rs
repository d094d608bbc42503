use crate::task::DataTask;

/// Run `f` for every item one after another, each task starting only once the previous
/// one has finished.
///
/// Use [`join_all`](crate::join_all) instead when the tasks may share steps.
pub fn for_each<I, F, U>(items: I, f: F) -> DataTask<()>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    F: FnMut(I::Item) -> DataTask<U> + Send + 'static,
    U: Send + 'static,
{
    let items = items.into_iter();
    DataTask::lazy(move || next_item(items, f))
}

fn next_item<It, F, U>(mut items: It, mut f: F) -> DataTask<()>
where
    It: Iterator + Send + 'static,
    F: FnMut(It::Item) -> DataTask<U> + Send + 'static,
    U: Send + 'static,
{
    match items.next() {
        Some(item) => f(item).bind(move |_| next_item(items, f)),
        None => DataTask::ready(()),
    }
}
