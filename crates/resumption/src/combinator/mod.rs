//! Combinators that compose data tasks
//!
//! Sequential composition (`map`, `bind`) lives on [`DataTask`](crate::DataTask) itself.
//! The combinators here compose tasks concurrently, so that the requests of all branches
//! end up in the same step, or intercept the way a task finishes. The transformations of
//! [`DataStream`](crate::DataStream) live here too.

mod abort;
mod apply;
mod exception;
mod sequence;
mod stream;
mod sum;

pub(crate) use abort::abort_pending;
pub use sequence::for_each;
pub use sum::{join_all, sum};
