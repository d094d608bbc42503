//! The suspendable data task and its step protocol
//!
//! A [`DataTask`] describes a computation that needs data. Stepping it either yields the
//! final value or suspends it on a [`Batch`] of requests together with a continuation
//! that accepts the matching batch of responses.
//!
//! Monadic composition (`map`, `bind`, `lazy`) is not executed by nesting calls. It is
//! kept as data and interpreted by a loop with an explicit continuation stack, so chains
//! of any length, nested to the left or to the right, step in constant native stack.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::batch::Batch;
use crate::error::{BoxError, TaskError, TaskResult};
use crate::request::{AsyncRequest, DataRequest, TypedRequest};
use crate::response::Response;

/// The requests a suspended task is waiting for
pub type Requests = Batch<Arc<dyn DataRequest>>;

/// Continuation of a suspended task, fed with responses shaped like its [`Requests`]
pub type Resume<T> = Box<dyn FnOnce(Batch<Response>) -> TaskResult<DataTask<T>> + Send>;

type AnyValue = Box<dyn Any + Send>;
type Continuation = Box<dyn FnOnce(AnyValue) -> Node + Send>;
type ErasedStep = Box<dyn FnOnce() -> TaskResult<ErasedState> + Send>;
type ErasedResume = Box<dyn FnOnce(Batch<Response>) -> TaskResult<Node> + Send>;

enum Node {
    Ready(AnyValue),
    Failed(TaskError),
    Step(ErasedStep),
    Bind(Box<Node>, Continuation),
}

enum ErasedState {
    Result(AnyValue),
    Pending(Requests, ErasedResume),
}

/// Run `node` until it produces a value, fails or suspends
fn interpret(node: Node) -> TaskResult<ErasedState> {
    let mut node = node;
    let mut continuations: Vec<Continuation> = Vec::new();
    loop {
        node = match node {
            Node::Ready(value) => match continuations.pop() {
                Some(continuation) => continuation(value),
                None => return Ok(ErasedState::Result(value)),
            },
            Node::Failed(error) => return Err(error),
            Node::Bind(inner, continuation) => {
                continuations.push(continuation);
                *inner
            }
            Node::Step(step) => match step()? {
                ErasedState::Result(value) => Node::Ready(value),
                ErasedState::Pending(requests, resume) if continuations.is_empty() => {
                    return Ok(ErasedState::Pending(requests, resume));
                }
                ErasedState::Pending(requests, resume) => {
                    // Reattach the outstanding continuations to whatever the inner task
                    // resumes into, innermost first.
                    let resume: ErasedResume = Box::new(move |responses| {
                        let mut next = resume(responses)?;
                        while let Some(continuation) = continuations.pop() {
                            next = Node::Bind(Box::new(next), continuation);
                        }
                        Ok(next)
                    });
                    return Ok(ErasedState::Pending(requests, resume));
                }
            },
        };
    }
}

fn unerase<T: 'static>(value: AnyValue) -> T {
    match value.downcast::<T>() {
        Ok(value) => *value,
        Err(_) => unreachable!("a data task produced a value of an unexpected type"),
    }
}

/// The outcome of stepping a task
pub enum StepState<T> {
    /// The task finished with a value
    Result(T),
    /// The task is waiting for responses to its requests
    Pending(RequestsPending<T>),
}

impl<T: Send + 'static> StepState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, StepState::Pending(_))
    }

    fn erase(self) -> ErasedState {
        match self {
            StepState::Result(value) => ErasedState::Result(Box::new(value)),
            StepState::Pending(pending) => {
                let RequestsPending { requests, resume } = pending;
                ErasedState::Pending(
                    requests,
                    Box::new(move |responses| resume(responses).map(DataTask::into_node)),
                )
            }
        }
    }

    fn unerase(state: ErasedState) -> Self {
        match state {
            ErasedState::Result(value) => StepState::Result(unerase(value)),
            ErasedState::Pending(requests, resume) => StepState::Pending(RequestsPending {
                requests,
                resume: Box::new(move |responses| resume(responses).map(DataTask::from_node)),
            }),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for StepState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepState::Result(value) => f.debug_tuple("Result").field(value).finish(),
            StepState::Pending(pending) => f.debug_tuple("Pending").field(pending).finish(),
        }
    }
}

/// A batch of requests together with the continuation that consumes their responses
pub struct RequestsPending<T> {
    requests: Requests,
    resume: Resume<T>,
}

impl<T: Send + 'static> RequestsPending<T> {
    pub fn new<F>(requests: Requests, resume: F) -> Self
    where
        F: FnOnce(Batch<Response>) -> TaskResult<DataTask<T>> + Send + 'static,
    {
        Self {
            requests,
            resume: Box::new(resume),
        }
    }

    pub fn requests(&self) -> &Requests {
        &self.requests
    }

    /// Continue the task with responses shaped exactly like [`RequestsPending::requests`]
    pub fn resume(self, responses: Batch<Response>) -> TaskResult<DataTask<T>> {
        (self.resume)(responses)
    }

    pub fn into_parts(self) -> (Requests, Resume<T>) {
        (self.requests, self.resume)
    }

    /// Transform the task this one resumes into
    pub fn map<U, F>(self, f: F) -> RequestsPending<U>
    where
        U: Send + 'static,
        F: FnOnce(DataTask<T>) -> DataTask<U> + Send + 'static,
    {
        let resume = self.resume;
        RequestsPending::new(self.requests, move |responses| resume(responses).map(f))
    }
}

impl<T> fmt::Debug for RequestsPending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestsPending")
            .field("requests", &self.requests.len())
            .finish_non_exhaustive()
    }
}

/// A computation producing a `T` that may need data from requests along the way.
///
/// Tasks are inert until an [`ExecutionContext`](crate::ExecutionContext) drives them.
///
/// ```rust
/// use resumption::DataTask;
///
/// let task = DataTask::ready(20)
///     .map(|n| n + 1)
///     .bind(|n| DataTask::ready(n * 2));
/// ```
pub struct DataTask<T> {
    node: Node,
    _output: PhantomData<fn() -> T>,
}

impl<T> DataTask<T> {
    fn from_node(node: Node) -> Self {
        Self {
            node,
            _output: PhantomData,
        }
    }

    fn into_node(self) -> Node {
        self.node
    }
}

impl<T: Send + 'static> DataTask<T> {
    /// A task that is already finished
    pub fn ready(value: T) -> Self {
        Self::from_node(Node::Ready(Box::new(value)))
    }

    /// A task that fails as soon as it is stepped
    pub fn fail(error: impl Into<TaskError>) -> Self {
        Self::from_node(Node::Failed(error.into()))
    }

    /// A task defined directly by its step function
    pub fn from_step<F>(step: F) -> Self
    where
        F: FnOnce() -> TaskResult<StepState<T>> + Send + 'static,
    {
        Self::from_node(Node::Step(Box::new(move || step().map(StepState::erase))))
    }

    /// Defer building a task until it is first stepped
    pub fn lazy<F>(f: F) -> Self
    where
        F: FnOnce() -> DataTask<T> + Send + 'static,
    {
        DataTask::ready(()).bind(move |()| f())
    }

    /// Defer building a task that may fail to build
    pub fn try_lazy<F>(f: F) -> Self
    where
        F: FnOnce() -> TaskResult<DataTask<T>> + Send + 'static,
    {
        DataTask::lazy(move || f().unwrap_or_else(DataTask::fail))
    }

    /// Advance the task until it finishes, fails, or needs responses
    pub fn step(self) -> TaskResult<StepState<T>> {
        interpret(self.node).map(StepState::unerase)
    }

    pub fn map<U, F>(self, f: F) -> DataTask<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.chain(move |value| Node::Ready(Box::new(f(value))))
    }

    pub fn try_map<U, F>(self, f: F) -> DataTask<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> TaskResult<U> + Send + 'static,
    {
        self.chain(move |value| match f(value) {
            Ok(value) => Node::Ready(Box::new(value)),
            Err(error) => Node::Failed(error),
        })
    }

    /// Continue with the task built from this task's result
    pub fn bind<U, F>(self, f: F) -> DataTask<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> DataTask<U> + Send + 'static,
    {
        self.chain(move |value| f(value).node)
    }

    /// Run `next` after this task, discarding this task's result
    pub fn then<U: Send + 'static>(self, next: DataTask<U>) -> DataTask<U> {
        self.bind(move |_| next)
    }

    fn chain<U, F>(self, continuation: F) -> DataTask<U>
    where
        F: FnOnce(T) -> Node + Send + 'static,
    {
        DataTask::from_node(Node::Bind(
            Box::new(self.node),
            Box::new(move |value| continuation(unerase(value))),
        ))
    }
}

impl<T: Clone + Send + Sync + 'static> DataTask<T> {
    /// A task that issues one request and finishes with its value
    pub fn request<R>(request: R) -> Self
    where
        R: TypedRequest<Output = T>,
    {
        Self::from_shared_request(Arc::new(request))
    }

    /// Like [`DataTask::request`] for a request that is already shared
    pub fn from_shared_request(request: Arc<dyn DataRequest>) -> Self {
        DataTask::<Response>::request_response_shared(request)
            .try_map(|response| response.value::<T>())
    }

    /// A task running an async closure as an opaque request
    pub fn from_future<F, Fut, E>(run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::request(AsyncRequest::new(run))
    }
}

impl DataTask<Response> {
    /// A task that issues one request and finishes with its raw response.
    ///
    /// Unlike [`DataTask::request`], a failed retrieval does not fail the task.
    pub fn request_response<R: DataRequest>(request: R) -> Self {
        Self::request_response_shared(Arc::new(request))
    }

    pub fn request_response_shared(request: Arc<dyn DataRequest>) -> Self {
        DataTask::from_step(move || {
            Ok(StepState::Pending(RequestsPending::new(
                Batch::Leaf(request),
                |responses| responses.into_leaf().map(DataTask::ready),
            )))
        })
    }
}

impl<T> fmt::Debug for DataTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.node {
            Node::Ready(_) => "ready",
            Node::Failed(_) => "failed",
            Node::Step(_) => "step",
            Node::Bind(..) => "bind",
        };
        f.debug_tuple("DataTask").field(&state).finish()
    }
}
