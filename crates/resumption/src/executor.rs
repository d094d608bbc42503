//! Driving data tasks to completion

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, debug_span, Instrument};

use crate::cache::ResponseCache;
use crate::combinator::abort_pending;
use crate::context::ServiceContext;
use crate::error::{ServiceError, TaskResult};
use crate::reporter::{ExecutionEvent, ExecutionReporter, TracingReporter};
use crate::scheduler::StepContext;
use crate::service::ServiceFactory;
use crate::task::{DataTask, RequestsPending, StepState};
use crate::types::{ExecutionId, ExecutionStats, ExecutorConfig};

/// Everything one execution keeps between steps: configuration, services, the response
/// cache, the reporter and the running statistics.
///
/// Several tasks can be executed one after another on the same context, in which case
/// they share its cache and execution-scoped services.
pub struct ExecutionContext {
    id: ExecutionId,
    config: ExecutorConfig,
    services: ServiceContext,
    cache: ResponseCache,
    reporter: Box<dyn ExecutionReporter>,
    stats: ExecutionStats,
}

impl ExecutionContext {
    /// Create a context with the default configuration
    pub fn new(factory: impl ServiceFactory + 'static) -> Self {
        Self::with_config(factory, ExecutorConfig::default())
    }

    pub fn with_config(factory: impl ServiceFactory + 'static, config: ExecutorConfig) -> Self {
        let id = ExecutionId::new();
        debug!(execution_id = %id, ?config, "created execution context");
        Self {
            id,
            config,
            services: ServiceContext::new(Arc::new(factory)),
            cache: ResponseCache::new(),
            reporter: Box::new(TracingReporter::new()),
            stats: ExecutionStats::default(),
        }
    }

    /// Replace the reporter that receives execution events
    pub fn with_reporter(mut self, reporter: impl ExecutionReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// Label the events of this execution
    pub fn set_reporter_context(&mut self, context: impl Into<String>) {
        self.reporter.set_context(context.into());
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResponseCache {
        &mut self.cache
    }

    pub fn services(&self) -> &ServiceContext {
        &self.services
    }

    /// Run `task` until it produces a result or fails
    pub async fn execute<T: Send + 'static>(&mut self, task: DataTask<T>) -> TaskResult<T> {
        let span = debug_span!("execution", execution_id = %self.id);
        self.run(task).instrument(span).await
    }

    async fn run<T: Send + 'static>(&mut self, task: DataTask<T>) -> TaskResult<T> {
        let started = Instant::now();
        let steps_before = self.stats.steps;
        self.reporter.report_event(ExecutionEvent::ExecutionStarted {
            execution_id: self.id,
        });

        let result = self.drive(task).await;

        let duration = started.elapsed();
        self.stats.total_duration += duration;
        self.reporter.report_event(ExecutionEvent::ExecutionCompleted {
            execution_id: self.id,
            steps: self.stats.steps - steps_before,
            success: result.is_ok(),
            duration,
        });
        result
    }

    async fn drive<T: Send + 'static>(&mut self, task: DataTask<T>) -> TaskResult<T> {
        let mut task = task;
        loop {
            match task.step()? {
                StepState::Result(value) => return Ok(value),
                StepState::Pending(pending) => task = self.run_step(pending).await?,
            }
        }
    }

    /// Execute the requests of a suspended task as one step and resume it
    async fn run_step<T: Send + 'static>(
        &mut self,
        pending: RequestsPending<T>,
    ) -> TaskResult<DataTask<T>> {
        self.stats.steps += 1;
        let step = self.stats.steps;
        let started = Instant::now();
        self.reporter.report_event(ExecutionEvent::StepStarted {
            step,
            requests: pending.requests().len(),
        });

        if let Err(error) = self.services.begin_step() {
            return Err(abort_pending(pending, error.into()));
        }

        let (responses, requests_executed) = async {
            let mut context = StepContext::new(
                step,
                &self.services,
                &mut self.cache,
                &mut *self.reporter,
                &self.config,
                &mut self.stats,
            );
            let retrievals = pending
                .requests()
                .map_ref(|request| context.add_request(request));
            let executed = context.execute().await;
            (context.into_responses(retrievals), executed)
        }
        .instrument(debug_span!("step", step))
        .await;

        let disposed = self.services.end_step();
        self.reporter.report_event(ExecutionEvent::StepCompleted {
            step,
            requests_executed,
            duration: started.elapsed(),
        });

        if let Err(error) = disposed {
            return Err(abort_pending(pending, error.into()));
        }
        pending.resume(responses)
    }

    /// Dispose the remaining services and flush the reporter
    pub fn finish(mut self) -> Result<ExecutionStats, ServiceError> {
        let disposed = self.services.dispose();
        self.reporter.finish();
        debug!(execution_id = %self.id, stats = ?self.stats, "finished execution context");
        disposed.map(|()| self.stats.clone())
    }
}

/// Run `task` in a fresh execution context and dispose its services afterwards.
///
/// A disposal failure is only reported when the task itself succeeded.
pub async fn execute<T: Send + 'static>(
    task: DataTask<T>,
    factory: impl ServiceFactory + 'static,
) -> TaskResult<T> {
    let mut context = ExecutionContext::new(factory);
    let result = context.execute(task).await;
    match (result, context.finish()) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(disposal)) => Err(disposal.into()),
        (Err(error), _) => Err(error),
    }
}
