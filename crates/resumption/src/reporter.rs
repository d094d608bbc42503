//! Execution event reporting
//!
//! The driver reports what happens in every step (preparation, cache hits,
//! deduplication, invalidation, completion) to an [`ExecutionReporter`]. The default
//! [`TracingReporter`] turns the events into structured `tracing` events.

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::types::ExecutionId;

/// Event types that can be reported during an execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// A task started executing
    ExecutionStarted { execution_id: ExecutionId },
    /// The requests of a pending task are about to be assembled into a step
    StepStarted { step: usize, requests: usize },
    /// A request was prepared and scheduled for retrieval
    RequestPrepared { step: usize, request: String },
    /// Preparing a request failed, its consumers observe the failure
    RequestPrepareFailed {
        step: usize,
        request: String,
        error: String,
    },
    /// A request was answered from the response cache
    RequestCached { step: usize, request: String },
    /// A request shares the retrieval of an identical request in the same step
    RequestDeduplicated { step: usize, request: String },
    /// A mutation dropped the cached responses of a data source
    CacheInvalidated {
        step: usize,
        data_source: Option<String>,
    },
    /// A retrieval completed successfully
    RequestCompleted {
        step: usize,
        request: String,
        duration: Duration,
    },
    /// A retrieval completed with a failure
    RequestFailed {
        step: usize,
        request: String,
        error: String,
        duration: Duration,
    },
    /// All retrievals of a step completed
    StepCompleted {
        step: usize,
        requests_executed: usize,
        duration: Duration,
    },
    /// A task finished executing
    ExecutionCompleted {
        execution_id: ExecutionId,
        steps: usize,
        success: bool,
        duration: Duration,
    },
}

/// Trait for reporting execution progress
pub trait ExecutionReporter: Send + Sync {
    /// Report an execution event
    fn report_event(&mut self, event: ExecutionEvent);

    /// Set context for the current execution
    fn set_context(&mut self, context: String) {
        let _ = context;
    }

    /// Called when the execution context is finished
    fn finish(&mut self) {}
}

/// A no-op reporter that discards all events
#[derive(Debug, Default)]
pub struct NoOpReporter;

impl ExecutionReporter for NoOpReporter {
    fn report_event(&mut self, _event: ExecutionEvent) {}
}

/// A reporter that emits every event through `tracing`
#[derive(Debug, Default)]
pub struct TracingReporter {
    context: Option<String>,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionReporter for TracingReporter {
    fn report_event(&mut self, event: ExecutionEvent) {
        let context = self.context.as_deref().unwrap_or_default();
        match event {
            ExecutionEvent::ExecutionStarted { execution_id } => {
                debug!(context, %execution_id, "execution started");
            }
            ExecutionEvent::StepStarted { step, requests } => {
                debug!(context, step, requests, "step started");
            }
            ExecutionEvent::RequestPrepared { step, request } => {
                trace!(context, step, %request, "prepared request");
            }
            ExecutionEvent::RequestPrepareFailed {
                step,
                request,
                error,
            } => {
                warn!(context, step, %request, %error, "failed to prepare request");
            }
            ExecutionEvent::RequestCached { step, request } => {
                trace!(context, step, %request, "request answered from cache");
            }
            ExecutionEvent::RequestDeduplicated { step, request } => {
                trace!(context, step, %request, "request deduplicated");
            }
            ExecutionEvent::CacheInvalidated { step, data_source } => {
                let data_source = data_source.as_deref().unwrap_or("<none>");
                debug!(context, step, data_source, "cache invalidated");
            }
            ExecutionEvent::RequestCompleted {
                step,
                request,
                duration,
            } => {
                trace!(context, step, %request, ?duration, "request completed");
            }
            ExecutionEvent::RequestFailed {
                step,
                request,
                error,
                duration,
            } => {
                debug!(context, step, %request, %error, ?duration, "request failed");
            }
            ExecutionEvent::StepCompleted {
                step,
                requests_executed,
                duration,
            } => {
                debug!(context, step, requests_executed, ?duration, "step completed");
            }
            ExecutionEvent::ExecutionCompleted {
                execution_id,
                steps,
                success,
                duration,
            } => {
                info!(context, %execution_id, steps, success, ?duration, "execution completed");
            }
        }
    }

    fn set_context(&mut self, context: String) {
        self.context = Some(context);
    }
}

/// A multi-reporter that broadcasts events to multiple reporters
#[derive(Default)]
pub struct MultiReporter {
    reporters: Vec<Box<dyn ExecutionReporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reporter<R: ExecutionReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }

    pub fn add_reporter<R: ExecutionReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Box::new(reporter));
    }
}

impl ExecutionReporter for MultiReporter {
    fn report_event(&mut self, event: ExecutionEvent) {
        for reporter in &mut self.reporters {
            reporter.report_event(event.clone());
        }
    }

    fn set_context(&mut self, context: String) {
        for reporter in &mut self.reporters {
            reporter.set_context(context.clone());
        }
    }

    fn finish(&mut self) {
        for reporter in &mut self.reporters {
            reporter.finish();
        }
    }
}
