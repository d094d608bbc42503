//! Assembling and running the requests of one step
//!
//! Every request a suspended task emits is registered with the [`StepContext`] before
//! anything runs. Registration consults the response cache, shares retrievals between
//! identical idempotent requests, invalidates the cache for mutations and prepares the
//! rest. The prepared retrievals then run together, except that requests of the same
//! sequence group run one after another in registration order.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use indexmap::IndexMap;
use tokio::sync::Semaphore;
use tracing::trace;

use crate::batch::Batch;
use crate::cache::ResponseCache;
use crate::context::ServiceContext;
use crate::error::TaskError;
use crate::key::Key;
use crate::reporter::{ExecutionEvent, ExecutionReporter};
use crate::request::{DataRequest, Retrieval};
use crate::response::Response;
use crate::types::{ExecutionStats, ExecutorConfig};
use crate::BoxFuture;

/// Where the response to a registered request comes from
#[derive(Clone)]
pub(crate) enum Retrieve {
    /// Known at registration: a cache hit or a failed preparation
    Ready(Response),
    /// Produced by the retrieval in this slot
    Slot(usize),
}

struct Run {
    slot: usize,
    retrieval: Retrieval,
}

struct Completed {
    response: Response,
    duration: Duration,
}

pub(crate) struct StepContext<'a> {
    step: usize,
    services: &'a ServiceContext,
    cache: &'a mut ResponseCache,
    reporter: &'a mut dyn ExecutionReporter,
    config: &'a ExecutorConfig,
    stats: &'a mut ExecutionStats,
    deduplicated: HashMap<(Option<Key>, Key), Retrieve>,
    unsequenced: Vec<Run>,
    sequenced: IndexMap<Key, Vec<Run>>,
    names: Vec<String>,
    to_cache: Vec<(Option<Key>, Key, usize)>,
    results: Arc<DashMap<usize, Completed>>,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        step: usize,
        services: &'a ServiceContext,
        cache: &'a mut ResponseCache,
        reporter: &'a mut dyn ExecutionReporter,
        config: &'a ExecutorConfig,
        stats: &'a mut ExecutionStats,
    ) -> Self {
        Self {
            step,
            services,
            cache,
            reporter,
            config,
            stats,
            deduplicated: HashMap::new(),
            unsequenced: Vec::new(),
            sequenced: IndexMap::new(),
            names: Vec::new(),
            to_cache: Vec::new(),
            results: Arc::new(DashMap::new()),
        }
    }

    fn report(&mut self, event: ExecutionEvent) {
        self.reporter.report_event(event);
    }

    /// Register a request with this step
    pub(crate) fn add_request(&mut self, request: &Arc<dyn DataRequest>) -> Retrieve {
        self.stats.requests_submitted += 1;
        let identity = match request.identity() {
            Some(identity) if request.idempotent() => identity,
            _ => return self.schedule(request),
        };
        let data_source = request.data_source();

        if self.config.enable_caching {
            let cached = self.cache.check(data_source.as_ref(), &identity).cloned();
            if let Some(response) = cached {
                self.stats.cache_hits += 1;
                let event = ExecutionEvent::RequestCached {
                    step: self.step,
                    request: request.name(),
                };
                self.report(event);
                return Retrieve::Ready(response);
            }
        }

        let key = (data_source, identity);
        if self.config.enable_deduplication {
            let existing = self.deduplicated.get(&key).cloned();
            if let Some(existing) = existing {
                self.stats.deduplicated += 1;
                let event = ExecutionEvent::RequestDeduplicated {
                    step: self.step,
                    request: request.name(),
                };
                self.report(event);
                return existing;
            }
        }

        let retrieve = self.schedule(request);
        if self.config.enable_caching {
            if let Retrieve::Slot(slot) = retrieve {
                self.to_cache.push((key.0.clone(), key.1.clone(), slot));
            }
        }
        if self.config.enable_deduplication {
            self.deduplicated.insert(key, retrieve.clone());
        }
        retrieve
    }

    /// Prepare a request for execution in this step
    fn schedule(&mut self, request: &Arc<dyn DataRequest>) -> Retrieve {
        if request.mutation() {
            let data_source = request.data_source();
            let dropped = self.cache.invalidate(data_source.as_ref());
            trace!(
                step = self.step,
                ?data_source,
                dropped,
                "mutation invalidates cached responses"
            );
            self.stats.invalidations += 1;
            let event = ExecutionEvent::CacheInvalidated {
                step: self.step,
                data_source: data_source.as_ref().map(|key| format!("{key:?}")),
            };
            self.report(event);
        }

        let retrieval = match self.prepare(request) {
            Ok(retrieval) => retrieval,
            Err(error) => {
                self.stats.prepare_failures += 1;
                let event = ExecutionEvent::RequestPrepareFailed {
                    step: self.step,
                    request: request.name(),
                    error: error.to_string(),
                };
                self.report(event);
                return Retrieve::Ready(Response::Failure(error));
            }
        };

        let slot = self.names.len();
        self.names.push(request.name());
        let event = ExecutionEvent::RequestPrepared {
            step: self.step,
            request: request.name(),
        };
        self.report(event);

        let run = Run { slot, retrieval };
        match request.sequence_group() {
            Some(group) => self.sequenced.entry(group).or_default().push(run),
            None => self.unsequenced.push(run),
        }
        Retrieve::Slot(slot)
    }

    fn prepare(&self, request: &Arc<dyn DataRequest>) -> Result<Retrieval, TaskError> {
        let prepared = if self.config.catch_request_panics {
            std::panic::catch_unwind(AssertUnwindSafe(|| request.prepare(self.services)))
                .unwrap_or_else(|panic| Err(panic_message(panic).into()))
        } else {
            request.prepare(self.services)
        };
        prepared.map_err(TaskError::from_boxed)
    }

    /// Run every prepared retrieval, returning how many ran
    pub(crate) async fn execute(&mut self) -> usize {
        let limiter = self
            .config
            .max_concurrent_requests
            .resolve()
            .map(|max| Arc::new(Semaphore::new(max)));
        let catch_panics = self.config.catch_request_panics;

        let mut runs: Vec<BoxFuture<'static, ()>> = Vec::new();
        for (group, sequence) in self.sequenced.drain(..) {
            trace!(step = self.step, ?group, requests = sequence.len(), "running sequence group");
            let sequence: Vec<_> = sequence
                .into_iter()
                .map(|run| run_retrieval(run, self.results.clone(), limiter.clone(), catch_panics))
                .collect();
            runs.push(
                async move {
                    for run in sequence {
                        run.await;
                    }
                }
                .boxed(),
            );
        }
        for run in self.unsequenced.drain(..) {
            runs.push(run_retrieval(run, self.results.clone(), limiter.clone(), catch_panics));
        }
        join_all(runs).await;

        let executed = self.names.len();
        self.stats.requests_executed += executed;
        for slot in 0..executed {
            let Some(completed) = self.results.get(&slot).map(|entry| {
                (entry.response.error().map(ToString::to_string), entry.duration)
            }) else {
                continue;
            };
            let request = self.names[slot].clone();
            let event = match completed {
                (None, duration) => ExecutionEvent::RequestCompleted {
                    step: self.step,
                    request,
                    duration,
                },
                (Some(error), duration) => {
                    self.stats.request_failures += 1;
                    ExecutionEvent::RequestFailed {
                        step: self.step,
                        request,
                        error,
                        duration,
                    }
                }
            };
            self.report(event);
        }
        executed
    }

    /// Store cacheable responses and resolve every registered request
    pub(crate) fn into_responses(self, retrievals: Batch<Retrieve>) -> Batch<Response> {
        let results = self.results;
        for (data_source, identity, slot) in self.to_cache {
            if let Some(completed) = results.get(&slot) {
                self.cache
                    .store(data_source.as_ref(), identity, completed.response.clone());
            }
        }

        retrievals.map(|retrieve| match retrieve {
            Retrieve::Ready(response) => response,
            Retrieve::Slot(slot) => results
                .get(&slot)
                .map(|completed| completed.response.clone())
                .unwrap_or_else(|| {
                    Response::Failure(TaskError::msg("request retrieval did not complete"))
                }),
        })
    }
}

fn run_retrieval(
    run: Run,
    results: Arc<DashMap<usize, Completed>>,
    limiter: Option<Arc<Semaphore>>,
    catch_panics: bool,
) -> BoxFuture<'static, ()> {
    async move {
        let _permit = match limiter {
            Some(limiter) => limiter.acquire_owned().await.ok(),
            None => None,
        };
        let started = Instant::now();
        let outcome = if catch_panics {
            AssertUnwindSafe(run.retrieval)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_message(panic).into()))
        } else {
            run.retrieval.await
        };
        let response = match outcome {
            Ok(value) => Response::Success(value),
            Err(error) => Response::Failure(TaskError::from_boxed(error)),
        };
        results.insert(
            run.slot,
            Completed {
                response,
                duration: started.elapsed(),
            },
        );
    }
    .boxed()
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic payload"));
    format!("request panicked: {detail}")
}
