//! Response cache partitioned by data source

use std::collections::HashMap;

use crate::key::Key;
use crate::response::Response;

#[derive(Debug, Default)]
struct DataSourceCache {
    responses: HashMap<Key, Response>,
}

/// Responses to idempotent requests, kept for the lifetime of an execution.
///
/// Entries are partitioned by data source so that a mutation only drops the responses
/// of the source it touched. Requests without a data source share one partition of
/// their own, which is invalidated only by mutations that have no data source either.
#[derive(Debug, Default)]
pub struct ResponseCache {
    unscoped: DataSourceCache,
    by_data_source: HashMap<Key, DataSourceCache>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the response stored for `identity` under `data_source`
    pub fn check(&self, data_source: Option<&Key>, identity: &Key) -> Option<&Response> {
        let partition = match data_source {
            None => Some(&self.unscoped),
            Some(data_source) => self.by_data_source.get(data_source),
        };
        partition.and_then(|partition| partition.responses.get(identity))
    }

    /// Store a response, replacing any previous one for the same identity
    pub fn store(&mut self, data_source: Option<&Key>, identity: Key, response: Response) {
        let partition = match data_source {
            None => &mut self.unscoped,
            Some(data_source) => self.by_data_source.entry(data_source.clone()).or_default(),
        };
        partition.responses.insert(identity, response);
    }

    /// Drop every response stored under `data_source`, returning how many were dropped
    pub fn invalidate(&mut self, data_source: Option<&Key>) -> usize {
        match data_source {
            None => {
                let dropped = self.unscoped.responses.len();
                self.unscoped.responses.clear();
                dropped
            }
            Some(data_source) => self
                .by_data_source
                .remove(data_source)
                .map_or(0, |partition| partition.responses.len()),
        }
    }

    /// Total number of cached responses
    pub fn len(&self) -> usize {
        self.unscoped.responses.len()
            + self
                .by_data_source
                .values()
                .map(|partition| partition.responses.len())
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.unscoped.responses.clear();
        self.by_data_source.clear();
    }
}
