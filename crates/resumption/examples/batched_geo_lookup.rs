//! Batched geocoding example
//!
//! Every `Geocode` request queues its city on a step-scoped `GeoBatch` service while
//! the step is assembled. The first retrieval that runs sends the whole batch in one
//! simulated round trip; the others read their answer from the shared result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use resumption::{
    join_all, sum, BoxError, DataRequest, DataTask, ExecutionContext, ExecutorConfig,
    FnServiceFactory, Key, Retrieval, ServiceContext, ServiceLifetime, TypedRequest, Value,
};
use tokio::sync::OnceCell;

#[derive(Clone, Copy, Debug)]
struct Coordinates {
    lat: f64,
    lon: f64,
}

/// Collects the cities of one step and resolves them in a single round trip
#[derive(Default)]
struct GeoBatch {
    queued: Mutex<Vec<&'static str>>,
    resolved: OnceCell<HashMap<&'static str, Coordinates>>,
}

impl GeoBatch {
    async fn lookup(&self, city: &'static str) -> Result<Coordinates, BoxError> {
        let resolved = self
            .resolved
            .get_or_init(|| async {
                let cities = self.queued.lock().map(|queued| queued.clone()).unwrap_or_default();
                println!("  geocoding service called with {cities:?}");
                tokio::time::sleep(Duration::from_millis(50)).await;
                cities
                    .into_iter()
                    .map(|city| (city, fake_coordinates(city)))
                    .collect()
            })
            .await;
        resolved
            .get(city)
            .copied()
            .ok_or_else(|| format!("unknown city {city}").into())
    }
}

fn fake_coordinates(city: &str) -> Coordinates {
    let seed = city.bytes().map(f64::from).sum::<f64>();
    Coordinates {
        lat: seed % 90.0,
        lon: seed % 180.0,
    }
}

struct Geocode(&'static str);

impl DataRequest for Geocode {
    fn identity(&self) -> Option<Key> {
        Some(Key::from(self.0))
    }

    fn data_source(&self) -> Option<Key> {
        Some(Key::from("geocoder"))
    }

    fn idempotent(&self) -> bool {
        true
    }

    fn mutation(&self) -> bool {
        false
    }

    fn name(&self) -> String {
        format!("geocode({})", self.0)
    }

    fn prepare(&self, services: &ServiceContext) -> Result<Retrieval, BoxError> {
        let batch = services.get_service::<GeoBatch>()?;
        if let Ok(mut queued) = batch.queued.lock() {
            queued.push(self.0);
        }
        let city = self.0;
        Ok(async move { batch.lookup(city).await.map(|found| Arc::new(found) as Value) }.boxed())
    }
}

impl TypedRequest for Geocode {
    type Output = Coordinates;
}

fn geocode(city: &'static str) -> DataTask<Coordinates> {
    DataTask::request(Geocode(city))
}

/// Total latitude of a route, all stops resolved in one step
fn route_latitude(stops: &[&'static str]) -> DataTask<f64> {
    sum(stops.iter().copied().map(geocode), 0.0, |total, stop| total + stop.lat)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let factory = FnServiceFactory::new()
        .with_service(ServiceLifetime::Step, |_| Ok(GeoBatch::default()));
    let config = ExecutorConfig::default().with_max_concurrent_requests(4)?;
    let mut context = ExecutionContext::with_config(factory, config);

    println!("Resolving two routes that share stops:");
    let routes = join_all(vec![
        route_latitude(&["Lyon", "Geneva", "Turin"]),
        route_latitude(&["Turin", "Milan", "Lyon"]),
    ]);
    let latitudes = context.execute(routes).await?;
    println!("  route latitudes: {latitudes:?}");

    println!("Looking up a stop again, then a new one:");
    let task = geocode("Lyon").bind(|lyon| {
        geocode("Bern").map(move |bern| (lyon.lat - bern.lat, lyon.lon - bern.lon))
    });
    let offset = context.execute(task).await?;
    println!("  offset between Lyon and Bern: {offset:?}");

    let stats = context.finish()?;
    println!(
        "{} steps, {} requests submitted, {} executed, {} saved",
        stats.steps,
        stats.requests_submitted,
        stats.requests_executed,
        stats.saved_requests()
    );
    Ok(())
}
