//! Ordered writes and cache invalidation
//!
//! Postings to the same account share a sequence group, so they run one after another
//! even though they are submitted in the same step. A posting is a mutation of the
//! `ledger` data source and drops the cached balances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use resumption::{
    for_each, join_all, AsyncRequest, BoxError, DataTask, ExecutionContext, ExecutorConfig,
    MultiReporter, TaskError, TracingReporter, ZeroServiceFactory,
};

type Ledger = Arc<Mutex<HashMap<&'static str, i64>>>;

fn balance(ledger: &Ledger, account: &'static str) -> DataTask<i64> {
    let ledger = ledger.clone();
    DataTask::request(
        AsyncRequest::new(move || {
            let ledger = ledger.clone();
            async move {
                let ledger = ledger.lock().map_err(|_| "ledger poisoned")?;
                Ok::<_, BoxError>(ledger.get(account).copied().unwrap_or_default())
            }
        })
        .with_identity(format!("balance/{account}"))
        .with_data_source("ledger")
        .read_only(),
    )
}

fn post(ledger: &Ledger, account: &'static str, amount: i64) -> DataTask<()> {
    let ledger = ledger.clone();
    DataTask::request(
        AsyncRequest::new(move || {
            let ledger = ledger.clone();
            async move {
                let mut ledger = ledger.lock().map_err(|_| "ledger poisoned")?;
                let entry = ledger.entry(account).or_default();
                if *entry + amount < 0 {
                    return Err(format!("{account} would be overdrawn").into());
                }
                *entry += amount;
                Ok::<_, BoxError>(())
            }
        })
        .with_name(format!("post({account}, {amount})"))
        .with_data_source("ledger")
        .with_sequence_group(account),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let ledger = Ledger::default();
    let reporter = MultiReporter::new().with_reporter(TracingReporter::new());
    let mut context = ExecutionContext::with_config(ZeroServiceFactory, ExecutorConfig::default())
        .with_reporter(reporter);
    context.set_reporter_context("ledger");

    // Deposit then withdraw in the same step, ordered by the sequence group
    let postings = join_all(vec![
        post(&ledger, "alice", 100),
        post(&ledger, "alice", -30),
        post(&ledger, "bob", 50),
    ]);
    context.execute(postings).await?;

    let check = balance(&ledger, "alice");
    println!("alice: {}", context.execute(check).await?);

    // The overdraft fails, the handler reports it and the balance is refetched
    let overdraft = {
        let ledger = ledger.clone();
        post(&ledger, "bob", -80)
            .try_catch(|error: TaskError| {
                println!("rejected: {error}");
                DataTask::ready(())
            })
            .bind(move |()| balance(&ledger, "bob"))
    };
    println!("bob: {}", context.execute(overdraft).await?);

    // Monthly fees, one posting per step
    let fees = for_each(["alice", "bob"], {
        let ledger = ledger.clone();
        move |account| post(&ledger, account, -5)
    });
    context.execute(fees).await?;

    let totals = join_all(vec![balance(&ledger, "alice"), balance(&ledger, "bob")]);
    println!("after fees: {:?}", context.execute(totals).await?);

    let stats = context.finish()?;
    println!("{} steps, {} invalidations", stats.steps, stats.invalidations);
    Ok(())
}
