//! Demo runner: submits a catalog import job and polls it to completion.
//!
//! Stores are selected by `USE_PERSISTENT_STORES` / `DATABASE_URL`; the
//! number of rows to import is the first CLI argument (default 250).

mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;

use forgebatch_core::JobId;
use forgebatch_infra::{
    EngineConfig, InMemoryQueueStore, InMemorySnapshotStore, JobCoordinator, JobSnapshotStore,
    PostgresQueueStore, PostgresSnapshotStore, QueueStore,
};
use forgebatch_jobs::{JobSpec, OperationSpec};

/// Upper bound on polls, so a handler that stops advancing cannot spin forever.
const MAX_POLLS: usize = 100_000;

fn main() -> Result<()> {
    forgebatch_observability::init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let rows = match std::env::args().nth(1) {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("row count must be a number, got '{raw}'"))?,
        None => 250,
    };

    let registry = Arc::new(handlers::registry()?);

    if config.use_persistent_stores {
        let database_url = config
            .database_url
            .clone()
            .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;

        // The coordinator is synchronous; the Postgres stores drive their
        // queries on this runtime from the main thread.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        let pool = runtime
            .block_on(PgPool::connect(&database_url))
            .context("failed to connect to Postgres")?;

        let queues = PostgresQueueStore::new(pool.clone()).with_runtime(runtime.handle().clone());
        let snapshots = PostgresSnapshotStore::new(pool).with_runtime(runtime.handle().clone());
        runtime.block_on(queues.ensure_schema())?;
        runtime.block_on(snapshots.ensure_schema())?;

        tracing::info!("using Postgres stores");
        run(JobCoordinator::with_config(queues, snapshots, registry, config), rows)
    } else {
        tracing::info!("using in-memory stores");
        run(
            JobCoordinator::with_config(
                InMemoryQueueStore::new(),
                InMemorySnapshotStore::new(),
                registry,
                config,
            ),
            rows,
        )
    }
}

fn run<Q, S>(coordinator: JobCoordinator<Q, S>, rows: usize) -> Result<()>
where
    Q: QueueStore,
    S: JobSnapshotStore,
{
    let items = (0..rows)
        .map(|i| {
            if i % 50 == 49 {
                format!("invalid-{i}")
            } else {
                format!("SKU-{i:05};Product {i};{}.99", 5 + i % 40)
            }
        })
        .collect();

    let spec = JobSpec::new("Catalog import")
        .with_id(JobId::new("demo-catalog-import")?)
        .with_operation(OperationSpec::new(handlers::IMPORT_ROWS).with_items(items))
        .with_operation(OperationSpec::new(handlers::REINDEX).with_size(rows as u64))
        .with_operation(OperationSpec::new(handlers::NOTIFY));

    let job = coordinator.submit(spec)?;
    tracing::info!(job_id = %job.id, total = job.total, "polling job");

    for _ in 0..MAX_POLLS {
        let report = coordinator
            .process(&job.id)?
            .context("job disappeared while polling")?;

        tracing::info!(
            progress = report.progress,
            done = report.done,
            errors = report.errors,
            message = %report.message,
            "poll"
        );

        if report.finish {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
    }

    anyhow::bail!("job {} did not finish after {MAX_POLLS} polls", job.id)
}
