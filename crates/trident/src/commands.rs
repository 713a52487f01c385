use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use datasources::mongodb::MongoAdapter;
use datasources::neo4j::{Neo4jAdapter, Neo4jConnection};
use datasources::postgres::{PostgresAdapter, PostgresConnection};
use datasources::AdapterSet;
use pipexec::{Engine, ExecutorConfig, Plan, ResultCache};
use schemastore::{FileSchemaSource, SchemaRegistry};
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::args::{BackendArgs, Cli, Commands, RunArgs};

pub fn run(cli: Cli) -> Result<()> {
    let Cli {
        schema_file,
        cache_ttl_secs,
        backends,
        command,
        ..
    } = cli;

    let runtime = build_runtime("trident")?;
    runtime.block_on(async move {
        let engine = build_engine(&backends, &schema_file, cache_ttl_secs).await?;
        let result = match command {
            Commands::Run(args) => run_plan(&engine, args).await,
            Commands::Check => check(&engine).await,
        };
        if let Err(err) = engine.close().await {
            warn!(%err, "failed to close backend connections");
        }
        result
    })
}

async fn build_engine(
    backends: &BackendArgs,
    schema_file: &Path,
    cache_ttl_secs: u64,
) -> Result<Engine> {
    let registry = SchemaRegistry::new(Box::new(FileSchemaSource::new(schema_file)));
    let loaded = registry.load_all()?;
    if loaded.is_empty() {
        warn!(path = %schema_file.display(), "schema file has no backend sections");
    } else {
        info!(?loaded, "loaded schemas");
    }

    let mut adapters = AdapterSet::new();

    if let (Some(host), Some(user), Some(database)) =
        (&backends.pg_host, &backends.pg_user, &backends.pg_database)
    {
        let conn = PostgresConnection::Parameters {
            host: host.clone(),
            port: backends.pg_port,
            user: user.clone(),
            password: backends.pg_password.clone(),
            database: database.clone(),
        };
        adapters.insert(Arc::new(PostgresAdapter::connect(&conn).await?));
    }

    if let (Some(uri), Some(user), Some(password)) = (
        &backends.neo4j_uri,
        &backends.neo4j_user,
        &backends.neo4j_password,
    ) {
        let conn = Neo4jConnection {
            uri: uri.clone(),
            user: user.clone(),
            password: password.clone(),
            database: backends.neo4j_database.clone(),
        };
        adapters.insert(Arc::new(Neo4jAdapter::new(conn)?));
    }

    if let (Some(uri), Some(database)) = (&backends.mongo_uri, &backends.mongo_database) {
        adapters.insert(Arc::new(MongoAdapter::connect(uri, database.clone()).await?));
    }

    if adapters.is_empty() {
        return Err(anyhow!(
            "no backends configured; set at least one of the PG_*, NEO4J_* or MONGO_* options"
        ));
    }
    info!(backends = ?adapters.kinds(), "backends configured");

    Ok(Engine::new(
        Arc::new(registry),
        adapters,
        ResultCache::new(Duration::from_secs(cache_ttl_secs)),
        ExecutorConfig::default(),
    ))
}

async fn run_plan(engine: &Engine, args: RunArgs) -> Result<()> {
    let raw = match &args.plan {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let plan = Plan::from_value(&value)?;

    let cancel = CancellationToken::new();
    let signal_guard = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current stage");
            signal_guard.cancel();
        }
    });

    let output = engine.execute_with_cancellation(&plan, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn check(engine: &Engine) -> Result<()> {
    let mut failures = 0;
    for (kind, status) in engine.check_connectivity().await {
        match status {
            Ok(()) => println!("{kind}: ok"),
            Err(err) => {
                failures += 1;
                println!("{kind}: {err}");
            }
        }
    }
    if failures > 0 {
        return Err(anyhow!("{failures} backend(s) unreachable"));
    }
    Ok(())
}

fn build_runtime(thread_label: &'static str) -> Result<Runtime> {
    let runtime = Builder::new_multi_thread()
        .thread_name_fn(move || {
            static THREAD_ID: AtomicU64 = AtomicU64::new(0);
            let id = THREAD_ID.fetch_add(1, Ordering::Relaxed);
            format!("{}-thread-{}", thread_label, id)
        })
        .enable_all()
        .build()?;

    Ok(runtime)
}
