use anyhow::{bail, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use embodied_sync::adapters::{http::build_client, AdapterRegistry};
use embodied_sync::config;
use embodied_sync::db;
use embodied_sync::health::HealthChecker;
use embodied_sync::model::{KeywordScope, SyncLogStatus, SyncOverrides, SyncResult};
use embodied_sync::sync::SyncEngine;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one round of syncs or health checks and exit (for cron-style triggers)"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Sync only the named source instead of every enabled one
    #[arg(long)]
    source: Option<String>,

    /// Run the keyword-driven flow against the named source
    #[arg(long, conflicts_with = "source")]
    keywords: Option<String>,

    /// Keyword subscriptions to include: all, admin or user
    #[arg(long, default_value = "all")]
    scope: String,

    /// Probe every enabled source instead of syncing
    #[arg(long)]
    health: bool,

    /// Delete audit log entries older than app.log_retention_days
    #[arg(long)]
    prune_logs: bool,
}

fn failed_entirely(res: &SyncResult) -> bool {
    res.status == SyncLogStatus::Error
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    db::seed_sources(&pool, &cfg.sources).await?;

    let registry = Arc::new(AdapterRegistry::with_defaults(build_client()?));
    let engine = SyncEngine::new(pool.clone(), registry, cfg.sync.clone());

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing current upserts");
            ctrl_c_token.cancel();
        }
    });

    if args.prune_logs {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(cfg.app.log_retention_days));
        let removed = db::prune_sync_logs(&pool, cutoff).await?;
        info!(removed, retention_days = cfg.app.log_retention_days, "pruned sync logs");
    }

    if args.health {
        let summary = HealthChecker::new(engine.clone()).check_all_health().await?;
        for r in &summary.results {
            info!(source = %r.source_name, status = r.status.as_str(), latency_ms = r.latency_ms, error = ?r.error, "health");
        }
        return Ok(());
    }

    let mut failures = 0usize;
    if let Some(name) = args.keywords.as_deref() {
        let Some(scope) = KeywordScope::parse(&args.scope) else {
            bail!("unknown keyword scope '{}'", args.scope);
        };
        let res = engine
            .sync_by_keywords(
                name,
                scope,
                cfg.sync.default_since_days,
                cfg.sync.default_max_results,
                cancel,
            )
            .await?;
        info!(source = %res.source_name, synced = res.synced, errors = res.errors, keywords = ?res.keywords, "keyword sync finished");
        if failed_entirely(&res) {
            failures += 1;
        }
    } else if let Some(name) = args.source.as_deref() {
        let Some(source) = db::find_source_by_name(&pool, name).await? else {
            bail!("no data source named '{name}'");
        };
        let res = engine
            .sync_source(source.id, SyncOverrides::default(), cancel)
            .await?;
        info!(source = %res.source_name, synced = res.synced, errors = res.errors, "sync finished");
        if failed_entirely(&res) {
            failures += 1;
        }
    } else if !args.prune_logs {
        for (name, res) in engine.sync_all_enabled(cancel).await? {
            match res {
                Ok(r) if failed_entirely(&r) => {
                    warn!(source = %name, error = ?r.error_message, "sync failed");
                    failures += 1;
                }
                Ok(r) => info!(source = %name, synced = r.synced, errors = r.errors, "sync finished"),
                Err(err) => {
                    error!(source = %name, error = %err, "sync failed");
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        bail!("{failures} sync run(s) failed");
    }
    Ok(())
}
