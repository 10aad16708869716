//! Per-source availability probes.
//!
//! A probe is a minimal search through the same fetch client the sync path
//! uses. Results are persisted on the source row and in the audit log; a
//! failing probe never disables a source.

use crate::adapters::AdapterContext;
use crate::db;
use crate::error::{Result, SyncError};
use crate::model::{
    DataSource, HealthReport, HealthStatus, HealthSummary, NewSyncLog, SyncLogStatus, SyncLogType,
};
use crate::sync::SyncEngine;
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct HealthChecker {
    engine: SyncEngine,
}

/// Outcome before it is persisted.
struct Probe {
    status: HealthStatus,
    latency_ms: i64,
    error: Option<String>,
    request_url: Option<String>,
}

impl HealthChecker {
    pub fn new(engine: SyncEngine) -> Self {
        Self { engine }
    }

    #[instrument(skip_all, fields(source_id = id))]
    pub async fn check_health(&self, id: i64) -> Result<HealthReport> {
        let source = db::get_source(self.engine.pool(), id).await?;
        self.check_source(&source).await
    }

    async fn check_source(&self, source: &DataSource) -> Result<HealthReport> {
        let probe = self.probe(source).await;
        let log_status = match (probe.status, &probe.error) {
            (HealthStatus::Healthy, None) => SyncLogStatus::Success,
            (HealthStatus::Unhealthy, _) => SyncLogStatus::Error,
            _ => SyncLogStatus::Warning,
        };
        let mut log = NewSyncLog::new(source.id, SyncLogType::HealthCheck, log_status);
        log.request_url = probe.request_url.clone();
        log.duration_ms = probe.latency_ms;
        log.error_message = probe.error.clone();
        db::record_health(
            self.engine.pool(),
            source.id,
            probe.status,
            probe.error.as_deref(),
            probe.latency_ms,
            &log,
        )
        .await?;

        match probe.status {
            HealthStatus::Healthy => info!(source = %source.name, latency_ms = probe.latency_ms, warning = ?probe.error, "probe healthy"),
            _ => warn!(source = %source.name, status = probe.status.as_str(), error = ?probe.error, "probe not healthy"),
        }
        Ok(HealthReport {
            source_id: source.id,
            source_name: source.name.clone(),
            status: probe.status,
            latency_ms: probe.latency_ms,
            error: probe.error,
        })
    }

    async fn probe(&self, source: &DataSource) -> Probe {
        let Some(adapter) = self.engine.registry().resolve(source) else {
            return Probe {
                status: HealthStatus::Unknown,
                latency_ms: 0,
                error: Some(SyncError::NoAdapter(source.name.clone()).to_string()),
                request_url: None,
            };
        };
        let started = Instant::now();
        let ctx = AdapterContext::from_source(source);
        let request_url = Some(adapter.request_url(&adapter.probe_request(), &ctx));
        let (ctx, credential_id) = match self.engine.prepare_context(adapter.as_ref(), ctx).await {
            Ok(prepared) => prepared,
            Err(err) => {
                return Probe {
                    status: HealthStatus::Unhealthy,
                    latency_ms: started.elapsed().as_millis() as i64,
                    error: Some(err.to_string()),
                    request_url,
                }
            }
        };

        let timeout = self.engine.timeout_for(source, adapter.as_ref());
        let cancel = CancellationToken::new();
        let res = self
            .engine
            .fetch()
            .run(timeout, &cancel, |_| adapter.probe(&ctx))
            .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        match res {
            Ok(fetched) => {
                let mut warnings = Vec::new();
                if fetched.attempts > 1 {
                    warnings.push(format!("succeeded after {} attempts", fetched.attempts));
                }
                if latency_ms as u64 > self.engine.settings().slow_probe_ms {
                    warnings.push(format!("slow response: {latency_ms} ms"));
                }
                Probe {
                    status: HealthStatus::Healthy,
                    latency_ms,
                    error: (!warnings.is_empty()).then(|| warnings.join("; ")),
                    request_url,
                }
            }
            Err(err) => {
                self.engine.report_credential_failure(credential_id, &err).await;
                let err = SyncError::from(err);
                Probe {
                    status: HealthStatus::Unhealthy,
                    latency_ms,
                    request_url: err.request_url().map(str::to_string).or(request_url),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Probe every enabled source with bounded parallelism.
    #[instrument(skip_all)]
    pub async fn check_all_health(&self) -> Result<HealthSummary> {
        let sources = db::list_enabled_sources(self.engine.pool()).await?;
        let parallelism = self.engine.settings().health_parallelism.max(1);
        let outcomes: Vec<Result<HealthReport>> = stream::iter(sources)
            .map(|source| async move { self.check_source(&source).await })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut reports = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            reports.push(outcome?);
        }
        reports.sort_by_key(|r| r.source_id);
        let summary = HealthSummary::from_reports(reports);
        info!(
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            unknown = summary.unknown,
            "health check-all finished"
        );
        Ok(summary)
    }
}
