//! Background maintenance scheduler: periodic consolidation, index
//! compaction, and health reporting. One `tokio::spawn` per concern, each
//! driven by its own `tokio::time::interval`, coordinated through an
//! `AtomicBool` shutdown flag rather than a cancellation channel.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{info, trace, warn};

use crate::engine::{Engine, EngineStats};
use crate::error::RecallResult;

/// How often each maintenance concern runs, at minute granularity.
#[derive(Debug, Clone)]
pub struct MaintainerConfig {
    /// How often to sweep every open scope for near-duplicate consolidation.
    pub consolidation_interval: Duration,
    /// How often to compact the inverted index WAL and rebuild the vector
    /// index.
    pub compaction_interval: Duration,
    /// How often to snapshot engine stats into the health report.
    pub health_interval: Duration,
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        Self {
            consolidation_interval: Duration::minutes(10),
            compaction_interval: Duration::hours(1),
            health_interval: Duration::minutes(1),
        }
    }
}

/// A coarse running-stats accumulator, not a full HDR histogram: this
/// engine's own health endpoint only needs mean/max/count, not
/// percentile precision (see DESIGN.md).
#[derive(Debug, Clone, Default)]
struct RunningStats {
    count: u64,
    sum_ms: f64,
    max_ms: f64,
}

impl RunningStats {
    fn record(&mut self, elapsed_ms: f64) {
        self.count += 1;
        self.sum_ms += elapsed_ms;
        if elapsed_ms > self.max_ms {
            self.max_ms = elapsed_ms;
        }
    }

    fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MaintenanceStats {
    consolidation_runs: u64,
    consolidation_merged: u64,
    compaction_runs: u64,
    compaction_errors: u64,
    consolidation_latency: RunningStats,
    compaction_latency: RunningStats,
}

/// A point-in-time snapshot combining `Engine::stats()` with the
/// maintenance scheduler's own counters, returned by
/// [`Maintainer::health_report`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub engine: EngineStats,
    pub consolidation_runs: u64,
    pub consolidation_merged: u64,
    pub consolidation_mean_ms: f64,
    pub consolidation_max_ms: f64,
    pub compaction_runs: u64,
    pub compaction_errors: u64,
    pub compaction_mean_ms: f64,
    pub compaction_max_ms: f64,
}

/// Runs the periodic consolidation / compaction / health-reporting loop
/// behind `Engine`. Not wired into `recalld` by default (the `recalld`
/// binary is a minimal smoke-test server); embedders that want background
/// maintenance spawn one alongside their `Engine`.
pub struct Maintainer {
    engine: Engine,
    config: MaintainerConfig,
    shutdown: Arc<AtomicBool>,
    stats: Arc<RwLock<MaintenanceStats>>,
}

impl Maintainer {
    pub fn new(engine: Engine, config: MaintainerConfig) -> Self {
        Self {
            engine,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(MaintenanceStats::default())),
        }
    }

    /// Run every maintenance task until `stop()` is called or the process
    /// exits. Spawns one task per concern, then `tokio::select!`s on all of
    /// them so a panicking task is surfaced instead of silently dropped.
    pub async fn start(&self) {
        info!("starting maintenance scheduler");

        let consolidation = self.spawn_consolidation_task();
        let compaction = self.spawn_compaction_task();
        let health = self.spawn_health_task();

        tokio::select! {
            _ = consolidation => warn!("consolidation task exited unexpectedly"),
            _ = compaction => warn!("compaction task exited unexpectedly"),
            _ = health => warn!("health reporting task exited unexpectedly"),
        }
    }

    pub fn stop(&self) {
        info!("stopping maintenance scheduler");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn spawn_consolidation_task(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        let stats = Arc::clone(&self.stats);
        let shutdown = Arc::clone(&self.shutdown);
        let period = self.config.consolidation_interval;

        tokio::spawn(async move {
            let mut tick = interval(std::time::Duration::from_secs(period.num_seconds().max(1) as u64));
            loop {
                tick.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let start = Instant::now();
                let mut merged_total = 0usize;
                for scope in engine.open_scopes() {
                    match engine.consolidate(&scope).await {
                        Ok(summary) => merged_total += summary.merged,
                        Err(e) => warn!(error = %e, scope = %scope, "consolidation sweep failed"),
                    }
                }
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

                let mut guard = stats.write().await;
                guard.consolidation_runs += 1;
                guard.consolidation_merged += merged_total as u64;
                guard.consolidation_latency.record(elapsed_ms);
                trace!(merged = merged_total, elapsed_ms, "consolidation sweep complete");
            }
        })
    }

    fn spawn_compaction_task(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        let stats = Arc::clone(&self.stats);
        let shutdown = Arc::clone(&self.shutdown);
        let period = self.config.compaction_interval;

        tokio::spawn(async move {
            let mut tick = interval(std::time::Duration::from_secs(period.num_seconds().max(1) as u64));
            loop {
                tick.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let start = Instant::now();
                let result = engine.compact().await;
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

                let mut guard = stats.write().await;
                guard.compaction_runs += 1;
                guard.compaction_latency.record(elapsed_ms);
                if let Err(e) = result {
                    guard.compaction_errors += 1;
                    warn!(error = %e, "compaction pass failed");
                } else {
                    trace!(elapsed_ms, "compaction pass complete");
                }
            }
        })
    }

    fn spawn_health_task(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.engine.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let period = self.config.health_interval;

        tokio::spawn(async move {
            let mut tick = interval(std::time::Duration::from_secs(period.num_seconds().max(1) as u64));
            loop {
                tick.tick().await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let stats = engine.stats();
                info!(
                    total_turns = stats.total_turns,
                    scopes_open = stats.scopes_open,
                    entities = stats.entities,
                    budget_daily_pct = stats.budget_daily_usage_pct,
                    "health check"
                );
            }
        })
    }

    /// Snapshot the scheduler's own counters alongside `Engine::stats()`.
    pub async fn health_report(&self) -> RecallResult<HealthReport> {
        let stats = self.stats.read().await.clone();
        Ok(HealthReport {
            engine: self.engine.stats(),
            consolidation_runs: stats.consolidation_runs,
            consolidation_merged: stats.consolidation_merged,
            consolidation_mean_ms: stats.consolidation_latency.mean_ms(),
            consolidation_max_ms: stats.consolidation_latency.max_ms,
            compaction_runs: stats.compaction_runs,
            compaction_errors: stats.compaction_errors,
            compaction_mean_ms: stats.compaction_latency.mean_ms(),
            compaction_max_ms: stats.compaction_latency.max_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::{NewItem, Scope};

    async fn test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.data_root = dir.path().to_path_buf();
        cfg.extraction_mode = crate::config::ExtractionMode::Rules;
        (Engine::open(cfg).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn health_report_reflects_engine_stats_before_any_tick() {
        let (engine, _dir) = test_engine().await;
        engine
            .add(NewItem { content: "hello world".into(), scope: Scope::default(), ..Default::default() })
            .await
            .unwrap();

        let maintainer = Maintainer::new(engine, MaintainerConfig::default());
        let report = maintainer.health_report().await.unwrap();
        assert_eq!(report.engine.total_turns, 1);
        assert_eq!(report.consolidation_runs, 0);
        assert_eq!(report.compaction_runs, 0);
    }

    #[tokio::test]
    async fn running_stats_tracks_mean_and_max() {
        let mut stats = RunningStats::default();
        stats.record(10.0);
        stats.record(20.0);
        assert_eq!(stats.mean_ms(), 15.0);
        assert_eq!(stats.max_ms, 20.0);
    }
}
