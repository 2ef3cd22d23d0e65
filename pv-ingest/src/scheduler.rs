use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::BoundedCache,
    pipeline::{PipelineError, Sink, Source},
};

/// Where the scheduler is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
    Stored,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerCfg {
    /// Cycles to run; 0 runs until cancelled.
    pub iterations: u64,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub cycles: u64,
    pub stored: u64,
    pub failed: u64,
}

/// Result of a successful cycle.
#[derive(Debug, Clone, Copy)]
pub struct StoredCycle {
    pub row_id: i64,
    pub digest: blake3::Hash,
}

/// Drives fetch → parse → store cycles.
///
/// A failed cycle is logged and counted, never fatal to the loop. The wait
/// between cycles ends early on cancellation; a cycle already under way
/// always runs to completion.
pub struct Scheduler<S, K> {
    cache: Arc<BoundedCache<S>>,
    sink: K,
    cfg: SchedulerCfg,
    state: watch::Sender<CycleState>,
}

impl<S, K> Scheduler<S, K>
where
    S: Source,
    K: Sink,
{
    pub fn new(cache: Arc<BoundedCache<S>>, sink: K, cfg: SchedulerCfg) -> Self {
        let (state, _) = watch::channel(CycleState::Idle);
        Self { cache, sink, cfg, state }
    }

    pub fn subscribe(&self) -> watch::Receiver<CycleState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    /// Run a single cycle now, always with fresh data.
    pub async fn run_cycle(&self) -> Result<StoredCycle, PipelineError> {
        self.state.send_replace(CycleState::Fetching);

        let result = async {
            let entry = self.cache.get_current_entry(true).await?;
            let row_id = self.sink.append(&entry.reading).await?;
            Ok::<_, PipelineError>(StoredCycle {
                row_id,
                digest: entry.digest,
            })
        }
        .await;

        let (state, outcome) = match &result {
            Ok(_) => (CycleState::Stored, "stored"),
            Err(_) => (CycleState::Failed, "failed"),
        };
        self.state.send_replace(state);
        metrics::counter!("pv_scheduler_cycles_total", "outcome" => outcome).increment(1);

        result
    }

    pub async fn run(&self, cancel: CancellationToken) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        let mut previous: Option<blake3::Hash> = None;

        tracing::info!(
            iterations = self.cfg.iterations,
            interval_secs = self.cfg.interval.as_secs_f64(),
            "scheduler started"
        );

        while !cancel.is_cancelled() {
            report.cycles += 1;
            let cycle = report.cycles;

            match self.run_cycle().await {
                Ok(stored) => {
                    report.stored += 1;
                    let changed = previous.map_or(true, |p| p != stored.digest);
                    if !changed {
                        metrics::counter!("pv_snapshot_unchanged_total").increment(1);
                    }
                    previous = Some(stored.digest);
                    tracing::info!(cycle, row_id = stored.row_id, changed, "cycle stored");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(cycle, kind = e.kind(), error = %e, "cycle failed");
                }
            }

            self.state.send_replace(CycleState::Idle);

            if self.cfg.iterations != 0 && cycle >= self.cfg.iterations {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(cycle, "stop requested");
                    break;
                }
                _ = tokio::time::sleep(self.cfg.interval) => {}
            }
        }

        tracing::info!(
            cycles = report.cycles,
            stored = report.stored,
            failed = report.failed,
            "scheduler finished"
        );
        report
    }
}
