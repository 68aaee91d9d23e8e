//! Poll scheduler
//!
//! Drives the ingestion coordinator on a fixed interval and serves
//! on-demand refresh triggers. All cycle execution, timer ticks and
//! manual triggers alike, serializes on a single-flight gate: a
//! trigger that arrives while a cycle is in flight waits for it to
//! finish, then runs its own fresh cycle and returns that cycle's
//! report. Cycles never overlap.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tracing::info;

use crate::coordinator::{Coordinator, CycleReport};
use crate::error::Result;
use crate::store::SourceCount;

/// What a synchronous refresh hands back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub report: CycleReport,
    /// Stored row counts per source after the cycle.
    pub totals: Vec<SourceCount>,
}

/// Periodic driver around the coordinator
pub struct PollScheduler {
    coordinator: Arc<Coordinator>,
    poll_interval: Duration,
    /// Single-flight gate over cycle execution.
    cycle_gate: Mutex<()>,
    last_report: RwLock<Option<CycleReport>>,
}

impl PollScheduler {
    pub fn new(coordinator: Arc<Coordinator>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            poll_interval,
            cycle_gate: Mutex::new(()),
            last_report: RwLock::new(None),
        })
    }

    /// Runs the scheduler until shutdown. The interval's first tick
    /// completes immediately, so one cycle runs at process start before
    /// the periodic cadence begins.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Scheduler started"
        );

        let mut ticker = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_guarded_cycle().await?;
                }
                _ = shutdown.recv() => {
                    info!("Scheduler stopped");
                    return Ok(());
                }
            }
        }
    }

    /// Synchronously runs one fresh cycle and returns its report plus
    /// the per-source row counts afterwards. Waits for any in-flight
    /// cycle before starting its own.
    pub async fn trigger_refresh_now(&self) -> Result<RefreshSummary> {
        let report = self.run_guarded_cycle().await?;
        let totals = self.coordinator.store().count_by_source().await?;
        Ok(RefreshSummary { report, totals })
    }

    /// Report of the most recently completed cycle, if any
    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    async fn run_guarded_cycle(&self) -> Result<CycleReport> {
        let _gate = self.cycle_gate.lock().await;
        let report = self.coordinator.run_cycle().await?;
        *self.last_report.write() = Some(report.clone());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{RawItem, Source};
    use crate::sources::{FetchOutcome, PollSource};
    use crate::store::Store;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_test::assert_ok;

    /// Slow source that records fetch overlap and counts invocations
    struct SlowSource {
        fetches: AtomicUsize,
        in_flight: AtomicBool,
        overlapped: AtomicBool,
    }

    impl SlowSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                in_flight: AtomicBool::new(false),
                overlapped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl PollSource for SlowSource {
        fn id(&self) -> &str {
            "slow"
        }

        async fn fetch(&self) -> FetchOutcome {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.store(false, Ordering::SeqCst);

            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            FetchOutcome {
                items: vec![RawItem {
                    source: Source::ForumPost,
                    native_id: format!("cycle{n}"),
                    title: None,
                    body: None,
                    url: None,
                    author: None,
                    score: 0,
                    origin_channel: None,
                    permalink: None,
                    metrics: None,
                    created_at: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                }],
                failures: vec![],
                skipped: false,
            }
        }
    }

    async fn scheduler_with(source: Arc<SlowSource>) -> Arc<PollScheduler> {
        let store = Store::in_memory().await.unwrap();
        let coordinator = Arc::new(Coordinator::new(vec![source], store));
        PollScheduler::new(coordinator, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_refresh_returns_report_and_totals() {
        let source = SlowSource::new();
        let scheduler = scheduler_with(source).await;

        let summary = assert_ok!(scheduler.trigger_refresh_now().await);
        assert_eq!(summary.report.total_inserted(), 1);
        assert_eq!(summary.totals.len(), 1);
        assert_eq!(summary.totals[0].count, 1);
        assert!(scheduler.last_report().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_are_single_flight() {
        let source = SlowSource::new();
        let scheduler = scheduler_with(source.clone()).await;

        let a = scheduler.clone();
        let b = scheduler.clone();
        let (ra, rb) = tokio::join!(a.trigger_refresh_now(), b.trigger_refresh_now());

        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        // Each trigger ran its own fresh cycle, one after the other.
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert!(!source.overlapped.load(Ordering::SeqCst));
        assert_ne!(ra.report.cycle_id, rb.report.cycle_id);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = SlowSource::new();
        let scheduler = scheduler_with(source.clone()).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let handle = tokio::spawn(scheduler.clone().run(shutdown_rx));

        // Give the startup cycle time to complete.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        handle.await.unwrap().unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert!(scheduler.last_report().is_some());
    }
}
