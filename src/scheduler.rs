//! Periodic triggers.
//!
//! Each enabled job runs on its own tokio interval and starts an independent
//! workflow on every tick. Ticks missed while a workflow is still running
//! are skipped rather than queued.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerSettings;
use crate::orchestrator::{Orchestrator, WorkflowReport};
use crate::types::text_enum;

text_enum! {
    pub enum Job {
        InventoryScan => "inventory_scan",
        EmergencyScan => "emergency_scan",
        TransferSweep => "transfer_sweep",
        RouteRefresh => "route_refresh",
        ShortagePrepare => "shortage_prepare",
    }
}

impl Job {
    pub const ALL: [Job; 5] = [
        Job::InventoryScan,
        Job::EmergencyScan,
        Job::TransferSweep,
        Job::RouteRefresh,
        Job::ShortagePrepare,
    ];

    fn interval_secs(&self, settings: &SchedulerSettings) -> Option<u64> {
        match self {
            Job::InventoryScan => settings.inventory_scan_secs,
            Job::EmergencyScan => settings.emergency_scan_secs,
            Job::TransferSweep => settings.transfer_sweep_secs,
            Job::RouteRefresh => settings.route_refresh_secs,
            Job::ShortagePrepare => settings.shortage_prepare_secs,
        }
    }

    pub async fn run(&self, orchestrator: &Orchestrator) -> WorkflowReport {
        match self {
            Job::InventoryScan => orchestrator.run_inventory_scan().await,
            Job::EmergencyScan => orchestrator.scan_emergencies().await,
            Job::TransferSweep => orchestrator.sweep_transfers().await,
            Job::RouteRefresh => orchestrator.refresh_routes().await,
            Job::ShortagePrepare => orchestrator.predict_and_prepare().await,
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    settings: SchedulerSettings,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, settings: SchedulerSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            orchestrator,
            settings,
            shutdown,
        }
    }

    /// Enabled jobs with their period. Zero intervals count as disabled.
    pub fn jobs(&self) -> Vec<(Job, Duration)> {
        if !self.settings.enabled {
            return Vec::new();
        }
        Job::ALL
            .into_iter()
            .filter_map(|job| match job.interval_secs(&self.settings) {
                Some(0) => {
                    log::warn!("[SCHEDULER] {} has a zero interval, disabled", job);
                    None
                }
                Some(secs) => Some((job, Duration::from_secs(secs))),
                None => None,
            })
            .collect()
    }

    /// Start one background loop per enabled job.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        self.jobs()
            .into_iter()
            .map(|(job, period)| {
                let orchestrator = self.orchestrator.clone();
                let mut shutdown = self.shutdown.subscribe();
                log::info!("[SCHEDULER] {} every {}s", job, period.as_secs());
                tokio::spawn(async move {
                    let mut tick = tokio::time::interval(period);
                    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    // The first tick completes immediately.
                    tick.tick().await;
                    loop {
                        tokio::select! {
                            _ = tick.tick() => {
                                let report = job.run(&orchestrator).await;
                                if report.success {
                                    log::debug!("[SCHEDULER] {}: {}", job, report.explanation);
                                } else {
                                    log::warn!("[SCHEDULER] {} failed: {}", job, report.explanation);
                                }
                            }
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    log::info!("[SCHEDULER] {} stopped", job);
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Ask every spawned loop to stop after its current run.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run every enabled job once, concurrently.
    pub async fn run_once(&self) -> Vec<(Job, WorkflowReport)> {
        let runs = self.jobs().into_iter().map(|(job, _)| {
            let orchestrator = self.orchestrator.clone();
            async move { (job, job.run(&orchestrator).await) }
        });
        join_all(runs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::testing::Fixture;

    fn scheduler(settings: SchedulerSettings) -> (Fixture, Scheduler) {
        let fx = Fixture::new();
        let orchestrator = Orchestrator::builder(fx.store.clone() as Arc<dyn Store>)
            .clock(fx.clock.clone())
            .build()
            .unwrap();
        (fx, Scheduler::new(Arc::new(orchestrator), settings))
    }

    #[test]
    fn test_default_jobs() {
        let (_fx, s) = scheduler(SchedulerSettings::default());
        let jobs: Vec<Job> = s.jobs().into_iter().map(|(j, _)| j).collect();
        assert_eq!(
            jobs,
            vec![Job::InventoryScan, Job::EmergencyScan, Job::TransferSweep, Job::RouteRefresh]
        );

        let (_fx, off) = scheduler(SchedulerSettings {
            enabled: false,
            ..SchedulerSettings::default()
        });
        assert!(off.jobs().is_empty());

        let (_fx, zero) = scheduler(SchedulerSettings {
            inventory_scan_secs: Some(0),
            ..SchedulerSettings::default()
        });
        assert_eq!(zero.jobs().len(), 3);
    }

    #[tokio::test]
    async fn test_run_once_runs_every_enabled_job() {
        let (fx, s) = scheduler(SchedulerSettings {
            shortage_prepare_secs: Some(3600),
            ..SchedulerSettings::default()
        });
        fx.hospital("City", 0.0, &[]);

        let reports = s.run_once().await;
        assert_eq!(reports.len(), 5);
        assert!(reports.iter().all(|(_, r)| r.success));
        let (job, report) = &reports[0];
        assert_eq!(*job, Job::InventoryScan);
        assert_eq!(report.outcome.action(), "inventory_scanned");
    }

    #[tokio::test]
    async fn test_spawned_loops_stop_on_shutdown() {
        let (_fx, s) = scheduler(SchedulerSettings {
            inventory_scan_secs: Some(3600),
            emergency_scan_secs: Some(3600),
            ..SchedulerSettings::default()
        });
        let handles = s.spawn();
        assert_eq!(handles.len(), 4);
        s.shutdown();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
