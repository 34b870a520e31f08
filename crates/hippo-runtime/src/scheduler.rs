//! Periodic background maintenance of a [`Hippocampus`].
//!
//! [`spawn_scheduler`] starts one Tokio task per [`Job`].  Each task runs its
//! job immediately, then again after every interval, until the returned
//! [`SchedulerHandle`] is shut down.  A failing run is logged and retried on
//! the next tick; it never stops the loop.  The engine serializes the jobs
//! itself, so they may fire at the same moment.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hippo_memory::Hippocampus;
use hippo_types::HippoError;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A recurring maintenance operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Consolidate sampled conversation windows into memory.
    Build,
    /// Decay a sample of relations and concepts.
    Forget,
    /// Re-summarize overgrown concepts.
    Merge,
}

impl Job {
    pub const ALL: [Job; 3] = [Job::Build, Job::Forget, Job::Merge];

    fn index(self) -> usize {
        match self {
            Job::Build => 0,
            Job::Forget => 1,
            Job::Merge => 2,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Job::Build => "build",
            Job::Forget => "forget",
            Job::Merge => "merge",
        })
    }
}

fn default_build_secs() -> u64 {
    600
}

fn default_maintenance_secs() -> u64 {
    3600
}

/// Interval between runs of each job, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSchedule {
    #[serde(default = "default_build_secs")]
    pub build_interval_secs: u64,
    #[serde(default = "default_maintenance_secs")]
    pub forget_interval_secs: u64,
    #[serde(default = "default_maintenance_secs")]
    pub merge_interval_secs: u64,
}

impl Default for MaintenanceSchedule {
    fn default() -> Self {
        Self {
            build_interval_secs: default_build_secs(),
            forget_interval_secs: default_maintenance_secs(),
            merge_interval_secs: default_maintenance_secs(),
        }
    }
}

impl MaintenanceSchedule {
    /// Interval of `job`; never shorter than one second.
    pub fn interval(&self, job: Job) -> Duration {
        let secs = match job {
            Job::Build => self.build_interval_secs,
            Job::Forget => self.forget_interval_secs,
            Job::Merge => self.merge_interval_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}

#[derive(Default)]
struct JobCounters {
    runs: [AtomicUsize; 3],
    failures: [AtomicUsize; 3],
}

/// Running scheduler.  Dropping it without [`shutdown`](Self::shutdown)
/// leaves the tasks running until the runtime stops.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    counters: Arc<JobCounters>,
}

impl SchedulerHandle {
    /// Completed runs of `job`, failed ones included.
    pub fn runs(&self, job: Job) -> usize {
        self.counters.runs[job.index()].load(Ordering::Relaxed)
    }

    pub fn failures(&self, job: Job) -> usize {
        self.counters.failures[job.index()].load(Ordering::Relaxed)
    }

    /// Stop every loop and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "maintenance task ended abnormally");
            }
        }
        info!("maintenance scheduler stopped");
    }
}

/// Start the build, forget and merge loops for `engine`.
pub fn spawn_scheduler(engine: Arc<Hippocampus>, schedule: &MaintenanceSchedule) -> SchedulerHandle {
    let (shutdown, rx) = watch::channel(false);
    let counters = Arc::new(JobCounters::default());
    let tasks = Job::ALL
        .into_iter()
        .map(|job| spawn_job(engine.clone(), job, schedule.interval(job), rx.clone(), counters.clone()))
        .collect();
    info!(
        build_secs = schedule.build_interval_secs,
        forget_secs = schedule.forget_interval_secs,
        merge_secs = schedule.merge_interval_secs,
        "maintenance scheduler started"
    );
    SchedulerHandle { shutdown, tasks, counters }
}

fn spawn_job(
    engine: Arc<Hippocampus>,
    job: Job,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<JobCounters>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = run_job(&engine, job).await {
                counters.failures[job.index()].fetch_add(1, Ordering::Relaxed);
                warn!(%job, error = %err, "maintenance job failed");
            }
            counters.runs[job.index()].fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!(%job, "maintenance loop exited");
    })
}

/// Run `job` once against `engine`.
pub async fn run_job(engine: &Hippocampus, job: Job) -> Result<(), HippoError> {
    match job {
        Job::Build => {
            engine.consolidate().await?;
        }
        Job::Forget => {
            let report = engine.forget_pass().await?;
            info!(
                edges_weakened = report.edges_weakened,
                edges_removed = report.edges_removed,
                nodes_reduced = report.nodes_reduced,
                nodes_removed = report.nodes_removed,
                "forget pass finished"
            );
        }
        Job::Merge => {
            engine.merge_pass().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hippo_memory::HippocampusConfig;
    use hippo_memory::collaborator::{CollaboratorError, Summarizer, TopicExtractor};
    use hippo_memory::similarity::SimpleTokenizer;
    use hippo_memory::store::{DocumentStore, Filter, InMemoryDocumentStore, Sort, StoreError};
    use serde_json::{Map, Value};

    struct Silent;

    #[async_trait]
    impl TopicExtractor for Silent {
        async fn extract_topics(&self, _text: &str, _count: usize) -> Result<String, CollaboratorError> {
            Err(CollaboratorError::Empty)
        }
    }

    #[async_trait]
    impl Summarizer for Silent {
        async fn summarize(&self, _text: &str, _topic: &str, _span: &str) -> Result<String, CollaboratorError> {
            Err(CollaboratorError::Empty)
        }
    }

    struct OfflineStore;

    fn offline() -> StoreError {
        StoreError::InvalidDocument("store offline".into())
    }

    #[async_trait]
    impl DocumentStore for OfflineStore {
        async fn find_many(
            &self,
            _collection: &str,
            _filter: &Filter,
            _sort: Option<&Sort>,
            _limit: Option<usize>,
        ) -> Result<Vec<Value>, StoreError> {
            Err(offline())
        }

        async fn insert_one(&self, _collection: &str, _document: Value) -> Result<String, StoreError> {
            Err(offline())
        }

        async fn update_one(
            &self,
            _collection: &str,
            _filter: &Filter,
            _set_fields: Map<String, Value>,
            _upsert: bool,
        ) -> Result<bool, StoreError> {
            Err(offline())
        }

        async fn delete_one(&self, _collection: &str, _filter: &Filter) -> Result<bool, StoreError> {
            Err(offline())
        }

        async fn delete_many(&self, _collection: &str, _filter: &Filter) -> Result<usize, StoreError> {
            Err(offline())
        }
    }

    fn engine(store: Arc<dyn DocumentStore>) -> Arc<Hippocampus> {
        Arc::new(Hippocampus::new(
            store,
            Arc::new(Silent),
            Arc::new(Silent),
            Arc::new(SimpleTokenizer),
            HippocampusConfig::default(),
        ))
    }

    fn schedule(build: u64, forget: u64, merge: u64) -> MaintenanceSchedule {
        MaintenanceSchedule { build_interval_secs: build, forget_interval_secs: forget, merge_interval_secs: merge }
    }

    #[test]
    fn schedule_defaults_and_floor() {
        let s = MaintenanceSchedule::default();
        assert_eq!(s.interval(Job::Build), Duration::from_secs(600));
        assert_eq!(s.interval(Job::Merge), Duration::from_secs(3600));
        assert_eq!(schedule(0, 0, 0).interval(Job::Forget), Duration::from_secs(1));
    }

    #[test]
    fn schedule_fills_missing_fields() {
        let s: MaintenanceSchedule = serde_json::from_str(r#"{"build_interval_secs": 5}"#).unwrap();
        assert_eq!(s.build_interval_secs, 5);
        assert_eq!(s.forget_interval_secs, 3600);
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_run_at_their_intervals() {
        let handle = spawn_scheduler(engine(Arc::new(InMemoryDocumentStore::new())), &schedule(10, 20, 30));
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(handle.runs(Job::Build), 3);
        assert_eq!(handle.runs(Job::Forget), 2);
        assert_eq!(handle.runs(Job::Merge), 1);
        assert_eq!(handle.failures(Job::Build), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_and_the_loop_continues() {
        let handle = spawn_scheduler(engine(Arc::new(OfflineStore)), &schedule(10, 1000, 1000));
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert_eq!(handle.runs(Job::Build), 2);
        assert_eq!(handle.failures(Job::Build), 2);
        // nothing to decay or merge, so the store is never touched
        assert_eq!(handle.failures(Job::Forget), 0);
        assert_eq!(handle.failures(Job::Merge), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_loop() {
        let handle = spawn_scheduler(engine(Arc::new(InMemoryDocumentStore::new())), &schedule(10, 10, 10));
        tokio::task::yield_now().await;
        let counters = handle.counters.clone();
        handle.shutdown().await;

        let before = counters.runs[Job::Build.index()].load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(counters.runs[Job::Build.index()].load(Ordering::Relaxed), before);
    }
}
