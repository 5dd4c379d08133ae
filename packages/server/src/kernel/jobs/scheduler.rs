//! Polling scheduler that claims and dispatches jobs.
//!
//! The scheduler is the only claimer in the system. On each ready tick it
//! walks the registered kinds and, for every kind below its concurrency
//! limit, claims the single most urgent due job with a conditional
//! transition into Processing. Losing that race is a logged no-op, never an
//! error. A slower tick sweeps completed jobs whose `delete_at` passed.
//!
//! On startup, `recover_interrupted` converts every in-flight status left
//! over from a crash into its failed counterpart so the in-flight states
//! are never observed to survive a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::job::{JobKind, JobStatus, LogLevel, StatusPatch};
use super::processor::DeletionHandler;
use super::registry::SharedProcessorRegistry;
use super::store::JobStore;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the ready sweep runs.
    pub poll_interval: Duration,
    /// How often the deletion sweep runs.
    pub delete_interval: Duration,
    /// Max jobs of each kind allowed in Processing at once.
    pub per_kind_limits: HashMap<JobKind, usize>,
    /// How long shutdown waits for in-flight jobs before aborting them.
    pub drain_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            delete_interval: Duration::from_secs(60),
            per_kind_limits: HashMap::new(),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Kinds without an explicit limit run single-flight.
    pub fn limit_for(&self, kind: JobKind) -> usize {
        self.per_kind_limits.get(&kind).copied().unwrap_or(1)
    }
}

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    registry: SharedProcessorRegistry,
    deleter: Arc<dyn DeletionHandler>,
    config: SchedulerConfig,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: SharedProcessorRegistry,
        deleter: Arc<dyn DeletionHandler>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            deleter,
            config,
            started: AtomicBool::new(false),
        }
    }

    /// Move every job stranded in an in-flight status by a crash to its
    /// failed counterpart. Returns how many jobs were recovered.
    pub async fn recover_interrupted(&self) -> Result<usize, super::store::StoreError> {
        let mut recovered = 0;

        for job in self.store.find_in_status(JobStatus::Processing).await? {
            let msg = "run interrupted by engine restart; outcome unknown";
            self.store
                .transition(
                    job.id,
                    Some(JobStatus::Processing),
                    JobStatus::Failed,
                    StatusPatch::builder().error_msg(msg).build(),
                )
                .await?;
            self.store.append_log(job.id, LogLevel::Error, msg).await?;
            warn!(job_id = %job.id, kind = %job.kind, "recovered interrupted job as failed");
            recovered += 1;
        }

        for job in self.store.find_in_status(JobStatus::DeleteProcessing).await? {
            let msg = "deletion interrupted by engine restart; outcome unknown";
            self.store
                .transition(
                    job.id,
                    Some(JobStatus::DeleteProcessing),
                    JobStatus::DeleteFailed,
                    StatusPatch::builder().error_msg(msg).build(),
                )
                .await?;
            self.store.append_log(job.id, LogLevel::Error, msg).await?;
            warn!(job_id = %job.id, kind = %job.kind, "recovered interrupted deletion as delete_failed");
            recovered += 1;
        }

        if recovered > 0 {
            info!(count = recovered, "recovery sweep finished");
        }
        Ok(recovered)
    }

    /// One ready sweep: claim and dispatch due jobs, per-kind limits
    /// permitting. Store errors are logged and end the tick early; the
    /// next tick starts from a clean read.
    pub async fn tick_ready(&self, tasks: &mut JoinSet<()>) {
        for kind in self.registry.kinds() {
            let in_flight = match self.store.count_in_status(Some(kind), JobStatus::Processing).await {
                Ok(n) => n as usize,
                Err(e) => {
                    error!(kind = %kind, error = %e, "failed to count in-flight jobs");
                    continue;
                }
            };
            let limit = self.config.limit_for(kind);
            if in_flight >= limit {
                continue;
            }

            let ready = match self.store.find_ready(kind, Utc::now(), (limit - in_flight) as i64).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(kind = %kind, error = %e, "failed to query ready jobs");
                    continue;
                }
            };

            for job in ready {
                let claimed = self
                    .store
                    .transition(
                        job.id,
                        Some(JobStatus::Request),
                        JobStatus::Processing,
                        StatusPatch::builder().started_at(Utc::now()).build(),
                    )
                    .await;
                match claimed {
                    Ok(true) => {}
                    Ok(false) => {
                        // Someone else moved the job between the read and
                        // the claim. Walk away.
                        info!(job_id = %job.id, kind = %kind, "lost claim race, skipping");
                        continue;
                    }
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "failed to claim job");
                        continue;
                    }
                }

                if let Err(e) = self.store.append_log(job.id, LogLevel::Info, "run started").await {
                    warn!(job_id = %job.id, error = %e, "failed to append start log");
                }

                let store = Arc::clone(&self.store);
                let registry = Arc::clone(&self.registry);
                tasks.spawn(async move {
                    dispatch(store, registry, job.id, kind).await;
                });
            }
        }
    }

    /// One deletion sweep. At most one deletion runs at a time; explicit
    /// DeleteRequest jobs are claimed before `delete_at`-expired ones.
    pub async fn tick_deletions(&self, tasks: &mut JoinSet<()>) {
        let in_flight = match self.store.count_in_status(None, JobStatus::DeleteProcessing).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to count in-flight deletions");
                return;
            }
        };
        if in_flight > 0 {
            return;
        }

        let requested = match self.store.find_in_status(JobStatus::DeleteRequest).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "failed to query deletion requests");
                return;
            }
        };
        let (candidate, expected) = if let Some(job) = requested.into_iter().next() {
            (Some(job), JobStatus::DeleteRequest)
        } else {
            match self.store.find_deletable(Utc::now()).await {
                Ok(jobs) => (jobs.into_iter().next(), JobStatus::Completed),
                Err(e) => {
                    error!(error = %e, "failed to query expired completed jobs");
                    return;
                }
            }
        };
        let Some(job) = candidate else {
            return;
        };

        let claimed = self
            .store
            .transition(job.id, Some(expected), JobStatus::DeleteProcessing, StatusPatch::none())
            .await;
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                info!(job_id = %job.id, "lost deletion claim race, skipping");
                return;
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to claim deletion");
                return;
            }
        }

        let store = Arc::clone(&self.store);
        let deleter = Arc::clone(&self.deleter);
        tasks.spawn(async move {
            dispatch_deletion(store, deleter, job.id).await;
        });
    }

    /// Run the scheduler until `shutdown` is cancelled, then drain
    /// in-flight jobs for up to `drain_timeout` before aborting them.
    ///
    /// Calling `run` twice on one scheduler is a wiring bug; the second
    /// call logs and returns immediately.
    pub async fn run(&self, shutdown: CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("scheduler already started, ignoring duplicate run call");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            delete_interval_ms = self.config.delete_interval.as_millis() as u64,
            kinds = ?self.registry.kinds(),
            "scheduler started"
        );

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delete = tokio::time::interval(self.config.delete_interval);
        delete.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => self.tick_ready(&mut tasks).await,
                _ = delete.tick() => self.tick_deletions(&mut tasks).await,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "job task panicked");
                        }
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "scheduler stopping, draining in-flight jobs");
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "drain timeout reached, aborting in-flight jobs");
            tasks.abort_all();
        }
        info!("scheduler stopped");
    }
}

/// Execute one claimed job and persist the outcome. Runs on its own task;
/// store failures here can only be logged.
async fn dispatch(
    store: Arc<dyn JobStore>,
    registry: SharedProcessorRegistry,
    job_id: uuid::Uuid,
    kind: JobKind,
) {
    let job = match store.find_by_id(job_id).await {
        Ok(job) => job,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "claimed job vanished before dispatch");
            return;
        }
    };

    let Some(processor) = registry.get(kind) else {
        // Unreachable through tick_ready, which only visits registered
        // kinds, but fail the job loudly rather than strand it.
        let msg = format!("no processor registered for kind '{kind}'");
        error!(job_id = %job_id, "{msg}");
        finish_failed(&store, job_id, &msg).await;
        return;
    };

    if !processor.can_process(&job) {
        finish_failed(&store, job_id, "processor rejected job").await;
        return;
    }

    info!(job_id = %job_id, kind = %kind, "job dispatched");
    match processor.process(&job).await {
        Ok(result_msg) => {
            let moved = store
                .transition(
                    job_id,
                    Some(JobStatus::Processing),
                    JobStatus::Completed,
                    StatusPatch::builder()
                        .completed_at(Utc::now())
                        .result_msg(result_msg.clone())
                        .build(),
                )
                .await;
            if let Err(e) = moved {
                error!(job_id = %job_id, error = %e, "failed to record job completion");
                return;
            }
            if let Err(e) = store.append_log(job_id, LogLevel::Info, "run completed").await {
                warn!(job_id = %job_id, error = %e, "failed to append completion log");
            }
            info!(job_id = %job_id, kind = %kind, result = %result_msg, "job completed");
        }
        Err(err) => {
            let msg = err.to_string();
            warn!(job_id = %job_id, kind = %kind, error = %msg, "job failed");
            finish_failed(&store, job_id, &msg).await;
        }
    }
}

async fn finish_failed(store: &Arc<dyn JobStore>, job_id: uuid::Uuid, msg: &str) {
    let moved = store
        .transition(
            job_id,
            Some(JobStatus::Processing),
            JobStatus::Failed,
            StatusPatch::builder()
                .completed_at(Utc::now())
                .error_msg(msg)
                .build(),
        )
        .await;
    if let Err(e) = moved {
        error!(job_id = %job_id, error = %e, "failed to record job failure");
        return;
    }
    if let Err(e) = store.append_log(job_id, LogLevel::Error, msg).await {
        warn!(job_id = %job_id, error = %e, "failed to append failure log");
    }
}

/// Execute one claimed deletion. Success removes the job record entirely,
/// logs included.
async fn dispatch_deletion(store: Arc<dyn JobStore>, deleter: Arc<dyn DeletionHandler>, job_id: uuid::Uuid) {
    let job = match store.find_by_id(job_id).await {
        Ok(job) => job,
        Err(e) => {
            error!(job_id = %job_id, error = %e, "claimed deletion vanished before dispatch");
            return;
        }
    };

    info!(job_id = %job_id, kind = %job.kind, "deletion dispatched");
    match deleter.delete_artifact(&job).await {
        Ok(()) => match store.delete(job_id).await {
            Ok(_) => info!(job_id = %job_id, "artifact deleted, job record removed"),
            Err(e) => error!(job_id = %job_id, error = %e, "artifact deleted but record removal failed"),
        },
        Err(err) => {
            let msg = err.to_string();
            warn!(job_id = %job_id, error = %msg, "deletion failed");
            let moved = store
                .transition(
                    job_id,
                    Some(JobStatus::DeleteProcessing),
                    JobStatus::DeleteFailed,
                    StatusPatch::builder().error_msg(msg.clone()).build(),
                )
                .await;
            if let Err(e) = moved {
                error!(job_id = %job_id, error = %e, "failed to record deletion failure");
                return;
            }
            if let Err(e) = store.append_log(job_id, LogLevel::Error, &msg).await {
                warn!(job_id = %job_id, error = %e, "failed to append deletion failure log");
            }
        }
    }
}
