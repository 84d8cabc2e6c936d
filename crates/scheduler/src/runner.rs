//! Alarm delivery loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::job::{Channel, JobPayload, JobStatus, ScheduledJob};
use crate::store::JobStore;

/// Upper bound on how long the runner sleeps between sweeps.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Attempts before a job whose payload keeps failing is marked failed.
pub const MAX_ATTEMPTS: u32 = 3;

/// A failed job is retried after `RETRY_BACKOFF * attempts`.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Runs a job's payload tool.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, tool: &str, args: Value) -> Result<Value, String>;
}

/// Published on the event bus whenever an alarm fires.
#[derive(Debug, Clone, Serialize)]
pub struct AlarmEvent {
    pub id: Uuid,
    pub when_iso: String,
    pub message: String,
    pub channel: Channel,
    pub payload: Option<JobPayload>,
    /// Payload tool output, when there was one.
    pub result: Option<Value>,
    pub fired_at: DateTime<Utc>,
}

pub struct JobRunner {
    store: Arc<JobStore>,
    executor: Arc<dyn JobExecutor>,
    events: broadcast::Sender<AlarmEvent>,
    poll_interval: Duration,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<dyn JobExecutor>,
        events: broadcast::Sender<AlarmEvent>,
    ) -> Self {
        Self {
            store,
            executor,
            events,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Recovery sweep, then sleep until the next due job, the poll interval
    /// or a table change, whichever comes first.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "job runner started"
        );
        let recovered = self.run_due(Utc::now()).await;
        if recovered > 0 {
            info!(fired = recovered, "recovery sweep fired overdue jobs");
        }

        loop {
            let wait = match self.store.next_due().await {
                Some(when) => (when - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(self.poll_interval),
                None => self.poll_interval,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.store.wait_for_change() => {}
            }

            self.run_due(Utc::now()).await;
        }
    }

    /// Fire every job due at `now`. Returns how many fired successfully.
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        for job in self.store.due(now).await {
            if self.fire(job).await {
                fired += 1;
            }
        }
        fired
    }

    async fn fire(&self, job: ScheduledJob) -> bool {
        let result = match &job.payload {
            Some(payload) => {
                let args = Value::Object(payload.args.clone());
                match self.executor.execute(&payload.tool, args).await {
                    Ok(value) => Some(value),
                    Err(error) => {
                        self.handle_failure(&job, &error).await;
                        return false;
                    }
                }
            }
            None => None,
        };

        let fired_at = Utc::now();
        if let Err(e) = self.store.mark_delivered(job.id, fired_at).await {
            // The payload already ran; it may run again after a restart.
            warn!(job_id = %job.id, error = %e, "failed to mark job delivered");
        }

        info!(
            job_id = %job.id,
            channel = ?job.channel,
            tool = job.payload.as_ref().map(|p| p.tool.as_str()).unwrap_or("-"),
            "alarm fired"
        );

        // No subscribers is fine.
        let _ = self.events.send(AlarmEvent {
            id: job.id,
            when_iso: job.when.to_rfc3339(),
            message: job.message,
            channel: job.channel,
            payload: job.payload,
            result,
            fired_at,
        });
        true
    }

    async fn handle_failure(&self, job: &ScheduledJob, error: &str) {
        let backoff = chrono::Duration::seconds(RETRY_BACKOFF.as_secs() as i64);
        match self
            .store
            .record_failure(job.id, error, MAX_ATTEMPTS, Utc::now(), backoff)
            .await
        {
            Ok(updated) if updated.status == JobStatus::Failed => warn!(
                job_id = %job.id,
                attempts = updated.attempts,
                error,
                "alarm payload failed permanently"
            ),
            Ok(updated) => warn!(
                job_id = %job.id,
                attempts = updated.attempts,
                retry_at = %updated.when,
                error,
                "alarm payload failed, will retry"
            ),
            Err(e) => warn!(job_id = %job.id, error = %e, "failed to record job failure"),
        }
    }
}
