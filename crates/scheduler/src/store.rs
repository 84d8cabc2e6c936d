//! JSON-file job table.
//!
//! The whole table is kept in memory behind a lock and rewritten
//! (write-to-temp then rename) on every mutation. A mutation only takes
//! effect in memory once the new table is on disk. Mutations wake the
//! runner through a [`Notify`] so newly scheduled near-term alarms are
//! picked up without waiting for the next poll.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::job::{parse_cron, JobStatus, NewJob, ScheduledJob};

pub struct JobStore {
    path: PathBuf,
    jobs: RwLock<Vec<ScheduledJob>>,
    changed: Notify,
}

impl JobStore {
    /// Open the table at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SchedulerError> {
        let path = path.into();
        let jobs: Vec<ScheduledJob> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), jobs = jobs.len(), "job table loaded");
        Ok(Self {
            path,
            jobs: RwLock::new(jobs),
            changed: Notify::new(),
        })
    }

    pub async fn create(&self, new: NewJob) -> Result<ScheduledJob, SchedulerError> {
        if let Some(expr) = &new.repeat {
            parse_cron(expr)?;
        }
        let job = ScheduledJob {
            id: Uuid::new_v4(),
            when: new.when,
            channel: new.channel,
            message: new.message,
            payload: new.payload,
            repeat: new.repeat,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            delivered_at: None,
        };

        let mut jobs = self.jobs.write().await;
        let mut next = jobs.clone();
        next.push(job.clone());
        self.persist(&next).await?;
        *jobs = next;
        drop(jobs);

        debug!(id = %job.id, when = %job.when, "job scheduled");
        self.changed.notify_one();
        Ok(job)
    }

    /// All jobs ordered by fire time; delivered and failed ones only on request.
    pub async fn list(&self, include_finished: bool) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| include_finished || j.status == JobStatus::Pending)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.when);
        jobs
    }

    /// Pending jobs whose fire time is at or before `now`, oldest first.
    pub async fn due(&self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        let mut due: Vec<ScheduledJob> = self
            .jobs
            .read()
            .await
            .iter()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|j| j.when);
        due
    }

    /// Earliest fire time among pending jobs.
    pub async fn next_due(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .read()
            .await
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.when)
            .min()
    }

    /// Record a successful fire. Recurring jobs are moved to their next
    /// occurrence and stay pending; one-shot jobs become delivered.
    pub async fn mark_delivered(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ScheduledJob, SchedulerError> {
        self.update(id, |job| {
            job.delivered_at = Some(at);
            job.attempts = 0;
            job.last_error = None;
            match job.next_occurrence(job.when.max(at)) {
                Some(next) => job.when = next,
                None => job.status = JobStatus::Delivered,
            }
        })
        .await
    }

    /// Record a failed attempt. The job is retried at `now + backoff * attempts`
    /// and marked failed once `max_attempts` is reached.
    pub async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
        backoff: chrono::Duration,
    ) -> Result<ScheduledJob, SchedulerError> {
        self.update(id, |job| {
            job.attempts += 1;
            job.last_error = Some(error.to_string());
            if job.attempts >= max_attempts {
                job.status = JobStatus::Failed;
            } else {
                job.when = now + backoff * job.attempts as i32;
            }
        })
        .await
    }

    /// Resolves after the next mutation (or immediately if one happened
    /// since the last wait).
    pub async fn wait_for_change(&self) {
        self.changed.notified().await;
    }

    async fn update(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut ScheduledJob),
    ) -> Result<ScheduledJob, SchedulerError> {
        let mut jobs = self.jobs.write().await;
        let mut next = jobs.clone();
        let job = next
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(SchedulerError::NotFound(id))?;
        apply(job);
        let updated = job.clone();
        self.persist(&next).await?;
        *jobs = next;
        Ok(updated)
    }

    async fn persist(&self, jobs: &[ScheduledJob]) -> Result<(), SchedulerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(jobs)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Channel, JobPayload};
    use chrono::Duration;
    use serde_json::Map;

    fn new_job(when: DateTime<Utc>) -> NewJob {
        NewJob {
            when,
            channel: Channel::Desktop,
            message: "Stand up".into(),
            payload: None,
            repeat: None,
        }
    }

    #[tokio::test]
    async fn create_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.json");
        let when = Utc::now() + Duration::minutes(5);

        let store = JobStore::open(&path).await.unwrap();
        let created = store
            .create(NewJob {
                payload: Some(JobPayload { tool: "send_email".into(), args: Map::new() }),
                ..new_job(when)
            })
            .await
            .unwrap();

        let reopened = JobStore::open(&path).await.unwrap();
        let loaded = reopened.list(true).await.remove(0);
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.message, "Stand up");
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.payload.unwrap().tool, "send_email");
    }

    #[tokio::test]
    async fn due_and_next_due_only_consider_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).await.unwrap();
        let now = Utc::now();

        let past = store.create(new_job(now - Duration::minutes(1))).await.unwrap();
        let future = store.create(new_job(now + Duration::hours(1))).await.unwrap();

        let due = store.due(now).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, past.id);
        assert_eq!(store.next_due().await, Some(past.when));

        store.mark_delivered(past.id, now).await.unwrap();
        assert!(store.due(now).await.is_empty());
        assert_eq!(store.next_due().await, Some(future.when));
        assert_eq!(store.list(false).await.len(), 1);
        assert_eq!(store.list(true).await.len(), 2);
    }

    #[tokio::test]
    async fn failures_back_off_then_exhaust() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).await.unwrap();
        let now = Utc::now();
        let backoff = Duration::seconds(30);
        let job = store.create(new_job(now)).await.unwrap();

        let after_one = store.record_failure(job.id, "smtp down", 3, now, backoff).await.unwrap();
        assert_eq!(after_one.status, JobStatus::Pending);
        assert_eq!(after_one.when, now + Duration::seconds(30));
        assert!(store.due(now).await.is_empty());

        let after_two = store.record_failure(job.id, "smtp down", 3, now, backoff).await.unwrap();
        assert_eq!(after_two.when, now + Duration::seconds(60));

        let after_three = store.record_failure(job.id, "smtp down", 3, now, backoff).await.unwrap();
        assert_eq!(after_three.status, JobStatus::Failed);
        assert_eq!(after_three.last_error.as_deref(), Some("smtp down"));
    }

    #[tokio::test]
    async fn failed_write_leaves_table_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = JobStore::open(&path).await.unwrap();
        let kept = store.create(new_job(Utc::now())).await.unwrap();

        // A directory where the temp file goes makes every write fail.
        std::fs::create_dir(dir.path().join("jobs.json.tmp")).unwrap();

        assert!(store.create(new_job(Utc::now())).await.is_err());
        assert!(store.mark_delivered(kept.id, Utc::now()).await.is_err());

        let jobs = store.list(true).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(JobStore::open(&path).await.unwrap().list(true).await.len(), 1);
    }

    #[tokio::test]
    async fn recurring_job_moves_to_next_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).await.unwrap();
        let when = Utc::now() - Duration::minutes(1);
        let job = store
            .create(NewJob { repeat: Some("*/5 * * * *".into()), ..new_job(when) })
            .await
            .unwrap();

        let updated = store.mark_delivered(job.id, Utc::now()).await.unwrap();
        assert_eq!(updated.status, JobStatus::Pending);
        assert!(updated.when > Utc::now());
        assert!(updated.delivered_at.is_some());
    }

    #[tokio::test]
    async fn invalid_repeat_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).await.unwrap();
        let err = store
            .create(NewJob { repeat: Some("every tuesday".into()), ..new_job(Utc::now()) })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRepeat { .. }));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).await.unwrap();
        let err = store.mark_delivered(Uuid::new_v4(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JobStore::open(&path).await,
            Err(SchedulerError::Corrupt(_))
        ));
    }
}
