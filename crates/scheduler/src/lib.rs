//! Durable alarm scheduling.
//!
//! Alarms live in a JSON-file job table ([`JobStore`]). A single
//! [`JobRunner`] owns delivery: it sweeps overdue jobs at startup, then
//! sleeps until the next due time (bounded by a poll interval) or until the
//! table changes. Delivery is at-least-once.

pub mod error;
pub mod job;
pub mod runner;
pub mod store;

pub use error::SchedulerError;
pub use job::{Channel, JobPayload, JobStatus, NewJob, ScheduledJob};
pub use runner::{AlarmEvent, JobExecutor, JobRunner, MAX_ATTEMPTS, POLL_INTERVAL, RETRY_BACKOFF};
pub use store::JobStore;
