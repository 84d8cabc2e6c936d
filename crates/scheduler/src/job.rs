use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Where an alarm is surfaced when it fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Desktop,
    Push,
    Sms,
    Email,
}

/// A tool invocation executed when the alarm fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobPayload {
    /// Registered tool name.
    pub tool: String,
    /// Arguments passed to the tool.
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    /// Next fire time.
    pub when: DateTime<Utc>,
    pub channel: Channel,
    pub message: String,
    pub payload: Option<JobPayload>,
    /// Cron expression for recurring alarms.
    #[serde(default)]
    pub repeat: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.when <= now
    }

    /// Next fire time after `after` for recurring jobs.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let expr = self.repeat.as_deref()?;
        parse_cron(expr).ok()?.after(&after).next()
    }
}

/// Fields supplied when scheduling a new alarm.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub when: DateTime<Utc>,
    pub channel: Channel,
    pub message: String,
    pub payload: Option<JobPayload>,
    pub repeat: Option<String>,
}

/// Parse a cron expression, auto-prepending "0 " for 5-field expressions.
///
/// The `cron` crate requires 6 fields (sec min hr dom mon dow); alarms are
/// usually written with 5 (min hr dom mon dow).
pub fn parse_cron(expr: &str) -> Result<Schedule, SchedulerError> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidRepeat {
        expr: expr.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(repeat: Option<&str>) -> ScheduledJob {
        ScheduledJob {
            id: Uuid::new_v4(),
            when: Utc.with_ymd_and_hms(2025, 10, 15, 9, 0, 0).unwrap(),
            channel: Channel::Desktop,
            message: "Reminder".into(),
            payload: None,
            repeat: repeat.map(String::from),
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }

    #[test]
    fn five_field_cron_is_accepted() {
        assert!(parse_cron("0 9 * * *").is_ok());
        assert!(parse_cron("0 0 9 * * *").is_ok());
        assert!(parse_cron("not cron").is_err());
    }

    #[test]
    fn daily_repeat_advances_one_day() {
        let j = job(Some("0 9 * * *"));
        let next = j.next_occurrence(j.when).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 10, 16, 9, 0, 0).unwrap());
    }

    #[test]
    fn one_shot_job_has_no_next_occurrence() {
        assert!(job(None).next_occurrence(Utc::now()).is_none());
    }

    #[test]
    fn due_only_when_pending_and_past() {
        let mut j = job(None);
        let after = j.when + chrono::Duration::seconds(1);
        assert!(j.is_due(after));
        assert!(!j.is_due(j.when - chrono::Duration::seconds(1)));
        j.status = JobStatus::Delivered;
        assert!(!j.is_due(after));
    }

    #[test]
    fn channel_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Channel::Sms).unwrap(), "sms");
        let parsed: Channel = serde_json::from_value("email".into()).unwrap();
        assert_eq!(parsed, Channel::Email);
    }
}
