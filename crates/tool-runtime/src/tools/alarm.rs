//! Alarm tools backed by the scheduler's job table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errand_scheduler::{Channel, JobPayload, JobStore, NewJob, SchedulerError};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::tool::{Tool, ToolError, ToolInput, ToolOutcome};

fn default_message() -> String {
    "Reminder".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScheduleAlarmInput {
    /// ISO timestamp (UTC or with offset) when the alarm should fire.
    pub when_iso: String,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default = "default_message")]
    pub message: String,
    /// Tool invocation to run when the alarm fires.
    pub payload: Option<JobPayload>,
    /// Cron expression (5 or 6 fields) to repeat the alarm after it first fires.
    pub repeat: Option<String>,
}

impl ToolInput for ScheduleAlarmInput {}

pub struct ScheduleAlarmTool {
    store: Arc<JobStore>,
}

impl ScheduleAlarmTool {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ScheduleAlarmTool {
    type Input = ScheduleAlarmInput;

    fn name(&self) -> &str {
        "schedule_alarm"
    }

    fn description(&self) -> &str {
        "Schedule and deliver a reminder, optionally running a tool payload when it fires."
    }

    async fn execute(&self, input: ScheduleAlarmInput) -> Result<ToolOutcome, ToolError> {
        let Ok(when) = DateTime::parse_from_rfc3339(input.when_iso.trim()) else {
            return Ok(ToolOutcome::failure("invalid_time"));
        };
        let when = when.with_timezone(&Utc);
        if when < Utc::now() {
            return Ok(ToolOutcome::failure("past_time"));
        }

        let new = NewJob {
            when,
            channel: input.channel,
            message: input.message,
            payload: input.payload,
            repeat: input.repeat,
        };
        let job = match self.store.create(new).await {
            Ok(job) => job,
            Err(SchedulerError::InvalidRepeat { expr, message }) => {
                return Ok(ToolOutcome::failure_with(
                    "invalid_repeat",
                    format!("{expr}: {message}"),
                ))
            }
            Err(e) => return Err(ToolError::ExecutionFailed(e.to_string())),
        };

        info!(id = %job.id, when = %job.when, channel = ?job.channel, "alarm scheduled");
        Ok(ToolOutcome::ok(json!({
            "scheduled": true,
            "id": job.id,
            "when_iso": input.when_iso,
        })))
    }
}

fn include_delivered_default() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListAlarmsInput {
    /// Also list alarms that already fired or failed.
    #[serde(default = "include_delivered_default")]
    pub include_delivered: bool,
}

impl ToolInput for ListAlarmsInput {}

pub struct ListAlarmsTool {
    store: Arc<JobStore>,
}

impl ListAlarmsTool {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ListAlarmsTool {
    type Input = ListAlarmsInput;

    fn name(&self) -> &str {
        "list_alarms"
    }

    fn description(&self) -> &str {
        "List scheduled alarms."
    }

    async fn execute(&self, input: ListAlarmsInput) -> Result<ToolOutcome, ToolError> {
        let items = self.store.list(input.include_delivered).await;
        Ok(ToolOutcome::ok(json!({ "items": items })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::Map;

    async fn store(dir: &tempfile::TempDir) -> Arc<JobStore> {
        Arc::new(JobStore::open(dir.path().join("jobs.json")).await.unwrap())
    }

    fn input(when_iso: &str) -> ScheduleAlarmInput {
        ScheduleAlarmInput {
            when_iso: when_iso.to_string(),
            channel: Channel::Desktop,
            message: default_message(),
            payload: None,
            repeat: None,
        }
    }

    #[tokio::test]
    async fn schedules_future_alarm_and_lists_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let when = (Utc::now() + Duration::hours(1)).to_rfc3339();

        let mut request = input(&when);
        request.channel = Channel::Email;
        request.payload = Some(JobPayload {
            tool: "send_email".into(),
            args: Map::from_iter([("to".to_string(), json!("a@example.com"))]),
        });
        let outcome = ScheduleAlarmTool::new(store.clone()).execute(request).await.unwrap();
        let value = outcome.to_value();
        assert_eq!(value["scheduled"], true);
        assert_eq!(value["when_iso"], when.as_str());

        let listed = ListAlarmsTool::new(store.clone())
            .execute(ListAlarmsInput { include_delivered: true })
            .await
            .unwrap()
            .to_value();
        let items = listed["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], value["id"]);
        assert_eq!(items[0]["channel"], "email");
        assert_eq!(items[0]["payload"]["tool"], "send_email");
    }

    #[tokio::test]
    async fn rejects_unparseable_and_past_times() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ScheduleAlarmTool::new(store(&dir).await);

        let outcome = tool.execute(input("tomorrow-ish")).await.unwrap();
        assert_eq!(outcome.error_code(), Some("invalid_time"));

        let outcome = tool.execute(input("2020-01-01T00:00:00Z")).await.unwrap();
        assert_eq!(outcome.error_code(), Some("past_time"));
    }

    #[tokio::test]
    async fn bad_repeat_expression_is_a_failure_code() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let mut request = input(&(Utc::now() + Duration::minutes(5)).to_rfc3339());
        request.repeat = Some("every tuesday".into());

        let outcome = ScheduleAlarmTool::new(store.clone()).execute(request).await.unwrap();
        assert_eq!(outcome.error_code(), Some("invalid_repeat"));
        assert!(store.list(true).await.is_empty());
    }
}
