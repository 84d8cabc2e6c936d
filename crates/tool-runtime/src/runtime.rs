use std::sync::Arc;

use errand_core::policy::TRUNCATION_MARKER;
use errand_core::Policy;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::conversation::ConversationMessage;
use crate::provider::LlmError;
use crate::tool::{ToolCall, ToolOutcome, ToolResult};

/// Output when a run ends without a final answer.
pub const EXHAUSTED_MESSAGE: &str = "Max steps reached or timeout without a final answer.";

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("model step {step} failed: {source}")]
    ModelStep {
        step: usize,
        #[source]
        source: LlmError,
    },
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    TimedOut,
    Exhausted,
}

/// One entry of the caller-visible trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepRecord {
    #[serde(rename_all = "camelCase")]
    Model {
        index: usize,
        content: Option<String>,
        tool_calls: usize,
    },
    #[serde(rename_all = "camelCase")]
    Tool {
        index: usize,
        tool: String,
        tool_call_id: String,
        /// Untruncated outcome; only the model's copy is cut.
        result: Value,
        truncated: bool,
    },
}

impl StepRecord {
    pub fn is_model(&self) -> bool {
        matches!(self, Self::Model { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub done: bool,
    pub status: RunStatus,
    pub output: String,
    pub steps: Vec<StepRecord>,
    pub duration_ms: u64,
    /// Full transcript, for callers that want to inspect what the model saw.
    #[serde(skip)]
    pub messages: Vec<ConversationMessage>,
}

impl RunResult {
    /// Number of model turns taken.
    pub fn model_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.is_model()).count()
    }
}

/// Drives an [`Agent`] until it answers, runs out of steps, or runs out of time.
///
/// Flow per step: model turn → (tool calls → results appended → next step)
/// or final text → done. Strictly sequential; tool calls within one reply
/// run in the order the model listed them.
pub struct ControllerLoop {
    agent: Arc<Agent>,
    policy: Policy,
}

impl ControllerLoop {
    pub fn new(agent: Arc<Agent>, policy: Policy) -> Self {
        Self { agent, policy }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub async fn run(&self, goal: &str, context: Option<&str>) -> Result<RunResult, RunError> {
        let start = Instant::now();
        let mut messages = self
            .agent
            .build_initial_messages(goal, context, Policy::hints(goal));
        let mut steps = Vec::new();

        for index in 1..=self.policy.max_steps {
            debug!(step = index, messages = messages.len(), "model step");
            let reply = self
                .agent
                .step(&messages)
                .await
                .map_err(|source| RunError::ModelStep { step: index, source })?;

            steps.push(StepRecord::Model {
                index,
                content: reply.text.clone(),
                tool_calls: reply.tool_calls.len(),
            });
            messages.push(ConversationMessage::Assistant(reply.clone()));

            if !reply.tool_calls.is_empty() {
                for call in &reply.tool_calls {
                    let (message, record) = self.execute_call(index, call).await;
                    messages.push(message);
                    steps.push(record);
                }
                continue;
            }

            if let Some(text) = reply.final_text() {
                let output = text.to_string();
                return Ok(self.finish(RunStatus::Done, output, steps, messages, start));
            }

            if start.elapsed() > self.policy.overall_timeout {
                return Ok(self.finish(
                    RunStatus::TimedOut,
                    EXHAUSTED_MESSAGE.to_string(),
                    steps,
                    messages,
                    start,
                ));
            }
        }

        Ok(self.finish(
            RunStatus::Exhausted,
            EXHAUSTED_MESSAGE.to_string(),
            steps,
            messages,
            start,
        ))
    }

    async fn execute_call(&self, index: usize, call: &ToolCall) -> (ConversationMessage, StepRecord) {
        let args = call.parsed_arguments();
        let outcome = match self.agent.registry().call(&call.name, Some(args)).await {
            Ok(outcome) => outcome,
            Err(e) => ToolOutcome::failure(e.to_string()),
        };

        let full = outcome.to_value();
        let serialized = full.to_string();
        let (content, truncated) =
            truncate_for_model(&serialized, self.policy.truncation.tool_result_max_chars);

        let summary: String = serialized
            .chars()
            .take(self.policy.truncation.tool_summary_max_chars)
            .collect();
        info!(step = index, tool = %call.name, is_error = outcome.is_err(), truncated, result = %summary, "tool call");
        if let Some(code) = outcome.error_code().filter(|c| Policy::is_hard_stop(c)) {
            warn!(tool = %call.name, code, "tool reported a hard-stop condition");
        }

        let message = ConversationMessage::Tool(ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            is_error: outcome.is_err(),
        });
        let record = StepRecord::Tool {
            index,
            tool: call.name.clone(),
            tool_call_id: call.id.clone(),
            result: full,
            truncated,
        };
        (message, record)
    }

    fn finish(
        &self,
        status: RunStatus,
        output: String,
        steps: Vec<StepRecord>,
        messages: Vec<ConversationMessage>,
        start: Instant,
    ) -> RunResult {
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(?status, steps = steps.len(), duration_ms, "run finished");
        RunResult {
            done: status == RunStatus::Done,
            status,
            output,
            steps,
            duration_ms,
            messages,
        }
    }
}

/// Cut `text` to `max_chars` characters and append the truncation marker.
/// Returns the text unchanged (and `false`) when it already fits.
pub fn truncate_for_model(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (format!("{}{}", &text[..byte_index], TRUNCATION_MARKER), true),
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockLlmProvider;
    use crate::registry::ToolRegistry;
    use crate::schema::Violation;
    use crate::tool::{ToolError, ToolInput};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Deserialize, JsonSchema)]
    struct MailInput {
        #[serde(default)]
        to: String,
        #[allow(dead_code)]
        subject: Option<String>,
        #[allow(dead_code)]
        text: Option<String>,
    }

    impl ToolInput for MailInput {
        fn check(&self) -> Vec<Violation> {
            if self.to.trim().is_empty() {
                vec![Violation::at("to", "Recipient required")]
            } else {
                Vec::new()
            }
        }
    }

    #[derive(Deserialize, JsonSchema)]
    struct BlobInput {
        size: usize,
    }

    impl ToolInput for BlobInput {}

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register_fn("send_email", "Send an email.", |input: MailInput| async move {
            Ok::<_, ToolError>(ToolOutcome::ok(json!({"ok": true, "accepted": [input.to]})))
        });
        registry.register_fn("blob", "Return a large payload.", |input: BlobInput| async move {
            Ok::<_, ToolError>(ToolOutcome::ok(json!({"data": "x".repeat(input.size)})))
        });
        registry.register_fn("login", "Pretend to log in.", |_input: BlobInput| async {
            Ok::<_, ToolError>(ToolOutcome::failure("captcha_detected"))
        });
        Arc::new(registry)
    }

    fn controller(provider: Arc<MockLlmProvider>, policy: Policy) -> ControllerLoop {
        let agent = Agent::new(provider, registry(), "You are a test agent.").unwrap();
        ControllerLoop::new(Arc::new(agent), policy)
    }

    #[tokio::test]
    async fn tool_call_then_final_answer() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_tool_calls(&[(
            "call_1",
            "send_email",
            r#"{"to":"a@example.com","subject":"(No Subject)","text":"hi"}"#,
        )]);
        provider.queue_text("Done, I've sent the email.");

        let result = controller(provider.clone(), Policy::default())
            .run("send an email to a@example.com saying hi", None)
            .await
            .unwrap();

        assert!(result.done);
        assert_eq!(result.status, RunStatus::Done);
        assert_eq!(result.output, "Done, I've sent the email.");
        assert_eq!(result.model_steps(), 2);
        assert!(matches!(&result.steps[0], StepRecord::Model { index: 1, tool_calls: 1, .. }));
        assert!(matches!(&result.steps[1], StepRecord::Tool { index: 1, tool, .. } if tool == "send_email"));

        // The second request carries the tool result paired with the call id.
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].messages.last().unwrap();
        match last {
            ConversationMessage::Tool(result) => {
                assert_eq!(result.tool_call_id, "call_1");
                assert_eq!(result.name, "send_email");
                assert!(!result.is_error);
                assert!(result.content.contains("a@example.com"));
            }
            other => panic!("expected tool message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prose_with_tool_calls_does_not_end_the_run() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text_with_tool_calls(
            "Sending all three now.",
            &[
                ("call_a", "send_email", r#"{"to":"a@example.com"}"#),
                ("call_b", "launch_rocket", "{}"),
                ("call_c", "send_email", r#"{"to":"c@example.com"}"#),
            ],
        );
        provider.queue_text("All done.");

        let result = controller(provider, Policy::default())
            .run("email a and c", None)
            .await
            .unwrap();

        assert!(result.done);
        assert_eq!(result.output, "All done.");
        assert_eq!(result.model_steps(), 2);

        // [system, user, assistant, tool x3, assistant]
        assert_eq!(result.messages.len(), 7);
        let ConversationMessage::Assistant(reply) = &result.messages[2] else {
            panic!("expected assistant message, got {:?}", result.messages[2]);
        };
        assert_eq!(reply.text.as_deref(), Some("Sending all three now."));
        let emitted: Vec<&str> = reply.tool_calls.iter().map(|c| c.id.as_str()).collect();

        let answered: Vec<&str> = result.messages[3..=5]
            .iter()
            .map(|m| match m {
                ConversationMessage::Tool(r) => r.tool_call_id.as_str(),
                other => panic!("expected tool message, got {other:?}"),
            })
            .collect();
        assert_eq!(answered, emitted);
        assert_eq!(answered, vec!["call_a", "call_b", "call_c"]);

        let ConversationMessage::Tool(failed) = &result.messages[4] else {
            unreachable!()
        };
        assert!(failed.is_error);
        assert!(matches!(
            &result.messages[6],
            ConversationMessage::Assistant(last) if last.final_text() == Some("All done.")
        ));
    }

    #[tokio::test]
    async fn endless_tool_calls_exhaust_the_budget() {
        let provider = Arc::new(MockLlmProvider::new());
        for i in 0..7 {
            let id = format!("call_{i}");
            provider.queue_tool_calls(&[(id.as_str(), "send_email", r#"{"to":"a@example.com"}"#)]);
        }

        let result = controller(provider.clone(), Policy::default())
            .run("spam", None)
            .await
            .unwrap();

        assert!(!result.done);
        assert_eq!(result.status, RunStatus::Exhausted);
        assert_eq!(result.output, EXHAUSTED_MESSAGE);
        assert_eq!(result.model_steps(), 6);
        assert_eq!(provider.requests().len(), 6);
    }

    #[tokio::test]
    async fn invalid_arguments_are_fed_back_and_the_run_continues() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_tool_calls(&[("call_1", "send_email", "{}")]);
        provider.queue_text("I need a recipient.");

        let result = controller(provider.clone(), Policy::default())
            .run("send an email", None)
            .await
            .unwrap();

        assert!(result.done);
        match &result.steps[1] {
            StepRecord::Tool { result, .. } => {
                assert_eq!(result["error"], "invalid_args:send_email:to: Recipient required");
            }
            other => panic!("expected tool step, got {other:?}"),
        }
        let requests = provider.requests();
        let ConversationMessage::Tool(tool_message) = requests[1].messages.last().unwrap() else {
            panic!("expected tool message");
        };
        assert!(tool_message.is_error);
        assert!(tool_message.content.contains("to: Recipient required"));
    }

    #[tokio::test]
    async fn unknown_tool_and_malformed_arguments_become_error_results() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_tool_calls(&[
            ("call_1", "launch_rocket", "{}"),
            ("call_2", "blob", "{not json"),
        ]);
        provider.queue_text("Could not do it.");

        let result = controller(provider, Policy::default())
            .run("go", None)
            .await
            .unwrap();

        let tool_results: Vec<&Value> = result
            .steps
            .iter()
            .filter_map(|s| match s {
                StepRecord::Tool { result, .. } => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(tool_results[0]["error"], "unknown_tool:launch_rocket");
        assert_eq!(tool_results[1]["error"], "invalid_args:blob:size: is required");
    }

    #[tokio::test]
    async fn long_results_are_truncated_for_the_model_only() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_tool_calls(&[("call_1", "blob", r#"{"size":5000}"#)]);
        provider.queue_text("ok");

        let result = controller(provider.clone(), Policy::default())
            .run("fetch", None)
            .await
            .unwrap();

        match &result.steps[1] {
            StepRecord::Tool { result, truncated, .. } => {
                assert!(*truncated);
                assert_eq!(result["data"].as_str().unwrap().len(), 5000);
            }
            other => panic!("expected tool step, got {other:?}"),
        }
        let requests = provider.requests();
        let ConversationMessage::Tool(tool_message) = requests[1].messages.last().unwrap() else {
            panic!("expected tool message");
        };
        assert!(tool_message.content.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            tool_message.content.chars().count(),
            1200 + TRUNCATION_MARKER.chars().count()
        );
    }

    #[tokio::test]
    async fn hard_stop_codes_reach_the_model_as_data() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_tool_calls(&[("call_1", "login", r#"{"size":1}"#)]);
        provider.queue_text("A captcha blocked the login.");

        let result = controller(provider, Policy::default())
            .run("log in to the dashboard", None)
            .await
            .unwrap();
        assert!(result.done);
        assert!(matches!(
            &result.steps[1],
            StepRecord::Tool { result, .. } if result["error"] == "captcha_detected"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_replies_stop_once_the_clock_runs_out() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.set_latency(Duration::from_secs(10));

        let result = controller(provider.clone(), Policy::default())
            .run("think about it", None)
            .await
            .unwrap();

        // 10s, 20s, then 30s > 25s on the third empty reply.
        assert_eq!(result.status, RunStatus::TimedOut);
        assert!(!result.done);
        assert_eq!(result.output, EXHAUSTED_MESSAGE);
        assert_eq!(result.model_steps(), 3);
    }

    #[tokio::test]
    async fn empty_replies_within_budget_exhaust() {
        let provider = Arc::new(MockLlmProvider::new());
        let policy = Policy {
            max_steps: 2,
            ..Policy::default()
        };
        let result = controller(provider, policy).run("hmm", None).await.unwrap();
        assert_eq!(result.status, RunStatus::Exhausted);
        assert_eq!(result.model_steps(), 2);
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_tool_calls(&[("call_1", "send_email", r#"{"to":"a@example.com"}"#)]);
        provider.queue_error("upstream 502");

        let err = controller(provider, Policy::default())
            .run("send", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::ModelStep { step: 2, .. }));
    }

    #[test]
    fn run_result_serializes_camel_case_trace() {
        let result = RunResult {
            done: true,
            status: RunStatus::Done,
            output: "ok".into(),
            steps: vec![
                StepRecord::Model { index: 1, content: None, tool_calls: 1 },
                StepRecord::Tool {
                    index: 1,
                    tool: "vault".into(),
                    tool_call_id: "c1".into(),
                    result: json!({"ok": true}),
                    truncated: false,
                },
            ],
            duration_ms: 12,
            messages: Vec::new(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["durationMs"], 12);
        assert_eq!(value["status"], "done");
        assert_eq!(value["steps"][0]["type"], "model");
        assert_eq!(value["steps"][0]["toolCalls"], 1);
        assert_eq!(value["steps"][1]["toolCallId"], "c1");
        assert!(value.get("messages").is_none());
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_for_model("short", 10), ("short".to_string(), false));
        assert_eq!(truncate_for_model("exactly10!", 10), ("exactly10!".to_string(), false));
        let (cut, truncated) = truncate_for_model("héllo wörld", 5);
        assert!(truncated);
        assert_eq!(cut, format!("héllo{TRUNCATION_MARKER}"));
    }
}
