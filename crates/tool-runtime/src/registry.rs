use crate::schema::{summarize, InputSchema, SchemaExportError, Violation};
use crate::tool::{Tool, ToolDefinition, ToolError, ToolInput, ToolOutcome};
use async_trait::async_trait;
use errand_scheduler::JobExecutor;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a registry call did not reach (or did not return from) a handler.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("unknown_tool:{0}")]
    UnknownTool(String),
    #[error("invalid_args:{tool}:{summary}")]
    InvalidArguments {
        tool: String,
        summary: String,
        violations: Vec<Violation>,
    },
    #[error("{source}")]
    Handler {
        tool: String,
        #[source]
        source: ToolError,
    },
}

enum InvokeError {
    Invalid(Vec<Violation>),
    Failed(ToolError),
}

/// Type-erased handler: decodes already-validated arguments and runs the tool.
#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn invoke(&self, args: Value) -> Result<ToolOutcome, InvokeError>;

    /// Refinement violations for arguments that already failed structural
    /// validation.
    fn refine(&self, _args: &Value, _structural: &[Violation]) -> Vec<Violation> {
        Vec::new()
    }
}

fn decode<I: ToolInput>(args: Value) -> Result<I, InvokeError> {
    let input: I =
        serde_json::from_value(args).map_err(|e| InvokeError::Invalid(vec![Violation::root(e.to_string())]))?;
    let violations = input.check();
    if violations.is_empty() {
        Ok(input)
    } else {
        Err(InvokeError::Invalid(violations))
    }
}

/// Best effort: top-level fields named by a structural violation are dropped
/// so the rest can still be decoded and checked. Paths already reported are
/// not repeated.
fn refine_as<I: ToolInput>(args: &Value, structural: &[Violation]) -> Vec<Violation> {
    let mut pruned = args.clone();
    if let Value::Object(map) = &mut pruned {
        for violation in structural {
            if let Some(field) = violation.path.split('.').next().filter(|f| !f.is_empty()) {
                map.remove(field);
            }
        }
    }
    match serde_json::from_value::<I>(pruned) {
        Ok(input) => input
            .check()
            .into_iter()
            .filter(|v| !structural.iter().any(|s| s.path == v.path))
            .collect(),
        Err(_) => Vec::new(),
    }
}

struct TraitHandler<T>(T);

#[async_trait]
impl<T: Tool> ErasedHandler for TraitHandler<T> {
    async fn invoke(&self, args: Value) -> Result<ToolOutcome, InvokeError> {
        let input = decode::<T::Input>(args)?;
        self.0.execute(input).await.map_err(InvokeError::Failed)
    }

    fn refine(&self, args: &Value, structural: &[Violation]) -> Vec<Violation> {
        refine_as::<T::Input>(args, structural)
    }
}

struct FnHandler<I, F> {
    f: F,
    _input: PhantomData<fn() -> I>,
}

#[async_trait]
impl<I, F, Fut> ErasedHandler for FnHandler<I, F>
where
    I: ToolInput,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutcome, ToolError>> + Send + 'static,
{
    async fn invoke(&self, args: Value) -> Result<ToolOutcome, InvokeError> {
        let input = decode::<I>(args)?;
        (self.f)(input).await.map_err(InvokeError::Failed)
    }

    fn refine(&self, args: &Value, structural: &[Violation]) -> Vec<Violation> {
        refine_as::<I>(args, structural)
    }
}

type RawFn = dyn Fn(Value) -> BoxFuture<'static, Result<ToolOutcome, ToolError>> + Send + Sync;

struct RawHandler(Arc<RawFn>);

#[async_trait]
impl ErasedHandler for RawHandler {
    async fn invoke(&self, args: Value) -> Result<ToolOutcome, InvokeError> {
        (self.0)(args).await.map_err(InvokeError::Failed)
    }
}

/// A registered tool: name, description, native schema and handler.
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: InputSchema,
    handler: Arc<dyn ErasedHandler>,
}

/// Manages available tools, their schemas, and dispatch.
///
/// Built once at startup and shared behind an `Arc`; calls take `&self`.
/// Registration order is preserved in the exported tool list.
pub struct ToolRegistry {
    tools: IndexMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// Register a tool implementation. Re-registering a name replaces the earlier tool.
    pub fn register<T: Tool>(&mut self, tool: T) {
        let spec = ToolSpec {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            schema: InputSchema::of::<T::Input>(),
            handler: Arc::new(TraitHandler(tool)),
        };
        self.insert(spec);
    }

    /// Register a closure over a typed input.
    pub fn register_fn<I, F, Fut>(&mut self, name: &str, description: &str, f: F)
    where
        I: ToolInput,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome, ToolError>> + Send + 'static,
    {
        self.insert(ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            schema: InputSchema::of::<I>(),
            handler: Arc::new(FnHandler {
                f,
                _input: PhantomData,
            }),
        });
    }

    /// Register a handler over raw JSON with a hand-written schema. The
    /// handler receives arguments that passed structural validation.
    /// The schema's shape is only checked at export time.
    pub fn register_raw<F, Fut>(&mut self, name: &str, description: &str, schema: Value, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome, ToolError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let raw: Arc<RawFn> = Arc::new(move |args| -> BoxFuture<'static, Result<ToolOutcome, ToolError>> {
            let f = f.clone();
            Box::pin(async move { f(args).await })
        });
        self.insert(ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            schema: InputSchema::from_value(schema),
            handler: Arc::new(RawHandler(raw)),
        });
    }

    fn insert(&mut self, spec: ToolSpec) {
        if self.tools.contains_key(&spec.name) {
            warn!(tool = %spec.name, "replacing previously registered tool");
        } else {
            debug!(tool = %spec.name, "tool registered");
        }
        self.tools.insert(spec.name.clone(), spec);
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `args` (absent or null means `{}`) and run the named tool.
    ///
    /// Every schema violation is reported, not just the first.
    pub async fn call(&self, name: &str, args: Option<Value>) -> Result<ToolOutcome, CallError> {
        let spec = self
            .tools
            .get(name)
            .ok_or_else(|| CallError::UnknownTool(name.to_string()))?;

        let args = match args {
            None | Some(Value::Null) => json!({}),
            Some(v) => v,
        };

        let mut violations = spec.schema.validate(&args);
        if !violations.is_empty() {
            let refinements = spec.handler.refine(&args, &violations);
            violations.extend(refinements);
            return Err(invalid(name, violations));
        }

        match spec.handler.invoke(args).await {
            Ok(outcome) => Ok(outcome),
            Err(InvokeError::Invalid(violations)) => Err(invalid(name, violations)),
            Err(InvokeError::Failed(source)) => Err(CallError::Handler {
                tool: name.to_string(),
                source,
            }),
        }
    }

    /// Model-facing definitions for every tool, in registration order.
    ///
    /// Fails if any schema cannot be expressed as a self-contained object schema.
    pub fn export_for_model(&self) -> Result<Vec<ToolDefinition>, SchemaExportError> {
        self.tools
            .values()
            .map(|spec| {
                Ok(ToolDefinition {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    input_schema: spec.schema.export(&spec.name)?,
                })
            })
            .collect()
    }
}

fn invalid(tool: &str, violations: Vec<Violation>) -> CallError {
    CallError::InvalidArguments {
        tool: tool.to_string(),
        summary: summarize(&violations),
        violations,
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduled alarms run their payload through the same registry the agent uses.
#[async_trait]
impl JobExecutor for ToolRegistry {
    async fn execute(&self, tool: &str, args: Value) -> Result<Value, String> {
        match self.call(tool, Some(args)).await {
            Ok(ToolOutcome::Ok(value)) => Ok(value),
            Ok(ToolOutcome::Err(failure)) => Err(failure.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct EchoInput {
        message: String,
        #[serde(default = "default_times")]
        times: u32,
    }

    fn default_times() -> u32 {
        1
    }

    impl ToolInput for EchoInput {
        fn check(&self) -> Vec<Violation> {
            if self.message.trim().is_empty() {
                vec![Violation::at("message", "must not be blank")]
            } else {
                Vec::new()
            }
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes back the input message."
        }

        async fn execute(&self, input: EchoInput) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::ok(json!({ "echo": input.message.repeat(input.times as usize) })))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry
    }

    #[tokio::test]
    async fn call_passes_decoded_input_with_defaults() {
        let outcome = registry().call("echo", Some(json!({"message": "hi"}))).await.unwrap();
        assert_eq!(outcome.to_value(), json!({"echo": "hi"}));

        let outcome = registry()
            .call("echo", Some(json!({"message": "ab", "times": 2})))
            .await
            .unwrap();
        assert_eq!(outcome.to_value(), json!({"echo": "abab"}));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_by_name() {
        let err = registry().call("send_fax", None).await.unwrap_err();
        assert!(matches!(err, CallError::UnknownTool(_)));
        assert_eq!(err.to_string(), "unknown_tool:send_fax");
    }

    #[tokio::test]
    async fn absent_args_validate_as_empty_object() {
        let err = registry().call("echo", None).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid_args:echo:message: is required");
    }

    #[tokio::test]
    async fn all_violations_are_summarized() {
        let err = registry()
            .call("echo", Some(json!({"times": "twice"})))
            .await
            .unwrap_err();
        match err {
            CallError::InvalidArguments { tool, summary, violations } => {
                assert_eq!(tool, "echo");
                assert_eq!(violations.len(), 2);
                assert!(summary.contains("message: is required"), "{summary}");
                assert!(summary.contains("times: expected integer, received string"), "{summary}");
                assert!(summary.contains("; "), "{summary}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn refinement_violations_are_invalid_arguments() {
        let err = registry()
            .call("echo", Some(json!({"message": "   "})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid_args:echo:message: must not be blank");
    }

    #[tokio::test]
    async fn refinements_are_reported_alongside_structural_violations() {
        let err = registry()
            .call("echo", Some(json!({"message": " ", "times": "twice"})))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid_args:echo:times: expected integer, received string; message: must not be blank"
        );
    }

    #[tokio::test]
    async fn send_email_reports_every_field_at_once() {
        use crate::tools::testing::RecordingMailer;
        use crate::tools::{EmailGuard, SendEmailTool};
        use errand_core::Policy;

        let mut registry = ToolRegistry::new();
        registry.register(SendEmailTool::new(
            Arc::new(RecordingMailer::default()),
            Arc::new(EmailGuard::new(Policy::default().email)),
        ));

        let err = registry.call("send_email", Some(json!({"cc": "x"}))).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid_args:send_email:cc: expected array, received string; to: Recipient required"
        );

        let err = registry
            .call("send_email", Some(json!({"subject": 5, "cc": ["nope"]})))
            .await
            .unwrap_err();
        let CallError::InvalidArguments { violations, .. } = err else {
            panic!("expected invalid arguments");
        };
        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["subject", "to", "cc.0"]);
    }

    #[tokio::test]
    async fn handler_failure_is_surfaced() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("explode", "Always fails.", |_input: EchoInput| async {
            Err::<ToolOutcome, _>(ToolError::ExecutionFailed("kaboom".into()))
        });
        let err = registry
            .call("explode", Some(json!({"message": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Handler { .. }));
        assert_eq!(err.to_string(), "Execution failed: kaboom");
    }

    #[tokio::test]
    async fn re_registration_overwrites() {
        let mut registry = registry();
        registry.register_fn("echo", "Replacement.", |input: EchoInput| async move {
            Ok::<_, ToolError>(ToolOutcome::ok(json!({ "shout": input.message.to_uppercase() })))
        });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().description, "Replacement.");
        let outcome = registry.call("echo", Some(json!({"message": "hey"}))).await.unwrap();
        assert_eq!(outcome.to_value(), json!({"shout": "HEY"}));
    }

    #[test]
    fn export_wraps_each_tool() {
        let defs = registry().export_for_model().unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].input_schema["type"], "object");
        assert_eq!(defs[0].input_schema["required"], json!(["message"]));
    }

    #[tokio::test]
    async fn scalar_schema_registers_but_fails_export() {
        let mut registry = registry();
        registry.register_raw("scalar", "Bad schema.", json!({"type": "string"}), |_args| async {
            Ok::<_, ToolError>(ToolOutcome::ok(json!(null)))
        });
        assert!(registry.has("scalar"));
        let err = registry.export_for_model().unwrap_err();
        assert!(matches!(err, SchemaExportError::NotAnObject { .. }));
    }

    #[tokio::test]
    async fn raw_handler_receives_validated_args() {
        let mut registry = ToolRegistry::new();
        registry.register_raw(
            "sum",
            "Adds two numbers.",
            json!({
                "type": "object",
                "properties": { "a": {"type": "number"}, "b": {"type": "number"} },
                "required": ["a", "b"]
            }),
            |args: Value| async move {
                let a = args["a"].as_f64().unwrap_or_default();
                let b = args["b"].as_f64().unwrap_or_default();
                Ok::<_, ToolError>(ToolOutcome::ok(json!({ "sum": a + b })))
            },
        );
        let outcome = registry.call("sum", Some(json!({"a": 1, "b": 2.5}))).await.unwrap();
        assert_eq!(outcome.to_value(), json!({"sum": 3.5}));
        let err = registry.call("sum", Some(json!({"a": 1}))).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid_args:sum:b: is required");
    }

    #[tokio::test]
    async fn registry_executes_scheduled_payloads() {
        let registry = registry();
        let value = JobExecutor::execute(&registry, "echo", json!({"message": "ping"}))
            .await
            .unwrap();
        assert_eq!(value, json!({"echo": "ping"}));
        let err = JobExecutor::execute(&registry, "nope", json!({})).await.unwrap_err();
        assert_eq!(err, "unknown_tool:nope");
    }
}
