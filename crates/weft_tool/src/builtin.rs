//! Builtin tools.
//!
//! Small general-purpose tools for running plans from the command line and
//! exercising the engine: `echo`, `concat`, `sleep` and `fail`.

use crate::registry::ToolRegistry;
use crate::tool::{Tool, ToolCall, ToolOutput};
use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Registry holding every builtin tool
#[must_use]
pub fn registry() -> ToolRegistry {
    tools().into_iter().collect()
}

/// Every builtin tool
#[must_use]
pub fn tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(EchoTool),
        Arc::new(ConcatTool),
        Arc::new(SleepTool),
        Arc::new(FailTool),
    ]
}

fn parse_params<T: DeserializeOwned + Default>(params: &Value) -> anyhow::Result<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).context("invalid params")
}

/// Returns its params, or the whole context slice when params are null
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "returns params, or the step's context slice when params are null"
    }

    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
        let value = if call.params.is_null() {
            Value::Object(call.context.into_inner().into_iter().collect::<Map<_, _>>())
        } else {
            call.params
        };
        Ok(ToolOutput::new(value))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConcatParams {
    parts: Option<Vec<Value>>,
    separator: String,
}

/// Joins strings: the `parts` param if given, otherwise every context value
pub struct ConcatTool;

#[async_trait]
impl Tool for ConcatTool {
    fn name(&self) -> &str {
        "concat"
    }

    fn description(&self) -> &str {
        "joins `parts` (or the step's context values) with `separator`"
    }

    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
        let params: ConcatParams = parse_params(&call.params)?;
        let values: Vec<Value> = match params.parts {
            Some(parts) => parts,
            None => call.context.iter().map(|(_, v)| v.clone()).collect(),
        };

        let joined = values
            .iter()
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(&params.separator);
        Ok(ToolOutput::new(Value::String(joined)))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SleepParams {
    ms: u64,
    ticks: u32,
    ignore_cancel: bool,
}

/// Waits `ms` milliseconds, reporting progress `ticks` times
///
/// Returns early with an error when cancelled, unless `ignoreCancel` is
/// set.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "waits `ms` milliseconds, reporting progress `ticks` times"
    }

    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
        let params: SleepParams = parse_params(&call.params)?;
        let slices = params.ticks.max(1);
        let slice = Duration::from_millis(params.ms) / slices;

        for done in 1..=slices {
            if params.ignore_cancel {
                tokio::time::sleep(slice).await;
            } else {
                tokio::select! {
                    () = call.cancel.cancelled() => {
                        anyhow::bail!("sleep interrupted after {} of {} slices", done - 1, slices);
                    }
                    () = tokio::time::sleep(slice) => {}
                }
            }
            if params.ticks > 0 {
                call.progress.report_fraction(u64::from(done), u64::from(slices));
            }
        }

        Ok(ToolOutput::new(json!({ "sleptMs": params.ms })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FailParams {
    message: String,
}

impl Default for FailParams {
    fn default() -> Self {
        Self {
            message: "requested failure".to_string(),
        }
    }
}

/// Always fails with `message`
pub struct FailTool;

#[async_trait]
impl Tool for FailTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "always fails with `message`"
    }

    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
        let params: FailParams = parse_params(&call.params)?;
        Err(anyhow::anyhow!(params.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::ProgressReporter;
    use tokio::sync::mpsc;
    use weft_context::ContextSlice;
    use weft_core::StepId;

    fn call(params: Value) -> ToolCall {
        ToolCall::new("p", "s", params)
    }

    fn context() -> ContextSlice {
        [
            ("greeting".to_string(), json!("hello")),
            ("name".to_string(), json!("world")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_builtin_registry() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["echo", "concat", "sleep", "fail"]);
        assert!(registry.iter().all(|tool| !tool.description().is_empty()));
    }

    #[tokio::test]
    async fn test_echo_params() {
        let output = EchoTool.execute(call(json!({"a": 1}))).await.unwrap();
        assert_eq!(output.value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_echo_context() {
        let output = EchoTool
            .execute(call(Value::Null).with_context(context()))
            .await
            .unwrap();
        assert_eq!(output.value, json!({"greeting": "hello", "name": "world"}));
    }

    #[tokio::test]
    async fn test_concat_context() {
        let output = ConcatTool
            .execute(call(json!({"separator": ", "})).with_context(context()))
            .await
            .unwrap();
        assert_eq!(output.value, json!("hello, world"));
    }

    #[tokio::test]
    async fn test_concat_parts() {
        let output = ConcatTool
            .execute(call(json!({"parts": ["a", 1, true]})))
            .await
            .unwrap();
        assert_eq!(output.value, json!("a1true"));
    }

    #[tokio::test]
    async fn test_concat_bad_params() {
        let err = ConcatTool
            .execute(call(json!({"parts": "nope"})))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).starts_with("invalid params"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_reports_progress() {
        let (tx, mut rx) = mpsc::channel(16);
        let c = call(json!({"ms": 300, "ticks": 3}))
            .with_progress(ProgressReporter::new(StepId::new("s"), tx));

        let output = SleepTool.execute(c).await.unwrap();
        assert_eq!(output.value, json!({"sleptMs": 300}));

        let mut ticks = Vec::new();
        while let Ok(tick) = rx.try_recv() {
            ticks.push(tick.percent);
        }
        assert_eq!(ticks, vec![33, 66, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_honors_cancellation() {
        let c = call(json!({"ms": 10_000}));
        let token = c.cancel.clone();
        let handle = tokio::spawn(async move { SleepTool.execute(c).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("interrupted"));
    }

    #[tokio::test]
    async fn test_fail() {
        let err = FailTool.execute(call(Value::Null)).await.unwrap_err();
        assert_eq!(err.to_string(), "requested failure");

        let err = FailTool
            .execute(call(json!({"message": "quota exceeded"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
    }
}
