//! Table classifier: does this page's text contain a table?
//!
//! Empty text never reaches the model. Otherwise the classification prompt
//! is sent in JSON mode and the reply validated against the two-field shape
//! `{"tableDetected": bool, "confidenceScore": number}`.
//!
//! ## Retry Strategy
//!
//! | Outcome                               | Retried? | Result                        |
//! |---------------------------------------|----------|-------------------------------|
//! | transport error / bad HTTP body       | yes      | `Exhausted` after last try    |
//! | empty response, finish reason `STOP`  | yes      | `Exhausted` after last try    |
//! | empty response, any other reason      | no       | `Blocked`                     |
//! | text that is not a JSON object        | no       | `Parse` (raw text kept)       |
//! | object missing/mistyped fields        | no       | `Invalid` (raw text kept)     |
//!
//! With the default [`RetryPolicy`] the waits are 5 s then 10 s.

use crate::analyzer::TableAnalyzer;
use crate::config::RetryPolicy;
use crate::error::ClassifyError;
use crate::output::ClassificationResult;
use crate::pipeline::llm::{FinishReason, Generation, GenerationRequest, GenerativeModel};
use crate::prompts;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a page's classification was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassifyOutcome {
    /// The analyzer was consulted.
    Classified(ClassificationResult),
    /// No text to classify; the endpoint was not called.
    EmptyInput(ClassificationResult),
}

impl ClassifyOutcome {
    pub fn result(&self) -> ClassificationResult {
        match self {
            ClassifyOutcome::Classified(r) | ClassifyOutcome::EmptyInput(r) => *r,
        }
    }
}

/// Classify one page, short-circuiting on empty or whitespace-only text.
pub async fn classify_page(
    analyzer: &dyn TableAnalyzer,
    page: usize,
    text: &str,
) -> Result<ClassifyOutcome, ClassifyError> {
    if text.trim().is_empty() {
        warn!(page, "empty page text, skipping table detection");
        return Ok(ClassifyOutcome::EmptyInput(ClassificationResult::NO_TABLE));
    }
    let result = analyzer.classify(text).await?;
    info!(
        page,
        table_detected = result.table_detected,
        confidence = result.confidence_score,
        "page classified"
    );
    Ok(ClassifyOutcome::Classified(result))
}

/// Prompt + model + retry policy.
pub struct TableClassifier {
    model: Arc<dyn GenerativeModel>,
    template: String,
    retry: RetryPolicy,
    temperature: f32,
}

impl TableClassifier {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        template: impl Into<String>,
        retry: RetryPolicy,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            template: template.into(),
            retry,
            temperature,
        }
    }

    /// Call the model with retry and validate the reply.
    pub async fn classify(&self, text: &str) -> Result<ClassificationResult, ClassifyError> {
        let prompt =
            prompts::classification_prompt(&self.template, text).map_err(ClassifyError::Prompt)?;
        let request = GenerationRequest {
            prompt,
            image: None,
            json_mode: true,
            temperature: self.temperature,
            max_tokens: None,
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut last = String::new();

        for attempt in 1..=max_attempts {
            debug!(attempt, max_attempts, model = self.model.model_name(), "classification call");
            match self.model.generate(&request).await {
                Ok(Generation {
                    text: Some(raw), ..
                }) if !raw.is_empty() => return parse_classification(&raw),
                Ok(Generation {
                    finish_reason: FinishReason::Other(reason),
                    ..
                }) => {
                    warn!(attempt, %reason, "classification response empty or blocked");
                    return Err(ClassifyError::Blocked { reason });
                }
                Ok(_) => {
                    last = "response was empty with finish reason STOP".to_string();
                }
                Err(e) => {
                    last = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.retry.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "classification call failed ({last}), retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        warn!(attempts = max_attempts, "classification call failed: {last}");
        Err(ClassifyError::Exhausted {
            attempts: max_attempts,
            last,
        })
    }
}

/// Parse and validate the model's JSON reply.
///
/// A `confidenceScore` outside [0, 1] is logged and accepted.
pub fn parse_classification(raw: &str) -> Result<ClassificationResult, ClassifyError> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|e| ClassifyError::Parse {
        detail: e.to_string(),
        raw: raw.to_string(),
    })?;

    let obj = value.as_object().ok_or_else(|| ClassifyError::Parse {
        detail: format!("expected a JSON object, got {}", json_kind(&value)),
        raw: raw.to_string(),
    })?;

    let invalid = |detail: String| ClassifyError::Invalid {
        detail,
        raw: raw.to_string(),
    };

    let table_detected = match obj.get("tableDetected") {
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            return Err(invalid(format!(
                "'tableDetected' must be a boolean, got {}",
                json_kind(other)
            )))
        }
        None => return Err(invalid("missing field 'tableDetected'".into())),
    };

    let confidence_score = match obj.get("confidenceScore") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(other) => {
            return Err(invalid(format!(
                "'confidenceScore' must be a number, got {}",
                json_kind(other)
            )))
        }
        None => return Err(invalid("missing field 'confidenceScore'".into())),
    };

    if !(0.0..=1.0).contains(&confidence_score) {
        warn!(confidence_score, "'confidenceScore' out of range [0.0, 1.0]");
    }

    Ok(ClassificationResult {
        table_detected,
        confidence_score,
    })
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Replays scripted responses and records when each call happened.
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<Generation, GenerationError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<Result<Generation, GenerationError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
            assert!(request.json_mode);
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Transport("script exhausted".into())))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn classifier(model: Arc<ScriptedModel>) -> TableClassifier {
        TableClassifier::new(
            model,
            prompts::DEFAULT_TABLE_DETECTION_PROMPT,
            RetryPolicy::default(),
            0.1,
        )
    }

    #[test]
    fn parses_valid_reply() {
        let r = parse_classification(r#"{"tableDetected": true, "confidenceScore": 0.9}"#).unwrap();
        assert!(r.table_detected);
        assert!((r.confidence_score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn integer_score_is_accepted() {
        let r = parse_classification(r#"{"tableDetected": false, "confidenceScore": 1}"#).unwrap();
        assert_eq!(r.confidence_score, 1.0);
    }

    #[test]
    fn out_of_range_score_is_accepted() {
        let r = parse_classification(r#"{"tableDetected": true, "confidenceScore": 1.5}"#).unwrap();
        assert_eq!(r.confidence_score, 1.5);
    }

    #[test]
    fn missing_score_is_invalid_and_keeps_raw() {
        let raw = r#"{"tableDetected": true}"#;
        let err = parse_classification(raw).unwrap_err();
        assert!(matches!(err, ClassifyError::Invalid { .. }), "got: {err}");
        assert_eq!(err.raw(), Some(raw));
    }

    #[test]
    fn wrong_types_are_invalid() {
        for raw in [
            r#"{"tableDetected": "yes", "confidenceScore": 0.5}"#,
            r#"{"tableDetected": true, "confidenceScore": "high"}"#,
            r#"{"tableDetected": true, "confidenceScore": true}"#,
        ] {
            let err = parse_classification(raw).unwrap_err();
            assert!(matches!(err, ClassifyError::Invalid { .. }), "{raw}: {err}");
        }
    }

    #[test]
    fn non_json_and_non_object_are_parse_errors() {
        let err = parse_classification("I think there is a table.").unwrap_err();
        assert!(matches!(err, ClassifyError::Parse { .. }));
        assert_eq!(err.raw(), Some("I think there is a table."));

        let err = parse_classification("[true, 0.5]").unwrap_err();
        assert!(matches!(err, ClassifyError::Parse { .. }), "got: {err}");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_three_times_with_doubling_backoff() {
        let model = ScriptedModel::new(vec![
            Err(GenerationError::Http { status: 503, body: "busy".into() }),
            Err(GenerationError::Transport("reset".into())),
            Err(GenerationError::MalformedBody("eof".into())),
        ]);
        let err = classifier(model.clone()).classify("a | b").await.unwrap_err();

        match err {
            ClassifyError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.contains("eof"), "got: {last}");
            }
            other => panic!("unexpected error: {other}"),
        }

        let times = model.call_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(5));
        assert_eq!(times[2] - times[1], Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_response_is_not_retried() {
        let model = ScriptedModel::new(vec![Ok(Generation::blocked("SAFETY"))]);
        let err = classifier(model.clone()).classify("a | b").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Blocked { ref reason } if reason == "SAFETY"));
        assert_eq!(model.call_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stop_is_retried_then_succeeds() {
        let model = ScriptedModel::new(vec![
            Ok(Generation::empty_stop()),
            Ok(Generation::text(r#"{"tableDetected": true, "confidenceScore": 0.8}"#)),
        ]);
        let r = classifier(model.clone()).classify("a | b").await.unwrap();
        assert!(r.table_detected);
        assert_eq!(model.call_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn parse_failure_is_not_retried() {
        let model = ScriptedModel::new(vec![Ok(Generation::text("not json"))]);
        let err = classifier(model.clone()).classify("a | b").await.unwrap_err();
        assert!(matches!(err, ClassifyError::Parse { .. }));
        assert_eq!(model.call_times().len(), 1);
    }

    #[tokio::test]
    async fn prompt_contains_page_text() {
        struct Capture(Mutex<Option<String>>);

        #[async_trait]
        impl GenerativeModel for Capture {
            async fn generate(&self, r: &GenerationRequest) -> Result<Generation, GenerationError> {
                *self.0.lock().unwrap() = Some(r.prompt.clone());
                Ok(Generation::text(r#"{"tableDetected": false, "confidenceScore": 0.1}"#))
            }
            fn model_name(&self) -> &str {
                "capture"
            }
        }

        let model = Arc::new(Capture(Mutex::new(None)));
        let c = TableClassifier::new(
            model.clone(),
            prompts::DEFAULT_TABLE_DETECTION_PROMPT,
            RetryPolicy::default(),
            0.1,
        );
        c.classify("Qty  Price\n3    9.99").await.unwrap();
        let prompt = model.0.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Qty  Price\n3    9.99"));
    }
}
