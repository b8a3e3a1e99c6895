use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::Settings;

const SCORING_SYSTEM_PROMPT: &str = r#"You are an experienced instructor grading a student's free-text answer against a rubric.

Each rubric item has an id, a description, and a signed point value. Decide for
every rubric item whether it applies to the answer. Apply an item only when the
answer clearly satisfies its description; items with negative points are
deductions and apply when the described mistake is present.

Respond with strict JSON:
{
  "applied_rubric_item_ids": ["<rubric item id>", "..."],
  "feedback": "Concise feedback for the student explaining the grade"
}

Use only rubric item ids that appear in the request. Never invent ids.
"#;

#[derive(Debug, Clone)]
pub(crate) struct RubricItemSpec {
    pub(crate) id: String,
    pub(crate) description: String,
    pub(crate) points: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct ScoreRequest {
    pub(crate) submission_id: String,
    pub(crate) question: String,
    pub(crate) reference_solution: String,
    pub(crate) answer_text: String,
    pub(crate) rubric: Vec<RubricItemSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScoreResult {
    pub(crate) applied_rubric_item_ids: Vec<String>,
    pub(crate) feedback: String,
}

#[derive(Debug, Error)]
pub(crate) enum ScorerError {
    #[error("scorer returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("scorer request timed out")]
    Timeout,
    #[error("scorer unavailable: {0}")]
    Unavailable(String),
}

/// Request/response boundary to the external grader. One call per
/// submission; no retries, no caching.
#[async_trait]
pub(crate) trait ScorerGateway: Send + Sync {
    async fn score(&self, request: ScoreRequest) -> Result<ScoreResult, ScorerError>;
}

#[derive(Debug, Clone)]
pub(crate) struct OpenAiScorer {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiScorer {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.scorer().request_timeout);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|err| anyhow::anyhow!(err).context("Failed to build HTTP client"))?;

        Ok(Self {
            client,
            api_key: settings.scorer().openai_api_key.clone(),
            base_url: settings.scorer().openai_base_url.trim_end_matches('/').to_string(),
            model: settings.scorer().model.clone(),
            max_tokens: settings.scorer().max_tokens,
        })
    }

    fn user_prompt(request: &ScoreRequest) -> String {
        let rubric = request
            .rubric
            .iter()
            .map(|item| {
                json!({
                    "id": item.id,
                    "description": item.description,
                    "points": item.points,
                })
            })
            .collect::<Vec<_>>();

        format!(
            "Question:\n{}\n\nReference solution:\n{}\n\nRubric items:\n{}\n\nStudent answer:\n{}\n\nDecide which rubric items apply and respond in the JSON format from the system prompt.",
            request.question,
            request.reference_solution,
            serde_json::to_string_pretty(&Value::Array(rubric)).unwrap_or_default(),
            request.answer_text
        )
    }
}

#[async_trait]
impl ScorerGateway for OpenAiScorer {
    async fn score(&self, request: ScoreRequest) -> Result<ScoreResult, ScorerError> {
        let rubric_ids: BTreeSet<String> =
            request.rubric.iter().map(|item| item.id.clone()).collect();

        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SCORING_SYSTEM_PROMPT},
                {"role": "user", "content": Self::user_prompt(&request)}
            ],
            "max_completion_tokens": self.max_tokens,
            "response_format": {"type": "json_object"}
        });

        tracing::info!(submission_id = %request.submission_id, "Sending scorer request");

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ScorerError::Timeout
                } else {
                    ScorerError::Unavailable(err.to_string())
                }
            })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(ScorerError::Unavailable(format!("scorer API returned {status}: {body}")));
        }

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| ScorerError::InvalidResponse("missing response content".to_string()))?;

        let result = parse_score_payload(content, &rubric_ids)?;

        tracing::info!(
            submission_id = %request.submission_id,
            applied_items = result.applied_rubric_item_ids.len(),
            "Scorer request completed"
        );

        Ok(result)
    }
}

fn parse_score_payload(
    content: &str,
    rubric_ids: &BTreeSet<String>,
) -> Result<ScoreResult, ScorerError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|err| ScorerError::InvalidResponse(format!("malformed JSON: {err}")))?;

    let ids = value
        .get("applied_rubric_item_ids")
        .and_then(|ids| ids.as_array())
        .ok_or_else(|| {
            ScorerError::InvalidResponse("missing applied_rubric_item_ids array".to_string())
        })?;

    let mut applied = BTreeSet::new();
    for id in ids {
        let id = id.as_str().ok_or_else(|| {
            ScorerError::InvalidResponse("applied_rubric_item_ids must be strings".to_string())
        })?;

        if !rubric_ids.contains(id) {
            return Err(ScorerError::InvalidResponse(format!("unknown rubric item id {id}")));
        }

        applied.insert(id.to_string());
    }

    let feedback = value
        .get("feedback")
        .and_then(|value| value.as_str())
        .ok_or_else(|| ScorerError::InvalidResponse("missing feedback".to_string()))?
        .to_string();

    Ok(ScoreResult { applied_rubric_item_ids: applied.into_iter().collect(), feedback })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rubric_ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn parse_valid_payload() {
        let content = r#"{"applied_rubric_item_ids": ["ri-2", "ri-1"], "feedback": "Good work"}"#;
        let result = parse_score_payload(content, &rubric_ids(&["ri-1", "ri-2", "ri-3"]))
            .expect("valid payload");
        assert_eq!(result.applied_rubric_item_ids, vec!["ri-1".to_string(), "ri-2".to_string()]);
        assert_eq!(result.feedback, "Good work");
    }

    #[test]
    fn parse_deduplicates_ids() {
        let content = r#"{"applied_rubric_item_ids": ["ri-1", "ri-1"], "feedback": "ok"}"#;
        let result =
            parse_score_payload(content, &rubric_ids(&["ri-1"])).expect("valid payload");
        assert_eq!(result.applied_rubric_item_ids, vec!["ri-1".to_string()]);
    }

    #[test]
    fn parse_rejects_unknown_rubric_id() {
        let content = r#"{"applied_rubric_item_ids": ["ri-9"], "feedback": "ok"}"#;
        let err = parse_score_payload(content, &rubric_ids(&["ri-1"])).unwrap_err();
        assert!(matches!(err, ScorerError::InvalidResponse(_)));
    }

    #[test]
    fn parse_rejects_missing_feedback() {
        let content = r#"{"applied_rubric_item_ids": []}"#;
        let err = parse_score_payload(content, &rubric_ids(&["ri-1"])).unwrap_err();
        assert!(matches!(err, ScorerError::InvalidResponse(_)));
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let err = parse_score_payload("not json", &rubric_ids(&["ri-1"])).unwrap_err();
        assert!(matches!(err, ScorerError::InvalidResponse(_)));
    }
}
