use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::jobs::JobRecord;

fn text_of(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or("").trim().to_string()
}

fn strings_of(value: &Value, key: &str) -> Vec<String> {
    value[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Numbers and numeric strings; anything else scores 0.
fn score_of(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Object entries of `value[key]`; non-object entries are dropped.
fn entries_of<T>(value: &Value, key: &str, read: impl Fn(&Value) -> T) -> Vec<T> {
    value[key]
        .as_array()
        .map(|items| items.iter().filter(|item| item.is_object()).map(read).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Recommendation {
    pub job_url: String,
    pub apply_url: String,
    pub title: String,
    pub company: String,
    pub score: f64,
    pub fit_reason: String,
    pub risks: Vec<String>,
    pub location: String,
    pub work_auth: String,
}

impl Recommendation {
    pub fn from_value(value: &Value) -> Self {
        Self {
            job_url: text_of(value, "jobUrl"),
            apply_url: text_of(value, "applyUrl"),
            title: text_of(value, "title"),
            company: text_of(value, "company"),
            score: score_of(&value["score"]),
            fit_reason: text_of(value, "fitReason"),
            risks: strings_of(value, "risks"),
            location: text_of(value, "location"),
            work_auth: text_of(value, "workAuth"),
        }
    }
}

/// A job kept out of the recommendations, with the model's explanation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlaggedJob {
    pub job_url: String,
    pub title: String,
    pub reason: String,
}

impl FlaggedJob {
    pub fn from_value(value: &Value) -> Self {
        Self {
            job_url: text_of(value, "jobUrl"),
            title: text_of(value, "title"),
            reason: text_of(value, "reason"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecommendationResult {
    pub recommendations: Vec<Recommendation>,
    pub excluded: Vec<FlaggedJob>,
    pub needs_confirmation: Vec<FlaggedJob>,
    pub summary: String,
    /// Unparsed model reply, present only when it was not valid JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl RecommendationResult {
    pub fn degraded(raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
            ..Default::default()
        }
    }

    /// Reads a parsed reply field by field, so one odd value does not cost the rest.
    pub fn from_value(value: &Value) -> Self {
        Self {
            recommendations: entries_of(value, "recommendations", Recommendation::from_value),
            excluded: entries_of(value, "excluded", FlaggedJob::from_value),
            needs_confirmation: entries_of(value, "needsConfirmation", FlaggedJob::from_value),
            summary: text_of(value, "summary"),
            raw: None,
        }
    }
}

/// Input of a single recommendation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecommendRequest {
    pub api_key: Option<String>,
    pub model: String,
    pub llm_proxy: Option<String>,
    pub resume_text: String,
    pub user_message: String,
    pub jobs: Vec<JobRecord>,
    pub limit: Option<usize>,
    pub only_open: Option<bool>,
}
