use crate::config::{LlmSettings, RecommendDefaults, DEFAULT_MODEL};
use crate::error::{AppError, Result};
use crate::llm::prompts::RECOMMENDATION_SYSTEM;
use crate::llm::{extract_json, resolve_api_key, truncate_chars, ChatCompletion, ChatMessage, ChatRequest};
use crate::models::{JobRecord, RecommendRequest, RecommendationResult};
use serde::Serialize;
use tracing::{info, warn};

pub const SUMMARY_LIMIT: usize = 800;
pub const RESUME_LIMIT: usize = 6_000;
pub const REQUIREMENTS_LIMIT: usize = 1_200;

/// A job as the ranking model sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDigest {
    pub job_url: String,
    pub apply_url: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub summary: String,
    pub requirements: Vec<String>,
    pub responsibilities: Vec<String>,
    pub benefits: Vec<String>,
    pub closed_reason: String,
}

impl From<&JobRecord> for JobDigest {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_url: job.job_url.clone(),
            apply_url: job.apply_url.clone(),
            title: job.title.clone(),
            company: job.company.clone(),
            location: job.location.clone(),
            summary: truncate_chars(&job.summary, SUMMARY_LIMIT),
            requirements: job.requirements.clone(),
            responsibilities: job.responsibilities.clone(),
            benefits: job.benefits.clone(),
            closed_reason: job.closed_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendPayload {
    pub resume: String,
    pub user_requirements: String,
    pub jobs: Vec<JobDigest>,
}

/// Jobs with an apply URL, optionally only open ones, capped at `limit` in store order.
pub fn select_jobs(jobs: &[JobRecord], only_open: bool, limit: usize) -> Vec<JobDigest> {
    jobs.iter()
        .filter(|job| !job.apply_url.is_empty())
        .filter(|job| !only_open || job.is_closed != Some(true))
        .take(limit)
        .map(JobDigest::from)
        .collect()
}

pub fn build_payload(request: &RecommendRequest, defaults: &RecommendDefaults) -> RecommendPayload {
    let limit = request.limit.unwrap_or(defaults.limit);
    let only_open = request.only_open.unwrap_or(defaults.only_open);
    RecommendPayload {
        resume: truncate_chars(&request.resume_text, RESUME_LIMIT),
        user_requirements: truncate_chars(&request.user_message, REQUIREMENTS_LIMIT),
        jobs: select_jobs(&request.jobs, only_open, limit),
    }
}

/// Reads the model reply; only a reply without a JSON object degrades to the raw text.
pub fn parse_reply(raw: &str) -> RecommendationResult {
    match extract_json(raw) {
        Some(value) if value.is_object() => RecommendationResult::from_value(&value),
        _ => {
            warn!("Recommendation reply carried no JSON object");
            RecommendationResult::degraded(raw)
        }
    }
}

/// Ranks stored jobs against the resume and the user's constraints with one model call.
pub async fn recommend(
    llm: &dyn ChatCompletion,
    request: &RecommendRequest,
    settings: &LlmSettings,
    defaults: &RecommendDefaults,
) -> Result<RecommendationResult> {
    let api_key = resolve_api_key(request.api_key.as_deref(), settings.api_key_path.as_deref())?
        .ok_or(AppError::MissingApiKey)?;

    let payload = build_payload(request, defaults);
    info!(
        "Recommending from {} of {} stored jobs",
        payload.jobs.len(),
        request.jobs.len()
    );

    let model = if request.model.trim().is_empty() {
        DEFAULT_MODEL.to_string()
    } else {
        request.model.trim().to_string()
    };

    let chat = ChatRequest {
        api_key,
        model,
        messages: vec![
            ChatMessage::system(RECOMMENDATION_SYSTEM),
            ChatMessage::user(serde_json::to_string(&payload)?),
        ],
        proxy: request.llm_proxy.clone(),
        timeout: settings.timeout(),
    };

    let raw = llm.complete(&chat).await?;
    Ok(parse_reply(&raw))
}
