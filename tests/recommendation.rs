mod common;

use common::*;
use jobs_scout_lib::models::{JobRecord, RecommendRequest};
use jobs_scout_lib::storage::{JobStore, ResumeSource};
use jobs_scout_lib::{AppError, JobsScout};
use serde_json::json;
use std::sync::Arc;

fn record(id: &str, apply: &str, closed: Option<bool>) -> JobRecord {
    JobRecord {
        job_url: format!("https://jobs.test/?job={}", id),
        apply_url: apply.to_string(),
        title: format!("Job {}", id),
        company: "Ferris Labs".to_string(),
        is_closed: closed,
        ..Default::default()
    }
}

fn seed_store(dir: &std::path::Path) {
    let store = JobStore::new(dir).unwrap();
    store.append(&record("open", "https://apply.test/open", Some(false))).unwrap();
    store.append(&record("closed", "https://apply.test/closed", Some(true))).unwrap();
    store.append(&record("unknown", "https://apply.test/unknown", None)).unwrap();
    store.append(&record("noapply", "", None)).unwrap();
}

#[tokio::test]
async fn test_only_open_jobs_reach_the_model() {
    let dir = tempfile::tempdir().unwrap();
    seed_store(dir.path());

    let reply = json!({
        "recommendations": [{"jobUrl": "https://jobs.test/?job=open", "applyUrl": "https://apply.test/open", "title": "Job open", "score": 91, "fitReason": "Rust and tokio"}],
        "excluded": [],
        "needsConfirmation": [{"jobUrl": "https://jobs.test/?job=unknown", "title": "Job unknown", "reason": "timezone unclear"}],
        "summary": "One clear match."
    })
    .to_string();
    let llm = Arc::new(FakeLlm::replying(&format!("```json\n{}\n```", reply)));
    let scout = JobsScout::with_llm(test_config(dir.path()), llm.clone()).unwrap();
    scout
        .save_resume(&ResumeSource::Inline("Rust developer, 6 years, EU based.".to_string()))
        .unwrap();

    let result = scout.recommend("Remote in the EU only").await.unwrap();
    assert_eq!(result.recommendations.len(), 1);
    assert_eq!(result.recommendations[0].score, 91.0);
    assert_eq!(result.needs_confirmation[0].reason, "timezone unclear");
    assert_eq!(result.summary, "One clear match.");
    assert!(result.raw.is_none());

    let payload = llm.last_user_payload();
    assert_eq!(payload["resume"], "Rust developer, 6 years, EU based.");
    assert_eq!(payload["userRequirements"], "Remote in the EU only");
    let urls: Vec<&str> = payload["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["jobUrl"].as_str().unwrap())
        .collect();
    assert_eq!(urls, vec!["https://jobs.test/?job=open", "https://jobs.test/?job=unknown"]);

    let requests = llm.requests.lock().unwrap();
    assert_eq!(requests[0].model, "test/model");
    assert!(requests[0].messages[0].content.contains("needsConfirmation"));
}

#[tokio::test]
async fn test_closed_jobs_kept_when_only_open_is_off() {
    let dir = tempfile::tempdir().unwrap();
    seed_store(dir.path());

    let llm = Arc::new(FakeLlm::replying("{}"));
    let scout = JobsScout::with_llm(test_config(dir.path()), llm.clone()).unwrap();
    let request = RecommendRequest {
        api_key: Some("sk-test".to_string()),
        model: "test/model".to_string(),
        resume_text: "Inline resume wins".to_string(),
        user_message: "anything".to_string(),
        only_open: Some(false),
        limit: Some(2),
        ..Default::default()
    };
    scout.recommend_with(request).await.unwrap();

    let payload = llm.last_user_payload();
    assert_eq!(payload["resume"], "Inline resume wins");
    let jobs = payload["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[1]["jobUrl"], "https://jobs.test/?job=closed");
}

#[tokio::test]
async fn test_unparseable_reply_degrades_to_raw() {
    let dir = tempfile::tempdir().unwrap();
    seed_store(dir.path());

    let llm = Arc::new(FakeLlm::replying("Sorry, the model is overloaded."));
    let scout = JobsScout::with_llm(test_config(dir.path()), llm).unwrap();

    let result = scout.recommend("EU").await.unwrap();
    assert!(result.recommendations.is_empty());
    assert!(result.excluded.is_empty());
    assert!(result.needs_confirmation.is_empty());
    assert_eq!(result.summary, "");
    assert_eq!(result.raw.as_deref(), Some("Sorry, the model is overloaded."));
}

#[tokio::test]
async fn test_recommend_requires_crawled_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let scout = JobsScout::with_llm(test_config(dir.path()), Arc::new(FakeLlm::replying("{}"))).unwrap();

    let err = scout.recommend("EU").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(err.to_string().contains("Run crawl first."));
}
