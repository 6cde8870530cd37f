mod common;

use common::*;
use jobs_scout_lib::course::collect_candidates;
use jobs_scout_lib::{AppError, JobsScout};
use serde_json::{json, Value};
use std::sync::Arc;

const COURSE_URL: &str = "https://learn.test/course/42";

fn course_site() -> Site {
    Site::default()
        .frame(
            COURSE_URL,
            Some(json!([
                {
                    "domIndex": 0,
                    "text": "Lesson 1 call 13800138000",
                    "href": "https://learn.test/play?resourceId=r1",
                    "resourceId": "r1",
                    "tag": "A",
                    "className": "item active",
                    "reason": "a[href*=\"resourceId=\"]"
                },
                { "domIndex": 1, "text": "Log in", "href": "https://learn.test/login", "tag": "A", "reason": "fallback" },
                {
                    "domIndex": 2,
                    "text": "A very long course description that goes on and on about what you will learn",
                    "reason": "outline"
                }
            ])),
        )
        .frame("https://ads.test/frame", None)
        .frame(
            "https://player.test/embed",
            Some(json!([
                { "domIndex": 0, "text": "Lesson 2", "resourceId": "r2", "dataKey": "r2", "tag": "LI", "reason": "[data-resource-id]" }
            ])),
        )
}

fn scout_with(dir: &std::path::Path, llm: Arc<FakeLlm>, fallback: bool) -> JobsScout {
    let mut config = test_config(dir);
    config.course.minimal_payload = true;
    config.course.llm_fallback = fallback;
    JobsScout::with_llm(config, llm).unwrap()
}

#[tokio::test]
async fn test_candidates_are_numbered_across_frames() {
    let browser = FakeBrowser::new(course_site());
    let page = browser.page();

    let candidates = collect_candidates(&page, 300).await.unwrap();
    let ids: Vec<(usize, usize, usize)> = candidates
        .iter()
        .map(|c| (c.candidate_id, c.frame_id, c.dom_index))
        .collect();
    assert_eq!(ids, vec![(0, 0, 0), (1, 0, 1), (2, 0, 2), (3, 2, 0)]);
    assert_eq!(candidates[3].frame_url, "https://player.test/embed");
    assert_eq!(candidates[3].data_key, "r2");
}

#[tokio::test]
async fn test_llm_selection_in_dom_order_with_minimal_payload() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::replying(r#"{"items":[3, {"candidateId":0}, 17, 0]}"#));
    let scout = scout_with(dir.path(), llm.clone(), true);
    let browser = FakeBrowser::new(course_site());

    let selected = scout.select_course_on_page(&browser.page(), COURSE_URL).await.unwrap();
    let ids: Vec<usize> = selected.iter().map(|c| c.candidate_id).collect();
    assert_eq!(ids, vec![0, 3]);

    let payload = llm.last_user_payload();
    assert_eq!(payload["courseUrl"], COURSE_URL);
    let sent = payload["candidates"].as_array().unwrap();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[0]["text"], "Lesson 1 call");
    assert_eq!(sent[0]["href"], "");
    assert_eq!(sent[0]["className"], "");
    assert_eq!(sent[0]["resourceId"], "r1");
    assert!(sent.iter().all(|c| c.get("context").is_none()));
}

#[tokio::test]
async fn test_empty_llm_selection_falls_back_to_heuristic() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::replying(r#"{"items":[]}"#));
    let scout = scout_with(dir.path(), llm.clone(), true);
    let browser = FakeBrowser::new(course_site());

    let selected = scout.select_course_on_page(&browser.page(), COURSE_URL).await.unwrap();
    let texts: Vec<&str> = selected.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["Lesson 1 call 13800138000", "Log in", "Lesson 2"]);
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn test_llm_failure_falls_back_to_heuristic() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::with(|_| {
        Err(AppError::LlmApi {
            status: 503,
            body: "upstream unavailable".to_string(),
        })
    }));
    let scout = scout_with(dir.path(), llm, true);
    let browser = FakeBrowser::new(course_site());

    let selected = scout.select_course_on_page(&browser.page(), COURSE_URL).await.unwrap();
    assert_eq!(selected.len(), 3);
}

#[tokio::test]
async fn test_disabled_fallback_surfaces_the_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::new(course_site());

    let empty = scout_with(dir.path(), Arc::new(FakeLlm::replying("no json here")), false);
    assert!(empty
        .select_course_on_page(&browser.page(), COURSE_URL)
        .await
        .unwrap()
        .is_empty());

    let failing = scout_with(
        dir.path(),
        Arc::new(FakeLlm::with(|_| Err(AppError::Llm("timeout".to_string())))),
        false,
    );
    assert!(failing.select_course_on_page(&browser.page(), COURSE_URL).await.is_err());
}

#[tokio::test]
async fn test_page_without_candidates_skips_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(FakeLlm::replying("{}"));
    let scout = scout_with(dir.path(), llm.clone(), true);
    let browser = FakeBrowser::new(Site::default().frame(COURSE_URL, Some(Value::Array(Vec::new()))));

    let selected = scout.select_course_on_page(&browser.page(), COURSE_URL).await.unwrap();
    assert!(selected.is_empty());
    assert_eq!(llm.calls(), 0);
}
