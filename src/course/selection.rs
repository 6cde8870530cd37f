use super::candidates::sanitize_text;
use crate::error::Result;
use crate::llm::prompts::{COURSE_SELECTION_INSTRUCTIONS, COURSE_SELECTION_SYSTEM};
use crate::llm::{extract_json, ChatCompletion, ChatMessage, ChatRequest};
use crate::models::Candidate;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Heuristic cutoff: longer texts are usually descriptions, not lesson titles.
pub const HEURISTIC_TEXT_LIMIT: usize = 60;

#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Picks the lesson entries among `candidates`, in DOM order.
    async fn select(&self, candidates: &[Candidate]) -> Result<Vec<Candidate>>;
}

fn sort_by_dom_order(items: &mut [Candidate]) {
    items.sort_by_key(Candidate::dom_order);
}

/// Keeps identifiable candidates with short texts.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicSelection;

impl HeuristicSelection {
    pub fn pick(candidates: &[Candidate]) -> Vec<Candidate> {
        let mut picked: Vec<Candidate> = candidates
            .iter()
            .filter(|c| c.has_identifier())
            .filter(|c| c.text.trim().chars().count() <= HEURISTIC_TEXT_LIMIT)
            .cloned()
            .collect();
        sort_by_dom_order(&mut picked);
        picked
    }
}

#[async_trait]
impl SelectionStrategy for HeuristicSelection {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn select(&self, candidates: &[Candidate]) -> Result<Vec<Candidate>> {
        Ok(Self::pick(candidates))
    }
}

#[derive(Debug, Clone)]
pub struct CourseSelectionSettings {
    pub course_url: String,
    pub api_key: String,
    pub model: String,
    pub proxy: Option<String>,
    pub timeout: Duration,
    /// Blank out href, tag and class and scrub the text before sending.
    pub minimal_payload: bool,
}

/// Asks the model which candidates are lessons.
pub struct LlmSelection<'a> {
    pub llm: &'a dyn ChatCompletion,
    pub settings: CourseSelectionSettings,
}

impl<'a> LlmSelection<'a> {
    pub fn new(llm: &'a dyn ChatCompletion, settings: CourseSelectionSettings) -> Self {
        Self { llm, settings }
    }

    pub fn build_payload(&self, candidates: &[Candidate]) -> serde_json::Value {
        let minimal = self.settings.minimal_payload;
        let entries: Vec<serde_json::Value> = candidates
            .iter()
            .map(|c| {
                json!({
                    "candidateId": c.candidate_id,
                    "frameId": c.frame_id,
                    "frameUrl": c.frame_url,
                    "domIndex": c.dom_index,
                    "text": if minimal { sanitize_text(&c.text) } else { c.text.clone() },
                    "href": if minimal { "" } else { c.href.as_str() },
                    "resourceId": c.resource_id,
                    "dataKey": c.data_key,
                    "tag": if minimal { "" } else { c.tag.as_str() },
                    "className": if minimal { "" } else { c.class_name.as_str() },
                    "reason": c.reason,
                })
            })
            .collect();

        json!({
            "courseUrl": self.settings.course_url,
            "instructions": COURSE_SELECTION_INSTRUCTIONS,
            "candidates": entries,
        })
    }
}

/// Maps the ids in a model reply back to candidates. Accepts bare numbers or
/// `{"candidateId": n}` objects; unknown ids and repeats are dropped.
pub fn parse_selection(raw: &str, candidates: &[Candidate]) -> Vec<Candidate> {
    let Some(parsed) = extract_json(raw) else {
        return Vec::new();
    };
    let Some(entries) = parsed["items"].as_array() else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for entry in entries {
        let id = entry.as_u64().or_else(|| entry["candidateId"].as_u64());
        let Some(candidate) = id.and_then(|id| candidates.get(id as usize)) else {
            continue;
        };
        let key = match candidate.stable_key() {
            Some(key) => key.to_string(),
            None => format!("#{}", candidate.candidate_id),
        };
        if seen.insert(key) {
            selected.push(candidate.clone());
        }
    }

    sort_by_dom_order(&mut selected);
    selected
}

#[async_trait]
impl<'a> SelectionStrategy for LlmSelection<'a> {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn select(&self, candidates: &[Candidate]) -> Result<Vec<Candidate>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let request = ChatRequest {
            api_key: self.settings.api_key.clone(),
            model: self.settings.model.clone(),
            messages: vec![
                ChatMessage::system(COURSE_SELECTION_SYSTEM),
                ChatMessage::user(self.build_payload(candidates).to_string()),
            ],
            proxy: self.settings.proxy.clone(),
            timeout: self.settings.timeout,
        };
        let raw = self.llm.complete(&request).await?;
        debug!("[llm] raw={}", crate::llm::truncate_chars(&raw, 200));
        Ok(parse_selection(&raw, candidates))
    }
}

/// Runs `primary`, and `fallback` when the primary fails or selects nothing.
pub struct FallbackSelector<P, F> {
    pub primary: P,
    pub fallback: F,
    pub enabled: bool,
}

impl<P, F> FallbackSelector<P, F> {
    pub fn new(primary: P, fallback: F, enabled: bool) -> Self {
        Self {
            primary,
            fallback,
            enabled,
        }
    }
}

#[async_trait]
impl<P, F> SelectionStrategy for FallbackSelector<P, F>
where
    P: SelectionStrategy,
    F: SelectionStrategy,
{
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    async fn select(&self, candidates: &[Candidate]) -> Result<Vec<Candidate>> {
        match self.primary.select(candidates).await {
            Ok(selected) if !selected.is_empty() => Ok(selected),
            Ok(selected) if !self.enabled => Ok(selected),
            Err(e) if !self.enabled => Err(e),
            Ok(_) => {
                let picked = self.fallback.select(candidates).await?;
                debug!("{} selected nothing, {} picked {}", self.primary.name(), self.fallback.name(), picked.len());
                Ok(picked)
            }
            Err(e) => {
                warn!("{} selection failed, using {}: {}", self.primary.name(), self.fallback.name(), e);
                self.fallback.select(candidates).await
            }
        }
    }
}
