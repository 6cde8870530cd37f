use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// One sighting of a job on a listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLink {
    pub href: String,
    pub title: String,
    pub company: String,
}

/// Unique jobs keyed by canonical URL, in the order they were first seen.
#[derive(Debug, Default)]
pub struct JobIndex {
    order: Vec<String>,
    by_url: HashMap<String, JobLink>,
}

impl JobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the URL was already known; the first sighting is kept.
    pub fn insert(&mut self, link: JobLink) -> bool {
        if self.by_url.contains_key(&link.href) {
            return false;
        }
        self.order.push(link.href.clone());
        self.by_url.insert(link.href.clone(), link);
        true
    }

    pub fn get(&self, url: &str) -> Option<&JobLink> {
        self.by_url.get(url)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobLink> {
        self.order.iter().filter_map(|url| self.by_url.get(url))
    }
}

/// A persisted job, one JSON object per line of `jobs.jsonl`.
///
/// `is_closed` is always written (`null` when unknown) and `reason` only on
/// records that could not be completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobRecord {
    pub job_url: String,
    pub title: String,
    pub company: String,
    pub apply_url: String,
    pub location: String,
    pub summary: String,
    pub responsibilities: Vec<String>,
    pub requirements: Vec<String>,
    pub benefits: Vec<String>,
    pub is_closed: Option<bool>,
    pub closed_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub const REASON_NO_APPLY_LINK: &str = "apply link not found";
pub const REASON_APPLY_NAV_FAILED: &str = "apply page navigation failed";

impl JobRecord {
    /// A record for a job whose extraction could not run.
    pub fn incomplete(link: &JobLink, apply_url: &str, reason: &str) -> Self {
        Self {
            job_url: link.href.clone(),
            title: link.title.clone(),
            company: link.company.clone(),
            apply_url: apply_url.to_string(),
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    /// Extracted fields win; listing title/company fill the gaps.
    pub fn from_extraction(link: &JobLink, apply_url: &str, extracted: ExtractedJob) -> Self {
        let pick = |value: String, fallback: &str| {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value
            }
        };
        Self {
            job_url: link.href.clone(),
            title: pick(extracted.title, &link.title),
            company: pick(extracted.company, &link.company),
            apply_url: apply_url.to_string(),
            location: extracted.location,
            summary: extracted.summary,
            responsibilities: extracted.responsibilities,
            requirements: extracted.requirements,
            benefits: extracted.benefits,
            is_closed: extracted.is_closed,
            closed_reason: extracted.closed_reason,
            reason: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.reason.is_none()
    }
}

/// Structured fields the extraction model returns for an apply page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub summary: String,
    pub responsibilities: Vec<String>,
    pub requirements: Vec<String>,
    pub benefits: Vec<String>,
    pub is_closed: Option<bool>,
    pub closed_reason: String,
}

impl ExtractedJob {
    /// Reads the model's JSON leniently: wrong-typed fields become empty.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let text = |key: &str| value[key].as_str().unwrap_or("").trim().to_string();
        let list = |key: &str| -> Vec<String> {
            value[key]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str())
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };

        Self {
            title: text("title"),
            company: text("company"),
            location: text("location"),
            summary: text("summary"),
            responsibilities: list("responsibilities"),
            requirements: list("requirements"),
            benefits: list("benefits"),
            is_closed: value["isClosed"].as_bool(),
            closed_reason: text("closedReason"),
        }
    }
}

/// What a finished crawl reports back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSummary {
    pub run_id: Uuid,
    pub output_path: PathBuf,
    pub pages_scanned: usize,
    pub jobs_found: usize,
    pub records_written: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
