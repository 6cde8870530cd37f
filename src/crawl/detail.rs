use crate::browser_ai::{goto_with_retry, BrowserHandle, NavOptions, PageDriver};
use crate::error::{AppError, Result};
use crate::llm::prompts::JOB_EXTRACTION_SYSTEM;
use crate::llm::{extract_json, truncate_chars, ChatCompletion, ChatMessage, ChatRequest};
use crate::models::{ExtractedJob, JobIndex, JobLink, JobRecord, REASON_APPLY_NAV_FAILED, REASON_NO_APPLY_LINK};
use crate::run::{CancelToken, RunLog};
use crate::storage::JobStore;
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

/// `href` of the first anchor whose text asks the visitor to apply.
pub const APPLY_LINK_SCRIPT: &str = r#"() => {
    const anchors = Array.from(document.querySelectorAll('a'));
    const match = anchors.find((a) => {
        const text = (a.textContent || '').trim();
        return text.includes('Apply for this position') || text.includes('Apply Now');
    });
    return match ? match.href : '';
}"#;

fn apply_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<a[^>]+href=["']([^"']+)["'][^>]*>[^<]*(Apply for this position|Apply Now)[^<]*</a>"#)
            .expect("valid apply link regex")
    })
}

fn script_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script.*?</script>").expect("valid script regex"))
}

fn style_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<style.*?</style>").expect("valid style regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Drops script and style blocks, collapses whitespace and caps the length.
pub fn trim_html(html: &str, budget: usize) -> String {
    let without_scripts = script_block_regex().replace_all(html, "");
    let without_styles = style_block_regex().replace_all(&without_scripts, "");
    let collapsed = whitespace_regex().replace_all(&without_styles, " ");
    truncate_chars(&collapsed, budget)
}

/// Apply link found by the markup regex, resolved against the job page.
pub fn find_apply_link(html: &str, job_url: &str) -> Option<String> {
    let href = apply_link_regex().captures(html)?.get(1)?.as_str().trim();
    if href.is_empty() {
        return None;
    }
    match Url::parse(job_url).and_then(|base| base.join(href)) {
        Ok(resolved) => Some(resolved.to_string()),
        Err(_) => Some(href.to_string()),
    }
}

async fn resolve_apply_url(page: &dyn PageDriver, html: &str, job_url: &str) -> Option<String> {
    if let Ok(serde_json::Value::String(href)) = page.evaluate(APPLY_LINK_SCRIPT).await {
        if !href.trim().is_empty() {
            return Some(href.trim().to_string());
        }
    }
    find_apply_link(html, job_url)
}

/// Model, credentials and limits of the extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub api_key: String,
    pub model: String,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// Asks the model to turn an apply page into structured job fields.
pub async fn extract_job(
    llm: &dyn ChatCompletion,
    settings: &ExtractionSettings,
    job_url: &str,
    apply_url: &str,
    html: &str,
) -> Result<ExtractedJob> {
    let request = ChatRequest {
        api_key: settings.api_key.clone(),
        model: settings.model.clone(),
        messages: vec![
            ChatMessage::system(JOB_EXTRACTION_SYSTEM),
            ChatMessage::user(
                json!({
                    "jobUrl": job_url,
                    "applyUrl": apply_url,
                    "html": html,
                })
                .to_string(),
            ),
        ],
        proxy: settings.proxy.clone(),
        timeout: settings.timeout,
    };

    let raw = llm.complete(&request).await?;
    let parsed = extract_json(&raw).ok_or_else(|| AppError::Llm("LLM returned invalid JSON".to_string()))?;
    Ok(ExtractedJob::from_value(&parsed))
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// `0` processes every unique job.
    pub max_jobs: usize,
    pub nav: NavOptions,
    pub html_budget: usize,
    pub extraction: ExtractionSettings,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectOutcome {
    pub processed: usize,
    pub records_written: usize,
}

/// Visits every job page, resolves its apply link and appends one record
/// per job that could be opened.
pub struct JobDetailCollector<'a> {
    pub browser: &'a dyn BrowserHandle,
    pub llm: &'a dyn ChatCompletion,
    pub store: &'a JobStore,
    pub options: &'a CollectOptions,
    pub log: &'a RunLog,
}

impl<'a> JobDetailCollector<'a> {
    pub async fn collect(&self, page: &dyn PageDriver, jobs: &JobIndex, cancel: &CancelToken) -> Result<CollectOutcome> {
        let mut outcome = CollectOutcome::default();
        let shown_total = if self.options.max_jobs > 0 {
            self.options.max_jobs
        } else {
            jobs.len()
        };

        for link in jobs.iter() {
            cancel.checkpoint()?;
            if self.options.max_jobs > 0 && outcome.processed >= self.options.max_jobs {
                break;
            }
            outcome.processed += 1;

            let title = if link.title.is_empty() { "untitled" } else { link.title.as_str() };
            self.log.log(format!("[{}/{}] job: {}", outcome.processed, shown_total, title));

            if !goto_with_retry(page, &link.href, &self.options.nav, self.log).await {
                self.log.log(format!("skip job due to navigation failure: {}", link.href));
                continue;
            }

            let job_html = match page.content().await {
                Ok(html) => html,
                Err(e) => {
                    self.log.log(format!("skip job, could not read page {}: {}", link.href, e));
                    continue;
                }
            };

            let record = match resolve_apply_url(page, &job_html, &link.href).await {
                None => {
                    self.log.log(format!("apply link missing: {}", link.href));
                    JobRecord::incomplete(link, "", REASON_NO_APPLY_LINK)
                }
                Some(apply_url) => self.visit_apply_page(link, &apply_url).await,
            };

            self.store.append(&record)?;
            outcome.records_written += 1;
            if record.is_complete() {
                let saved = if record.title.is_empty() { "untitled" } else { record.title.as_str() };
                self.log.log(format!("saved: {}", saved));
            }
        }

        Ok(outcome)
    }

    async fn visit_apply_page(&self, link: &JobLink, apply_url: &str) -> JobRecord {
        let apply_page = match self.browser.new_page().await {
            Ok(page) => page,
            Err(e) => {
                self.log.log(format!("could not open tab for {}: {}", apply_url, e));
                return JobRecord::incomplete(link, apply_url, REASON_APPLY_NAV_FAILED);
            }
        };

        let record = self.extract_from_apply_page(apply_page.as_ref(), link, apply_url).await;

        if let Err(e) = apply_page.close().await {
            self.log.log(format!("failed to close apply tab: {}", e));
        }
        record
    }

    async fn extract_from_apply_page(&self, apply_page: &dyn PageDriver, link: &JobLink, apply_url: &str) -> JobRecord {
        if !goto_with_retry(apply_page, apply_url, &self.options.nav, self.log).await {
            self.log.log(format!("apply page failed: {}", apply_url));
            return JobRecord::incomplete(link, apply_url, REASON_APPLY_NAV_FAILED);
        }

        let extracted = match apply_page.content().await {
            Ok(html) => {
                let trimmed = trim_html(&html, self.options.html_budget);
                match extract_job(self.llm, &self.options.extraction, &link.href, apply_url, &trimmed).await {
                    Ok(extracted) => extracted,
                    Err(e) => {
                        self.log.log(format!("LLM extract failed: {}", e));
                        ExtractedJob::default()
                    }
                }
            }
            Err(e) => {
                self.log.log(format!("could not read apply page {}: {}", apply_url, e));
                ExtractedJob::default()
            }
        };

        JobRecord::from_extraction(link, apply_url, extracted)
    }
}
