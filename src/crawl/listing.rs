use crate::browser_ai::cdp_client::wait_until;
use crate::browser_ai::{goto_with_retry, NavOptions, PageDriver};
use crate::error::{AppError, Result};
use crate::models::{JobIndex, JobLink};
use crate::run::{CancelToken, RunLog};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

pub const DEFAULT_ORIGIN: &str = "https://jobs.letsgetrusty.com";

/// True once job anchors or an `ItemList` JSON-LD block are in the DOM.
pub const JOB_MARKERS_SCRIPT: &str = r#"() => {
    if (document.querySelector('a[href*="?job="]')) return true;
    const itemListRegex = /"@type"\s*:\s*"ItemList"/;
    return Array.from(document.querySelectorAll('script'))
        .some((s) => itemListRegex.test(s.textContent || ''));
}"#;

/// Title, location and the start of the visible text, for empty-page diagnostics.
pub const PAGE_SNAPSHOT_SCRIPT: &str = r#"() => ({
    title: document.title,
    url: location.href,
    text: ((document.body && document.body.innerText) || '').slice(0, 240)
})"#;

fn page_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)href=["']([^"']*\?page=(\d+)[^"']*)["']"#).expect("valid page link regex")
    })
}

fn item_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""@type"\s*:\s*"ItemList""#).expect("valid ItemList regex"))
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub start_url: String,
    /// `0` scans every page the listing advertises.
    pub max_pages: usize,
    pub nav: NavOptions,
    pub marker_timeout: Duration,
    pub marker_poll: Duration,
    pub settle_delay: Duration,
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub jobs: JobIndex,
    pub total_pages: usize,
    pub pages_scanned: usize,
}

/// Highest `?page=N` linked from the markup, at least 1.
pub fn parse_page_count(html: &str) -> usize {
    page_link_regex()
        .captures_iter(html)
        .filter_map(|caps| caps.get(2)?.as_str().parse::<usize>().ok())
        .fold(1, usize::max)
}

pub fn page_limit(total: usize, max_pages: usize) -> usize {
    if max_pages > 0 {
        max_pages.min(total)
    } else {
        total
    }
}

/// Page 1 is the start URL itself; later pages append `?page=N`.
pub fn page_url(start_url: &str, page: usize) -> String {
    if page <= 1 {
        start_url.to_string()
    } else {
        format!("{}?page={}", start_url.trim_end_matches('/'), page)
    }
}

/// Scheme and host of the start URL, used to absolutize listing links.
pub fn site_origin(start_url: &str) -> String {
    Url::parse(start_url)
        .ok()
        .filter(|u| u.has_host())
        .map(|u| u.origin().ascii_serialization())
        .unwrap_or_else(|| DEFAULT_ORIGIN.to_string())
}

pub fn normalize_url(href: &str, origin: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", origin, href)
    } else {
        format!("{}/{}", origin, href)
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Job entries on a listing page: the JSON-LD `ItemList` when present,
/// otherwise every distinct `?job=` anchor.
pub fn extract_job_links(html: &str) -> Vec<JobLink> {
    let document = Html::parse_document(html);
    let from_item_list = extract_item_list(&document);
    if !from_item_list.is_empty() {
        return from_item_list;
    }
    extract_job_anchors(&document)
}

fn extract_item_list(document: &Html) -> Vec<JobLink> {
    let Ok(selector) = Selector::parse("script") else {
        return Vec::new();
    };

    for script in document.select(&selector) {
        let text: String = script.text().collect();
        if !item_list_regex().is_match(&text) {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            continue;
        };
        let results: Vec<JobLink> = value["itemListElement"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let item = &entry["item"];
                        let url = item["url"].as_str().filter(|u| !u.is_empty())?;
                        Some(JobLink {
                            href: url.to_string(),
                            title: item["title"].as_str().unwrap_or("").to_string(),
                            company: item["hiringOrganization"]["name"].as_str().unwrap_or("").to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !results.is_empty() {
            return results;
        }
    }
    Vec::new()
}

fn extract_job_anchors(document: &Html) -> Vec<JobLink> {
    let Ok(selector) = Selector::parse(r#"a[href*="?job="]"#) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut results = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !seen.insert(href.to_string()) {
            continue;
        }
        results.push(JobLink {
            href: href.to_string(),
            title: collapse_whitespace(&anchor.text().collect::<String>()),
            company: String::new(),
        });
    }
    results
}

async fn wait_for_job_markers(page: &dyn PageDriver, options: &ScanOptions, log: &RunLog) {
    let found = wait_until(options.marker_timeout, options.marker_poll, move || async move {
        matches!(page.evaluate(JOB_MARKERS_SCRIPT).await, Ok(serde_json::Value::Bool(true)))
    })
    .await;
    if !found {
        log.log(format!(
            "job markers not found: waited {} ms",
            options.marker_timeout.as_millis()
        ));
    }
}

async fn log_empty_page_debug(page: &dyn PageDriver, log: &RunLog) {
    match page.evaluate(PAGE_SNAPSHOT_SCRIPT).await {
        Ok(info) => {
            let title = info["title"].as_str().unwrap_or("");
            let url = info["url"].as_str().unwrap_or("");
            let text = collapse_whitespace(info["text"].as_str().unwrap_or(""));
            log.log(format!("empty page debug: title=\"{}\" url=\"{}\" text=\"{}\"", title, url, text));
        }
        Err(e) => log.log(format!("empty page debug failed: {}", e)),
    }
}

/// Walks the paginated listing and collects unique jobs in discovery order.
///
/// Only a failure to load the start page is fatal; later pages that cannot
/// be loaded are skipped.
pub async fn scan_listing(
    page: &dyn PageDriver,
    options: &ScanOptions,
    log: &RunLog,
    cancel: &CancelToken,
) -> Result<ScanOutcome> {
    log.log(format!("Open start page: {}", options.start_url));
    if !goto_with_retry(page, &options.start_url, &options.nav, log).await {
        return Err(AppError::Navigation("Failed to load start URL.".to_string()));
    }

    let first_html = page.content().await?;
    let total_pages = parse_page_count(&first_html);
    let limit = page_limit(total_pages, options.max_pages);
    log.log(format!("Pages detected: {} (scanning {})", total_pages, limit));

    let origin = site_origin(&options.start_url);
    let mut jobs = JobIndex::new();
    let mut pages_scanned = 0;

    for page_number in 1..=limit {
        cancel.checkpoint()?;

        if page_number > 1 {
            let url = page_url(&options.start_url, page_number);
            log.log(format!("Open page {}/{}: {}", page_number, limit, url));
            if !goto_with_retry(page, &url, &options.nav, log).await {
                log.log(format!("Skipping page {}", page_number));
                continue;
            }
        }

        wait_for_job_markers(page, options, log).await;
        tokio::time::sleep(options.settle_delay).await;

        let html = match page.content().await {
            Ok(html) => html,
            Err(e) => {
                log.log(format!("Failed to read page {}: {}", page_number, e));
                continue;
            }
        };
        pages_scanned += 1;

        let links = extract_job_links(&html);
        if links.is_empty() {
            log_empty_page_debug(page, log).await;
        }

        let found = links.len();
        for link in links {
            jobs.insert(JobLink {
                href: normalize_url(&link.href, &origin),
                ..link
            });
        }
        log.log(format!(
            "Page {}: found {} jobs ({} unique so far)",
            page_number,
            found,
            jobs.len()
        ));
    }

    Ok(ScanOutcome {
        jobs,
        total_pages,
        pages_scanned,
    })
}
