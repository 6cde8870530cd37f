#![allow(dead_code)]

use async_trait::async_trait;
use jobs_scout_lib::browser_ai::{BrowserHandle, FrameRef, PageDriver, WaitCondition};
use jobs_scout_lib::crawl::detail::APPLY_LINK_SCRIPT;
use jobs_scout_lib::crawl::listing::{JOB_MARKERS_SCRIPT, PAGE_SNAPSHOT_SCRIPT};
use jobs_scout_lib::llm::{ChatCompletion, ChatRequest};
use jobs_scout_lib::run::{CancelToken, LogSink};
use jobs_scout_lib::{AppError, Config, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

pub const START_URL: &str = "https://jobs.test/";

/// Crawls share one process-wide slot, so tests that crawl take turns.
pub async fn crawl_turn() -> tokio::sync::MutexGuard<'static, ()> {
    static TURN: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();
    TURN.get_or_init(|| tokio::sync::Mutex::new(())).lock().await
}

/// A scripted web: URL to HTML, URLs that never load, and per-frame
/// candidate lists for course pages.
#[derive(Default)]
pub struct Site {
    pub pages: HashMap<String, String>,
    pub failing: HashSet<String>,
    /// `None` marks a frame that cannot be evaluated.
    pub frames: Vec<(String, Option<Value>)>,
    pub goto_delay: Duration,
}

impl Site {
    pub fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), html.into());
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn frame(mut self, url: &str, items: Option<Value>) -> Self {
        self.frames.push((url.to_string(), items));
        self
    }
}

#[derive(Default)]
pub struct Traffic {
    pub visits: Mutex<Vec<String>>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl Traffic {
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakePage {
    site: Arc<Site>,
    traffic: Arc<Traffic>,
    current: Mutex<String>,
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str, _wait: WaitCondition, _timeout: Duration) -> Result<()> {
        if !self.site.goto_delay.is_zero() {
            tokio::time::sleep(self.site.goto_delay).await;
        }
        self.traffic.visits.lock().unwrap().push(url.to_string());
        if self.site.failing.contains(url) {
            return Err(AppError::Navigation(format!("net::ERR_CONNECTION_RESET at {}", url)));
        }
        *self.current.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        let current = self.current.lock().unwrap().clone();
        Ok(self
            .site
            .pages
            .get(&current)
            .cloned()
            .unwrap_or_else(|| "<html><body></body></html>".to_string()))
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        if script == JOB_MARKERS_SCRIPT {
            return Ok(Value::Bool(true));
        }
        if script == APPLY_LINK_SCRIPT {
            return Ok(Value::String(String::new()));
        }
        if script == PAGE_SNAPSHOT_SCRIPT {
            let current = self.current.lock().unwrap().clone();
            return Ok(json!({ "title": "Jobs", "url": current, "text": "No jobs   right now" }));
        }
        Ok(Value::Null)
    }

    async fn frames(&self) -> Result<Vec<FrameRef>> {
        Ok(self
            .site
            .frames
            .iter()
            .enumerate()
            .map(|(index, (url, _))| FrameRef {
                index,
                id: format!("frame-{}", index),
                url: url.clone(),
            })
            .collect())
    }

    async fn evaluate_in_frame(&self, frame: &FrameRef, _expression: &str) -> Result<Value> {
        match self.site.frames.get(frame.index) {
            Some((_, Some(items))) => Ok(items.clone()),
            _ => Err(AppError::Browser(format!("Frame {} unavailable", frame.url))),
        }
    }

    async fn close(&self) -> Result<()> {
        self.traffic.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeBrowser {
    pub site: Arc<Site>,
    pub traffic: Arc<Traffic>,
}

impl FakeBrowser {
    pub fn new(site: Site) -> Self {
        Self {
            site: Arc::new(site),
            traffic: Arc::new(Traffic::default()),
        }
    }

    pub fn page(&self) -> FakePage {
        FakePage {
            site: Arc::clone(&self.site),
            traffic: Arc::clone(&self.traffic),
            current: Mutex::new(String::new()),
        }
    }
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageDriver>> {
        self.traffic.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.page()))
    }
}

/// Replies with a fixed text and records every request.
pub struct FakeLlm {
    reply: Mutex<Box<dyn FnMut(&ChatRequest) -> Result<String> + Send>>,
    pub requests: Mutex<Vec<ChatRequest>>,
    cancel_on_call: Option<CancelToken>,
}

impl FakeLlm {
    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::with(move |_| Ok(text.clone()))
    }

    pub fn with<F>(reply: F) -> Self
    where
        F: FnMut(&ChatRequest) -> Result<String> + Send + 'static,
    {
        Self {
            reply: Mutex::new(Box::new(reply)),
            requests: Mutex::new(Vec::new()),
            cancel_on_call: None,
        }
    }

    /// Cancels `token` as soon as the first request arrives.
    pub fn cancelling(mut self, token: CancelToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_user_payload(&self) -> Value {
        let requests = self.requests.lock().unwrap();
        let request = requests.last().expect("at least one request");
        let user = request.messages.iter().find(|m| m.role == "user").expect("user message");
        serde_json::from_str(&user.content).expect("user message is JSON")
    }
}

#[async_trait]
impl ChatCompletion for FakeLlm {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        let mut reply = self.reply.lock().unwrap();
        (*reply)(request)
    }
}

pub fn extraction_reply() -> String {
    json!({
        "title": "Senior Rust Engineer",
        "company": "Ferris Labs",
        "location": "Remote (EU)",
        "summary": "Build async services.",
        "responsibilities": ["Own the ingestion pipeline"],
        "requirements": ["Rust", "tokio"],
        "benefits": [],
        "isClosed": false,
        "closedReason": ""
    })
    .to_string()
}

pub fn listing_html(jobs: &[(&str, &str)], last_page: usize) -> String {
    let mut html = String::from("<html><body><main>");
    for (href, title) in jobs {
        html.push_str(&format!("<div class=\"job\"><a href=\"{}\">{}</a></div>", href, title));
    }
    html.push_str("</main><nav>");
    for page in 2..=last_page {
        html.push_str(&format!("<a href=\"/?page={}\">{}</a>", page, page));
    }
    html.push_str("</nav></body></html>");
    html
}

pub fn job_html(apply_href: Option<&str>) -> String {
    match apply_href {
        Some(href) => format!(
            "<html><body><h1>Job</h1><a class=\"button\" href=\"{}\">Apply for this position</a></body></html>",
            href
        ),
        None => "<html><body><h1>Job</h1><p>Contact us by carrier pigeon.</p></body></html>".to_string(),
    }
}

pub fn test_config(data_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.crawl.start_url = START_URL.to_string();
    config.crawl.api_key = Some("sk-test".to_string());
    config.crawl.model = "test/model".to_string();
    config.crawl.llm_proxy = None;
    config.crawl.max_pages = 0;
    config.crawl.max_jobs = 0;
    config.crawl.max_nav_retries = 1;
    config.retry.nav_backoff_ms = 0;
    config.retry.marker_timeout_ms = 50;
    config.retry.marker_poll_ms = 5;
    config.retry.settle_delay_ms = 0;
    config.storage.data_dir = data_dir.to_path_buf();
    config
}

/// A sink that keeps every line for later assertions.
pub fn capture_sink() -> (LogSink, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let target = Arc::clone(&lines);
    let sink: LogSink = Arc::new(move |line: &str| target.lock().unwrap().push(line.to_string()));
    (sink, lines)
}
