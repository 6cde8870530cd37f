use super::detail::{CollectOptions, CollectOutcome, ExtractionSettings, JobDetailCollector};
use super::listing::{scan_listing, ScanOptions};
use crate::browser_ai::{BrowserHandle, BrowserSession, NavOptions, SessionParams, WaitCondition};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::llm::{resolve_api_key, ChatCompletion};
use crate::models::CrawlSummary;
use crate::run::{CancelToken, LogSink, RunGuard, RunLog};
use crate::storage::JobStore;
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Everything one crawl needs, derived from the configuration.
#[derive(Debug, Clone)]
pub struct CrawlPlan {
    pub scan: ScanOptions,
    pub collect: CollectOptions,
}

impl CrawlPlan {
    pub fn from_config(config: &Config, api_key: String) -> Self {
        let nav = NavOptions {
            wait: WaitCondition::DomContentLoaded,
            timeout: config.crawl.nav_timeout(),
            max_attempts: config.crawl.max_nav_retries,
            backoff_step: config.retry.nav_backoff(),
        };
        Self {
            scan: ScanOptions {
                start_url: config.crawl.start_url.clone(),
                max_pages: config.crawl.max_pages,
                nav: nav.clone(),
                marker_timeout: config.retry.marker_timeout(),
                marker_poll: config.retry.marker_poll(),
                settle_delay: config.retry.settle_delay(),
            },
            collect: CollectOptions {
                max_jobs: config.crawl.max_jobs,
                nav,
                html_budget: config.crawl.html_budget,
                extraction: ExtractionSettings {
                    api_key,
                    model: config.crawl.model.clone(),
                    proxy: config.crawl.llm_proxy.clone(),
                    timeout: config.llm.timeout(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOutcome {
    pub total_pages: usize,
    pub pages_scanned: usize,
    pub jobs_found: usize,
    pub collected: CollectOutcome,
}

/// Scan the listing on one tab, then collect every job through the same tab.
pub async fn run_pipeline(
    browser: &dyn BrowserHandle,
    llm: &dyn ChatCompletion,
    store: &JobStore,
    plan: &CrawlPlan,
    log: &RunLog,
    cancel: &CancelToken,
) -> Result<PipelineOutcome> {
    let page = browser.new_page().await?;

    let result = async {
        let scan = scan_listing(page.as_ref(), &plan.scan, log, cancel).await?;
        log.log(format!("unique jobs={}", scan.jobs.len()));

        let collector = JobDetailCollector {
            browser,
            llm,
            store,
            options: &plan.collect,
            log,
        };
        let collected = collector.collect(page.as_ref(), &scan.jobs, cancel).await?;

        Ok::<_, AppError>(PipelineOutcome {
            total_pages: scan.total_pages,
            pages_scanned: scan.pages_scanned,
            jobs_found: scan.jobs.len(),
            collected,
        })
    }
    .await;

    if let Err(e) = page.close().await {
        log.log(format!("failed to close listing tab: {}", e));
    }
    result
}

/// Admits one crawl per process and keeps the log of the latest run.
pub struct CrawlRunner {
    guard: RunGuard,
    active_cancel: Mutex<Option<CancelToken>>,
    last_log: Mutex<Option<Arc<RunLog>>>,
}

impl Default for CrawlRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlRunner {
    pub fn new() -> Self {
        Self {
            guard: RunGuard::global(),
            active_cancel: Mutex::new(None),
            last_log: Mutex::new(None),
        }
    }

    /// True while any crawl in this process is active.
    pub fn is_running(&self) -> bool {
        self.guard.is_active()
    }

    /// Requests cancellation of the active run. Returns `false` when idle.
    pub fn cancel(&self) -> bool {
        match self.active_cancel.lock().ok().and_then(|c| c.clone()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Log of the current or most recent run.
    pub fn last_log(&self) -> Option<Arc<RunLog>> {
        self.last_log.lock().ok().and_then(|l| l.clone())
    }

    pub fn export_log(&self, path: &Path) -> Result<()> {
        match self.last_log() {
            Some(log) => log.export(path),
            None => Err(AppError::NotFound("no crawl has run yet".to_string())),
        }
    }

    fn begin(&self, config: &Config, sink: Option<LogSink>, cancel: &CancelToken) -> Arc<RunLog> {
        if let Ok(mut active) = self.active_cancel.lock() {
            *active = Some(cancel.clone());
        }
        let log = Arc::new(match sink {
            Some(sink) => RunLog::with_sink(config.storage.log_capacity, sink),
            None => RunLog::new(config.storage.log_capacity),
        });
        if let Ok(mut last) = self.last_log.lock() {
            *last = Some(Arc::clone(&log));
        }
        log
    }

    fn end(&self) {
        if let Ok(mut active) = self.active_cancel.lock() {
            *active = None;
        }
    }

    /// Runs a crawl end to end: acquire a browser the configured way, scan,
    /// collect, then always release the browser.
    pub async fn start(
        &self,
        config: &Config,
        llm: &dyn ChatCompletion,
        sink: Option<LogSink>,
        cancel: CancelToken,
    ) -> Result<CrawlSummary> {
        let _active = self.guard.try_acquire()?;
        let log = self.begin(config, sink, &cancel);
        let result = run_with_session(config, llm, &log, &cancel).await;
        self.end();
        result
    }

    /// Same as `start`, on a browser the caller already owns and releases.
    pub async fn start_with_browser(
        &self,
        browser: &dyn BrowserHandle,
        config: &Config,
        llm: &dyn ChatCompletion,
        sink: Option<LogSink>,
        cancel: CancelToken,
    ) -> Result<CrawlSummary> {
        let _active = self.guard.try_acquire()?;
        let log = self.begin(config, sink, &cancel);
        let result = run_on_browser(browser, config, llm, &log, &cancel).await;
        self.end();
        result
    }
}

async fn run_with_session(
    config: &Config,
    llm: &dyn ChatCompletion,
    log: &RunLog,
    cancel: &CancelToken,
) -> Result<CrawlSummary> {
    let api_key = required_api_key(config, log)?;
    let store = JobStore::new(&config.storage.data_dir)?;

    let params = SessionParams::from_config(&config.crawl, &config.retry, &config.storage.data_dir);
    let session = match BrowserSession::acquire(&params, log).await {
        Ok(session) => session,
        Err(e) => {
            log.log(format!("Browser session failed: {}", e));
            return Err(e);
        }
    };

    let started_at = Utc::now();
    let plan = CrawlPlan::from_config(config, api_key);
    let result = run_pipeline(&session, llm, &store, &plan, log, cancel).await;
    session.release(log).await;

    finish(result, &store, log, started_at)
}

async fn run_on_browser(
    browser: &dyn BrowserHandle,
    config: &Config,
    llm: &dyn ChatCompletion,
    log: &RunLog,
    cancel: &CancelToken,
) -> Result<CrawlSummary> {
    let api_key = required_api_key(config, log)?;
    let store = JobStore::new(&config.storage.data_dir)?;

    let started_at = Utc::now();
    let plan = CrawlPlan::from_config(config, api_key);
    let result = run_pipeline(browser, llm, &store, &plan, log, cancel).await;

    finish(result, &store, log, started_at)
}

fn required_api_key(config: &Config, log: &RunLog) -> Result<String> {
    match resolve_api_key(config.crawl.api_key.as_deref(), config.llm.api_key_path.as_deref())? {
        Some(key) => Ok(key),
        None => {
            log.log("Missing OpenRouter API key.");
            Err(AppError::MissingApiKey)
        }
    }
}

fn finish(
    result: Result<PipelineOutcome>,
    store: &JobStore,
    log: &RunLog,
    started_at: chrono::DateTime<Utc>,
) -> Result<CrawlSummary> {
    match result {
        Ok(outcome) => {
            log.log(format!(
                "Done: {} records written to {}",
                outcome.collected.records_written,
                store.path().display()
            ));
            Ok(CrawlSummary {
                run_id: log.run_id(),
                output_path: store.path().to_path_buf(),
                pages_scanned: outcome.pages_scanned,
                jobs_found: outcome.jobs_found,
                records_written: outcome.collected.records_written,
                started_at,
                finished_at: Utc::now(),
            })
        }
        Err(e) if e.is_cancelled() => {
            log.log("Cancelled");
            Err(e)
        }
        Err(e) => {
            log.log(format!("Crawl failed: {}", e));
            Err(e)
        }
    }
}
