use crate::browser_ai::{goto_with_retry, BrowserHandle, BrowserSession, NavOptions, PageDriver, SessionParams, WaitCondition};
use crate::config::{Config, DEFAULT_MODEL};
use crate::course::{select_course_items, CourseSelectionSettings};
use crate::crawl::CrawlRunner;
use crate::error::{AppError, Result};
use crate::llm::{resolve_api_key, ChatCompletion, LlmClient};
use crate::models::{Candidate, CrawlSummary, JobRecord, RecommendRequest, RecommendationResult};
use crate::recommend;
use crate::run::{CancelToken, LogSink, RunLog};
use crate::storage::{JobStore, ResumeSource, ResumeStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// The object a GUI or CLI holds: configuration, the crawl runner, both
/// stores and the model client.
pub struct JobsScout {
    config: Config,
    llm: Arc<dyn ChatCompletion>,
    runner: CrawlRunner,
    jobs: JobStore,
    resume: ResumeStore,
}

impl JobsScout {
    pub fn new(config: Config) -> Result<Self> {
        let llm: Arc<dyn ChatCompletion> = Arc::new(LlmClient::new(config.llm.clone()));
        Self::with_llm(config, llm)
    }

    pub fn with_llm(config: Config, llm: Arc<dyn ChatCompletion>) -> Result<Self> {
        let jobs = JobStore::new(&config.storage.data_dir)?;
        let resume = ResumeStore::new(&config.storage.data_dir)?;
        info!("Jobs Scout data directory: {}", config.storage.data_dir.display());
        Ok(Self {
            config,
            llm,
            runner: CrawlRunner::new(),
            jobs,
            resume,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn jobs_path(&self) -> &Path {
        self.jobs.path()
    }

    pub fn is_crawling(&self) -> bool {
        self.runner.is_running()
    }

    pub async fn start_crawl(&self, sink: Option<LogSink>) -> Result<CrawlSummary> {
        self.runner
            .start(&self.config, self.llm.as_ref(), sink, CancelToken::new())
            .await
    }

    /// Crawl through a browser the caller manages.
    pub async fn start_crawl_with_browser(
        &self,
        browser: &dyn BrowserHandle,
        sink: Option<LogSink>,
    ) -> Result<CrawlSummary> {
        self.runner
            .start_with_browser(browser, &self.config, self.llm.as_ref(), sink, CancelToken::new())
            .await
    }

    pub fn cancel_crawl(&self) -> bool {
        self.runner.cancel()
    }

    pub fn export_log(&self, path: &Path) -> Result<()> {
        self.runner.export_log(path)
    }

    pub fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        self.jobs.load_jobs()
    }

    pub fn save_resume(&self, source: &ResumeSource) -> Result<PathBuf> {
        self.resume.save(source)
    }

    pub fn load_resume(&self) -> Result<String> {
        self.resume.load()
    }

    /// Recommends from the stored jobs using the saved resume.
    pub async fn recommend(&self, user_message: &str) -> Result<RecommendationResult> {
        let request = RecommendRequest {
            api_key: self.config.crawl.api_key.clone(),
            model: self.config.crawl.model.clone(),
            llm_proxy: self.config.crawl.llm_proxy.clone(),
            user_message: user_message.to_string(),
            ..Default::default()
        };
        self.recommend_with(request).await
    }

    /// Fills in stored jobs and the saved resume where the request leaves them empty.
    pub async fn recommend_with(&self, mut request: RecommendRequest) -> Result<RecommendationResult> {
        if request.jobs.is_empty() {
            request.jobs = self.jobs.load_jobs()?;
        }
        request.resume_text = self.resume.resolve(&request.resume_text)?;
        recommend::recommend(self.llm.as_ref(), &request, &self.config.llm, &self.config.recommend).await
    }

    fn course_settings(&self, course_url: &str) -> Result<CourseSelectionSettings> {
        let api_key = resolve_api_key(
            self.config.crawl.api_key.as_deref(),
            self.config.llm.api_key_path.as_deref(),
        )?
        .ok_or(AppError::MissingApiKey)?;
        let model = if self.config.crawl.model.trim().is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            self.config.crawl.model.clone()
        };
        Ok(CourseSelectionSettings {
            course_url: course_url.to_string(),
            api_key,
            model,
            proxy: self.config.crawl.llm_proxy.clone(),
            timeout: self.config.llm.timeout(),
            minimal_payload: self.config.course.minimal_payload,
        })
    }

    /// Opens the course page in a browser obtained the configured way and
    /// returns its lesson entries.
    pub async fn select_course(&self, course_url: &str, sink: Option<LogSink>) -> Result<Vec<Candidate>> {
        let settings = self.course_settings(course_url)?;
        let log = match sink {
            Some(sink) => RunLog::with_sink(self.config.storage.log_capacity, sink),
            None => RunLog::new(self.config.storage.log_capacity),
        };

        let params = SessionParams::from_config(&self.config.crawl, &self.config.retry, &self.config.storage.data_dir);
        let session = BrowserSession::acquire(&params, &log).await?;
        let result = self.select_with_browser(&session, settings, &log).await;
        session.release(&log).await;

        if let Err(e) = &result {
            error!("Course selection failed: {}", e);
        }
        result
    }

    /// Lesson entries of a page that is already showing the course.
    pub async fn select_course_on_page(&self, page: &dyn PageDriver, course_url: &str) -> Result<Vec<Candidate>> {
        let settings = self.course_settings(course_url)?;
        select_course_items(page, self.llm.as_ref(), settings, &self.config.course).await
    }

    async fn select_with_browser(
        &self,
        browser: &dyn BrowserHandle,
        settings: CourseSelectionSettings,
        log: &RunLog,
    ) -> Result<Vec<Candidate>> {
        let page = browser.new_page().await?;
        let nav = NavOptions {
            wait: WaitCondition::Load,
            timeout: self.config.crawl.nav_timeout(),
            max_attempts: self.config.crawl.max_nav_retries,
            backoff_step: self.config.retry.nav_backoff(),
        };

        let result = if goto_with_retry(page.as_ref(), &settings.course_url, &nav, log).await {
            tokio::time::sleep(self.config.retry.settle_delay()).await;
            select_course_items(page.as_ref(), self.llm.as_ref(), settings, &self.config.course).await
        } else {
            Err(AppError::Navigation(format!("Failed to load course page {}", settings.course_url)))
        };

        if let Err(e) = page.close().await {
            log.log(format!("failed to close course tab: {}", e));
        }
        result
    }
}
