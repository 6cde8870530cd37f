use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

pub const DEFAULT_START_URL: &str = "https://jobs.letsgetrusty.com/";
pub const DEFAULT_MODEL: &str = "openai/gpt-5.1-codex";
pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_HTML_BUDGET: usize = 120_000;
pub const DEFAULT_LOG_CAPACITY: usize = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub llm: LlmSettings,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub recommend: RecommendDefaults,
    pub course: CourseConfig,
}

/// How the crawl obtains its browser when no `browserUrl` is given.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchMode {
    /// Fresh process started and owned by the automation library.
    Isolated,
    /// Started through the OS "open application" call, attached over the debug port.
    OsOpen,
    /// Already running browser reachable at a debugging address.
    ConnectRemote,
}

/// Parameters of one crawl run. Field names follow the JSON a GUI sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrawlConfig {
    pub start_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub http_proxy: Option<String>,
    pub llm_proxy: Option<String>,
    pub chrome_path: Option<String>,
    pub max_pages: usize,
    pub max_jobs: usize,
    pub headless: bool,
    pub browser_url: Option<String>,
    pub user_data_dir: Option<PathBuf>,
    pub nav_timeout_ms: u64,
    pub max_nav_retries: u32,
    /// Characters of cleaned page HTML sent to the extraction model.
    pub html_budget: usize,
    pub launch_mode: LaunchMode,
    pub debug_port: u16,
    pub no_sandbox: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub referer: Option<String>,
    pub title: Option<String>,
    pub temperature: f32,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub api_key_path: Option<PathBuf>,
}

/// Timing knobs for retries, polling and settling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub nav_backoff_ms: u64,
    pub marker_timeout_ms: u64,
    pub marker_poll_ms: u64,
    pub settle_delay_ms: u64,
    pub debug_port_timeout_ms: u64,
    pub debug_port_poll_ms: u64,
    pub launch_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub log_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendDefaults {
    pub limit: usize,
    pub only_open: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseConfig {
    pub max_candidates: usize,
    pub minimal_payload: bool,
    pub llm_fallback: bool,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("jobs-scout"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn default_chrome_path() -> Option<String> {
    if cfg!(target_os = "macos") {
        Some("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome".to_string())
    } else {
        None
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawl: CrawlConfig::default(),
            llm: LlmSettings::default(),
            retry: RetryConfig::default(),
            storage: StorageConfig::default(),
            recommend: RecommendDefaults::default(),
            course: CourseConfig::default(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_url: env_string("START_URL").unwrap_or_else(|| DEFAULT_START_URL.to_string()),
            api_key: None,
            model: env_string("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http_proxy: env_string("BROWSER_PROXY"),
            llm_proxy: env_string("LLM_PROXY"),
            chrome_path: env_string("CHROME_PATH").or_else(default_chrome_path),
            max_pages: env_parse("MAX_PAGES", 0),
            max_jobs: env_parse("MAX_JOBS", 0),
            headless: env_parse("HEADLESS", false),
            browser_url: env_string("BROWSER_URL"),
            user_data_dir: env_string("CHROME_USER_DATA_DIR").map(PathBuf::from),
            nav_timeout_ms: env_parse("NAV_TIMEOUT_MS", 90_000),
            max_nav_retries: env_parse("MAX_NAV_RETRIES", 2),
            html_budget: env_parse("HTML_BUDGET", DEFAULT_HTML_BUDGET),
            launch_mode: match env_string("LAUNCH_MODE").as_deref() {
                Some("os-open") => LaunchMode::OsOpen,
                Some("connect-remote") => LaunchMode::ConnectRemote,
                _ => LaunchMode::Isolated,
            },
            debug_port: env_parse("DEBUG_PORT", 9222),
            no_sandbox: env_parse("NO_SANDBOX", false),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: env_string("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE_URL.to_string()),
            referer: env_string("OPENROUTER_REFERER"),
            title: env_string("OPENROUTER_TITLE").or_else(|| Some("Jobs Scout".to_string())),
            temperature: env_parse("LLM_TEMPERATURE", 0.2),
            timeout_ms: env_parse("LLM_TIMEOUT_MS", 60_000),
            max_retries: env_parse("LLM_MAX_RETRIES", 2),
            retry_backoff_ms: env_parse("LLM_RETRY_BACKOFF_MS", 1_000),
            api_key_path: env_string("OPENROUTER_API_KEY_PATH").map(PathBuf::from),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            nav_backoff_ms: env_parse("NAV_BACKOFF_MS", 1_000),
            marker_timeout_ms: env_parse("MARKER_TIMEOUT_MS", 12_000),
            marker_poll_ms: env_parse("MARKER_POLL_MS", 250),
            settle_delay_ms: env_parse("SETTLE_DELAY_MS", 800),
            debug_port_timeout_ms: env_parse("DEBUG_PORT_TIMEOUT_MS", 20_000),
            debug_port_poll_ms: env_parse("DEBUG_PORT_POLL_MS", 300),
            launch_attempts: env_parse("BROWSER_LAUNCH_ATTEMPTS", 3),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: env_string("JOBS_SCOUT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            log_capacity: env_parse("RUN_LOG_CAPACITY", DEFAULT_LOG_CAPACITY),
        }
    }
}

impl Default for RecommendDefaults {
    fn default() -> Self {
        Self {
            limit: env_parse("RECOMMEND_LIMIT", 80),
            only_open: env_parse("RECOMMEND_ONLY_OPEN", true),
        }
    }
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            max_candidates: env_parse("MAX_CANDIDATES", 300),
            minimal_payload: env_parse("LLM_MINIMAL_PAYLOAD", true),
            llm_fallback: env_parse("LLM_FALLBACK", true),
        }
    }
}

impl RetryConfig {
    pub fn nav_backoff(&self) -> Duration {
        Duration::from_millis(self.nav_backoff_ms)
    }

    pub fn marker_timeout(&self) -> Duration {
        Duration::from_millis(self.marker_timeout_ms)
    }

    pub fn marker_poll(&self) -> Duration {
        Duration::from_millis(self.marker_poll_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CrawlConfig {
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.nav_timeout_ms)
    }

    /// The profile directory used when the caller did not pick one.
    pub fn resolved_user_data_dir(&self, data_dir: &Path) -> PathBuf {
        self.user_data_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("chrome-profile"))
    }

    /// `browserUrl` always wins over the configured launch mode.
    pub fn effective_launch_mode(&self) -> LaunchMode {
        if self.browser_url.as_deref().map_or(false, |u| !u.trim().is_empty()) {
            LaunchMode::ConnectRemote
        } else {
            self.launch_mode
        }
    }
}

impl Config {
    /// Loads defaults from the environment (including `.env`) and layers an
    /// optional TOML file underneath: values present in the environment win.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        let env_config = Config::default();

        let path = match config_path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let candidate = PathBuf::from("config.toml");
                candidate.exists().then_some(candidate)
            }
        };

        let Some(path) = path else {
            return Ok(env_config);
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let file_config: Config = toml::from_str(&contents).map_err(|e| {
            AppError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::info!("Loaded configuration from {}", path.display());
        Ok(Self::merge_configs(file_config, env_config))
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.crawl.start_url.starts_with("http://") && !self.crawl.start_url.starts_with("https://") {
            errors.push("Invalid start URL format".to_string());
        }

        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://") {
            errors.push("Invalid LLM base URL format".to_string());
        }

        if self.crawl.model.trim().is_empty() {
            errors.push("Model must not be empty".to_string());
        }

        if self.crawl.nav_timeout_ms == 0 {
            errors.push("Navigation timeout must be greater than 0".to_string());
        }

        if self.llm.timeout_ms == 0 {
            errors.push("LLM timeout must be greater than 0".to_string());
        }

        if self.crawl.launch_mode == LaunchMode::ConnectRemote && self.crawl.browser_url.is_none() {
            errors.push("connect-remote launch mode requires browserUrl".to_string());
        }

        if self.crawl.debug_port == 0 {
            errors.push("Debug port must be greater than 0".to_string());
        }

        if self.crawl.html_budget == 0 {
            errors.push("HTML budget must be greater than 0".to_string());
        }

        if self.storage.log_capacity == 0 {
            errors.push("Run log capacity must be greater than 0".to_string());
        }

        if self.retry.debug_port_poll_ms == 0 || self.retry.marker_poll_ms == 0 {
            errors.push("Poll intervals must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn merge_configs(file_config: Config, env_config: Config) -> Config {
        let set = |key: &str| env_string(key).is_some();
        let mut merged = file_config;

        if set("START_URL") {
            merged.crawl.start_url = env_config.crawl.start_url;
        }
        if set("OPENROUTER_MODEL") {
            merged.crawl.model = env_config.crawl.model;
        }
        if set("BROWSER_PROXY") {
            merged.crawl.http_proxy = env_config.crawl.http_proxy;
        }
        if set("LLM_PROXY") {
            merged.crawl.llm_proxy = env_config.crawl.llm_proxy;
        }
        if set("CHROME_PATH") {
            merged.crawl.chrome_path = env_config.crawl.chrome_path;
        }
        if set("MAX_PAGES") {
            merged.crawl.max_pages = env_config.crawl.max_pages;
        }
        if set("MAX_JOBS") {
            merged.crawl.max_jobs = env_config.crawl.max_jobs;
        }
        if set("HEADLESS") {
            merged.crawl.headless = env_config.crawl.headless;
        }
        if set("BROWSER_URL") {
            merged.crawl.browser_url = env_config.crawl.browser_url;
        }
        if set("CHROME_USER_DATA_DIR") {
            merged.crawl.user_data_dir = env_config.crawl.user_data_dir;
        }
        if set("NAV_TIMEOUT_MS") {
            merged.crawl.nav_timeout_ms = env_config.crawl.nav_timeout_ms;
        }
        if set("MAX_NAV_RETRIES") {
            merged.crawl.max_nav_retries = env_config.crawl.max_nav_retries;
        }
        if set("HTML_BUDGET") {
            merged.crawl.html_budget = env_config.crawl.html_budget;
        }
        if set("LAUNCH_MODE") {
            merged.crawl.launch_mode = env_config.crawl.launch_mode;
        }
        if set("DEBUG_PORT") {
            merged.crawl.debug_port = env_config.crawl.debug_port;
        }
        if set("NO_SANDBOX") {
            merged.crawl.no_sandbox = env_config.crawl.no_sandbox;
        }
        if set("OPENROUTER_BASE_URL") {
            merged.llm.base_url = env_config.llm.base_url;
        }
        if set("OPENROUTER_REFERER") {
            merged.llm.referer = env_config.llm.referer;
        }
        if set("OPENROUTER_TITLE") {
            merged.llm.title = env_config.llm.title;
        }
        if set("LLM_TIMEOUT_MS") {
            merged.llm.timeout_ms = env_config.llm.timeout_ms;
        }
        if set("LLM_MAX_RETRIES") {
            merged.llm.max_retries = env_config.llm.max_retries;
        }
        if set("OPENROUTER_API_KEY_PATH") {
            merged.llm.api_key_path = env_config.llm.api_key_path;
        }
        if set("JOBS_SCOUT_DATA_DIR") {
            merged.storage.data_dir = env_config.storage.data_dir;
        }
        if set("RECOMMEND_LIMIT") {
            merged.recommend.limit = env_config.recommend.limit;
        }
        if set("MAX_CANDIDATES") {
            merged.course.max_candidates = env_config.course.max_candidates;
        }

        merged
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| AppError::Configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }
}
