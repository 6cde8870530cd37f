use super::cdp_client::{spawn_handler, BrowserHandle, CdpPage, PageDriver};
use super::chrome::ChromeController;
use crate::config::{CrawlConfig, LaunchMode, RetryConfig};
use crate::error::{AppError, Result};
use crate::llm::normalize_http_proxy;
use crate::run::RunLog;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything needed to obtain a browser in one of the three launch modes.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub mode: LaunchMode,
    pub chrome_path: Option<String>,
    pub user_data_dir: PathBuf,
    pub http_proxy: Option<String>,
    pub headless: bool,
    pub no_sandbox: bool,
    pub browser_url: Option<String>,
    pub debug_port: u16,
    pub debug_port_timeout: Duration,
    pub debug_port_poll: Duration,
    pub launch_attempts: u32,
    pub request_timeout: Duration,
}

impl SessionParams {
    pub fn from_config(crawl: &CrawlConfig, retry: &RetryConfig, data_dir: &Path) -> Self {
        Self {
            mode: crawl.effective_launch_mode(),
            chrome_path: crawl.chrome_path.clone(),
            user_data_dir: crawl.resolved_user_data_dir(data_dir),
            http_proxy: crawl.http_proxy.clone(),
            headless: crawl.headless,
            no_sandbox: crawl.no_sandbox,
            browser_url: crawl.browser_url.clone(),
            debug_port: crawl.debug_port,
            debug_port_timeout: Duration::from_millis(retry.debug_port_timeout_ms),
            debug_port_poll: Duration::from_millis(retry.debug_port_poll_ms),
            launch_attempts: retry.launch_attempts.max(1),
            request_timeout: crawl.nav_timeout(),
        }
    }

    /// Flags shared by the isolated and OS-open launches.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-crash-reporter",
            "--disable-breakpad",
            "--disable-features=Crashpad",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if self.no_sandbox {
            args.push("--no-sandbox".to_string());
        }
        if let Some(proxy) = self.http_proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            args.push(format!("--proxy-server={}", normalize_http_proxy(proxy)));
        }
        args
    }
}

/// A controllable browser plus the knowledge of how it was obtained, so that
/// `release` can undo exactly that.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    mode: LaunchMode,
    debug_port: u16,
    user_data_dir: PathBuf,
}

impl BrowserSession {
    pub async fn acquire(params: &SessionParams, log: &RunLog) -> Result<Self> {
        match params.mode {
            LaunchMode::ConnectRemote => Self::connect_remote(params, log).await,
            LaunchMode::Isolated => Self::launch_isolated(params, log).await,
            LaunchMode::OsOpen => Self::launch_via_open(params, log).await,
        }
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    async fn connect_remote(params: &SessionParams, log: &RunLog) -> Result<Self> {
        let url = params
            .browser_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AppError::Configuration("browserUrl is required to connect".to_string()))?;

        let ws_url = resolve_ws_url(url, params.request_timeout).await?;
        log.log(format!("Connecting to browser at {}", url));
        let (browser, handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| AppError::Browser(format!("Failed to connect to browser: {}", e)))?;

        Ok(Self {
            browser,
            handler: spawn_handler(handler),
            mode: LaunchMode::ConnectRemote,
            debug_port: params.debug_port,
            user_data_dir: params.user_data_dir.clone(),
        })
    }

    async fn launch_isolated(params: &SessionParams, log: &RunLog) -> Result<Self> {
        if let Some(path) = params.chrome_path.as_deref() {
            if !Path::new(path).exists() {
                return Err(AppError::ExecutableNotFound(path.to_string()));
            }
        }

        fs::create_dir_all(&params.user_data_dir)
            .map_err(|e| AppError::Browser(format!("Failed to create profile directory: {}", e)))?;
        handle_singleton_lock(&params.user_data_dir)?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&params.user_data_dir)
            .request_timeout(params.request_timeout)
            .args(params.launch_args());
        if let Some(path) = params.chrome_path.as_deref() {
            builder = builder.chrome_executable(path);
        }
        builder = if params.headless {
            builder.headless_mode(HeadlessMode::New)
        } else {
            builder.with_head()
        };
        let config = builder
            .build()
            .map_err(|e| AppError::Browser(format!("Failed to build browser config: {}", e)))?;

        log.log(format!(
            "Launching browser (headless={}) with profile {}",
            params.headless,
            params.user_data_dir.display()
        ));

        let mut last_error = None;
        for attempt in 1..=params.launch_attempts {
            match Browser::launch(config.clone()).await {
                Ok((browser, handler)) => {
                    return Ok(Self {
                        browser,
                        handler: spawn_handler(handler),
                        mode: LaunchMode::Isolated,
                        debug_port: params.debug_port,
                        user_data_dir: params.user_data_dir.clone(),
                    });
                }
                Err(e) => {
                    log.log(format!("Launch attempt {} failed: {}", attempt, e));
                    last_error = Some(e);
                    if attempt < params.launch_attempts {
                        tokio::time::sleep(Duration::from_millis(1000 * attempt as u64)).await;
                        let _ = handle_singleton_lock(&params.user_data_dir);
                    }
                }
            }
        }

        Err(AppError::Browser(format!(
            "Failed to launch browser after {} attempts: {}",
            params.launch_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "Unknown error".to_string())
        )))
    }

    async fn launch_via_open(params: &SessionParams, log: &RunLog) -> Result<Self> {
        fs::create_dir_all(&params.user_data_dir)
            .map_err(|e| AppError::Browser(format!("Failed to create profile directory: {}", e)))?;

        let mut args = vec![
            format!("--remote-debugging-port={}", params.debug_port),
            format!("--user-data-dir={}", params.user_data_dir.display()),
        ];
        args.extend(params.launch_args());
        if params.headless {
            args.push("--headless=new".to_string());
        }

        log.log(format!("Launching browser via OS open on port {}", params.debug_port));
        ChromeController::open_application(params.chrome_path.as_deref(), &args)?;

        let attached = async {
            let ws_url =
                wait_for_debug_port(params.debug_port, params.debug_port_timeout, params.debug_port_poll).await?;
            Browser::connect(ws_url)
                .await
                .map_err(|e| AppError::Browser(format!("Failed to attach to browser: {}", e)))
        }
        .await;

        match attached {
            Ok((browser, handler)) => Ok(Self {
                browser,
                handler: spawn_handler(handler),
                mode: LaunchMode::OsOpen,
                debug_port: params.debug_port,
                user_data_dir: params.user_data_dir.clone(),
            }),
            Err(e) => {
                log.log(format!("Browser not reachable, cleaning up: {}", e));
                report_cleanup(params.debug_port, &params.user_data_dir, log);
                Err(e)
            }
        }
    }

    /// Undoes the acquisition: detach from a remote browser, close a launched
    /// one, and hunt down what an OS-open launch left behind. Problems are
    /// logged, never returned.
    pub async fn release(mut self, log: &RunLog) {
        match self.mode {
            LaunchMode::ConnectRemote => {
                self.handler.abort();
                log.log("Detached from remote browser");
            }
            LaunchMode::Isolated => {
                if let Err(e) = self.browser.close().await {
                    log.log(format!("Failed to close browser: {}", e));
                }
                let _ = self.browser.wait().await;
                self.handler.abort();
                log.log("Browser closed");
            }
            LaunchMode::OsOpen => {
                if let Err(e) = self.browser.close().await {
                    log.log(format!("Failed to close browser: {}", e));
                }
                self.handler.abort();
                report_cleanup(self.debug_port, &self.user_data_dir, log);
            }
        }
    }
}

#[async_trait]
impl BrowserHandle for BrowserSession {
    async fn new_page(&self) -> Result<Box<dyn PageDriver>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::Browser(format!("Failed to create new page: {}", e)))?;
        Ok(Box::new(CdpPage::new(page)))
    }
}

fn report_cleanup(port: u16, user_data_dir: &Path, log: &RunLog) {
    let report = ChromeController::terminate_orphaned_browser(port, user_data_dir);
    for pid in &report.terminated {
        log.log(format!("Closed chrome pid={}", pid));
    }
    for problem in &report.problems {
        log.log(format!("Browser cleanup: {}", problem));
    }
    if report.terminated.is_empty() && report.problems.is_empty() {
        log.log(format!("No browser process left on port {}", port));
    }
}

/// Removes a stale `SingletonLock`; refuses when a live Chrome owns the profile.
fn handle_singleton_lock(profile_dir: &Path) -> Result<()> {
    let lock_path = profile_dir.join("SingletonLock");
    // The lock is a dangling symlink on Linux, so `exists()` would miss it.
    if fs::symlink_metadata(&lock_path).is_err() {
        return Ok(());
    }
    if ChromeController::is_chrome_running_with_profile(profile_dir) {
        return Err(AppError::Browser(
            "Chrome is already running with this profile. Please close it and try again.".into(),
        ));
    }
    tracing::info!("Removing stale SingletonLock in {}", profile_dir.display());
    let _ = fs::remove_file(&lock_path);
    Ok(())
}

/// Accepts a `ws://` endpoint as is, otherwise asks `<url>/json/version`.
pub async fn resolve_ws_url(url: &str, timeout: Duration) -> Result<String> {
    let url = url.trim();
    if url.starts_with("ws://") || url.starts_with("wss://") {
        return Ok(url.to_string());
    }
    fetch_ws_url(url, timeout).await
}

async fn fetch_ws_url(base: &str, timeout: Duration) -> Result<String> {
    let endpoint = format!("{}/json/version", base.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|e| AppError::Browser(format!("Failed to build HTTP client: {}", e)))?;
    let response = client.get(&endpoint).send().await?;
    if !response.status().is_success() {
        return Err(AppError::Browser(format!("{} returned {}", endpoint, response.status())));
    }
    let info: serde_json::Value = response.json().await?;
    info["webSocketDebuggerUrl"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::Browser(format!("No webSocketDebuggerUrl at {}", endpoint)))
}

/// Polls the local debug endpoint until it answers or `timeout` elapses.
pub async fn wait_for_debug_port(port: u16, timeout: Duration, poll: Duration) -> Result<String> {
    let base = format!("http://127.0.0.1:{}", port);
    let started = tokio::time::Instant::now();
    loop {
        let remaining = timeout.saturating_sub(started.elapsed());
        if let Ok(ws_url) = fetch_ws_url(&base, remaining.max(poll)).await {
            return Ok(ws_url);
        }
        if started.elapsed() >= timeout {
            return Err(AppError::DebugPortNotReady {
                port,
                waited_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(poll).await;
    }
}
