use crate::error::{AppError, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{CreateIsolatedWorldParams, FrameId, FrameTree, GetFrameTreeParams};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::Handler;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitCondition {
    /// The document has been parsed.
    DomContentLoaded,
    /// The load event fired as well.
    Load,
}

/// A frame of a page, as seen by a single scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    pub index: usize,
    pub id: String,
    pub url: String,
}

/// The page operations the crawl and the selector rely on.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str, wait: WaitCondition, timeout: Duration) -> Result<()>;

    /// Serialized DOM of the main frame.
    async fn content(&self) -> Result<String>;

    /// Evaluates a script in the main frame and returns its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// All frames, main frame first.
    async fn frames(&self) -> Result<Vec<FrameRef>>;

    /// Evaluates an expression inside one frame.
    async fn evaluate_in_frame(&self, frame: &FrameRef, expression: &str) -> Result<serde_json::Value>;

    async fn close(&self) -> Result<()>;
}

/// Hands out new tabs.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageDriver>>;
}

/// `PageDriver` backed by a Chrome DevTools Protocol page.
pub struct CdpPage {
    page: Page,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn goto(&self, url: &str, wait: WaitCondition, timeout: Duration) -> Result<()> {
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| AppError::Navigation(format!("Failed to navigate: {}", e)))?;
            if wait == WaitCondition::Load {
                self.page
                    .wait_for_navigation()
                    .await
                    .map_err(|e| AppError::Navigation(format!("Failed waiting for load: {}", e)))?;
            }
            Ok::<(), AppError>(())
        };

        match tokio::time::timeout(timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Navigation(format!(
                "Navigation timeout of {} ms exceeded",
                timeout.as_millis()
            ))),
        }
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| AppError::Browser(format!("Failed to read page content: {}", e)))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| AppError::Browser(format!("Failed to execute script: {}", e)))?;
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn frames(&self) -> Result<Vec<FrameRef>> {
        let tree = self
            .page
            .execute(GetFrameTreeParams::default())
            .await
            .map_err(|e| AppError::Browser(format!("Failed to read frame tree: {}", e)))?;

        let mut frames = Vec::new();
        flatten_frame_tree(&tree.result.frame_tree, &mut frames);
        Ok(frames)
    }

    async fn evaluate_in_frame(&self, frame: &FrameRef, expression: &str) -> Result<serde_json::Value> {
        let world = self
            .page
            .execute(
                CreateIsolatedWorldParams::builder()
                    .frame_id(FrameId::new(frame.id.clone()))
                    .world_name("jobs-scout")
                    .build()
                    .map_err(AppError::Browser)?,
            )
            .await
            .map_err(|e| AppError::Browser(format!("Frame {} unavailable: {}", frame.url, e)))?;

        let params = EvaluateParams::builder()
            .expression(expression)
            .context_id(world.result.execution_context_id)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(AppError::Browser)?;

        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| AppError::Browser(format!("Failed to evaluate in frame {}: {}", frame.url, e)))?;
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| AppError::Browser(format!("Failed to close page: {}", e)))
    }
}

fn flatten_frame_tree(tree: &FrameTree, out: &mut Vec<FrameRef>) {
    out.push(FrameRef {
        index: out.len(),
        id: tree.frame.id.inner().clone(),
        url: tree.frame.url.clone(),
    });
    if let Some(children) = &tree.child_frames {
        for child in children {
            flatten_frame_tree(child, out);
        }
    }
}

/// Drives the CDP event loop until the connection ends.
pub fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let error_str = format!("{:?}", e);
                // Unknown CDP events fail to deserialize; those are noise.
                if !error_str.contains("data did not match any variant") {
                    tracing::warn!("Browser handler error: {}", e);
                }
            }
        }
        tracing::debug!("Browser handler finished");
    })
}

/// Polls `check` until it yields `true` or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, poll: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
