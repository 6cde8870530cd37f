use crate::config::LlmSettings;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub mod prompts;

const PROXY_ENV_CHAIN: [&str; 4] = ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"];
const API_KEY_ENV_CHAIN: [&str; 2] = ["OPENROUTER_API_KEY", "OPENAI_API_KEY"];
const ERROR_BODY_LIMIT: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One chat-completion call. `proxy` is the explicit choice of the caller;
/// the environment is consulted when it is `None`.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub api_key: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// Anything that can answer a chat-completion request with the reply text.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// OpenRouter-compatible chat-completions client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }

    fn build_http_client(&self, proxy: Option<&str>, timeout: Duration) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        builder = match proxy {
            Some(proxy) => builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| AppError::Configuration(format!("Invalid LLM proxy {}: {}", proxy, e)))?,
            ),
            None => builder.no_proxy(),
        };
        builder
            .build()
            .map_err(|e| AppError::Llm(format!("Failed to build HTTP client: {}", e)))
    }
}

#[async_trait]
impl ChatCompletion for LlmClient {
    /// Sends the request, retrying transport errors, 429 and 5xx responses
    /// with exponential backoff.
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        if request.api_key.trim().is_empty() {
            return Err(AppError::MissingApiKey);
        }
        let proxy = resolve_proxy(request.proxy.as_deref())?;
        let client = self.build_http_client(proxy.as_deref(), request.timeout)?;

        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": self.settings.temperature,
        });

        let attempts = self.settings.max_retries.saturating_add(1);
        let mut last_error: Option<AppError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = backoff_delay(self.settings.retry_backoff_ms, attempt);
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let mut http_request = client
                .post(self.endpoint())
                .bearer_auth(request.api_key.trim())
                .json(&body);
            if let Some(referer) = &self.settings.referer {
                http_request = http_request.header("HTTP-Referer", referer);
            }
            if let Some(title) = &self.settings.title {
                http_request = http_request.header("X-Title", title);
            }

            let response = match http_request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(AppError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let text = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, truncate_chars(&text, 200));
                last_error = Some(AppError::LlmApi {
                    status: status.as_u16(),
                    body: truncate_chars(&text, ERROR_BODY_LIMIT),
                });
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(AppError::LlmApi {
                    status: status.as_u16(),
                    body: truncate_chars(&text, ERROR_BODY_LIMIT),
                });
            }

            let payload: serde_json::Value = response.json().await?;
            let content = payload["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or("")
                .to_string();
            debug!("LLM call succeeded: model={}, chars={}", request.model, content.len());
            return Ok(content);
        }

        Err(last_error.unwrap_or_else(|| AppError::Llm("LLM request failed".to_string())))
    }
}

/// Resolves the API key from the explicit value, the environment, then the key file.
pub fn resolve_api_key(explicit: Option<&str>, key_file: Option<&Path>) -> Result<Option<String>> {
    resolve_api_key_with(explicit, key_file, |key| std::env::var(key).ok())
}

pub fn resolve_api_key_with<F>(explicit: Option<&str>, key_file: Option<&Path>, env: F) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(Some(key.to_string()));
    }

    for name in API_KEY_ENV_CHAIN {
        if let Some(key) = env(name).map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
            return Ok(Some(key));
        }
    }

    let path = match key_file {
        Some(path) if path.exists() => path,
        _ => return Ok(None),
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Configuration(format!("Failed to read API key file: {}", e)))?;
    match raw.split_whitespace().next() {
        Some(token) => Ok(Some(token.to_string())),
        None => Err(AppError::Configuration("OpenRouter API key is empty.".to_string())),
    }
}

/// Picks the proxy for LLM traffic. SOCKS proxies are refused.
pub fn resolve_proxy(explicit: Option<&str>) -> Result<Option<String>> {
    resolve_proxy_with(explicit, |key| std::env::var(key).ok())
}

pub fn resolve_proxy_with<F>(explicit: Option<&str>, env: F) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let chosen = explicit
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .or_else(|| {
            PROXY_ENV_CHAIN
                .iter()
                .filter_map(|name| env(name))
                .map(|p| p.trim().to_string())
                .find(|p| !p.is_empty())
        });

    let Some(proxy) = chosen else {
        return Ok(None);
    };

    if proxy.to_ascii_lowercase().starts_with("socks") {
        return Err(AppError::UnsupportedProxy(
            "SOCKS5 proxy not supported for LLM; use HTTP/HTTPS proxy.".to_string(),
        ));
    }
    Ok(Some(normalize_http_proxy(&proxy)))
}

/// `host:port` becomes `http://host:port`; anything with a scheme is kept.
pub fn normalize_http_proxy(proxy: &str) -> String {
    let proxy = proxy.trim();
    if proxy.contains("://") {
        proxy.to_string()
    } else {
        format!("http://{}", proxy)
    }
}

/// Parses the JSON object embedded in a model reply: everything from the
/// first `{` to the last `}`. Returns `None` for anything else.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Exponential delay before retry number `attempt` (1-based), saturating instead of overflowing.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Char-safe prefix of at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Sure! Here you go:\n```json\n{\"items\":[{\"candidateId\":3}]}\n```\nAnything else?";
        let value = extract_json(text).unwrap();
        assert_eq!(value["items"][0]["candidateId"], 3);
    }

    #[test]
    fn test_extract_json_is_total() {
        let inputs = [
            "",
            "no braces here",
            "}{",
            "{",
            "}",
            "{not json}",
            "{\"a\": 1",
            "prefix } then { suffix",
            "{\"a\":1} trailing {\"b\":2}",
            "\u{1F980}{\u{1F980}}",
        ];
        for input in inputs {
            assert!(extract_json(input).is_none(), "expected None for {:?}", input);
        }
    }

    #[test]
    fn test_socks_proxy_rejected() {
        for proxy in ["socks5://127.0.0.1:1080", "socks5h://proxy:1080", "SOCKS4://p:1"] {
            let err = resolve_proxy_with(Some(proxy), env_of(&[])).unwrap_err();
            assert!(err.to_string().contains("SOCKS"));
        }
        let err = resolve_proxy_with(None, env_of(&[("HTTPS_PROXY", "socks5://env:1080")])).unwrap_err();
        assert!(matches!(err, AppError::UnsupportedProxy(_)));
    }

    #[test]
    fn test_proxy_env_chain_order() {
        let env = env_of(&[("HTTP_PROXY", "http://plain:3128"), ("https_proxy", "proxy.local:8080")]);
        assert_eq!(
            resolve_proxy_with(None, &env).unwrap().as_deref(),
            Some("http://proxy.local:8080")
        );
        assert_eq!(
            resolve_proxy_with(Some("https://explicit:443"), &env).unwrap().as_deref(),
            Some("https://explicit:443")
        );
        assert_eq!(resolve_proxy_with(None, env_of(&[])).unwrap(), None);
    }

    #[test]
    fn test_api_key_resolution_order() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("openrouter.key");
        std::fs::write(&key_file, "\n  sk-file-key  trailing-noise\n").unwrap();

        let env = env_of(&[("OPENAI_API_KEY", "sk-openai")]);
        assert_eq!(
            resolve_api_key_with(Some(" sk-explicit "), Some(&key_file), &env).unwrap().as_deref(),
            Some("sk-explicit")
        );
        assert_eq!(
            resolve_api_key_with(None, Some(&key_file), &env).unwrap().as_deref(),
            Some("sk-openai")
        );
        assert_eq!(
            resolve_api_key_with(Some("  "), Some(&key_file), env_of(&[])).unwrap().as_deref(),
            Some("sk-file-key")
        );
        assert_eq!(resolve_api_key_with(None, None, env_of(&[])).unwrap(), None);
    }

    #[test]
    fn test_empty_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("empty.key");
        std::fs::write(&key_file, "   \n").unwrap();
        assert!(resolve_api_key_with(None, Some(&key_file), env_of(&[])).is_err());
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(100, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(1_000, 64), Duration::from_millis(u64::MAX));
        assert_eq!(backoff_delay(1_000, 200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_complete_rejects_socks_before_network() {
        let mut settings = LlmSettings::default();
        settings.base_url = "http://127.0.0.1:9".to_string();
        let client = LlmClient::new(settings);
        let request = ChatRequest {
            api_key: "sk-test".to_string(),
            model: "test/model".to_string(),
            messages: vec![ChatMessage::user("hi")],
            proxy: Some("socks5://127.0.0.1:1080".to_string()),
            timeout: Duration::from_secs(1),
        };
        let err = client.complete(&request).await.unwrap_err();
        assert!(err.to_string().contains("SOCKS5 proxy not supported"));
    }
}
