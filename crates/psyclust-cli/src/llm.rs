//! Completion backends for label drafting.
//!
//! - `CannedResponses`: reads `<dir>/cluster_<id>.txt`; no network.
//! - `AnthropicBackend` (feature `llm-anthropic`): Messages API over blocking
//!   reqwest. Env:
//!   - `ANTHROPIC_API_KEY` (required)
//!   - `ANTHROPIC_BASE_URL` (optional; default `https://api.anthropic.com`)
//!   - `ANTHROPIC_VERSION` (optional; default `2023-06-01`)

use std::fs;
use std::path::PathBuf;

use psyclust_labels::{CompletionBackend, CompletionError, CompletionRequest};

// =============================================================================
// Offline backend
// =============================================================================

/// Replays pre-recorded responses, one file per cluster.
pub struct CannedResponses {
    dir: PathBuf,
}

impl CannedResponses {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn response_path(&self, cluster_id: u32) -> PathBuf {
        self.dir.join(format!("cluster_{cluster_id}.txt"))
    }
}

impl CompletionBackend for CannedResponses {
    fn complete(&self, cluster_id: u32, _request: &CompletionRequest) -> Result<String, CompletionError> {
        let path = self.response_path(cluster_id);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                CompletionError::Unavailable(format!("no canned response at {}", path.display())),
            ),
            Err(err) => Err(CompletionError::Unavailable(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    fn name(&self) -> &str {
        "canned"
    }
}

// =============================================================================
// Anthropic backend (Messages API)
// =============================================================================

#[cfg(feature = "llm-anthropic")]
pub use anthropic::AnthropicBackend;

#[cfg(feature = "llm-anthropic")]
mod anthropic {
    use std::time::Duration;

    use psyclust_labels::{CompletionBackend, CompletionError, CompletionRequest};
    use serde_json::json;

    const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
    const ANTHROPIC_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
    const ANTHROPIC_VERSION_ENV: &str = "ANTHROPIC_VERSION";
    const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
    const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
    pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";

    fn normalize_http_base_url(base_url: &str, default: &str) -> String {
        let mut host = base_url.trim().to_string();
        if host.is_empty() {
            host = default.to_string();
        }
        if !host.starts_with("http://") && !host.starts_with("https://") {
            host = format!("https://{host}");
        }
        host.trim_end_matches('/').to_string()
    }

    fn extract_output_text(v: &serde_json::Value) -> Option<String> {
        let mut out = String::new();
        for block in v.get("content")?.as_array()? {
            if block.get("type").and_then(|x| x.as_str()) != Some("text") {
                continue;
            }
            if let Some(t) = block.get("text").and_then(|x| x.as_str()) {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(t);
            }
        }
        let trimmed = out.trim().to_string();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }

    pub struct AnthropicBackend {
        client: reqwest::blocking::Client,
        base_url: String,
        version: String,
        api_key: String,
        model: String,
    }

    impl AnthropicBackend {
        /// Configure from the environment. Fails without an API key.
        pub fn from_env(model: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
            let api_key = std::env::var(ANTHROPIC_API_KEY_ENV).unwrap_or_default();
            let api_key = api_key.trim().to_string();
            if api_key.is_empty() {
                anyhow::bail!(
                    "Anthropic backend requires {ANTHROPIC_API_KEY_ENV} (set it in your env; do not hardcode secrets in scripts)"
                );
            }
            let base_url = normalize_http_base_url(
                &std::env::var(ANTHROPIC_BASE_URL_ENV).unwrap_or_default(),
                DEFAULT_ANTHROPIC_BASE_URL,
            );
            let version = std::env::var(ANTHROPIC_VERSION_ENV)
                .unwrap_or_else(|_| DEFAULT_ANTHROPIC_VERSION.to_string());
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build http client: {e}"))?;
            Ok(Self {
                client,
                base_url,
                version,
                api_key,
                model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            })
        }
    }

    impl CompletionBackend for AnthropicBackend {
        fn complete(&self, _cluster_id: u32, request: &CompletionRequest) -> Result<String, CompletionError> {
            let url = format!("{}/v1/messages", self.base_url);
            let body = json!({
                "model": self.model,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
                "system": request.system,
                "messages": [
                    { "role": "user", "content": request.prompt }
                ]
            });

            let resp = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.version)
                .json(&body)
                .send()
                .map_err(|e| CompletionError::Network(format!("failed to reach Anthropic at {url}: {e}")))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().unwrap_or_default();
                return Err(CompletionError::Api(format!("anthropic http error {status}: {text}")));
            }

            let v: serde_json::Value = resp
                .json()
                .map_err(|e| CompletionError::InvalidResponse(format!("anthropic returned invalid JSON: {e}")))?;
            extract_output_text(&v).ok_or_else(|| {
                CompletionError::InvalidResponse(
                    "anthropic: no text blocks in response (unexpected response shape)".to_string(),
                )
            })
        }

        fn name(&self) -> &str {
            "anthropic"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn base_url_is_normalized() {
            assert_eq!(
                normalize_http_base_url("api.example.com/", DEFAULT_ANTHROPIC_BASE_URL),
                "https://api.example.com"
            );
            assert_eq!(
                normalize_http_base_url("  ", DEFAULT_ANTHROPIC_BASE_URL),
                DEFAULT_ANTHROPIC_BASE_URL
            );
        }

        #[test]
        fn only_text_blocks_are_joined() {
            let v = json!({
                "content": [
                    {"type": "text", "text": "Label: Guarded"},
                    {"type": "tool_use", "name": "x"},
                    {"type": "text", "text": "Dominant Traits:\n- vigilance"}
                ]
            });
            assert_eq!(
                extract_output_text(&v).as_deref(),
                Some("Label: Guarded\nDominant Traits:\n- vigilance")
            );
            assert_eq!(extract_output_text(&json!({"content": []})), None);
        }
    }
}
