//! OpenAI-compatible `/completions` adapter with echoed logprobs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// Anything that can score a prompt by echoing it with logprobs.
#[async_trait]
pub trait LogprobGateway: Send + Sync {
    async fn score_prompt(&self, req: &CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;
}

// =============================================================================
// COMPLETIONS ADAPTER
// =============================================================================

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum allowed response body (4MB). Echoed logprobs grow with the prompt.
const MAX_RESPONSE_LEN: usize = 4 * 1_024 * 1_024;

/// Maximum allowed prompt characters.
const MAX_INPUT_CHARS: usize = 200_000;

const PROVIDER: &str = "completions";

#[derive(Debug, Clone)]
pub struct CompletionsAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CompletionsAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    /// Reads `OPENAI_API_KEY`, and optionally `OPENAI_BASE_URL` and
    /// `OPENAI_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::config("OPENAI_API_KEY not set"))?;

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("OPENAI_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Self::with_config(api_key, base_url, timeout)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/completions", self.base_url)
    }

    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn retry_after(headers: &HeaderMap) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60))
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct CompletionsApiRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    logprobs: u32,
    echo: bool,
}

#[derive(Deserialize)]
struct CompletionsApiResponse {
    model: Option<String>,
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    logprobs: Option<ApiLogprobs>,
}

#[derive(Deserialize)]
struct ApiLogprobs {
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default)]
    token_logprobs: Vec<Option<f64>>,
    #[serde(default)]
    top_logprobs: Vec<Option<serde_json::Map<String, serde_json::Value>>>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

impl ApiLogprobs {
    /// Zip the parallel arrays into rows. Missing entries (the first token
    /// has no logprob) become `-inf` with no alternatives.
    fn into_rows(self) -> Vec<TokenLogprob> {
        let mut logprobs = self.token_logprobs.into_iter();
        let mut tops = self.top_logprobs.into_iter();

        self.tokens
            .into_iter()
            .map(|token| {
                let logprob = logprobs.next().flatten().unwrap_or(f64::NEG_INFINITY);
                let top_alternatives = tops
                    .next()
                    .flatten()
                    .map(|m| {
                        m.into_iter()
                            .filter_map(|(token, v)| {
                                v.as_f64().map(|logprob| TokenAlternative { token, logprob })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                TokenLogprob {
                    token,
                    logprob,
                    top_alternatives,
                }
            })
            .collect()
    }
}

// =============================================================================
// GATEWAY IMPL
// =============================================================================

#[async_trait]
impl LogprobGateway for CompletionsAdapter {
    async fn score_prompt(
        &self,
        req: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        if req.prompt.len() > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {} chars (max {MAX_INPUT_CHARS})",
                req.prompt.len()
            )));
        }

        let start = Instant::now();
        let api_req = CompletionsApiRequest {
            model: &req.model,
            prompt: &req.prompt,
            max_tokens: req.max_tokens,
            logprobs: req.logprobs,
            echo: req.echo,
        };

        let sent = self
            .client
            .post(self.completions_url())
            .json(&api_req)
            .send()
            .await;
        let mut response = match sent {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ProviderError::Timeout(self.timeout, None)),
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let retry_after = Self::retry_after(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) if e.is_timeout() => {
                    let ctx = ErrorContext::new().with_status(status.as_u16());
                    let ctx = match &request_id {
                        Some(id) => ctx.with_request_id(id),
                        None => ctx,
                    };
                    return Err(ProviderError::Timeout(self.timeout, Some(ctx)));
                }
                Err(e) => return Err(e.into()),
            };
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    PROVIDER,
                    format!("Response too large: {new_len} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).to_string();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = match &request_id {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        };

        if !status.is_success() {
            let (message, ctx) = match serde_json::from_str::<CompletionsApiResponse>(&body)
                .ok()
                .and_then(|p| p.error)
            {
                Some(error) => {
                    let ctx = match error.code {
                        Some(code) => ctx.with_code(code),
                        None => ctx,
                    };
                    (error.message.unwrap_or_default(), ctx)
                }
                None => (format!("HTTP {}", status.as_u16()), ctx),
            };

            return Err(match status.as_u16() {
                429 => ProviderError::rate_limited(retry_after, ctx),
                400..=499 => ProviderError::invalid_request_with_context(message, ctx),
                _ => ProviderError::provider_with_context(PROVIDER, message, ctx),
            });
        }

        let parsed: CompletionsApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider(PROVIDER, format!("Invalid JSON: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::provider_with_context(
                PROVIDER,
                error.message.unwrap_or_default(),
                ctx,
            ));
        }

        let logprobs = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider(PROVIDER, "No choices in response"))?
            .logprobs
            .ok_or_else(|| ProviderError::provider(PROVIDER, "Missing logprobs in response"))?;

        let tokens = logprobs.into_rows();
        let latency = start.elapsed();
        debug!(
            model = %req.model,
            tokens = tokens.len(),
            latency_ms = latency.as_millis() as u64,
            "scored prompt"
        );

        Ok(CompletionResponse {
            tokens,
            model: parsed.model,
            latency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_first_logprob_becomes_neg_infinity() {
        let raw = r#"{
            "tokens": ["The", " X"],
            "token_logprobs": [null, -0.5],
            "top_logprobs": [null, {" X": -0.5, " Y": -1.2}]
        }"#;
        let parsed: ApiLogprobs = serde_json::from_str(raw).unwrap();
        let rows = parsed.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].logprob, f64::NEG_INFINITY);
        assert!(rows[0].top_alternatives.is_empty());
        assert_eq!(rows[1].logprob, -0.5);
        assert_eq!(rows[1].top_alternatives.len(), 2);
    }

    #[test]
    fn top_alternatives_keep_provider_order() {
        let raw = r#"{
            "tokens": ["Y"],
            "token_logprobs": [-0.7],
            "top_logprobs": [{"Y": -0.7, "X": -0.7, " X": -3.0}]
        }"#;
        let parsed: ApiLogprobs = serde_json::from_str(raw).unwrap();
        let rows = parsed.into_rows();
        let order: Vec<&str> = rows[0]
            .top_alternatives
            .iter()
            .map(|a| a.token.as_str())
            .collect();
        assert_eq!(order, vec!["Y", "X", " X"]);
    }

    #[test]
    fn short_parallel_arrays_are_padded() {
        let raw = r#"{"tokens": ["a", "b"], "token_logprobs": [null]}"#;
        let parsed: ApiLogprobs = serde_json::from_str(raw).unwrap();
        let rows = parsed.into_rows();
        assert!(rows.iter().all(|r| r.logprob == f64::NEG_INFINITY));
    }

    #[tokio::test]
    async fn stalled_body_is_a_timeout() {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        // Headers arrive at once; the body never finishes.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 8192];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nx-request-id: req-slow\r\ncontent-length: 1000\r\n\r\n{\"choices\":",
            );
            let _ = stream.flush();
            std::thread::sleep(Duration::from_secs(3));
        });

        let adapter = CompletionsAdapter::with_config(
            "k",
            format!("http://{addr}"),
            Duration::from_millis(300),
        )
        .unwrap();
        let err = adapter
            .score_prompt(&CompletionRequest::scoring("davinci-002", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(..)), "{err:?}");
        assert_eq!(err.request_id(), Some("req-slow"));
        assert_eq!(err.http_status(), Some(200));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let adapter =
            CompletionsAdapter::with_config("k", "http://localhost:1/v1/", DEFAULT_TIMEOUT)
                .unwrap();
        assert_eq!(adapter.completions_url(), "http://localhost:1/v1/completions");
    }
}
