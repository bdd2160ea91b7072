//! Error types for the completions gateway.

use std::time::Duration;
use thiserror::Error;

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "rate_limit_exceeded").
    pub provider_code: Option<String>,
    /// Request ID from provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors from a scoring call. None of them are retried here.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider returned 429.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        context: Option<ErrorContext>,
    },

    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("timeout after {0:?}")]
    Timeout(Duration, Option<ErrorContext>),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing API key, bad base URL and the like.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn rate_limited(retry_after: Duration, context: ErrorContext) -> Self {
        Self::RateLimited {
            retry_after,
            context: Some(context),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: None,
        }
    }

    pub fn invalid_request_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            context: None,
        }
    }

    pub fn provider_with_context(
        provider: &'static str,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Provider { .. } => "provider_error",
            Self::Timeout(_, _) => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } => context.as_ref(),
            Self::InvalidRequest { context, .. } => context.as_ref(),
            Self::Provider { context, .. } => context.as_ref(),
            Self::Timeout(_, context) => context.as_ref(),
            Self::Http(_) | Self::Config(_) => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }

    pub fn http_status(&self) -> Option<u16> {
        self.context().and_then(|c| c.http_status)
    }
}
