//! Core types for logprob scoring requests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::construction::FormatType;

/// Number of top alternatives requested per token.
pub const DEFAULT_TOP_LOGPROBS: u32 = 4;

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// Request to score a prompt: echo it back with per-token logprobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    /// Tokens to generate after the prompt. Scoring uses 0.
    pub max_tokens: u32,
    /// Top alternatives per position.
    pub logprobs: u32,
    pub echo: bool,
}

impl CompletionRequest {
    /// Scoring request: echo the prompt, generate nothing.
    pub fn scoring(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: 0,
            logprobs: DEFAULT_TOP_LOGPROBS,
            echo: true,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn logprobs(mut self, logprobs: u32) -> Self {
        self.logprobs = logprobs;
        self
    }
}

/// Log-probability information for a single echoed token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    /// The token string.
    pub token: String,
    /// Log-probability of this token. `-inf` when the provider sent none.
    pub logprob: f64,
    /// Top alternative tokens at this position, in the order the provider
    /// listed them. Scoring breaks arg-max ties on this order.
    pub top_alternatives: Vec<TokenAlternative>,
}

/// An alternative token at a given position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAlternative {
    /// The alternative token string.
    pub token: String,
    /// Log-probability of this alternative.
    pub logprob: f64,
}

/// Echoed prompt tokens with their logprobs.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub tokens: Vec<TokenLogprob>,
    /// Model reported by the provider, if any.
    pub model: Option<String>,
    pub latency: Duration,
}

// =============================================================================
// BATCH TYPES
// =============================================================================

/// Request type tag used by offline inference batches.
pub const BATCH_REQUEST_TYPE: &str = "language-model-inference";

/// Model named in offline inference batches unless overridden.
pub const BATCH_DEFAULT_MODEL: &str = "t0pp";

/// One line of an offline inference batch file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequestRecord {
    pub request_type: String,
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub logprobs: u32,
}

impl BatchRequestRecord {
    /// Record for a cumulative prompt; generates just enough tokens for the answer.
    pub fn for_prompt(model: impl Into<String>, prompt: impl Into<String>, format: FormatType) -> Self {
        Self {
            request_type: BATCH_REQUEST_TYPE.to_string(),
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: match format {
                FormatType::Qa => 2,
                FormatType::Arrow => 1,
            },
            logprobs: DEFAULT_TOP_LOGPROBS,
        }
    }
}
