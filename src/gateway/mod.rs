//! Model-query gateway: OpenAI-compatible completions with echoed logprobs.

pub mod completions;
pub mod error;
pub mod types;

pub use completions::{CompletionsAdapter, LogprobGateway};
pub use error::{ErrorContext, ProviderError};
pub use types::*;
