pub mod client;
pub mod prompt;
pub mod provider;
pub mod schema;

pub use client::{AuditTarget, LlmClient, RetryPolicy};
pub use prompt::{AnalysisRequest, PromptBuilder};
pub use provider::{LlmProvider, OpenAiProvider, ProviderReply};
