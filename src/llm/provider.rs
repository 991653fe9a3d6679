use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::error::LlmRequestError;
use crate::types::TokenUsage;

use super::prompt::AnalysisRequest;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// A reply the provider accepted with a success status.
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    /// Raw response body, kept for the audit log.
    pub body: String,
    pub usage: TokenUsage,
    /// Function-call arguments, if the reply carried the requested call.
    pub arguments: Option<String>,
}

/// An LLM backend able to answer one structured analysis request.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &AnalysisRequest) -> Result<ProviderReply, LlmRequestError>;
}

// ============================================================
// OpenAI-compatible chat completions
// ============================================================

pub struct OpenAiProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre::eyre!("Failed to build LLM HTTP client: {}", e))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            timeout,
        })
    }

    fn request_body(request: &AnalysisRequest) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": request.function_name,
                    "description": "Analyze a transaction for AML risk and provide a structured assessment",
                    "parameters": request.function_parameters,
                },
            }],
            "tool_choice": {
                "type": "function",
                "function": { "name": request.function_name },
            },
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &AnalysisRequest) -> Result<ProviderReply, LlmRequestError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmRequestError::RateLimited { retry_after });
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if status.is_server_error() {
            return Err(LlmRequestError::Network(format!(
                "provider returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(LlmRequestError::Rejected {
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        Ok(parse_completion(body, request.function_name))
    }
}

impl OpenAiProvider {
    fn transport_error(&self, e: reqwest::Error) -> LlmRequestError {
        if e.is_timeout() {
            LlmRequestError::Timeout(self.timeout)
        } else {
            LlmRequestError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Extract usage and the named call from a completion body.
/// An unreadable envelope yields a reply without arguments so the raw body still reaches the audit log.
fn parse_completion(body: String, function_name: &str) -> ProviderReply {
    let Ok(completion) = serde_json::from_str::<ChatCompletion>(&body) else {
        return ProviderReply {
            body,
            ..Default::default()
        };
    };

    let usage = completion
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let arguments = completion.choices.into_iter().next().and_then(|choice| {
        let message = choice.message;
        message
            .tool_calls
            .into_iter()
            .map(|call| call.function)
            .chain(message.function_call)
            .find(|call| call.name == function_name)
            .map(|call| call.arguments)
    });

    ProviderReply {
        body,
        usage,
        arguments,
    }
}
