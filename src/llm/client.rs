use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::audit::{AttemptRecord, AuditTracker};
use crate::config::LlmConfig;
use crate::error::{AnalysisError, LlmRequestError};
use crate::types::{AuditStatus, LlmAnalysis, TokenUsage};

use super::prompt::AnalysisRequest;
use super::provider::{LlmProvider, ProviderReply};
use super::schema::parse_assessment;

/// Timeout and retry settings for provider calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Delay before the attempt after `attempt`: base doubled per attempt, capped,
    /// raised to the provider's Retry-After when that is longer.
    pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .backoff_base
            .checked_mul(1u32 << exponent)
            .map_or(self.backoff_max, |delay| delay.min(self.backoff_max));
        match retry_after {
            Some(hint) if hint > backoff => hint,
            _ => backoff,
        }
    }
}

/// Lifecycle of one request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Sent,
    Succeeded,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    RateLimited,
    Malformed,
    Network,
    Rejected,
}

impl FailureKind {
    fn of(error: &LlmRequestError) -> Self {
        match error {
            LlmRequestError::Timeout(_) => Self::Timeout,
            LlmRequestError::RateLimited { .. } => Self::RateLimited,
            LlmRequestError::MalformedResponse(_) => Self::Malformed,
            LlmRequestError::Network(_) => Self::Network,
            LlmRequestError::Rejected { .. } => Self::Rejected,
        }
    }

    fn audit_status(self) -> AuditStatus {
        match self {
            Self::Timeout => AuditStatus::Timeout,
            Self::RateLimited => AuditStatus::RateLimited,
            Self::Malformed | Self::Network | Self::Rejected => AuditStatus::Failure,
        }
    }
}

/// What the audit entries of a request are keyed to.
#[derive(Debug, Clone, Copy)]
pub struct AuditTarget {
    pub transaction_id: Uuid,
    pub flagged_transaction_id: Option<Uuid>,
}

/// Sends analysis requests with timeout, retry and backoff, and audits every attempt.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    tracker: AuditTracker,
    policy: RetryPolicy,
    max_risk_factors: usize,
}

impl LlmClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tracker: AuditTracker,
        policy: RetryPolicy,
        max_risk_factors: usize,
    ) -> Self {
        Self {
            provider,
            tracker,
            policy,
            max_risk_factors,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run the request to a terminal state. Returns the validated analysis, or the
    /// last failure once it is terminal or attempts are exhausted.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        target: AuditTarget,
    ) -> Result<LlmAnalysis, AnalysisError> {
        let prompt_sent = request.transcript();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let mut state = RequestState::Pending;
            tracing::debug!(
                transaction_id = %target.transaction_id,
                attempt,
                state = ?state,
                "LLM request created"
            );

            let started = Instant::now();
            state = RequestState::Sent;
            tracing::trace!(attempt, state = ?state, provider = self.provider.name(), "LLM request sent");
            let result =
                tokio::time::timeout(self.policy.request_timeout, self.provider.complete(request))
                    .await;
            let response_time = started.elapsed();

            let (outcome, reply) = match result {
                Err(_) => (
                    Err(LlmRequestError::Timeout(self.policy.request_timeout)),
                    None,
                ),
                Ok(Err(e)) => (Err(e), None),
                Ok(Ok(reply)) => {
                    let parsed = match reply.arguments.as_deref() {
                        Some(arguments) => parse_assessment(arguments, self.max_risk_factors),
                        None => Err(LlmRequestError::MalformedResponse(format!(
                            "reply carried no {} call",
                            request.function_name
                        ))),
                    };
                    (parsed, Some(reply))
                }
            };

            state = match &outcome {
                Ok(_) => RequestState::Succeeded,
                Err(e) => RequestState::Failed(FailureKind::of(e)),
            };

            let (usage, response_received) = match reply {
                Some(ProviderReply { body, usage, .. }) => (usage, Some(body)),
                None => (TokenUsage::default(), None),
            };
            let status = match state {
                RequestState::Failed(kind) => kind.audit_status(),
                _ => AuditStatus::Success,
            };

            self.tracker
                .record(AttemptRecord {
                    transaction_id: target.transaction_id,
                    flagged_transaction_id: target.flagged_transaction_id,
                    model: request.model.clone(),
                    attempt,
                    status,
                    usage,
                    response_time,
                    error_message: outcome.as_ref().err().map(|e| e.to_string()),
                    prompt_sent: prompt_sent.clone(),
                    response_received,
                })
                .await?;

            let error = match outcome {
                Ok(assessment) => {
                    tracing::info!(
                        transaction_id = %target.transaction_id,
                        attempt,
                        risk_level = assessment.risk_level.as_str(),
                        tokens = usage.total(),
                        response_ms = u64::try_from(response_time.as_millis()).unwrap_or(u64::MAX),
                        "LLM analysis succeeded"
                    );
                    return Ok(assessment.into_analysis(&request.model, Utc::now()));
                }
                Err(e) => e,
            };

            if !error.is_transient() || attempt >= self.policy.max_attempts {
                tracing::error!(
                    transaction_id = %target.transaction_id,
                    attempt,
                    state = ?state,
                    error = %error,
                    "LLM request failed"
                );
                return Err(error.into());
            }

            let retry_after = match &error {
                LlmRequestError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = self.policy.delay_after(attempt, retry_after);
            tracing::warn!(
                transaction_id = %target.transaction_id,
                attempt,
                max_attempts = self.policy.max_attempts,
                error = %error,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "LLM request failed, retrying..."
            );
            tokio::time::sleep(delay).await;
        }
    }
}
