use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::{AuditFilter, Store};
use crate::error::PersistenceError;
use crate::types::{AuditStatus, LlmAuditLogEntry, TokenUsage};

use super::pricing::PricingTable;

/// Everything known about one finished request attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub transaction_id: Uuid,
    pub flagged_transaction_id: Option<Uuid>,
    pub model: String,
    pub attempt: u32,
    pub status: AuditStatus,
    /// Zero when no reply was received.
    pub usage: TokenUsage,
    pub response_time: Duration,
    pub error_message: Option<String>,
    pub prompt_sent: String,
    pub response_received: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditSummary {
    pub total_requests: i64,
    pub successful_requests: i64,
    /// successful / total, 0 when the log is empty.
    pub success_rate: f64,
    pub total_estimated_cost: BigDecimal,
}

/// Appends audit entries and answers read-only aggregate queries. Never updates or deletes.
#[derive(Clone)]
pub struct AuditTracker {
    store: Arc<dyn Store>,
    pricing: Arc<PricingTable>,
}

impl AuditTracker {
    pub fn new(store: Arc<dyn Store>, pricing: PricingTable) -> Self {
        Self {
            store,
            pricing: Arc::new(pricing),
        }
    }

    pub async fn record(&self, attempt: AttemptRecord) -> Result<LlmAuditLogEntry, PersistenceError> {
        let cost_estimate = self.pricing.cost(&attempt.model, attempt.usage);
        let entry = LlmAuditLogEntry {
            id: Uuid::new_v4(),
            transaction_id: attempt.transaction_id,
            flagged_transaction_id: attempt.flagged_transaction_id,
            model_used: attempt.model,
            attempt: i32::try_from(attempt.attempt).unwrap_or(i32::MAX),
            status: attempt.status,
            input_tokens: i32::try_from(attempt.usage.input_tokens).unwrap_or(i32::MAX),
            output_tokens: i32::try_from(attempt.usage.output_tokens).unwrap_or(i32::MAX),
            tokens_used: i32::try_from(attempt.usage.total()).unwrap_or(i32::MAX),
            response_time_ms: i64::try_from(attempt.response_time.as_millis()).unwrap_or(i64::MAX),
            cost_estimate,
            error_message: attempt.error_message,
            prompt_sent: attempt.prompt_sent,
            response_received: attempt.response_received,
            created_at: Utc::now(),
        };

        self.store.append_audit_entry(&entry).await?;

        tracing::debug!(
            audit_id = %entry.id,
            transaction_id = %entry.transaction_id,
            status = entry.status.as_str(),
            attempt = entry.attempt,
            tokens = entry.tokens_used,
            cost = %entry.cost_estimate,
            "Recorded LLM audit entry"
        );
        Ok(entry)
    }

    pub async fn list(&self, filter: &AuditFilter) -> Result<Vec<LlmAuditLogEntry>, PersistenceError> {
        self.store.list_audit_entries(filter).await
    }

    /// Totals over the whole log, independent of any listing filter.
    pub async fn summary(&self) -> Result<AuditSummary, PersistenceError> {
        let totals = self.store.audit_totals().await?;
        let success_rate = if totals.total_requests == 0 {
            0.0
        } else {
            totals.successful_requests as f64 / totals.total_requests as f64
        };
        Ok(AuditSummary {
            total_requests: totals.total_requests,
            successful_requests: totals.successful_requests,
            success_rate,
            total_estimated_cost: totals.total_cost,
        })
    }
}
