use std::time::Duration;

use uuid::Uuid;

/// A storage read or write failed. Fatal for the unit of work that hit it.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// A single rule predicate could not evaluate a transaction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleEvaluationError {
    #[error("transaction {transaction_id} has an unusable amount: {reason}")]
    MalformedAmount { transaction_id: Uuid, reason: String },

    #[error("customer {customer_id} not found for transaction {transaction_id}")]
    MissingCustomer {
        transaction_id: Uuid,
        customer_id: Uuid,
    },
}

/// Failure modes of one request to the LLM provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmRequestError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl LlmRequestError {
    /// Whether another attempt may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited { .. } | Self::Network(_)
        )
    }
}

/// Failure to analyze one flagged transaction, or to select the batch.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("LLM analysis is not configured")]
    Disabled,

    #[error("flagged transaction {0} not found")]
    FlagNotFound(Uuid),

    #[error("transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("customer {0} not found")]
    CustomerNotFound(Uuid),

    #[error(transparent)]
    Llm(#[from] LlmRequestError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Reasons a reviewer action is refused.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("flagged transaction {0} not found")]
    FlagNotFound(Uuid),

    #[error("a review must set the verdict to 'True Positive' or 'False Positive'")]
    UnreviewedVerdict,

    #[error("reviewer identity is required")]
    MissingReviewer,

    #[error("review notes exceed {max} characters")]
    NotesTooLong { max: usize },

    #[error("a newer review of flag {0} already exists")]
    Stale(Uuid),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Failure of an operation exposed by the pipeline context.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
