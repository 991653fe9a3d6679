pub mod memory;
pub mod repository;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::types::{
    AuditStatus, Customer, FlagStatus, FlaggedTransaction, LlmAnalysis, LlmAuditLogEntry,
    LlmRiskLevel, NewFlag, ReviewRecord, RiskLevel, SanctionedEntity, Transaction,
};

pub use memory::MemoryStore;
pub use repository::PgStore;

/// Count query over one sender's transactions, used to build rule context.
#[derive(Debug, Clone)]
pub struct ActivityWindow {
    pub sender_id: Uuid,
    pub exclude_transaction: Uuid,
    /// Inclusive.
    pub since: DateTime<Utc>,
    /// Exclusive.
    pub until: DateTime<Utc>,
    pub min_amount: Option<BigDecimal>,
    /// Inclusive.
    pub max_amount: Option<BigDecimal>,
}

#[derive(Debug, Clone, Default)]
pub struct FlagFilter {
    pub risk_level: Option<RiskLevel>,
    pub llm_risk_level: Option<LlmRiskLevel>,
    pub rule_name: Option<String>,
    pub status: Option<FlagStatus>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub transaction_type: Option<String>,
    /// Inclusive.
    pub min_amount: Option<BigDecimal>,
    /// Inclusive.
    pub max_amount: Option<BigDecimal>,
    pub limit: i64,
    pub offset: i64,
}

/// A transaction joined with its sending customer.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    pub customer: Customer,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerFilter {
    /// Customers scoring at or above this.
    pub min_risk_score: Option<i16>,
    pub country_code: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// A flag joined with the transaction it points at and the sending customer.
#[derive(Debug, Clone)]
pub struct FlagRecord {
    pub flag: FlaggedTransaction,
    pub transaction: Transaction,
    pub customer: Customer,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub status: Option<AuditStatus>,
    pub transaction_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditTotals {
    pub total_requests: i64,
    pub successful_requests: i64,
    pub total_cost: BigDecimal,
}

/// Outcome of a conditional review write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewWrite {
    Applied,
    /// A review with a later timestamp is already stored.
    Stale,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct NewSanctionedEntity {
    pub name: String,
    pub aliases: Vec<String>,
    pub entity_type: Option<String>,
    pub country_code: Option<String>,
    pub sanctions_program: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_customers: i64,
    pub total_transactions: i64,
    pub total_flagged: i64,
    pub flagged_with_llm: i64,
    pub recent_transactions: i64,
    pub recent_flagged: i64,
    pub by_risk_level: Vec<(String, i64)>,
    pub by_llm_risk_level: Vec<(String, i64)>,
    pub top_rules: Vec<(String, i64)>,
}

/// Persistence used by the rule engine, orchestrator, audit tracker and review workflow.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, PersistenceError>;

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, PersistenceError>;

    /// Transactions without a completed rule pass, oldest first.
    async fn transactions_pending_rule_pass(
        &self,
        limit: i64,
    ) -> Result<Vec<Transaction>, PersistenceError>;

    async fn count_sender_activity(&self, window: &ActivityWindow)
        -> Result<i64, PersistenceError>;

    /// Insert the flag unless one already exists for its (transaction, rule) pair.
    /// Returns the inserted flag, or `None` when the pair was already flagged.
    async fn insert_flag_if_absent(
        &self,
        flag: &NewFlag,
    ) -> Result<Option<FlaggedTransaction>, PersistenceError>;

    async fn mark_rule_pass(
        &self,
        transaction_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn get_flag(&self, id: Uuid) -> Result<Option<FlaggedTransaction>, PersistenceError>;

    async fn flags_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<FlaggedTransaction>, PersistenceError>;

    /// Flags with no LLM analysis, oldest first.
    async fn unanalyzed_flags(&self, limit: i64)
        -> Result<Vec<FlaggedTransaction>, PersistenceError>;

    /// Most recent flags on the customer's transactions, newest first.
    async fn prior_flags_for_customer(
        &self,
        customer_id: Uuid,
        exclude_flag: Uuid,
        limit: i64,
    ) -> Result<Vec<FlaggedTransaction>, PersistenceError>;

    /// Returns false when the flag does not exist.
    async fn record_llm_analysis(
        &self,
        flag_id: Uuid,
        analysis: &LlmAnalysis,
    ) -> Result<bool, PersistenceError>;

    async fn record_review(
        &self,
        flag_id: Uuid,
        review: &ReviewRecord,
    ) -> Result<ReviewWrite, PersistenceError>;

    /// One page of matching flags, newest first, plus the total match count.
    async fn list_flags(
        &self,
        filter: &FlagFilter,
    ) -> Result<(Vec<FlagRecord>, i64), PersistenceError>;

    /// One page of matching transactions, newest first, plus the total match count.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<(Vec<TransactionRecord>, i64), PersistenceError>;

    /// One page of matching customers, oldest account first, plus the total match count.
    async fn list_customers(
        &self,
        filter: &CustomerFilter,
    ) -> Result<(Vec<Customer>, i64), PersistenceError>;

    async fn append_audit_entry(&self, entry: &LlmAuditLogEntry) -> Result<(), PersistenceError>;

    /// Matching audit entries, newest first.
    async fn list_audit_entries(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<LlmAuditLogEntry>, PersistenceError>;

    async fn audit_totals(&self) -> Result<AuditTotals, PersistenceError>;

    async fn sanctioned_entities(&self) -> Result<Vec<SanctionedEntity>, PersistenceError>;

    async fn upsert_sanctioned_entity(
        &self,
        entity: &NewSanctionedEntity,
    ) -> Result<i32, PersistenceError>;

    /// Aggregate counts; "recent" means at or after `recent_since`.
    async fn stats(&self, recent_since: DateTime<Utc>) -> Result<StoreStats, PersistenceError>;
}
