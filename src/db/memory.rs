use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::types::{
    AuditStatus, Customer, FlaggedTransaction, LlmAnalysis, LlmAuditLogEntry, NewFlag,
    ReviewRecord, SanctionedEntity, Transaction,
};

use super::{
    ActivityWindow, AuditFilter, AuditTotals, CustomerFilter, FlagFilter, FlagRecord,
    NewSanctionedEntity, ReviewWrite, Store, StoreStats, TransactionFilter, TransactionRecord,
};

#[derive(Default)]
struct Inner {
    customers: HashMap<Uuid, Customer>,
    transactions: HashMap<Uuid, Transaction>,
    /// Insertion order doubles as the tiebreak for equal timestamps.
    flags: Vec<FlaggedTransaction>,
    flag_keys: HashSet<(Uuid, String)>,
    rule_passes: HashMap<Uuid, DateTime<Utc>>,
    audit: Vec<LlmAuditLogEntry>,
    sanctioned: Vec<SanctionedEntity>,
}

impl Inner {
    fn flag_mut(&mut self, id: Uuid) -> Option<&mut FlaggedTransaction> {
        self.flags.iter_mut().find(|f| f.id == id)
    }

    fn sender_of(&self, flag: &FlaggedTransaction) -> Option<Uuid> {
        self.transactions
            .get(&flag.transaction_id)
            .map(|t| t.sender_id)
    }
}

/// Process-local store. Every operation takes one lock, so insert-if-absent is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.inner
            .write()
            .await
            .customers
            .insert(customer.id, customer);
    }

    pub async fn insert_transaction(&self, transaction: Transaction) {
        self.inner
            .write()
            .await
            .transactions
            .insert(transaction.id, transaction);
    }

    pub async fn flag_count(&self) -> usize {
        self.inner.read().await.flags.len()
    }

    pub async fn audit_len(&self) -> usize {
        self.inner.read().await.audit.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, PersistenceError> {
        Ok(self.inner.read().await.transactions.get(&id).cloned())
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, PersistenceError> {
        Ok(self.inner.read().await.customers.get(&id).cloned())
    }

    async fn transactions_pending_rule_pass(
        &self,
        limit: i64,
    ) -> Result<Vec<Transaction>, PersistenceError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|t| !inner.rule_passes.contains_key(&t.id))
            .cloned()
            .collect();
        pending.sort_by_key(|t| (t.transaction_date, t.id));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn count_sender_activity(
        &self,
        window: &ActivityWindow,
    ) -> Result<i64, PersistenceError> {
        let inner = self.inner.read().await;
        let count = inner
            .transactions
            .values()
            .filter(|t| {
                t.sender_id == window.sender_id
                    && t.id != window.exclude_transaction
                    && t.transaction_date >= window.since
                    && t.transaction_date < window.until
                    && window.min_amount.as_ref().map_or(true, |min| &t.amount >= min)
                    && window.max_amount.as_ref().map_or(true, |max| &t.amount <= max)
            })
            .count();
        Ok(count as i64)
    }

    async fn insert_flag_if_absent(
        &self,
        flag: &NewFlag,
    ) -> Result<Option<FlaggedTransaction>, PersistenceError> {
        let mut inner = self.inner.write().await;
        let key = (flag.transaction_id, flag.rule_name.clone());
        if !inner.flag_keys.insert(key) {
            return Ok(None);
        }
        let created = flag.clone().into_flag(Uuid::new_v4());
        inner.flags.push(created.clone());
        Ok(Some(created))
    }

    async fn mark_rule_pass(
        &self,
        transaction_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.inner
            .write()
            .await
            .rule_passes
            .insert(transaction_id, completed_at);
        Ok(())
    }

    async fn get_flag(&self, id: Uuid) -> Result<Option<FlaggedTransaction>, PersistenceError> {
        Ok(self
            .inner
            .read()
            .await
            .flags
            .iter()
            .find(|f| f.id == id)
            .cloned())
    }

    async fn flags_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<FlaggedTransaction>, PersistenceError> {
        let inner = self.inner.read().await;
        let mut flags: Vec<FlaggedTransaction> = inner
            .flags
            .iter()
            .filter(|f| f.transaction_id == transaction_id)
            .cloned()
            .collect();
        flags.sort_by_key(|f| f.flagged_at);
        Ok(flags)
    }

    async fn unanalyzed_flags(
        &self,
        limit: i64,
    ) -> Result<Vec<FlaggedTransaction>, PersistenceError> {
        let inner = self.inner.read().await;
        let mut flags: Vec<FlaggedTransaction> = inner
            .flags
            .iter()
            .filter(|f| f.llm.is_none())
            .cloned()
            .collect();
        flags.sort_by_key(|f| f.flagged_at);
        flags.truncate(limit.max(0) as usize);
        Ok(flags)
    }

    async fn prior_flags_for_customer(
        &self,
        customer_id: Uuid,
        exclude_flag: Uuid,
        limit: i64,
    ) -> Result<Vec<FlaggedTransaction>, PersistenceError> {
        let inner = self.inner.read().await;
        let mut flags: Vec<FlaggedTransaction> = inner
            .flags
            .iter()
            .filter(|f| f.id != exclude_flag && inner.sender_of(f) == Some(customer_id))
            .cloned()
            .collect();
        flags.sort_by_key(|f| std::cmp::Reverse(f.flagged_at));
        flags.truncate(limit.max(0) as usize);
        Ok(flags)
    }

    async fn record_llm_analysis(
        &self,
        flag_id: Uuid,
        analysis: &LlmAnalysis,
    ) -> Result<bool, PersistenceError> {
        let mut inner = self.inner.write().await;
        match inner.flag_mut(flag_id) {
            Some(flag) => {
                flag.llm = Some(analysis.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_review(
        &self,
        flag_id: Uuid,
        review: &ReviewRecord,
    ) -> Result<ReviewWrite, PersistenceError> {
        let mut inner = self.inner.write().await;
        let Some(flag) = inner.flag_mut(flag_id) else {
            return Ok(ReviewWrite::NotFound);
        };
        if let Some(existing) = flag.review.reviewed_at {
            if existing > review.reviewed_at {
                return Ok(ReviewWrite::Stale);
            }
        }
        flag.review.verdict = review.verdict;
        flag.review.notes = Some(review.notes.clone());
        flag.review.reviewer = Some(review.reviewer.clone());
        flag.review.reviewed_at = Some(review.reviewed_at);
        Ok(ReviewWrite::Applied)
    }

    async fn list_flags(
        &self,
        filter: &FlagFilter,
    ) -> Result<(Vec<FlagRecord>, i64), PersistenceError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&FlaggedTransaction> = inner
            .flags
            .iter()
            .filter(|f| filter.risk_level.map_or(true, |l| f.risk_level == l))
            .filter(|f| {
                filter
                    .llm_risk_level
                    .map_or(true, |l| f.llm.as_ref().map(|a| a.risk_level) == Some(l))
            })
            .filter(|f| filter.rule_name.as_ref().map_or(true, |r| &f.rule_name == r))
            .filter(|f| filter.status.map_or(true, |s| f.status == s))
            .collect();
        matching.sort_by_key(|f| std::cmp::Reverse(f.flagged_at));
        let total = matching.len() as i64;

        let mut records = Vec::new();
        for flag in matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
        {
            let transaction = inner.transactions.get(&flag.transaction_id).cloned().ok_or(
                PersistenceError::CorruptRow {
                    table: "flagged_transactions",
                    reason: "dangling transaction_id".to_string(),
                },
            )?;
            let customer = inner.customers.get(&transaction.sender_id).cloned().ok_or(
                PersistenceError::CorruptRow {
                    table: "transactions",
                    reason: "dangling sender_id".to_string(),
                },
            )?;
            records.push(FlagRecord {
                flag: flag.clone(),
                transaction,
                customer,
            });
        }

        Ok((records, total))
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<(Vec<TransactionRecord>, i64), PersistenceError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&Transaction> = inner
            .transactions
            .values()
            .filter(|t| {
                filter
                    .transaction_type
                    .as_ref()
                    .map_or(true, |kind| &t.transaction_type == kind)
            })
            .filter(|t| filter.min_amount.as_ref().map_or(true, |min| &t.amount >= min))
            .filter(|t| filter.max_amount.as_ref().map_or(true, |max| &t.amount <= max))
            .collect();
        matching.sort_by_key(|t| (std::cmp::Reverse(t.transaction_date), t.id));
        let total = matching.len() as i64;

        let mut records = Vec::new();
        for transaction in matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
        {
            let customer = inner.customers.get(&transaction.sender_id).cloned().ok_or(
                PersistenceError::CorruptRow {
                    table: "transactions",
                    reason: "dangling sender_id".to_string(),
                },
            )?;
            records.push(TransactionRecord {
                transaction: transaction.clone(),
                customer,
            });
        }

        Ok((records, total))
    }

    async fn list_customers(
        &self,
        filter: &CustomerFilter,
    ) -> Result<(Vec<Customer>, i64), PersistenceError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&Customer> = inner
            .customers
            .values()
            .filter(|c| filter.min_risk_score.map_or(true, |min| c.risk_score >= min))
            .filter(|c| {
                filter
                    .country_code
                    .as_ref()
                    .map_or(true, |code| c.country_code.as_ref() == Some(code))
            })
            .collect();
        matching.sort_by_key(|c| (c.created_at, c.id));
        let total = matching.len() as i64;

        let customers = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect();

        Ok((customers, total))
    }

    async fn append_audit_entry(&self, entry: &LlmAuditLogEntry) -> Result<(), PersistenceError> {
        self.inner.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<LlmAuditLogEntry>, PersistenceError> {
        let inner = self.inner.read().await;
        // Newest first; reversing keeps later appends ahead on equal timestamps.
        let mut entries: Vec<LlmAuditLogEntry> = inner
            .audit
            .iter()
            .rev()
            .filter(|e| filter.status.map_or(true, |s| e.status == s))
            .filter(|e| filter.transaction_id.map_or(true, |t| e.transaction_id == t))
            .filter(|e| filter.since.map_or(true, |s| e.created_at >= s))
            .filter(|e| filter.until.map_or(true, |u| e.created_at < u))
            .cloned()
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        if let Some(limit) = filter.limit {
            entries.truncate(limit.max(0) as usize);
        }
        Ok(entries)
    }

    async fn audit_totals(&self) -> Result<AuditTotals, PersistenceError> {
        let inner = self.inner.read().await;
        let mut totals = AuditTotals {
            total_cost: BigDecimal::from(0),
            ..Default::default()
        };
        for entry in &inner.audit {
            totals.total_requests += 1;
            if entry.status == AuditStatus::Success {
                totals.successful_requests += 1;
            }
            totals.total_cost += &entry.cost_estimate;
        }
        Ok(totals)
    }

    async fn sanctioned_entities(&self) -> Result<Vec<SanctionedEntity>, PersistenceError> {
        Ok(self.inner.read().await.sanctioned.clone())
    }

    async fn upsert_sanctioned_entity(
        &self,
        entity: &NewSanctionedEntity,
    ) -> Result<i32, PersistenceError> {
        let mut inner = self.inner.write().await;
        let position = inner.sanctioned.iter().position(|e| e.name == entity.name);
        let id = match position {
            Some(i) => inner.sanctioned[i].id,
            None => inner.sanctioned.len() as i32 + 1,
        };
        let record = SanctionedEntity {
            id,
            name: entity.name.clone(),
            aliases: entity.aliases.clone(),
            entity_type: entity.entity_type.clone(),
            country_code: entity.country_code.clone(),
            sanctions_program: entity.sanctions_program.clone(),
        };
        match position {
            Some(i) => inner.sanctioned[i] = record,
            None => inner.sanctioned.push(record),
        }
        Ok(id)
    }

    async fn stats(&self, recent_since: DateTime<Utc>) -> Result<StoreStats, PersistenceError> {
        let inner = self.inner.read().await;

        let mut by_risk_level: HashMap<String, i64> = HashMap::new();
        let mut by_llm_risk_level: HashMap<String, i64> = HashMap::new();
        let mut by_rule: HashMap<String, i64> = HashMap::new();
        for flag in &inner.flags {
            *by_risk_level
                .entry(flag.risk_level.as_str().to_string())
                .or_default() += 1;
            if let Some(analysis) = &flag.llm {
                *by_llm_risk_level
                    .entry(analysis.risk_level.as_str().to_string())
                    .or_default() += 1;
            }
            *by_rule.entry(flag.rule_name.clone()).or_default() += 1;
        }

        let mut by_risk_level: Vec<(String, i64)> = by_risk_level.into_iter().collect();
        by_risk_level.sort();
        let mut by_llm_risk_level: Vec<(String, i64)> = by_llm_risk_level.into_iter().collect();
        by_llm_risk_level.sort();
        let mut top_rules: Vec<(String, i64)> = by_rule.into_iter().collect();
        top_rules.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_rules.truncate(5);

        Ok(StoreStats {
            total_customers: inner.customers.len() as i64,
            total_transactions: inner.transactions.len() as i64,
            total_flagged: inner.flags.len() as i64,
            flagged_with_llm: inner.flags.iter().filter(|f| f.llm.is_some()).count() as i64,
            recent_transactions: inner
                .transactions
                .values()
                .filter(|t| t.transaction_date >= recent_since)
                .count() as i64,
            recent_flagged: inner
                .flags
                .iter()
                .filter(|f| f.flagged_at >= recent_since)
                .count() as i64,
            by_risk_level,
            by_llm_risk_level,
            top_rules,
        })
    }
}
