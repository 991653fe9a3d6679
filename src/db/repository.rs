use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::types::{
    AuditStatus, Customer, FlagStatus, FlaggedTransaction, LlmAnalysis, LlmAuditLogEntry,
    LlmRiskLevel, NewFlag, Review, ReviewRecord, ReviewVerdict, RiskLevel, SanctionedEntity,
    SuggestedAction, Transaction,
};

use super::{
    ActivityWindow, AuditFilter, AuditTotals, CustomerFilter, FlagFilter, FlagRecord,
    NewSanctionedEntity, ReviewWrite, Store, StoreStats, TransactionFilter, TransactionRecord,
};

const TRANSACTION_COLUMNS: &str = "id, sender_id, receiver_id, transaction_type, amount, currency, \
     description, channel, counterparty_name, counterparty_account, counterparty_country, \
     transaction_date, reference_number, status";

const CUSTOMER_COLUMNS: &str = "id, name, email, account_number, account_type, balance, \
     risk_score, is_sanctioned, country_code, created_at";

const FLAG_COLUMNS: &str = "id, transaction_id, rule_name, rule_description, risk_level, \
     risk_score, status, flagged_at, flagged_by, llm_risk_level, llm_explanation, \
     llm_suggested_action, llm_confidence_score, llm_risk_factors, llm_compliance_notes, \
     llm_model_used, llm_analyzed_at, review_verdict, review_notes, reviewed_by, reviewed_at";

const AUDIT_COLUMNS: &str = "id, transaction_id, flagged_transaction_id, model_used, attempt, \
     status, input_tokens, output_tokens, tokens_used, response_time_ms, cost_estimate, \
     error_message, prompt_sent, response_received, created_at";

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Option<Uuid>,
    transaction_type: String,
    amount: BigDecimal,
    currency: String,
    description: Option<String>,
    channel: Option<String>,
    counterparty_name: Option<String>,
    counterparty_account: Option<String>,
    counterparty_country: Option<String>,
    transaction_date: DateTime<Utc>,
    reference_number: Option<String>,
    status: String,
}

impl From<TransactionRow> for Transaction {
    fn from(row: TransactionRow) -> Self {
        Transaction {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            transaction_type: row.transaction_type,
            amount: row.amount,
            currency: row.currency,
            description: row.description,
            channel: row.channel,
            counterparty_name: row.counterparty_name,
            counterparty_account: row.counterparty_account,
            counterparty_country: row.counterparty_country,
            transaction_date: row.transaction_date,
            reference_number: row.reference_number,
            status: row.status,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    name: String,
    email: String,
    account_number: String,
    account_type: String,
    balance: BigDecimal,
    risk_score: i16,
    is_sanctioned: bool,
    country_code: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            name: row.name,
            email: row.email,
            account_number: row.account_number,
            account_type: row.account_type,
            balance: row.balance,
            risk_score: row.risk_score,
            is_sanctioned: row.is_sanctioned,
            country_code: row.country_code,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FlagRow {
    id: Uuid,
    transaction_id: Uuid,
    rule_name: String,
    rule_description: String,
    risk_level: String,
    risk_score: i32,
    status: String,
    flagged_at: DateTime<Utc>,
    flagged_by: String,
    llm_risk_level: Option<String>,
    llm_explanation: Option<String>,
    llm_suggested_action: Option<String>,
    llm_confidence_score: Option<f64>,
    llm_risk_factors: Option<Vec<String>>,
    llm_compliance_notes: Option<String>,
    llm_model_used: Option<String>,
    llm_analyzed_at: Option<DateTime<Utc>>,
    review_verdict: String,
    review_notes: Option<String>,
    reviewed_by: Option<String>,
    reviewed_at: Option<DateTime<Utc>>,
}

fn corrupt(table: &'static str, reason: impl ToString) -> PersistenceError {
    PersistenceError::CorruptRow {
        table,
        reason: reason.to_string(),
    }
}

impl TryFrom<FlagRow> for FlaggedTransaction {
    type Error = PersistenceError;

    fn try_from(row: FlagRow) -> Result<Self, Self::Error> {
        const TABLE: &str = "flagged_transactions";

        // The analysis columns are written together; a row with a timestamp
        // but missing fields is corrupt rather than unanalyzed.
        let llm = match row.llm_analyzed_at {
            None => None,
            Some(analyzed_at) => {
                let risk_level = row
                    .llm_risk_level
                    .as_deref()
                    .ok_or_else(|| corrupt(TABLE, "llm_risk_level missing"))?;
                let action = row
                    .llm_suggested_action
                    .as_deref()
                    .ok_or_else(|| corrupt(TABLE, "llm_suggested_action missing"))?;
                Some(LlmAnalysis {
                    risk_level: LlmRiskLevel::from_str(risk_level).map_err(|e| corrupt(TABLE, e))?,
                    explanation: row.llm_explanation.unwrap_or_default(),
                    suggested_action: SuggestedAction::from_str(action)
                        .map_err(|e| corrupt(TABLE, e))?,
                    confidence_score: row
                        .llm_confidence_score
                        .ok_or_else(|| corrupt(TABLE, "llm_confidence_score missing"))?,
                    risk_factors: row.llm_risk_factors.unwrap_or_default(),
                    compliance_notes: row.llm_compliance_notes,
                    model_used: row.llm_model_used.unwrap_or_default(),
                    analyzed_at,
                })
            }
        };

        Ok(FlaggedTransaction {
            id: row.id,
            transaction_id: row.transaction_id,
            rule_name: row.rule_name,
            rule_description: row.rule_description,
            risk_level: RiskLevel::from_str(&row.risk_level).map_err(|e| corrupt(TABLE, e))?,
            risk_score: row.risk_score,
            status: FlagStatus::from_str(&row.status).map_err(|e| corrupt(TABLE, e))?,
            flagged_at: row.flagged_at,
            flagged_by: row.flagged_by,
            llm,
            review: Review {
                verdict: ReviewVerdict::from_str(&row.review_verdict)
                    .map_err(|e| corrupt(TABLE, e))?,
                notes: row.review_notes,
                reviewer: row.reviewed_by,
                reviewed_at: row.reviewed_at,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    transaction_id: Uuid,
    flagged_transaction_id: Option<Uuid>,
    model_used: String,
    attempt: i32,
    status: String,
    input_tokens: i32,
    output_tokens: i32,
    tokens_used: i32,
    response_time_ms: i64,
    cost_estimate: BigDecimal,
    error_message: Option<String>,
    prompt_sent: String,
    response_received: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for LlmAuditLogEntry {
    type Error = PersistenceError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(LlmAuditLogEntry {
            id: row.id,
            transaction_id: row.transaction_id,
            flagged_transaction_id: row.flagged_transaction_id,
            model_used: row.model_used,
            attempt: row.attempt,
            status: AuditStatus::from_str(&row.status)
                .map_err(|e| corrupt("llm_audit_logs", e))?,
            input_tokens: row.input_tokens,
            output_tokens: row.output_tokens,
            tokens_used: row.tokens_used,
            response_time_ms: row.response_time_ms,
            cost_estimate: row.cost_estimate,
            error_message: row.error_message,
            prompt_sent: row.prompt_sent,
            response_received: row.response_received,
            created_at: row.created_at,
        })
    }
}

fn into_flags(rows: Vec<FlagRow>) -> Result<Vec<FlaggedTransaction>, PersistenceError> {
    rows.into_iter().map(FlaggedTransaction::try_from).collect()
}

fn push_flag_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &FlagFilter) {
    qb.push(" WHERE TRUE");
    if let Some(level) = filter.risk_level {
        qb.push(" AND risk_level = ").push_bind(level.as_str());
    }
    if let Some(level) = filter.llm_risk_level {
        qb.push(" AND llm_risk_level = ").push_bind(level.as_str());
    }
    if let Some(rule) = &filter.rule_name {
        qb.push(" AND rule_name = ").push_bind(rule.clone());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

fn push_transaction_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &TransactionFilter) {
    qb.push(" WHERE TRUE");
    if let Some(kind) = &filter.transaction_type {
        qb.push(" AND transaction_type = ").push_bind(kind.clone());
    }
    if let Some(min) = &filter.min_amount {
        qb.push(" AND amount >= ").push_bind(min.clone());
    }
    if let Some(max) = &filter.max_amount {
        qb.push(" AND amount <= ").push_bind(max.clone());
    }
}

fn push_customer_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &CustomerFilter) {
    qb.push(" WHERE TRUE");
    if let Some(score) = filter.min_risk_score {
        qb.push(" AND risk_score >= ").push_bind(score);
    }
    if let Some(country) = &filter.country_code {
        qb.push(" AND country_code = ").push_bind(country.clone());
    }
}

fn push_audit_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    qb.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(tx) = filter.transaction_id {
        qb.push(" AND transaction_id = ").push_bind(tx);
    }
    if let Some(since) = filter.since {
        qb.push(" AND created_at >= ").push_bind(since);
    }
    if let Some(until) = filter.until {
        qb.push(" AND created_at < ").push_bind(until);
    }
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, PersistenceError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Transaction::from))
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, PersistenceError> {
        let row: Option<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Customer::from))
    }

    async fn transactions_pending_rule_pass(
        &self,
        limit: i64,
    ) -> Result<Vec<Transaction>, PersistenceError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t
             WHERE NOT EXISTS (SELECT 1 FROM rule_passes p WHERE p.transaction_id = t.id)
             ORDER BY transaction_date ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Transaction::from).collect())
    }

    async fn count_sender_activity(
        &self,
        window: &ActivityWindow,
    ) -> Result<i64, PersistenceError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM transactions
             WHERE sender_id = $1
             AND id <> $2
             AND transaction_date >= $3
             AND transaction_date < $4
             AND ($5::NUMERIC IS NULL OR amount >= $5)
             AND ($6::NUMERIC IS NULL OR amount <= $6)",
        )
        .bind(window.sender_id)
        .bind(window.exclude_transaction)
        .bind(window.since)
        .bind(window.until)
        .bind(&window.min_amount)
        .bind(&window.max_amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn insert_flag_if_absent(
        &self,
        flag: &NewFlag,
    ) -> Result<Option<FlaggedTransaction>, PersistenceError> {
        let row: Option<FlagRow> = sqlx::query_as(&format!(
            "INSERT INTO flagged_transactions
                 (id, transaction_id, rule_name, rule_description, risk_level, risk_score, flagged_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (transaction_id, rule_name) DO NOTHING
             RETURNING {FLAG_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(flag.transaction_id)
        .bind(&flag.rule_name)
        .bind(&flag.rule_description)
        .bind(flag.risk_level.as_str())
        .bind(flag.risk_score)
        .bind(flag.flagged_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FlaggedTransaction::try_from).transpose()
    }

    async fn mark_rule_pass(
        &self,
        transaction_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO rule_passes (transaction_id, completed_at)
             VALUES ($1, $2)
             ON CONFLICT (transaction_id) DO UPDATE SET completed_at = $2",
        )
        .bind(transaction_id)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_flag(&self, id: Uuid) -> Result<Option<FlaggedTransaction>, PersistenceError> {
        let row: Option<FlagRow> = sqlx::query_as(&format!(
            "SELECT {FLAG_COLUMNS} FROM flagged_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FlaggedTransaction::try_from).transpose()
    }

    async fn flags_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Vec<FlaggedTransaction>, PersistenceError> {
        let rows: Vec<FlagRow> = sqlx::query_as(&format!(
            "SELECT {FLAG_COLUMNS} FROM flagged_transactions
             WHERE transaction_id = $1
             ORDER BY flagged_at ASC"
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        into_flags(rows)
    }

    async fn unanalyzed_flags(
        &self,
        limit: i64,
    ) -> Result<Vec<FlaggedTransaction>, PersistenceError> {
        let rows: Vec<FlagRow> = sqlx::query_as(&format!(
            "SELECT {FLAG_COLUMNS} FROM flagged_transactions
             WHERE llm_analyzed_at IS NULL
             ORDER BY flagged_at ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_flags(rows)
    }

    async fn prior_flags_for_customer(
        &self,
        customer_id: Uuid,
        exclude_flag: Uuid,
        limit: i64,
    ) -> Result<Vec<FlaggedTransaction>, PersistenceError> {
        let rows: Vec<FlagRow> = sqlx::query_as(&format!(
            "SELECT {FLAG_COLUMNS} FROM flagged_transactions
             WHERE transaction_id IN (SELECT id FROM transactions WHERE sender_id = $1)
             AND id <> $2
             ORDER BY flagged_at DESC
             LIMIT $3"
        ))
        .bind(customer_id)
        .bind(exclude_flag)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_flags(rows)
    }

    async fn record_llm_analysis(
        &self,
        flag_id: Uuid,
        analysis: &LlmAnalysis,
    ) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            "UPDATE flagged_transactions
             SET llm_risk_level = $2, llm_explanation = $3, llm_suggested_action = $4,
                 llm_confidence_score = $5, llm_risk_factors = $6, llm_compliance_notes = $7,
                 llm_model_used = $8, llm_analyzed_at = $9
             WHERE id = $1",
        )
        .bind(flag_id)
        .bind(analysis.risk_level.as_str())
        .bind(&analysis.explanation)
        .bind(analysis.suggested_action.as_str())
        .bind(analysis.confidence_score)
        .bind(&analysis.risk_factors)
        .bind(&analysis.compliance_notes)
        .bind(&analysis.model_used)
        .bind(analysis.analyzed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_review(
        &self,
        flag_id: Uuid,
        review: &ReviewRecord,
    ) -> Result<ReviewWrite, PersistenceError> {
        let result = sqlx::query(
            "UPDATE flagged_transactions
             SET review_verdict = $2, review_notes = $3, reviewed_by = $4, reviewed_at = $5
             WHERE id = $1 AND (reviewed_at IS NULL OR reviewed_at <= $5)",
        )
        .bind(flag_id)
        .bind(review.verdict.as_str())
        .bind(&review.notes)
        .bind(&review.reviewer)
        .bind(review.reviewed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(ReviewWrite::Applied);
        }

        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM flagged_transactions WHERE id = $1")
                .bind(flag_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(if exists.is_some() {
            ReviewWrite::Stale
        } else {
            ReviewWrite::NotFound
        })
    }

    async fn list_flags(
        &self,
        filter: &FlagFilter,
    ) -> Result<(Vec<FlagRecord>, i64), PersistenceError> {
        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM flagged_transactions");
        push_flag_filters(&mut count_qb, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {FLAG_COLUMNS} FROM flagged_transactions"));
        push_flag_filters(&mut qb, filter);
        qb.push(" ORDER BY flagged_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let flags = into_flags(qb.build_query_as().fetch_all(&self.pool).await?)?;

        if flags.is_empty() {
            return Ok((Vec::new(), total));
        }

        let tx_ids: Vec<Uuid> = flags.iter().map(|f| f.transaction_id).collect();
        let tx_rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ANY($1)"
        ))
        .bind(&tx_ids)
        .fetch_all(&self.pool)
        .await?;
        let transactions: HashMap<Uuid, Transaction> = tx_rows
            .into_iter()
            .map(|r| (r.id, Transaction::from(r)))
            .collect();

        let customer_ids: Vec<Uuid> = transactions.values().map(|t| t.sender_id).collect();
        let customer_rows: Vec<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ANY($1)"
        ))
        .bind(&customer_ids)
        .fetch_all(&self.pool)
        .await?;
        let customers: HashMap<Uuid, Customer> = customer_rows
            .into_iter()
            .map(|r| (r.id, Customer::from(r)))
            .collect();

        let mut records = Vec::with_capacity(flags.len());
        for flag in flags {
            let transaction = transactions
                .get(&flag.transaction_id)
                .cloned()
                .ok_or_else(|| corrupt("flagged_transactions", "dangling transaction_id"))?;
            let customer = customers
                .get(&transaction.sender_id)
                .cloned()
                .ok_or_else(|| corrupt("transactions", "dangling sender_id"))?;
            records.push(FlagRecord {
                flag,
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
        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM transactions");
        push_transaction_filters(&mut count_qb, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {TRANSACTION_COLUMNS} FROM transactions"));
        push_transaction_filters(&mut qb, filter);
        qb.push(" ORDER BY transaction_date DESC, id LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let rows: Vec<TransactionRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        if rows.is_empty() {
            return Ok((Vec::new(), total));
        }

        let customer_ids: Vec<Uuid> = rows.iter().map(|r| r.sender_id).collect();
        let customer_rows: Vec<CustomerRow> = sqlx::query_as(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ANY($1)"
        ))
        .bind(&customer_ids)
        .fetch_all(&self.pool)
        .await?;
        let customers: HashMap<Uuid, Customer> = customer_rows
            .into_iter()
            .map(|r| (r.id, Customer::from(r)))
            .collect();

        let records = rows
            .into_iter()
            .map(|row| {
                let transaction = Transaction::from(row);
                let customer = customers
                    .get(&transaction.sender_id)
                    .cloned()
                    .ok_or_else(|| corrupt("transactions", "dangling sender_id"))?;
                Ok(TransactionRecord {
                    transaction,
                    customer,
                })
            })
            .collect::<Result<Vec<_>, PersistenceError>>()?;

        Ok((records, total))
    }

    async fn list_customers(
        &self,
        filter: &CustomerFilter,
    ) -> Result<(Vec<Customer>, i64), PersistenceError> {
        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM customers");
        push_customer_filters(&mut count_qb, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {CUSTOMER_COLUMNS} FROM customers"));
        push_customer_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at ASC, id LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let rows: Vec<CustomerRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok((rows.into_iter().map(Customer::from).collect(), total))
    }

    async fn append_audit_entry(&self, entry: &LlmAuditLogEntry) -> Result<(), PersistenceError> {
        sqlx::query(&format!(
            "INSERT INTO llm_audit_logs ({AUDIT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(entry.id)
        .bind(entry.transaction_id)
        .bind(entry.flagged_transaction_id)
        .bind(&entry.model_used)
        .bind(entry.attempt)
        .bind(entry.status.as_str())
        .bind(entry.input_tokens)
        .bind(entry.output_tokens)
        .bind(entry.tokens_used)
        .bind(entry.response_time_ms)
        .bind(&entry.cost_estimate)
        .bind(&entry.error_message)
        .bind(&entry.prompt_sent)
        .bind(&entry.response_received)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_audit_entries(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<LlmAuditLogEntry>, PersistenceError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {AUDIT_COLUMNS} FROM llm_audit_logs"));
        push_audit_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows: Vec<AuditRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(LlmAuditLogEntry::try_from).collect()
    }

    async fn audit_totals(&self) -> Result<AuditTotals, PersistenceError> {
        let (total_requests, successful_requests, total_cost): (i64, i64, BigDecimal) =
            sqlx::query_as(
                "SELECT COUNT(*),
                        COUNT(*) FILTER (WHERE status = 'success'),
                        COALESCE(SUM(cost_estimate), 0)
                 FROM llm_audit_logs",
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(AuditTotals {
            total_requests,
            successful_requests,
            total_cost,
        })
    }

    async fn sanctioned_entities(&self) -> Result<Vec<SanctionedEntity>, PersistenceError> {
        let rows: Vec<(i32, String, Vec<String>, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(
                "SELECT id, name, aliases, entity_type, country_code, sanctions_program
                 FROM sanctioned_entities",
            )
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, name, aliases, entity_type, country_code, sanctions_program)| {
                    SanctionedEntity {
                        id,
                        name,
                        aliases,
                        entity_type,
                        country_code,
                        sanctions_program,
                    }
                },
            )
            .collect())
    }

    async fn upsert_sanctioned_entity(
        &self,
        entity: &NewSanctionedEntity,
    ) -> Result<i32, PersistenceError> {
        let (id,): (i32,) = sqlx::query_as(
            "INSERT INTO sanctioned_entities (name, aliases, entity_type, country_code, sanctions_program)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (name) DO UPDATE
             SET aliases = $2, entity_type = $3, country_code = $4, sanctions_program = $5
             RETURNING id",
        )
        .bind(&entity.name)
        .bind(&entity.aliases)
        .bind(&entity.entity_type)
        .bind(&entity.country_code)
        .bind(&entity.sanctions_program)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn stats(&self, recent_since: DateTime<Utc>) -> Result<StoreStats, PersistenceError> {
        let (total_customers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM customers")
            .fetch_one(&self.pool)
            .await?;

        let (total_transactions, recent_transactions): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE transaction_date >= $1) FROM transactions",
        )
        .bind(recent_since)
        .fetch_one(&self.pool)
        .await?;

        let (total_flagged, flagged_with_llm, recent_flagged): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COUNT(*) FILTER (WHERE llm_analyzed_at IS NOT NULL),
                    COUNT(*) FILTER (WHERE flagged_at >= $1)
             FROM flagged_transactions",
        )
        .bind(recent_since)
        .fetch_one(&self.pool)
        .await?;

        let by_risk_level: Vec<(String, i64)> = sqlx::query_as(
            "SELECT risk_level, COUNT(*) FROM flagged_transactions
             GROUP BY risk_level ORDER BY risk_level",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_llm_risk_level: Vec<(String, i64)> = sqlx::query_as(
            "SELECT llm_risk_level, COUNT(*) FROM flagged_transactions
             WHERE llm_risk_level IS NOT NULL
             GROUP BY llm_risk_level ORDER BY llm_risk_level",
        )
        .fetch_all(&self.pool)
        .await?;

        let top_rules: Vec<(String, i64)> = sqlx::query_as(
            "SELECT rule_name, COUNT(*) AS count FROM flagged_transactions
             GROUP BY rule_name ORDER BY count DESC, rule_name ASC LIMIT 5",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StoreStats {
            total_customers,
            total_transactions,
            total_flagged,
            flagged_with_llm,
            recent_transactions,
            recent_flagged,
            by_risk_level,
            by_llm_risk_level,
            top_rules,
        })
    }
}
