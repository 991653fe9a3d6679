use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::config::RulesConfig;
use crate::db::{ActivityWindow, Store};
use crate::error::PersistenceError;
use crate::sanctions::SanctionsList;
use crate::types::Transaction;

use super::catalog;
use super::types::{decimal, Rule, RuleContext, RuleInfo, SenderActivity};

/// Outcome of one rule run over a batch of transactions.
#[derive(Debug, Clone, Default)]
pub struct RuleRunSummary {
    pub transactions_evaluated: usize,
    pub flags_created: usize,
    pub new_flag_ids: Vec<Uuid>,
    pub rule_errors: usize,
    /// Transactions whose reads or writes failed; their rule pass stays open.
    pub failed_transactions: usize,
}

struct TransactionOutcome {
    created: Vec<Uuid>,
    rule_errors: usize,
}

/// Runs the rule catalog over transactions and persists the resulting flags.
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
    config: RulesConfig,
}

impl RuleEngine {
    pub fn new(config: RulesConfig) -> Self {
        Self {
            rules: catalog::build(&config),
            config,
        }
    }

    pub fn rule_infos(&self) -> Vec<RuleInfo> {
        self.rules.iter().map(|r| r.info()).collect()
    }

    pub fn scan_limit(&self) -> i64 {
        self.config.scan_limit
    }

    /// Evaluate a batch concurrently. Failures are counted per transaction and never abort the batch.
    pub async fn evaluate_batch(
        &self,
        store: &dyn Store,
        sanctions: &SanctionsList,
        transactions: Vec<Transaction>,
    ) -> RuleRunSummary {
        let mut summary = RuleRunSummary::default();

        let outcomes: Vec<(Uuid, Result<TransactionOutcome, PersistenceError>)> =
            stream::iter(transactions)
                .map(|tx| async move {
                    let id = tx.id;
                    (id, self.evaluate_transaction(store, sanctions, &tx).await)
                })
                .buffer_unordered(self.config.workers.max(1))
                .collect()
                .await;

        for (transaction_id, outcome) in outcomes {
            summary.transactions_evaluated += 1;
            match outcome {
                Ok(outcome) => {
                    summary.flags_created += outcome.created.len();
                    summary.new_flag_ids.extend(outcome.created);
                    summary.rule_errors += outcome.rule_errors;
                }
                Err(e) => {
                    tracing::error!(
                        transaction_id = %transaction_id,
                        error = %e,
                        "Rule evaluation failed for transaction"
                    );
                    summary.failed_transactions += 1;
                }
            }
        }

        tracing::info!(
            evaluated = summary.transactions_evaluated,
            flags_created = summary.flags_created,
            rule_errors = summary.rule_errors,
            failed = summary.failed_transactions,
            "Rule run complete"
        );
        summary
    }

    async fn evaluate_transaction(
        &self,
        store: &dyn Store,
        sanctions: &SanctionsList,
        transaction: &Transaction,
    ) -> Result<TransactionOutcome, PersistenceError> {
        let customer = store.get_customer(transaction.sender_id).await?;
        let activity = self.gather_activity(store, transaction).await?;
        let ctx = RuleContext {
            customer: customer.as_ref(),
            sanctions,
            activity,
        };

        let flagged_at = Utc::now();
        let mut outcome = TransactionOutcome {
            created: Vec::new(),
            rule_errors: 0,
        };

        for rule in &self.rules {
            let candidate = match rule.evaluate(transaction, &ctx) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        rule = rule.name(),
                        transaction_id = %transaction.id,
                        error = %e,
                        "Rule evaluation error, skipping rule"
                    );
                    outcome.rule_errors += 1;
                    continue;
                }
            };

            let Some(new_flag) = candidate.into_new_flag(transaction.id, flagged_at) else {
                continue;
            };
            if let Some(flag) = store.insert_flag_if_absent(&new_flag).await? {
                tracing::info!(
                    flag_id = %flag.id,
                    transaction_id = %transaction.id,
                    rule = %flag.rule_name,
                    risk_level = %flag.risk_level,
                    risk_score = flag.risk_score,
                    "Transaction flagged"
                );
                outcome.created.push(flag.id);
            }
        }

        if outcome.rule_errors == 0 {
            store.mark_rule_pass(transaction.id, Utc::now()).await?;
        }

        Ok(outcome)
    }

    /// Count the sender's other transactions in each rule window.
    /// Windows whose rule cannot fire for this transaction are skipped.
    async fn gather_activity(
        &self,
        store: &dyn Store,
        transaction: &Transaction,
    ) -> Result<SenderActivity, PersistenceError> {
        let mut activity = SenderActivity::default();
        let at = transaction.transaction_date;
        let amount = &transaction.amount;

        let high_value = decimal(self.config.high_value.threshold);
        if amount >= &high_value {
            let day_start = at
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|d| d.and_utc())
                .unwrap_or(at);
            activity.same_day_high_value = store
                .count_sender_activity(&self.window(
                    transaction,
                    day_start,
                    day_start + Duration::days(1),
                    Some(high_value),
                    None,
                ))
                .await?;
        }

        let structuring = &self.config.structuring;
        let floor = decimal(structuring.floor);
        let ceiling = decimal(structuring.ceiling);
        if amount >= &floor && amount < &ceiling {
            activity.similar_recent = store
                .count_sender_activity(&self.window(
                    transaction,
                    at - Duration::days(structuring.window_days),
                    through(at),
                    Some(floor),
                    Some(decimal(structuring.similar_max)),
                ))
                .await?;
        }

        activity.velocity_window = store
            .count_sender_activity(&self.window(
                transaction,
                at - Duration::seconds(self.config.velocity.window_secs),
                through(at),
                None,
                None,
            ))
            .await?;

        Ok(activity)
    }

    fn window(
        &self,
        transaction: &Transaction,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        min_amount: Option<BigDecimal>,
        max_amount: Option<BigDecimal>,
    ) -> ActivityWindow {
        ActivityWindow {
            sender_id: transaction.sender_id,
            exclude_transaction: transaction.id,
            since,
            until,
            min_amount,
            max_amount,
        }
    }
}

/// Exclusive bound that still covers transactions at exactly `at`.
fn through(at: DateTime<Utc>) -> DateTime<Utc> {
    at + Duration::microseconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SanctionsConfig;
    use crate::db::MemoryStore;
    use crate::testing::{customer, transaction};
    use crate::types::RiskLevel;

    fn engine() -> RuleEngine {
        RuleEngine::new(RulesConfig::default())
    }

    fn sanctions() -> SanctionsList {
        SanctionsList::new(Vec::new(), &SanctionsConfig::default())
    }

    #[tokio::test]
    async fn test_withdrawal_at_night_creates_three_flags() {
        let store = MemoryStore::new();
        let c = customer(1, Some("US"));
        let tx = transaction(&c, "withdrawal", "15000.00", "2024-03-01T03:24:00Z");
        store.insert_customer(c).await;
        store.insert_transaction(tx.clone()).await;

        let summary = engine()
            .evaluate_batch(&store, &sanctions(), vec![tx.clone()])
            .await;
        assert_eq!(summary.transactions_evaluated, 1);
        assert_eq!(summary.flags_created, 3);
        assert_eq!(summary.rule_errors, 0);

        let flags = store.flags_for_transaction(tx.id).await.unwrap();
        let mut found: Vec<(&str, RiskLevel)> = flags
            .iter()
            .map(|f| (f.rule_name.as_str(), f.risk_level))
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![
                ("LARGE_CASH_WITHDRAWAL", RiskLevel::High),
                ("ROUND_NUMBER_PATTERN", RiskLevel::Low),
                ("UNUSUAL_TIME_PATTERN", RiskLevel::Low),
            ]
        );
        assert!(store
            .transactions_pending_rule_pass(10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = MemoryStore::new();
        let c = customer(1, Some("US"));
        let tx = transaction(&c, "withdrawal", "15000.00", "2024-03-01T03:24:00Z");
        store.insert_customer(c).await;
        store.insert_transaction(tx.clone()).await;

        let engine = engine();
        let first = engine
            .evaluate_batch(&store, &sanctions(), vec![tx.clone()])
            .await;
        let second = engine
            .evaluate_batch(&store, &sanctions(), vec![tx.clone()])
            .await;

        assert_eq!(first.flags_created, 3);
        assert_eq!(second.flags_created, 0);
        assert!(second.new_flag_ids.is_empty());
        assert_eq!(store.flag_count().await, 3);
    }

    #[tokio::test]
    async fn test_high_risk_customer_abroad() {
        let store = MemoryStore::new();
        let c = customer(4, Some("US"));
        let mut tx = transaction(&c, "withdrawal", "15000.00", "2024-03-01T03:24:00Z");
        tx.counterparty_country = Some("IR".to_string());
        store.insert_customer(c).await;
        store.insert_transaction(tx.clone()).await;

        let engine = engine();
        let first = engine
            .evaluate_batch(&store, &sanctions(), vec![tx.clone()])
            .await;
        assert_eq!(first.flags_created, 5);

        let flags = store.flags_for_transaction(tx.id).await.unwrap();
        let level_of = |rule: &str| {
            flags
                .iter()
                .find(|f| f.rule_name == rule)
                .map(|f| f.risk_level)
        };
        assert_eq!(level_of("LARGE_CASH_WITHDRAWAL"), Some(RiskLevel::High));
        assert_eq!(level_of("HIGH_RISK_CUSTOMER"), Some(RiskLevel::Medium));
        assert_eq!(level_of("CROSS_BORDER_THRESHOLD"), Some(RiskLevel::Medium));
        // Withdrawals are not transfers, so the sanctioned-country rule stays quiet
        assert_eq!(level_of("SANCTIONED_COUNTRY_TRANSFER"), None);

        let second = engine
            .evaluate_batch(&store, &sanctions(), vec![tx.clone()])
            .await;
        assert_eq!(second.flags_created, 0);
        assert_eq!(store.flag_count().await, 5);
    }

    #[tokio::test]
    async fn test_history_windows() {
        let store = MemoryStore::new();
        let c = customer(1, Some("US"));
        store.insert_customer(c.clone()).await;

        // One near-threshold transfer the day before, another two weeks back
        let prior = transaction(&c, "transfer", "9400.00", "2024-03-05T10:00:00Z");
        let older = transaction(&c, "transfer", "9100.00", "2024-02-20T10:00:00Z");
        let current = transaction(&c, "transfer", "9800.00", "2024-03-06T10:00:00Z");
        for tx in [&prior, &older, &current] {
            store.insert_transaction(tx.clone()).await;
        }

        let summary = engine()
            .evaluate_batch(&store, &sanctions(), vec![current.clone()])
            .await;
        assert_eq!(summary.flags_created, 1);
        let flags = store.flags_for_transaction(current.id).await.unwrap();
        assert_eq!(flags[0].rule_name, "STRUCTURING_PATTERN");
        assert_eq!(flags[0].risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_structuring_history_band() {
        let store = MemoryStore::new();
        let c = customer(1, Some("US"));
        store.insert_customer(c.clone()).await;

        // Above the similar-history cap, so it does not count
        let above_cap = transaction(&c, "transfer", "9999.50", "2024-03-05T10:00:00Z");
        let current = transaction(&c, "transfer", "9800.00", "2024-03-06T10:00:00Z");
        store.insert_transaction(above_cap.clone()).await;
        store.insert_transaction(current.clone()).await;

        let summary = engine()
            .evaluate_batch(&store, &sanctions(), vec![current.clone()])
            .await;
        assert_eq!(summary.flags_created, 0);

        // The cap itself is inclusive
        let other = customer(1, Some("US"));
        store.insert_customer(other.clone()).await;
        let at_cap = transaction(&other, "withdrawal", "9999.00", "2024-03-04T10:00:00Z");
        let next = transaction(&other, "transfer", "9700.00", "2024-03-06T11:00:00Z");
        store.insert_transaction(at_cap).await;
        store.insert_transaction(next.clone()).await;

        let summary = engine()
            .evaluate_batch(&store, &sanctions(), vec![next.clone()])
            .await;
        assert_eq!(summary.flags_created, 1);
        let flags = store.flags_for_transaction(next.id).await.unwrap();
        assert_eq!(flags[0].rule_name, "STRUCTURING_PATTERN");
    }

    #[tokio::test]
    async fn test_missing_customer_leaves_pass_open() {
        let store = MemoryStore::new();
        let c = customer(5, Some("US"));
        let tx = transaction(&c, "payment", "6000.00", "2024-03-01T12:00:00Z");
        // Customer deliberately absent
        store.insert_transaction(tx.clone()).await;

        let summary = engine()
            .evaluate_batch(&store, &sanctions(), vec![tx.clone()])
            .await;
        assert_eq!(summary.rule_errors, 1);
        assert_eq!(summary.failed_transactions, 0);

        let pending = store.transactions_pending_rule_pass(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, tx.id);
    }

    #[tokio::test]
    async fn test_velocity_counts_other_transactions() {
        let store = MemoryStore::new();
        let c = customer(1, Some("US"));
        store.insert_customer(c.clone()).await;

        let mut batch = Vec::new();
        for minute in 0..6 {
            let tx = transaction(
                &c,
                "payment",
                "20.00",
                &format!("2024-03-01T12:{:02}:00Z", minute * 5),
            );
            store.insert_transaction(tx.clone()).await;
            batch.push(tx);
        }

        let summary = engine().evaluate_batch(&store, &sanctions(), batch).await;
        // Only the last transaction sees five others in the preceding hour
        assert_eq!(summary.flags_created, 1);
        assert_eq!(summary.transactions_evaluated, 6);
    }
}
