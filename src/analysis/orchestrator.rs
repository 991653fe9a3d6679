use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::db::Store;
use crate::error::AnalysisError;
use crate::llm::{AuditTarget, LlmClient, PromptBuilder};
use crate::types::{FlaggedTransaction, LlmAnalysis};

/// Which flags a batch covers.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisBatch {
    /// One flag, re-analyzed even if it already carries an analysis.
    Flag(Uuid),
    /// The unanalyzed flags of one transaction.
    Transaction(Uuid),
    /// Unanalyzed flags among these ids; unknown ids are skipped.
    Flags(Vec<Uuid>),
    /// Up to N unanalyzed flags, oldest first.
    Limit(i64),
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub flagged_transaction_id: Uuid,
    pub transaction_id: Uuid,
    pub rule_name: String,
    pub analysis: LlmAnalysis,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub analyses_attempted: usize,
    pub analyses_completed: usize,
    pub analyses_failed: usize,
    pub results: Vec<AnalysisResult>,
}

/// Runs prompt building, the LLM client and result write-back over a batch of flags.
pub struct AnalysisOrchestrator {
    store: Arc<dyn Store>,
    prompts: PromptBuilder,
    client: LlmClient,
    config: AnalysisConfig,
}

impl AnalysisOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        prompts: PromptBuilder,
        client: LlmClient,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            store,
            prompts,
            client,
            config,
        }
    }

    /// Clamp a requested batch size into the configured range; absent means the default.
    pub fn batch_limit(&self, requested: Option<i64>) -> i64 {
        requested
            .unwrap_or(self.config.default_batch_limit)
            .clamp(1, self.config.max_batch_limit)
    }

    pub async fn run(&self, batch: AnalysisBatch) -> Result<BatchOutcome, AnalysisError> {
        let targets = self.select(batch).await?;
        let mut outcome = BatchOutcome {
            analyses_attempted: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            return Ok(outcome);
        }

        tracing::info!(
            flags = targets.len(),
            workers = self.config.workers,
            provider = self.client.provider_name(),
            "Starting LLM analysis batch"
        );

        let results: Vec<(Uuid, Result<AnalysisResult, AnalysisError>)> = stream::iter(targets)
            .map(|flag| async move {
                let id = flag.id;
                (id, self.analyze_flag(flag).await)
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        for (flag_id, result) in results {
            match result {
                Ok(result) => {
                    outcome.analyses_completed += 1;
                    outcome.results.push(result);
                }
                Err(e) => {
                    tracing::error!(flag_id = %flag_id, error = %e, "LLM analysis failed for flag");
                    outcome.analyses_failed += 1;
                }
            }
        }

        tracing::info!(
            attempted = outcome.analyses_attempted,
            completed = outcome.analyses_completed,
            failed = outcome.analyses_failed,
            "LLM analysis batch complete"
        );
        Ok(outcome)
    }

    async fn select(&self, batch: AnalysisBatch) -> Result<Vec<FlaggedTransaction>, AnalysisError> {
        match batch {
            AnalysisBatch::Flag(id) => {
                let flag = self
                    .store
                    .get_flag(id)
                    .await?
                    .ok_or(AnalysisError::FlagNotFound(id))?;
                Ok(vec![flag])
            }
            AnalysisBatch::Transaction(id) => {
                if self.store.get_transaction(id).await?.is_none() {
                    return Err(AnalysisError::TransactionNotFound(id));
                }
                let flags = self.store.flags_for_transaction(id).await?;
                Ok(flags.into_iter().filter(|f| f.llm.is_none()).collect())
            }
            AnalysisBatch::Flags(ids) => {
                let mut flags = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.store.get_flag(id).await? {
                        Some(flag) if flag.llm.is_none() => flags.push(flag),
                        Some(_) => {}
                        None => tracing::warn!(flag_id = %id, "Flag vanished before analysis"),
                    }
                }
                Ok(flags)
            }
            AnalysisBatch::Limit(n) => {
                let limit = self.batch_limit(Some(n));
                Ok(self.store.unanalyzed_flags(limit).await?)
            }
        }
    }

    async fn analyze_flag(&self, flag: FlaggedTransaction) -> Result<AnalysisResult, AnalysisError> {
        let transaction = self
            .store
            .get_transaction(flag.transaction_id)
            .await?
            .ok_or(AnalysisError::TransactionNotFound(flag.transaction_id))?;
        let customer = self
            .store
            .get_customer(transaction.sender_id)
            .await?
            .ok_or(AnalysisError::CustomerNotFound(transaction.sender_id))?;
        let prior = self
            .store
            .prior_flags_for_customer(customer.id, flag.id, self.config.prior_flags)
            .await?;

        let request = self.prompts.build(&flag, &transaction, &customer, &prior);
        let analysis = self
            .client
            .analyze(
                &request,
                AuditTarget {
                    transaction_id: transaction.id,
                    flagged_transaction_id: Some(flag.id),
                },
            )
            .await?;

        if !self.store.record_llm_analysis(flag.id, &analysis).await? {
            return Err(AnalysisError::FlagNotFound(flag.id));
        }

        Ok(AnalysisResult {
            flagged_transaction_id: flag.id,
            transaction_id: transaction.id,
            rule_name: flag.rule_name,
            analysis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditTracker, PricingTable};
    use crate::config::LlmConfig;
    use crate::db::{AuditFilter, MemoryStore};
    use crate::error::LlmRequestError;
    use crate::llm::RetryPolicy;
    use crate::testing::{customer, new_flag, transaction, valid_reply, ScriptedProvider};
    use crate::types::{AuditStatus, LlmRiskLevel};
    use std::time::Duration;

    fn orchestrator(store: Arc<MemoryStore>, provider: ScriptedProvider) -> AnalysisOrchestrator {
        let llm = LlmConfig::default();
        let analysis = AnalysisConfig::default();
        let tracker = AuditTracker::new(store.clone(), PricingTable::from_config(&llm).unwrap());
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(2),
            request_timeout: Duration::from_secs(5),
        };
        let client = LlmClient::new(Arc::new(provider), tracker, policy, analysis.max_risk_factors);
        AnalysisOrchestrator::new(
            store,
            PromptBuilder::new(&llm, &analysis),
            client,
            analysis,
        )
    }

    /// One customer with `n` flagged transactions.
    async fn seeded(n: usize) -> (Arc<MemoryStore>, Vec<FlaggedTransaction>) {
        let store = Arc::new(MemoryStore::new());
        let c = customer(2, Some("US"));
        store.insert_customer(c.clone()).await;
        let mut flags = Vec::new();
        for i in 0..n {
            let tx = transaction(
                &c,
                "withdrawal",
                "15000.00",
                &format!("2024-03-01T{:02}:00:00Z", i % 24),
            );
            store.insert_transaction(tx.clone()).await;
            let flag = store
                .insert_flag_if_absent(&new_flag(&tx, "LARGE_CASH_WITHDRAWAL", 85))
                .await
                .unwrap()
                .unwrap();
            flags.push(flag);
        }
        (store, flags)
    }

    #[tokio::test]
    async fn test_batch_limit_leaves_remainder() {
        let (store, _) = seeded(8).await;
        let orchestrator = orchestrator(store.clone(), ScriptedProvider::always(Ok(valid_reply())));

        let outcome = orchestrator.run(AnalysisBatch::Limit(5)).await.unwrap();
        assert_eq!(outcome.analyses_attempted, 5);
        assert_eq!(outcome.analyses_completed, 5);
        assert_eq!(outcome.analyses_failed, 0);
        assert_eq!(outcome.results.len(), 5);

        let remaining = store.unanalyzed_flags(100).await.unwrap();
        assert_eq!(remaining.len(), 3);

        let audit = store
            .list_audit_entries(&AuditFilter::default())
            .await
            .unwrap();
        assert_eq!(audit.len(), 5);
        assert!(audit.iter().all(|e| e.flagged_transaction_id.is_some()));
    }

    #[tokio::test]
    async fn test_analysis_is_written_to_flag() {
        let (store, flags) = seeded(1).await;
        let orchestrator = orchestrator(store.clone(), ScriptedProvider::always(Ok(valid_reply())));

        let outcome = orchestrator.run(AnalysisBatch::Flag(flags[0].id)).await.unwrap();
        assert_eq!(outcome.analyses_completed, 1);

        let stored = store.get_flag(flags[0].id).await.unwrap().unwrap();
        let analysis = stored.llm.unwrap();
        assert_eq!(analysis.risk_level, LlmRiskLevel::High);
        assert_eq!(analysis.confidence_score, 0.82);
        // Rule-side fields are untouched
        assert_eq!(stored.risk_score, 85);
    }

    #[tokio::test]
    async fn test_analyzed_flags_are_skipped_unless_named() {
        let (store, flags) = seeded(2).await;
        let provider = ScriptedProvider::always(Ok(valid_reply()));
        let orchestrator = orchestrator(store.clone(), provider.clone());

        orchestrator.run(AnalysisBatch::Limit(10)).await.unwrap();
        assert_eq!(provider.calls(), 2);

        let again = orchestrator.run(AnalysisBatch::Limit(10)).await.unwrap();
        assert_eq!(again.analyses_attempted, 0);

        let ids = flags.iter().map(|f| f.id).collect();
        let chained = orchestrator.run(AnalysisBatch::Flags(ids)).await.unwrap();
        assert_eq!(chained.analyses_attempted, 0);

        let tx_batch = orchestrator
            .run(AnalysisBatch::Transaction(flags[0].transaction_id))
            .await
            .unwrap();
        assert_eq!(tx_batch.analyses_attempted, 0);

        let explicit = orchestrator.run(AnalysisBatch::Flag(flags[0].id)).await.unwrap();
        assert_eq!(explicit.analyses_completed, 1);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_flag() {
        let (store, flags) = seeded(3).await;
        let mut malformed = valid_reply();
        malformed.arguments = Some("{\"risk_level\":\"Unknown\"}".to_string());
        let provider = ScriptedProvider::sequence(vec![
            Ok(malformed),
            Ok(valid_reply()),
        ]);
        let orchestrator = orchestrator(store.clone(), provider);

        let outcome = orchestrator.run(AnalysisBatch::Limit(3)).await.unwrap();
        assert_eq!(outcome.analyses_attempted, 3);
        assert_eq!(outcome.analyses_completed, 2);
        assert_eq!(outcome.analyses_failed, 1);

        let unanalyzed = store.unanalyzed_flags(10).await.unwrap();
        assert_eq!(unanalyzed.len(), 1);
        assert!(flags.iter().any(|f| f.id == unanalyzed[0].id));

        let failures = store
            .list_audit_entries(&AuditFilter {
                status: Some(AuditStatus::Failure),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_targets_are_errors() {
        let (store, _) = seeded(1).await;
        let orchestrator = orchestrator(
            store,
            ScriptedProvider::always(Err(LlmRequestError::Network("down".to_string()))),
        );

        let missing = Uuid::new_v4();
        assert!(matches!(
            orchestrator.run(AnalysisBatch::Flag(missing)).await,
            Err(AnalysisError::FlagNotFound(id)) if id == missing
        ));
        assert!(matches!(
            orchestrator.run(AnalysisBatch::Transaction(missing)).await,
            Err(AnalysisError::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_batch_limit_clamp() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store, ScriptedProvider::always(Ok(valid_reply())));
        assert_eq!(orchestrator.batch_limit(None), 10);
        assert_eq!(orchestrator.batch_limit(Some(0)), 1);
        assert_eq!(orchestrator.batch_limit(Some(5_000)), 100);
    }
}
