use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::analysis::{AnalysisBatch, AnalysisOrchestrator, BatchOutcome};
use crate::audit::{AuditSummary, AuditTracker, PricingTable};
use crate::config::{Config, SanctionsConfig};
use crate::db::{
    AuditFilter, CustomerFilter, FlagFilter, FlagRecord, Store, StoreStats, TransactionFilter,
    TransactionRecord,
};
use crate::error::{AnalysisError, PipelineError};
use crate::llm::{LlmClient, LlmProvider, OpenAiProvider, PromptBuilder, RetryPolicy};
use crate::review::{self, ReviewSubmission};
use crate::rules::{RuleEngine, RuleInfo};
use crate::sanctions::{loader, SanctionsList};
use crate::types::{Customer, FlaggedTransaction, LlmAuditLogEntry, ReviewRecord};

/// Window for the "recent activity" figures in [`PipelineStats`].
pub const RECENT_ACTIVITY_DAYS: i64 = 7;

/// Result of one `run_rules` call.
#[derive(Debug, Clone)]
pub struct RuleRunReport {
    pub transactions_evaluated: usize,
    pub flags_created: usize,
    pub rule_errors: usize,
    pub failed_transactions: usize,
    pub llm_analyses_completed: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FlagPage {
    pub flags: Vec<FlagRecord>,
    /// All matches, not just this page.
    pub total_results: i64,
}

#[derive(Debug, Clone)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionRecord>,
    pub total_results: i64,
}

#[derive(Debug, Clone)]
pub struct CustomerPage {
    pub customers: Vec<Customer>,
    pub total_results: i64,
}

#[derive(Debug, Clone)]
pub struct AuditReport {
    pub audit_logs: Vec<LlmAuditLogEntry>,
    pub summary: AuditSummary,
}

/// Every flag, LLM analysis and audit entry recorded for one transaction.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub transaction_id: Uuid,
    pub flags: Vec<FlaggedTransaction>,
    pub audit_logs: Vec<LlmAuditLogEntry>,
}

impl Explanation {
    pub fn analyzed_flags(&self) -> impl Iterator<Item = &FlaggedTransaction> {
        self.flags.iter().filter(|f| f.llm.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub store: StoreStats,
    pub audit: AuditSummary,
}

fn check_page(limit: i64, offset: i64) -> Result<(), PipelineError> {
    if limit < 1 {
        return Err(PipelineError::InvalidRequest(
            "limit must be at least 1".to_string(),
        ));
    }
    if offset < 0 {
        return Err(PipelineError::InvalidRequest(
            "offset must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// The process-wide context behind every operation: store, rule engine,
/// audit tracker and, when a provider is configured, the analysis orchestrator.
pub struct AmlPipeline {
    store: Arc<dyn Store>,
    rules: RuleEngine,
    sanctions: SanctionsConfig,
    audit: AuditTracker,
    orchestrator: Option<AnalysisOrchestrator>,
}

impl AmlPipeline {
    /// Initialize the pipeline: seed sanctioned entities, then wire the LLM
    /// provider when it is enabled and an API key is present.
    pub async fn init(store: Arc<dyn Store>, config: &Config) -> eyre::Result<Self> {
        if let Some(path) = &config.sanctions.entities_csv_path {
            match loader::parse_entities_csv(path) {
                Ok(entities) => {
                    let count = loader::seed_entities(store.as_ref(), &entities).await?;
                    tracing::info!(count, "Sanctioned entities loaded");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load sanctions file, continuing without");
                }
            }
        }

        let provider: Option<Arc<dyn LlmProvider>> = if !config.llm.enabled {
            tracing::info!("LLM analysis disabled in configuration");
            None
        } else {
            match std::env::var(&config.llm.api_key_env) {
                Ok(key) if !key.trim().is_empty() => {
                    let provider = OpenAiProvider::new(
                        &config.llm.base_url,
                        key,
                        Duration::from_secs(config.llm.request_timeout_secs),
                    )?;
                    tracing::info!(model = %config.llm.model, "LLM analysis enabled");
                    Some(Arc::new(provider))
                }
                _ => {
                    tracing::warn!(
                        env = %config.llm.api_key_env,
                        "LLM API key not set, LLM analysis disabled"
                    );
                    None
                }
            }
        };

        Self::new(store, config, provider)
    }

    pub fn new(
        store: Arc<dyn Store>,
        config: &Config,
        provider: Option<Arc<dyn LlmProvider>>,
    ) -> eyre::Result<Self> {
        let audit = AuditTracker::new(store.clone(), PricingTable::from_config(&config.llm)?);
        let orchestrator = provider.map(|provider| {
            let client = LlmClient::new(
                provider,
                audit.clone(),
                RetryPolicy::from_config(&config.llm),
                config.analysis.max_risk_factors,
            );
            AnalysisOrchestrator::new(
                store.clone(),
                PromptBuilder::new(&config.llm, &config.analysis),
                client,
                config.analysis.clone(),
            )
        });

        Ok(Self {
            store,
            rules: RuleEngine::new(config.rules.clone()),
            sanctions: config.sanctions.clone(),
            audit,
            orchestrator,
        })
    }

    pub fn llm_enabled(&self) -> bool {
        self.orchestrator.is_some()
    }

    /// Evaluate one transaction, or every transaction still awaiting a rule pass,
    /// optionally chaining LLM analysis over the flags this run created.
    pub async fn run_rules(
        &self,
        transaction_id: Option<Uuid>,
        run_llm_analysis: bool,
    ) -> Result<RuleRunReport, PipelineError> {
        let transactions = match transaction_id {
            Some(id) => vec![self
                .store
                .get_transaction(id)
                .await?
                .ok_or(PipelineError::TransactionNotFound(id))?],
            None => {
                self.store
                    .transactions_pending_rule_pass(self.rules.scan_limit())
                    .await?
            }
        };

        let sanctions = SanctionsList::load(self.store.as_ref(), &self.sanctions).await?;
        let summary = self
            .rules
            .evaluate_batch(self.store.as_ref(), &sanctions, transactions)
            .await;

        let mut llm_analyses_completed = 0;
        if run_llm_analysis && !summary.new_flag_ids.is_empty() {
            match &self.orchestrator {
                Some(orchestrator) => {
                    match orchestrator
                        .run(AnalysisBatch::Flags(summary.new_flag_ids.clone()))
                        .await
                    {
                        Ok(outcome) => llm_analyses_completed = outcome.analyses_completed,
                        Err(e) => tracing::error!(error = %e, "Chained LLM analysis failed"),
                    }
                }
                None => tracing::warn!(
                    flags = summary.new_flag_ids.len(),
                    "LLM analysis requested but not configured, skipping"
                ),
            }
        }

        Ok(RuleRunReport {
            transactions_evaluated: summary.transactions_evaluated,
            flags_created: summary.flags_created,
            rule_errors: summary.rule_errors,
            failed_transactions: summary.failed_transactions,
            llm_analyses_completed,
            timestamp: Utc::now(),
        })
    }

    /// Analyze flags with the LLM. An explicit flag id wins over a transaction id,
    /// which wins over the batch limit.
    pub async fn analyze(
        &self,
        batch_limit: Option<i64>,
        transaction_id: Option<Uuid>,
        flagged_transaction_id: Option<Uuid>,
    ) -> Result<BatchOutcome, PipelineError> {
        let orchestrator = self.orchestrator.as_ref().ok_or(AnalysisError::Disabled)?;

        let batch = match (flagged_transaction_id, transaction_id) {
            (Some(id), _) => AnalysisBatch::Flag(id),
            (None, Some(id)) => AnalysisBatch::Transaction(id),
            (None, None) => {
                if batch_limit.is_some_and(|n| n < 1) {
                    return Err(PipelineError::InvalidRequest(
                        "batch_limit must be at least 1".to_string(),
                    ));
                }
                AnalysisBatch::Limit(orchestrator.batch_limit(batch_limit))
            }
        };

        Ok(orchestrator.run(batch).await?)
    }

    pub async fn list_flagged(&self, filter: FlagFilter) -> Result<FlagPage, PipelineError> {
        check_page(filter.limit, filter.offset)?;
        let (flags, total_results) = self.store.list_flags(&filter).await?;
        Ok(FlagPage {
            flags,
            total_results,
        })
    }

    pub async fn list_transactions(
        &self,
        filter: TransactionFilter,
    ) -> Result<TransactionPage, PipelineError> {
        check_page(filter.limit, filter.offset)?;
        if let (Some(min), Some(max)) = (&filter.min_amount, &filter.max_amount) {
            if min > max {
                return Err(PipelineError::InvalidRequest(
                    "min_amount must not exceed max_amount".to_string(),
                ));
            }
        }
        let (transactions, total_results) = self.store.list_transactions(&filter).await?;
        Ok(TransactionPage {
            transactions,
            total_results,
        })
    }

    pub async fn list_customers(
        &self,
        filter: CustomerFilter,
    ) -> Result<CustomerPage, PipelineError> {
        check_page(filter.limit, filter.offset)?;
        let (customers, total_results) = self.store.list_customers(&filter).await?;
        Ok(CustomerPage {
            customers,
            total_results,
        })
    }

    pub async fn get_audit(&self, filter: AuditFilter) -> Result<AuditReport, PipelineError> {
        if filter.limit.is_some_and(|n| n < 1) {
            return Err(PipelineError::InvalidRequest(
                "limit must be at least 1".to_string(),
            ));
        }
        let audit_logs = self.audit.list(&filter).await?;
        let summary = self.audit.summary().await?;
        Ok(AuditReport {
            audit_logs,
            summary,
        })
    }

    pub async fn submit_review(
        &self,
        submission: ReviewSubmission,
    ) -> Result<ReviewRecord, PipelineError> {
        Ok(review::submit_review(self.store.as_ref(), submission).await?)
    }

    pub async fn get_explanation(&self, transaction_id: Uuid) -> Result<Explanation, PipelineError> {
        if self.store.get_transaction(transaction_id).await?.is_none() {
            return Err(PipelineError::TransactionNotFound(transaction_id));
        }
        let flags = self.store.flags_for_transaction(transaction_id).await?;
        let audit_logs = self
            .audit
            .list(&AuditFilter {
                transaction_id: Some(transaction_id),
                ..Default::default()
            })
            .await?;
        Ok(Explanation {
            transaction_id,
            flags,
            audit_logs,
        })
    }

    pub async fn get_stats(&self) -> Result<PipelineStats, PipelineError> {
        let recent_since = Utc::now() - chrono::Duration::days(RECENT_ACTIVITY_DAYS);
        let store = self.store.stats(recent_since).await?;
        let audit = self.audit.summary().await?;
        Ok(PipelineStats { store, audit })
    }

    pub fn list_rules(&self) -> Vec<RuleInfo> {
        self.rules.rule_infos()
    }
}
