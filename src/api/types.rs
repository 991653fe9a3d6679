use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::{AnalysisResult, BatchOutcome};
use crate::audit::AuditSummary;
use crate::db::{FlagRecord, TransactionRecord};
use crate::pipeline::{
    AuditReport, CustomerPage, Explanation, PipelineStats, RuleRunReport, TransactionPage,
};
use crate::rules::RuleInfo;
use crate::types::{
    AuditStatus, Customer, FlagStatus, FlaggedTransaction, LlmAnalysis, LlmAuditLogEntry,
    LlmRiskLevel, ReviewVerdict, RiskLevel, SuggestedAction,
};

/// Money and cost figures go out as JSON numbers.
fn decimal_f64(value: &BigDecimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn percent(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

// ============================================================
// Request bodies & query params
// ============================================================

#[derive(Debug, Deserialize)]
pub struct FlaggedParams {
    pub risk_level: Option<String>,
    pub llm_risk_level: Option<String>,
    pub rule_name: Option<String>,
    pub status: Option<String>,
    pub include_llm: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionParams {
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub min_amount: Option<String>,
    pub max_amount: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerParams {
    pub risk_score: Option<i16>,
    pub country_code: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRulesRequest {
    pub transaction_id: Option<Uuid>,
    #[serde(default)]
    pub run_llm_analysis: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    pub batch_limit: Option<i64>,
    pub transaction_id: Option<Uuid>,
    pub flagged_transaction_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub status: Option<String>,
    pub transaction_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub review_status: ReviewVerdict,
    #[serde(default)]
    pub review_notes: String,
}

// ============================================================
// Responses
// ============================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub llm_enabled: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RunRulesResponse {
    pub success: bool,
    pub message: String,
    pub transactions_evaluated: usize,
    pub flags_created: usize,
    pub rule_errors: usize,
    pub failed_transactions: usize,
    pub llm_analyses_completed: usize,
    pub timestamp: DateTime<Utc>,
}

impl From<RuleRunReport> for RunRulesResponse {
    fn from(report: RuleRunReport) -> Self {
        Self {
            success: true,
            message: format!(
                "AML rules executed over {} transactions, {} new flags",
                report.transactions_evaluated, report.flags_created
            ),
            transactions_evaluated: report.transactions_evaluated,
            flags_created: report.flags_created,
            rule_errors: report.rule_errors,
            failed_transactions: report.failed_transactions,
            llm_analyses_completed: report.llm_analyses_completed,
            timestamp: report.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub analyses_attempted: usize,
    pub analyses_completed: usize,
    pub analyses_failed: usize,
    pub results: Vec<AnalysisResult>,
}

impl From<BatchOutcome> for AnalyzeResponse {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            success: true,
            analyses_attempted: outcome.analyses_attempted,
            analyses_completed: outcome.analyses_completed,
            analyses_failed: outcome.analyses_failed,
            results: outcome.results,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionSummary {
    pub amount: f64,
    pub currency: String,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub date: DateTime<Utc>,
    pub reference: Option<String>,
    pub counterparty_name: Option<String>,
    pub counterparty_country: Option<String>,
    pub channel: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CustomerSummary {
    pub name: String,
    pub account_number: String,
    pub country_code: Option<String>,
    pub risk_score: i16,
}

#[derive(Debug, Serialize)]
pub struct ReviewView {
    pub review_status: ReviewVerdict,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl From<&FlaggedTransaction> for ReviewView {
    fn from(flag: &FlaggedTransaction) -> Self {
        Self {
            review_status: flag.review.verdict,
            review_notes: flag.review.notes.clone(),
            reviewed_by: flag.review.reviewer.clone(),
            reviewed_at: flag.review.reviewed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlagView {
    pub flag_id: Uuid,
    pub transaction_id: Uuid,
    pub rule_name: String,
    pub rule_description: String,
    pub risk_level: RiskLevel,
    pub risk_score: i32,
    pub status: FlagStatus,
    pub flagged_at: DateTime<Utc>,
    pub flagged_by: String,
    pub transaction: TransactionSummary,
    pub customer: CustomerSummary,
    pub review: ReviewView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_analysis: Option<LlmAnalysis>,
}

impl FlagView {
    pub fn from_record(record: FlagRecord, include_llm: bool) -> Self {
        let FlagRecord {
            flag,
            transaction,
            customer,
        } = record;
        let review = ReviewView::from(&flag);
        Self {
            flag_id: flag.id,
            transaction_id: flag.transaction_id,
            rule_name: flag.rule_name,
            rule_description: flag.rule_description,
            risk_level: flag.risk_level,
            risk_score: flag.risk_score,
            status: flag.status,
            flagged_at: flag.flagged_at,
            flagged_by: flag.flagged_by,
            transaction: TransactionSummary {
                amount: decimal_f64(&transaction.amount),
                currency: transaction.currency,
                transaction_type: transaction.transaction_type,
                date: transaction.transaction_date,
                reference: transaction.reference_number,
                counterparty_name: transaction.counterparty_name,
                counterparty_country: transaction.counterparty_country,
                channel: transaction.channel,
            },
            customer: CustomerSummary {
                name: customer.name,
                account_number: customer.account_number,
                country_code: customer.country_code,
                risk_score: customer.risk_score,
            },
            review,
            llm_analysis: if include_llm { flag.llm } else { None },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FiltersApplied {
    pub risk_level: Option<String>,
    pub llm_risk_level: Option<String>,
    pub rule_name: Option<String>,
    pub status: Option<String>,
    pub include_llm: bool,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct FlaggedTransactionsResponse {
    pub success: bool,
    pub flagged_transactions: Vec<FlagView>,
    pub total_results: i64,
    pub filters_applied: FiltersApplied,
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub amount: f64,
    pub currency: String,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub date: DateTime<Utc>,
    pub reference: Option<String>,
    pub counterparty_name: Option<String>,
    pub counterparty_country: Option<String>,
    pub channel: Option<String>,
    pub status: String,
    pub customer_name: String,
    pub customer_account: String,
}

impl From<TransactionRecord> for TransactionView {
    fn from(record: TransactionRecord) -> Self {
        let TransactionRecord {
            transaction,
            customer,
        } = record;
        Self {
            id: transaction.id,
            amount: decimal_f64(&transaction.amount),
            currency: transaction.currency,
            transaction_type: transaction.transaction_type,
            date: transaction.transaction_date,
            reference: transaction.reference_number,
            counterparty_name: transaction.counterparty_name,
            counterparty_country: transaction.counterparty_country,
            channel: transaction.channel,
            status: transaction.status,
            customer_name: customer.name,
            customer_account: customer.account_number,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub success: bool,
    pub transactions: Vec<TransactionView>,
    pub total_results: i64,
}

impl From<TransactionPage> for TransactionsResponse {
    fn from(page: TransactionPage) -> Self {
        Self {
            success: true,
            transactions: page.transactions.into_iter().map(Into::into).collect(),
            total_results: page.total_results,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CustomerView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub account_number: String,
    pub account_type: String,
    pub balance: f64,
    pub risk_score: i16,
    pub country_code: Option<String>,
    pub is_sanctioned: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Customer> for CustomerView {
    fn from(customer: Customer) -> Self {
        Self {
            id: customer.id,
            balance: decimal_f64(&customer.balance),
            name: customer.name,
            email: customer.email,
            account_number: customer.account_number,
            account_type: customer.account_type,
            risk_score: customer.risk_score,
            country_code: customer.country_code,
            is_sanctioned: customer.is_sanctioned,
            created_at: customer.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CustomersResponse {
    pub success: bool,
    pub customers: Vec<CustomerView>,
    pub total_results: i64,
}

impl From<CustomerPage> for CustomersResponse {
    fn from(page: CustomerPage) -> Self {
        Self {
            success: true,
            customers: page.customers.into_iter().map(Into::into).collect(),
            total_results: page.total_results,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditLogView {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub flagged_transaction_id: Option<Uuid>,
    pub model_used: String,
    pub attempt: i32,
    pub status: AuditStatus,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub tokens_used: i32,
    pub response_time_ms: i64,
    pub cost_estimate: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<LlmAuditLogEntry> for AuditLogView {
    fn from(entry: LlmAuditLogEntry) -> Self {
        Self {
            id: entry.id,
            transaction_id: entry.transaction_id,
            flagged_transaction_id: entry.flagged_transaction_id,
            model_used: entry.model_used,
            attempt: entry.attempt,
            status: entry.status,
            input_tokens: entry.input_tokens,
            output_tokens: entry.output_tokens,
            tokens_used: entry.tokens_used,
            response_time_ms: entry.response_time_ms,
            cost_estimate: decimal_f64(&entry.cost_estimate),
            error_message: entry.error_message,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditSummaryView {
    pub total_requests: i64,
    pub successful_requests: i64,
    pub success_rate: f64,
    pub total_estimated_cost: f64,
}

impl From<&AuditSummary> for AuditSummaryView {
    fn from(summary: &AuditSummary) -> Self {
        Self {
            total_requests: summary.total_requests,
            successful_requests: summary.successful_requests,
            success_rate: summary.success_rate,
            total_estimated_cost: decimal_f64(&summary.total_estimated_cost),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub success: bool,
    pub audit_logs: Vec<AuditLogView>,
    pub summary: AuditSummaryView,
}

impl From<AuditReport> for AuditResponse {
    fn from(report: AuditReport) -> Self {
        Self {
            success: true,
            summary: AuditSummaryView::from(&report.summary),
            audit_logs: report.audit_logs.into_iter().map(AuditLogView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub success: bool,
    pub flag_id: Uuid,
    pub review_status: ReviewVerdict,
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LlmAnalysisEntry {
    pub flag_id: Uuid,
    pub rule_name: String,
    pub llm_risk_level: LlmRiskLevel,
    pub llm_explanation: String,
    pub llm_suggested_action: SuggestedAction,
    pub llm_confidence_score: f64,
    pub llm_risk_factors: Vec<String>,
    pub llm_compliance_notes: Option<String>,
    pub llm_model_used: String,
    pub analyzed_at: DateTime<Utc>,
    pub review: ReviewView,
}

#[derive(Debug, Serialize)]
pub struct ExplanationBody {
    pub transaction_id: Uuid,
    pub flagged_count: usize,
    pub llm_analyses: Vec<LlmAnalysisEntry>,
    pub audit_logs: Vec<AuditLogView>,
}

#[derive(Debug, Serialize)]
pub struct ExplanationResponse {
    pub success: bool,
    pub explanation: ExplanationBody,
}

impl From<Explanation> for ExplanationResponse {
    fn from(explanation: Explanation) -> Self {
        let llm_analyses = explanation
            .flags
            .iter()
            .filter_map(|flag| {
                let analysis = flag.llm.as_ref()?;
                Some(LlmAnalysisEntry {
                    flag_id: flag.id,
                    rule_name: flag.rule_name.clone(),
                    llm_risk_level: analysis.risk_level,
                    llm_explanation: analysis.explanation.clone(),
                    llm_suggested_action: analysis.suggested_action,
                    llm_confidence_score: analysis.confidence_score,
                    llm_risk_factors: analysis.risk_factors.clone(),
                    llm_compliance_notes: analysis.compliance_notes.clone(),
                    llm_model_used: analysis.model_used.clone(),
                    analyzed_at: analysis.analyzed_at,
                    review: ReviewView::from(flag),
                })
            })
            .collect();

        Self {
            success: true,
            explanation: ExplanationBody {
                transaction_id: explanation.transaction_id,
                flagged_count: explanation.flags.len(),
                llm_analyses,
                audit_logs: explanation
                    .audit_logs
                    .into_iter()
                    .map(AuditLogView::from)
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsOverview {
    pub total_customers: i64,
    pub total_transactions: i64,
    pub total_flagged: i64,
    /// Percent of transactions flagged.
    pub flag_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct RiskLevelBreakdown {
    pub rule_based_flags: serde_json::Map<String, serde_json::Value>,
    pub llm_analysis: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct LlmStats {
    pub total_llm_requests: i64,
    /// Percent of requests that succeeded.
    pub success_rate: f64,
    /// Percent of flags carrying an LLM analysis.
    pub llm_coverage: f64,
    pub total_cost_estimate: f64,
}

#[derive(Debug, Serialize)]
pub struct RecentActivity {
    pub transactions_last_7_days: i64,
    pub flagged_last_7_days: i64,
}

#[derive(Debug, Serialize)]
pub struct RuleCount {
    pub rule: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub llm_enabled: bool,
    pub overview: StatsOverview,
    pub risk_levels: RiskLevelBreakdown,
    pub llm_analysis: LlmStats,
    pub recent_activity: RecentActivity,
    pub top_triggered_rules: Vec<RuleCount>,
}

fn counts_map(counts: &[(String, i64)]) -> serde_json::Map<String, serde_json::Value> {
    counts
        .iter()
        .map(|(key, count)| (key.clone(), serde_json::Value::from(*count)))
        .collect()
}

impl StatsResponse {
    pub fn new(stats: PipelineStats, llm_enabled: bool) -> Self {
        let store = &stats.store;
        Self {
            success: true,
            llm_enabled,
            overview: StatsOverview {
                total_customers: store.total_customers,
                total_transactions: store.total_transactions,
                total_flagged: store.total_flagged,
                flag_rate: percent(store.total_flagged, store.total_transactions),
            },
            risk_levels: RiskLevelBreakdown {
                rule_based_flags: counts_map(&store.by_risk_level),
                llm_analysis: counts_map(&store.by_llm_risk_level),
            },
            llm_analysis: LlmStats {
                total_llm_requests: stats.audit.total_requests,
                success_rate: percent(stats.audit.successful_requests, stats.audit.total_requests),
                llm_coverage: percent(store.flagged_with_llm, store.total_flagged),
                total_cost_estimate: decimal_f64(&stats.audit.total_estimated_cost),
            },
            recent_activity: RecentActivity {
                transactions_last_7_days: store.recent_transactions,
                flagged_last_7_days: store.recent_flagged,
            },
            top_triggered_rules: store
                .top_rules
                .iter()
                .map(|(rule, count)| RuleCount {
                    rule: rule.clone(),
                    count: *count,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub success: bool,
    pub available_rules: Vec<RuleInfo>,
    pub total_rules: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreStats;
    use std::str::FromStr;

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 3), 33.33);
        assert_eq!(percent(2, 3), 66.67);
        assert_eq!(percent(5, 5), 100.0);
    }

    #[test]
    fn test_stats_response_shape() {
        let stats = PipelineStats {
            store: StoreStats {
                total_customers: 10,
                total_transactions: 200,
                total_flagged: 8,
                flagged_with_llm: 2,
                recent_transactions: 40,
                recent_flagged: 3,
                by_risk_level: vec![("high".to_string(), 5), ("low".to_string(), 3)],
                by_llm_risk_level: vec![("High".to_string(), 2)],
                top_rules: vec![("LARGE_CASH_WITHDRAWAL".to_string(), 5)],
            },
            audit: AuditSummary {
                total_requests: 4,
                successful_requests: 2,
                success_rate: 0.5,
                total_estimated_cost: BigDecimal::from_str("0.050000").unwrap(),
            },
        };

        let json = serde_json::to_value(StatsResponse::new(stats, true)).unwrap();
        assert_eq!(json["overview"]["flag_rate"], 4.0);
        assert_eq!(json["risk_levels"]["rule_based_flags"]["high"], 5);
        assert_eq!(json["risk_levels"]["llm_analysis"]["High"], 2);
        assert_eq!(json["llm_analysis"]["success_rate"], 50.0);
        assert_eq!(json["llm_analysis"]["llm_coverage"], 25.0);
        let cost = json["llm_analysis"]["total_cost_estimate"].as_f64().unwrap();
        assert!((cost - 0.05).abs() < 1e-9);
        assert_eq!(json["recent_activity"]["flagged_last_7_days"], 3);
        assert_eq!(json["top_triggered_rules"][0]["rule"], "LARGE_CASH_WITHDRAWAL");
    }

    #[test]
    fn test_transaction_view_shape() {
        let c = crate::testing::customer(2, Some("US"));
        let tx = crate::testing::transaction(&c, "transfer", "9500.25", "2024-03-01T12:00:00Z");
        let page = TransactionPage {
            transactions: vec![TransactionRecord {
                transaction: tx.clone(),
                customer: c,
            }],
            total_results: 7,
        };

        let json = serde_json::to_value(TransactionsResponse::from(page)).unwrap();
        assert_eq!(json["total_results"], 7);
        let view = &json["transactions"][0];
        assert_eq!(view["id"], tx.id.to_string());
        assert_eq!(view["type"], "transfer");
        assert_eq!(view["amount"], 9500.25);
        assert_eq!(view["customer_account"], "ACC-4411-0099");
    }

    #[test]
    fn test_review_request_wire_format() {
        let body: ReviewRequest = serde_json::from_str(
            r#"{"review_status": "False Positive", "review_notes": "Known payroll run"}"#,
        )
        .unwrap();
        assert_eq!(body.review_status, ReviewVerdict::FalsePositive);

        let missing_notes: ReviewRequest =
            serde_json::from_str(r#"{"review_status": "True Positive"}"#).unwrap();
        assert!(missing_notes.review_notes.is_empty());

        assert!(serde_json::from_str::<ReviewRequest>(r#"{"review_status": "maybe"}"#).is_err());
    }
}
