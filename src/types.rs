use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A string that does not name any variant of the target enum.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// A financial transaction as delivered by ingestion. Never mutated here.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub transaction_type: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: Option<String>,
    pub channel: Option<String>,
    pub counterparty_name: Option<String>,
    pub counterparty_account: Option<String>,
    pub counterparty_country: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub reference_number: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub account_number: String,
    pub account_type: String,
    pub balance: BigDecimal,
    /// 0-5 scale.
    pub risk_score: i16,
    pub is_sanctioned: bool,
    pub country_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SanctionedEntity {
    pub id: i32,
    pub name: String,
    pub aliases: Vec<String>,
    pub entity_type: Option<String>,
    pub country_code: Option<String>,
    pub sanctions_program: Option<String>,
}

/// Severity of a rule flag. Always derived from the flag's 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a score onto its band. Scores below 25 do not flag.
    pub fn from_score(score: u8) -> Option<Self> {
        match score {
            95.. => Some(Self::Critical),
            70..=94 => Some(Self::High),
            50..=69 => Some(Self::Medium),
            25..=49 => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(UnknownVariant {
                kind: "risk level",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level as reported by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LlmRiskLevel {
    High,
    Medium,
    Low,
}

impl LlmRiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl FromStr for LlmRiskLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "High" => Ok(Self::High),
            "Medium" => Ok(Self::Medium),
            "Low" => Ok(Self::Low),
            other => Err(UnknownVariant {
                kind: "LLM risk level",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    Escalate,
    Monitor,
    Ignore,
    Investigate,
}

impl SuggestedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Escalate => "escalate",
            Self::Monitor => "monitor",
            Self::Ignore => "ignore",
            Self::Investigate => "investigate",
        }
    }
}

impl FromStr for SuggestedAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "escalate" => Ok(Self::Escalate),
            "monitor" => Ok(Self::Monitor),
            "ignore" => Ok(Self::Ignore),
            "investigate" => Ok(Self::Investigate),
            other => Err(UnknownVariant {
                kind: "suggested action",
                value: other.to_string(),
            }),
        }
    }
}

/// Investigation status of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagStatus {
    Pending,
    Investigating,
    Cleared,
    Escalated,
}

impl FlagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Investigating => "investigating",
            Self::Cleared => "cleared",
            Self::Escalated => "escalated",
        }
    }
}

impl FromStr for FlagStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "investigating" => Ok(Self::Investigating),
            "cleared" => Ok(Self::Cleared),
            "escalated" => Ok(Self::Escalated),
            other => Err(UnknownVariant {
                kind: "flag status",
                value: other.to_string(),
            }),
        }
    }
}

/// Analyst verdict on a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReviewVerdict {
    #[default]
    Unreviewed,
    #[serde(rename = "True Positive")]
    TruePositive,
    #[serde(rename = "False Positive")]
    FalsePositive,
}

impl ReviewVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreviewed => "Unreviewed",
            Self::TruePositive => "True Positive",
            Self::FalsePositive => "False Positive",
        }
    }
}

impl FromStr for ReviewVerdict {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unreviewed" => Ok(Self::Unreviewed),
            "True Positive" => Ok(Self::TruePositive),
            "False Positive" => Ok(Self::FalsePositive),
            other => Err(UnknownVariant {
                kind: "review verdict",
                value: other.to_string(),
            }),
        }
    }
}

/// Outcome recorded for one LLM request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
    Timeout,
    RateLimited,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl FromStr for AuditStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "timeout" => Ok(Self::Timeout),
            "rate_limited" => Ok(Self::RateLimited),
            other => Err(UnknownVariant {
                kind: "audit status",
                value: other.to_string(),
            }),
        }
    }
}

/// Validated model assessment attached to a flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmAnalysis {
    pub risk_level: LlmRiskLevel,
    pub explanation: String,
    pub suggested_action: SuggestedAction,
    pub confidence_score: f64,
    pub risk_factors: Vec<String>,
    pub compliance_notes: Option<String>,
    pub model_used: String,
    pub analyzed_at: DateTime<Utc>,
}

/// Analyst review sub-record. `verdict` is `Unreviewed` until a reviewer acts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Review {
    pub verdict: ReviewVerdict,
    pub notes: Option<String>,
    pub reviewer: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// A complete reviewer action, written atomically.
#[derive(Debug, Clone)]
pub struct ReviewRecord {
    pub verdict: ReviewVerdict,
    pub notes: String,
    pub reviewer: String,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FlaggedTransaction {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub rule_name: String,
    pub rule_description: String,
    pub risk_level: RiskLevel,
    pub risk_score: i32,
    pub status: FlagStatus,
    pub flagged_at: DateTime<Utc>,
    pub flagged_by: String,
    pub llm: Option<LlmAnalysis>,
    pub review: Review,
}

/// A flag produced by the rule engine, ready for insertion.
#[derive(Debug, Clone)]
pub struct NewFlag {
    pub transaction_id: Uuid,
    pub rule_name: String,
    pub rule_description: String,
    pub risk_level: RiskLevel,
    pub risk_score: i32,
    pub flagged_at: DateTime<Utc>,
}

impl NewFlag {
    pub fn into_flag(self, id: Uuid) -> FlaggedTransaction {
        FlaggedTransaction {
            id,
            transaction_id: self.transaction_id,
            rule_name: self.rule_name,
            rule_description: self.rule_description,
            risk_level: self.risk_level,
            risk_score: self.risk_score,
            status: FlagStatus::Pending,
            flagged_at: self.flagged_at,
            flagged_by: "system".to_string(),
            llm: None,
            review: Review::default(),
        }
    }
}

/// Token counts reported by the provider for one reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// One immutable row of the LLM audit log.
#[derive(Debug, Clone)]
pub struct LlmAuditLogEntry {
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
    pub cost_estimate: BigDecimal,
    pub error_message: Option<String>,
    pub prompt_sent: String,
    pub response_received: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_bands() {
        assert_eq!(RiskLevel::from_score(100), Some(RiskLevel::Critical));
        assert_eq!(RiskLevel::from_score(95), Some(RiskLevel::Critical));
        assert_eq!(RiskLevel::from_score(94), Some(RiskLevel::High));
        assert_eq!(RiskLevel::from_score(70), Some(RiskLevel::High));
        assert_eq!(RiskLevel::from_score(69), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::from_score(50), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::from_score(49), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::from_score(25), Some(RiskLevel::Low));
        assert_eq!(RiskLevel::from_score(24), None);
        assert_eq!(RiskLevel::from_score(0), None);
    }

    #[test]
    fn test_wire_strings() {
        assert_eq!(
            serde_json::to_string(&ReviewVerdict::TruePositive).unwrap(),
            "\"True Positive\""
        );
        assert_eq!(
            serde_json::to_string(&AuditStatus::RateLimited).unwrap(),
            "\"rate_limited\""
        );
        assert_eq!(
            serde_json::to_string(&LlmRiskLevel::Medium).unwrap(),
            "\"Medium\""
        );
        assert_eq!(
            serde_json::to_string(&SuggestedAction::Investigate).unwrap(),
            "\"investigate\""
        );
        assert_eq!("False Positive".parse::<ReviewVerdict>().unwrap(), ReviewVerdict::FalsePositive);
        assert!("false positive".parse::<ReviewVerdict>().is_err());
        assert!("manual_review".parse::<SuggestedAction>().is_err());
    }
}
