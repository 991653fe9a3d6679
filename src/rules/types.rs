use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::RuleEvaluationError;
use crate::sanctions::SanctionsList;
use crate::types::{Customer, NewFlag, RiskLevel, Transaction};

/// Grouping shown in the rule listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    CashTransaction,
    TransactionPattern,
    Sanctions,
    Structuring,
    Velocity,
    CustomerRisk,
    Temporal,
    Geographic,
}

/// Descriptive entry for one rule in the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct RuleInfo {
    pub name: &'static str,
    pub description: String,
    pub risk_level: RiskLevel,
    pub category: RuleCategory,
}

/// Counts over the sender's other transactions, gathered before evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SenderActivity {
    /// High-value transactions on the same UTC day.
    pub same_day_high_value: i64,
    /// Near-threshold transactions inside the structuring window.
    pub similar_recent: i64,
    /// Any transactions inside the velocity window.
    pub velocity_window: i64,
}

pub struct RuleContext<'a> {
    pub customer: Option<&'a Customer>,
    pub sanctions: &'a SanctionsList,
    pub activity: SenderActivity,
}

/// A fired rule, before it is keyed to a flag id.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagCandidate {
    pub rule_name: &'static str,
    pub description: String,
    pub risk_score: u8,
}

impl FlagCandidate {
    /// Returns `None` when the score falls below the lowest band.
    pub fn into_new_flag(self, transaction_id: Uuid, flagged_at: DateTime<Utc>) -> Option<NewFlag> {
        let risk_level = RiskLevel::from_score(self.risk_score)?;
        Some(NewFlag {
            transaction_id,
            rule_name: self.rule_name.to_string(),
            rule_description: self.description,
            risk_level,
            risk_score: i32::from(self.risk_score),
            flagged_at,
        })
    }
}

/// A named AML heuristic. Evaluation is pure: all history arrives through the context.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    fn info(&self) -> RuleInfo;

    fn evaluate(
        &self,
        transaction: &Transaction,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError>;
}

/// Convert a configured threshold into a decimal for exact comparison.
pub(crate) fn decimal(value: f64) -> BigDecimal {
    BigDecimal::from_f64(value).unwrap_or_default()
}

/// The transaction amount, rejected when negative.
pub(crate) fn checked_amount(transaction: &Transaction) -> Result<&BigDecimal, RuleEvaluationError> {
    if transaction.amount < BigDecimal::from(0) {
        return Err(RuleEvaluationError::MalformedAmount {
            transaction_id: transaction.id,
            reason: format!("negative amount {}", transaction.amount),
        });
    }
    Ok(&transaction.amount)
}

/// Render an amount as `$12,345.67`.
pub fn format_usd(amount: &BigDecimal) -> String {
    let grouped = format_amount(amount);
    match grouped.strip_prefix('-') {
        Some(rest) => format!("-${rest}"),
        None => format!("${grouped}"),
    }
}

/// Render an amount in its own currency: `USD $12,345.67`, `EUR 12,345.67`.
pub fn format_money(amount: &BigDecimal, currency: &str) -> String {
    if currency.eq_ignore_ascii_case("USD") {
        format!("{} {}", currency, format_usd(amount))
    } else {
        format!("{} {}", currency, format_amount(amount))
    }
}

/// Two decimals with thousands separators and no currency symbol.
pub fn format_amount(amount: &BigDecimal) -> String {
    let fixed = amount.round(2).with_scale(2).to_string();
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (whole, cents) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped}.{cents}")
}
