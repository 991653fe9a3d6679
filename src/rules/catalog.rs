use bigdecimal::{BigDecimal, Zero};
use chrono::Timelike;

use crate::config::RulesConfig;
use crate::error::RuleEvaluationError;
use crate::types::{RiskLevel, Transaction};

use super::types::{
    checked_amount, decimal, format_usd, FlagCandidate, Rule, RuleCategory, RuleContext, RuleInfo,
};

/// Build the full rule battery from configuration, in evaluation order.
pub fn build(config: &RulesConfig) -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(LargeCashWithdrawal {
            threshold: decimal(config.large_cash_withdrawal_threshold),
        }),
        Box::new(MultipleHighValueSameDay {
            threshold: decimal(config.high_value.threshold),
            min_others: config.high_value.min_other_transactions,
        }),
        Box::new(SanctionedCountryTransfer),
        Box::new(OfacSanctionedEntity),
        Box::new(StructuringPattern {
            floor: decimal(config.structuring.floor),
            ceiling: decimal(config.structuring.ceiling),
            window_days: config.structuring.window_days,
            min_similar: config.structuring.min_similar_transactions,
        }),
        Box::new(RoundNumberPattern {
            min_amount: decimal(config.round_number.min_amount),
            unit: decimal(config.round_number.unit),
        }),
        Box::new(HighVelocity {
            window_secs: config.velocity.window_secs,
            min_others: config.velocity.min_other_transactions,
        }),
        Box::new(HighRiskCustomer {
            min_risk_score: config.high_risk_customer.min_risk_score,
            min_amount: decimal(config.high_risk_customer.min_amount),
        }),
        Box::new(UnusualTimePattern {
            start_hour: config.unusual_time.start_hour,
            end_hour: config.unusual_time.end_hour,
            min_amount: decimal(config.unusual_time.min_amount),
        }),
        Box::new(CrossBorderThreshold {
            threshold: decimal(config.cross_border_threshold),
        }),
    ]
}

fn info(name: &'static str, description: String, score: u8, category: RuleCategory) -> RuleInfo {
    RuleInfo {
        name,
        description,
        risk_level: RiskLevel::from_score(score).unwrap_or(RiskLevel::Low),
        category,
    }
}

fn fire(rule_name: &'static str, description: String, risk_score: u8) -> Option<FlagCandidate> {
    Some(FlagCandidate {
        rule_name,
        description,
        risk_score,
    })
}

// ============================================================
// Amount rules
// ============================================================

pub struct LargeCashWithdrawal {
    threshold: BigDecimal,
}

impl LargeCashWithdrawal {
    const NAME: &'static str = "LARGE_CASH_WITHDRAWAL";
    const SCORE: u8 = 85;
}

impl Rule for LargeCashWithdrawal {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            format!("Cash withdrawals over {}", format_usd(&self.threshold)),
            Self::SCORE,
            RuleCategory::CashTransaction,
        )
    }

    fn evaluate(
        &self,
        transaction: &Transaction,
        _ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        let amount = checked_amount(transaction)?;
        if transaction.transaction_type != "withdrawal" || amount <= &self.threshold {
            return Ok(None);
        }
        Ok(fire(
            Self::NAME,
            format!("Large cash withdrawal of {}", format_usd(amount)),
            Self::SCORE,
        ))
    }
}

pub struct RoundNumberPattern {
    min_amount: BigDecimal,
    unit: BigDecimal,
}

impl RoundNumberPattern {
    const NAME: &'static str = "ROUND_NUMBER_PATTERN";
    const SCORE: u8 = 40;
}

impl Rule for RoundNumberPattern {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            format!(
                "Round amounts of at least {} in multiples of {}",
                format_usd(&self.min_amount),
                format_usd(&self.unit)
            ),
            Self::SCORE,
            RuleCategory::TransactionPattern,
        )
    }

    fn evaluate(
        &self,
        transaction: &Transaction,
        _ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        let amount = checked_amount(transaction)?;
        if amount < &self.min_amount || self.unit.is_zero() {
            return Ok(None);
        }
        if !(amount % &self.unit).is_zero() {
            return Ok(None);
        }
        Ok(fire(
            Self::NAME,
            format!("Large round number transaction: {}", format_usd(amount)),
            Self::SCORE,
        ))
    }
}

// ============================================================
// Frequency rules
// ============================================================

pub struct MultipleHighValueSameDay {
    threshold: BigDecimal,
    min_others: i64,
}

impl MultipleHighValueSameDay {
    const NAME: &'static str = "MULTIPLE_HIGH_VALUE_SAME_DAY";
    const SCORE: u8 = 70;
}

impl Rule for MultipleHighValueSameDay {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            format!(
                "{} or more transactions of at least {} by one sender on the same day",
                self.min_others + 1,
                format_usd(&self.threshold)
            ),
            Self::SCORE,
            RuleCategory::TransactionPattern,
        )
    }

    fn evaluate(
        &self,
        transaction: &Transaction,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        let amount = checked_amount(transaction)?;
        let others = ctx.activity.same_day_high_value;
        if amount < &self.threshold || others < self.min_others {
            return Ok(None);
        }
        Ok(fire(
            Self::NAME,
            format!(
                "Multiple high-value transactions on same day (total: {})",
                others + 1
            ),
            Self::SCORE,
        ))
    }
}

pub struct HighVelocity {
    window_secs: i64,
    min_others: i64,
}

impl HighVelocity {
    const NAME: &'static str = "HIGH_VELOCITY";
    const SCORE: u8 = 65;
}

impl Rule for HighVelocity {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            format!(
                "More than {} transactions by one sender within {} seconds",
                self.min_others, self.window_secs
            ),
            Self::SCORE,
            RuleCategory::Velocity,
        )
    }

    fn evaluate(
        &self,
        _transaction: &Transaction,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        let others = ctx.activity.velocity_window;
        if others < self.min_others {
            return Ok(None);
        }
        Ok(fire(
            Self::NAME,
            format!(
                "High transaction velocity: {} transactions in {} seconds",
                others + 1,
                self.window_secs
            ),
            Self::SCORE,
        ))
    }
}

// ============================================================
// Geographic and sanctions rules
// ============================================================

pub struct SanctionedCountryTransfer;

impl SanctionedCountryTransfer {
    const NAME: &'static str = "SANCTIONED_COUNTRY_TRANSFER";
    const SCORE: u8 = 95;
}

impl Rule for SanctionedCountryTransfer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            "Transfers or payments to sanctioned countries".to_string(),
            Self::SCORE,
            RuleCategory::Sanctions,
        )
    }

    fn evaluate(
        &self,
        transaction: &Transaction,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        if !matches!(transaction.transaction_type.as_str(), "transfer" | "payment") {
            return Ok(None);
        }
        let Some(country) = transaction.counterparty_country.as_deref() else {
            return Ok(None);
        };
        if !ctx.sanctions.is_sanctioned_country(country) {
            return Ok(None);
        }
        Ok(fire(
            Self::NAME,
            format!("Transfer to sanctioned country: {country}"),
            Self::SCORE,
        ))
    }
}

pub struct OfacSanctionedEntity;

impl OfacSanctionedEntity {
    const NAME: &'static str = "OFAC_SANCTIONED_ENTITY";
    const SCORE: u8 = 100;
}

impl Rule for OfacSanctionedEntity {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            "Counterparty matches a sanctioned entity name or alias".to_string(),
            Self::SCORE,
            RuleCategory::Sanctions,
        )
    }

    fn evaluate(
        &self,
        transaction: &Transaction,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        let Some(name) = transaction.counterparty_name.as_deref() else {
            return Ok(None);
        };
        let Some(entity) = ctx.sanctions.match_counterparty(name) else {
            return Ok(None);
        };
        Ok(fire(
            Self::NAME,
            format!(
                "Transaction with sanctioned entity: {} (matched {})",
                name.trim(),
                entity.name
            ),
            Self::SCORE,
        ))
    }
}

pub struct CrossBorderThreshold {
    threshold: BigDecimal,
}

impl CrossBorderThreshold {
    const NAME: &'static str = "CROSS_BORDER_THRESHOLD";
    const SCORE: u8 = 55;
}

impl Rule for CrossBorderThreshold {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            format!(
                "Cross-border transactions of at least {}",
                format_usd(&self.threshold)
            ),
            Self::SCORE,
            RuleCategory::Geographic,
        )
    }

    fn evaluate(
        &self,
        transaction: &Transaction,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        let amount = checked_amount(transaction)?;
        let Some(country) = transaction.counterparty_country.as_deref() else {
            return Ok(None);
        };
        if amount < &self.threshold {
            return Ok(None);
        }
        let customer = ctx.customer.ok_or(RuleEvaluationError::MissingCustomer {
            transaction_id: transaction.id,
            customer_id: transaction.sender_id,
        })?;
        if customer.country_code.as_deref() == Some(country) {
            return Ok(None);
        }
        Ok(fire(
            Self::NAME,
            format!(
                "Cross-border transaction: {} to {}",
                format_usd(amount),
                country
            ),
            Self::SCORE,
        ))
    }
}

// ============================================================
// Pattern, customer and temporal rules
// ============================================================

pub struct StructuringPattern {
    floor: BigDecimal,
    ceiling: BigDecimal,
    window_days: i64,
    min_similar: i64,
}

impl StructuringPattern {
    const NAME: &'static str = "STRUCTURING_PATTERN";
    const SCORE: u8 = 80;
}

impl Rule for StructuringPattern {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            format!(
                "Repeated transfers or withdrawals between {} and {} within {} days",
                format_usd(&self.floor),
                format_usd(&self.ceiling),
                self.window_days
            ),
            Self::SCORE,
            RuleCategory::Structuring,
        )
    }

    fn evaluate(
        &self,
        transaction: &Transaction,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        let amount = checked_amount(transaction)?;
        if !matches!(transaction.transaction_type.as_str(), "transfer" | "withdrawal") {
            return Ok(None);
        }
        if amount < &self.floor || amount >= &self.ceiling {
            return Ok(None);
        }
        if ctx.activity.similar_recent < self.min_similar {
            return Ok(None);
        }
        Ok(fire(
            Self::NAME,
            format!(
                "Potential structuring: {} (similar amounts in past {} days)",
                format_usd(amount),
                self.window_days
            ),
            Self::SCORE,
        ))
    }
}

pub struct HighRiskCustomer {
    min_risk_score: i16,
    min_amount: BigDecimal,
}

impl HighRiskCustomer {
    const NAME: &'static str = "HIGH_RISK_CUSTOMER";
    const SCORE: u8 = 60;
}

impl Rule for HighRiskCustomer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            format!(
                "Transactions of at least {} by customers with risk score {} or higher",
                format_usd(&self.min_amount),
                self.min_risk_score
            ),
            Self::SCORE,
            RuleCategory::CustomerRisk,
        )
    }

    fn evaluate(
        &self,
        transaction: &Transaction,
        ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        let amount = checked_amount(transaction)?;
        if amount < &self.min_amount {
            return Ok(None);
        }
        let customer = ctx.customer.ok_or(RuleEvaluationError::MissingCustomer {
            transaction_id: transaction.id,
            customer_id: transaction.sender_id,
        })?;
        if customer.risk_score < self.min_risk_score {
            return Ok(None);
        }
        Ok(fire(
            Self::NAME,
            format!(
                "High-risk customer (score: {}) large transaction",
                customer.risk_score
            ),
            Self::SCORE,
        ))
    }
}

pub struct UnusualTimePattern {
    start_hour: u32,
    end_hour: u32,
    min_amount: BigDecimal,
}

impl UnusualTimePattern {
    const NAME: &'static str = "UNUSUAL_TIME_PATTERN";
    const SCORE: u8 = 45;
}

impl Rule for UnusualTimePattern {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn info(&self) -> RuleInfo {
        info(
            Self::NAME,
            format!(
                "Transactions of at least {} between {:02}:00 and {:02}:59 UTC",
                format_usd(&self.min_amount),
                self.start_hour,
                self.end_hour
            ),
            Self::SCORE,
            RuleCategory::Temporal,
        )
    }

    fn evaluate(
        &self,
        transaction: &Transaction,
        _ctx: &RuleContext<'_>,
    ) -> Result<Option<FlagCandidate>, RuleEvaluationError> {
        let amount = checked_amount(transaction)?;
        let hour = transaction.transaction_date.hour();
        if hour < self.start_hour || hour > self.end_hour || amount < &self.min_amount {
            return Ok(None);
        }
        Ok(fire(
            Self::NAME,
            format!(
                "Transaction at unusual time: {}",
                transaction.transaction_date.format("%H:%M")
            ),
            Self::SCORE,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SanctionsConfig;
    use crate::rules::types::SenderActivity;
    use crate::sanctions::SanctionsList;
    use crate::testing::{customer, sanctioned_entity, transaction};
    use crate::types::Customer;

    fn rule(name: &str) -> Box<dyn Rule> {
        build(&RulesConfig::default())
            .into_iter()
            .find(|r| r.name() == name)
            .unwrap()
    }

    fn sanctions() -> SanctionsList {
        SanctionsList::new(
            vec![sanctioned_entity("Evil Corp International", &["EC Holdings"])],
            &SanctionsConfig::default(),
        )
    }

    fn eval(
        name: &str,
        tx: &Transaction,
        customer: Option<&Customer>,
        activity: SenderActivity,
    ) -> Option<FlagCandidate> {
        let sanctions = sanctions();
        let ctx = RuleContext {
            customer,
            sanctions: &sanctions,
            activity,
        };
        rule(name).evaluate(tx, &ctx).unwrap()
    }

    #[test]
    fn test_catalog_is_complete() {
        let rules = build(&RulesConfig::default());
        assert_eq!(rules.len(), 10);
        let mut names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 10);
        for rule in &rules {
            assert_eq!(rule.info().name, rule.name());
        }
    }

    #[test]
    fn test_large_cash_withdrawal() {
        let c = customer(1, Some("US"));
        let hit = transaction(&c, "withdrawal", "10000.01", "2024-03-01T12:00:00Z");
        let at_threshold = transaction(&c, "withdrawal", "10000.00", "2024-03-01T12:00:00Z");
        let deposit = transaction(&c, "deposit", "50000.00", "2024-03-01T12:00:00Z");

        let flag = eval("LARGE_CASH_WITHDRAWAL", &hit, Some(&c), Default::default()).unwrap();
        assert_eq!(flag.risk_score, 85);
        assert_eq!(flag.description, "Large cash withdrawal of $10,000.01");
        assert!(eval("LARGE_CASH_WITHDRAWAL", &at_threshold, Some(&c), Default::default()).is_none());
        assert!(eval("LARGE_CASH_WITHDRAWAL", &deposit, Some(&c), Default::default()).is_none());
    }

    #[test]
    fn test_multiple_high_value_same_day() {
        let c = customer(1, Some("US"));
        let tx = transaction(&c, "payment", "5000.00", "2024-03-01T12:00:00Z");
        let two_others = SenderActivity {
            same_day_high_value: 2,
            ..Default::default()
        };
        let one_other = SenderActivity {
            same_day_high_value: 1,
            ..Default::default()
        };

        let flag = eval("MULTIPLE_HIGH_VALUE_SAME_DAY", &tx, Some(&c), two_others).unwrap();
        assert_eq!(flag.risk_score, 70);
        assert!(flag.description.contains("total: 3"));
        assert!(eval("MULTIPLE_HIGH_VALUE_SAME_DAY", &tx, Some(&c), one_other).is_none());

        let small = transaction(&c, "payment", "4999.99", "2024-03-01T12:00:00Z");
        assert!(eval("MULTIPLE_HIGH_VALUE_SAME_DAY", &small, Some(&c), two_others).is_none());
    }

    #[test]
    fn test_sanctioned_country_transfer() {
        let c = customer(1, Some("US"));
        let mut tx = transaction(&c, "transfer", "100.00", "2024-03-01T12:00:00Z");
        tx.counterparty_country = Some("IR".to_string());

        let flag = eval("SANCTIONED_COUNTRY_TRANSFER", &tx, Some(&c), Default::default()).unwrap();
        assert_eq!(flag.risk_score, 95);
        assert_eq!(flag.description, "Transfer to sanctioned country: IR");

        tx.transaction_type = "deposit".to_string();
        assert!(eval("SANCTIONED_COUNTRY_TRANSFER", &tx, Some(&c), Default::default()).is_none());

        tx.transaction_type = "payment".to_string();
        tx.counterparty_country = Some("DE".to_string());
        assert!(eval("SANCTIONED_COUNTRY_TRANSFER", &tx, Some(&c), Default::default()).is_none());
    }

    #[test]
    fn test_ofac_entity() {
        let c = customer(1, Some("US"));
        let mut tx = transaction(&c, "payment", "100.00", "2024-03-01T12:00:00Z");
        tx.counterparty_name = Some("ec holdings".to_string());

        let flag = eval("OFAC_SANCTIONED_ENTITY", &tx, Some(&c), Default::default()).unwrap();
        assert_eq!(flag.risk_score, 100);
        assert!(flag.description.contains("Evil Corp International"));

        tx.counterparty_name = Some("Ev".to_string());
        assert!(eval("OFAC_SANCTIONED_ENTITY", &tx, Some(&c), Default::default()).is_none());

        tx.counterparty_name = None;
        assert!(eval("OFAC_SANCTIONED_ENTITY", &tx, Some(&c), Default::default()).is_none());
    }

    #[test]
    fn test_structuring_pattern() {
        let c = customer(1, Some("US"));
        let similar = SenderActivity {
            similar_recent: 1,
            ..Default::default()
        };
        let tx = transaction(&c, "transfer", "9500.00", "2024-03-01T12:00:00Z");
        let flag = eval("STRUCTURING_PATTERN", &tx, Some(&c), similar).unwrap();
        assert_eq!(flag.risk_score, 80);

        assert!(eval("STRUCTURING_PATTERN", &tx, Some(&c), Default::default()).is_none());

        let at_ceiling = transaction(&c, "transfer", "10000.00", "2024-03-01T12:00:00Z");
        assert!(eval("STRUCTURING_PATTERN", &at_ceiling, Some(&c), similar).is_none());

        let payment = transaction(&c, "payment", "9500.00", "2024-03-01T12:00:00Z");
        assert!(eval("STRUCTURING_PATTERN", &payment, Some(&c), similar).is_none());
    }

    #[test]
    fn test_round_number() {
        let c = customer(1, Some("US"));
        let round = transaction(&c, "deposit", "25000.00", "2024-03-01T12:00:00Z");
        let not_round = transaction(&c, "deposit", "25000.50", "2024-03-01T12:00:00Z");
        let small = transaction(&c, "deposit", "9000.00", "2024-03-01T12:00:00Z");

        let flag = eval("ROUND_NUMBER_PATTERN", &round, Some(&c), Default::default()).unwrap();
        assert_eq!(flag.risk_score, 40);
        assert!(eval("ROUND_NUMBER_PATTERN", &not_round, Some(&c), Default::default()).is_none());
        assert!(eval("ROUND_NUMBER_PATTERN", &small, Some(&c), Default::default()).is_none());
    }

    #[test]
    fn test_high_velocity() {
        let c = customer(1, Some("US"));
        let tx = transaction(&c, "payment", "10.00", "2024-03-01T12:00:00Z");
        let busy = SenderActivity {
            velocity_window: 5,
            ..Default::default()
        };
        let quiet = SenderActivity {
            velocity_window: 4,
            ..Default::default()
        };
        let flag = eval("HIGH_VELOCITY", &tx, Some(&c), busy).unwrap();
        assert_eq!(flag.risk_score, 65);
        assert!(flag.description.contains("6 transactions"));
        assert!(eval("HIGH_VELOCITY", &tx, Some(&c), quiet).is_none());
    }

    #[test]
    fn test_high_risk_customer() {
        let risky = customer(4, Some("US"));
        let safe = customer(3, Some("US"));
        let tx = transaction(&risky, "payment", "5000.00", "2024-03-01T12:00:00Z");

        let flag = eval("HIGH_RISK_CUSTOMER", &tx, Some(&risky), Default::default()).unwrap();
        assert_eq!(flag.risk_score, 60);
        assert!(eval("HIGH_RISK_CUSTOMER", &tx, Some(&safe), Default::default()).is_none());

        let sanctions = sanctions();
        let ctx = RuleContext {
            customer: None,
            sanctions: &sanctions,
            activity: Default::default(),
        };
        let err = rule("HIGH_RISK_CUSTOMER").evaluate(&tx, &ctx).unwrap_err();
        assert!(matches!(err, RuleEvaluationError::MissingCustomer { .. }));
    }

    #[test]
    fn test_unusual_time() {
        let c = customer(1, Some("US"));
        let late = transaction(&c, "payment", "1000.00", "2024-03-01T05:59:00Z");
        let early = transaction(&c, "payment", "1000.00", "2024-03-01T01:59:00Z");
        let small = transaction(&c, "payment", "999.99", "2024-03-01T03:00:00Z");

        let flag = eval("UNUSUAL_TIME_PATTERN", &late, Some(&c), Default::default()).unwrap();
        assert_eq!(flag.risk_score, 45);
        assert_eq!(flag.description, "Transaction at unusual time: 05:59");
        assert!(eval("UNUSUAL_TIME_PATTERN", &early, Some(&c), Default::default()).is_none());
        assert!(eval("UNUSUAL_TIME_PATTERN", &small, Some(&c), Default::default()).is_none());
    }

    #[test]
    fn test_cross_border() {
        let c = customer(1, Some("US"));
        let mut tx = transaction(&c, "transfer", "3000.00", "2024-03-01T12:00:00Z");
        tx.counterparty_country = Some("GB".to_string());

        let flag = eval("CROSS_BORDER_THRESHOLD", &tx, Some(&c), Default::default()).unwrap();
        assert_eq!(flag.risk_score, 55);
        assert_eq!(flag.description, "Cross-border transaction: $3,000.00 to GB");

        tx.counterparty_country = Some("US".to_string());
        assert!(eval("CROSS_BORDER_THRESHOLD", &tx, Some(&c), Default::default()).is_none());
    }

    #[test]
    fn test_negative_amount_is_an_error() {
        let c = customer(1, Some("US"));
        let tx = transaction(&c, "withdrawal", "-5.00", "2024-03-01T12:00:00Z");
        let sanctions = sanctions();
        let ctx = RuleContext {
            customer: Some(&c),
            sanctions: &sanctions,
            activity: Default::default(),
        };
        let err = rule("LARGE_CASH_WITHDRAWAL").evaluate(&tx, &ctx).unwrap_err();
        assert!(matches!(err, RuleEvaluationError::MalformedAmount { .. }));
    }
}
