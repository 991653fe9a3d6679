use serde_json::Value as JsonValue;
use std::fmt::Write as _;

use crate::config::{AnalysisConfig, LlmConfig};
use crate::rules::types::format_money;
use crate::types::{Customer, FlaggedTransaction, Transaction};

pub const FUNCTION_NAME: &str = "analyze_transaction";

const SYSTEM_PROMPT: &str = "You are an expert anti-money-laundering analyst with deep knowledge of \
financial crime typologies, regulatory requirements and risk assessment methodology. \
Assess only the facts provided and answer through the analyze_transaction function.";

const MAX_COUNTERPARTY_NAME_CHARS: usize = 120;
const MAX_RULE_DESCRIPTION_CHARS: usize = 300;

/// A fully rendered, provider-agnostic request for one flag.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub function_name: &'static str,
    pub function_parameters: JsonValue,
}

impl AnalysisRequest {
    /// The text recorded in the audit log as the prompt sent.
    pub fn transcript(&self) -> String {
        format!(
            "[system]\n{}\n\n[user]\n{}",
            self.system_prompt, self.user_prompt
        )
    }
}

/// JSON schema of the structured reply the model must return.
pub fn response_schema() -> JsonValue {
    serde_json::json!({
        "type": "object",
        "properties": {
            "risk_level": {
                "type": "string",
                "enum": ["High", "Medium", "Low"],
                "description": "Overall risk level assessment"
            },
            "explanation": {
                "type": "string",
                "description": "Reasoning behind the assessment"
            },
            "suggested_action": {
                "type": "string",
                "enum": ["escalate", "monitor", "ignore", "investigate"],
                "description": "Recommended next step"
            },
            "confidence_score": {
                "type": "number",
                "minimum": 0.0,
                "maximum": 1.0,
                "description": "Confidence in the assessment"
            },
            "risk_factors": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Key risk factors, most important first"
            },
            "compliance_notes": {
                "type": "string",
                "description": "Regulatory considerations"
            }
        },
        "required": ["risk_level", "explanation", "suggested_action", "confidence_score"]
    })
}

/// Renders flags into bounded, deterministic analysis requests.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    model: String,
    temperature: f32,
    max_tokens: u32,
    description_max_chars: usize,
    prior_flags: usize,
}

impl PromptBuilder {
    pub fn new(llm: &LlmConfig, analysis: &AnalysisConfig) -> Self {
        Self {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            description_max_chars: analysis.description_max_chars,
            prior_flags: analysis.prior_flags.max(0) as usize,
        }
    }

    /// Build the request. `prior` is expected newest first; only the configured window is used.
    pub fn build(
        &self,
        flag: &FlaggedTransaction,
        transaction: &Transaction,
        customer: &Customer,
        prior: &[FlaggedTransaction],
    ) -> AnalysisRequest {
        AnalysisRequest {
            model: self.model.clone(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: self.render(flag, transaction, customer, prior),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            function_name: FUNCTION_NAME,
            function_parameters: response_schema(),
        }
    }

    fn render(
        &self,
        flag: &FlaggedTransaction,
        tx: &Transaction,
        customer: &Customer,
        prior: &[FlaggedTransaction],
    ) -> String {
        let or_none = |v: Option<&str>| v.unwrap_or("none").to_string();
        let mut out = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "Analyze the following flagged transaction for money-laundering risk.\n"
        );

        let _ = writeln!(out, "Transaction:");
        let _ = writeln!(out, "- Amount: {}", format_money(&tx.amount, &tx.currency));
        let _ = writeln!(out, "- Type: {}", tx.transaction_type);
        let _ = writeln!(out, "- Channel: {}", or_none(tx.channel.as_deref()));
        let _ = writeln!(out, "- Date: {}", tx.transaction_date.to_rfc3339());
        let _ = writeln!(out, "- Status: {}", tx.status);
        let _ = writeln!(
            out,
            "- Description: {}",
            tx.description
                .as_deref()
                .map(|d| truncate(d, self.description_max_chars))
                .unwrap_or_else(|| "none".to_string())
        );

        let _ = writeln!(out, "\nCustomer profile:");
        let _ = writeln!(out, "- Risk score: {}/5", customer.risk_score);
        let _ = writeln!(out, "- Account type: {}", customer.account_type);
        let _ = writeln!(out, "- Country: {}", or_none(customer.country_code.as_deref()));
        let _ = writeln!(out, "- Sanctioned: {}", customer.is_sanctioned);
        let _ = writeln!(
            out,
            "- Balance: {}",
            format_money(&customer.balance, &tx.currency)
        );

        let _ = writeln!(out, "\nCounterparty:");
        let _ = writeln!(
            out,
            "- Name: {}",
            tx.counterparty_name
                .as_deref()
                .map(|n| truncate(n, MAX_COUNTERPARTY_NAME_CHARS))
                .unwrap_or_else(|| "none".to_string())
        );
        let _ = writeln!(
            out,
            "- Country: {}",
            or_none(tx.counterparty_country.as_deref())
        );
        let _ = writeln!(
            out,
            "- Account: {}",
            tx.counterparty_account
                .as_deref()
                .map(mask_account)
                .unwrap_or_else(|| "none".to_string())
        );

        let _ = writeln!(out, "\nFlag:");
        let _ = writeln!(out, "- Rule: {}", flag.rule_name);
        let _ = writeln!(
            out,
            "- Description: {}",
            truncate(&flag.rule_description, MAX_RULE_DESCRIPTION_CHARS)
        );
        let _ = writeln!(
            out,
            "- Risk: {} ({}/100)",
            flag.risk_level, flag.risk_score
        );

        let window: Vec<&FlaggedTransaction> = prior.iter().take(self.prior_flags).collect();
        let _ = writeln!(out, "\nPrior flags for this customer (newest first):");
        if window.is_empty() {
            let _ = writeln!(out, "- none");
        }
        for prior in window {
            let _ = writeln!(
                out,
                "- {} {} {} ({}/100)",
                prior.flagged_at.format("%Y-%m-%d"),
                prior.rule_name,
                prior.risk_level,
                prior.risk_score
            );
        }

        let _ = write!(
            out,
            "\nConsider transaction patterns and amounts, the customer risk profile, \
counterparty and geographic risk, regulatory obligations and known typologies \
(structuring, layering, placement). Respond using the {} function.",
            FUNCTION_NAME
        );
        out
    }
}

/// Keep at most `max` characters, marking the cut.
fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}

/// Show only the last four characters of an account identifier.
fn mask_account(account: &str) -> String {
    let chars: Vec<char> = account.trim().chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}
