//! Fixtures shared by unit tests.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::config::LlmConfig;
use crate::error::LlmRequestError;
use crate::llm::prompt::{response_schema, AnalysisRequest, FUNCTION_NAME};
use crate::llm::{LlmProvider, ProviderReply};
use crate::types::{
    Customer, FlaggedTransaction, NewFlag, RiskLevel, SanctionedEntity, TokenUsage, Transaction,
};

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn customer(risk_score: i16, country: Option<&str>) -> Customer {
    Customer {
        id: Uuid::new_v4(),
        name: "Alice Example".to_string(),
        email: "alice@example.com".to_string(),
        account_number: "ACC-4411-0099".to_string(),
        account_type: "checking".to_string(),
        balance: BigDecimal::from_str("25000.00").unwrap(),
        risk_score,
        is_sanctioned: false,
        country_code: country.map(str::to_string),
        created_at: at("2020-01-01T00:00:00Z"),
    }
}

pub fn transaction(sender: &Customer, kind: &str, amount: &str, date: &str) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        sender_id: sender.id,
        receiver_id: None,
        transaction_type: kind.to_string(),
        amount: BigDecimal::from_str(amount).unwrap(),
        currency: "USD".to_string(),
        description: None,
        channel: Some("online".to_string()),
        counterparty_name: None,
        counterparty_account: None,
        counterparty_country: None,
        transaction_date: at(date),
        reference_number: None,
        status: "completed".to_string(),
    }
}

pub fn sanctioned_entity(name: &str, aliases: &[&str]) -> SanctionedEntity {
    SanctionedEntity {
        id: 1,
        name: name.to_string(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        entity_type: Some("organization".to_string()),
        country_code: None,
        sanctions_program: Some("SDGT".to_string()),
    }
}

pub fn new_flag(tx: &Transaction, rule: &str, score: u8) -> NewFlag {
    NewFlag {
        transaction_id: tx.id,
        rule_name: rule.to_string(),
        rule_description: format!("{rule} fired"),
        risk_level: RiskLevel::from_score(score).unwrap(),
        risk_score: i32::from(score),
        flagged_at: Utc::now(),
    }
}

pub fn flag_for(tx: &Transaction, rule: &str, score: u8) -> FlaggedTransaction {
    new_flag(tx, rule, score).into_flag(Uuid::new_v4())
}

pub fn request() -> AnalysisRequest {
    let llm = LlmConfig::default();
    AnalysisRequest {
        model: llm.model,
        system_prompt: "system".to_string(),
        user_prompt: "user".to_string(),
        temperature: llm.temperature,
        max_tokens: llm.max_tokens,
        function_name: FUNCTION_NAME,
        function_parameters: response_schema(),
    }
}

pub fn valid_arguments() -> String {
    serde_json::json!({
        "risk_level": "High",
        "explanation": "Large off-hours cash withdrawal inconsistent with the customer profile.",
        "suggested_action": "escalate",
        "confidence_score": 0.82,
        "risk_factors": ["off-hours activity", "cash"],
        "compliance_notes": "Currency transaction report threshold exceeded."
    })
    .to_string()
}

pub fn valid_reply() -> ProviderReply {
    ProviderReply {
        body: "{\"id\":\"chatcmpl-test\"}".to_string(),
        usage: TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
        },
        arguments: Some(valid_arguments()),
    }
}

type Scripted = Result<ProviderReply, LlmRequestError>;

/// Provider that replays scripted outcomes, then repeats the last one.
#[derive(Clone)]
pub struct ScriptedProvider {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    last: Arc<Mutex<Option<Scripted>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn sequence(outcomes: Vec<Scripted>) -> Self {
        Self {
            script: Arc::new(Mutex::new(outcomes.into())),
            last: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    pub fn always(outcome: Scripted) -> Self {
        Self::sequence(vec![outcome])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Scripted {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(outcome) = script.pop_front() {
            *last = Some(outcome.clone());
            return outcome;
        }
        last.clone()
            .unwrap_or_else(|| Err(LlmRequestError::Network("script exhausted".to_string())))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &AnalysisRequest) -> Result<ProviderReply, LlmRequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next()
    }
}
