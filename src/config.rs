use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub sanctions: SanctionsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

// ============================================================
// Rule Engine Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RulesConfig {
    /// Upper bound on transactions selected by one unscoped run.
    pub scan_limit: i64,
    /// Transactions evaluated concurrently.
    pub workers: usize,
    pub large_cash_withdrawal_threshold: f64,
    pub high_value: HighValueConfig,
    pub structuring: StructuringConfig,
    pub round_number: RoundNumberConfig,
    pub velocity: VelocityConfig,
    pub high_risk_customer: HighRiskCustomerConfig,
    pub unusual_time: UnusualTimeConfig,
    pub cross_border_threshold: f64,
}

impl RulesConfig {
    /// Every monetary threshold, keyed by its config path under `rules`.
    fn amount_thresholds(&self) -> [(&'static str, f64); 10] {
        [
            (
                "large_cash_withdrawal_threshold",
                self.large_cash_withdrawal_threshold,
            ),
            ("high_value.threshold", self.high_value.threshold),
            ("structuring.floor", self.structuring.floor),
            ("structuring.ceiling", self.structuring.ceiling),
            ("structuring.similar_max", self.structuring.similar_max),
            ("round_number.min_amount", self.round_number.min_amount),
            ("round_number.unit", self.round_number.unit),
            ("high_risk_customer.min_amount", self.high_risk_customer.min_amount),
            ("unusual_time.min_amount", self.unusual_time.min_amount),
            ("cross_border_threshold", self.cross_border_threshold),
        ]
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            scan_limit: 10_000,
            workers: 8,
            large_cash_withdrawal_threshold: 10_000.0,
            high_value: HighValueConfig::default(),
            structuring: StructuringConfig::default(),
            round_number: RoundNumberConfig::default(),
            velocity: VelocityConfig::default(),
            high_risk_customer: HighRiskCustomerConfig::default(),
            unusual_time: UnusualTimeConfig::default(),
            cross_border_threshold: 3_000.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HighValueConfig {
    pub threshold: f64,
    /// Other high-value transactions by the same sender that day.
    pub min_other_transactions: i64,
}

impl Default for HighValueConfig {
    fn default() -> Self {
        Self {
            threshold: 5_000.0,
            min_other_transactions: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StructuringConfig {
    pub floor: f64,
    /// Exclusive upper bound, normally the reporting threshold.
    pub ceiling: f64,
    /// Inclusive upper bound on earlier amounts counted as similar.
    pub similar_max: f64,
    pub window_days: i64,
    pub min_similar_transactions: i64,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            floor: 9_000.0,
            ceiling: 10_000.0,
            similar_max: 9_999.0,
            window_days: 7,
            min_similar_transactions: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RoundNumberConfig {
    pub min_amount: f64,
    pub unit: f64,
}

impl Default for RoundNumberConfig {
    fn default() -> Self {
        Self {
            min_amount: 10_000.0,
            unit: 1_000.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VelocityConfig {
    pub window_secs: i64,
    pub min_other_transactions: i64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            min_other_transactions: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HighRiskCustomerConfig {
    pub min_risk_score: i16,
    pub min_amount: f64,
}

impl Default for HighRiskCustomerConfig {
    fn default() -> Self {
        Self {
            min_risk_score: 4,
            min_amount: 5_000.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UnusualTimeConfig {
    /// Inclusive UTC hour range.
    pub start_hour: u32,
    pub end_hour: u32,
    pub min_amount: f64,
}

impl Default for UnusualTimeConfig {
    fn default() -> Self {
        Self {
            start_hour: 2,
            end_hour: 5,
            min_amount: 1_000.0,
        }
    }
}

// ============================================================
// Sanctions Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct SanctionsConfig {
    /// CSV of sanctioned entities seeded at startup.
    pub entities_csv_path: Option<String>,
    #[serde(default = "default_sanctioned_countries")]
    pub countries: Vec<String>,
    #[serde(default = "default_min_name_match_len")]
    pub min_name_match_len: usize,
}

impl Default for SanctionsConfig {
    fn default() -> Self {
        Self {
            entities_csv_path: None,
            countries: default_sanctioned_countries(),
            min_name_match_len: default_min_name_match_len(),
        }
    }
}

fn default_sanctioned_countries() -> Vec<String> {
    ["AF", "IR", "KP", "SY", "MM", "BY", "RU"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_min_name_match_len() -> usize {
    3
}

// ============================================================
// LLM Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_pricing")]
    pub pricing: Vec<ModelPricingConfig>,
    #[serde(default = "default_fallback_pricing")]
    pub fallback_pricing: PriceConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            pricing: default_pricing(),
            fallback_pricing: default_fallback_pricing(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4-1106-preview".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

const MAX_ATTEMPTS: u32 = 10;

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

/// Per-1K-token prices in USD, as decimal strings.
#[derive(Debug, Deserialize, Clone)]
pub struct PriceConfig {
    pub input_per_1k: String,
    pub output_per_1k: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelPricingConfig {
    pub model: String,
    #[serde(flatten)]
    pub price: PriceConfig,
}

fn price(input: &str, output: &str) -> PriceConfig {
    PriceConfig {
        input_per_1k: input.to_string(),
        output_per_1k: output.to_string(),
    }
}

fn default_pricing() -> Vec<ModelPricingConfig> {
    vec![
        ModelPricingConfig {
            model: "gpt-4-1106-preview".to_string(),
            price: price("0.01", "0.03"),
        },
        ModelPricingConfig {
            model: "gpt-4o".to_string(),
            price: price("0.0025", "0.01"),
        },
        ModelPricingConfig {
            model: "gpt-4o-mini".to_string(),
            price: price("0.00015", "0.0006"),
        },
    ]
}

fn default_fallback_pricing() -> PriceConfig {
    price("0.01", "0.03")
}

// ============================================================
// Analysis Orchestrator Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    /// In-flight LLM requests per batch.
    pub workers: usize,
    pub default_batch_limit: i64,
    pub max_batch_limit: i64,
    /// Prior flags of the same customer included in a prompt.
    pub prior_flags: i64,
    pub description_max_chars: usize,
    pub max_risk_factors: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            default_batch_limit: 10,
            max_batch_limit: 100,
            prior_flags: 5,
            description_max_chars: 500,
            max_risk_factors: 10,
        }
    }
}

// ============================================================
// API Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 5000,
            host: "0.0.0.0".to_string(),
        }
    }
}

fn default_api_port() -> u16 {
    5000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(eyre::eyre!("database.url must not be empty"));
        }
        for (name, value) in self.rules.amount_thresholds() {
            if !value.is_finite() || value < 0.0 {
                return Err(eyre::eyre!(
                    "rules.{} must be a finite, non-negative amount (got {})",
                    name,
                    value
                ));
            }
        }
        if self.rules.workers == 0 || self.analysis.workers == 0 {
            return Err(eyre::eyre!("Worker counts must be at least 1"));
        }
        if self.rules.structuring.floor >= self.rules.structuring.ceiling {
            return Err(eyre::eyre!(
                "rules.structuring.floor ({}) must be below ceiling ({})",
                self.rules.structuring.floor,
                self.rules.structuring.ceiling
            ));
        }
        let structuring = &self.rules.structuring;
        if structuring.similar_max < structuring.floor || structuring.similar_max >= structuring.ceiling {
            return Err(eyre::eyre!(
                "rules.structuring.similar_max ({}) must lie in [floor, ceiling)",
                structuring.similar_max
            ));
        }
        if self.rules.round_number.unit <= 0.0 {
            return Err(eyre::eyre!("rules.round_number.unit must be positive"));
        }
        let hours = &self.rules.unusual_time;
        if hours.start_hour > 23 || hours.end_hour > 23 || hours.start_hour > hours.end_hour {
            return Err(eyre::eyre!(
                "Invalid unusual_time hour range {}..={}",
                hours.start_hour,
                hours.end_hour
            ));
        }
        if self.llm.max_attempts == 0 || self.llm.max_attempts > MAX_ATTEMPTS {
            return Err(eyre::eyre!(
                "llm.max_attempts must be between 1 and {}",
                MAX_ATTEMPTS
            ));
        }
        if self.llm.backoff_base_ms > self.llm.backoff_max_ms {
            return Err(eyre::eyre!(
                "llm.backoff_base_ms ({}) must not exceed backoff_max_ms ({})",
                self.llm.backoff_base_ms,
                self.llm.backoff_max_ms
            ));
        }
        if self.analysis.default_batch_limit < 1
            || self.analysis.default_batch_limit > self.analysis.max_batch_limit
        {
            return Err(eyre::eyre!(
                "analysis.default_batch_limit must be between 1 and max_batch_limit"
            ));
        }
        for entry in &self.llm.pricing {
            parse_price(&entry.price).map_err(|e| eyre::eyre!("Model '{}': {}", entry.model, e))?;
        }
        parse_price(&self.llm.fallback_pricing)
            .map_err(|e| eyre::eyre!("Fallback pricing: {}", e))?;
        Ok(())
    }
}

/// Parse a configured price pair into decimals, rejecting negatives.
pub fn parse_price(price: &PriceConfig) -> eyre::Result<(BigDecimal, BigDecimal)> {
    let parse = |raw: &str| -> eyre::Result<BigDecimal> {
        let value = BigDecimal::from_str(raw.trim())
            .map_err(|e| eyre::eyre!("Invalid price '{}': {}", raw, e))?;
        if value < BigDecimal::from(0) {
            return Err(eyre::eyre!("Price '{}' must not be negative", raw));
        }
        Ok(value)
    };
    Ok((parse(&price.input_per_1k)?, parse(&price.output_per_1k)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        toml::from_str(
            r#"
[database]
url = "postgres://localhost/aml"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[database]
url = "postgres://localhost/test"
max_connections = 5

[rules]
workers = 2

[rules.velocity]
window_secs = 1800

[sanctions]
countries = ["IR", "KP"]

[llm]
model = "gpt-4o"
max_attempts = 5

[[llm.pricing]]
model = "gpt-4o"
input_per_1k = "0.0025"
output_per_1k = "0.01"

[analysis]
workers = 8
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.rules.workers, 2);
        assert_eq!(config.rules.velocity.window_secs, 1800);
        assert_eq!(config.rules.velocity.min_other_transactions, 5); // default
        assert_eq!(config.rules.large_cash_withdrawal_threshold, 10_000.0); // default
        assert_eq!(config.sanctions.countries, vec!["IR", "KP"]);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_attempts, 5);
        assert_eq!(config.llm.pricing.len(), 1);
        assert_eq!(config.llm.pricing[0].price.output_per_1k, "0.01");
        assert_eq!(config.analysis.workers, 8);
        assert_eq!(config.analysis.default_batch_limit, 10); // default
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(include_str!("../config.example.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.sanctions.entities_csv_path.as_deref(),
            Some("data/sanctioned_entities.csv")
        );
        assert_eq!(config.llm.pricing.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = minimal();
        assert_eq!(config.sanctions.countries.len(), 7);
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.llm.max_tokens, 1500);
        assert_eq!(config.llm.pricing.len(), 3);
        assert_eq!(config.api.port, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_price() {
        let mut config = minimal();
        config.llm.fallback_pricing.input_per_1k = "cheap".to_string();
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.llm.fallback_pricing.output_per_1k = "-0.01".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_structuring_band() {
        let mut config = minimal();
        config.rules.structuring.floor = 10_000.0;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.rules.structuring.similar_max = 10_000.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_non_finite_thresholds() {
        let mut config = minimal();
        config.rules.large_cash_withdrawal_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.rules.cross_border_threshold = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.rules.unusual_time.min_amount = -1.0;
        assert!(config.validate().is_err());

        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn test_validate_retry_bounds() {
        let mut config = minimal();
        config.llm.max_attempts = 1_000;
        assert!(config.validate().is_err());

        let mut config = minimal();
        config.llm.backoff_base_ms = config.llm.backoff_max_ms + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_hours() {
        let mut config = minimal();
        config.rules.unusual_time.end_hour = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = minimal();
        config.llm.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
