use bigdecimal::BigDecimal;
use std::collections::HashMap;

use crate::config::{parse_price, LlmConfig};
use crate::types::TokenUsage;

/// Decimal places kept on every cost estimate.
pub const COST_SCALE: i64 = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelPrice {
    pub input_per_1k: BigDecimal,
    pub output_per_1k: BigDecimal,
}

/// Per-model token prices with a fallback for unknown models.
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelPrice>,
    fallback: ModelPrice,
}

impl PricingTable {
    pub fn from_config(config: &LlmConfig) -> eyre::Result<Self> {
        let mut models = HashMap::new();
        for entry in &config.pricing {
            let (input_per_1k, output_per_1k) = parse_price(&entry.price)?;
            models.insert(
                entry.model.clone(),
                ModelPrice {
                    input_per_1k,
                    output_per_1k,
                },
            );
        }
        let (input_per_1k, output_per_1k) = parse_price(&config.fallback_pricing)?;
        Ok(Self {
            models,
            fallback: ModelPrice {
                input_per_1k,
                output_per_1k,
            },
        })
    }

    pub fn price_for(&self, model: &str) -> &ModelPrice {
        self.models.get(model).unwrap_or(&self.fallback)
    }

    /// `(input * input_price + output * output_price) / 1000`, rounded to six places.
    pub fn cost(&self, model: &str, usage: TokenUsage) -> BigDecimal {
        let price = self.price_for(model);
        let raw = BigDecimal::from(usage.input_tokens) * &price.input_per_1k
            + BigDecimal::from(usage.output_tokens) * &price.output_per_1k;
        (raw / BigDecimal::from(1000)).round(COST_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn usage(input_tokens: u32, output_tokens: u32) -> TokenUsage {
        TokenUsage {
            input_tokens,
            output_tokens,
        }
    }

    #[test]
    fn test_cost_is_exact() {
        let table = PricingTable::from_config(&LlmConfig::default()).unwrap();
        assert_eq!(table.cost("gpt-4-1106-preview", usage(1000, 500)), dec("0.025"));
        assert_eq!(table.cost("gpt-4o-mini", usage(812, 143)), dec("0.000208"));
        assert_eq!(table.cost("gpt-4o", usage(0, 0)), dec("0"));
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let table = PricingTable::from_config(&LlmConfig::default()).unwrap();
        assert_eq!(table.price_for("some-new-model"), table.price_for("gpt-4-1106-preview"));
        assert_eq!(table.cost("some-new-model", usage(2000, 1000)), dec("0.05"));
    }
}
