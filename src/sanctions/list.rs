use std::collections::HashSet;

use crate::config::SanctionsConfig;
use crate::db::Store;
use crate::error::PersistenceError;
use crate::types::SanctionedEntity;

struct IndexedEntity {
    entity: SanctionedEntity,
    /// Lowercased name followed by lowercased aliases.
    names: Vec<String>,
}

/// In-memory view of sanctioned countries and entities consulted by rule predicates.
pub struct SanctionsList {
    countries: HashSet<String>,
    entities: Vec<IndexedEntity>,
    min_match_len: usize,
}

impl SanctionsList {
    pub fn new(entities: Vec<SanctionedEntity>, config: &SanctionsConfig) -> Self {
        let entities = entities
            .into_iter()
            .map(|entity| {
                let names = std::iter::once(&entity.name)
                    .chain(entity.aliases.iter())
                    .map(|n| n.trim().to_lowercase())
                    .filter(|n| !n.is_empty())
                    .collect();
                IndexedEntity { entity, names }
            })
            .collect();

        Self {
            countries: config
                .countries
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
            entities,
            min_match_len: config.min_name_match_len,
        }
    }

    /// Load the entity list from the store.
    pub async fn load(store: &dyn Store, config: &SanctionsConfig) -> Result<Self, PersistenceError> {
        let entities = store.sanctioned_entities().await?;
        tracing::debug!(entities = entities.len(), "Loaded sanctioned entities");
        Ok(Self::new(entities, config))
    }

    pub fn is_sanctioned_country(&self, country_code: &str) -> bool {
        self.countries.contains(&country_code.trim().to_uppercase())
    }

    /// Find an entity whose name or alias contains the counterparty name, ignoring case.
    /// Names shorter than the configured minimum never match.
    pub fn match_counterparty(&self, counterparty_name: &str) -> Option<&SanctionedEntity> {
        let needle = counterparty_name.trim().to_lowercase();
        if needle.chars().count() < self.min_match_len {
            return None;
        }
        self.entities
            .iter()
            .find(|e| e.names.iter().any(|n| n.contains(&needle)))
            .map(|e| &e.entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, aliases: &[&str]) -> SanctionedEntity {
        SanctionedEntity {
            id: 1,
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            entity_type: Some("organization".to_string()),
            country_code: None,
            sanctions_program: Some("SDGT".to_string()),
        }
    }

    #[test]
    fn test_counterparty_matching() {
        let list = SanctionsList::new(
            vec![entity("Evil Corp International", &["EC Holdings"])],
            &SanctionsConfig::default(),
        );

        assert!(list.match_counterparty("evil corp").is_some());
        assert!(list.match_counterparty("  EC HOLDINGS ").is_some());
        assert!(list.match_counterparty("Good Corp").is_none());
        // Too short to match anything
        assert!(list.match_counterparty("ev").is_none());
        assert!(list.match_counterparty("").is_none());
    }

    #[test]
    fn test_sanctioned_countries() {
        let list = SanctionsList::new(Vec::new(), &SanctionsConfig::default());
        assert!(list.is_sanctioned_country("IR"));
        assert!(list.is_sanctioned_country("kp"));
        assert!(!list.is_sanctioned_country("US"));
        assert_eq!(list.entity_count(), 0);
    }
}
