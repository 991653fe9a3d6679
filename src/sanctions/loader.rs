use crate::db::{NewSanctionedEntity, Store};

/// Parse a sanctioned-entity CSV file.
/// Expected columns: name, aliases (semicolon-separated), entity_type, country_code, program.
pub fn parse_entities_csv(path: &str) -> eyre::Result<Vec<NewSanctionedEntity>> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("Failed to open sanctions CSV '{}': {}", path, e))?;
    parse_entities(reader)
}

fn parse_entities<R: std::io::Read>(
    mut reader: csv::Reader<R>,
) -> eyre::Result<Vec<NewSanctionedEntity>> {
    let optional = |value: Option<&str>| {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut entities = Vec::new();
    for result in reader.records() {
        let record = result?;
        let name = record.get(0).unwrap_or("").trim().to_string();
        if name.is_empty() {
            continue;
        }
        let aliases = record
            .get(1)
            .unwrap_or("")
            .split(';')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        entities.push(NewSanctionedEntity {
            name,
            aliases,
            entity_type: optional(record.get(2)),
            country_code: optional(record.get(3)).map(|c| c.to_uppercase()),
            sanctions_program: optional(record.get(4)),
        });
    }

    tracing::info!(entities = entities.len(), "Parsed sanctioned entities");
    Ok(entities)
}

/// Upsert parsed entities into the store, keyed by name.
pub async fn seed_entities(
    store: &dyn Store,
    entities: &[NewSanctionedEntity],
) -> eyre::Result<usize> {
    let mut count = 0;
    for entity in entities {
        store.upsert_sanctioned_entity(entity).await?;
        count += 1;
    }
    tracing::info!(entities = count, "Seeded sanctioned entities");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    const SAMPLE: &str = "\
name,aliases,entity_type,country_code,program
Evil Corp International,EC Holdings; Evil Corp,organization,ru,SDGT
,orphan alias,,,
Ivan Petrov,,individual,,
";

    fn parse(data: &str) -> Vec<NewSanctionedEntity> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data.as_bytes());
        parse_entities(reader).unwrap()
    }

    #[test]
    fn test_parse_entities() {
        let entities = parse(SAMPLE);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].aliases, vec!["EC Holdings", "Evil Corp"]);
        assert_eq!(entities[0].country_code.as_deref(), Some("RU"));
        assert!(entities[1].aliases.is_empty());
        assert!(entities[1].sanctions_program.is_none());
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryStore::new();
        let entities = parse(SAMPLE);
        seed_entities(&store, &entities).await.unwrap();
        seed_entities(&store, &entities).await.unwrap();
        assert_eq!(store.sanctioned_entities().await.unwrap().len(), 2);
    }
}
