//! Eager loading: one `in` query per relation across a whole result set.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::debug;

use super::context::ModelContext;
use super::definition::{Relation, RelationKind};
use super::instance::{RelationValue, SapB1Model};
use crate::error::{Error, Result};
use crate::query::FilterValue;

/// Hashable form of a scalar join value.
fn join_key(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(crate) async fn load_relations(
    ctx: &ModelContext,
    models: &mut [SapB1Model],
    names: &[String],
) -> Result<()> {
    let Some(first) = models.first() else {
        return Ok(());
    };
    let definition = first.definition().clone();

    for name in names {
        let relation = definition
            .relation(name)
            .ok_or_else(|| Error::RelationNotDefined {
                entity: definition.entity.clone(),
                relation: name.clone(),
            })?
            .clone();
        load_relation(ctx, models, &relation).await?;
    }
    Ok(())
}

async fn load_relation(
    ctx: &ModelContext,
    models: &mut [SapB1Model],
    relation: &Relation,
) -> Result<()> {
    let mut seen = HashMap::new();
    for model in models.iter() {
        if let Some(value) = model.get(&relation.local_field)
            && let Some(key) = join_key(value)
        {
            seen.entry(key).or_insert_with(|| FilterValue::from(value));
        }
    }

    let related = if seen.is_empty() {
        Vec::new()
    } else {
        ctx.query(&relation.related)?
            .where_in(&relation.foreign_field, seen.into_values())?
            .fetch_models()
            .await?
    };
    debug!(
        relation = %relation.name,
        related = %relation.related,
        loaded = related.len(),
        "eager-loaded relation"
    );

    let mut grouped: HashMap<String, Vec<SapB1Model>> = HashMap::new();
    for record in related {
        if let Some(key) = record.get(&relation.foreign_field).and_then(join_key) {
            grouped.entry(key).or_default().push(record);
        }
    }

    for model in models.iter_mut() {
        let matches = model
            .get(&relation.local_field)
            .and_then(join_key)
            .and_then(|key| grouped.get(&key))
            .cloned()
            .unwrap_or_default();

        let value = match relation.kind {
            RelationKind::BelongsTo => {
                RelationValue::One(matches.into_iter().next().map(Box::new))
            }
            RelationKind::HasMany => RelationValue::Many(matches),
        };
        model.set_relation(relation.name.clone(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_keys_unify_scalars() {
        assert_eq!(join_key(&json!("C001")), Some("C001".to_string()));
        assert_eq!(join_key(&json!(42)), Some("42".to_string()));
        assert_eq!(join_key(&json!(null)), None);
    }
}
