//! Static description of a remote model type.

use crate::cache::CachePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// This model holds the foreign key; at most one related record.
    BelongsTo,
    /// The related model holds the foreign key; any number of records.
    HasMany,
}

/// A named relation loaded with one `in` query across a result set.
///
/// `local_field` is read from this model, `foreign_field` is matched on the
/// related entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
    pub related: String,
    pub local_field: String,
    pub foreign_field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    pub entity: String,
    pub primary_key: String,
    pub cache: CachePolicy,
    pub relations: Vec<Relation>,
}

impl ModelDefinition {
    pub fn new(entity: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            primary_key: primary_key.into(),
            cache: CachePolicy::inherit(),
            relations: Vec::new(),
        }
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = policy;
        self
    }

    /// e.g. an order belongs to a business partner via `CardCode`.
    pub fn belongs_to(
        mut self,
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
        owner_key: impl Into<String>,
    ) -> Self {
        self.relations.push(Relation {
            name: name.into(),
            kind: RelationKind::BelongsTo,
            related: related.into(),
            local_field: foreign_key.into(),
            foreign_field: owner_key.into(),
        });
        self
    }

    /// e.g. a business partner has many orders via `CardCode`.
    pub fn has_many(
        mut self,
        name: impl Into<String>,
        related: impl Into<String>,
        foreign_key: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        self.relations.push(Relation {
            name: name.into(),
            kind: RelationKind::HasMany,
            related: related.into(),
            local_field: local_key.into(),
            foreign_field: foreign_key.into(),
        });
        self
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.name == name)
    }
}
