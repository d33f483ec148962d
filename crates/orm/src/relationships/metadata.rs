//! Relationship Metadata - declarative relationship descriptors
//!
//! A [`Relationship`] is what an entity type declares; everything left
//! unspecified is inferred from naming conventions when the descriptor is
//! resolved (see [`super::resolution`]).

use crate::error::{OrmError, OrmResult};
use crate::query::validate_identifier;
use std::fmt;

/// Defines the type of relationship between entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipType {
    /// Many-to-one: this row holds the foreign key
    BelongsTo,
    /// One-to-one: the target row holds the foreign key
    HasOne,
    /// One-to-many: target rows hold the foreign key
    HasMany,
    /// Many-to-many through a join table
    HasAndBelongsToMany,
}

impl RelationshipType {
    /// Returns true if this relationship yields a list
    pub fn is_collection(self) -> bool {
        matches!(self, Self::HasMany | Self::HasAndBelongsToMany)
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BelongsTo => "belongs_to",
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::HasAndBelongsToMany => "has_and_belongs_to_many",
        };
        f.write_str(name)
    }
}

/// A relationship declared on an entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    kind: RelationshipType,
    name: String,
    class_name: Option<String>,
    foreign_key: Option<String>,
    association_foreign_key: Option<String>,
    join_table: Option<String>,
    polymorphic: bool,
    as_name: Option<String>,
}

impl Relationship {
    fn new(kind: RelationshipType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            class_name: None,
            foreign_key: None,
            association_foreign_key: None,
            join_table: None,
            polymorphic: false,
            as_name: None,
        }
    }

    pub fn belongs_to(name: impl Into<String>) -> Self {
        Self::new(RelationshipType::BelongsTo, name)
    }

    pub fn has_one(name: impl Into<String>) -> Self {
        Self::new(RelationshipType::HasOne, name)
    }

    pub fn has_many(name: impl Into<String>) -> Self {
        Self::new(RelationshipType::HasMany, name)
    }

    pub fn habtm(name: impl Into<String>) -> Self {
        Self::new(RelationshipType::HasAndBelongsToMany, name)
    }

    /// Target type name, when it differs from the classified relationship name
    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Column on the child side that references the owner
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Column that references the target
    pub fn association_foreign_key(mut self, column: impl Into<String>) -> Self {
        self.association_foreign_key = Some(column.into());
        self
    }

    pub fn join_table(mut self, table: impl Into<String>) -> Self {
        self.join_table = Some(table.into());
        self
    }

    /// The target type is read from the `<name>_type` column
    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    /// Inverse side of a polymorphic belongs-to named `alias`
    pub fn as_alias(mut self, alias: impl Into<String>) -> Self {
        self.as_name = Some(alias.into());
        self
    }

    pub fn kind(&self) -> RelationshipType {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn explicit_foreign_key(&self) -> Option<&str> {
        self.foreign_key.as_deref()
    }

    pub fn explicit_association_foreign_key(&self) -> Option<&str> {
        self.association_foreign_key.as_deref()
    }

    pub fn explicit_join_table(&self) -> Option<&str> {
        self.join_table.as_deref()
    }

    pub fn is_polymorphic(&self) -> bool {
        self.polymorphic
    }

    pub fn as_name(&self) -> Option<&str> {
        self.as_name.as_deref()
    }

    fn invalid(&self, reason: &str) -> OrmError {
        OrmError::InvalidRelationship(format!("{} '{}': {}", self.kind, self.name, reason))
    }

    /// Check the descriptor is well formed for its kind
    pub fn validate(&self) -> OrmResult<()> {
        let identifiers = [
            Some(self.name.as_str()),
            self.foreign_key.as_deref(),
            self.association_foreign_key.as_deref(),
            self.join_table.as_deref(),
            self.as_name.as_deref(),
        ];
        for identifier in identifiers.into_iter().flatten() {
            validate_identifier(identifier).map_err(|e| self.invalid(&e.to_string()))?;
        }
        if let Some(class_name) = &self.class_name {
            if class_name.is_empty() || !class_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(self.invalid(&format!("invalid class name '{}'", class_name)));
            }
        }

        if self.polymorphic {
            if self.kind != RelationshipType::BelongsTo {
                return Err(self.invalid("only belongs_to relationships can be polymorphic"));
            }
            if self.class_name.is_some() {
                return Err(self.invalid("a polymorphic relationship cannot name its target class"));
            }
        }
        if self.as_name.is_some() && !matches!(self.kind, RelationshipType::HasOne | RelationshipType::HasMany) {
            return Err(self.invalid("only has_one and has_many relationships accept an alias"));
        }
        if self.join_table.is_some() && self.kind != RelationshipType::HasAndBelongsToMany {
            return Err(self.invalid("only has_and_belongs_to_many relationships use a join table"));
        }
        Ok(())
    }
}
