use super::lifecycle::{ModelHooks, NoHooks};
use crate::error::{OrmError, OrmResult};
use crate::query::validate_identifier;
use crate::relationships::inference::tableize;
use crate::relationships::resolution::{resolve, ResolvedRelationship};
use crate::relationships::{Relationship, RelationshipType};
use crate::validation::Validator;
use dashmap::DashMap;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Describes one entity type: its table, relationships, hooks and validators.
///
/// Built once and shared as `Arc<EntityType>`; register it with
/// [`registry()`](crate::registry::registry) so relationships can find it.
pub struct EntityType {
    name: String,
    table: String,
    relationships: IndexMap<String, Relationship>,
    resolved: DashMap<String, Arc<ResolvedRelationship>>,
    hooks: Arc<dyn ModelHooks>,
    validators: Vec<Arc<dyn Validator>>,
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("relationships", &self.relationships.keys().collect::<Vec<_>>())
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl EntityType {
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            name: name.into(),
            table: None,
            relationships: Vec::new(),
            hooks: Arc::new(NoHooks),
            validators: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Declared relationships in declaration order
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.get(name)
    }

    pub fn hooks(&self) -> &Arc<dyn ModelHooks> {
        &self.hooks
    }

    pub fn validators(&self) -> &[Arc<dyn Validator>] {
        &self.validators
    }

    /// Resolve a relationship on first use; later calls return the cached result.
    pub fn resolve_relationship(&self, name: &str) -> OrmResult<Arc<ResolvedRelationship>> {
        if let Some(resolved) = self.resolved.get(name) {
            return Ok(resolved.value().clone());
        }
        let descriptor = self.relationships.get(name).ok_or_else(|| {
            OrmError::InvalidRelationship(format!("{} has no relationship named '{}'", self.name, name))
        })?;
        let resolved = Arc::new(resolve(self, descriptor)?);
        tracing::debug!(
            "Resolved {} relationship {}.{} (foreign key {})",
            descriptor.kind(),
            self.name,
            name,
            resolved.foreign_key()
        );
        Ok(self.resolved.entry(name.to_string()).or_insert(resolved).value().clone())
    }

    /// Resolve `name` and check it is of the expected kind
    pub(crate) fn resolve_kind(&self, name: &str, kind: RelationshipType) -> OrmResult<Arc<ResolvedRelationship>> {
        let resolved = self.resolve_relationship(name)?;
        if resolved.kind() != kind {
            return Err(OrmError::InvalidRelationship(format!(
                "{}.{} is a {} relationship, not {}",
                self.name,
                name,
                resolved.kind(),
                kind
            )));
        }
        Ok(resolved)
    }
}

pub struct EntityTypeBuilder {
    name: String,
    table: Option<String>,
    relationships: Vec<Relationship>,
    hooks: Arc<dyn ModelHooks>,
    validators: Vec<Arc<dyn Validator>>,
}

impl EntityTypeBuilder {
    /// Table name, when it is not the tableized type name
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn hooks(mut self, hooks: impl ModelHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn build(self) -> OrmResult<EntityType> {
        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(OrmError::Configuration(format!("invalid entity type name '{}'", self.name)));
        }
        let table = self.table.unwrap_or_else(|| tableize(&self.name));
        validate_identifier(&table)?;

        let mut relationships = IndexMap::with_capacity(self.relationships.len());
        for relationship in self.relationships {
            relationship.validate()?;
            let name = relationship.name().to_string();
            if relationships.contains_key(&name) {
                return Err(OrmError::InvalidRelationship(format!(
                    "{} declares relationship '{}' more than once",
                    self.name, name
                )));
            }
            relationships.insert(name, relationship);
        }

        Ok(EntityType {
            name: self.name,
            table,
            relationships,
            resolved: DashMap::new(),
            hooks: self.hooks,
            validators: self.validators,
        })
    }
}
