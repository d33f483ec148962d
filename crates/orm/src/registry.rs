//! Entity registry
//!
//! Process-wide home of everything the persistence layer resolves by name:
//! entity types (for relationship targets and polymorphic type columns), the
//! schema cache, the connection pool and the dialect adapter chosen for it.

use crate::backends::DialectAdapter;
use crate::connection::ConnectionPool;
use crate::error::{OrmError, OrmResult};
use crate::model::EntityType;
use crate::relationships::RelationshipType;
use crate::schema::SchemaCache;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry
pub fn registry() -> &'static Registry {
    &REGISTRY
}

pub struct Registry {
    entities: DashMap<String, Arc<EntityType>>,
    schema: SchemaCache,
    pool: RwLock<Option<ConnectionPool>>,
    dialect: RwLock<Option<Arc<dyn DialectAdapter>>>,
    log_queries: AtomicBool,
}

impl Registry {
    fn new() -> Self {
        Self {
            entities: DashMap::new(),
            schema: SchemaCache::new(),
            pool: RwLock::new(None),
            dialect: RwLock::new(None),
            log_queries: AtomicBool::new(false),
        }
    }

    /// Register an entity type under its name, replacing any earlier
    /// registration. Polymorphic `as` relationships also register the type
    /// as `<Name><alias>`.
    pub fn register(&self, entity: EntityType) -> Arc<EntityType> {
        let entity = Arc::new(entity);
        for descriptor in entity.relationships() {
            if let (Some(alias), RelationshipType::HasMany | RelationshipType::HasOne) =
                (descriptor.as_name(), descriptor.kind())
            {
                self.register_alias(&format!("{}{}", entity.name(), alias), &entity);
            }
        }
        self.entities.insert(entity.name().to_string(), entity.clone());
        tracing::debug!("Registered entity type {} (table {})", entity.name(), entity.table());
        entity
    }

    pub fn register_alias(&self, alias: &str, entity: &Arc<EntityType>) {
        self.entities.insert(alias.to_string(), entity.clone());
    }

    pub fn get_class(&self, name: &str) -> OrmResult<Arc<EntityType>> {
        self.entities
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| OrmError::ClassNotRegistered(name.to_string()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Install the pool used by persistence operations outside explicit transactions.
    pub fn set_pool(&self, pool: ConnectionPool) {
        *self.dialect.write() = None;
        *self.pool.write() = Some(pool);
    }

    pub fn pool(&self) -> OrmResult<ConnectionPool> {
        self.pool.read().clone().ok_or(OrmError::PoolNotConfigured)
    }

    /// Dialect adapter for the configured pool, selected once and cached.
    pub fn dialect_adapter(&self) -> OrmResult<Arc<dyn DialectAdapter>> {
        if let Some(dialect) = self.dialect.read().as_ref() {
            return Ok(dialect.clone());
        }
        let dialect = self.pool()?.dialect();
        *self.dialect.write() = Some(dialect.clone());
        Ok(dialect)
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    pub fn set_log_queries(&self, enabled: bool) {
        self.log_queries.store(enabled, Ordering::Relaxed);
    }

    pub fn log_queries(&self) -> bool {
        self.log_queries.load(Ordering::Relaxed)
    }

    /// Forget every registration and close the current pool.
    pub fn reset(&self) {
        self.entities.clear();
        self.schema.clear();
        if let Some(pool) = self.pool.write().take() {
            pool.close();
        }
        *self.dialect.write() = None;
        self.log_queries.store(false, Ordering::Relaxed);
    }
}
