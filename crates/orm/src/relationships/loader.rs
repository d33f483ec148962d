//! Loading several relationships of a record at once

use super::metadata::RelationshipType;
use crate::error::OrmResult;
use crate::model::{route_read, Found, Record};
use crate::query::{Executor, SelectOptions};
use indexmap::IndexMap;

impl Record {
    /// Fetch the named relationships (all of them when `names` is empty),
    /// keyed by relationship name in request order. Single-valued
    /// relationships load as [`Found::One`], collections as [`Found::Many`].
    pub fn load_relations_with(&mut self, ex: &dyn Executor, names: &[&str]) -> OrmResult<IndexMap<String, Found>> {
        let entity = self.entity().clone();
        let names: Vec<String> = if names.is_empty() {
            entity.relationships().map(|r| r.name().to_string()).collect()
        } else {
            names.iter().map(|n| n.to_string()).collect()
        };

        let mut loaded = IndexMap::with_capacity(names.len());
        for name in names {
            let resolved = entity.resolve_relationship(&name)?;
            let found = match resolved.kind() {
                RelationshipType::BelongsTo => Found::One(self.belongs_to(&name)?.get_with(ex)?),
                RelationshipType::HasOne => Found::One(self.has_one(&name)?.get_with(ex)?),
                RelationshipType::HasMany => Found::Many(self.has_many(&name)?.get_with(ex, &SelectOptions::new())?),
                RelationshipType::HasAndBelongsToMany => {
                    Found::Many(self.habtm(&name)?.get_with(ex, &SelectOptions::new(), None)?)
                }
            };
            loaded.insert(name, found);
        }
        Ok(loaded)
    }

    pub async fn load_relations(&mut self, names: &[&str]) -> OrmResult<IndexMap<String, Found>> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let snapshot = self.clone();
        route_read(self.transaction.clone(), move |ex| {
            let mut record = snapshot.clone();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            record.load_relations_with(ex, &names)
        })
        .await
    }
}
