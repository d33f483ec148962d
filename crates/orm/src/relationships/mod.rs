//! Relationships Module - relationship declaration, resolution and access
//!
//! Entity types declare [`Relationship`]s. On first use each is resolved
//! into concrete columns and tables by naming convention (see
//! [`inference`]) and cached. Records hand out one handle per relationship
//! kind; every handle has synchronous `*_with` operations and async
//! operations that run in the owner's pinned transaction when it has one.

pub mod belongs_to;
pub mod habtm;
pub mod has_many;
pub mod has_one;
pub mod inference;
pub mod loader;
pub mod metadata;
pub mod resolution;

pub use belongs_to::BelongsTo;
pub use habtm::Habtm;
pub use has_many::HasMany;
pub use has_one::HasOne;
pub use metadata::{Relationship, RelationshipType};
pub use resolution::ResolvedRelationship;

use crate::error::{OrmError, OrmResult};
use crate::model::Record;

impl Record {
    fn saved_owner_id(&self, relationship: &str) -> OrmResult<i64> {
        self.id().ok_or_else(|| {
            OrmError::ReferenceNotSaved(format!(
                "{} must be saved before its '{}' relationship can be used",
                self.type_name(),
                relationship
            ))
        })
    }

    /// The belongs-to relationship `name`. Unlike the other kinds it can be
    /// used on an unsaved record; `set` and `clear` save it.
    pub fn belongs_to(&mut self, name: &str) -> OrmResult<BelongsTo<'_>> {
        let rel = self.entity().resolve_kind(name, RelationshipType::BelongsTo)?;
        Ok(BelongsTo::new(self, rel))
    }

    pub fn has_one(&self, name: &str) -> OrmResult<HasOne> {
        let rel = self.entity().resolve_kind(name, RelationshipType::HasOne)?;
        Ok(HasOne::new(self.saved_owner_id(name)?, self.transaction().cloned(), rel))
    }

    pub fn has_many(&self, name: &str) -> OrmResult<HasMany> {
        let rel = self.entity().resolve_kind(name, RelationshipType::HasMany)?;
        Ok(HasMany::new(self.saved_owner_id(name)?, self.transaction().cloned(), rel))
    }

    pub fn habtm(&self, name: &str) -> OrmResult<Habtm> {
        let rel = self.entity().resolve_kind(name, RelationshipType::HasAndBelongsToMany)?;
        Ok(Habtm::new(self.saved_owner_id(name)?, self.transaction().cloned(), rel))
    }
}
