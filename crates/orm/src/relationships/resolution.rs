//! Relationship resolution
//!
//! Turns a declared [`Relationship`] into the concrete column and table
//! names its queries use. Resolution happens once per entity type and
//! relationship; the result is cached on the [`EntityType`].

use super::inference::{classify, foreign_key, singularize};
use super::metadata::{Relationship, RelationshipType};
use crate::error::{OrmError, OrmResult};
use crate::model::EntityType;
use crate::registry::registry;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelationship {
    descriptor: Relationship,
    owner_name: String,
    target_name: Option<String>,
    foreign_key: String,
    association_foreign_key: String,
    type_column: Option<String>,
    join_table: Option<String>,
}

impl ResolvedRelationship {
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn kind(&self) -> RelationshipType {
        self.descriptor.kind()
    }

    pub fn descriptor(&self) -> &Relationship {
        &self.descriptor
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    /// Target type name; `None` for a polymorphic belongs-to
    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    /// The registered target type
    pub fn target(&self) -> OrmResult<Arc<EntityType>> {
        let name = self.target_name.as_deref().ok_or_else(|| {
            OrmError::InvalidRelationship(format!(
                "{}.{} is polymorphic; its target type is read from the row",
                self.owner_name,
                self.name()
            ))
        })?;
        registry().get_class(name)
    }

    /// Column on the child side (target rows, or join rows) that references the owner
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// Column that references the target: on the owner for belongs-to, on
    /// join rows for has-and-belongs-to-many
    pub fn association_foreign_key(&self) -> &str {
        &self.association_foreign_key
    }

    /// Discriminator column for polymorphic relationships
    pub fn type_column(&self) -> Option<&str> {
        self.type_column.as_deref()
    }

    pub fn join_table(&self) -> Option<&str> {
        self.join_table.as_deref()
    }

    pub fn is_polymorphic(&self) -> bool {
        self.type_column.is_some()
    }
}

pub(crate) fn resolve(owner: &EntityType, descriptor: &Relationship) -> OrmResult<ResolvedRelationship> {
    let name = descriptor.name();
    let target_name = if descriptor.is_polymorphic() {
        None
    } else {
        Some(
            descriptor
                .target_class_name()
                .map(str::to_string)
                .unwrap_or_else(|| classify(name)),
        )
    };
    let target = target_name.as_deref().map(|t| registry().get_class(t)).transpose()?;

    let (foreign_key, type_column) = match descriptor.as_name() {
        Some(alias) => (format!("{}_id", alias), Some(format!("{}_type", alias))),
        None => (
            descriptor
                .explicit_foreign_key()
                .map(str::to_string)
                .unwrap_or_else(|| foreign_key(owner.name())),
            None,
        ),
    };

    let (association_foreign_key, type_column) = if descriptor.is_polymorphic() {
        (
            descriptor
                .explicit_association_foreign_key()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_id", name)),
            Some(format!("{}_type", name)),
        )
    } else {
        (
            descriptor
                .explicit_association_foreign_key()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_id", singularize(name))),
            type_column,
        )
    };

    let join_table = match (descriptor.kind(), &target) {
        (RelationshipType::HasAndBelongsToMany, Some(target)) => Some(
            descriptor
                .explicit_join_table()
                .map(str::to_string)
                .unwrap_or_else(|| {
                    let mut tables = [owner.table(), target.table()];
                    tables.sort_unstable();
                    tables.join("_")
                }),
        ),
        _ => None,
    };

    Ok(ResolvedRelationship {
        descriptor: descriptor.clone(),
        owner_name: owner.name().to_string(),
        target_name,
        foreign_key,
        association_foreign_key,
        type_column,
        join_table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn setup() {
        registry().reset();
        for name in ["User", "Picture", "FavoriteColor", "Student", "Teacher"] {
            registry().register(EntityType::builder(name).build().unwrap());
        }
    }

    #[test]
    #[serial]
    fn test_conventional_keys() {
        setup();
        let user = EntityType::builder("User").build().unwrap();

        let pictures = resolve(&user, &Relationship::has_many("pictures")).unwrap();
        assert_eq!(pictures.target_name(), Some("Picture"));
        assert_eq!(pictures.foreign_key(), "user_id");
        assert!(!pictures.is_polymorphic());

        let color = resolve(&user, &Relationship::belongs_to("favorite_color")).unwrap();
        assert_eq!(color.target_name(), Some("FavoriteColor"));
        assert_eq!(color.association_foreign_key(), "favorite_color_id");

        let custom = resolve(
            &user,
            &Relationship::belongs_to("avatar").class_name("Picture").association_foreign_key("pic_id"),
        )
        .unwrap();
        assert_eq!(custom.target().unwrap().name(), "Picture");
        assert_eq!(custom.association_foreign_key(), "pic_id");
        registry().reset();
    }

    #[test]
    #[serial]
    fn test_polymorphic_keys() {
        setup();
        let picture = EntityType::builder("Picture").build().unwrap();
        let imageable = resolve(&picture, &Relationship::belongs_to("imageable").polymorphic()).unwrap();
        assert_eq!(imageable.target_name(), None);
        assert_eq!(imageable.association_foreign_key(), "imageable_id");
        assert_eq!(imageable.type_column(), Some("imageable_type"));
        assert!(imageable.target().is_err());

        let user = EntityType::builder("User").build().unwrap();
        let pictures = resolve(&user, &Relationship::has_many("pictures").as_alias("imageable")).unwrap();
        assert_eq!(pictures.foreign_key(), "imageable_id");
        assert_eq!(pictures.type_column(), Some("imageable_type"));
        registry().reset();
    }

    #[test]
    #[serial]
    fn test_join_table_sorted() {
        setup();
        let teacher = EntityType::builder("Teacher").build().unwrap();
        let students = resolve(&teacher, &Relationship::habtm("students")).unwrap();
        assert_eq!(students.join_table(), Some("students_teachers"));
        assert_eq!(students.foreign_key(), "teacher_id");
        assert_eq!(students.association_foreign_key(), "student_id");

        let explicit = resolve(&teacher, &Relationship::habtm("students").join_table("classes")).unwrap();
        assert_eq!(explicit.join_table(), Some("classes"));
        registry().reset();
    }

    #[test]
    #[serial]
    fn test_unregistered_target() {
        setup();
        let user = EntityType::builder("User").build().unwrap();
        assert!(matches!(
            resolve(&user, &Relationship::has_one("avatar")),
            Err(OrmError::ClassNotRegistered(name)) if name == "Avatar"
        ));
        registry().reset();
    }
}
