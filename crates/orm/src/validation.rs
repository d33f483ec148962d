//! Record validation
//!
//! Validators run before every save. They add messages to the record's
//! [`Errors`]; a record with errors is not written. Validation failures are
//! not [`OrmError`](crate::error::OrmError)s.

use crate::backends::DatabaseValue;
use crate::error::OrmResult;
use crate::model::Record;
use crate::query::{execution, validate_identifier, Executor, Where};
use crate::relationships::inference::humanize;
use indexmap::IndexMap;
use std::fmt;
use std::ops::RangeInclusive;

/// Validation messages keyed by attribute name, in the order they were added
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Errors {
    messages: IndexMap<String, Vec<String>>,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` for `attribute`, prefixed with the humanized
    /// attribute name. Duplicate messages are kept once.
    pub fn add(&mut self, attribute: &str, message: &str) {
        let full = format!("{} {}", humanize(attribute), message);
        let list = self.messages.entry(attribute.to_string()).or_default();
        if !list.contains(&full) {
            list.push(full);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    pub fn errors_for(&self, attribute: &str) -> &[String] {
        self.messages.get(attribute).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.messages.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("No errors.");
        }
        let all: Vec<&str> = self.messages.values().flatten().map(String::as_str).collect();
        f.write_str(&all.join("  "))
    }
}

/// A check run against a record before it is saved
pub trait Validator: Send + Sync {
    fn validate(&self, record: &Record, errors: &mut Errors, ex: &dyn Executor) -> OrmResult<()>;
}

fn names(attributes: &[&str]) -> Vec<String> {
    attributes.iter().map(|s| s.to_string()).collect()
}

/// Attributes must be set and non-empty
pub struct PresenceOf {
    attributes: Vec<String>,
    message: String,
}

impl PresenceOf {
    pub fn new(attributes: &[&str]) -> Self {
        Self {
            attributes: names(attributes),
            message: "cannot be blank.".to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl Validator for PresenceOf {
    fn validate(&self, record: &Record, errors: &mut Errors, _ex: &dyn Executor) -> OrmResult<()> {
        for attribute in &self.attributes {
            let blank = match record.get(attribute) {
                None | Some(DatabaseValue::Null) => true,
                Some(DatabaseValue::String(s)) => s.is_empty(),
                Some(_) => false,
            };
            if blank {
                errors.add(attribute, &self.message);
            }
        }
        Ok(())
    }
}

/// Attribute length must be exact or fall in an inclusive range. Missing
/// values fail.
pub struct LengthOf {
    attributes: Vec<String>,
    range: RangeInclusive<usize>,
    message: String,
}

impl LengthOf {
    pub fn exactly(attributes: &[&str], length: usize) -> Self {
        Self::between(attributes, length..=length)
    }

    pub fn between(attributes: &[&str], range: RangeInclusive<usize>) -> Self {
        let message = if range.start() == range.end() {
            format!("must have a length of {}.", range.start())
        } else {
            format!("must have a length between {} and {} (inclusive).", range.start(), range.end())
        };
        Self {
            attributes: names(attributes),
            range,
            message,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl Validator for LengthOf {
    fn validate(&self, record: &Record, errors: &mut Errors, _ex: &dyn Executor) -> OrmResult<()> {
        for attribute in &self.attributes {
            let length = match record.get(attribute) {
                Some(DatabaseValue::String(s)) => Some(s.chars().count()),
                Some(DatabaseValue::Bytes(b)) => Some(b.len()),
                Some(DatabaseValue::Null) | None => None,
                Some(other) => Some(other.to_string().len()),
            };
            if !length.map_or(false, |len| self.range.contains(&len)) {
                errors.add(attribute, &self.message);
            }
        }
        Ok(())
    }
}

/// No other row of the table may share the attribute's value
pub struct UniquenessOf {
    attributes: Vec<String>,
    message: String,
}

impl UniquenessOf {
    pub fn new(attributes: &[&str]) -> Self {
        Self {
            attributes: names(attributes),
            message: "is not unique.".to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl Validator for UniquenessOf {
    fn validate(&self, record: &Record, errors: &mut Errors, ex: &dyn Executor) -> OrmResult<()> {
        for attribute in &self.attributes {
            validate_identifier(attribute)?;
            let value = record.get(attribute).cloned().unwrap_or(DatabaseValue::Null);
            let mut filter = Where::eq(attribute, value)?;
            if let Some(id) = record.id() {
                filter = filter.and(Where::new("id <> ?").bind(id));
            }
            if execution::count(ex, record.entity().table(), Some(&filter))? > 0 {
                errors.add(attribute, &self.message);
            }
        }
        Ok(())
    }
}

/// Wraps a closure as a validator
pub struct CustomValidator<F> {
    check: F,
}

impl<F> CustomValidator<F>
where
    F: Fn(&Record, &mut Errors, &dyn Executor) -> OrmResult<()> + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

impl<F> Validator for CustomValidator<F>
where
    F: Fn(&Record, &mut Errors, &dyn Executor) -> OrmResult<()> + Send + Sync,
{
    fn validate(&self, record: &Record, errors: &mut Errors, ex: &dyn Executor) -> OrmResult<()> {
        (self.check)(record, errors, ex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DialectAdapter, ResultSet, SqliteDialect};
    use crate::model::EntityType;
    use std::sync::Arc;

    struct NoDatabase;

    impl Executor for NoDatabase {
        fn dialect(&self) -> &dyn DialectAdapter {
            static DIALECT: SqliteDialect = SqliteDialect::with_savepoints(false);
            &DIALECT
        }

        fn fetch_all(&self, _sql: &str, _params: &[DatabaseValue]) -> OrmResult<ResultSet> {
            Ok(ResultSet::new(vec!["count(*)".into()], vec![vec![DatabaseValue::Int64(0)]]))
        }

        fn execute(&self, _sql: &str, _params: &[DatabaseValue]) -> OrmResult<u64> {
            Ok(0)
        }
    }

    fn user() -> Record {
        Record::new(&Arc::new(EntityType::builder("User").build().unwrap()))
    }

    #[test]
    fn test_errors_prefix_and_dedup() {
        let mut errors = Errors::new();
        assert!(errors.is_empty());
        assert_eq!(errors.to_string(), "No errors.");
        errors.add("first_name", "cannot be blank.");
        errors.add("first_name", "cannot be blank.");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.errors_for("first_name"), &["First name cannot be blank.".to_string()]);
        assert!(errors.errors_for("age").is_empty());
    }

    #[test]
    fn test_presence_of() {
        let mut record = user();
        record.set("last_name", "");
        let mut errors = Errors::new();
        PresenceOf::new(&["first_name", "last_name"]).validate(&record, &mut errors, &NoDatabase).unwrap();
        assert_eq!(errors.len(), 2);

        record.set("first_name", "Ada");
        record.set("last_name", "Lovelace");
        let mut errors = Errors::new();
        PresenceOf::new(&["first_name", "last_name"]).validate(&record, &mut errors, &NoDatabase).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn test_length_of_messages() {
        let mut record = user();
        record.set("code", "abcd");
        let mut errors = Errors::new();
        LengthOf::exactly(&["code"], 3).validate(&record, &mut errors, &NoDatabase).unwrap();
        assert_eq!(errors.errors_for("code"), &["Code must have a length of 3.".to_string()]);

        let mut errors = Errors::new();
        LengthOf::between(&["code", "missing"], 2..=4).validate(&record, &mut errors, &NoDatabase).unwrap();
        assert!(errors.errors_for("code").is_empty());
        assert_eq!(
            errors.errors_for("missing"),
            &["Missing must have a length between 2 and 4 (inclusive).".to_string()]
        );
    }

    #[test]
    fn test_custom_validator() {
        let record = user();
        let mut errors = Errors::new();
        let validator = CustomValidator::new(|_record: &Record, errors: &mut Errors, _ex: &dyn Executor| {
            errors.add("age", "must be positive.");
            Ok(())
        });
        validator.validate(&record, &mut errors, &NoDatabase).unwrap();
        assert_eq!(errors.to_string(), "Age must be positive.");
    }

    #[test]
    fn test_uniqueness_of_with_free_value() {
        let mut record = user();
        record.set("email", "a@b.c");
        let mut errors = Errors::new();
        UniquenessOf::new(&["email"]).validate(&record, &mut errors, &NoDatabase).unwrap();
        assert!(errors.is_empty());
    }
}
