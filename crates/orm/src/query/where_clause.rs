//! WHERE clauses and their combinators
//!
//! A [`Where`] is a dialect-agnostic SQL fragment using `?` placeholders plus
//! its bound parameters. Combinators parenthesize each operand so joining
//! never changes the precedence inside either side.

use crate::backends::DatabaseValue;
use crate::error::{OrmError, OrmResult};
use crate::model::Attributes;

/// Maximum identifier length accepted by every supported dialect
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    clause: String,
    params: Vec<DatabaseValue>,
}

impl Where {
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(clause: impl Into<String>, params: Vec<DatabaseValue>) -> Self {
        Self {
            clause: clause.into(),
            params,
        }
    }

    /// Bind the next `?` placeholder
    pub fn bind(mut self, value: impl Into<DatabaseValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// `column = ?`, or `column IS NULL` for a null value
    pub fn eq(column: &str, value: impl Into<DatabaseValue>) -> OrmResult<Self> {
        validate_identifier(column)?;
        let value = value.into();
        Ok(if value.is_null() {
            Self::new(format!("{} IS NULL", column))
        } else {
            Self::with_params(format!("{} = ?", column), vec![value])
        })
    }

    /// `column IN (?, ?, ...)`; an empty list matches nothing
    pub fn in_list(column: &str, values: impl IntoIterator<Item = DatabaseValue>) -> OrmResult<Self> {
        validate_identifier(column)?;
        let params: Vec<DatabaseValue> = values.into_iter().collect();
        if params.is_empty() {
            return Ok(Self::new("1 = 0"));
        }
        let placeholders = vec!["?"; params.len()].join(", ");
        Ok(Self::with_params(format!("{} IN ({})", column, placeholders), params))
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn params(&self) -> &[DatabaseValue] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.clause.trim().is_empty()
    }

    pub fn into_parts(self) -> (String, Vec<DatabaseValue>) {
        (self.clause, self.params)
    }

    pub fn and(self, other: Where) -> Where {
        join_where(&self, &other, "AND")
    }

    pub fn or(self, other: Where) -> Where {
        join_where(&self, &other, "OR")
    }
}

/// `(a) JOINER (b)` with `a`'s parameters followed by `b`'s. An empty side
/// yields the other side unchanged.
pub fn join_where(a: &Where, b: &Where, joiner: &str) -> Where {
    if a.is_empty() {
        return b.clone();
    }
    if b.is_empty() {
        return a.clone();
    }
    let mut params = a.params.clone();
    params.extend(b.params.iter().cloned());
    Where {
        clause: format!("({}) {} ({})", a.clause, joiner.trim().to_uppercase(), b.clause),
        params,
    }
}

/// Fold [`join_where`] over a list, skipping empty clauses. No clauses give
/// an empty `Where`.
pub fn join_multiple_wheres(wheres: &[Where], joiner: &str) -> Where {
    wheres
        .iter()
        .filter(|w| !w.is_empty())
        .fold(Where::default(), |acc, w| join_where(&acc, w, joiner))
}

/// Equality clause over every attribute in insertion order, `None` for an
/// empty map.
pub fn dict_to_where(attrs: &Attributes, joiner: &str) -> OrmResult<Option<Where>> {
    let mut parts = Vec::with_capacity(attrs.len());
    for (column, value) in attrs {
        parts.push(Where::eq(column, value.clone())?);
    }
    if parts.is_empty() {
        return Ok(None);
    }
    let joiner = format!(" {} ", joiner.trim().to_uppercase());
    let clause = parts
        .iter()
        .map(|w| format!("({})", w.clause))
        .collect::<Vec<_>>()
        .join(&joiner);
    let params = parts.into_iter().flat_map(|w| w.params).collect();
    Ok(Some(Where { clause, params }))
}

/// Validate that an identifier is safe to splice into SQL
pub fn validate_identifier(identifier: &str) -> OrmResult<()> {
    if identifier.is_empty() {
        return Err(OrmError::Query("Identifier cannot be empty".to_string()));
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(OrmError::Query(format!(
            "Identifier '{}' is too long (max {} characters)",
            identifier, MAX_IDENTIFIER_LEN
        )));
    }
    let mut chars = identifier.chars();
    let first_ok = chars.next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(OrmError::Query(format!(
            "Identifier '{}' contains invalid characters",
            identifier
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_where_parenthesizes_and_orders_params() {
        let a = Where::new("x = ? OR y = ?").bind(1).bind(2);
        let b = Where::new("z = ?").bind(3);
        let joined = join_where(&a, &b, "and");
        assert_eq!(joined.clause(), "(x = ? OR y = ?) AND (z = ?)");
        assert_eq!(joined.params(), &[1.into(), 2.into(), 3.into()]);
    }

    #[test]
    fn test_join_multiple_skips_empty() {
        let wheres = vec![
            Where::new("a = ?").bind(1),
            Where::default(),
            Where::new("b = ?").bind(2),
            Where::new("c = ?").bind(3),
        ];
        let joined = join_multiple_wheres(&wheres, "OR");
        assert_eq!(joined.clause(), "((a = ?) OR (b = ?)) OR (c = ?)");
        assert_eq!(joined.params().len(), 3);
        assert!(join_multiple_wheres(&[], "AND").is_empty());
    }

    #[test]
    fn test_dict_to_where_uses_is_null() {
        let mut attrs = Attributes::new();
        attrs.insert("first_name".to_string(), "Ada".into());
        attrs.insert("last_name".to_string(), DatabaseValue::Null);
        let w = dict_to_where(&attrs, "AND").unwrap().unwrap();
        assert_eq!(w.clause(), "(first_name = ?) AND (last_name IS NULL)");
        assert_eq!(w.params(), &[DatabaseValue::from("Ada")]);
        assert!(dict_to_where(&Attributes::new(), "AND").unwrap().is_none());
    }

    #[test]
    fn test_identifiers_are_validated() {
        assert!(validate_identifier("user_id").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("name; DROP TABLE users").is_err());
        let mut attrs = Attributes::new();
        attrs.insert("bad name".to_string(), 1.into());
        assert!(dict_to_where(&attrs, "AND").is_err());
    }

    #[test]
    fn test_in_list() {
        let w = Where::in_list("id", vec![1.into(), 2.into()]).unwrap();
        assert_eq!(w.clause(), "id IN (?, ?)");
        assert_eq!(Where::in_list("id", Vec::new()).unwrap().clause(), "1 = 0");
    }
}
