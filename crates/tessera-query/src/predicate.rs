//! Tessera Predicate
//!
//! Typed predicate AST evaluated against rows. The sharding router also
//! walks this tree to prune physical tables, so predicates stay a plain
//! data structure rather than opaque closures.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tessera_common::{Row, Value};

// =============================================================================
// Predicate
// =============================================================================

/// A boolean condition over a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    NotIn { field: String, values: Vec<Value> },
    IsNull { field: String },
    IsNotNull { field: String },
    Contains { field: String, value: String },
    StartsWith { field: String, value: String },
    EndsWith { field: String, value: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::NotIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull { field: field.into() }
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::IsNotNull { field: field.into() }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::StartsWith {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::EndsWith {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Conjunction, flattening nested `And` nodes.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            }
            (left, Self::And(mut right)) => {
                right.insert(0, left);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    /// Disjunction, flattening nested `Or` nodes.
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), right) => {
                left.push(right);
                Self::Or(left)
            }
            (left, Self::Or(mut right)) => {
                right.insert(0, left);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Check if a row satisfies this predicate.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Eq { field, value } => values_equal(row.get(field), value),
            Self::Ne { field, value } => !values_equal(row.get(field), value),
            Self::Gt { field, value } => row.get(field).partial_compare(value) == Some(Ordering::Greater),
            Self::Gte { field, value } => matches!(
                row.get(field).partial_compare(value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt { field, value } => row.get(field).partial_compare(value) == Some(Ordering::Less),
            Self::Lte { field, value } => matches!(
                row.get(field).partial_compare(value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::In { field, values } => {
                let actual = row.get(field);
                values.iter().any(|v| values_equal(actual, v))
            }
            Self::NotIn { field, values } => {
                let actual = row.get(field);
                !values.iter().any(|v| values_equal(actual, v))
            }
            Self::IsNull { field } => row.get(field).is_null(),
            Self::IsNotNull { field } => !row.get(field).is_null(),
            Self::Contains { field, value } => row
                .get(field)
                .as_str()
                .map(|s| s.contains(value.as_str()))
                .unwrap_or(false),
            Self::StartsWith { field, value } => row
                .get(field)
                .as_str()
                .map(|s| s.starts_with(value.as_str()))
                .unwrap_or(false),
            Self::EndsWith { field, value } => row
                .get(field)
                .as_str()
                .map(|s| s.ends_with(value.as_str()))
                .unwrap_or(false),
            Self::And(predicates) => predicates.iter().all(|p| p.matches(row)),
            Self::Or(predicates) => predicates.iter().any(|p| p.matches(row)),
            Self::Not(predicate) => !predicate.matches(row),
        }
    }

    /// Names of all fields this predicate reads.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Eq { field, .. }
            | Self::Ne { field, .. }
            | Self::Gt { field, .. }
            | Self::Gte { field, .. }
            | Self::Lt { field, .. }
            | Self::Lte { field, .. }
            | Self::In { field, .. }
            | Self::NotIn { field, .. }
            | Self::IsNull { field }
            | Self::IsNotNull { field }
            | Self::Contains { field, .. }
            | Self::StartsWith { field, .. }
            | Self::EndsWith { field, .. } => out.push(field),
            Self::And(predicates) | Self::Or(predicates) => {
                for p in predicates {
                    p.collect_fields(out);
                }
            }
            Self::Not(predicate) => predicate.collect_fields(out),
        }
    }
}

/// Equality with numeric widening; null never equals anything.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    actual.partial_compare(expected) == Some(Ordering::Equal)
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, parts: &[Predicate], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, p) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", p)?;
            }
            write!(f, ")")
        }

        fn list(values: &[Value]) -> String {
            values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
        }

        match self {
            Self::Eq { field, value } => write!(f, "{} = {}", field, value),
            Self::Ne { field, value } => write!(f, "{} <> {}", field, value),
            Self::Gt { field, value } => write!(f, "{} > {}", field, value),
            Self::Gte { field, value } => write!(f, "{} >= {}", field, value),
            Self::Lt { field, value } => write!(f, "{} < {}", field, value),
            Self::Lte { field, value } => write!(f, "{} <= {}", field, value),
            Self::In { field, values } => write!(f, "{} IN ({})", field, list(values)),
            Self::NotIn { field, values } => write!(f, "{} NOT IN ({})", field, list(values)),
            Self::IsNull { field } => write!(f, "{} IS NULL", field),
            Self::IsNotNull { field } => write!(f, "{} IS NOT NULL", field),
            Self::Contains { field, value } => write!(f, "{} LIKE '%{}%'", field, value),
            Self::StartsWith { field, value } => write!(f, "{} LIKE '{}%'", field, value),
            Self::EndsWith { field, value } => write!(f, "{} LIKE '%{}'", field, value),
            Self::And(parts) => join(f, parts, "AND"),
            Self::Or(parts) => join(f, parts, "OR"),
            Self::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, name: &str, age: i64) -> Row {
        Row::new().with("Id", id).with("UserName", name).with("Age", age)
    }

    #[test]
    fn test_comparisons() {
        let row = user(1, "alice", 30);
        assert!(Predicate::eq("Age", 30).matches(&row));
        assert!(Predicate::eq("Age", 30.0).matches(&row));
        assert!(Predicate::gt("Age", 29).matches(&row));
        assert!(Predicate::gte("Age", 30).matches(&row));
        assert!(!Predicate::lt("Age", 30).matches(&row));
        assert!(Predicate::lte("Age", 30).matches(&row));
        assert!(Predicate::ne("Age", 31).matches(&row));
    }

    #[test]
    fn test_missing_field_semantics() {
        let row = user(1, "alice", 30);
        assert!(!Predicate::eq("Email", "x").matches(&row));
        assert!(Predicate::ne("Email", "x").matches(&row));
        assert!(!Predicate::gt("Email", 0).matches(&row));
        assert!(Predicate::is_null("Email").matches(&row));
        assert!(Predicate::not_in("Email", ["x"]).matches(&row));
    }

    #[test]
    fn test_type_mismatch_is_false() {
        let row = user(1, "alice", 30);
        assert!(!Predicate::gt("UserName", 5).matches(&row));
        assert!(!Predicate::eq("Age", "30").matches(&row));
    }

    #[test]
    fn test_string_matchers() {
        let row = user(1, "alice", 30);
        assert!(Predicate::contains("UserName", "lic").matches(&row));
        assert!(Predicate::starts_with("UserName", "al").matches(&row));
        assert!(Predicate::ends_with("UserName", "ce").matches(&row));
        assert!(!Predicate::contains("Age", "3").matches(&row));
    }

    #[test]
    fn test_combinators_flatten() {
        let p = Predicate::eq("Id", 1)
            .and(Predicate::gt("Age", 10))
            .and(Predicate::lt("Age", 50));
        match &p {
            Predicate::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
        assert!(p.matches(&user(1, "a", 20)));
        assert!(!p.matches(&user(2, "a", 20)));

        let q = Predicate::eq("Id", 1).or(Predicate::eq("Id", 2)).or(Predicate::eq("Id", 3));
        assert!(matches!(&q, Predicate::Or(parts) if parts.len() == 3));
        assert!(q.matches(&user(3, "c", 1)));
        assert!(!q.clone().not().matches(&user(3, "c", 1)));
    }

    #[test]
    fn test_in_list() {
        let p = Predicate::is_in("Id", [1, 5, 9]);
        assert!(p.matches(&user(5, "e", 1)));
        assert!(!p.matches(&user(6, "f", 1)));
    }

    #[test]
    fn test_referenced_fields() {
        let p = Predicate::eq("Id", 1)
            .and(Predicate::gt("Age", 2).or(Predicate::is_null("Age")))
            .and(Predicate::contains("UserName", "x").not());
        assert_eq!(p.referenced_fields(), vec!["Age", "Id", "UserName"]);
    }

    #[test]
    fn test_display() {
        let p = Predicate::eq("Id", 1).and(Predicate::is_in("Age", [1, 2]));
        assert_eq!(p.to_string(), "(Id = 1 AND Age IN (1, 2))");
    }
}
