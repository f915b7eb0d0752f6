//! Tessera Aggregates
//!
//! Aggregate requests and the partial results each shard returns for them.
//! A partial carries enough state to be combined with partials from other
//! shards: AVERAGE travels as (sum, count) and is only divided once every
//! shard has reported, so unevenly sized shards are weighted correctly.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tessera_common::{Result, Row, TesseraError, Value};

// =============================================================================
// Aggregate
// =============================================================================

/// Kind of scalar aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Count,
    Any,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateKind {
    pub fn needs_field(&self) -> bool {
        !matches!(self, AggregateKind::Count | AggregateKind::Any)
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateKind::Count => "count",
            AggregateKind::Any => "any",
            AggregateKind::Sum => "sum",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Average => "average",
        };
        write!(f, "{}", name)
    }
}

/// An aggregate request: kind plus optional target field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    pub kind: AggregateKind,
    pub field: Option<String>,
}

impl Aggregate {
    pub fn count() -> Self {
        Self {
            kind: AggregateKind::Count,
            field: None,
        }
    }

    pub fn any() -> Self {
        Self {
            kind: AggregateKind::Any,
            field: None,
        }
    }

    pub fn sum(field: impl Into<String>) -> Self {
        Self::over(AggregateKind::Sum, field)
    }

    pub fn min(field: impl Into<String>) -> Self {
        Self::over(AggregateKind::Min, field)
    }

    pub fn max(field: impl Into<String>) -> Self {
        Self::over(AggregateKind::Max, field)
    }

    pub fn average(field: impl Into<String>) -> Self {
        Self::over(AggregateKind::Average, field)
    }

    fn over(kind: AggregateKind, field: impl Into<String>) -> Self {
        Self {
            kind,
            field: Some(field.into()),
        }
    }

    fn target_field(&self) -> Result<&str> {
        self.field.as_deref().ok_or_else(|| {
            TesseraError::InvalidArgument(format!("{} aggregate requires a target field", self.kind))
        })
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}({})", self.kind, field),
            None => write!(f, "{}(*)", self.kind),
        }
    }
}

// =============================================================================
// Partial Aggregate
// =============================================================================

/// One shard's contribution to an aggregate.
///
/// For COUNT and ANY `count` is the number of matching rows. For the
/// field aggregates `count` is the number of non-null target values and
/// `value` is their sum, minimum or maximum (null while `count` is zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialAggregate {
    pub kind: AggregateKind,
    pub count: u64,
    pub value: Value,
}

impl PartialAggregate {
    /// Identity element for combining.
    pub fn empty(kind: AggregateKind) -> Self {
        Self {
            kind,
            count: 0,
            value: Value::Null,
        }
    }

    /// Compute the partial over an already-filtered set of rows.
    pub fn from_rows<'a>(aggregate: &Aggregate, rows: impl IntoIterator<Item = &'a Row>) -> Result<Self> {
        let mut partial = Self::empty(aggregate.kind);
        if !aggregate.kind.needs_field() {
            partial.count = rows.into_iter().count() as u64;
            return Ok(partial);
        }

        let field = aggregate.target_field()?;
        for row in rows {
            let value = row.get(field);
            if value.is_null() {
                continue;
            }
            partial.accumulate(value)?;
        }
        Ok(partial)
    }

    fn accumulate(&mut self, value: &Value) -> Result<()> {
        match self.kind {
            AggregateKind::Sum | AggregateKind::Average => {
                if !value.is_numeric() {
                    return Err(TesseraError::TypeMismatch(format!(
                        "cannot {} {} values",
                        self.kind,
                        value.type_name()
                    )));
                }
                self.value = if self.count == 0 {
                    value.clone()
                } else {
                    self.value.try_add(value)?
                };
            }
            AggregateKind::Min => {
                if self.count == 0 || value.total_cmp(&self.value) == Ordering::Less {
                    self.value = value.clone();
                }
            }
            AggregateKind::Max => {
                if self.count == 0 || value.total_cmp(&self.value) == Ordering::Greater {
                    self.value = value.clone();
                }
            }
            AggregateKind::Count | AggregateKind::Any => {}
        }
        self.count += 1;
        Ok(())
    }

    /// Combine two partials of the same kind. Empty partials are skipped.
    pub fn combine(self, other: PartialAggregate) -> Result<Self> {
        if self.kind != other.kind {
            return Err(TesseraError::InvalidArgument(format!(
                "cannot combine {} with {}",
                self.kind, other.kind
            )));
        }
        if other.count == 0 {
            return Ok(self);
        }
        if self.count == 0 {
            return Ok(other);
        }

        let value = match self.kind {
            AggregateKind::Count | AggregateKind::Any => Value::Null,
            AggregateKind::Sum | AggregateKind::Average => self.value.try_add(&other.value)?,
            AggregateKind::Min => {
                if other.value.total_cmp(&self.value) == Ordering::Less {
                    other.value
                } else {
                    self.value
                }
            }
            AggregateKind::Max => {
                if other.value.total_cmp(&self.value) == Ordering::Greater {
                    other.value
                } else {
                    self.value
                }
            }
        };

        Ok(Self {
            kind: self.kind,
            count: self.count + other.count,
            value,
        })
    }

    /// Fold any number of partials into one.
    pub fn merge_all(kind: AggregateKind, partials: impl IntoIterator<Item = PartialAggregate>) -> Result<Self> {
        partials
            .into_iter()
            .try_fold(Self::empty(kind), |acc, partial| acc.combine(partial))
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Final SUM / MIN / MAX value, `None` when no values were seen.
    pub fn scalar(&self) -> Option<Value> {
        if self.is_empty() {
            None
        } else {
            Some(self.value.clone())
        }
    }

    /// Final AVERAGE value, `None` when no values were seen.
    pub fn average(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        self.value.as_f64().map(|sum| sum / self.count as f64)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ages(values: &[i64]) -> Vec<Row> {
        values.iter().map(|a| Row::new().with("Age", *a)).collect()
    }

    #[test]
    fn test_count_ignores_field() {
        let rows = ages(&[1, 2, 3]);
        let partial = PartialAggregate::from_rows(&Aggregate::count(), &rows).unwrap();
        assert_eq!(partial.count, 3);
    }

    #[test]
    fn test_sum_skips_nulls() {
        let mut rows = ages(&[10, 20]);
        rows.push(Row::new().with("UserName", "no-age"));
        let partial = PartialAggregate::from_rows(&Aggregate::sum("Age"), &rows).unwrap();
        assert_eq!(partial.count, 2);
        assert_eq!(partial.scalar(), Some(Value::Integer(30)));
    }

    #[test]
    fn test_sum_rejects_strings() {
        let rows = vec![Row::new().with("Age", "old")];
        let err = PartialAggregate::from_rows(&Aggregate::sum("Age"), &rows).unwrap_err();
        assert!(matches!(err, TesseraError::TypeMismatch(_)));
    }

    #[test]
    fn test_average_weights_by_count() {
        // Shard sizes 3, 0 and 5 with sums 30, 0 and 100.
        let shard_a = ages(&[5, 10, 15]);
        let shard_b: Vec<Row> = Vec::new();
        let shard_c = ages(&[10, 15, 20, 25, 30]);
        let agg = Aggregate::average("Age");
        let partials = [&shard_a, &shard_b, &shard_c]
            .iter()
            .map(|rows| PartialAggregate::from_rows(&agg, rows.iter()).unwrap())
            .collect::<Vec<_>>();
        let merged = PartialAggregate::merge_all(AggregateKind::Average, partials).unwrap();
        assert_eq!(merged.count, 8);
        assert_eq!(merged.average(), Some(16.25));
    }

    #[test]
    fn test_min_max_skip_empty_partials() {
        let agg = Aggregate::max("Age");
        let a = PartialAggregate::from_rows(&agg, &ages(&[3, 9])).unwrap();
        let b = PartialAggregate::empty(AggregateKind::Max);
        let c = PartialAggregate::from_rows(&agg, &ages(&[7])).unwrap();
        let merged = PartialAggregate::merge_all(AggregateKind::Max, vec![a, b, c]).unwrap();
        assert_eq!(merged.scalar(), Some(Value::Integer(9)));

        let agg = Aggregate::min("Age");
        let a = PartialAggregate::from_rows(&agg, &ages(&[3, 9])).unwrap();
        let c = PartialAggregate::from_rows(&agg, &ages(&[-1])).unwrap();
        let merged = a.combine(c).unwrap();
        assert_eq!(merged.scalar(), Some(Value::Integer(-1)));
    }

    #[test]
    fn test_empty_merge_has_no_value() {
        let merged = PartialAggregate::merge_all(
            AggregateKind::Min,
            vec![PartialAggregate::empty(AggregateKind::Min)],
        )
        .unwrap();
        assert!(merged.is_empty());
        assert_eq!(merged.scalar(), None);
        assert_eq!(merged.average(), None);
    }

    #[test]
    fn test_combine_kind_mismatch() {
        let err = PartialAggregate::empty(AggregateKind::Sum)
            .combine(PartialAggregate::empty(AggregateKind::Max))
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidArgument(_)));
    }

    #[test]
    fn test_field_required() {
        let agg = Aggregate {
            kind: AggregateKind::Sum,
            field: None,
        };
        assert!(PartialAggregate::from_rows(&agg, &ages(&[1])).is_err());
    }
}
