//! Tessera Ordering
//!
//! Ordering keys and the row comparator shared by single-shard sorting and
//! the cross-shard merge.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tessera_common::{Row, TesseraError};

// =============================================================================
// Sort Direction
// =============================================================================

/// Direction of one ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(TesseraError::InvalidArgument(format!(
                "unknown sort type '{}', expected 'asc' or 'desc'",
                other
            ))),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "asc"),
            SortDirection::Desc => write!(f, "desc"),
        }
    }
}

// =============================================================================
// Order By
// =============================================================================

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Compare two rows by a list of ordering keys, first key most significant.
pub fn compare_rows(a: &Row, b: &Row, ordering: &[OrderBy]) -> Ordering {
    for key in ordering {
        let ord = a.get(&key.field).total_cmp(b.get(&key.field));
        let ord = match key.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable in-place sort; rows with equal keys keep their input order.
pub fn sort_rows(rows: &mut [Row], ordering: &[OrderBy]) {
    if ordering.is_empty() {
        return;
    }
    rows.sort_by(|a, b| compare_rows(a, b, ordering));
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!("asc".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert_eq!("DESC".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert!("sideways".parse::<SortDirection>().is_err());
        assert_eq!(serde_json::to_string(&SortDirection::Desc).unwrap(), "\"desc\"");
    }

    #[test]
    fn test_multi_key_stable_sort() {
        let mut rows = vec![
            Row::new().with("Age", 30).with("Id", 1),
            Row::new().with("Age", 20).with("Id", 2),
            Row::new().with("Age", 30).with("Id", 3),
            Row::new().with("Age", 20).with("Id", 4),
        ];
        sort_rows(&mut rows, &[OrderBy::desc("Age")]);
        let ids: Vec<_> = rows.iter().map(|r| r.get("Id").as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 3, 2, 4]);

        sort_rows(&mut rows, &[OrderBy::asc("Age"), OrderBy::desc("Id")]);
        let ids: Vec<_> = rows.iter().map(|r| r.get("Id").as_i64().unwrap()).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }

    #[test]
    fn test_nulls_sort_first_ascending() {
        let mut rows = vec![Row::new().with("Age", 5), Row::new()];
        sort_rows(&mut rows, &[OrderBy::asc("Age")]);
        assert!(rows[0].get("Age").is_null());
    }
}
