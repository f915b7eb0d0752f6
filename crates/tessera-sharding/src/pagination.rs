//! Tessera Pagination
//!
//! Page requests and page results for cross-shard paging.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::{Deserialize, Serialize};
use tessera_common::{Result, Row, TesseraError};
use tessera_query::{OrderBy, SortDirection};

// =============================================================================
// Pagination
// =============================================================================

/// A page request: one sort key plus a 1-based page window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub sort_field: String,
    pub sort_type: SortDirection,
    pub page_index: usize,
    pub page_rows: usize,
}

impl Pagination {
    pub fn new(sort_field: impl Into<String>, sort_type: SortDirection, page_index: usize, page_rows: usize) -> Self {
        Self {
            sort_field: sort_field.into(),
            sort_type,
            page_index,
            page_rows,
        }
    }

    /// Parse the sort type from its textual form ("asc" / "desc").
    pub fn parse(sort_field: impl Into<String>, sort_type: &str, page_index: usize, page_rows: usize) -> Result<Self> {
        let pagination = Self::new(sort_field, sort_type.parse()?, page_index, page_rows);
        pagination.validate()?;
        Ok(pagination)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_index < 1 {
            return Err(TesseraError::InvalidArgument(format!(
                "page index must be at least 1, got {}",
                self.page_index
            )));
        }
        if self.page_rows == 0 {
            return Err(TesseraError::InvalidArgument("page rows must be positive".to_string()));
        }
        if self.sort_field.is_empty() {
            return Err(TesseraError::InvalidArgument("sort field must not be empty".to_string()));
        }
        Ok(())
    }

    /// Rows skipped before this page.
    pub fn offset(&self) -> usize {
        (self.page_index.saturating_sub(1)).saturating_mul(self.page_rows)
    }

    pub fn ordering(&self) -> OrderBy {
        OrderBy {
            field: self.sort_field.clone(),
            direction: self.sort_type,
        }
    }
}

// =============================================================================
// Page
// =============================================================================

/// One page of a merged, globally ordered result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub rows: Vec<Row>,
    /// Matching rows across all shards, before paging.
    pub total: usize,
    pub page_index: usize,
    pub page_rows: usize,
}

impl Page {
    pub fn total_pages(&self) -> usize {
        if self.page_rows == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_rows)
    }

    pub fn has_next(&self) -> bool {
        self.page_index < self.total_pages()
    }
}

// =============================================================================
// Tests
// =============================================================================
