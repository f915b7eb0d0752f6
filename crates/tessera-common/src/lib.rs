//! Tessera Common - Shared Types and Utilities
//!
//! Foundational types, error handling, and configuration used across all
//! Tessera components. Provides the value model that flows between the
//! sharding query engine, the single-shard repositories and the distributed
//! transaction coordinator.
//!
//! Key Features:
//! - Unified error types with retryable error detection
//! - Dynamically typed cell values and rows
//! - Repository and transaction identifiers
//! - TOML topology configuration
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use error::{Result, TesseraError};
pub use types::*;
