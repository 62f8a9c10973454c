//! Common types and utilities shared across columndb.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and option types
//! - Error types
//! - Identifiers ([`RowId`]) and on-disk position encoding

pub mod config;
pub mod error;
pub mod position;
mod row_id;

pub use error::{Error, Result};
pub use row_id::RowId;
