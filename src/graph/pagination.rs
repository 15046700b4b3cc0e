//! Edge pagination
//!
//! Turns the raw `count` query parameter into a page size and assembles the
//! page envelope returned by edge listings and multi-id fetches.

use crate::core::error::{GraphError, Result};
use crate::core::types::Fields;
use crate::schema::PaginationConfig;
use crate::storage::PageCursors;
use serde::Serialize;

/// One page of objects
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// Objects on this page
    pub results: Vec<Fields>,
    /// Total size of the listing (or of the fetch for multi-id reads)
    pub count: u64,
    /// Cursor resuming after the first element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    /// Cursor resuming after the last element; only on full pages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

/// Resolve the requested page size.
///
/// Absent means the configured default. Anything that is not a whole number
/// in `0..=max_count` is rejected.
pub fn parse_count(raw: Option<&str>, pagination: &PaginationConfig) -> Result<usize> {
    let Some(raw) = raw else {
        return Ok(pagination.default_count);
    };
    let invalid = || GraphError::IncorrectCountParameter {
        max: pagination.max_count,
    };

    let count: f64 = raw.trim().parse().map_err(|_| invalid())?;
    if !count.is_finite() || count.fract() != 0.0 || count < 0.0 || count > pagination.max_count as f64 {
        return Err(invalid());
    }
    Ok(count as usize)
}

impl Page {
    /// Page of an edge listing.
    ///
    /// `requested` is the page size asked for and `listed` the number of edges
    /// the storage returned; `last` is only set when the page came back full.
    pub fn from_listing(results: Vec<Fields>, total: u64, cursors: PageCursors, requested: usize, listed: usize) -> Self {
        let full = listed == requested;
        Self {
            results,
            count: total,
            first: cursors.first,
            last: if full { cursors.last } else { None },
        }
    }

    /// Envelope for a multi-id fetch
    pub fn from_objects(results: Vec<Fields>, cursors: PageCursors) -> Self {
        Self {
            count: results.len() as u64,
            results,
            first: cursors.first,
            last: None,
        }
    }
}
