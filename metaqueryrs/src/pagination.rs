//! Cursor-based pagination utilities.
//!
//! Cursors are stateless: a URL-safe base64 JSON object carrying the next row
//! offset and a hash of the list request they were issued for.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{MetaqueryError, Result};
use crate::query_builder::ListRequest;

/// Cursor for LIMIT/OFFSET pagination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Row offset of the next page.
    pub offset: u64,
    /// Query hash to validate the cursor matches the current request.
    pub query_hash: u64,
}

impl Cursor {
    pub fn new(offset: u64, query_hash: u64) -> Self {
        Self { offset, query_hash }
    }

    /// Encode cursor to a URL-safe base64 string.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self)
            .map_err(|e| MetaqueryError::Execution(format!("failed to serialize cursor: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json.as_bytes()))
    }

    /// Decode cursor from a base64 string.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| MetaqueryError::Validation(format!("invalid cursor encoding: {e}")))?;
        let json = String::from_utf8(bytes)
            .map_err(|e| MetaqueryError::Validation(format!("invalid cursor UTF-8: {e}")))?;
        serde_json::from_str(&json)
            .map_err(|e| MetaqueryError::Validation(format!("invalid cursor format: {e}")))
    }

    /// Validate that this cursor matches the given query hash.
    pub fn validate_query_hash(&self, expected_hash: u64) -> Result<()> {
        if self.query_hash != expected_hash {
            return Err(MetaqueryError::Validation(
                "cursor does not match current query - the query parameters may have changed"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Compute a hash of the list request for cursor validation.
///
/// Page size, offset and cursor are pagination controls, not part of the
/// query definition, so they are left out.
pub fn compute_query_hash(request: &ListRequest) -> u64 {
    let mut hasher = DefaultHasher::new();

    request.model_id.hash(&mut hasher);
    request.view_id.hash(&mut hasher);
    request.fields.hash(&mut hasher);

    if let Ok(filters_json) = serde_json::to_string(&request.filters) {
        filters_json.hash(&mut hasher);
    }
    if let Ok(sorts_json) = serde_json::to_string(&request.sorts) {
        sorts_json.hash(&mut hasher);
    }

    hasher.finish()
}
