//! Wire format for cache records.
//!
//! Every record written by a backend is prefixed with a single schema
//! version byte ahead of the `postcard`-encoded payload. Readers reject a
//! version they don't recognize instead of guessing at the layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Current schema version written by this crate.
pub const SCHEMA_VERSION: u8 = 1;

/// A stored response, independent of the request that produced it.
///
/// Headers are kept as a sorted name/value list rather than `http::HeaderMap`
/// so the record has a stable, dependency-free serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub status: u16,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// Epoch seconds at which this record was stored.
    pub stored_at: u64,
}

impl CacheRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Encode with the schema-version prefix.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![SCHEMA_VERSION];
        out.extend(postcard::to_allocvec(self)?);
        Ok(out)
    }

    /// Decode a version-prefixed record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (version, rest) = bytes
            .split_first()
            .ok_or(CacheError::UnknownSchemaVersion(0))?;
        if *version != SCHEMA_VERSION {
            return Err(CacheError::UnknownSchemaVersion(*version));
        }
        Ok(postcard::from_bytes(rest)?)
    }
}
