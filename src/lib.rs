//! An HTTP response cache for a crawler/downloader pipeline: an RFC 2616
//! cache policy engine paired with pluggable storage, including a
//! delta-compressed backend that exploits inter-response similarity within
//! a host to shrink on-disk footprint.
//!
//! ```no_run
//! use httpcache_core::{CacheClient, Request};
//! use httpcache_core::policy::{PolicyConfig, Rfc2616Policy};
//! use httpcache_core::storage::kv::CacacheKvStorage;
//! use httpcache_core::storage::Expiration;
//!
//! # async fn run() -> httpcache_core::error::Result<()> {
//! let storage = CacacheKvStorage::new("./httpcache", Expiration { expiration_secs: 0 });
//! let policy = Rfc2616Policy::new(PolicyConfig::default());
//! let client = CacheClient::new(storage, policy);
//!
//! let mut req = Request {
//!     method: http::Method::GET,
//!     url: url::Url::parse("https://example.com/")?,
//!     headers: http::HeaderMap::new(),
//!     body: Vec::new(),
//! };
//! let _ = client.lookup("spider1", &mut req).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_debug_implementations)]

pub mod cache_control;
pub mod client;
pub mod config;
pub mod date;
pub mod error;
pub mod fingerprint;
pub mod policy;
pub mod record;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{CacheClient, Lookup};
pub use config::{CacheConfig, PolicyKind};
pub use record::CacheRecord;

/// An outbound HTTP request as the cache sees it.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: http::Method,
    pub url: url::Url,
    pub headers: http::HeaderMap,
    pub body: Vec<u8>,
}

/// An HTTP response as the cache sees it.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub url: url::Url,
    pub headers: http::HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub(crate) fn header_map(&self) -> std::collections::BTreeMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }
}
