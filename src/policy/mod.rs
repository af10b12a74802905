//! Cache policy: cacheability, freshness, and validation decisions.
//!
//! Two implementations are provided: [`DummyPolicy`], a permissive policy
//! for offline replay, and [`Rfc2616Policy`], a faithful implementation of
//! the RFC 2616 §13 private-cache freshness and validation model.

mod dummy;
mod rfc2616;

pub use dummy::DummyPolicy;
pub use rfc2616::Rfc2616Policy;

use crate::{Request, Response};

/// The contract every cache policy satisfies.
///
/// Implementations never fail: a malformed header is treated as if it were
/// absent, matching the source system's tolerance for garbage input from
/// the open web.
pub trait Policy: Send + Sync {
    /// Should this request consult (and potentially populate) the cache at
    /// all?
    fn should_cache_request(&self, req: &Request) -> bool;

    /// Is this response, paired with the request that produced it, worth
    /// storing?
    fn should_cache_response(&self, resp: &Response, req: &Request) -> bool;

    /// Is a previously stored response still fresh enough to serve without
    /// revalidation? May attach conditional validators (`If-Modified-Since`,
    /// `If-None-Match`) to `req` when it returns `false`, so the caller's
    /// subsequent network fetch can revalidate cheaply.
    fn is_cached_response_fresh(&self, cached: &Response, req: &mut Request) -> bool;

    /// After a revalidation fetch, should the cached response still be
    /// served in place of the freshly fetched one?
    fn is_cached_response_valid(
        &self,
        cached: &Response,
        fresh: &Response,
        req: &Request,
    ) -> bool;
}

/// Configuration shared by every policy.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// URL schemes that are never cached. Defaults to `{"file"}` via
    /// [`PolicyConfig::default_ignore_schemes`].
    pub ignore_schemes: Vec<String>,
    /// Status codes that are never cached.
    pub ignore_http_codes: Vec<u16>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            ignore_schemes: Self::default_ignore_schemes(),
            ignore_http_codes: Vec::new(),
        }
    }
}

impl PolicyConfig {
    pub fn default_ignore_schemes() -> Vec<String> {
        vec!["file".to_string()]
    }

    pub(crate) fn scheme_ignored(&self, req: &Request) -> bool {
        self.ignore_schemes.iter().any(|s| s == req.url.scheme())
    }

    pub(crate) fn status_ignored(&self, status: u16) -> bool {
        self.ignore_http_codes.contains(&status)
    }
}

pub(crate) fn attach_conditional_validators(cached: &Response, req: &mut Request) {
    if let Some(last_modified) = cached.headers.get("last-modified") {
        req.headers.insert(
            http::header::IF_MODIFIED_SINCE,
            last_modified.clone(),
        );
    }
    if let Some(etag) = cached.headers.get("etag") {
        req.headers.insert(http::header::IF_NONE_MATCH, etag.clone());
    }
}
