//! The narrow seam a downloader composes against: [`CacheClient`] wires a
//! [`Policy`](crate::policy::Policy) and a
//! [`Storage`](crate::storage::Storage) together and drives the
//! lookup/validate/store state machine described by the middleware
//! contract. Fetching from the network remains the caller's job — this
//! type only ever reads and writes the cache.

use http::HeaderMap;
use url::Url;

use crate::error::Result;
use crate::policy::Policy;
use crate::record::CacheRecord;
use crate::storage::Storage;
use crate::{Request, Response};

/// Outcome of consulting the cache for a request.
#[derive(Debug)]
pub enum Lookup {
    /// Nothing usable is cached, or the request itself isn't cacheable.
    /// Fetch from the network and call [`CacheClient::complete`].
    Miss,
    /// A fresh cached response: serve it directly, no network round trip.
    Fresh(Response),
    /// A stale cached response; `req` has had conditional validators
    /// attached. Fetch from the network and call
    /// [`CacheClient::complete`] with the result.
    Stale(Response),
}

/// Combines a policy and a storage backend into the request/response
/// lifecycle the middleware contract describes.
#[derive(Debug)]
pub struct CacheClient<S, P> {
    storage: S,
    policy: P,
}

impl<S: Storage, P: Policy> CacheClient<S, P> {
    pub fn new(storage: S, policy: P) -> Self {
        Self { storage, policy }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Consult the cache for `req`. May attach conditional validators to
    /// `req` when returning [`Lookup::Stale`].
    pub async fn lookup(&self, spider_id: &str, req: &mut Request) -> Result<Lookup> {
        if !self.policy.should_cache_request(req) {
            return Ok(Lookup::Miss);
        }

        let Some(record) = self.storage.retrieve(spider_id, req).await? else {
            return Ok(Lookup::Miss);
        };

        let cached = record_to_response(&record)?;
        if self.policy.is_cached_response_fresh(&cached, req) {
            Ok(Lookup::Fresh(cached))
        } else {
            Ok(Lookup::Stale(cached))
        }
    }

    /// After fetching `fresh` from the network (because `lookup` returned
    /// `Miss` or `Stale`), decide whether to serve the cached response or
    /// the fresh one, and store accordingly.
    ///
    /// `cached` is the response `lookup` returned for `Stale`; pass `None`
    /// after a `Miss`.
    pub async fn complete(
        &self,
        spider_id: &str,
        req: &Request,
        cached: Option<&Response>,
        fresh: Response,
    ) -> Result<Response> {
        if let Some(cached) = cached {
            if self.policy.is_cached_response_valid(cached, &fresh, req) {
                return Ok(cached.clone());
            }
        }

        if self.policy.should_cache_response(&fresh, req) {
            let record = response_to_record(&fresh, crate::date::now());
            self.storage.store(spider_id, req, &record).await?;
        }

        Ok(fresh)
    }

    pub async fn open(&self, spider_id: &str) -> Result<()> {
        self.storage.open(spider_id).await
    }

    pub async fn close(&self, spider_id: &str) -> Result<()> {
        self.storage.close(spider_id).await
    }
}

fn record_to_response(record: &CacheRecord) -> Result<Response> {
    let mut headers = HeaderMap::new();
    for (name, value) in &record.headers {
        if let (Ok(name), Ok(value)) =
            (http::HeaderName::from_bytes(name.as_bytes()), value.parse())
        {
            headers.insert(name, value);
        }
    }
    Ok(Response {
        status: record.status,
        url: Url::parse(&record.url)?,
        headers,
        body: record.body.clone(),
    })
}

fn response_to_record(resp: &Response, stored_at: u64) -> CacheRecord {
    CacheRecord {
        status: resp.status,
        url: resp.url.to_string(),
        headers: resp.header_map(),
        body: resp.body.clone(),
        stored_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DummyPolicy, PolicyConfig};
    use crate::storage::kv::CacacheKvStorage;
    use crate::storage::Expiration;
    use crate::test_support::req;

    #[tokio::test]
    async fn miss_then_store_then_fresh_hit() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacacheKvStorage::new(
            dir.path().to_str().unwrap(),
            Expiration { expiration_secs: 0 },
        );
        let client = CacheClient::new(storage, DummyPolicy::new(PolicyConfig::default()));

        let mut request = req("https://ex.com/a");
        assert!(matches!(client.lookup("spider1", &mut request).await?, Lookup::Miss));

        let fresh = Response {
            status: 200,
            url: request.url.clone(),
            headers: HeaderMap::new(),
            body: b"hello".to_vec(),
        };
        client.complete("spider1", &request, None, fresh).await?;

        match client.lookup("spider1", &mut request).await? {
            Lookup::Fresh(resp) => assert_eq!(resp.body, b"hello"),
            other => panic!("expected a fresh hit, got {other:?}"),
        }
        Ok(())
    }
}
