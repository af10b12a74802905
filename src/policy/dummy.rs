use super::{Policy, PolicyConfig};
use crate::{Request, Response};

/// A permissive policy: caches everything not explicitly excluded by
/// scheme or status code, and never revalidates. Intended for offline
/// replay of a previously warmed cache.
#[derive(Debug, Clone, Default)]
pub struct DummyPolicy {
    config: PolicyConfig,
}

impl DummyPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }
}

impl Policy for DummyPolicy {
    fn should_cache_request(&self, req: &Request) -> bool {
        !self.config.scheme_ignored(req)
    }

    fn should_cache_response(&self, resp: &Response, _req: &Request) -> bool {
        !self.config.status_ignored(resp.status)
    }

    fn is_cached_response_fresh(&self, _cached: &Response, _req: &mut Request) -> bool {
        true
    }

    fn is_cached_response_valid(
        &self,
        _cached: &Response,
        _fresh: &Response,
        _req: &Request,
    ) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{req, resp};

    #[test]
    fn s1_dummy_hit() {
        let policy = DummyPolicy::default();
        let request = req("https://ex.com/a");
        let response = resp(200, &[], b"hello");
        assert!(policy.should_cache_request(&request));
        assert!(policy.should_cache_response(&response, &request));
        let mut revalidation = req("https://ex.com/a");
        assert!(policy.is_cached_response_fresh(&response, &mut revalidation));
        assert!(policy.is_cached_response_valid(&response, &response, &request));
    }

    #[test]
    fn ignores_configured_scheme() {
        let mut config = PolicyConfig::default();
        config.ignore_schemes = vec!["file".to_string()];
        let policy = DummyPolicy::new(config);
        let request = req("file:///etc/passwd");
        assert!(!policy.should_cache_request(&request));
    }
}
