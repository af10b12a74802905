use super::{attach_conditional_validators, Policy, PolicyConfig};
use crate::cache_control::{parse_cache_control, parse_int_directive, CacheControl};
use crate::date::{now, parse_http_date};
use crate::{Request, Response};

/// One year in seconds, used as the heuristic freshness lifetime for
/// permanent redirects lacking explicit freshness information.
const MAXAGE: i64 = 3600 * 24 * 365;

/// A faithful RFC 2616 §13/§14 private-cache policy: freshness lifetime,
/// current age, conditional revalidation, and stale-on-error tolerance.
///
/// This deliberately implements the *private*-cache simplification (a
/// Date-based apparent age, without the request-time/response-time
/// correction RFC 2616 §13.2.3 prescribes for shared caches) on the
/// assumption that request/response round-trip is negligible against the
/// content TTLs a crawler cares about.
#[derive(Debug, Clone, Default)]
pub struct Rfc2616Policy {
    config: PolicyConfig,
    /// Store a response regardless of what its cache-control/headers say,
    /// as long as it isn't `no-store`'d.
    pub always_store: bool,
    /// Response cache-control directives stripped before evaluation, to
    /// work around origins that send incorrect or overly strict directives.
    pub ignore_response_cache_controls: Vec<String>,
}

impl Rfc2616Policy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config, always_store: false, ignore_response_cache_controls: Vec::new() }
    }

    fn response_cache_control(&self, resp: &Response) -> CacheControl {
        let mut cc = resp
            .headers
            .get(http::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(parse_cache_control)
            .unwrap_or_default();
        for directive in &self.ignore_response_cache_controls {
            cc.remove(directive.as_str());
        }
        cc
    }

    fn request_cache_control(&self, req: &Request) -> CacheControl {
        req.headers
            .get(http::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(parse_cache_control)
            .unwrap_or_default()
    }

    fn header_date(resp: &Response, name: &str) -> Option<i64> {
        resp.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
            .map(|s| s as i64)
    }

    /// RFC 2616 §13.2.3/§13.2.4, simplified for a private cache (no
    /// request/response-time correction).
    pub fn compute_freshness_lifetime(&self, resp: &Response, now: i64) -> i64 {
        let cc = self.response_cache_control(resp);
        if let Some(max_age) = parse_int_directive(&cc, "max-age") {
            return max_age.max(0);
        }

        let date = Self::header_date(resp, "date").unwrap_or(now);

        if let Some(expires) = resp.headers.get(http::header::EXPIRES) {
            return match expires.to_str().ok().and_then(parse_http_date) {
                Some(exp) => (exp as i64 - date).max(0),
                None => 0,
            };
        }

        if let Some(last_modified) = Self::header_date(resp, "last-modified") {
            if last_modified <= date {
                return (date - last_modified) / 10;
            }
        }

        if matches!(resp.status, 300 | 301 | 308) {
            return MAXAGE;
        }

        0
    }

    /// RFC 2616 §13.2.3, simplified for a private cache.
    pub fn compute_current_age(&self, resp: &Response, now: i64) -> i64 {
        let date = Self::header_date(resp, "date").unwrap_or(now);
        let mut age = (now - date).max(0);
        if let Some(header_age) = resp
            .headers
            .get("age")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
        {
            age = age.max(header_age);
        }
        age
    }
}

impl Policy for Rfc2616Policy {
    fn should_cache_request(&self, req: &Request) -> bool {
        if self.config.scheme_ignored(req) {
            return false;
        }
        let cc = self.request_cache_control(req);
        !cc.contains_key("no-store")
    }

    fn should_cache_response(&self, resp: &Response, _req: &Request) -> bool {
        let cc = self.response_cache_control(resp);
        if cc.contains_key("no-store") || resp.status == 304 {
            return false;
        }
        if self.always_store {
            return true;
        }
        if cc.contains_key("max-age") || resp.headers.contains_key(http::header::EXPIRES) {
            return true;
        }
        if matches!(resp.status, 300 | 301 | 308) {
            return true;
        }
        if matches!(resp.status, 200 | 203 | 401) {
            return resp.headers.contains_key("last-modified")
                || resp.headers.contains_key("etag");
        }
        false
    }

    fn is_cached_response_fresh(&self, cached: &Response, req: &mut Request) -> bool {
        let cached_cc = self.response_cache_control(cached);
        let request_cc = self.request_cache_control(req);
        if cached_cc.contains_key("no-cache") || request_cc.contains_key("no-cache") {
            return false;
        }

        let now = now() as i64;
        let mut freshness_lifetime = self.compute_freshness_lifetime(cached, now);
        let current_age = self.compute_current_age(cached, now);

        if let Some(req_max_age) = parse_int_directive(&request_cc, "max-age") {
            freshness_lifetime = freshness_lifetime.min(req_max_age.max(0));
        }

        if current_age < freshness_lifetime {
            return true;
        }

        if request_cc.contains_key("max-stale") && !cached_cc.contains_key("must-revalidate") {
            match request_cc.get("max-stale").and_then(|v| v.as_deref()) {
                None => return true,
                Some(raw) => {
                    if let Ok(max_stale) = raw.parse::<i64>() {
                        if current_age < freshness_lifetime + max_stale.max(0) {
                            return true;
                        }
                    }
                }
            }
        }

        attach_conditional_validators(cached, req);
        false
    }

    fn is_cached_response_valid(
        &self,
        cached: &Response,
        fresh: &Response,
        _req: &Request,
    ) -> bool {
        if fresh.status == 304 {
            return true;
        }
        if fresh.status >= 500 {
            let cached_cc = self.response_cache_control(cached);
            return !cached_cc.contains_key("must-revalidate");
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{req, resp};

    fn policy() -> Rfc2616Policy {
        Rfc2616Policy::new(PolicyConfig::default())
    }

    #[test]
    fn s2_max_age_fresh_then_stale() {
        let p = policy();
        let response = resp(200, &[("date", "Mon, 01 Jan 2024 00:00:00 GMT"), ("cache-control", "max-age=60")], b"x");
        let base = httpdate::parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
        let base_epoch =
            base.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64;

        assert!(p.compute_current_age(&response, base_epoch + 30) < p.compute_freshness_lifetime(&response, base_epoch + 30));
        assert!(p.compute_current_age(&response, base_epoch + 120) >= p.compute_freshness_lifetime(&response, base_epoch + 120));
    }

    #[test]
    fn s3_must_revalidate_blocks_stale_on_error() {
        let p = policy();
        let cached = resp(200, &[("cache-control", "max-age=60")], b"x");
        let cached_must_revalidate =
            resp(200, &[("cache-control", "max-age=60, must-revalidate")], b"x");
        let fresh_error = resp(503, &[], b"");
        let request = req("https://ex.com/a");

        assert!(p.is_cached_response_valid(&cached, &fresh_error, &request));
        assert!(!p.is_cached_response_valid(&cached_must_revalidate, &fresh_error, &request));
    }

    #[test]
    fn s4_304_is_always_valid() {
        let p = policy();
        let cached = resp(200, &[("cache-control", "must-revalidate")], b"x");
        let fresh = resp(304, &[], b"");
        let request = req("https://ex.com/a");
        assert!(p.is_cached_response_valid(&cached, &fresh, &request));
    }

    #[test]
    fn s6_heuristic_freshness_from_last_modified() {
        let p = policy();
        let response = resp(
            200,
            &[
                ("date", "Mon, 01 Jan 2024 00:16:40 GMT"),
                ("last-modified", "Mon, 01 Jan 2024 00:00:00 GMT"),
                ("etag", "\"abc\""),
            ],
            b"x",
        );
        let request = req("https://ex.com/a");
        assert!(p.should_cache_response(&response, &request));
        let date = Rfc2616Policy::header_date(&response, "date").unwrap();
        assert_eq!(p.compute_freshness_lifetime(&response, date), 100);
    }

    #[test]
    fn should_cache_response_accepts_valueless_max_age() {
        let p = policy();
        let response = resp(200, &[("cache-control", "max-age")], b"x");
        let request = req("https://ex.com/a");
        assert!(p.should_cache_response(&response, &request));
    }

    #[test]
    fn should_cache_request_rejects_no_store() {
        let p = policy();
        let mut request = req("https://ex.com/a");
        request
            .headers
            .insert(http::header::CACHE_CONTROL, "no-store".parse().unwrap());
        assert!(!p.should_cache_request(&request));
    }
}
