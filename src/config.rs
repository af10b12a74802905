//! Cache configuration.
//!
//! These mirror the `HTTPCACHE_*` keys a host crawler would read from its
//! own settings layer; reading the process environment is that host's job,
//! not this crate's — these are plain fields with the documented defaults.

use crate::policy::PolicyConfig;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: String,
    pub policy: PolicyKind,
    pub expiration_secs: u64,
    pub always_store: bool,
    pub ignore_http_codes: Vec<u16>,
    pub ignore_schemes: Vec<String>,
    pub ignore_response_cache_controls: Vec<String>,
    pub gzip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Dummy,
    Rfc2616,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: "httpcache".to_string(),
            policy: PolicyKind::Rfc2616,
            expiration_secs: 0,
            always_store: false,
            ignore_http_codes: Vec::new(),
            ignore_schemes: PolicyConfig::default_ignore_schemes(),
            ignore_response_cache_controls: Vec::new(),
            gzip: false,
        }
    }
}

impl CacheConfig {
    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            ignore_schemes: self.ignore_schemes.clone(),
            ignore_http_codes: self.ignore_http_codes.clone(),
        }
    }
}
