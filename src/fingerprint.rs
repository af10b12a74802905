//! Request fingerprinting: a stable content-addressed key derived from a
//! request's method, canonical URL, body, and a caller-selected subset of
//! headers.

use sha1::{Digest, Sha1};
use url::Url;

use crate::error::Result;
use crate::Request;

/// Canonicalize a URL the way the fingerprint expects: lowercase
/// scheme/host, default port elided, fragment stripped, query left as
/// given. `url::Url` already lowercases the scheme and host and omits the
/// default port for special schemes on parse, so this only needs to strip
/// the fragment.
pub fn canonicalize_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    canonical.into()
}

/// Compute the 40-hex-character fingerprint of a request.
///
/// `header_names` selects which request headers (by name, case-insensitive)
/// participate in the hash, sorted for determinism. The default caller
/// (no names) hashes only method, URL, and body.
pub fn fingerprint(req: &Request, header_names: &[&str]) -> Result<String> {
    let canonical_url = canonicalize_url(&req.url);

    let mut hasher = Sha1::new();
    hasher.update(req.method.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_url.as_bytes());
    hasher.update(b"\0");
    hasher.update(&req.body);

    let mut names: Vec<&str> = header_names.to_vec();
    names.sort_unstable();
    for name in names {
        hasher.update(b"\0");
        hasher.update(name.to_ascii_lowercase().as_bytes());
        hasher.update(b"=");
        if let Some(value) = req.headers.get(name) {
            hasher.update(value.as_bytes());
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn req(url: &str) -> Request {
        Request {
            method: Method::GET,
            url: Url::parse(url).unwrap(),
            headers: http::HeaderMap::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn is_deterministic() -> Result<()> {
        let a = fingerprint(&req("https://example.com/x?y=1"), &[])?;
        let b = fingerprint(&req("https://example.com/x?y=1"), &[])?;
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        Ok(())
    }

    #[test]
    fn ignores_fragment_and_default_port() -> Result<()> {
        let a = fingerprint(&req("https://Example.com:443/x#frag"), &[])?;
        let b = fingerprint(&req("https://example.com/x"), &[])?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn distinguishes_different_paths() -> Result<()> {
        let a = fingerprint(&req("https://example.com/x"), &[])?;
        let b = fingerprint(&req("https://example.com/y"), &[])?;
        assert_ne!(a, b);
        Ok(())
    }
}
