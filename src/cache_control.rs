//! `Cache-Control` header parsing into a directive map.

use std::collections::HashMap;

/// Directive name → value. A directive given without `=value` maps to
/// `None`, distinct from a directive given as `name=` (empty string).
pub type CacheControl = HashMap<String, Option<String>>;

/// Parse a raw `Cache-Control` header value.
pub fn parse_cache_control(raw: &str) -> CacheControl {
    let mut map = CacheControl::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((name, value)) => {
                let value = value.trim().trim_matches('"');
                map.insert(name.trim().to_ascii_lowercase(), Some(value.to_string()));
            }
            None => {
                map.insert(part.to_ascii_lowercase(), None);
            }
        }
    }
    map
}

/// Parse an integer-valued directive (e.g. `max-age`, `max-stale`),
/// treating a present-but-unparseable value as absent.
pub fn parse_int_directive(cc: &CacheControl, name: &str) -> Option<i64> {
    cc.get(name)?.as_deref()?.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_header_yields_empty_map() {
        assert!(parse_cache_control("").is_empty());
    }

    #[test]
    fn distinguishes_absent_from_empty_value() {
        let cc = parse_cache_control("no-cache, max-age=");
        assert_eq!(cc.get("no-cache"), Some(&None));
        assert_eq!(cc.get("max-age"), Some(&Some(String::new())));
    }

    #[test]
    fn parses_multiple_directives_with_whitespace() {
        let cc = parse_cache_control("max-age=60,  must-revalidate , private");
        assert_eq!(parse_int_directive(&cc, "max-age"), Some(60));
        assert!(cc.contains_key("must-revalidate"));
        assert!(cc.contains_key("private"));
    }

    #[test]
    fn preserves_unknown_directives() {
        let cc = parse_cache_control("stale-while-revalidate=30");
        assert_eq!(parse_int_directive(&cc, "stale-while-revalidate"), Some(30));
    }

    #[test]
    fn unparseable_int_is_treated_as_absent() {
        let cc = parse_cache_control("max-age=notanumber");
        assert_eq!(parse_int_directive(&cc, "max-age"), None);
    }
}
