//! RFC 1123 date parsing/formatting to and from epoch seconds, via
//! [`httpdate`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parse an RFC 1123 (or the other formats `httpdate` tolerates) date
/// header value into epoch seconds. Returns `None` on a malformed value
/// instead of erroring — callers treat unparseable dates the same as an
/// absent header.
pub fn parse_http_date(value: &str) -> Option<u64> {
    let time = httpdate::parse_http_date(value.trim()).ok()?;
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// Format epoch seconds as an RFC 1123 date string.
pub fn format_http_date(epoch_secs: u64) -> String {
    let time = UNIX_EPOCH + Duration::from_secs(epoch_secs);
    httpdate::fmt_http_date(time)
}

/// Current wall-clock time as epoch seconds.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let t = 1_700_000_000;
        let formatted = format_http_date(t);
        assert_eq!(parse_http_date(&formatted), Some(t));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_http_date("not a date"), None);
    }
}
