//! Shared helpers for unit tests across modules. Not part of the public API.

use http::{HeaderMap, Method};
use url::Url;

use crate::{Request, Response};

pub(crate) fn req(url: &str) -> Request {
    Request {
        method: Method::GET,
        url: Url::parse(url).expect("valid test url"),
        headers: HeaderMap::new(),
        body: Vec::new(),
    }
}

pub(crate) fn resp(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Response {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
    }
    Response {
        status,
        url: Url::parse("https://ex.com/a").unwrap(),
        headers: map,
        body: body.to_vec(),
    }
}
