use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the cache's storage backends.
///
/// Ordinary misses (not found, expired, corrupt record) are never represented
/// here — `Storage::retrieve` folds those into `Ok(None)`. Variants in this
/// enum are the ones a backend cannot silently treat as a miss.
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    /// Error from cacache, the content-addressed disk store backing the
    /// key/value and delta backends.
    #[error(transparent)]
    #[diagnostic(code(httpcache_core::cacache))]
    CaCache(#[from] cacache::Error),

    /// Error from postcard (de)serialization of a stored record.
    #[error(transparent)]
    #[diagnostic(code(httpcache_core::postcard))]
    Postcard(#[from] postcard::Error),

    /// There was an error parsing the request URL.
    #[error(transparent)]
    #[diagnostic(code(httpcache_core::invalid_url))]
    InvalidUrl(#[from] url::ParseError),

    /// Underlying filesystem I/O error.
    #[error(transparent)]
    #[diagnostic(code(httpcache_core::io))]
    Io(#[from] std::io::Error),

    /// The record's schema version byte is not one this build understands.
    #[error("unrecognized record schema version {0}")]
    #[diagnostic(code(httpcache_core::bad_schema_version))]
    UnknownSchemaVersion(u8),

    /// A delta backend target referenced a source fingerprint that is not
    /// present in its host's source group.
    #[error("dangling delta target: source {0} not found for host")]
    #[diagnostic(code(httpcache_core::dangling_source))]
    DanglingSource(String),

    /// Storage write failed; the caller decides whether to retry.
    #[error("store failed: {0}")]
    #[diagnostic(code(httpcache_core::store_failure))]
    StoreFailure(String),
}
