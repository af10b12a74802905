//! Storage abstraction shared by every backend, plus the backends
//! themselves.

pub mod delta;
pub mod filesystem;
pub mod kv;

use crate::error::Result;
use crate::record::CacheRecord;
use crate::Request;

/// The contract every storage backend satisfies.
///
/// `retrieve` never errors on an ordinary miss (not found, expired, or a
/// corrupt record) — those all collapse to `Ok(None)`. Only a backend
/// problem the caller must react to (I/O failure, corrupt schema version
/// the backend refuses to guess at) is an `Err`.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Prepare any per-spider namespace. Idempotent.
    async fn open(&self, spider_id: &str) -> Result<()>;

    /// Flush and release resources for a spider. Must not lose durably
    /// acknowledged writes.
    async fn close(&self, spider_id: &str) -> Result<()>;

    /// Fetch the record stored for `req`'s fingerprint, if any and not
    /// expired.
    async fn retrieve(
        &self,
        spider_id: &str,
        req: &crate::Request,
    ) -> Result<Option<CacheRecord>>;

    /// Store (overwriting any existing) record for `req`'s fingerprint.
    async fn store(
        &self,
        spider_id: &str,
        req: &crate::Request,
        record: &CacheRecord,
    ) -> Result<()>;
}

/// Expiration configuration shared across backends: `0` means records
/// never expire.
#[derive(Debug, Clone, Copy, Default)]
pub struct Expiration {
    pub expiration_secs: u64,
}

impl Expiration {
    pub fn is_expired(&self, stored_at: u64, now: u64) -> bool {
        self.expiration_secs > 0 && now.saturating_sub(stored_at) > self.expiration_secs
    }
}

pub(crate) fn fingerprint_key(req: &Request) -> Result<String> {
    crate::fingerprint::fingerprint(req, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_expiration_never_expires() {
        let e = Expiration { expiration_secs: 0 };
        assert!(!e.is_expired(0, 1_000_000));
    }

    #[test]
    fn expires_strictly_after_the_window() {
        let e = Expiration { expiration_secs: 100 };
        assert!(!e.is_expired(1_000, 1_099));
        assert!(e.is_expired(1_000, 1_101));
    }
}
