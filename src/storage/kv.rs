//! Embedded key/value backend over [`cacache`], the content-addressed disk
//! store already used by the teacher's `manager-cacache` feature.
//!
//! Each logical record occupies two `cacache` keys so expiration can be
//! checked cheaply without reading (and decoding) the full body:
//! `"{spider}/{fp}|_data"` holds the encoded [`CacheRecord`], and
//! `"{spider}/{fp}|_time"` holds just its `stored_at` timestamp.

use log::{debug, warn};

use crate::error::Result;
use crate::record::CacheRecord;
use crate::storage::{fingerprint_key, Expiration, Storage};
use crate::Request;

#[derive(Debug, Clone)]
pub struct CacacheKvStorage {
    pub path: String,
    pub expiration: Expiration,
}

impl CacacheKvStorage {
    pub fn new(path: impl Into<String>, expiration: Expiration) -> Self {
        Self { path: path.into(), expiration }
    }

    fn data_key(spider_id: &str, fp: &str) -> String {
        format!("{spider_id}/{fp}|_data")
    }

    fn time_key(spider_id: &str, fp: &str) -> String {
        format!("{spider_id}/{fp}|_time")
    }

    pub(crate) async fn read_stored_at(&self, spider_id: &str, fp: &str) -> Option<u64> {
        let bytes = cacache::read(&self.path, Self::time_key(spider_id, fp)).await.ok()?;
        std::str::from_utf8(&bytes).ok()?.parse().ok()
    }

    /// Read the verbatim record for `fp`, applying expiration. Used
    /// directly by the delta backend, which keys sources and targets by
    /// fingerprint rather than by request.
    pub(crate) async fn read_record(
        &self,
        spider_id: &str,
        fp: &str,
        now: u64,
    ) -> Result<Option<CacheRecord>> {
        let Some(stored_at) = self.read_stored_at(spider_id, fp).await else {
            return Ok(None);
        };
        if self.expiration.is_expired(stored_at, now) {
            debug!("httpcache: {fp} expired for spider {spider_id}");
            return Ok(None);
        }
        match cacache::read(&self.path, Self::data_key(spider_id, fp)).await {
            Ok(bytes) => match CacheRecord::decode(&bytes) {
                Ok(record) => Ok(Some(record)),
                Err(err) => {
                    warn!("httpcache: corrupt record for {fp}: {err}");
                    Ok(None)
                }
            },
            Err(_) => Ok(None),
        }
    }

    pub(crate) async fn write_record(
        &self,
        spider_id: &str,
        fp: &str,
        record: &CacheRecord,
    ) -> Result<()> {
        let bytes = record.encode()?;
        cacache::write(&self.path, Self::data_key(spider_id, fp), bytes).await?;
        cacache::write(
            &self.path,
            Self::time_key(spider_id, fp),
            record.stored_at.to_string(),
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for CacacheKvStorage {
    async fn open(&self, _spider_id: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self, _spider_id: &str) -> Result<()> {
        Ok(())
    }

    async fn retrieve(
        &self,
        spider_id: &str,
        req: &Request,
    ) -> Result<Option<CacheRecord>> {
        let fp = fingerprint_key(req)?;
        self.read_record(spider_id, &fp, crate::date::now()).await
    }

    async fn store(
        &self,
        spider_id: &str,
        req: &Request,
        record: &CacheRecord,
    ) -> Result<()> {
        let fp = fingerprint_key(req)?;
        self.write_record(spider_id, &fp, record).await
    }
}
