//! Filesystem backend: one directory per fingerprint, mirroring the layout
//! of the storage pipeline this was ported from.
//!
//! `<dir>/<spider>/<fp[0:2]>/<fp>/{meta, pickled_meta, response_headers,
//! response_body}`. `meta` is a human-readable summary; `pickled_meta` is
//! the authoritative record, a `postcard`-encoded, schema-versioned
//! [`CacheRecord`] rather than a language pickle. When `gzip` is enabled
//! each file is independently gzip-compressed.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use tokio::fs;

use crate::error::Result;
use crate::record::CacheRecord;
use crate::storage::{fingerprint_key, Expiration, Storage};
use crate::Request;

#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    pub root: PathBuf,
    pub expiration: Expiration,
    pub gzip: bool,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>, expiration: Expiration, gzip: bool) -> Self {
        Self { root: root.into(), expiration, gzip }
    }

    fn entry_dir(&self, spider_id: &str, fp: &str) -> PathBuf {
        self.root.join(spider_id).join(&fp[0..2]).join(fp)
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if !self.gzip {
            return Ok(bytes.to_vec());
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if !self.gzip {
            return Ok(bytes.to_vec());
        }
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }

    async fn write_file(&self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        let bytes = self.compress(&bytes)?;
        fs::write(path, bytes).await?;
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(self.decompress(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait::async_trait]
impl Storage for FilesystemStorage {
    async fn open(&self, spider_id: &str) -> Result<()> {
        fs::create_dir_all(self.root.join(spider_id)).await?;
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
        let dir = self.entry_dir(spider_id, &fp);
        let Some(bytes) = self.read_file(&dir.join("pickled_meta")).await? else {
            return Ok(None);
        };
        let record = match CacheRecord::decode(&bytes) {
            Ok(record) => record,
            Err(err) => {
                debug!("httpcache: corrupt filesystem record for {fp}: {err}");
                return Ok(None);
            }
        };
        if self.expiration.is_expired(record.stored_at, crate::date::now()) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn store(
        &self,
        spider_id: &str,
        req: &Request,
        record: &CacheRecord,
    ) -> Result<()> {
        let fp = fingerprint_key(req)?;
        let dir = self.entry_dir(spider_id, &fp);
        fs::create_dir_all(&dir).await?;

        let meta = format!(
            "status: {}\nurl: {}\nstored_at: {}\n",
            record.status, record.url, record.stored_at
        );
        self.write_file(&dir.join("meta"), meta.into_bytes()).await?;
        self.write_file(&dir.join("pickled_meta"), record.encode()?).await?;
        self.write_file(&dir.join("response_body"), record.body.clone()).await?;

        let mut header_lines = String::new();
        for (name, value) in &record.headers {
            header_lines.push_str(name);
            header_lines.push_str(": ");
            header_lines.push_str(value);
            header_lines.push_str("\r\n");
        }
        self.write_file(&dir.join("response_headers"), header_lines.into_bytes()).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::req;
    use std::collections::BTreeMap;

    fn record() -> CacheRecord {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        CacheRecord {
            status: 200,
            url: "https://ex.com/a".to_string(),
            headers,
            body: b"hello world".to_vec(),
            stored_at: crate::date::now(),
        }
    }

    #[tokio::test]
    async fn round_trips_with_gzip_disabled() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path(), Expiration::default(), false);
        let request = req("https://ex.com/a");
        storage.open("spider1").await?;
        storage.store("spider1", &request, &record()).await?;
        assert_eq!(storage.retrieve("spider1", &request).await?, Some(record()));
        Ok(())
    }

    #[tokio::test]
    async fn round_trips_with_gzip_enabled() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path(), Expiration::default(), true);
        let request = req("https://ex.com/a");
        storage.store("spider1", &request, &record()).await?;
        assert_eq!(storage.retrieve("spider1", &request).await?, Some(record()));
        Ok(())
    }

    #[tokio::test]
    async fn missing_entry_is_a_plain_miss() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path(), Expiration::default(), false);
        let request = req("https://ex.com/missing");
        assert_eq!(storage.retrieve("spider1", &request).await?, None);
        Ok(())
    }
}
