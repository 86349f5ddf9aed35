// Dedup/archive pipeline: at most one upload per natural key, ever.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use harvest_common::{CidEntry, NamedFile, Record};

use crate::traits::{BlobStore, RecordStore};

pub struct Archiver {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
}

impl Archiver {
    pub fn new(blobs: Arc<dyn BlobStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { blobs, records }
    }

    /// Append `record` to the raw observation log.
    pub async fn observe(&self, record: &Record) -> Result<()> {
        self.records.create_observation(record).await
    }

    /// Archive `record` and its source markup under `round`.
    ///
    /// Returns `None` when the natural key was archived before (no upload).
    /// Upload and store failures propagate; retrying is the caller's call.
    pub async fn archive(&self, record: &Record, raw_markup: &str, round: u64) -> Result<Option<String>> {
        let key = &record.natural_key;

        if self.records.cid_entry(key).await?.is_some() {
            return Ok(None);
        }

        let json = serde_json::to_vec_pretty(record).context("Failed to serialize record")?;
        let files = vec![
            NamedFile::json(format!("{key}.json"), json),
            NamedFile::html(format!("{key}.html"), raw_markup),
        ];

        let cid = self
            .blobs
            .put(files)
            .await
            .with_context(|| format!("Upload failed for item {key}"))?;

        let entry = CidEntry {
            natural_key: key.clone(),
            round,
            cid: cid.clone(),
        };
        if !self.records.create_cid_entry(&entry).await? {
            // Lost a race with another writer for the same key; theirs stands.
            warn!(natural_key = %key, cid = %cid, "archive: entry already existed, keeping first");
            return Ok(None);
        }

        info!(natural_key = %key, round, cid = %cid, "archive: stored");
        Ok(Some(cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{Extraction, Extractor};
    use crate::testing::{tweet_html, MemoryBlobStore, MemoryRecordStore};

    fn record_for(id: &str) -> (Record, String) {
        let html = tweet_html(id, "@alice", "hello");
        match Extractor::new("https://x.com").unwrap().extract_at(&html, 0) {
            Extraction::Record(r) => (r, html),
            Extraction::Skip(reason) => panic!("fixture skipped: {reason}"),
        }
    }

    #[tokio::test]
    async fn new_key_uploads_record_and_markup_together() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let archiver = Archiver::new(blobs.clone(), records.clone());
        let (record, html) = record_for("123");

        let cid = archiver.archive(&record, &html, 7).await.unwrap();

        let cid = cid.expect("first archival returns a CID");
        let uploads = blobs.uploads();
        assert_eq!(uploads.len(), 1);
        let names: Vec<&str> = uploads[0].iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["123.json", "123.html"]);
        assert_eq!(uploads[0][1].bytes, html.as_bytes());

        let entry = records.cid_entry("123").await.unwrap().unwrap();
        assert_eq!(entry.round, 7);
        assert_eq!(entry.cid, cid);
    }

    #[tokio::test]
    async fn repeated_key_is_a_noop() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let archiver = Archiver::new(blobs.clone(), records.clone());
        let (record, html) = record_for("123");

        assert!(archiver.archive(&record, &html, 1).await.unwrap().is_some());
        assert!(archiver.archive(&record, &html, 1).await.unwrap().is_none());
        assert!(archiver.archive(&record, &html, 2).await.unwrap().is_none());

        assert_eq!(blobs.upload_count(), 1);
        assert_eq!(records.entry_count(), 1);
        assert_eq!(records.cid_entry("123").await.unwrap().unwrap().round, 1);
    }

    #[tokio::test]
    async fn upload_failure_propagates_without_entry() {
        let blobs = Arc::new(MemoryBlobStore::failing_first(1));
        let records = Arc::new(MemoryRecordStore::new());
        let archiver = Archiver::new(blobs.clone(), records.clone());
        let (record, html) = record_for("55");

        assert!(archiver.archive(&record, &html, 1).await.is_err());
        assert_eq!(records.entry_count(), 0);

        // A later attempt still archives.
        assert!(archiver.archive(&record, &html, 1).await.unwrap().is_some());
    }
}
