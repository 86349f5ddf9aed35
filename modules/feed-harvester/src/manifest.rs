// Submission manifest: all CID entries of a round bundled into one uploaded
// JSON file whose CID becomes the round's proof.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use harvest_common::{Manifest, NamedFile, Proof};

use crate::traits::{BlobStore, RecordStore};

pub struct ManifestBuilder {
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
}

impl ManifestBuilder {
    pub fn new(blobs: Arc<dyn BlobStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { blobs, records }
    }

    /// Build and store the proof for `round`. An empty round yields `None`
    /// with no upload. Every call re-uploads; nothing is cached locally.
    pub async fn build_proof(&self, round: u64) -> Result<Option<String>> {
        let entries = self.records.cid_entries_for_round(round).await?;
        if entries.is_empty() {
            info!(round, "manifest: nothing archived this round");
            return Ok(None);
        }

        let count = entries.len();
        let manifest = Manifest { round, entries };
        let json = serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;

        let cid = self
            .blobs
            .put(vec![NamedFile::json("manifest.json", json)])
            .await
            .with_context(|| format!("Manifest upload failed for round {round}"))?;

        self.records
            .put_proof(&Proof {
                round,
                cid: cid.clone(),
            })
            .await?;

        info!(round, entries = count, cid = %cid, "manifest: proof stored");
        Ok(Some(cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBlobStore, MemoryRecordStore};
    use crate::traits::RecordStore;
    use harvest_common::CidEntry;

    fn entry(key: &str, round: u64) -> CidEntry {
        CidEntry {
            natural_key: key.to_string(),
            round,
            cid: format!("bafy-{key}"),
        }
    }

    #[tokio::test]
    async fn empty_round_returns_none_without_upload() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let builder = ManifestBuilder::new(blobs.clone(), records.clone());

        assert_eq!(builder.build_proof(3).await.unwrap(), None);
        assert_eq!(blobs.upload_count(), 0);
        assert!(records.proof(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn manifest_lists_only_the_rounds_entries() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        records.create_cid_entry(&entry("1", 4)).await.unwrap();
        records.create_cid_entry(&entry("2", 4)).await.unwrap();
        records.create_cid_entry(&entry("3", 5)).await.unwrap();
        let builder = ManifestBuilder::new(blobs.clone(), records.clone());

        let cid = builder.build_proof(4).await.unwrap().unwrap();

        let uploads = blobs.uploads();
        assert_eq!(uploads.len(), 1);
        let manifest: Manifest = serde_json::from_slice(&uploads[0][0].bytes).unwrap();
        assert_eq!(manifest.round, 4);
        let keys: Vec<&str> = manifest.entries.iter().map(|e| e.natural_key.as_str()).collect();
        assert_eq!(keys, vec!["1", "2"]);
        assert_eq!(records.proof(4).await.unwrap().unwrap().cid, cid);
    }

    #[tokio::test]
    async fn repeated_build_reuploads_and_overwrites_proof() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        records.create_cid_entry(&entry("1", 9)).await.unwrap();
        let builder = ManifestBuilder::new(blobs.clone(), records.clone());

        let first = builder.build_proof(9).await.unwrap().unwrap();
        records.create_cid_entry(&entry("2", 9)).await.unwrap();
        let second = builder.build_proof(9).await.unwrap().unwrap();

        assert_eq!(blobs.upload_count(), 2);
        assert_ne!(first, second);
        assert_eq!(records.proof(9).await.unwrap().unwrap().cid, second);
    }
}
