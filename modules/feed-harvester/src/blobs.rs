use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use harvest_common::NamedFile;
use ipfs_client::{IpfsClient, UploadFile};

use crate::traits::BlobStore;

/// Uploads to an IPFS node; each `put` is one wrapping directory.
pub struct IpfsBlobStore {
    client: IpfsClient,
}

impl IpfsBlobStore {
    pub fn new(client: IpfsClient) -> Self {
        Self { client }
    }

    async fn upload(&self, files: Vec<NamedFile>) -> crate::error::Result<String> {
        let files: Vec<UploadFile> = files
            .into_iter()
            .map(|f| UploadFile {
                name: f.name,
                bytes: f.bytes,
                content_type: f.content_type,
            })
            .collect();
        let count = files.len();
        let cid = self.client.add(files).await?;
        debug!(files = count, cid = %cid, "ipfs: uploaded");
        Ok(cid)
    }
}

#[async_trait]
impl BlobStore for IpfsBlobStore {
    async fn put(&self, files: Vec<NamedFile>) -> Result<String> {
        Ok(self.upload(files).await?)
    }
}
