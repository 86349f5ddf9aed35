pub mod error;

pub use error::{IpfsError, Result};

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

/// One file in a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// A line of the newline-delimited JSON returned by `/api/v0/add`.
#[derive(Debug, Deserialize)]
struct AddEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Hash")]
    hash: String,
}

pub struct IpfsClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl IpfsClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// Upload a set of files as one directory and return the directory's CID.
    pub async fn add(&self, files: Vec<UploadFile>) -> Result<String> {
        let endpoint = format!(
            "{}/api/v0/add?wrap-with-directory=true&cid-version=1&pin=true",
            self.base_url
        );

        let mut form = Form::new();
        for file in files {
            let part = Part::bytes(file.bytes)
                .file_name(file.name)
                .mime_str(&file.content_type)?;
            form = form.part("file", part);
        }

        let mut req = self.client.post(&endpoint).multipart(form);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(IpfsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        let cid = parse_add_response(&body)?;
        tracing::debug!(cid = %cid, "ipfs: upload complete");
        Ok(cid)
    }
}

/// Pick the wrapping directory's CID out of an `/api/v0/add` response.
/// The wrapper is the entry with an empty name; it is emitted last.
fn parse_add_response(body: &str) -> Result<String> {
    let mut root = None;
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let entry: AddEntry = serde_json::from_str(line)?;
        if entry.name.is_empty() {
            root = Some(entry.hash);
        }
    }
    root.ok_or(IpfsError::MissingRoot)
}
