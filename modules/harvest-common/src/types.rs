use serde::{Deserialize, Serialize};

/// Marker substituted for line breaks inside a record's body text.
pub const BREAK_MARKER: &str = "<br>";

// --- Harvested records ---

/// Engagement counters exactly as the feed rendered them ("1.2K", "3", "").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub comments: String,
    pub likes: String,
    pub shares: String,
    pub views: String,
}

/// One harvested feed item.
///
/// Only materialized when both `author_handle` and `text` are non-empty.
/// `links` and `link_texts` are parallel: same length, DOM order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Source-assigned item id (trailing segment of the status link).
    pub natural_key: String,
    pub author_name: String,
    pub author_handle: String,
    pub author_url: String,
    pub avatar_url: String,
    /// Body text with line breaks replaced by [`BREAK_MARKER`].
    pub text: String,
    /// Original post time, Unix seconds.
    pub posted_at: Option<i64>,
    /// Wall clock at extraction, Unix seconds.
    pub observed_at: i64,
    pub engagement: Engagement,
    pub links: Vec<String>,
    pub link_texts: Vec<String>,
}

// --- Archival bookkeeping ---

/// Natural key -> round -> CID. At most one per natural key; first archival wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidEntry {
    pub natural_key: String,
    pub round: u64,
    pub cid: String,
}

/// Round -> manifest CID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub round: u64,
    pub cid: String,
}

/// The JSON document uploaded as a round's submission manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub round: u64,
    pub entries: Vec<CidEntry>,
}

/// A file handed to the blob store as part of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl NamedFile {
    pub fn json(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            content_type: "application/json".to_string(),
        }
    }

    pub fn html(name: impl Into<String>, markup: &str) -> Self {
        Self {
            name: name.into(),
            bytes: markup.as_bytes().to_vec(),
            content_type: "text/html".to_string(),
        }
    }
}
