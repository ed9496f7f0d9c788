use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One page of extracted text. `page_number` is 1-indexed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub document_id: String,
    pub page_number: u32,
    pub text: String,
}

/// A window over a page's text. Offsets are character offsets into `Page::text`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
    pub text_sha256: String,
}

impl Chunk {
    pub fn record_id(&self) -> String {
        record_id(&self.document_id, self.page_number, self.chunk_index)
    }

    pub fn char_len(&self) -> usize {
        self.end_char - self.start_char
    }
}

/// Where an answer's supporting text came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Citation {
    pub document_id: String,
    pub page_number: u32,
}

impl Citation {
    pub fn new(document_id: impl Into<String>, page_number: u32) -> Self {
        Self {
            document_id: document_id.into(),
            page_number,
        }
    }
}

/// Stable identifier of an indexed chunk: depends only on its position, never on its text,
/// so re-indexing a document overwrites its previous records.
pub fn record_id(document_id: &str, page_number: u32, chunk_index: u32) -> String {
    let payload = format!("document={document_id}\npage={page_number}\nchunk={chunk_index}");
    sha256_hex(payload.as_bytes())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
