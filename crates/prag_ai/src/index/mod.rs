//! Persistent vector index.
//!
//! SQLite (`<index_dir>/index.sqlite`) is the source of truth. Readers work on an immutable
//! in-memory [`Snapshot`] that is swapped in only after a write transaction commits, so a
//! search sees either the complete state before a write or the complete state after it.
//! Writers are serialized on the single connection. A write derives the next snapshot from
//! the previous one; the store is only read back in full when it is opened.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use prag_core::db::{self, sqlite_error};
use prag_core::domain::{Chunk, Citation};
use prag_core::error::{codes, AppError};
use prag_core::timestamps::now_rfc3339_utc;
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};

mod similarity;
mod store;

pub use similarity::{cosine_similarity, l2_norm};

use similarity::NormedRecord;

pub const INDEX_FILE_NAME: &str = "index.sqlite";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub document_id: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub start_char: usize,
    pub end_char: usize,
    pub text: String,
    pub text_sha256: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn from_chunk(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.record_id(),
            document_id: chunk.document_id,
            page_number: chunk.page_number,
            chunk_index: chunk.chunk_index,
            start_char: chunk.start_char,
            end_char: chunk.end_char,
            text: chunk.text,
            text_sha256: chunk.text_sha256,
            embedding,
        }
    }

    pub fn citation(&self) -> Citation {
        Citation::new(self.document_id.clone(), self.page_number)
    }
}

/// Manifest row for one indexed source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedDocument {
    pub document_id: String,
    pub content_sha256: String,
    pub page_count: u32,
    pub chunk_count: u32,
    /// Chunking parameters the records were produced with.
    pub chunking: String,
    pub indexed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStatus {
    pub path: Option<PathBuf>,
    pub records: usize,
    pub documents: usize,
    pub embedding_model: Option<String>,
    pub dims: Option<usize>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredRecord {
    pub record: EmbeddingRecord,
    pub score: f32,
}

/// Rows of `index_meta` the snapshot mirrors.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct IndexMeta {
    embedding_model: Option<String>,
    dims: Option<usize>,
    updated_at: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct Snapshot {
    /// Insertion order.
    entries: Vec<NormedRecord>,
    documents: BTreeMap<String, IndexedDocument>,
    meta: IndexMeta,
}

/// What a committed write did to the records, replayed onto the previous snapshot.
enum Change {
    MetaOnly,
    Upsert(Vec<EmbeddingRecord>),
    ReplaceDocument {
        entry: IndexedDocument,
        records: Vec<EmbeddingRecord>,
    },
    RemoveDocuments(Vec<String>),
    Clear,
}

impl Snapshot {
    /// The snapshot after `change`, sharing every untouched record with `self`.
    fn apply(&self, change: Change, meta: IndexMeta) -> Snapshot {
        let mut entries = self.entries.clone();
        let mut documents = self.documents.clone();
        match change {
            Change::MetaOnly => {}
            Change::Upsert(records) => upsert_entries(&mut entries, records),
            Change::ReplaceDocument { entry, records } => {
                let keep: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
                entries.retain(|e| {
                    e.record.document_id != entry.document_id || keep.contains(e.record.id.as_str())
                });
                upsert_entries(&mut entries, records);
                documents.insert(entry.document_id.clone(), entry);
            }
            Change::RemoveDocuments(ids) => {
                let gone: HashSet<&str> = ids.iter().map(String::as_str).collect();
                entries.retain(|e| !gone.contains(e.record.document_id.as_str()));
                documents.retain(|id, _| !gone.contains(id.as_str()));
            }
            Change::Clear => {
                entries.clear();
                documents.clear();
            }
        }
        Snapshot {
            entries,
            documents,
            meta,
        }
    }
}

/// Overwrite existing ids in place and append new ones, as the `records` table does.
fn upsert_entries(entries: &mut Vec<NormedRecord>, records: Vec<EmbeddingRecord>) {
    let mut slots: HashMap<String, usize> = {
        let incoming: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        entries
            .iter()
            .enumerate()
            .filter(|(_, e)| incoming.contains(e.record.id.as_str()))
            .map(|(i, e)| (e.record.id.clone(), i))
            .collect()
    };
    for r in records {
        let existing = slots.get(&r.id).copied();
        match existing {
            Some(i) => entries[i] = NormedRecord::new(r),
            None => {
                slots.insert(r.id.clone(), entries.len());
                entries.push(NormedRecord::new(r));
            }
        }
    }
}

/// One committed state of the index. Every read through a view sees the same records,
/// whatever writes commit in the meantime.
#[derive(Debug, Clone)]
pub struct IndexView {
    snapshot: Arc<Snapshot>,
}

impl IndexView {
    pub fn len(&self) -> usize {
        self.snapshot.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.entries.is_empty()
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.snapshot.meta.embedding_model.as_deref()
    }

    pub fn dims(&self) -> Option<usize> {
        self.snapshot.meta.dims
    }

    /// Top `k` records by cosine similarity, best first; equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>, AppError> {
        if k == 0 {
            return Err(AppError::new(codes::CONFIG_INVALID, "top_k must be at least 1"));
        }
        let snap = &self.snapshot;
        if snap.entries.is_empty() {
            return Ok(Vec::new());
        }
        let dims = snap.meta.dims.unwrap_or_default();
        if query.len() != dims {
            return Err(AppError::new(
                codes::RETRIEVAL_FAILED,
                "Query embedding dims do not match index dims",
            )
            .with_details(format!("index_dims={dims}; query_dims={}", query.len())));
        }
        let qnorm = l2_norm(query);
        if qnorm == 0.0 {
            return Err(AppError::new(codes::RETRIEVAL_FAILED, "Query embedding norm is zero"));
        }

        let hits = similarity::rank(&snap.entries, query, qnorm, k);
        tracing::debug!(k, candidates = snap.entries.len(), returned = hits.len(), "searched index");
        Ok(hits
            .into_iter()
            .map(|(i, score)| ScoredRecord {
                record: EmbeddingRecord::clone(&snap.entries[i].record),
                score,
            })
            .collect())
    }
}

pub struct VectorIndex {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("path", &self.path)
            .field("records", &self.len())
            .finish()
    }
}

impl VectorIndex {
    /// Open (or create) the index stored in `dir`. A store that is not a database, fails its
    /// integrity check or holds malformed vectors is reported as `INDEX_CORRUPT`.
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::new(codes::INDEX_OPEN_FAILED, "Failed to create index directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;
        let path = dir.join(INDEX_FILE_NAME);
        let conn = db::open(&path)?;
        let index = Self::from_connection(conn, Some(path))?;
        tracing::debug!(path = ?index.path, records = index.len(), "opened vector index");
        Ok(index)
    }

    pub fn in_memory() -> Result<Self, AppError> {
        Self::from_connection(db::open_in_memory()?, None)
    }

    fn from_connection(mut conn: Connection, path: Option<PathBuf>) -> Result<Self, AppError> {
        db::check_integrity(&conn)?;
        db::migrate(&mut conn)?;
        let snapshot = store::load_snapshot(&conn)?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pin the current committed state for a sequence of reads.
    pub fn view(&self) -> IndexView {
        IndexView {
            snapshot: self.snapshot(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn embedding_model(&self) -> Option<String> {
        self.snapshot().meta.embedding_model.clone()
    }

    pub fn dims(&self) -> Option<usize> {
        self.snapshot().meta.dims
    }

    pub fn status(&self) -> IndexStatus {
        let snap = self.snapshot();
        IndexStatus {
            path: self.path.clone(),
            records: snap.entries.len(),
            documents: snap.documents.len(),
            embedding_model: snap.meta.embedding_model.clone(),
            dims: snap.meta.dims,
            updated_at: snap.meta.updated_at.clone(),
        }
    }

    /// Manifest entries ordered by document id.
    pub fn documents(&self) -> Vec<IndexedDocument> {
        self.snapshot().documents.values().cloned().collect()
    }

    pub fn document(&self, document_id: &str) -> Option<IndexedDocument> {
        self.snapshot().documents.get(document_id).cloned()
    }

    /// Records of one document in insertion order.
    pub fn document_records(&self, document_id: &str) -> Vec<EmbeddingRecord> {
        self.snapshot()
            .entries
            .iter()
            .filter(|e| e.record.document_id == document_id)
            .map(|e| EmbeddingRecord::clone(&e.record))
            .collect()
    }

    pub fn get(&self, record_id: &str) -> Option<EmbeddingRecord> {
        self.snapshot()
            .entries
            .iter()
            .find(|e| e.record.id == record_id)
            .map(|e| EmbeddingRecord::clone(&e.record))
    }

    /// Record `model` as the producer of this index's vectors. When a different model was
    /// recorded before, every record is dropped first. Returns whether records were dropped.
    pub fn bind_model(&self, model: &str) -> Result<bool, AppError> {
        if self.embedding_model().as_deref() == Some(model) {
            return Ok(false);
        }
        let (previous, removed) = self.write(|tx| {
            let previous = store::get_meta(tx, store::META_EMBEDDING_MODEL)?;
            if previous.as_deref() == Some(model) {
                return Ok(((previous, 0), Change::MetaOnly));
            }
            let (removed, change) = if previous.is_some() {
                (store::clear_all(tx)?, Change::Clear)
            } else {
                (0, Change::MetaOnly)
            };
            store::set_meta(tx, store::META_EMBEDDING_MODEL, model)?;
            Ok(((previous, removed), change))
        })?;
        if removed > 0 {
            tracing::warn!(
                previous = previous.as_deref().unwrap_or_default(),
                model,
                removed,
                "embedding model changed; index cleared"
            );
        }
        Ok(removed > 0)
    }

    /// Insert or overwrite by id. Existing ids keep their position in the insertion order.
    pub fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize, AppError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.write(move |tx| {
            store::check_and_bind_dims(tx, &records)?;
            let written = store::upsert_records(tx, &records)?;
            Ok((written, Change::Upsert(records)))
        })
    }

    /// Atomically make `records` the complete set of `entry.document_id`'s records and
    /// update its manifest row.
    pub fn replace_document(
        &self,
        entry: IndexedDocument,
        records: Vec<EmbeddingRecord>,
    ) -> Result<usize, AppError> {
        if let Some(stray) = records.iter().find(|r| r.document_id != entry.document_id) {
            return Err(AppError::new(
                codes::INDEX_WRITE_FAILED,
                "Record does not belong to the document being replaced",
            )
            .with_details(format!(
                "document={}; record_document={}",
                entry.document_id, stray.document_id
            )));
        }
        self.write(move |tx| {
            store::check_and_bind_dims(tx, &records)?;
            let keep: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
            store::delete_stale_records(tx, &entry.document_id, &keep)?;
            let written = store::upsert_records(tx, &records)?;
            store::upsert_document(tx, &entry)?;
            Ok((written, Change::ReplaceDocument { entry, records }))
        })
    }

    /// Drop documents and all their records. Returns how many documents were present.
    pub fn remove_documents(&self, document_ids: &[String]) -> Result<usize, AppError> {
        if document_ids.is_empty() {
            return Ok(0);
        }
        let ids = document_ids.to_vec();
        self.write(move |tx| {
            let removed = store::delete_documents(tx, &ids)?;
            Ok((removed, Change::RemoveDocuments(ids)))
        })
    }

    /// Empty the index and return how many records were removed. The embedding model
    /// binding is kept.
    pub fn clear(&self) -> Result<usize, AppError> {
        self.write(|tx| Ok((store::clear_all(tx)?, Change::Clear)))
    }

    /// Top `k` records by cosine similarity against the current snapshot.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>, AppError> {
        self.view().search(query, k)
    }

    fn write<T>(
        &self,
        op: impl FnOnce(&Transaction<'_>) -> Result<(T, Change), AppError>,
    ) -> Result<T, AppError> {
        let updated_at = now_rfc3339_utc()?;
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        let tx = conn
            .transaction()
            .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to start index transaction"))?;
        let (out, change) = op(&tx)?;
        store::finish_write(&tx, &updated_at)?;
        let meta = store::load_meta(&tx)?;
        tx.commit()
            .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to commit index transaction"))?;

        // Swap while still holding the connection so snapshots are published in commit order.
        let next = self.snapshot().apply(change, meta);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rec(doc: &str, page: u32, chunk: u32, text: &str, v: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: prag_core::domain::record_id(doc, page, chunk),
            document_id: doc.to_string(),
            page_number: page,
            chunk_index: chunk,
            start_char: 0,
            end_char: text.chars().count(),
            text: text.to_string(),
            text_sha256: prag_core::domain::sha256_hex(text.as_bytes()),
            embedding: v,
        }
    }

    #[test]
    fn empty_index_search_returns_nothing() {
        let index = VectorIndex::in_memory().expect("index");
        assert!(index.search(&[1.0, 0.0], 3).expect("search").is_empty());
    }

    #[test]
    fn zero_k_is_a_config_error() {
        let index = VectorIndex::in_memory().expect("index");
        let err = index.search(&[1.0], 0).unwrap_err();
        assert_eq!(err.code, codes::CONFIG_INVALID);
    }

    #[test]
    fn ties_are_broken_by_insertion_order() {
        let index = VectorIndex::in_memory().expect("index");
        index
            .upsert(vec![
                rec("b.pdf", 1, 0, "first", vec![1.0, 0.0]),
                rec("a.pdf", 1, 0, "second", vec![2.0, 0.0]),
                rec("c.pdf", 1, 0, "third", vec![0.0, 1.0]),
            ])
            .expect("upsert");
        let hits = index.search(&[1.0, 0.0], 3).expect("search");
        let texts: Vec<&str> = hits.iter().map(|h| h.record.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    }

    #[test]
    fn upsert_overwrites_in_place() {
        let index = VectorIndex::in_memory().expect("index");
        index
            .upsert(vec![
                rec("a.pdf", 1, 0, "one", vec![1.0, 0.0]),
                rec("a.pdf", 1, 1, "two", vec![1.0, 0.0]),
            ])
            .expect("upsert");
        index
            .upsert(vec![rec("a.pdf", 1, 0, "one again", vec![1.0, 0.0])])
            .expect("upsert again");
        assert_eq!(index.len(), 2);
        let hits = index.search(&[1.0, 0.0], 2).expect("search");
        assert_eq!(hits[0].record.text, "one again");
        assert_eq!(hits[1].record.text, "two");
    }

    #[test]
    fn mismatched_dims_are_rejected_without_writing() {
        let index = VectorIndex::in_memory().expect("index");
        index.upsert(vec![rec("a.pdf", 1, 0, "x", vec![1.0, 0.0])]).expect("upsert");
        let err = index
            .upsert(vec![
                rec("b.pdf", 1, 0, "y", vec![1.0, 0.0]),
                rec("b.pdf", 1, 1, "z", vec![1.0, 0.0, 0.0]),
            ])
            .unwrap_err();
        assert_eq!(err.code, codes::INDEX_DIMS_MISMATCH);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn query_dims_must_match() {
        let index = VectorIndex::in_memory().expect("index");
        index.upsert(vec![rec("a.pdf", 1, 0, "x", vec![1.0, 0.0])]).expect("upsert");
        let err = index.search(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert_eq!(err.code, codes::RETRIEVAL_FAILED);
    }

    #[test]
    fn binding_a_new_model_clears_vectors() {
        let index = VectorIndex::in_memory().expect("index");
        assert!(!index.bind_model("all-minilm").expect("bind"));
        index.upsert(vec![rec("a.pdf", 1, 0, "x", vec![1.0, 0.0])]).expect("upsert");
        assert!(!index.bind_model("all-minilm").expect("same model"));
        assert_eq!(index.len(), 1);

        assert!(index.bind_model("nomic-embed-text").expect("rebind"));
        assert!(index.is_empty());
        assert_eq!(index.embedding_model().as_deref(), Some("nomic-embed-text"));
        assert_eq!(index.dims(), None);
    }

    #[test]
    fn clear_keeps_model_and_resets_dims() {
        let index = VectorIndex::in_memory().expect("index");
        index.bind_model("m").expect("bind");
        index.upsert(vec![rec("a.pdf", 1, 0, "x", vec![1.0, 0.0])]).expect("upsert");
        index.clear().expect("clear");
        let st = index.status();
        assert_eq!(st.records, 0);
        assert_eq!(st.dims, None);
        assert_eq!(st.embedding_model.as_deref(), Some("m"));
        assert!(st.updated_at.is_some());
    }

    fn manifest(doc: &str, chunks: u32) -> IndexedDocument {
        IndexedDocument {
            document_id: doc.to_string(),
            content_sha256: prag_core::domain::sha256_hex(doc.as_bytes()),
            page_count: 3,
            chunk_count: chunks,
            chunking: "size=1000;overlap=200;window=100".to_string(),
            indexed_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn assert_matches_store(index: &VectorIndex) {
        let conn = index.conn.lock().expect("lock");
        let reloaded = store::load_snapshot(&conn).expect("reload");
        assert_eq!(*index.snapshot(), reloaded);
    }

    #[test]
    fn snapshot_built_from_writes_matches_a_full_reload() {
        let index = VectorIndex::in_memory().expect("index");
        index.bind_model("m").expect("bind");
        index
            .upsert(vec![
                rec("a.pdf", 1, 0, "a0", vec![1.0, 0.0]),
                rec("a.pdf", 1, 1, "a1", vec![0.5, 0.5]),
            ])
            .expect("upsert a");
        index
            .replace_document(
                manifest("b.pdf", 2),
                vec![
                    rec("b.pdf", 1, 0, "b0", vec![0.0, 1.0]),
                    rec("b.pdf", 2, 0, "b1", vec![0.3, 0.7]),
                ],
            )
            .expect("replace b");
        index
            .upsert(vec![
                rec("a.pdf", 1, 0, "a0 v2", vec![0.9, 0.1]),
                rec("c.pdf", 1, 0, "c0", vec![0.2, 0.2]),
            ])
            .expect("upsert a and c");
        index
            .replace_document(
                manifest("b.pdf", 2),
                vec![
                    rec("b.pdf", 2, 0, "b1 v2", vec![0.1, 0.9]),
                    rec("b.pdf", 3, 0, "b2", vec![1.0, 1.0]),
                ],
            )
            .expect("replace b again");
        assert_matches_store(&index);

        index.remove_documents(&["c.pdf".to_string()]).expect("remove c");
        assert_matches_store(&index);

        let texts: Vec<String> = index
            .snapshot()
            .entries
            .iter()
            .map(|e| e.record.text.clone())
            .collect();
        assert_eq!(texts, vec!["a0 v2", "a1", "b1 v2", "b2"]);

        assert!(index.bind_model("other").expect("rebind"));
        assert_matches_store(&index);
        index.clear().expect("clear");
        assert_matches_store(&index);
    }

    #[test]
    fn view_keeps_reading_the_state_it_pinned() {
        let index = VectorIndex::in_memory().expect("index");
        index.bind_model("m").expect("bind");
        index.upsert(vec![rec("a.pdf", 1, 0, "x", vec![1.0, 0.0])]).expect("upsert");
        let view = index.view();
        index.clear().expect("clear");

        assert!(index.is_empty());
        assert_eq!(view.len(), 1);
        assert_eq!(view.embedding_model(), Some("m"));
        assert_eq!(view.search(&[1.0, 0.0], 4).expect("search").len(), 1);
    }
}

