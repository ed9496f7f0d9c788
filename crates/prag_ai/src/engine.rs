//! `RagEngine` ties the pipeline together: indexing a folder of documents and answering
//! questions against the resulting index.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use prag_core::chunking::Chunker;
use prag_core::config::{RagConfig, MAX_TOP_K};
use prag_core::domain::Chunk;
use prag_core::error::{codes, AppError};
use prag_core::loader::{document_id_for, DocumentLoader, LoadedDocument};
use prag_core::timestamps::now_rfc3339_utc;
use serde::{Deserialize, Serialize};

use crate::answer::{synthesize, Answer, SynthesisSettings};
use crate::embeddings::{Embedder, OllamaEmbedder};
use crate::index::{EmbeddingRecord, IndexStatus, IndexedDocument, ScoredRecord, VectorIndex};
use crate::llm::{Llm, OllamaLlm};
use crate::ollama::OllamaClient;
use crate::retrieve::retrieve;

pub const SNIPPET_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// First time this document was indexed.
    Indexed,
    /// Content or chunking changed since the last run.
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentOutcome {
    pub document_id: String,
    pub status: DocumentStatus,
    pub page_count: u32,
    pub chunks: usize,
    /// Chunks sent to the embedder in this run.
    pub embedded: usize,
    /// Chunks whose previous vector was kept because their text did not change.
    pub reused: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexFailure {
    pub document_id: String,
    pub path: PathBuf,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexReport {
    pub documents_dir: PathBuf,
    pub embedding_model: String,
    /// The index held vectors from another embedding model and was cleared.
    pub model_changed: bool,
    pub succeeded: Vec<DocumentOutcome>,
    pub failed: Vec<IndexFailure>,
    pub pruned_documents: Vec<String>,
    pub chunks_written: usize,
    pub embeddings_computed: usize,
    pub records_total: usize,
    pub started_at: String,
    pub finished_at: String,
}

impl IndexReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// What the user is shown for one retrieved chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourcePassage {
    pub document_id: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub score: f32,
    pub snippet: String,
}

impl SourcePassage {
    pub fn from_hit(hit: &ScoredRecord) -> Self {
        Self {
            document_id: hit.record.document_id.clone(),
            page_number: hit.record.page_number,
            chunk_index: hit.record.chunk_index,
            score: hit.score,
            snippet: snippet(&hit.record.text, SNIPPET_CHARS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered { answer: Answer },
    /// The index has records, but none were relevant enough.
    NoRelevantResults,
    /// Retrieval succeeded; the generation call did not. Sources are still reported.
    GenerationFailed { error: AppError },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub question: String,
    pub outcome: QueryOutcome,
    pub sources: Vec<SourcePassage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStatus {
    pub documents_dir: PathBuf,
    pub configured_embedding_model: String,
    pub generation_model: String,
    pub index: IndexStatus,
    pub documents: Vec<IndexedDocument>,
}

pub struct RagEngine {
    config: RagConfig,
    chunker: Chunker,
    loader: DocumentLoader,
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn Llm>,
    synthesis: SynthesisSettings,
    // One indexing run at a time; queries never take it.
    indexing: Mutex<()>,
}

impl RagEngine {
    /// Validate `config` and open (or create) the index under `config.index_dir`.
    pub fn open(config: RagConfig, embedder: Arc<dyn Embedder>, llm: Arc<dyn Llm>) -> Result<Self, AppError> {
        config.validate()?;
        let chunker = Chunker::new(config.chunker())?;
        let index = VectorIndex::open(&config.index_dir)?;
        let synthesis = SynthesisSettings::from_config(&config);
        Ok(Self {
            config,
            chunker,
            loader: DocumentLoader::default(),
            index,
            embedder,
            llm,
            synthesis,
            indexing: Mutex::new(()),
        })
    }

    /// Engine backed by the local Ollama server named in `config`.
    pub fn with_ollama(config: RagConfig) -> Result<Self, AppError> {
        let client = OllamaClient::new(&config.ollama_base_url)?
            .with_timeout(Duration::from_secs(config.request_timeout_secs));
        let embedder = Arc::new(OllamaEmbedder::new(client.clone()));
        let llm = Arc::new(OllamaLlm::new(client));
        Self::open(config, embedder, llm)
    }

    pub fn with_loader(mut self, loader: DocumentLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn index_store(&self) -> &VectorIndex {
        &self.index
    }

    /// Bring the index in line with the documents in `dir`.
    ///
    /// Unreadable files and per-document problems are collected in the report. An unreachable
    /// embedding service, a timeout or a storage failure aborts the run; documents committed
    /// before that point stay indexed.
    pub fn index(&self, dir: &Path) -> Result<IndexReport, AppError> {
        let _guard = self.indexing.lock().unwrap_or_else(PoisonError::into_inner);
        self.index_locked(dir)
    }

    /// Delete everything in the index, then index `dir` from scratch.
    pub fn rebuild(&self, dir: &Path) -> Result<IndexReport, AppError> {
        let _guard = self.indexing.lock().unwrap_or_else(PoisonError::into_inner);
        // Fail before clearing when the embedder cannot be used.
        self.embedder.check_available(&self.config.embedding_model)?;
        let removed = self.index.clear()?;
        tracing::info!(removed, "index cleared for rebuild");
        self.index_locked(dir)
    }

    fn index_locked(&self, dir: &Path) -> Result<IndexReport, AppError> {
        let started_at = now_rfc3339_utc()?;
        let model = self.config.embedding_model.as_str();

        self.embedder.check_available(model)?;
        let paths = self.loader.discover(dir)?;
        let model_changed = self.index.bind_model(model)?;
        tracing::info!(dir = %dir.display(), files = paths.len(), model, "indexing documents");

        let present: HashSet<String> = paths.iter().map(|p| document_id_for(p)).collect();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for item in self.loader.load_paths(paths) {
            let doc = match item {
                Ok(doc) => doc,
                Err(f) => {
                    tracing::warn!(document = %f.document_id, error = %f.error.reason(), "failed to load document");
                    failed.push(IndexFailure {
                        document_id: f.document_id,
                        path: f.path,
                        code: f.error.code.clone(),
                        reason: f.error.reason(),
                    });
                    continue;
                }
            };
            match self.index_document(&doc) {
                Ok(outcome) => {
                    tracing::info!(
                        document = %outcome.document_id,
                        status = ?outcome.status,
                        chunks = outcome.chunks,
                        embedded = outcome.embedded,
                        "document processed"
                    );
                    succeeded.push(outcome);
                }
                Err(e) if aborts_run(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(document = %doc.document_id, error = %e.reason(), "failed to index document");
                    failed.push(IndexFailure {
                        document_id: doc.document_id.clone(),
                        path: doc.path.clone(),
                        code: e.code.clone(),
                        reason: e.reason(),
                    });
                }
            }
        }

        let stale: Vec<String> = self
            .index
            .documents()
            .into_iter()
            .map(|d| d.document_id)
            .filter(|id| !present.contains(id))
            .collect();
        self.index.remove_documents(&stale)?;
        for id in &stale {
            tracing::info!(document = %id, "pruned document no longer in folder");
        }

        let report = IndexReport {
            documents_dir: dir.to_path_buf(),
            embedding_model: model.to_string(),
            model_changed,
            chunks_written: succeeded
                .iter()
                .filter(|o| o.status != DocumentStatus::Unchanged)
                .map(|o| o.chunks)
                .sum(),
            embeddings_computed: succeeded.iter().map(|o| o.embedded).sum(),
            succeeded,
            failed,
            pruned_documents: stale,
            records_total: self.index.len(),
            started_at,
            finished_at: now_rfc3339_utc()?,
        };
        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            pruned = report.pruned_documents.len(),
            records = report.records_total,
            "indexing finished"
        );
        Ok(report)
    }

    fn index_document(&self, doc: &LoadedDocument) -> Result<DocumentOutcome, AppError> {
        let chunking = self.chunker.config().signature();
        let previous = self.index.document(&doc.document_id);
        if let Some(prev) = previous.as_ref() {
            if prev.content_sha256 == doc.content_sha256 && prev.chunking == chunking {
                return Ok(DocumentOutcome {
                    document_id: doc.document_id.clone(),
                    status: DocumentStatus::Unchanged,
                    page_count: doc.page_count,
                    chunks: prev.chunk_count as usize,
                    embedded: 0,
                    reused: 0,
                });
            }
        }

        let chunks: Vec<Chunk> = self.chunker.chunk_pages(&doc.pages).collect();
        let mut reusable: HashMap<String, Vec<f32>> = self
            .index
            .document_records(&doc.document_id)
            .into_iter()
            .map(|r| (r.text_sha256, r.embedding))
            .collect();
        let mut vectors: Vec<Option<Vec<f32>>> = chunks
            .iter()
            .map(|c| reusable.get(&c.text_sha256).cloned())
            .collect();
        reusable.clear();

        let missing: Vec<usize> = (0..chunks.len()).filter(|&i| vectors[i].is_none()).collect();
        let model = self.config.embedding_model.as_str();
        for batch in missing.chunks(self.config.embed_batch_size) {
            let inputs: Vec<&str> = batch.iter().map(|&i| chunks[i].text.as_str()).collect();
            let out = self.embedder.embed_batch(model, &inputs)?;
            if out.len() != inputs.len() {
                return Err(AppError::new(
                    codes::EMBEDDING_FAILED,
                    "Embedder returned a different number of vectors than inputs",
                )
                .with_details(format!("inputs={}; vectors={}", inputs.len(), out.len())));
            }
            for (&i, v) in batch.iter().zip(out) {
                vectors[i] = Some(v);
            }
            tracing::debug!(document = %doc.document_id, batch = batch.len(), "embedded chunk batch");
        }

        let chunk_count = chunks.len();
        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(c, v)| {
                v.map(|v| EmbeddingRecord::from_chunk(c, v)).ok_or_else(|| {
                    AppError::new(codes::EMBEDDING_FAILED, "Chunk is missing its embedding")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entry = IndexedDocument {
            document_id: doc.document_id.clone(),
            content_sha256: doc.content_sha256.clone(),
            page_count: doc.page_count,
            chunk_count: chunk_count.min(u32::MAX as usize) as u32,
            chunking,
            indexed_at: now_rfc3339_utc()?,
        };
        self.index.replace_document(entry, records)?;

        Ok(DocumentOutcome {
            document_id: doc.document_id.clone(),
            status: if previous.is_some() {
                DocumentStatus::Updated
            } else {
                DocumentStatus::Indexed
            },
            page_count: doc.page_count,
            chunks: chunk_count,
            embedded: missing.len(),
            reused: chunk_count - missing.len(),
        })
    }

    pub fn query(&self, question: &str) -> Result<QueryResponse, AppError> {
        self.query_with_top_k(question, self.config.top_k)
    }

    /// Retrieve the `top_k` best passages and answer from them.
    ///
    /// `INDEX_EMPTY` and `QUERY_INVALID` are errors; a failed generation call is not, it is
    /// reported as [`QueryOutcome::GenerationFailed`] alongside the retrieved sources.
    pub fn query_with_top_k(&self, question: &str, top_k: usize) -> Result<QueryResponse, AppError> {
        if top_k == 0 || top_k > MAX_TOP_K {
            return Err(AppError::new(codes::CONFIG_INVALID, "Invalid top_k")
                .with_details(format!("top_k={top_k}; allowed=1..={MAX_TOP_K}")));
        }
        let retrieved = retrieve(
            &self.index,
            self.embedder.as_ref(),
            question,
            top_k,
            self.config.min_score,
        )?;
        let sources: Vec<SourcePassage> = retrieved.hits.iter().map(SourcePassage::from_hit).collect();

        let outcome = if retrieved.is_empty() {
            QueryOutcome::NoRelevantResults
        } else {
            match synthesize(self.llm.as_ref(), &self.synthesis, &retrieved.query, &retrieved) {
                Ok(answer) => QueryOutcome::Answered { answer },
                Err(error) => {
                    tracing::warn!(error = %error.reason(), "answer generation failed");
                    QueryOutcome::GenerationFailed { error }
                }
            }
        };

        Ok(QueryResponse {
            question: retrieved.query,
            outcome,
            sources,
        })
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            documents_dir: self.config.documents_dir.clone(),
            configured_embedding_model: self.config.embedding_model.clone(),
            generation_model: self.config.generation_model.clone(),
            index: self.index.status(),
            documents: self.index.documents(),
        }
    }

    /// Remove every record; returns how many were removed.
    pub fn clear(&self) -> Result<usize, AppError> {
        let _guard = self.indexing.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self.index.clear()?;
        tracing::info!(removed, "index cleared");
        Ok(removed)
    }
}

fn aborts_run(e: &AppError) -> bool {
    [
        codes::EMBEDDING_UNAVAILABLE,
        codes::EMBEDDING_FAILED,
        codes::PROVIDER_TIMEOUT,
        codes::INDEX_WRITE_FAILED,
        codes::INDEX_CORRUPT,
        codes::TIME_FORMAT_FAILED,
    ]
    .contains(&e.code.as_str())
}

/// First `max_chars` characters of `text`, with an ellipsis when something was cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let t = text.trim();
    match t.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &t[..byte]),
        None => t.to_string(),
    }
}
