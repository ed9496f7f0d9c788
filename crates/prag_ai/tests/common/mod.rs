#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use prag_ai::embeddings::Embedder;
use prag_ai::llm::{GenerationOptions, Llm};
use prag_ai::RagEngine;
use prag_core::config::RagConfig;
use prag_core::error::{codes, AppError};

pub const DIMS: usize = 64;

/// Bag-of-words vectors: each lower-cased word bumps one hashed dimension. Texts sharing
/// words point in similar directions, which is all retrieval tests need.
#[derive(Debug, Default)]
pub struct KeywordEmbedder {
    embedded: AtomicUsize,
    unavailable: AtomicBool,
}

impl KeywordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of texts embedded so far (availability checks excluded).
    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, v: bool) {
        self.unavailable.store(v, Ordering::SeqCst);
    }

    fn unavailable_error(&self) -> AppError {
        AppError::new(codes::EMBEDDING_UNAVAILABLE, "fake embedder is offline").with_retryable(true)
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    v
}

impl Embedder for KeywordEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(self.unavailable_error());
        }
        self.embedded.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_vector(input))
    }

    fn check_available(&self, _model: &str) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(self.unavailable_error());
        }
        Ok(())
    }
}

/// Answers with a fixed text and remembers the last prompt it saw.
#[derive(Debug)]
pub struct RecordingLlm {
    reply: String,
    last_prompt: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl RecordingLlm {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            last_prompt: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().expect("lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Llm for RecordingLlm {
    fn generate(&self, _model: &str, prompt: &str, _options: &GenerationOptions) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().expect("lock") = Some(prompt.to_string());
        Ok(self.reply.clone())
    }
}

/// Generation service that is never reachable.
#[derive(Debug, Default)]
pub struct OfflineLlm;

impl Llm for OfflineLlm {
    fn generate(&self, _model: &str, _prompt: &str, _options: &GenerationOptions) -> Result<String, AppError> {
        Err(AppError::new(codes::GENERATION_UNAVAILABLE, "fake generation service is offline").with_retryable(true))
    }
}

pub struct Workspace {
    pub root: tempfile::TempDir,
    pub config: RagConfig,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let docs = root.path().join("documents");
        std::fs::create_dir_all(&docs).expect("mkdir documents");
        let config = RagConfig {
            documents_dir: docs,
            index_dir: root.path().join("rag_index"),
            chunk_size: 200,
            chunk_overlap: 20,
            boundary_window: 0,
            embedding_model: "fake-embed".to_string(),
            generation_model: "fake-llm".to_string(),
            embed_batch_size: 4,
            ..RagConfig::default()
        };
        Self { root, config }
    }

    pub fn docs(&self) -> PathBuf {
        self.config.documents_dir.clone()
    }

    pub fn write_pdf(&self, name: &str, pages: &[&str]) {
        write_pdf(&self.docs(), name, pages);
    }

    pub fn engine(&self, embedder: Arc<dyn Embedder>, llm: Arc<dyn Llm>) -> RagEngine {
        RagEngine::open(self.config.clone(), embedder, llm).expect("open engine")
    }
}

/// Minimal PDF with one page per entry; an empty entry produces a page with no text.
pub fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let mut operations = Vec::new();
        if !text.is_empty() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![72.into(), 720.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().expect("encode")));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save pdf");
    out
}

pub fn write_pdf(dir: &Path, name: &str, pages: &[&str]) {
    std::fs::write(dir.join(name), pdf_bytes(pages)).expect("write pdf");
}
