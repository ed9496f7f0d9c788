pub mod answer;
pub mod embeddings;
pub mod engine;
pub mod index;
pub mod llm;
pub mod ollama;
pub mod provision;
pub mod retrieve;

pub use engine::{
    DocumentOutcome, DocumentStatus, EngineStatus, IndexFailure, IndexReport, QueryOutcome, QueryResponse,
    RagEngine, SourcePassage,
};
