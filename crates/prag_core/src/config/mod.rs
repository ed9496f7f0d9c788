//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then `PRAG_*`
//! environment variables. Everything is validated once, before any work starts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkerConfig;
use crate::error::{codes, AppError};

pub const ENV_PREFIX: &str = "PRAG_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RagConfig {
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_boundary_window")]
    pub boundary_window: usize,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Hits scoring below this cosine similarity are dropped before answering.
    #[serde(default)]
    pub min_score: Option<f32>,
    /// Language the model is told to answer in; `None` means the language of the question.
    #[serde(default)]
    pub answer_language: Option<String>,
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("documents")
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("rag_index")
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_boundary_window() -> usize {
    100
}

fn default_embedding_model() -> String {
    "all-minilm".into()
}

fn default_generation_model() -> String {
    "llama3.2:3b".into()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_top_k() -> usize {
    4
}

fn default_ollama_base_url() -> String {
    "http://127.0.0.1:11434".into()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_embed_batch_size() -> usize {
    16
}

fn default_max_context_chars() -> usize {
    6000
}

pub const MAX_TOP_K: usize = 50;

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            index_dir: default_index_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            boundary_window: default_boundary_window(),
            embedding_model: default_embedding_model(),
            generation_model: default_generation_model(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            ollama_base_url: default_ollama_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            embed_batch_size: default_embed_batch_size(),
            max_context_chars: default_max_context_chars(),
            min_score: None,
            answer_language: None,
        }
    }
}

impl RagConfig {
    /// Load from `path` (or defaults when `None`), apply process environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Relative directories are resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(codes::CONFIG_READ_FAILED, "Failed to read config file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent() {
            config.documents_dir = resolve_against(base, &config.documents_dir);
            config.index_dir = resolve_against(base, &config.index_dir);
        }
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AppError> {
        toml::from_str(raw).map_err(|e| {
            AppError::new(codes::CONFIG_INVALID, "Failed to parse config file").with_details(e.to_string())
        })
    }

    /// Apply `PRAG_*` variables from `vars`; other variables are ignored.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "DOCUMENTS_DIR" => self.documents_dir = PathBuf::from(value),
                "INDEX_DIR" => self.index_dir = PathBuf::from(value),
                "CHUNK_SIZE" => self.chunk_size = parse_env(&key, &value)?,
                "CHUNK_OVERLAP" => self.chunk_overlap = parse_env(&key, &value)?,
                "BOUNDARY_WINDOW" => self.boundary_window = parse_env(&key, &value)?,
                "EMBEDDING_MODEL" => self.embedding_model = value,
                "GENERATION_MODEL" => self.generation_model = value,
                "TEMPERATURE" => self.temperature = parse_env(&key, &value)?,
                "TOP_K" => self.top_k = parse_env(&key, &value)?,
                "OLLAMA_BASE_URL" => self.ollama_base_url = value,
                "REQUEST_TIMEOUT_SECS" => self.request_timeout_secs = parse_env(&key, &value)?,
                "EMBED_BATCH_SIZE" => self.embed_batch_size = parse_env(&key, &value)?,
                "MAX_CONTEXT_CHARS" => self.max_context_chars = parse_env(&key, &value)?,
                "MIN_SCORE" => {
                    self.min_score = if value.trim().is_empty() {
                        None
                    } else {
                        Some(parse_env(&key, &value)?)
                    }
                }
                "ANSWER_LANGUAGE" => {
                    let v = value.trim();
                    self.answer_language = (!v.is_empty()).then(|| v.to_string());
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            boundary_window: self.boundary_window,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let mut problems = self.chunker().problems();
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            problems.push(format!("top_k ({}) must be between 1 and {MAX_TOP_K}", self.top_k));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            problems.push(format!("temperature ({}) must be between 0 and 2", self.temperature));
        }
        if self.embedding_model.trim().is_empty() {
            problems.push("embedding_model must not be empty".to_string());
        }
        if self.generation_model.trim().is_empty() {
            problems.push("generation_model must not be empty".to_string());
        }
        if self.embed_batch_size == 0 {
            problems.push("embed_batch_size must be at least 1".to_string());
        }
        if self.request_timeout_secs == 0 {
            problems.push("request_timeout_secs must be at least 1".to_string());
        }
        if self.max_context_chars == 0 {
            problems.push("max_context_chars must be at least 1".to_string());
        }
        if let Some(s) = self.min_score {
            if !(-1.0..=1.0).contains(&s) {
                problems.push(format!("min_score ({s}) must be between -1 and 1"));
            }
        }

        if problems.is_empty() {
            return Ok(());
        }
        Err(AppError::new(codes::CONFIG_INVALID, "Invalid configuration").with_details(problems.join("; ")))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value.trim().parse().map_err(|_| {
        AppError::new(codes::CONFIG_INVALID, "Invalid environment override")
            .with_details(format!("{key}={value}"))
    })
}

fn resolve_against(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() || base.as_os_str().is_empty() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}
