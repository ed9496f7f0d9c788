use std::collections::HashSet;

use prag_core::config::RagConfig;
use prag_core::domain::Citation;
use prag_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::index::ScoredRecord;
use crate::llm::{GenerationOptions, Llm};
use crate::retrieve::RetrievalResult;

pub mod prompts;

pub use prompts::PROMPT_TEMPLATE_VERSION;

/// Citations in first-seen order, each at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationSet {
    order: Vec<Citation>,
    seen: HashSet<Citation>,
}

impl CitationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when `citation` was already present.
    pub fn insert(&mut self, citation: Citation) -> bool {
        if self.seen.contains(&citation) {
            return false;
        }
        self.seen.insert(citation.clone());
        self.order.push(citation);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Citation> {
        self.order.iter()
    }

    pub fn into_vec(self) -> Vec<Citation> {
        self.order
    }
}

impl FromIterator<Citation> for CitationSet {
    fn from_iter<I: IntoIterator<Item = Citation>>(iter: I) -> Self {
        let mut set = Self::new();
        for c in iter {
            set.insert(c);
        }
        set
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisSettings {
    pub model: String,
    pub options: GenerationOptions,
    /// Upper bound on the characters of context placed in the prompt.
    pub max_context_chars: usize,
    pub answer_language: Option<String>,
}

impl SynthesisSettings {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            model: config.generation_model.clone(),
            options: GenerationOptions {
                temperature: config.temperature,
            },
            max_context_chars: config.max_context_chars,
            answer_language: config.answer_language.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPrompt {
    pub prompt: String,
    /// How many of the ranked hits made it into the context.
    pub included: usize,
    pub citations: CitationSet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    pub model: String,
    pub prompt_template_version: String,
    pub context_passages: usize,
}

/// Assemble the prompt from hits in rank order. Blocks are added until the next one would
/// push the context past `max_context_chars`; the first block is always included.
pub fn build_prompt(question: &str, hits: &[ScoredRecord], settings: &SynthesisSettings) -> PreparedPrompt {
    let mut blocks: Vec<String> = Vec::new();
    let mut citations = CitationSet::new();
    let mut used_chars = 0usize;
    let separator_chars = prompts::CONTEXT_SEPARATOR.chars().count();

    for hit in hits {
        let r = &hit.record;
        let block = format!("{}\n{}", prompts::source_tag(&r.document_id, r.page_number), r.text);
        let block_chars = block.chars().count();
        let extra = if blocks.is_empty() {
            block_chars
        } else {
            block_chars + separator_chars
        };
        if !blocks.is_empty() && used_chars + extra > settings.max_context_chars {
            break;
        }
        used_chars += extra;
        citations.insert(r.citation());
        blocks.push(block);
    }
    if blocks.len() < hits.len() {
        tracing::debug!(
            included = blocks.len(),
            retrieved = hits.len(),
            max_context_chars = settings.max_context_chars,
            "context budget reached"
        );
    }

    let prompt = prompts::grounded_answer_prompt(
        question.trim(),
        &blocks.join(prompts::CONTEXT_SEPARATOR),
        settings.answer_language.as_deref(),
    );
    PreparedPrompt {
        prompt,
        included: blocks.len(),
        citations,
    }
}

/// Generate an answer conditioned on `retrieved`. Citations come from the passages placed in
/// the prompt, never from the generated text.
pub fn synthesize(
    llm: &dyn Llm,
    settings: &SynthesisSettings,
    question: &str,
    retrieved: &RetrievalResult,
) -> Result<Answer, AppError> {
    let prepared = build_prompt(question, &retrieved.hits, settings);
    let text = llm.generate(&settings.model, &prepared.prompt, &settings.options)?;
    Ok(Answer {
        text: text.trim().to_string(),
        citations: prepared.citations.into_vec(),
        model: settings.model.clone(),
        prompt_template_version: PROMPT_TEMPLATE_VERSION.to_string(),
        context_passages: prepared.included,
    })
}
