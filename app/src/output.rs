//! Plain-text rendering of command results.

use std::fmt::Write as _;

use prag_ai::provision::{ModelProvision, ModelState};
use prag_ai::{DocumentStatus, IndexReport, QueryOutcome, QueryResponse};
use prag_core::error::AppError;

pub const INDEX_EMPTY_HINT: &str =
    "No documents are indexed yet. Run `personalrag index` to index your documents first.";

pub const NO_RELEVANT_RESULTS: &str = "No passage in your documents looks relevant to this question.";

pub fn render_error(e: &AppError) -> String {
    let mut s = format!("error [{}]: {}", e.code, e.reason());
    if e.retryable {
        s.push_str("\n(this may succeed if retried; check that Ollama is running)");
    }
    s
}

pub fn render_setup(base_url: &str, provisioned: &[ModelProvision]) -> String {
    let mut s = format!("Ollama reachable at {base_url}\n");
    for p in provisioned {
        let state = match p.state {
            ModelState::AlreadyInstalled => "already installed",
            ModelState::Pulled => "pulled",
        };
        let _ = writeln!(s, "  {}: {state}", p.model);
    }
    s.trim_end().to_string()
}

pub fn render_index_report(report: &IndexReport) -> String {
    let mut s = String::new();
    if report.model_changed {
        let _ = writeln!(
            s,
            "Embedding model changed to {}; the index was cleared.",
            report.embedding_model
        );
    }
    for d in &report.succeeded {
        let status = match d.status {
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Updated => "updated",
            DocumentStatus::Unchanged => "unchanged",
        };
        let _ = writeln!(
            s,
            "  {status:<9} {} ({} pages, {} chunks, {} embedded)",
            d.document_id, d.page_count, d.chunks, d.embedded
        );
    }
    for f in &report.failed {
        let _ = writeln!(s, "  FAILED    {}: [{}] {}", f.document_id, f.code, f.reason);
    }
    for id in &report.pruned_documents {
        let _ = writeln!(s, "  removed   {id}");
    }
    let _ = write!(
        s,
        "{} documents indexed, {} failed, {} removed; {} chunks written, {} embeddings computed, {} passages in index",
        report.succeeded.len(),
        report.failed.len(),
        report.pruned_documents.len(),
        report.chunks_written,
        report.embeddings_computed,
        report.records_total
    );
    s
}

pub fn render_query(response: &QueryResponse) -> String {
    let mut s = String::new();
    match &response.outcome {
        QueryOutcome::Answered { answer } => {
            let _ = writeln!(s, "{}", answer.text);
            if !answer.citations.is_empty() {
                let _ = writeln!(s, "\nCited pages:");
                for c in &answer.citations {
                    let _ = writeln!(s, "  - {}, page {}", c.document_id, c.page_number);
                }
            }
        }
        QueryOutcome::NoRelevantResults => {
            let _ = writeln!(s, "{NO_RELEVANT_RESULTS}");
        }
        QueryOutcome::GenerationFailed { error } => {
            let _ = writeln!(
                s,
                "Answer generation failed: [{}] {}\nThe retrieved passages are listed below.",
                error.code,
                error.reason()
            );
        }
    }

    if !response.sources.is_empty() {
        let _ = writeln!(s, "\nSources:");
        for (i, src) in response.sources.iter().enumerate() {
            let _ = writeln!(
                s,
                "  [{}] {}, page {} (score {:.3})\n      {}",
                i + 1,
                src.document_id,
                src.page_number,
                src.score,
                src.snippet.replace('\n', " ")
            );
        }
    }
    s.trim_end().to_string()
}
