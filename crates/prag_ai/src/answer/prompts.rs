pub const PROMPT_TEMPLATE_VERSION: &str = "grounded_answer_v1";

pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

pub fn source_tag(document_id: &str, page_number: u32) -> String {
    format!("[source: {document_id}, page {page_number}]")
}

pub fn grounded_answer_prompt(question: &str, context_blocks: &str, language: Option<&str>) -> String {
    let language_rule = match language {
        Some(lang) => format!("5) Answer in {lang}."),
        None => "5) Answer in the language of the question.".to_string(),
    };
    format!(
        r#"You are an assistant that answers questions using ONLY the documents provided below.

Rules (non-negotiable):
1) Use ONLY the information in the context. Do not invent facts.
2) If the context does not contain enough information to answer, say so plainly.
3) Cite your sources: name the document and page each piece of information comes from, as given by the [source: ...] tags.
4) Be precise and concise.
{language_rule}

Context (extracted from the documents):
{context_blocks}

Question: {question}

Answer (with sources):"#
    )
}
