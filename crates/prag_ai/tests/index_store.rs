use pretty_assertions::assert_eq;
use prag_ai::index::{EmbeddingRecord, IndexedDocument, VectorIndex, INDEX_FILE_NAME};
use prag_core::domain::{record_id, sha256_hex};
use prag_core::error::codes;

fn rec(doc: &str, chunk: u32, text: &str, embedding: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        id: record_id(doc, 1, chunk),
        document_id: doc.to_string(),
        page_number: 1,
        chunk_index: chunk,
        start_char: 0,
        end_char: text.chars().count(),
        text: text.to_string(),
        text_sha256: sha256_hex(text.as_bytes()),
        embedding,
    }
}

fn entry(doc: &str, chunks: u32) -> IndexedDocument {
    IndexedDocument {
        document_id: doc.to_string(),
        content_sha256: sha256_hex(doc.as_bytes()),
        page_count: 1,
        chunk_count: chunks,
        chunking: "size=1000;overlap=200;window=100".to_string(),
        indexed_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

#[test]
fn records_and_order_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let index = VectorIndex::open(dir.path()).expect("open");
        index.bind_model("all-minilm").expect("bind");
        index
            .upsert(vec![
                rec("a.pdf", 0, "first", vec![1.0, 0.0, 0.0]),
                rec("a.pdf", 1, "second", vec![1.0, 0.0, 0.0]),
                rec("b.pdf", 0, "third", vec![0.0, 1.0, 0.0]),
            ])
            .expect("upsert");
    }

    let index = VectorIndex::open(dir.path()).expect("reopen");
    assert_eq!(index.len(), 3);
    assert_eq!(index.embedding_model().as_deref(), Some("all-minilm"));
    assert_eq!(index.dims(), Some(3));

    let hits = index.search(&[1.0, 0.0, 0.0], 3).expect("search");
    let texts: Vec<&str> = hits.iter().map(|h| h.record.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
    assert_eq!(hits[0].record.embedding, vec![1.0, 0.0, 0.0]);
}

#[test]
fn search_returns_at_most_k_in_non_increasing_order() {
    let index = VectorIndex::in_memory().expect("index");
    let mut recs = Vec::new();
    for i in 0..10u32 {
        let x = i as f32;
        recs.push(rec("doc.pdf", i, &format!("r{i}"), vec![1.0, x]));
    }
    index.upsert(recs).expect("upsert");

    let hits = index.search(&[0.0, 1.0], 4).expect("search");
    assert_eq!(hits.len(), 4);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(hits[0].record.text, "r9");
}

#[test]
fn replace_document_swaps_the_full_set_and_manifest() {
    let index = VectorIndex::in_memory().expect("index");
    index
        .replace_document(
            entry("a.pdf", 3),
            vec![
                rec("a.pdf", 0, "zero", vec![1.0, 0.0]),
                rec("a.pdf", 1, "one", vec![1.0, 0.0]),
                rec("a.pdf", 2, "two", vec![1.0, 0.0]),
            ],
        )
        .expect("first");
    index
        .replace_document(entry("b.pdf", 1), vec![rec("b.pdf", 0, "other", vec![0.0, 1.0])])
        .expect("other doc");

    index
        .replace_document(entry("a.pdf", 1), vec![rec("a.pdf", 0, "zero v2", vec![1.0, 0.0])])
        .expect("replace");

    let a: Vec<String> = index.document_records("a.pdf").into_iter().map(|r| r.text).collect();
    assert_eq!(a, vec!["zero v2".to_string()]);
    assert_eq!(index.document("a.pdf").expect("entry").chunk_count, 1);
    assert_eq!(index.document_records("b.pdf").len(), 1);
    assert_eq!(index.status().documents, 2);
}

#[test]
fn replace_document_rejects_foreign_records() {
    let index = VectorIndex::in_memory().expect("index");
    let err = index
        .replace_document(entry("a.pdf", 1), vec![rec("b.pdf", 0, "x", vec![1.0])])
        .unwrap_err();
    assert_eq!(err.code, codes::INDEX_WRITE_FAILED);
    assert!(index.is_empty());
}

#[test]
fn dims_mismatch_rolls_back_the_whole_document() {
    let index = VectorIndex::in_memory().expect("index");
    index.upsert(vec![rec("a.pdf", 0, "x", vec![1.0, 0.0])]).expect("seed");
    let err = index
        .replace_document(
            entry("b.pdf", 2),
            vec![rec("b.pdf", 0, "y", vec![1.0, 0.0]), rec("b.pdf", 1, "z", vec![1.0])],
        )
        .unwrap_err();
    assert_eq!(err.code, codes::INDEX_DIMS_MISMATCH);
    assert!(index.document("b.pdf").is_none());
    assert_eq!(index.len(), 1);
}

#[test]
fn remove_documents_reports_what_existed() {
    let index = VectorIndex::in_memory().expect("index");
    index
        .replace_document(entry("a.pdf", 1), vec![rec("a.pdf", 0, "x", vec![1.0])])
        .expect("a");
    let removed = index
        .remove_documents(&["a.pdf".to_string(), "ghost.pdf".to_string()])
        .expect("remove");
    assert_eq!(removed, 1);
    assert!(index.is_empty());
    assert_eq!(index.dims(), None);
}

#[test]
fn malformed_vector_blob_is_corruption_not_an_empty_index() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let index = VectorIndex::open(dir.path()).expect("open");
        index.upsert(vec![rec("a.pdf", 0, "x", vec![1.0, 2.0])]).expect("upsert");
    }
    {
        let conn = rusqlite::Connection::open(dir.path().join(INDEX_FILE_NAME)).expect("raw open");
        conn.execute("UPDATE records SET embedding = x'0102'", [])
            .expect("damage blob");
    }
    let err = VectorIndex::open(dir.path()).unwrap_err();
    assert_eq!(err.code, codes::INDEX_CORRUPT);
}

fn damage_and_reopen(sql: &str) -> prag_core::error::AppError {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let index = VectorIndex::open(dir.path()).expect("open");
        index.upsert(vec![rec("a.pdf", 0, "x", vec![1.0, 2.0])]).expect("upsert");
    }
    {
        let conn = rusqlite::Connection::open(dir.path().join(INDEX_FILE_NAME)).expect("raw open");
        conn.execute(sql, []).expect("damage row");
    }
    VectorIndex::open(dir.path()).unwrap_err()
}

#[test]
fn out_of_range_page_number_is_corruption() {
    let err = damage_and_reopen("UPDATE records SET page_number = -1");
    assert_eq!(err.code, codes::INDEX_CORRUPT);
}

#[test]
fn wrongly_typed_column_is_corruption() {
    let err = damage_and_reopen("UPDATE records SET text = x'00ff'");
    assert_eq!(err.code, codes::INDEX_CORRUPT);
}
