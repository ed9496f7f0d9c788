//! SQL side of the vector index. Every function here runs against a connection or an
//! open transaction owned by [`super::VectorIndex`].

use std::collections::{BTreeMap, HashSet};

use prag_core::db::sqlite_error;
use prag_core::error::{codes, AppError};
use rusqlite::{params, Connection, OptionalExtension};

use super::similarity::NormedRecord;
use super::{EmbeddingRecord, IndexMeta, IndexedDocument, Snapshot};

pub(crate) const META_EMBEDDING_MODEL: &str = "embedding_model";
pub(crate) const META_DIMS: &str = "dims";
pub(crate) const META_UPDATED_AT: &str = "updated_at";

pub(crate) fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub(crate) fn decode_vector(bytes: &[u8], dims: usize) -> Option<Vec<f32>> {
    if bytes.len() != dims * 4 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

fn corrupt(details: impl Into<String>) -> AppError {
    AppError::new(
        codes::INDEX_CORRUPT,
        "Index store is corrupt; rebuild it from the source documents",
    )
    .with_details(details)
}

pub(crate) fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, AppError> {
    conn.query_row("SELECT value FROM index_meta WHERE key = ?1", [key], |row| row.get(0))
        .optional()
        .map_err(|e| sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to read index metadata"))
}

pub(crate) fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO index_meta(key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to write index metadata"))?;
    Ok(())
}

pub(crate) fn delete_meta(conn: &Connection, key: &str) -> Result<(), AppError> {
    conn.execute("DELETE FROM index_meta WHERE key = ?1", [key])
        .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to write index metadata"))?;
    Ok(())
}

pub(crate) fn stored_dims(conn: &Connection) -> Result<Option<usize>, AppError> {
    match get_meta(conn, META_DIMS)? {
        None => Ok(None),
        Some(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|_| corrupt(format!("dims={raw}"))),
    }
}

/// Rejects vectors whose length differs from the index (or from each other on first write).
/// Records the dimensionality when the index had none.
pub(crate) fn check_and_bind_dims(conn: &Connection, records: &[EmbeddingRecord]) -> Result<(), AppError> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let existing = stored_dims(conn)?;
    let expected = existing.unwrap_or(first.embedding.len());
    if expected == 0 {
        return Err(AppError::new(codes::INDEX_DIMS_MISMATCH, "Embedding vector is empty")
            .with_details(format!("record_id={}", first.id)));
    }
    for r in records {
        if r.embedding.len() != expected {
            return Err(AppError::new(
                codes::INDEX_DIMS_MISMATCH,
                "Embedding dimensions do not match the index",
            )
            .with_details(format!(
                "expected={expected}; got={}; document={}; record_id={}",
                r.embedding.len(),
                r.document_id,
                r.id
            )));
        }
    }
    if existing.is_none() {
        set_meta(conn, META_DIMS, &expected.to_string())?;
    }
    Ok(())
}

pub(crate) fn upsert_records(conn: &Connection, records: &[EmbeddingRecord]) -> Result<usize, AppError> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO records(record_id, document_id, page_number, chunk_index, start_char, end_char, text, text_sha256, dims, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(record_id) DO UPDATE SET
               document_id = excluded.document_id,
               page_number = excluded.page_number,
               chunk_index = excluded.chunk_index,
               start_char = excluded.start_char,
               end_char = excluded.end_char,
               text = excluded.text,
               text_sha256 = excluded.text_sha256,
               dims = excluded.dims,
               embedding = excluded.embedding",
        )
        .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to prepare record upsert"))?;

    for r in records {
        stmt.execute(params![
            r.id,
            r.document_id,
            r.page_number,
            r.chunk_index,
            r.start_char as i64,
            r.end_char as i64,
            r.text,
            r.text_sha256,
            r.embedding.len() as i64,
            encode_vector(&r.embedding),
        ])
        .map_err(|e| {
            sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to upsert record")
                .with_details(format!("record_id={}", r.id))
        })?;
    }
    Ok(records.len())
}

/// Deletes `document_id`'s records whose ids are not in `keep`. Returns the number removed.
pub(crate) fn delete_stale_records(
    conn: &Connection,
    document_id: &str,
    keep: &HashSet<&str>,
) -> Result<usize, AppError> {
    let existing: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT record_id FROM records WHERE document_id = ?1")
            .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to list document records"))?;
        let rows = stmt
            .query_map([document_id], |row| row.get::<_, String>(0))
            .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to list document records"))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to read record id"))?);
        }
        out
    };

    let mut removed = 0usize;
    for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
        removed += conn
            .execute("DELETE FROM records WHERE record_id = ?1", [id])
            .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to delete stale record"))?;
    }
    Ok(removed)
}

pub(crate) fn upsert_document(conn: &Connection, doc: &IndexedDocument) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO documents(document_id, content_sha256, page_count, chunk_count, chunking, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(document_id) DO UPDATE SET
           content_sha256 = excluded.content_sha256,
           page_count = excluded.page_count,
           chunk_count = excluded.chunk_count,
           chunking = excluded.chunking,
           indexed_at = excluded.indexed_at",
        params![
            doc.document_id,
            doc.content_sha256,
            doc.page_count,
            doc.chunk_count,
            doc.chunking,
            doc.indexed_at
        ],
    )
    .map_err(|e| {
        sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to write document entry")
            .with_details(format!("document={}", doc.document_id))
    })?;
    Ok(())
}

/// Removes documents and their records. Returns how many documents existed.
pub(crate) fn delete_documents(conn: &Connection, document_ids: &[String]) -> Result<usize, AppError> {
    let mut removed = 0usize;
    for id in document_ids {
        conn.execute("DELETE FROM records WHERE document_id = ?1", [id])
            .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to delete document records"))?;
        removed += conn
            .execute("DELETE FROM documents WHERE document_id = ?1", [id])
            .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to delete document entry"))?;
    }
    Ok(removed)
}

/// Returns the number of records removed.
pub(crate) fn clear_all(conn: &Connection) -> Result<usize, AppError> {
    let removed = conn
        .execute("DELETE FROM records", [])
        .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to clear index records"))?;
    conn.execute("DELETE FROM documents", [])
        .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to clear index documents"))?;
    delete_meta(conn, META_DIMS)?;
    Ok(removed)
}

/// Bookkeeping shared by every write: stamp the update time and forget the
/// dimensionality once no vectors remain.
pub(crate) fn finish_write(conn: &Connection, updated_at: &str) -> Result<(), AppError> {
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
        .map_err(|e| sqlite_error(e, codes::INDEX_WRITE_FAILED, "Failed to count records"))?;
    if remaining == 0 {
        delete_meta(conn, META_DIMS)?;
    }
    set_meta(conn, META_UPDATED_AT, updated_at)
}

/// A row whose columns cannot be read as their declared types is damaged, not unreadable.
fn read_err(e: rusqlite::Error) -> AppError {
    match e {
        rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => corrupt(format!("malformed row: {e}")),
        e => sqlite_error(e, codes::INDEX_OPEN_FAILED, "Failed to load index"),
    }
}

pub(crate) fn load_meta(conn: &Connection) -> Result<IndexMeta, AppError> {
    Ok(IndexMeta {
        embedding_model: get_meta(conn, META_EMBEDDING_MODEL)?,
        dims: stored_dims(conn)?,
        updated_at: get_meta(conn, META_UPDATED_AT)?,
    })
}

fn to_usize(v: i64, what: &str, record_id: &str) -> Result<usize, AppError> {
    usize::try_from(v).map_err(|_| corrupt(format!("record_id={record_id}; {what}={v}")))
}

/// Reads the whole store into an immutable snapshot, in insertion order.
pub(crate) fn load_snapshot(conn: &Connection) -> Result<Snapshot, AppError> {
    let meta = load_meta(conn)?;
    let dims = meta.dims;

    let mut stmt = conn
        .prepare(
            "SELECT record_id, document_id, page_number, chunk_index, start_char, end_char, text, text_sha256, dims, embedding
             FROM records ORDER BY seq ASC",
        )
        .map_err(read_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, Vec<u8>>(9)?,
            ))
        })
        .map_err(read_err)?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, document_id, page_number, chunk_index, start, end, text, text_sha256, row_dims, blob) =
            row.map_err(read_err)?;
        let row_dims = to_usize(row_dims, "dims", &id)?;
        match dims {
            Some(d) if d == row_dims => {}
            _ => {
                return Err(corrupt(format!(
                    "record_id={id}; dims={row_dims}; index_dims={dims:?}"
                )))
            }
        }
        let embedding = decode_vector(&blob, row_dims)
            .ok_or_else(|| corrupt(format!("record_id={id}; blob_len={}", blob.len())))?;

        entries.push(NormedRecord::new(EmbeddingRecord {
            start_char: to_usize(start, "start_char", &id)?,
            end_char: to_usize(end, "end_char", &id)?,
            id,
            document_id,
            page_number,
            chunk_index,
            text,
            text_sha256,
            embedding,
        }));
    }

    let mut documents = BTreeMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT document_id, content_sha256, page_count, chunk_count, chunking, indexed_at
             FROM documents ORDER BY document_id ASC",
        )
        .map_err(read_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(IndexedDocument {
                document_id: row.get(0)?,
                content_sha256: row.get(1)?,
                page_count: row.get(2)?,
                chunk_count: row.get(3)?,
                chunking: row.get(4)?,
                indexed_at: row.get(5)?,
            })
        })
        .map_err(read_err)?;
    for row in rows {
        let doc = row.map_err(read_err)?;
        documents.insert(doc.document_id.clone(), doc);
    }

    Ok(Snapshot {
        entries,
        documents,
        meta,
    })
}
