//! Loads a directory of markdown documentation into the vector index.

use crate::error::IndexError;
use crate::index::{Chunk, DocIndex, Embedder};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const CHUNK_SIZE: usize = 2000;
pub const CHUNK_OVERLAP: usize = 50;
const EMBED_BATCH: usize = 32;

pub struct Document {
    pub path: PathBuf,
    pub text: String,
}

/// Every `.md`/`.mdx` file below `dir`, in a stable order.
pub fn collect_documents(dir: &Path) -> Result<Vec<Document>, IndexError> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_markdown = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("mdx"));
        if !is_markdown {
            continue;
        }
        let text = std::fs::read_to_string(entry.path())?;
        let path = entry.path().strip_prefix(dir).unwrap_or(entry.path()).to_path_buf();
        documents.push(Document { path, text });
    }
    Ok(documents)
}

/// Splits markdown at headings (ignoring `#` inside code fences), then cuts
/// oversized sections into overlapping windows of at most `chunk_size` chars.
pub fn split_markdown(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        if !in_fence && trimmed.starts_with('#') && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }

    sections
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .flat_map(|s| window(s, chunk_size, overlap))
        .collect()
}

fn window(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if size == 0 || chars.len() <= size {
        return vec![text.to_string()];
    }
    let step = size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

pub fn chunk_documents(documents: &[Document]) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| {
            let source = doc.path.to_string_lossy().into_owned();
            split_markdown(&doc.text, CHUNK_SIZE, CHUNK_OVERLAP)
                .into_iter()
                .map(move |text| Chunk {
                    id: uuid::Uuid::new_v4().to_string(),
                    text,
                    source: source.clone(),
                })
        })
        .collect()
}

/// Embeds and upserts every document under `dir`. Returns the number of
/// chunks written.
pub async fn ingest(dir: &Path, embedder: &Embedder, index: &DocIndex, dim: u64) -> Result<usize, IndexError> {
    info!("Ingesting documentation from {}", dir.display());
    let documents = collect_documents(dir)?;
    let chunks = chunk_documents(&documents);
    info!("{} document(s) split into {} chunk(s)", documents.len(), chunks.len());

    index.ensure_collection(dim).await?;

    for (i, batch) in chunks.chunks(EMBED_BATCH).enumerate() {
        let texts = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed(texts).await?;
        index.upsert(batch, embeddings).await?;
        debug!("Indexed batch {} ({} chunks)", i + 1, batch.len());
    }

    info!("Ingestion into {} complete", index.collection());
    Ok(chunks.len())
}
