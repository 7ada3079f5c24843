use anyhow::Result;
use std::path::Path;

use super::types::*;
use crate::retrieval::change_detector::{ChangeDetector, diff};
use crate::retrieval::indexing_engine::ProcessingStats;
use crate::storage::sqlite_store::SqliteStore;
use crate::storage::{Payload, SnapshotStore};
use crate::vector::service::VectorService;

const PREVIEW_LINES: usize = 3;
const PREVIEW_CHARS: usize = 100;

/// Read-only reports over the corpus, snapshots and vector service.
pub struct StatusApi;

impl StatusApi {
    /// Short listing of a snapshot payload: `- name [hash10]` per entry, at
    /// most `max_items` of them.
    pub fn summarize_payload(payload: &Payload, max_items: usize) -> String {
        let mut items: Vec<String> = payload
            .iter()
            .take(max_items)
            .map(|(path, hash)| {
                let name = Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.clone());
                let short: String = if hash.is_empty() {
                    "no-hash".to_string()
                } else {
                    hash.chars().take(10).collect()
                };
                format!("- {name} [{short}]")
            })
            .collect();

        if items.is_empty() {
            return "No snapshot captured.".to_string();
        }
        let remaining = payload.len().saturating_sub(max_items);
        if remaining > 0 {
            items.push(format!("…and {remaining} more entries in the archive."));
        }
        items.join("\n")
    }

    /// Every matched corpus file with its indexing status, size and preview.
    pub async fn explore_corpus(
        detector: &ChangeDetector,
        store: &SqliteStore,
        snapshot_type: &str,
    ) -> Result<ExploreReport> {
        let indexed = store
            .latest_snapshot(snapshot_type)
            .await?
            .map(|s| s.payload)
            .unwrap_or_default();

        let mut entries = Vec::new();
        for (key, path) in detector.walk() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| key.clone());
            let read = tokio::fs::read(&path).await;
            let (size_kb, preview) = match read {
                Ok(bytes) => (bytes.len() as f64 / 1024.0, Some(preview_of(&bytes))),
                Err(err) => {
                    tracing::warn!("Cannot read {} for preview: {}", path.display(), err);
                    (0.0, None)
                }
            };
            entries.push(ExploreEntry {
                indexed: indexed.contains_key(&key),
                name,
                path: key,
                size_kb,
                preview,
            });
        }
        Ok(ExploreReport { entries })
    }

    /// Vector service state, snapshot coverage and pending changes.
    pub async fn index_status(
        detector: &ChangeDetector,
        store: &SqliteStore,
        vectors: &VectorService,
        snapshot_type: &str,
        processing: Option<ProcessingStats>,
    ) -> Result<IndexStatus> {
        let latest = store.latest_snapshot(snapshot_type).await?;
        let indexed = latest
            .as_ref()
            .map(|s| s.payload.clone())
            .unwrap_or_default();
        let current = detector.scan_async().await?;
        let state = vectors.state().await;

        Ok(IndexStatus {
            vector_index: state.to_string(),
            vector_index_ready: vectors.is_ready().await,
            indexed_files: indexed.len(),
            last_snapshot_date: latest.map(|s| s.date),
            pending: diff(&indexed, &current),
            processing,
        })
    }
}

/// First lines of a file, trimmed and capped.
fn preview_of(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let head: String = text
        .split_inclusive('\n')
        .take(PREVIEW_LINES)
        .collect::<String>()
        .trim()
        .to_string();
    if head.chars().count() > PREVIEW_CHARS {
        let cut: String = head.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        head
    }
}
