use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

use crate::retrieval::change_detector::ChangeSet;
use crate::retrieval::indexing_engine::ProcessingStats;

/// Overall indexing state of the corpus
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    /// Vector service state, e.g. `ready (sqlite)`
    pub vector_index: String,
    pub vector_index_ready: bool,
    /// Files listed in the latest snapshot
    pub indexed_files: usize,
    pub last_snapshot_date: Option<NaiveDate>,
    /// Corpus changes not yet captured by a snapshot
    pub pending: ChangeSet,
    /// Counters of the current session, when an engine is running
    pub processing: Option<ProcessingStats>,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Vector index: {}", self.vector_index)?;
        writeln!(f, "Indexed files: {}", self.indexed_files)?;
        match self.last_snapshot_date {
            Some(date) => writeln!(f, "Last snapshot: {date}")?,
            None => writeln!(f, "Last snapshot: never")?,
        }
        write!(
            f,
            "Pending: {} added, {} modified, {} deleted",
            self.pending.added.len(),
            self.pending.modified.len(),
            self.pending.deleted.len()
        )?;
        if let Some(stats) = &self.processing {
            write!(
                f,
                "\nSession: {} files, {} chunks, {} degraded, {} errors",
                stats.files_processed, stats.chunks_created, stats.degraded_embeddings, stats.errors
            )?;
        }
        Ok(())
    }
}

/// One corpus file as seen by [`super::StatusApi::explore_corpus`]
#[derive(Debug, Clone, Serialize)]
pub struct ExploreEntry {
    pub name: String,
    pub path: String,
    pub indexed: bool,
    pub size_kb: f64,
    /// First three lines, capped at 100 characters; `None` if unreadable
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExploreReport {
    pub entries: Vec<ExploreEntry>,
}

impl fmt::Display for ExploreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "No corpus files found.");
        }
        write!(f, "Found {} corpus files:", self.entries.len())?;
        for entry in &self.entries {
            let status = if entry.indexed { "Indexed" } else { "Not indexed" };
            match &entry.preview {
                Some(preview) => write!(
                    f,
                    "\n\n**{}** ({:.1} KB) - {}\nPreview: {}",
                    entry.name, entry.size_kb, status, preview
                )?,
                None => write!(f, "\n\n**{}** - {} (Error reading file)", entry.name, status)?,
            }
        }
        Ok(())
    }
}
