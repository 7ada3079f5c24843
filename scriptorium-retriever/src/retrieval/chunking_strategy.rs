use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for chunking files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in characters
    pub size: usize,
    /// Characters shared between consecutive windows
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: 900,
            overlap: 120,
        }
    }
}

impl ChunkingConfig {
    pub fn new(size: usize, overlap: usize) -> Self {
        Self { size, overlap }
    }

    /// Distance between the starts of consecutive windows, never less than 1.
    pub fn step(&self) -> usize {
        self.size.saturating_sub(self.overlap).max(1)
    }
}

/// Split `text` into overlapping fixed-size windows.
///
/// Offsets count `char`s, so a window never splits a code point. Windows that
/// are empty or whitespace-only after trimming are skipped, but the walk keeps
/// going so later windows still appear. Trailing partial windows are included,
/// which means the tail of the text shows up in several chunks when the step is
/// smaller than the remaining length.
///
/// ```
/// use scriptorium_retriever::retrieval::chunking_strategy::chunk;
///
/// assert_eq!(chunk("abcdefghij", 5, 2), vec!["abcde", "defgh", "ghij", "j"]);
/// ```
pub fn chunk(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if size == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = ChunkingConfig::new(size, overlap).step();

    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < chars.len() {
        let end = offset.saturating_add(size).min(chars.len());
        let window: String = chars[offset..end].iter().collect();
        if !window.trim().is_empty() {
            chunks.push(window);
        }
        offset = offset.saturating_add(step);
    }
    chunks
}

/// Chunks documents with a fixed window configuration.
///
/// Chunk text is never stored; the retrieval side re-derives it through the
/// same strategy, so both sides must be built from the same [`ChunkingConfig`].
#[derive(Debug, Clone)]
pub struct ChunkingStrategy {
    config: ChunkingConfig,
}

impl ChunkingStrategy {
    /// Create a new chunking strategy with the given configuration
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Chunk a document's content
    pub fn chunk_content(&self, file_path: &Path, content: &str) -> Vec<String> {
        let chunks = chunk(content, self.config.size, self.config.overlap);

        tracing::debug!(
            "Chunked {} into {} chunks (size: {}, overlap: {})",
            file_path.display(),
            chunks.len(),
            self.config.size,
            self.config.overlap
        );

        chunks
    }
}

/// Decides which paths under a corpus root belong to the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatcher {
    extensions: Vec<String>,
    ignored_dirs: Vec<String>,
    extra_files: Vec<String>,
}

impl Default for FileMatcher {
    fn default() -> Self {
        Self::new(
            ["txt", "md"],
            [
                ".git",
                "node_modules",
                "target",
                "__pycache__",
                ".pytest_cache",
                "data",
            ],
            std::iter::empty::<&str>(),
        )
    }
}

impl FileMatcher {
    pub fn new<E, D, F>(extensions: E, ignored_dirs: D, extra_files: F) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignored_dirs: ignored_dirs
                .into_iter()
                .map(|d| d.as_ref().to_string())
                .collect(),
            extra_files: extra_files
                .into_iter()
                .map(|f| f.as_ref().to_string())
                .collect(),
        }
    }

    /// Also match `name` regardless of its extension.
    pub fn with_extra_file<S: Into<String>>(mut self, name: S) -> Self {
        let name = name.into();
        if !self.extra_files.contains(&name) {
            self.extra_files.push(name);
        }
        self
    }

    /// Whether a walk should descend into a directory with this name.
    pub fn should_descend(&self, dir_name: &str) -> bool {
        !dir_name.starts_with('.') && !self.ignored_dirs.iter().any(|d| d == dir_name)
    }

    /// Check if a file should be indexed based on its root-relative path
    pub fn should_index_file(&self, relative_path: &Path) -> bool {
        let Some(filename) = relative_path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };

        let relative = relative_path.to_string_lossy().replace('\\', "/");
        if self
            .extra_files
            .iter()
            .any(|extra| *extra == relative || *extra == filename)
        {
            return true;
        }

        if filename.starts_with('.') {
            return false;
        }

        match relative_path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_fixed_output() {
        assert_eq!(
            chunk("abcdefghij", 5, 2),
            vec!["abcde", "defgh", "ghij", "j"]
        );
    }

    #[test]
    fn test_chunk_degenerate_inputs() {
        assert!(chunk("", 5, 2).is_empty());
        assert!(chunk("   \n\t  ", 5, 2).is_empty());
        assert!(chunk("abcdef", 0, 0).is_empty());
    }

    #[test]
    fn test_overlap_not_smaller_than_size_steps_by_one() {
        assert_eq!(chunk("abcd", 2, 5), vec!["ab", "bc", "cd", "d"]);
        assert_eq!(ChunkingConfig::new(3, 3).step(), 1);
    }

    #[test]
    fn test_huge_window_is_whole_text() {
        assert_eq!(chunk("abcdef", usize::MAX, 0), vec!["abcdef"]);
        assert_eq!(chunk("abcdef", usize::MAX, 2), vec!["abcdef"]);
    }

    #[test]
    fn test_whitespace_windows_skipped_without_stopping() {
        // second window is all spaces
        let text = "abc   def";
        assert_eq!(chunk(text, 3, 0), vec!["abc", "def"]);
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let text = "héllo wörld";
        let chunks = chunk(text, 4, 0);
        assert_eq!(chunks, vec!["héll", "o wö", "rld"]);
    }

    #[test]
    fn test_chunk_count_for_long_document() {
        let text: String = "lorem ipsum ".repeat(200).chars().take(2000).collect();
        let chunks = chunk(&text, 900, 120);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 900);
        assert_eq!(chunks[2].chars().count(), 2000 - 2 * 780);
    }

    #[test]
    fn test_strategy_uses_config() {
        let strategy = ChunkingStrategy::new(ChunkingConfig::new(5, 2));
        let chunks = strategy.chunk_content(Path::new("notes.txt"), "abcdefghij");
        assert_eq!(chunks.len(), 4);
        assert_eq!(strategy.config().step(), 3);
    }

    #[test]
    fn test_should_index_file() {
        let matcher = FileMatcher::default().with_extra_file("identity.json");

        assert!(matcher.should_index_file(Path::new("moby-dick.txt")));
        assert!(matcher.should_index_file(Path::new("notes/README.md")));
        assert!(matcher.should_index_file(Path::new("SHOUTING.TXT")));
        assert!(matcher.should_index_file(Path::new("identity.json")));

        assert!(!matcher.should_index_file(Path::new("cover.png")));
        assert!(!matcher.should_index_file(Path::new("config.json")));
        assert!(!matcher.should_index_file(Path::new(".draft.md")));
        assert!(!matcher.should_index_file(Path::new("Makefile")));
    }

    #[test]
    fn test_should_descend() {
        let matcher = FileMatcher::default();
        assert!(matcher.should_descend("chapters"));
        assert!(!matcher.should_descend(".git"));
        assert!(!matcher.should_descend(".obsidian"));
        assert!(!matcher.should_descend("node_modules"));
        assert!(!matcher.should_descend("__pycache__"));
    }
}
