//! Source documents, content hashes and parent identifiers.

use crate::error::{RagError, Result};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Blake3 digest of a document's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid content hash {s:?}: {e}"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| format!("content hash must be 32 bytes: {s:?}"))?;
        Ok(Self(array))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_string()
    }
}

/// Identifier of a ParentRecord.
///
/// Derived from the document's relative path and content hash, so the same
/// content at the same path always maps to the same parent while any edit
/// produces a fresh identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParentId(String);

impl ParentId {
    pub fn derive(relative_path: &str, hash: &ContentHash) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(relative_path.as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest.as_bytes()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ParentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One source file, read and hashed.
#[derive(Debug, Clone)]
pub struct Document {
    /// Where the bytes were read from
    pub path: PathBuf,
    /// Path relative to the data directory, `/`-separated; the stable key
    pub relative_path: String,
    /// Raw file content, kept as bytes so the hash is over exactly what is on disk
    pub content: Vec<u8>,
    pub hash: ContentHash,
}

impl Document {
    pub fn new(path: PathBuf, relative_path: impl Into<String>, content: Vec<u8>) -> Self {
        let hash = ContentHash::of(&content);
        Self {
            path,
            relative_path: relative_path.into(),
            content,
            hash,
        }
    }

    /// In-memory document, mostly for callers that already hold the text.
    pub fn from_text(relative_path: impl Into<String>, text: impl Into<String>) -> Self {
        let relative_path = relative_path.into();
        Self::new(
            PathBuf::from(&relative_path),
            relative_path,
            text.into().into_bytes(),
        )
    }

    /// The document text, or `None` when it is not UTF-8 or only whitespace.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content)
            .ok()
            .filter(|text| !text.trim().is_empty())
    }

    pub fn parent_id(&self) -> ParentId {
        ParentId::derive(&self.relative_path, &self.hash)
    }

    /// Final path component, used in chunk context prefixes and result labels.
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Discovers indexable documents under a data directory.
#[derive(Debug, Clone)]
pub struct DocumentScanner {
    extensions: Vec<String>,
    recursive: bool,
}

impl Default for DocumentScanner {
    fn default() -> Self {
        Self::new(vec!["txt".to_string()], false)
    }
}

impl DocumentScanner {
    pub fn new(extensions: Vec<String>, recursive: bool) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self {
            extensions,
            recursive,
        }
    }

    /// Check if a file should be indexed based on its name
    pub fn should_index_file(&self, file_path: &Path) -> bool {
        if let Some(filename) = file_path.file_name().and_then(|n| n.to_str()) {
            if filename.starts_with('.') {
                return false;
            }
        }

        match file_path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => self
                .extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    /// Read every indexable file under `data_dir`, sorted by relative path.
    ///
    /// A missing data directory is created and yields no documents. Hidden
    /// files and directories (including the state directory) are skipped and
    /// `.gitignore` rules are honored.
    pub async fn scan(&self, data_dir: &Path) -> Result<Vec<Document>> {
        if !tokio::fs::try_exists(data_dir).await? {
            warn!(
                "Data directory {} does not exist; creating it",
                data_dir.display()
            );
            tokio::fs::create_dir_all(data_dir).await?;
            return Ok(Vec::new());
        }

        let scanner = self.clone();
        let root = data_dir.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan_blocking(&root)).await?
    }

    fn scan_blocking(&self, root: &Path) -> Result<Vec<Document>> {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .follow_links(false);
        if !self.recursive {
            builder.max_depth(Some(1));
        }

        let mut documents = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            let is_file = entry.file_type().is_some_and(|t| t.is_file());
            if !is_file || !self.should_index_file(entry.path()) {
                continue;
            }

            let path = entry.path().to_path_buf();
            let relative_path = relative_key(root, &path)?;
            let content = std::fs::read(&path).map_err(|source| {
                warn!("Failed to read {}: {}", path.display(), source);
                RagError::Io { source }
            })?;

            debug!("Discovered {} ({} bytes)", relative_path, content.len());
            documents.push(Document::new(path, relative_path, content));
        }

        documents.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(documents)
    }
}

fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        RagError::config(format!(
            "{} is outside the data directory {}",
            path.display(),
            root.display()
        ))
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_content_hash_hex_round_trip() {
        let hash = ContentHash::of(b"quarterly earnings");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert!("abcd".parse::<ContentHash>().is_err());
        assert!("zz".parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_parent_id_tracks_path_and_content() {
        let a = Document::from_text("A.txt", "Portfolio risk overview");
        let same = Document::from_text("A.txt", "Portfolio risk overview");
        let edited = Document::from_text("A.txt", "Portfolio risk overview, revised");
        let moved = Document::from_text("B.txt", "Portfolio risk overview");

        assert_eq!(a.parent_id(), same.parent_id());
        assert_ne!(a.parent_id(), edited.parent_id());
        assert_ne!(a.parent_id(), moved.parent_id());
        assert_eq!(a.parent_id().as_str().len(), 32);
    }

    #[test]
    fn test_document_text_extraction() {
        assert_eq!(Document::from_text("a.txt", "hello").text(), Some("hello"));
        assert_eq!(Document::from_text("a.txt", "  \n\t ").text(), None);

        let binary = Document::new(PathBuf::from("b.txt"), "b.txt", vec![0xff, 0xfe, 0x00]);
        assert_eq!(binary.text(), None);
    }

    #[test]
    fn test_file_name() {
        let nested = Document::from_text("reports/2024/q1.txt", "x");
        assert_eq!(nested.file_name(), "q1.txt");
        assert_eq!(Document::from_text("top.txt", "x").file_name(), "top.txt");
    }

    #[test]
    fn test_should_index_file() {
        let scanner = DocumentScanner::new(vec![".TXT".to_string(), "md".to_string()], false);

        assert!(scanner.should_index_file(Path::new("notes.txt")));
        assert!(scanner.should_index_file(Path::new("README.md")));
        assert!(scanner.should_index_file(Path::new("upper.TXT")));

        assert!(!scanner.should_index_file(Path::new("report.pdf")));
        assert!(!scanner.should_index_file(Path::new(".hidden.txt")));
        assert!(!scanner.should_index_file(Path::new("Makefile")));
    }

    #[tokio::test]
    async fn test_scan_top_level_only_by_default() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("b.txt"), "beta")?;
        std::fs::write(dir.path().join("a.txt"), "alpha")?;
        std::fs::write(dir.path().join("skip.pdf"), "pdf")?;
        std::fs::create_dir(dir.path().join("nested"))?;
        std::fs::write(dir.path().join("nested/c.txt"), "gamma")?;
        std::fs::create_dir(dir.path().join(".finrag"))?;
        std::fs::write(dir.path().join(".finrag/state.txt"), "hidden")?;

        let flat = DocumentScanner::default().scan(dir.path()).await?;
        let names: Vec<_> = flat.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(flat[0].hash, ContentHash::of(b"alpha"));

        let deep = DocumentScanner::new(vec!["txt".to_string()], true)
            .scan(dir.path())
            .await?;
        let names: Vec<_> = deep.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "nested/c.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_scan_creates_missing_directory() -> Result<()> {
        let dir = tempdir()?;
        let data_dir = dir.path().join("data_investment");

        let documents = DocumentScanner::default().scan(&data_dir).await?;

        assert!(documents.is_empty());
        assert!(data_dir.is_dir());
        Ok(())
    }
}
