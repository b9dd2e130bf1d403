//! Local document store: one file per document id under a root directory.

use std::io;
use std::path::{Path, PathBuf};

use rfc_core::{validate_document_id, Error, Result};

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: &str) -> Result<PathBuf> {
        validate_document_id(id)?;
        Ok(self.root.join(id))
    }

    /// Ids of every document on disk. Names that are not valid ids
    /// (including in-progress `.part` files) are skipped.
    pub fn list(&self) -> io::Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)?.flatten() {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_document_id(name).is_ok() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn read(&self, id: &str) -> Result<String> {
        let path = self.path_of(id)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Internal(format!("reading {}: {}", path.display(), e)))
    }

    /// Write via a hidden temp file and rename, so a half-written document
    /// is never visible under its id.
    pub async fn write(&self, id: &str, contents: &str) -> Result<()> {
        let path = self.path_of(id)?;
        let tmp = self.root.join(format!(".{id}.part"));
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| Error::Internal(format!("writing {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Internal(format!("storing {}: {}", path.display(), e)))
    }
}
