//! Client document storage
//!
//! Stores uploaded files under a local directory, addressed by a relative
//! path whose first segment is the owning client's ID:
//!
//! ```text
//! <root>/documents/
//! ├── 3f1c.../               # client_id
//! │   ├── 9a7e...-w2.pdf     # {uuid}-{file_name}
//! │   └── 0b42...-k1.pdf
//! └── 81d0.../
//! ```
//!
//! The first path segment is what the portal checks against a token's
//! client before serving or deleting anything.

use crate::error::CrmError;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Result of storing a document
#[derive(Debug, Clone)]
pub struct StoreResult {
    /// Relative storage path
    pub path: String,
    /// SHA256 of the bytes, hex encoded with a `sha256-` prefix
    pub hash: String,
    pub size_bytes: u64,
}

/// File-backed document storage
pub struct BlobStore {
    root_dir: PathBuf,
}

impl BlobStore {
    /// Create a blob store rooted at `<root_dir>/documents`
    pub async fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self, CrmError> {
        let root_dir = root_dir.as_ref().join("documents");
        fs::create_dir_all(&root_dir).await?;

        info!(path = %root_dir.display(), "Initialized blob store");

        Ok(Self { root_dir })
    }

    /// Compute SHA256 hash of data
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("sha256-{}", hex::encode(hasher.finalize()))
    }

    /// Storage path for a new upload: `{client_id}/{uuid}-{file_name}`
    pub fn document_path(client_id: &str, file_name: &str) -> Result<String, CrmError> {
        let file_name = sanitize_file_name(file_name)?;
        let path = format!("{}/{}-{}", client_id, uuid::Uuid::new_v4(), file_name);
        validate_relative_path(&path)?;
        Ok(path)
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, CrmError> {
        validate_relative_path(path)?;
        Ok(self.root_dir.join(path))
    }

    /// Write bytes at `path`, replacing any existing file
    pub async fn upload(&self, path: &str, data: &[u8]) -> Result<StoreResult, CrmError> {
        let full_path = self.resolve(path)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full_path, data).await?;

        let hash = Self::compute_hash(data);
        info!(path = %path, size = data.len(), hash = %hash, "Stored document");

        Ok(StoreResult {
            path: path.to_string(),
            hash,
            size_bytes: data.len() as u64,
        })
    }

    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full_path) => fs::metadata(full_path).await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>, CrmError> {
        if !self.exists(path).await {
            return Err(CrmError::NotFound(format!("document {}", path)));
        }
        Ok(fs::read(self.resolve(path)?).await?)
    }

    /// Delete a document. Deleting a missing document is not an error.
    pub async fn delete(&self, path: &str) -> Result<(), CrmError> {
        let full_path = self.resolve(path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => info!(path = %path, "Deleted document"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path, "Document already absent");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

/// Client ID encoded in a storage path (its first segment)
pub fn path_client_id(path: &str) -> Option<&str> {
    path.split('/').next().filter(|segment| !segment.is_empty())
}

/// Reject absolute paths, `..`, empty segments and anything that is not a plain relative path
pub fn validate_relative_path(path: &str) -> Result<(), CrmError> {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return Err(CrmError::InvalidInput(format!("invalid storage path '{}'", path)));
    }
    if path.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(CrmError::InvalidInput(format!("invalid storage path '{}'", path)));
    }
    let all_normal = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        return Err(CrmError::InvalidInput(format!("invalid storage path '{}'", path)));
    }
    Ok(())
}

/// Keep the last path component of a client-supplied name and drop control characters
pub fn sanitize_file_name(file_name: &str) -> Result<String, CrmError> {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(CrmError::InvalidInput("file name is required".into()));
    }
    if cleaned.len() > 255 {
        return Err(CrmError::InvalidInput("file name must be <= 255 characters".into()));
    }
    Ok(cleaned)
}
