//! On-disk attachment area.
//!
//! Layout: `<base>/<conversation id>/<category>/<file name>`.  File names are
//! generated here (`<unix millis>-<random hex>.<ext>`) and are the only thing
//! a message stores to reference its attachment.

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info};

use parley_shared::{ConversationId, UploadCategory};

use crate::error::ServiceError;

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServiceError> {
    let mut resolved = base.to_path_buf();
    for component in target.strip_prefix(base).unwrap_or(target).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServiceError::InvalidInput(
                    "Path traversal detected".to_string(),
                ));
            }
            _ => {} // RootDir, CurDir, Prefix
        }
    }
    if !resolved.starts_with(base) {
        return Err(ServiceError::InvalidInput(
            "Path traversal detected".to_string(),
        ));
    }
    Ok(resolved)
}

/// A stored file name must be a single plain path component.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.contains('\0')
}

/// Keep short alphanumeric extensions, fall back to `bin`.
pub fn sanitize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.');
    if !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext.to_ascii_lowercase()
    } else {
        "bin".to_string()
    }
}

fn generate_file_name(ext: &str) -> String {
    let suffix: [u8; 8] = rand::random();
    format!(
        "{}-{}.{}",
        Utc::now().timestamp_millis(),
        hex::encode(suffix),
        sanitize_extension(ext)
    )
}

#[derive(Debug, Clone)]
pub struct AttachmentStore {
    base_path: PathBuf,
    max_size: usize,
}

impl AttachmentStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServiceError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServiceError::Storage(format!(
                "Failed to create attachment directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        // Canonicalize once so traversal checks compare like with like.
        let base_path = base_path.canonicalize().unwrap_or(base_path);

        info!(path = %base_path.display(), "Attachment store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Reject content that must never reach the disk.
    pub fn validate(&self, data: &[u8]) -> Result<(), ServiceError> {
        if data.is_empty() {
            return Err(ServiceError::InvalidInput("Empty attachment".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServiceError::InvalidInput(format!(
                "Attachment too large: {} bytes (max {})",
                data.len(),
                self.max_size
            )));
        }
        Ok(())
    }

    /// Write a new attachment and return its generated file name.
    pub async fn store(
        &self,
        conversation: &ConversationId,
        category: UploadCategory,
        ext: &str,
        data: &[u8],
    ) -> Result<String, ServiceError> {
        self.validate(data)?;

        let dir = self.category_dir(conversation, category)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            ServiceError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let name = generate_file_name(ext);
        let path = self.file_path(conversation, category, &name)?;
        fs::write(&path, data).await.map_err(|e| {
            ServiceError::Storage(format!("Failed to write attachment {}: {}", name, e))
        })?;

        debug!(
            conversation = %conversation,
            %category,
            file = %name,
            size = data.len(),
            "Stored attachment"
        );
        Ok(name)
    }

    pub async fn read(
        &self,
        conversation: &ConversationId,
        category: UploadCategory,
        name: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        let path = self.file_path(conversation, category, name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::NotFound(format!("attachment {name}")))
            }
            Err(e) => Err(ServiceError::Storage(format!(
                "Failed to read attachment {}: {}",
                name, e
            ))),
        }
    }

    /// Whether `name` resolves to an existing file.  Names that are not a
    /// plain file name never resolve.
    pub async fn exists(
        &self,
        conversation: &ConversationId,
        category: UploadCategory,
        name: &str,
    ) -> bool {
        let Ok(path) = self.file_path(conversation, category, name) else {
            return false;
        };
        matches!(fs::metadata(&path).await, Ok(meta) if meta.is_file())
    }

    /// Delete one attachment.  A missing file is not an error; returns
    /// whether something was removed.
    pub async fn delete(
        &self,
        conversation: &ConversationId,
        category: UploadCategory,
        name: &str,
    ) -> Result<bool, ServiceError> {
        let path = self.file_path(conversation, category, name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(conversation = %conversation, %category, file = %name, "Deleted attachment");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ServiceError::Storage(format!(
                "Failed to delete attachment {}: {}",
                name, e
            ))),
        }
    }

    /// File names present in one category directory.
    pub async fn list(
        &self,
        conversation: &ConversationId,
        category: UploadCategory,
    ) -> Result<Vec<String>, ServiceError> {
        let dir = self.category_dir(conversation, category)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ServiceError::Storage(format!(
                    "Failed to list {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ServiceError::Storage(format!("Failed to read directory entry: {}", e))
        })? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Conversation directories present under the base path.  Entries whose
    /// name is not a valid conversation id are skipped.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationId>, ServiceError> {
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| ServiceError::Storage(format!("Failed to list attachments: {}", e)))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ServiceError::Storage(format!("Failed to read directory entry: {}", e))
        })? {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(id) = ConversationId::parse(name) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Remove every attachment of a conversation.  Returns whether the
    /// directory existed.
    pub async fn remove_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<bool, ServiceError> {
        let dir = self.conversation_dir(conversation)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(conversation = %conversation, "Removed attachment directory");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ServiceError::Storage(format!(
                "Failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    fn conversation_dir(&self, conversation: &ConversationId) -> Result<PathBuf, ServiceError> {
        let raw = self.base_path.join(conversation.as_str());
        ensure_within(&self.base_path, &raw)
    }

    fn category_dir(
        &self,
        conversation: &ConversationId,
        category: UploadCategory,
    ) -> Result<PathBuf, ServiceError> {
        let raw = self
            .base_path
            .join(conversation.as_str())
            .join(category.as_str());
        ensure_within(&self.base_path, &raw)
    }

    /// Safe path of one attachment that validates against traversal.
    fn file_path(
        &self,
        conversation: &ConversationId,
        category: UploadCategory,
        name: &str,
    ) -> Result<PathBuf, ServiceError> {
        if !is_plain_file_name(name) {
            return Err(ServiceError::InvalidInput(
                "Path traversal detected".to_string(),
            ));
        }
        let raw = self
            .base_path
            .join(conversation.as_str())
            .join(category.as_str())
            .join(name);
        ensure_within(&self.base_path, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::UserId;
    use tempfile::TempDir;

    async fn test_store() -> (AttachmentStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = AttachmentStore::new(dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        (store, dir)
    }

    fn conv() -> ConversationId {
        ConversationId::between(&UserId::new("alice").unwrap(), &UserId::new("bob").unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_and_read() {
        let (store, _dir) = test_store().await;
        let name = store
            .store(&conv(), UploadCategory::Pictures, "PNG", b"image-bytes")
            .await
            .unwrap();

        assert!(name.ends_with(".png"));
        assert!(store.exists(&conv(), UploadCategory::Pictures, &name).await);
        assert!(!store.exists(&conv(), UploadCategory::Videos, &name).await);
        let data = store
            .read(&conv(), UploadCategory::Pictures, &name)
            .await
            .unwrap();
        assert_eq!(data, b"image-bytes");
    }

    #[tokio::test]
    async fn test_names_do_not_collide() {
        let (store, _dir) = test_store().await;
        let a = store
            .store(&conv(), UploadCategory::Voice, "ogg", b"1")
            .await
            .unwrap();
        let b = store
            .store(&conv(), UploadCategory::Voice, "ogg", b"2")
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(
            store.list(&conv(), UploadCategory::Voice).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_error() {
        let (store, _dir) = test_store().await;
        let name = store
            .store(&conv(), UploadCategory::Documents, "pdf", b"doc")
            .await
            .unwrap();

        assert!(store
            .delete(&conv(), UploadCategory::Documents, &name)
            .await
            .unwrap());
        assert!(!store
            .delete(&conv(), UploadCategory::Documents, &name)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_validation() {
        let (store, _dir) = test_store().await;
        assert!(store.validate(b"").is_err());
        assert!(store.validate(&vec![0u8; 1025]).is_err());
        assert!(store
            .store(&conv(), UploadCategory::Pictures, "png", &vec![0u8; 2048])
            .await
            .is_err());
        assert!(store.list_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_traversal_names_never_resolve() {
        let (store, _dir) = test_store().await;
        assert!(!store.exists(&conv(), UploadCategory::Pictures, "../x").await);
        assert!(!store.exists(&conv(), UploadCategory::Pictures, "").await);
        assert!(store
            .delete(&conv(), UploadCategory::Pictures, "../../etc/passwd")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_remove_conversation() {
        let (store, _dir) = test_store().await;
        store
            .store(&conv(), UploadCategory::Videos, "mp4", b"v")
            .await
            .unwrap();
        assert_eq!(store.list_conversations().await.unwrap(), vec![conv()]);

        assert!(store.remove_conversation(&conv()).await.unwrap());
        assert!(!store.remove_conversation(&conv()).await.unwrap());
        assert!(store.list(&conv(), UploadCategory::Videos).await.unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_extension() {
        assert_eq!(sanitize_extension(".JPG"), "jpg");
        assert_eq!(sanitize_extension("tar.gz"), "bin");
        assert_eq!(sanitize_extension(""), "bin");
        assert_eq!(sanitize_extension("averyverylongext"), "bin");
    }
}
