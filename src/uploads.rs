// expense-report-service/src/uploads.rs

use crate::error::{ReportError, Result};
use crate::models::Attachment;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_MIME_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/heic",
    "image/heif",
    "application/pdf",
];

/// Shared upload directory. Files get collision-free `<uuid><ext>` names so
/// concurrent submissions never overwrite each other.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn store(&self, original_filename: &str, mime_type: &str, bytes: &[u8]) -> Result<Attachment> {
        let essence = mime_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        if !ALLOWED_MIME_TYPES.contains(&essence.as_str()) {
            return Err(ReportError::UnsupportedMediaType(format!(
                "{original_filename} ({mime_type})"
            )));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(ReportError::AttachmentTooLarge {
                name: original_filename.to_string(),
                size: bytes.len(),
            });
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(stored_name(original_filename));
        let (dir, target, data) = (self.dir.clone(), path.clone(), bytes.to_vec());
        tokio::task::spawn_blocking(move || write_upload(&dir, &target, &data))
            .await
            .map_err(|e| ReportError::GenerationFailed(format!("upload writer task failed: {e}")))??;

        debug!(
            file = %original_filename,
            stored_as = %path.display(),
            size_bytes = bytes.len(),
            "Stored upload"
        );
        Ok(Attachment::new(path, original_filename, essence))
    }

    /// Best effort; a file that is already gone is not an error.
    pub async fn remove_all(&self, attachments: &[Attachment]) {
        for attachment in attachments {
            match tokio::fs::remove_file(attachment.path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %attachment.path().display(),
                    error = %e,
                    "Could not remove upload"
                ),
            }
        }
    }
}

/// Staged under a temporary name and moved into place, so a failed write
/// leaves nothing behind in the upload directory.
fn write_upload(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut staged = tempfile::Builder::new().prefix(".upload-").tempfile_in(dir)?;
    staged.write_all(bytes)?;
    staged.flush()?;
    staged.persist_noclobber(target).map_err(|e| e.error)?;
    Ok(())
}

/// Keeps the original extension, lowercased, so the stored name still says
/// what the file is.
fn stored_name(original_filename: &str) -> String {
    let extension = Path::new(original_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{}{}", Uuid::new_v4(), extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_under_unique_names_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path());

        let a = store.store("Kvitto.JPG", "image/jpeg", b"one").await.unwrap();
        let b = store.store("Kvitto.JPG", "image/jpeg", b"two").await.unwrap();

        assert_ne!(a.storage_path, b.storage_path);
        assert_eq!(a.storage_path.extension().unwrap(), "jpg");
        assert_eq!(a.original_filename, "Kvitto.JPG");
        assert_eq!(std::fs::read(&b.storage_path).unwrap(), b"two");
    }

    #[tokio::test]
    async fn rejects_disallowed_types_and_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path());

        let err = store.store("virus.exe", "application/x-msdownload", b"MZ").await.unwrap_err();
        assert_eq!(err.error_type(), "unsupported_media_type");

        let big = vec![0u8; MAX_UPLOAD_BYTES + 1];
        let err = store.store("stor.pdf", "application/pdf", &big).await.unwrap_err();
        assert!(matches!(err, ReportError::AttachmentTooLarge { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn remove_all_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path());
        let stored = store.store("a.png", "image/png", b"png").await.unwrap();
        let ghost = Attachment::new(dir.path().join("ghost.png"), "ghost.png", "image/png");

        store.remove_all(&[stored.clone(), ghost]).await;
        assert!(!stored.storage_path.exists());
    }

    #[test]
    fn failed_write_leaves_no_partial_upload() {
        let dir = tempfile::tempdir().unwrap();
        let unreachable = dir.path().join("saknas").join("kvitto.pdf");

        assert!(write_upload(dir.path(), &unreachable, b"%PDF-1.7").is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn existing_upload_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("kvitto.pdf");
        std::fs::write(&target, b"original").unwrap();

        assert!(write_upload(dir.path(), &target, b"ny").is_err());
        assert_eq!(std::fs::read(&target).unwrap(), b"original");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn odd_extensions_are_dropped() {
        assert!(!stored_name("noext").contains('.'));
        assert!(!stored_name("a.p d f").contains(' '));
        assert!(stored_name("scan.PDF").ends_with(".pdf"));
    }
}
