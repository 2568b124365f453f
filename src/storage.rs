//! Attachment object storage.
//!
//! Objects live under `<root>/attachments/<occurrence_id>/<file_name>`, the
//! object key being the part after the bucket directory.

use std::{
    fs::{copy, create_dir_all, read, remove_file, rename},
    future::Future,
    path::{Component, Path, PathBuf},
};

use crate::error::{Error, Result};

pub const ATTACHMENTS_BUCKET: &str = "attachments";

#[derive(Debug, Clone)]
pub struct AttachmentStorage {
    root: PathBuf,
    public_base_url: String,
}

impl AttachmentStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        AttachmentStorage {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(ATTACHMENTS_BUCKET)
    }

    /// Creates the bucket directory. Returns `true` when it did not exist yet.
    pub fn initialize(&self) -> Result<bool> {
        let dir = self.bucket_dir();
        if dir.is_dir() {
            return Ok(false);
        }
        create_dir_all(&dir)?;
        tracing::info!(path = %dir.display(), "created attachments bucket");
        Ok(true)
    }

    /// Moves an uploaded temp file into the bucket under `key`. Never overwrites.
    pub fn store(&self, source: &Path, key: &str) -> Result<String> {
        let destination = self.resolve(key)?;
        if destination.exists() {
            return Err(Error::Upstream("STORAGE_OBJECT_EXISTS".to_string()));
        }
        if let Some(parent) = destination.parent() {
            create_dir_all(parent)?;
        }

        // rename fails across filesystems; fall back to a copy
        if rename(source, &destination).is_err() {
            copy(source, &destination)?;
        }
        Ok(key.to_string())
    }

    /// Stores `source` under `key`, then runs `record` with the stored key.
    /// When `record` fails the object is removed again and its error returned.
    pub async fn store_then<T, F, Fut>(&self, source: &Path, key: &str, record: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = self.store(source, key)?;
        match record(key.clone()).await {
            Ok(value) => Ok(value),
            Err(error) => {
                if let Err(cleanup) = self.remove(&key) {
                    tracing::warn!(%key, error = %cleanup, "failed to remove orphaned attachment object");
                }
                Err(error)
            }
        }
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        remove_file(self.resolve(key)?)?;
        Ok(())
    }

    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        read(path).map_err(|_| Error::not_found("ATTACHMENT_OBJECT"))
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/files/{ATTACHMENTS_BUCKET}/{key}", self.public_base_url)
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let key = Path::new(key);
        let is_plain = key
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.as_os_str().is_empty() || !is_plain {
            return Err(Error::Validation("INVALID_STORAGE_KEY".to_string()));
        }
        Ok(self.bucket_dir().join(key))
    }
}

/// Builds the object key for an upload: `<occurrence>/<millis>-<stem>.<ext>`.
pub fn object_key(occurrence_id: &str, original_name: &str, millis: i64) -> String {
    let name = Path::new(original_name)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload");
    let stem = Path::new(name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("upload");

    match Path::new(name).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{occurrence_id}/{millis}-{stem}.{ext}"),
        None => format!("{occurrence_id}/{millis}-{stem}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;

    #[test]
    fn initializes_bucket_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "http://localhost:8000/");

        assert!(storage.initialize().unwrap());
        assert!(!storage.initialize().unwrap());
        assert!(dir.path().join("attachments").is_dir());
    }

    #[test]
    fn stores_reads_and_removes_objects() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path().join("files"), "http://localhost:8000");
        let upload = dir.path().join("upload.tmp");
        write(&upload, b"flight data").unwrap();

        let key = storage.store(&upload, "occ-1/1700000000000-fdr.csv").unwrap();
        assert_eq!(storage.read(&key).unwrap(), b"flight data");
        assert_eq!(
            storage.public_url(&key),
            "http://localhost:8000/files/attachments/occ-1/1700000000000-fdr.csv"
        );

        storage.remove(&key).unwrap();
        assert!(matches!(storage.read(&key), Err(Error::NotFound(_))));
    }

    #[actix_web::test]
    async fn removes_the_object_when_recording_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "http://localhost:8000");
        let upload = dir.path().join("upload.tmp");
        write(&upload, b"cvr transcript").unwrap();

        let result: Result<()> = storage
            .store_then(&upload, "occ-1/1700000000000-cvr.txt", |key| async move {
                assert_eq!(key, "occ-1/1700000000000-cvr.txt");
                Err(Error::Upstream("metadata write failed".to_string()))
            })
            .await;
        assert!(matches!(result, Err(Error::Upstream(_))));
        assert!(!storage.bucket_dir().join("occ-1/1700000000000-cvr.txt").exists());

        write(&upload, b"cvr transcript").unwrap();
        let url = storage
            .store_then(&upload, "occ-1/1700000000001-cvr.txt", |key| {
                let url = storage.public_url(&key);
                async move { Ok(url) }
            })
            .await
            .unwrap();
        assert!(url.ends_with("occ-1/1700000000001-cvr.txt"));
        assert_eq!(
            storage.read("occ-1/1700000000001-cvr.txt").unwrap(),
            b"cvr transcript"
        );
    }

    #[test]
    fn refuses_to_overwrite_existing_objects() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AttachmentStorage::new(dir.path(), "");
        let first = dir.path().join("a.tmp");
        let second = dir.path().join("b.tmp");
        write(&first, b"a").unwrap();
        write(&second, b"b").unwrap();

        storage.store(&first, "occ/report.pdf").unwrap();
        assert!(storage.store(&second, "occ/report.pdf").is_err());
        assert_eq!(storage.read("occ/report.pdf").unwrap(), b"a");
    }

    #[test]
    fn rejects_keys_escaping_the_bucket() {
        let storage = AttachmentStorage::new("/tmp/unused", "");
        assert!(matches!(storage.read("../secrets"), Err(Error::Validation(_))));
        assert!(matches!(storage.read("/etc/passwd"), Err(Error::Validation(_))));
        assert!(matches!(storage.remove(""), Err(Error::Validation(_))));
    }

    #[test]
    fn builds_object_keys_from_upload_names() {
        assert_eq!(
            object_key("64f0", "photo.final.JPG", 42),
            "64f0/42-photo.final.JPG"
        );
        assert_eq!(object_key("64f0", "../../etc/notes", 7), "64f0/7-notes");
        assert_eq!(object_key("64f0", "", 7), "64f0/7-upload");
    }
}
