//! Image storage collaborator used for review photos.
//!
//! Objects live in the S3/MinIO bucket; the object key doubles as the
//! public id handed back to callers for later deletion.

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::storage::StorageClient;

/// One file received from a client, ready to be stored.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub file_name: Option<String>,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResult {
    pub url: String,
    pub public_id: String,
}

#[async_trait]
pub trait ImageStorage: Send + Sync {
    async fn upload(&self, file: UploadItem) -> anyhow::Result<ImageResult>;
    async fn upload_cropped(
        &self,
        file: UploadItem,
        width: u32,
        height: u32,
    ) -> anyhow::Result<ImageResult>;
    async fn delete(&self, public_id: &str) -> anyhow::Result<()>;
}

pub struct S3ImageStorage {
    storage: Arc<dyn StorageClient>,
    prefix: String,
    public_base_url: String,
}

impl S3ImageStorage {
    pub fn new(storage: Arc<dyn StorageClient>, prefix: &str, public_base_url: &str) -> Self {
        Self {
            storage,
            prefix: prefix.trim_matches('/').to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn object_key(&self, content_type: &str, suffix: Option<&str>) -> String {
        let ext = ext_from_mime(content_type).unwrap_or("bin");
        match suffix {
            Some(s) => format!("{}/{}-{}.{}", self.prefix, Uuid::new_v4(), s, ext),
            None => format!("{}/{}.{}", self.prefix, Uuid::new_v4(), ext),
        }
    }

    async fn put(
        &self,
        key: String,
        file: UploadItem,
        metadata: HashMap<String, String>,
    ) -> anyhow::Result<ImageResult> {
        self.storage
            .put_object(&key, file.body, &file.content_type, metadata)
            .await
            .with_context(|| format!("put_object {}", key))?;
        Ok(ImageResult {
            url: format!("{}/{}", self.public_base_url, key),
            public_id: key,
        })
    }
}

#[async_trait]
impl ImageStorage for S3ImageStorage {
    async fn upload(&self, file: UploadItem) -> anyhow::Result<ImageResult> {
        let key = self.object_key(&file.content_type, None);
        self.put(key, file, HashMap::new()).await
    }

    async fn upload_cropped(
        &self,
        file: UploadItem,
        width: u32,
        height: u32,
    ) -> anyhow::Result<ImageResult> {
        anyhow::ensure!(width > 0 && height > 0, "crop box must be non-empty");
        let key = self.object_key(&file.content_type, Some(&format!("{width}x{height}")));
        let metadata = HashMap::from([
            ("crop-width".to_string(), width.to_string()),
            ("crop-height".to_string(), height.to_string()),
        ]);
        self.put(key, file, metadata).await
    }

    async fn delete(&self, public_id: &str) -> anyhow::Result<()> {
        self.storage
            .delete_object(public_id)
            .await
            .with_context(|| format!("delete_object {}", public_id))
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod image_tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStorage {
        puts: Mutex<Vec<(String, HashMap<String, String>)>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StorageClient for RecordingStorage {
        async fn put_object(
            &self,
            key: &str,
            _body: Bytes,
            _ct: &str,
            metadata: HashMap<String, String>,
        ) -> anyhow::Result<()> {
            self.puts.lock().unwrap().push((key.to_string(), metadata));
            Ok(())
        }
        async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
            self.deletes.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    fn jpeg() -> UploadItem {
        UploadItem {
            file_name: Some("dinner.jpg".into()),
            content_type: "image/jpeg".into(),
            body: Bytes::from_static(b"\xff\xd8\xff"),
        }
    }

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn upload_returns_public_url_and_key() {
        let storage = Arc::new(RecordingStorage::default());
        let images = S3ImageStorage::new(storage.clone(), "/reviews/", "https://cdn.local/b/");

        let res = images.upload(jpeg()).await.unwrap();
        assert!(res.public_id.starts_with("reviews/"));
        assert!(res.public_id.ends_with(".jpg"));
        assert_eq!(res.url, format!("https://cdn.local/b/{}", res.public_id));
        assert_eq!(storage.puts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upload_cropped_records_crop_box() {
        let storage = Arc::new(RecordingStorage::default());
        let images = S3ImageStorage::new(storage.clone(), "meals", "https://cdn.local");

        let res = images.upload_cropped(jpeg(), 400, 300).await.unwrap();
        assert!(res.public_id.contains("-400x300."));
        let puts = storage.puts.lock().unwrap();
        assert_eq!(puts[0].1.get("crop-width").map(String::as_str), Some("400"));
        assert_eq!(puts[0].1.get("crop-height").map(String::as_str), Some("300"));
    }

    #[tokio::test]
    async fn upload_cropped_rejects_empty_box() {
        let storage = Arc::new(RecordingStorage::default());
        let images = S3ImageStorage::new(storage, "meals", "https://cdn.local");
        assert!(images.upload_cropped(jpeg(), 0, 300).await.is_err());
    }

    #[tokio::test]
    async fn delete_uses_public_id_as_key() {
        let storage = Arc::new(RecordingStorage::default());
        let images = S3ImageStorage::new(storage.clone(), "reviews", "https://cdn.local");
        images.delete("reviews/abc.png").await.unwrap();
        assert_eq!(*storage.deletes.lock().unwrap(), vec!["reviews/abc.png".to_string()]);
    }
}
