//! Object storage stage (local, S3, R2, GCS, Azure)

use super::uploader::StageUploader;
use crate::error::{Error, Result};
use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::buffered::BufWriter;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Stage backed by an object store, parsed from a URL
#[derive(Debug, Clone)]
pub struct ObjectStage {
    /// The object store implementation
    store: Arc<dyn ObjectStore>,
    /// Base path prefix within the bucket/container
    prefix: String,
    /// URL scheme (s3, r2, gs, az, file)
    scheme: String,
    /// Bucket or container name, or the absolute directory for local stages
    root: String,
}

impl ObjectStage {
    /// Parse a stage URL and create the matching object store
    ///
    /// Supported formats:
    /// - `s3://bucket/path/` - AWS S3
    /// - `r2://bucket/path/` - Cloudflare R2 (S3-compatible)
    /// - `gs://bucket/path/` - Google Cloud Storage
    /// - `az://container/path/` - Azure Blob Storage
    /// - `/local/path/`, `./path/` or `file:///path/` - Local filesystem
    pub fn parse(url: &str) -> Result<Self> {
        if url.starts_with("s3://") {
            Self::parse_s3(url, false)
        } else if url.starts_with("r2://") {
            Self::parse_s3(url, true)
        } else if url.starts_with("gs://") {
            Self::parse_gcs(url)
        } else if url.starts_with("az://") {
            Self::parse_azure(url)
        } else {
            Self::parse_local(url)
        }
    }

    fn parse_s3(url: &str, is_r2: bool) -> Result<Self> {
        let scheme = if is_r2 { "r2" } else { "s3" };
        let (bucket, prefix) = split_bucket(url, scheme)?;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

        // AWS_ENDPOINT is read by from_env(); R2 also honours its own variable
        if is_r2 {
            if let Ok(endpoint) = std::env::var("R2_ENDPOINT_URL") {
                builder = builder.with_endpoint(endpoint);
            }
        }

        let store = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to create {scheme} client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            prefix,
            scheme: scheme.to_string(),
            root: bucket.to_string(),
        })
    }

    fn parse_gcs(url: &str) -> Result<Self> {
        let (bucket, prefix) = split_bucket(url, "gs")?;

        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| Error::config(format!("Failed to create GCS client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            prefix,
            scheme: "gs".to_string(),
            root: bucket.to_string(),
        })
    }

    fn parse_azure(url: &str) -> Result<Self> {
        let (container, prefix) = split_bucket(url, "az")?;

        let store = MicrosoftAzureBuilder::from_env()
            .with_container_name(container)
            .build()
            .map_err(|e| Error::config(format!("Failed to create Azure client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            prefix,
            scheme: "az".to_string(),
            root: container.to_string(),
        })
    }

    fn parse_local(path: &str) -> Result<Self> {
        let path = path.strip_prefix("file://").unwrap_or(path);

        std::fs::create_dir_all(path)
            .map_err(|e| Error::config(format!("Failed to create directory {path}: {e}")))?;
        let root = std::fs::canonicalize(path)
            .map_err(|e| Error::config(format!("Failed to resolve directory {path}: {e}")))?;

        let store = LocalFileSystem::new_with_prefix(&root)
            .map_err(|e| Error::config(format!("Failed to create local store: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            prefix: String::new(),
            scheme: "file".to_string(),
            root: root.to_string_lossy().into_owned(),
        })
    }

    /// Check if this is a cloud stage (not local)
    pub fn is_cloud(&self) -> bool {
        self.scheme != "file"
    }

    /// Get the scheme (s3, r2, gs, az, file)
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Remove a staged file; a missing file is not an error
    pub async fn delete(&self, remote_path: &str) -> Result<()> {
        let path = self.object_path(remote_path);
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::stage(format!("Failed to delete {path}: {e}"))),
        }
    }

    /// Location of a staged file as read by the warehouse
    ///
    /// Local stages yield an absolute path, cloud stages a `scheme://bucket/key` URL.
    pub fn location(&self, remote_path: &str) -> String {
        let path = self.object_path(remote_path);
        match self.scheme.as_str() {
            "file" => format!("{}/{path}", self.root.trim_end_matches('/')),
            // R2 is read through the S3 protocol
            "r2" => format!("s3://{}/{path}", self.root),
            scheme => format!("{scheme}://{}/{path}", self.root),
        }
    }

    /// Path of a staged file relative to the store root
    fn object_path(&self, remote_path: &str) -> ObjectPath {
        let remote_path = remote_path.trim_start_matches('/');
        if self.prefix.is_empty() {
            ObjectPath::from(remote_path)
        } else {
            ObjectPath::from(format!(
                "{}/{remote_path}",
                self.prefix.trim_end_matches('/')
            ))
        }
    }
}

#[async_trait]
impl StageUploader for ObjectStage {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<String> {
        let path = self.object_path(remote_path);

        let mut file = tokio::fs::File::open(local_path).await.map_err(|e| {
            Error::upload(path.to_string(), format!("Failed to open {local_path:?}: {e}"))
        })?;

        let mut writer = BufWriter::new(Arc::clone(&self.store), path.clone());
        tokio::io::copy(&mut file, &mut writer)
            .await
            .map_err(|e| Error::upload(path.to_string(), e.to_string()))?;
        writer
            .shutdown()
            .await
            .map_err(|e| Error::upload(path.to_string(), e.to_string()))?;

        debug!("Wrote {}://{}/{path}", self.scheme, self.root);
        Ok(remote_path.to_string())
    }
}

/// Split `scheme://bucket/prefix` into bucket and prefix
fn split_bucket<'a>(url: &'a str, scheme: &str) -> Result<(&'a str, String)> {
    let without_scheme = url
        .strip_prefix(&format!("{scheme}://"))
        .ok_or_else(|| Error::config(format!("Invalid {scheme} URL: {url}")))?;

    let (bucket, prefix) = match without_scheme.find('/') {
        Some(idx) => (
            &without_scheme[..idx],
            without_scheme[idx + 1..].to_string(),
        ),
        None => (without_scheme, String::new()),
    };

    if bucket.is_empty() {
        return Err(Error::config(format!("Missing bucket in {scheme} URL: {url}")));
    }

    Ok((bucket, prefix))
}
