//! Upload boundary and retry policy

use crate::error::Result;
use crate::types::BackoffType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Uploads sealed buffer files to a stage
#[async_trait]
pub trait StageUploader: Send + Sync {
    /// Upload a local file to `remote_path` inside the stage
    ///
    /// Returns the path of the uploaded file as stored in the stage.
    /// Uploading the same file twice to the same path must be harmless.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<String>;
}

/// Retry settings for uploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial delay for backoff, in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum delay for backoff, in milliseconds
    pub max_backoff_ms: u64,
    /// Type of backoff strategy
    pub backoff: BackoffType,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff: BackoffType::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate backoff delay for a given attempt
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let initial = Duration::from_millis(self.initial_backoff_ms);
        let delay = match self.backoff {
            BackoffType::Constant => initial,
            BackoffType::Linear => initial * (attempt + 1),
            BackoffType::Exponential => {
                let factor = 2u32.saturating_pow(attempt);
                initial * factor
            }
        };

        std::cmp::min(delay, Duration::from_millis(self.max_backoff_ms))
    }
}

/// Upload a file, retrying retryable failures according to `policy`
pub async fn upload_with_retry(
    uploader: &dyn StageUploader,
    policy: &RetryPolicy,
    local_path: &Path,
    remote_path: &str,
) -> Result<String> {
    let mut attempt = 0;
    loop {
        match uploader.upload(local_path, remote_path).await {
            Ok(uploaded) => {
                debug!("Uploaded {:?} to {uploaded}", local_path);
                return Ok(uploaded);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.calculate_backoff(attempt);
                warn!(
                    "Upload to {remote_path} failed, attempt {}/{}, retrying in {:?}: {e}",
                    attempt + 1,
                    policy.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
