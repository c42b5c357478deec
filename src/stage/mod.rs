//! Stage module
//!
//! Moves sealed buffers to the remote stage they are loaded from.
//!
//! # Overview
//!
//! - `StageUploader` - Upload boundary used by destination managers
//! - `ObjectStage` - Stage over local disk, S3, R2, GCS or Azure
//! - `RetryPolicy` - Backoff settings for transient upload failures
//! - `StagedUnit` - An uploaded, immutable sealed buffer

mod object;
mod types;
mod uploader;

pub use object::ObjectStage;
pub use types::StagedUnit;
pub use uploader::{upload_with_retry, RetryPolicy, StageUploader};
