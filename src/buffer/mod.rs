//! Local record buffers
//!
//! Each destination accumulates serialized records in a temporary file until
//! the file reaches the configured size, at which point it is sealed into a
//! [`StagedUnitDraft`] ready for upload.
//!
//! # Overview
//!
//! - `Buffer` - Append-only, size-tracked newline-delimited JSON file
//! - `StagedUnitDraft` - Immutable sealed buffer awaiting upload

mod local;

pub use local::{Buffer, StagedUnitDraft};
