//! Temporary-file backed buffer

use crate::error::{Error, Result};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info};

/// Append-only buffer of serialized records for one destination
#[derive(Debug)]
pub struct Buffer {
    /// Destination the records belong to
    destination: String,
    /// Batch index assigned to this buffer
    batch: u64,
    /// Size threshold in bytes
    max_bytes: u64,
    /// Directory for the backing file (system temp dir when None)
    dir: Option<PathBuf>,
    /// Backing file, created on first append
    writer: Option<BufWriter<NamedTempFile>>,
    /// Bytes written so far
    size: u64,
    /// Records written so far
    rows: u64,
    /// Whether the buffer has been sealed
    sealed: bool,
}

impl Buffer {
    /// Create an empty buffer
    pub fn new(
        destination: impl Into<String>,
        batch: u64,
        max_bytes: u64,
        dir: Option<PathBuf>,
    ) -> Self {
        Self {
            destination: destination.into(),
            batch,
            max_bytes,
            dir,
            writer: None,
            size: 0,
            rows: 0,
            sealed: false,
        }
    }

    /// Append one serialized record as a line
    ///
    /// Returns true once the buffer size is at or above the threshold. The
    /// record is always written whole, even when it alone exceeds the threshold.
    pub fn append(&mut self, serialized: &[u8]) -> Result<bool> {
        if self.sealed {
            return Err(self.sealed_error());
        }

        let writer = match self.writer {
            Some(ref mut writer) => writer,
            None => {
                info!(
                    "Creating buffer for {:?} (batch {})",
                    self.destination, self.batch
                );
                let file = self.create_file()?;
                self.writer.insert(BufWriter::new(file))
            }
        };

        writer.write_all(serialized)?;
        writer.write_all(b"\n")?;

        self.size += serialized.len() as u64 + 1;
        self.rows += 1;

        Ok(self.is_full())
    }

    /// Seal the buffer into an immutable draft
    pub fn seal(&mut self) -> Result<StagedUnitDraft> {
        if self.sealed {
            return Err(self.sealed_error());
        }

        let file = match take_flushed(&mut self.writer)? {
            Some(file) => file,
            None => self.create_file()?,
        };
        self.sealed = true;

        debug!(
            "Sealed buffer for {:?} (batch {}): {} rows, {} bytes",
            self.destination, self.batch, self.rows, self.size
        );

        Ok(StagedUnitDraft {
            destination: self.destination.clone(),
            batch: self.batch,
            rows: self.rows,
            bytes: self.size,
            path: file.into_temp_path(),
        })
    }

    /// Current size in bytes
    pub fn current_size(&self) -> u64 {
        self.size
    }

    /// Number of records appended
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Batch index of this buffer
    pub fn batch(&self) -> u64 {
        self.batch
    }

    /// Destination of this buffer
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Check if nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Check if the size threshold is reached
    pub fn is_full(&self) -> bool {
        self.size >= self.max_bytes
    }

    /// Check if the buffer is sealed
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn create_file(&self) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stage-exporter-").suffix(".jl");
        let file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }

    fn sealed_error(&self) -> Error {
        Error::BufferSealed {
            destination: self.destination.clone(),
            batch: self.batch,
        }
    }
}

/// Flush a buffered writer in place, then take its inner writer
///
/// On a failed flush the writer is left in place with its pending bytes, so
/// nothing written so far is lost and sealing can be tried again.
fn take_flushed<W: Write>(writer: &mut Option<BufWriter<W>>) -> Result<Option<W>> {
    if let Some(writer) = writer.as_mut() {
        writer.flush()?;
    }
    Ok(writer.take().map(|writer| writer.into_parts().0))
}

/// A sealed buffer awaiting upload
///
/// The backing file is deleted when the draft is dropped, unless it is
/// persisted with [`StagedUnitDraft::persist`].
#[derive(Debug)]
pub struct StagedUnitDraft {
    destination: String,
    batch: u64,
    rows: u64,
    bytes: u64,
    path: TempPath,
}

impl StagedUnitDraft {
    /// Destination of the sealed records
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Batch index
    pub fn batch(&self) -> u64 {
        self.batch
    }

    /// Number of records
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Size in bytes
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Path of the local file
    pub fn local_path(&self) -> &Path {
        &self.path
    }

    /// Keep the local file on disk and return its path
    pub fn persist(self) -> Result<PathBuf> {
        self.path.keep().map_err(|e| Error::Io(e.error))
    }
}
