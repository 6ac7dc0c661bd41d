//! Sequential chunked file reading

use crate::memory::{BufferLease, MemoryMonitor};
use crate::{Error, Result, error::IoError};
use log::trace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Default read chunk (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Streams a file front to back in fixed-size chunks
///
/// The chunk buffer is leased from the [`MemoryMonitor`]; it and the file
/// descriptor are released when the reader is dropped.
pub struct ChunkReader {
    path: PathBuf,
    file: File,
    buffer: BufferLease,
    total_size: u64,
    offset: u64,
}

impl ChunkReader {
    pub async fn open(
        path: &Path,
        chunk_size: usize,
        monitor: &Arc<MemoryMonitor>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::invalid_parameter(
                "chunk_size",
                "must be greater than zero",
            ));
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| IoError::for_path(path, e))?;
        if !metadata.is_file() {
            return Err(IoError::not_a_file(path).into());
        }

        let file = File::open(path)
            .await
            .map_err(|e| IoError::for_path(path, e))?;
        let buffer = monitor.acquire_buffer(chunk_size)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            buffer,
            total_size: metadata.len(),
            offset: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size observed when the reader was opened
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes handed out so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn chunk_size(&self) -> usize {
        self.buffer.len()
    }

    /// Next chunk of at most `chunk_size` bytes, or `None` at end of file
    pub async fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            let read = self
                .file
                .read(&mut self.buffer[filled..])
                .await
                .map_err(|e| IoError::for_path(&self.path, e))?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        if filled == 0 {
            return Ok(None);
        }

        self.offset += filled as u64;
        trace!(
            "Read {filled} bytes from {} ({}/{})",
            self.path.display(),
            self.offset,
            self.total_size
        );
        Ok(Some(&self.buffer[..filled]))
    }
}
