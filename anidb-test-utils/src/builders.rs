//! Builders for test files with reproducible content

use anidb_engine::{Error, Result, error::IoError};
use std::path::{Path, PathBuf};

/// Reproducible pseudo-random content for a seed
pub fn deterministic_bytes(size: usize, seed: u64) -> Vec<u8> {
    let mut state = seed ^ 0x9e37_79b9_7f4a_7c15;
    let mut content = Vec::with_capacity(size);
    for _ in 0..size {
        content.push((state >> 24) as u8);
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
    }
    content
}

/// Creates files under a base directory and removes them on drop
pub struct TestFileBuilder {
    base_dir: PathBuf,
    generated_files: Vec<PathBuf>,
}

impl TestFileBuilder {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            generated_files: Vec::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write a file with the given content
    pub fn generate_file(&mut self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let file_path = self.base_dir.join(name);
        std::fs::write(&file_path, content)
            .map_err(|e| Error::Io(IoError::for_path(&file_path, e)))?;

        self.generated_files.push(file_path.clone());
        Ok(file_path)
    }

    /// Generate a file with reproducible content for `seed`
    pub fn generate_deterministic_file(
        &mut self,
        name: &str,
        size: usize,
        seed: u64,
    ) -> Result<PathBuf> {
        self.generate_file(name, &deterministic_bytes(size, seed))
    }

    /// Generate a zero-filled file
    pub fn generate_test_file(&mut self, name: &str, size: usize) -> Result<PathBuf> {
        self.generate_file(name, &vec![0u8; size])
    }

    pub fn generate_empty_file(&mut self, name: &str) -> Result<PathBuf> {
        self.generate_file(name, &[])
    }

    /// A path under the base directory that does not exist
    pub fn missing_file(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Clean up all generated files
    pub fn cleanup(&mut self) {
        for file_path in &self.generated_files {
            let _ = std::fs::remove_file(file_path);
        }
        self.generated_files.clear();
    }
}

impl Drop for TestFileBuilder {
    fn drop(&mut self) {
        self.cleanup();
    }
}
