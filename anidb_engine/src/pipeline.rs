//! Single-pass multi-algorithm hashing

use crate::cancel::CancelToken;
use crate::hashing::{Ed2kVariant, HashAlgorithm, HashRecord, StreamingHasher};
use crate::progress::{ProgressProvider, ProgressUpdate};
use crate::reader::ChunkReader;
use crate::{Error, Result};
use log::trace;

/// Feeds every configured hasher from the same chunks
pub struct HashPipeline {
    hashers: Vec<(HashAlgorithm, Box<dyn StreamingHasher>)>,
    bytes_processed: u64,
}

impl std::fmt::Debug for HashPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashPipeline")
            .field("algorithms", &self.algorithms())
            .field("bytes_processed", &self.bytes_processed)
            .finish()
    }
}

impl HashPipeline {
    pub fn new(algorithms: &[HashAlgorithm]) -> Result<Self> {
        Self::with_ed2k_variant(algorithms, Ed2kVariant::default())
    }

    /// Duplicates collapse onto their first position
    pub fn with_ed2k_variant(algorithms: &[HashAlgorithm], variant: Ed2kVariant) -> Result<Self> {
        if algorithms.is_empty() {
            return Err(Error::invalid_parameter(
                "algorithms",
                "at least one algorithm is required",
            ));
        }

        let mut hashers: Vec<(HashAlgorithm, Box<dyn StreamingHasher>)> =
            Vec::with_capacity(algorithms.len());
        for &algorithm in algorithms {
            if hashers.iter().all(|(existing, _)| *existing != algorithm) {
                hashers.push((algorithm, algorithm.create_hasher(variant)));
            }
        }

        Ok(Self {
            hashers,
            bytes_processed: 0,
        })
    }

    /// Configured algorithms in order
    pub fn algorithms(&self) -> Vec<HashAlgorithm> {
        self.hashers.iter().map(|(algorithm, _)| *algorithm).collect()
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(data);
        }
        self.bytes_processed += data.len() as u64;
    }

    pub fn finalize(self) -> Vec<HashRecord> {
        self.hashers
            .into_iter()
            .map(|(algorithm, hasher)| HashRecord::new(algorithm, hasher.finalize()))
            .collect()
    }

    /// Hash a reader to its end
    ///
    /// Cancellation is checked before each chunk. Progress is reported at
    /// most once per integer percentage, ending with exactly one 100% update.
    pub async fn run(
        mut self,
        reader: &mut ChunkReader,
        cancel: &CancelToken,
        progress: &dyn ProgressProvider,
    ) -> Result<Vec<HashRecord>> {
        let total = reader.total_size();
        let mut last_percent = None;

        loop {
            if cancel.is_cancelled() {
                trace!("Hashing of {} cancelled", reader.path().display());
                return Err(Error::cancelled());
            }

            let Some(chunk) = reader.next_chunk().await? else {
                break;
            };
            self.update(chunk);

            let percent = whole_percent(reader.offset(), total);
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                progress.report(ProgressUpdate::FileProgress {
                    path: reader.path().to_path_buf(),
                    bytes_processed: reader.offset(),
                    total_bytes: total.max(reader.offset()),
                });
            }
        }

        if last_percent != Some(100) {
            progress.report(ProgressUpdate::FileProgress {
                path: reader.path().to_path_buf(),
                bytes_processed: reader.offset(),
                total_bytes: reader.offset(),
            });
        }

        Ok(self.finalize())
    }
}

fn whole_percent(done: u64, total: u64) -> u32 {
    if total == 0 || done >= total {
        return 100;
    }
    (u128::from(done) * 100 / u128::from(total)) as u32
}
