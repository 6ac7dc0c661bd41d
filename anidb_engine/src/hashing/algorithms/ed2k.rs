//! ED2K hash algorithm implementation
//!
//! The file is split into fixed 9,728,000 byte blocks, each block is hashed
//! with MD4 and the final digest is the MD4 of the concatenated block digests.
//! Block boundaries are tracked independently of the caller's chunk size and
//! each block streams straight into its MD4 state, so no block-sized staging
//! buffer is ever allocated.

use crate::hashing::traits::StreamingHasher;
use crate::hashing::{Ed2kVariant, to_hex};
use md4::{Digest, Md4};

/// ED2K block size in bytes
pub const ED2K_BLOCK_SIZE: usize = 9_728_000;

pub(crate) struct Ed2kHasher {
    block: Md4,
    block_fill: usize,
    // Concatenated 16 byte digests of completed blocks
    block_digests: Vec<u8>,
    total_bytes: u64,
    variant: Ed2kVariant,
}

impl Ed2kHasher {
    pub(crate) fn new(variant: Ed2kVariant) -> Self {
        Self {
            block: Md4::new(),
            block_fill: 0,
            block_digests: Vec::new(),
            total_bytes: 0,
            variant,
        }
    }

    fn close_block(&mut self) {
        let digest = self.block.finalize_reset();
        self.block_digests.extend_from_slice(&digest);
        self.block_fill = 0;
    }
}

impl StreamingHasher for Ed2kHasher {
    fn update(&mut self, data: &[u8]) {
        let mut remaining = data;

        while !remaining.is_empty() {
            let room = ED2K_BLOCK_SIZE - self.block_fill;
            let take = remaining.len().min(room);

            Digest::update(&mut self.block, &remaining[..take]);
            self.block_fill += take;
            remaining = &remaining[take..];

            if self.block_fill == ED2K_BLOCK_SIZE {
                self.close_block();
            }
        }

        self.total_bytes += data.len() as u64;
    }

    fn finalize(mut self: Box<Self>) -> String {
        // Smaller than one block (including empty): plain MD4 of the data
        if self.block_digests.is_empty() {
            return to_hex(&self.block.finalize());
        }

        if self.block_fill > 0 {
            self.close_block();
        }

        // Exactly one block: the block digest itself, in both variants
        if self.block_digests.len() == 16 {
            return to_hex(&self.block_digests);
        }

        let exact_multiple = self.total_bytes % ED2K_BLOCK_SIZE as u64 == 0;
        if self.variant == Ed2kVariant::Red && exact_multiple {
            self.block_digests.extend_from_slice(&Md4::digest(b""));
        }

        to_hex(&Md4::digest(&self.block_digests))
    }
}
