//! SHA1 hash algorithm implementation

use crate::hashing::to_hex;
use crate::hashing::traits::StreamingHasher;
use sha1::{Digest, Sha1};

pub(crate) struct Sha1Hasher {
    hasher: Sha1,
}

impl Sha1Hasher {
    pub(crate) fn new() -> Self {
        Self {
            hasher: Sha1::new(),
        }
    }
}

impl StreamingHasher for Sha1Hasher {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    fn finalize(self: Box<Self>) -> String {
        to_hex(&self.hasher.finalize())
    }
}
