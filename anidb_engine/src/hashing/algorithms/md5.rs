//! MD5 hash algorithm implementation

use crate::hashing::to_hex;
use crate::hashing::traits::StreamingHasher;
use md5::{Digest, Md5};

pub(crate) struct Md5Hasher {
    hasher: Md5,
}

impl Md5Hasher {
    pub(crate) fn new() -> Self {
        Self { hasher: Md5::new() }
    }
}

impl StreamingHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    fn finalize(self: Box<Self>) -> String {
        to_hex(&self.hasher.finalize())
    }
}
