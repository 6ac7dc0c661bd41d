//! CRC32 hash algorithm implementation

use crate::hashing::traits::StreamingHasher;

pub(crate) struct Crc32Hasher {
    hasher: crc32fast::Hasher,
}

impl Crc32Hasher {
    pub(crate) fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }
}

impl StreamingHasher for Crc32Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> String {
        format!("{:08x}", self.hasher.finalize())
    }
}
