//! Hash algorithm implementations

pub(crate) mod crc32;
pub(crate) mod ed2k;
pub(crate) mod md5;
pub(crate) mod sha1;
pub(crate) mod tth;
