//! Stable boundary types: result codes, ABI version and buffer rules
//!
//! Numeric values in this module match the C header shipped with the
//! library and must never be renumbered.

use crate::handles::{Handle, HandleArena};
use crate::hashing::HashAlgorithm;
use crate::{AniDBClient, ClientConfig, Error, Result, error::ValidationError};
use log::debug;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// ABI version this build implements
pub const ABI_VERSION: u32 = 1;

/// Result codes shared with every binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Success = 0,
    InvalidHandle = 1,
    InvalidParameter = 2,
    FileNotFound = 3,
    Processing = 4,
    OutOfMemory = 5,
    Io = 6,
    Network = 7,
    Cancelled = 8,
    InvalidUtf8 = 9,
    VersionMismatch = 10,
    Timeout = 11,
    PermissionDenied = 12,
    Cache = 13,
    Busy = 14,
    Unknown = 99,
}

impl ResultCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Success,
            1 => Self::InvalidHandle,
            2 => Self::InvalidParameter,
            3 => Self::FileNotFound,
            4 => Self::Processing,
            5 => Self::OutOfMemory,
            6 => Self::Io,
            7 => Self::Network,
            8 => Self::Cancelled,
            9 => Self::InvalidUtf8,
            10 => Self::VersionMismatch,
            11 => Self::Timeout,
            12 => Self::PermissionDenied,
            13 => Self::Cache,
            14 => Self::Busy,
            99 => Self::Unknown,
            _ => return None,
        })
    }

    /// Code for an operation outcome
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => err.code(),
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(error_string(*self))
    }
}

/// Human-readable description of a result code
pub fn error_string(code: ResultCode) -> &'static str {
    match code {
        ResultCode::Success => "Success",
        ResultCode::InvalidHandle => "Invalid handle",
        ResultCode::InvalidParameter => "Invalid parameter",
        ResultCode::FileNotFound => "File not found",
        ResultCode::Processing => "Processing error",
        ResultCode::OutOfMemory => "Out of memory",
        ResultCode::Io => "I/O error",
        ResultCode::Network => "Network error",
        ResultCode::Cancelled => "Operation cancelled",
        ResultCode::InvalidUtf8 => "Invalid UTF-8",
        ResultCode::VersionMismatch => "Version mismatch",
        ResultCode::Timeout => "Operation timeout",
        ResultCode::PermissionDenied => "Permission denied",
        ResultCode::Cache => "Cache error",
        ResultCode::Busy => "Resource busy",
        ResultCode::Unknown => "Unknown error",
    }
}

/// Header name of an algorithm
pub fn algorithm_name(algorithm: HashAlgorithm) -> &'static str {
    algorithm.name()
}

/// Reject callers built against a different ABI
pub fn check_abi_version(version: u32) -> Result<()> {
    if version != ABI_VERSION {
        return Err(Error::Validation(ValidationError::version_mismatch(
            ABI_VERSION,
            version,
        )));
    }
    Ok(())
}

/// Bytes needed to hold an algorithm's hex digest plus NUL
pub fn hash_buffer_size(algorithm: HashAlgorithm) -> usize {
    algorithm.buffer_size()
}

/// Copy a hex digest into `buffer` followed by a NUL byte
pub fn write_hash_to_buffer(hex: &str, buffer: &mut [u8]) -> Result<()> {
    let needed = hex.len() + 1;
    if buffer.len() < needed {
        return Err(Error::invalid_parameter(
            "buffer",
            &format!("needs {needed} bytes, got {}", buffer.len()),
        ));
    }

    buffer[..hex.len()].copy_from_slice(hex.as_bytes());
    buffer[hex.len()] = 0;
    Ok(())
}

/// Decode a caller-supplied path, rejecting invalid UTF-8
pub fn path_from_bytes(bytes: &[u8]) -> Result<PathBuf> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::Validation(ValidationError::invalid_utf8("file_path")))?;
    if text.is_empty() {
        return Err(Error::invalid_parameter("file_path", "must not be empty"));
    }
    Ok(PathBuf::from(text))
}

/// Required buffer size for an algorithm id, or 0 if the id is unknown
#[unsafe(no_mangle)]
pub extern "C" fn anidb_hash_buffer_size(algorithm: i32) -> usize {
    HashAlgorithm::from_id(algorithm).map_or(0, hash_buffer_size)
}

/// ABI version implemented by this library
#[unsafe(no_mangle)]
pub extern "C" fn anidb_get_abi_version() -> u32 {
    ABI_VERSION
}

/// Version-checked entry point
///
/// Each call yields an independent client; dropping it releases its runtime,
/// dispatcher and cache.
pub struct Engine;

impl Engine {
    pub fn init(abi_version: u32, config: ClientConfig) -> Result<AniDBClient> {
        check_abi_version(abi_version)?;
        AniDBClient::new(config)
    }
}

pub type ClientHandle = Handle<Arc<AniDBClient>>;

/// Clients addressed by handle
pub struct ClientRegistry {
    clients: Mutex<HandleArena<Arc<AniDBClient>>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HandleArena::new("client")),
        }
    }

    /// Create a client after checking the caller's ABI version
    pub fn create(&self, abi_version: u32, config: ClientConfig) -> Result<ClientHandle> {
        let client = Arc::new(Engine::init(abi_version, config)?);
        let handle = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client)?;
        debug!("Registered client {handle:?}");
        Ok(handle)
    }

    pub fn get(&self, handle: ClientHandle) -> Result<Arc<AniDBClient>> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
    }

    /// Remove a client; the handle becomes stale immediately
    pub fn destroy(&self, handle: ClientHandle) -> Result<()> {
        let client = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle)?;
        drop(client);
        debug!("Destroyed client {handle:?}");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
