use std::io;

/// An error enabling the cache.
///
/// If this is returned, the stream keeps working without a cache.
#[derive(Debug)]
pub enum CacheError {
    /// The requested cache size is zero.
    InvalidSize(u64),
    /// The cache size exceeds what can be allocated on this platform.
    TooLarge(u64),
    /// The shared buffer could not be allocated or mapped.
    Alloc(io::Error),
    /// The worker thread or process could not be started.
    Spawn(io::Error),
    /// The requested worker kind is not available on this platform.
    NotSupported,
    /// The cache is already enabled on this stream.
    AlreadyEnabled,
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Alloc(e) | CacheError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::InvalidSize(size) => write!(f, "Invalid cache size {}", size),
            CacheError::TooLarge(size) => write!(
                f,
                "Cache size {} is larger than the maximum allocation size",
                size
            ),
            CacheError::Alloc(e) => write!(f, "Failed to allocate cache buffer: {}", e),
            CacheError::Spawn(e) => write!(f, "Starting cache process/thread failed: {}", e),
            CacheError::NotSupported => {
                write!(f, "The requested cache worker is not supported on this platform")
            }
            CacheError::AlreadyEnabled => write!(f, "The cache is already enabled"),
        }
    }
}

/// The outcome of enabling the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableStatus {
    /// The cache is running and the prefill level was reached (or the stream
    /// ended first).
    Enabled,
    /// The wait for the prefill was interrupted. The cache was torn down again and
    /// the stream is used directly.
    Interrupted,
}
