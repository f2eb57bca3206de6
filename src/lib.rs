//! Read-ahead caching for blocking byte streams.
//!
//! A [`CachedStream`] wraps any [`Stream`]. Once the cache is enabled, a worker
//! thread (or a forked child process) reads ahead into a ring buffer while the
//! caller copies out of it, so playback keeps going while the source stalls.

pub use sluice_core::*;

#[cfg(feature = "file")]
pub use sluice_file::{FileStream, FileStreamOptions, OpenError};
