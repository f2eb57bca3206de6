#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(clippy::missing_panics_doc)]
#![warn(clippy::clone_on_ref_ptr)]

use std::time;

mod cache;
mod cached_stream;
mod control;
mod error;
mod interrupt;
mod memory;
mod options;
mod stream;

#[cfg(test)]
mod test_util;

pub use cache::{CacheStats, MIN_CACHE_SECTORS};
pub use cached_stream::CachedStream;
pub use control::{ControlRequest, ControlStatus, LangKind, LangRequest, LANG_CAPACITY};
pub use error::{CacheError, EnableStatus};
pub use interrupt::{Interrupt, InterruptFlag, NoInterrupt};
pub use memory::{MemoryStream, MemoryStreamOptions};
pub use options::{CacheOptions, IdleBackoff, WorkerKind};
pub use stream::{effective_sector_size, Stream, DEFAULT_SECTOR_SIZE};

/// How often one side polls while waiting for the other to start up.
const BLOCKING_POLL_INTERVAL: time::Duration = time::Duration::from_millis(1);
