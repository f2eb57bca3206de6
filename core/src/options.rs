use std::time::Duration;

/// Where the cache worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerKind {
    /// A thread in this process sharing a heap allocation. This is the default.
    #[default]
    Thread,
    /// A child process created with `fork`, sharing an anonymous memory mapping.
    ///
    /// Only available on unix. The stream is duplicated into the child, so it must
    /// be safe to use there (no locks held by other threads of the parent).
    Process,
}

/// How long the worker sleeps while it has nothing to do.
///
/// Right after becoming idle the worker sleeps briefly so that small seeks and
/// a reader catching up are served quickly, then it backs off to a longer sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleBackoff {
    /// The sleep used for the first `short_sleeps` idle iterations.
    pub short_sleep: Duration,
    /// How many short sleeps happen before switching to `long_sleep`.
    pub short_sleeps: u32,
    /// The sleep used once the worker has been idle for a while.
    pub long_sleep: Duration,
}

impl Default for IdleBackoff {
    fn default() -> Self {
        Self {
            short_sleep: Duration::from_millis(1),
            short_sleeps: 10,
            long_sleep: Duration::from_millis(50),
        }
    }
}

/// Options for enabling the cache on a stream.
#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    /// The size of the ring buffer in bytes. It is rounded up to a multiple of the
    /// stream's sector size, with a minimum of 16 sectors.
    pub size: u64,

    /// The number of bytes that must be buffered ahead of the reader before
    /// enabling returns.
    pub min_prefill: u64,

    /// Seeks less than this many bytes past the cached window are served by
    /// reading forward instead of seeking the stream.
    pub seek_limit: u64,

    /// Where the worker runs.
    ///
    /// The default is [`WorkerKind::Thread`].
    pub worker: WorkerKind,

    /// How often a read waiting for data checks the buffer again.
    ///
    /// The default is 10ms.
    pub read_poll_interval: Duration,

    /// How often a pending control request is checked for an answer.
    ///
    /// The default is 1ms.
    pub control_poll_interval: Duration,

    /// After waiting this long for an answer, a "not responding" warning is
    /// logged. Waiting continues afterwards.
    ///
    /// The default is 1s.
    pub control_warn_after: Duration,

    /// How often the prefill level is checked while enabling.
    ///
    /// The default is 1ms.
    pub prefill_poll_interval: Duration,

    /// How often the worker refreshes the duration, current time and size it
    /// keeps for the consumer.
    ///
    /// The default is 100ms.
    pub controls_refresh_interval: Duration,

    /// The worker's idle sleep schedule.
    pub idle_backoff: IdleBackoff,
}

impl CacheOptions {
    /// Options with explicit sizes and default timings.
    pub fn new(size: u64, min_prefill: u64, seek_limit: u64) -> Self {
        Self {
            size,
            min_prefill,
            seek_limit,
            ..Default::default()
        }
    }

    /// Options for a cache of `kib` kibibytes that waits for 20% of it to be
    /// filled and reads forward through gaps of up to 50% of it.
    pub fn from_kib(kib: u64) -> Self {
        let size = kib.saturating_mul(1024);
        Self::new(size, size / 5, size / 2)
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            size: 8 * 1024 * 1024,
            min_prefill: 0,
            seek_limit: 4 * 1024 * 1024,
            worker: WorkerKind::default(),
            read_poll_interval: Duration::from_millis(10),
            control_poll_interval: Duration::from_millis(1),
            control_warn_after: Duration::from_secs(1),
            prefill_poll_interval: Duration::from_millis(1),
            controls_refresh_interval: Duration::from_millis(100),
            idle_backoff: IdleBackoff::default(),
        }
    }
}
