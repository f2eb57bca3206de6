use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtrb::RingBuffer;

use super::fill::WriteSide;
use crate::options::{IdleBackoff, WorkerKind};
use crate::{CacheError, Stream, BLOCKING_POLL_INTERVAL};

/// Tracks how long the worker has been idle and picks its next sleep.
#[derive(Debug)]
pub(crate) struct IdleState {
    backoff: IdleBackoff,
    sleeps: u32,
}

impl IdleState {
    pub fn new(backoff: IdleBackoff) -> Self {
        Self { backoff, sleeps: 0 }
    }

    pub fn next_sleep(&mut self) -> Duration {
        if self.sleeps < self.backoff.short_sleeps {
            self.sleeps += 1;
            self.backoff.short_sleep
        } else {
            self.backoff.long_sleep
        }
    }

    /// Called whenever the worker made progress.
    pub fn reset(&mut self) {
        self.sleeps = 0;
    }
}

/// The worker's loop, shared by every worker kind.
///
/// `sleep` must return early when the worker is woken. The loop ends when the
/// consumer posts quit or `owner_alive` returns false, handing the stream back.
pub(crate) fn run_mainloop<S: Stream>(
    mut write_side: WriteSide<S>,
    backoff: IdleBackoff,
    on_ready: impl FnOnce(),
    mut sleep: impl FnMut(Duration),
    owner_alive: impl Fn() -> bool,
) -> S {
    write_side.refresh_cached_controls();
    on_ready();

    let mut idle = IdleState::new(backoff);

    while write_side.execute_control() {
        if !owner_alive() {
            log::warn!("Cache owner went away, stopping the cache worker");
            break;
        }

        if write_side.can_fill() && write_side.fill() {
            idle.reset();
        } else {
            sleep(idle.next_sleep());
        }
    }

    log::debug!("Cache worker exiting");

    write_side.into_stream()
}

/// Something running [`run_mainloop`] concurrently with the consumer.
pub(crate) trait Worker<S: Stream>: Sized {
    /// Start the worker. On failure the stream is handed back.
    fn spawn(write_side: WriteSide<S>, backoff: IdleBackoff) -> Result<Self, (S, io::Error)>;

    /// Cut the worker's current idle sleep short.
    fn wake(&self);

    /// Wait for the worker to exit after quit was posted. Returns the stream,
    /// unless the worker died and took it with it.
    fn join(self) -> Option<S>;
}

pub(crate) struct ThreadWorker<S: Stream> {
    handle: JoinHandle<S>,
}

impl<S: Stream> Worker<S> for ThreadWorker<S> {
    fn spawn(write_side: WriteSide<S>, backoff: IdleBackoff) -> Result<Self, (S, io::Error)> {
        // The write side is only sent once the thread exists, so it can be
        // handed back if spawning fails.
        let (mut start_tx, mut start_rx) = RingBuffer::<WriteSide<S>>::new(1);
        let (mut ready_tx, mut ready_rx) = RingBuffer::<()>::new(1);

        let spawn_res = thread::Builder::new()
            .name(String::from("sluice-cache"))
            .spawn(move || {
                let write_side = loop {
                    if let Ok(write_side) = start_rx.pop() {
                        break write_side;
                    }

                    thread::sleep(BLOCKING_POLL_INTERVAL);
                };

                run_mainloop(
                    write_side,
                    backoff,
                    // Push cannot fail because only one message is ever sent.
                    move || {
                        let _ = ready_tx.push(());
                    },
                    thread::park_timeout,
                    || true,
                )
            });

        let handle = match spawn_res {
            Ok(handle) => handle,
            Err(e) => return Err((write_side.into_stream(), e)),
        };

        // Push cannot fail because only one message is ever sent.
        let _ = start_tx.push(write_side);

        loop {
            if ready_rx.pop().is_ok() || handle.is_finished() {
                break;
            }

            thread::sleep(BLOCKING_POLL_INTERVAL);
        }

        Ok(Self { handle })
    }

    fn wake(&self) {
        self.handle.thread().unpark();
    }

    fn join(self) -> Option<S> {
        match self.handle.join() {
            Ok(stream) => Some(stream),
            Err(_) => {
                log::error!("Cache worker thread panicked, the stream is lost");
                None
            }
        }
    }
}

#[cfg(unix)]
pub(crate) use process::ProcessWorker;

#[cfg(unix)]
mod process {
    use std::io;
    use std::mem;
    use std::time::{Duration, Instant};

    use super::{run_mainloop, Worker};
    use crate::cache::fill::WriteSide;
    use crate::options::IdleBackoff;
    use crate::{Stream, BLOCKING_POLL_INTERVAL};

    /// How long the parent waits for the child to exit before killing it.
    const EXIT_GRACE: Duration = Duration::from_secs(1);

    extern "C" fn on_wake(_: libc::c_int) {}

    /// A worker in a forked child process.
    ///
    /// The parent keeps its own copy of the stream, untouched while the child
    /// runs, and gets it back from `join`.
    pub(crate) struct ProcessWorker<S: Stream> {
        pid: libc::pid_t,
        stream: S,
    }

    impl<S: Stream> Worker<S> for ProcessWorker<S> {
        fn spawn(write_side: WriteSide<S>, backoff: IdleBackoff) -> Result<Self, (S, io::Error)> {
            let parent = unsafe { libc::getpid() };

            // Keep wake signals pending until the child installed its handler,
            // otherwise an early one would terminate it.
            let mut old_mask: libc::sigset_t = unsafe { mem::zeroed() };
            unsafe {
                let mut mask: libc::sigset_t = mem::zeroed();
                libc::sigemptyset(&mut mask);
                libc::sigaddset(&mut mask, libc::SIGUSR1);
                libc::pthread_sigmask(libc::SIG_BLOCK, &mask, &mut old_mask);
            }

            match unsafe { libc::fork() } {
                -1 => {
                    let e = io::Error::last_os_error();
                    unsafe {
                        libc::pthread_sigmask(libc::SIG_SETMASK, &old_mask, std::ptr::null_mut());
                    }
                    Err((write_side.into_stream(), e))
                }
                0 => {
                    unsafe {
                        libc::signal(
                            libc::SIGUSR1,
                            on_wake as extern "C" fn(libc::c_int) as libc::sighandler_t,
                        );
                        libc::pthread_sigmask(libc::SIG_SETMASK, &old_mask, std::ptr::null_mut());
                    }

                    let stream = run_mainloop(
                        write_side,
                        backoff,
                        || {},
                        |d| {
                            let micros = d.as_micros().min(999_999) as libc::c_uint;
                            unsafe {
                                libc::usleep(micros);
                            }
                        },
                        || parent == unsafe { libc::getppid() },
                    );

                    // The parent owns everything the child inherited.
                    mem::forget(stream);
                    unsafe { libc::_exit(0) }
                }
                pid => {
                    unsafe {
                        libc::pthread_sigmask(libc::SIG_SETMASK, &old_mask, std::ptr::null_mut());
                    }
                    log::debug!("Started cache process {}", pid);

                    Ok(Self {
                        pid,
                        stream: write_side.into_stream(),
                    })
                }
            }
        }

        fn wake(&self) {
            unsafe {
                libc::kill(self.pid, libc::SIGUSR1);
            }
        }

        fn join(self) -> Option<S> {
            let start = Instant::now();
            let mut status = 0;

            loop {
                let res = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
                if res == self.pid || res == -1 {
                    return Some(self.stream);
                }

                if start.elapsed() >= EXIT_GRACE {
                    log::warn!("Cache process {} did not exit, killing it", self.pid);
                    unsafe {
                        libc::kill(self.pid, libc::SIGKILL);
                        libc::waitpid(self.pid, &mut status, 0);
                    }
                    return Some(self.stream);
                }

                self.wake();
                std::thread::sleep(BLOCKING_POLL_INTERVAL);
            }
        }
    }
}

/// The worker kinds behind one type.
pub(crate) enum AnyWorker<S: Stream> {
    Thread(ThreadWorker<S>),
    #[cfg(unix)]
    Process(ProcessWorker<S>),
}

impl<S: Stream> AnyWorker<S> {
    pub fn spawn(
        kind: WorkerKind,
        write_side: WriteSide<S>,
        backoff: IdleBackoff,
    ) -> Result<Self, (S, CacheError)> {
        match kind {
            WorkerKind::Thread => ThreadWorker::spawn(write_side, backoff)
                .map(AnyWorker::Thread)
                .map_err(|(stream, e)| (stream, CacheError::Spawn(e))),
            #[cfg(unix)]
            WorkerKind::Process => ProcessWorker::spawn(write_side, backoff)
                .map(AnyWorker::Process)
                .map_err(|(stream, e)| (stream, CacheError::Spawn(e))),
            #[cfg(not(unix))]
            WorkerKind::Process => Err((write_side.into_stream(), CacheError::NotSupported)),
        }
    }

    pub fn wake(&self) {
        match self {
            AnyWorker::Thread(w) => w.wake(),
            #[cfg(unix)]
            AnyWorker::Process(w) => w.wake(),
        }
    }

    pub fn join(self) -> Option<S> {
        match self {
            AnyWorker::Thread(w) => w.join(),
            #[cfg(unix)]
            AnyWorker::Process(w) => w.join(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_backoff_sequence() {
        let backoff = IdleBackoff::default();
        let mut idle = IdleState::new(backoff);

        for _ in 0..10 {
            assert_eq!(idle.next_sleep(), Duration::from_millis(1));
        }
        assert_eq!(idle.next_sleep(), Duration::from_millis(50));
        assert_eq!(idle.next_sleep(), Duration::from_millis(50));

        idle.reset();
        assert_eq!(idle.next_sleep(), Duration::from_millis(1));
    }

    #[test]
    fn no_short_sleeps() {
        let mut idle = IdleState::new(IdleBackoff {
            short_sleep: Duration::from_millis(2),
            short_sleeps: 0,
            long_sleep: Duration::from_millis(20),
        });

        assert_eq!(idle.next_sleep(), Duration::from_millis(20));
    }
}
