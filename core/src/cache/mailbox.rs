use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, Ordering};

use crate::control::{ControlRequest, ControlStatus};

/// No request is pending.
pub(crate) const CONTROL_IDLE: i32 = -1;
/// The worker must exit.
pub(crate) const CONTROL_QUIT: i32 = -2;
/// The worker answered the request and waits for the consumer to collect it.
pub(crate) const CONTROL_ANSWERED: i32 = -3;

/// A reply collected from the mailbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Reply {
    pub request: ControlRequest,
    pub status: ControlStatus,
    /// The new stream position if the request flushed the cache.
    pub new_pos: Option<i64>,
}

/// A single-slot request/response channel between the consumer and the worker.
///
/// `control` sequences every access: the consumer only touches `request` while
/// `control` is [`CONTROL_IDLE`] or [`CONTROL_ANSWERED`], the worker only while
/// it holds a positive request code.
#[repr(C)]
pub(crate) struct Mailbox {
    control: AtomicI32,
    request: UnsafeCell<ControlRequest>,
    status: AtomicU8,
    new_pos: AtomicI64,
}

// `request` is never accessed by both sides at the same time, see above.
unsafe impl Sync for Mailbox {}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            control: AtomicI32::new(CONTROL_IDLE),
            request: UnsafeCell::new(ControlRequest::ManagesTimeline),
            status: AtomicU8::new(ControlStatus::Unsupported.to_raw()),
            new_pos: AtomicI64::new(-1),
        }
    }

    /// The raw `control` value.
    pub fn control(&self) -> i32 {
        self.control.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.control() == CONTROL_IDLE
    }

    pub fn is_quit(&self) -> bool {
        self.control() == CONTROL_QUIT
    }

    /// Whether a request waits for the worker.
    pub fn has_pending(&self) -> bool {
        self.control() > 0
    }

    /// Consumer: post a request. Returns false without touching anything if the
    /// mailbox is not idle.
    pub fn post(&self, request: ControlRequest) -> bool {
        if !self.is_idle() {
            return false;
        }

        // Safe because the worker does not touch `request` while idle.
        unsafe {
            *self.request.get() = request;
        }
        self.new_pos.store(-1, Ordering::Relaxed);

        self.control
            .compare_exchange(
                CONTROL_IDLE,
                request.code(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Consumer: ask the worker to exit. This overrides any pending request.
    pub fn post_quit(&self) {
        self.control.store(CONTROL_QUIT, Ordering::SeqCst);
    }

    /// Consumer: the reply to the last request, if the worker answered it.
    ///
    /// The mailbox stays occupied until [`Mailbox::finish`] is called.
    pub fn reply(&self) -> Option<Reply> {
        if self.control() != CONTROL_ANSWERED {
            return None;
        }

        // Safe because the worker is done with `request` once it answered.
        let request = unsafe { *self.request.get() };
        let new_pos = self.new_pos.load(Ordering::Relaxed);

        Some(Reply {
            request,
            status: ControlStatus::from_raw(self.status.load(Ordering::Relaxed)),
            new_pos: if new_pos < 0 { None } else { Some(new_pos) },
        })
    }

    /// Consumer: release the mailbox after collecting a reply.
    pub fn finish(&self) {
        let _ = self.control.compare_exchange(
            CONTROL_ANSWERED,
            CONTROL_IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Worker: the pending request, if any.
    pub fn pending(&self) -> Option<ControlRequest> {
        if self.control() > 0 {
            // Safe because the consumer does not touch `request` while a request
            // is pending.
            Some(unsafe { *self.request.get() })
        } else {
            None
        }
    }

    /// Worker: publish the answer to the pending request.
    pub fn answer(&self, request: ControlRequest, status: ControlStatus, new_pos: Option<i64>) {
        let code = request.code();

        unsafe {
            *self.request.get() = request;
        }
        self.status.store(status.to_raw(), Ordering::Relaxed);
        self.new_pos.store(new_pos.unwrap_or(-1), Ordering::Relaxed);

        // Fails if the consumer posted quit in the meantime, which must stick.
        let _ = self.control.compare_exchange(
            code,
            CONTROL_ANSWERED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
