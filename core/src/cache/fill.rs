use std::io;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::shared::SharedRegion;
use crate::control::{ControlRequest, ControlStatus};
use crate::Stream;

/// The worker's half of a cache: it owns the stream and writes into the ring
/// buffer.
pub(crate) struct WriteSide<S: Stream> {
    region: Arc<SharedRegion>,
    stream: S,

    /// One sector, used when the free run before the end of the buffer is
    /// shorter than a sector.
    scratch: Vec<u8>,
    read_chunk: usize,

    refresh_interval: Duration,
    last_refresh: Option<Instant>,
}

impl<S: Stream> WriteSide<S> {
    pub fn new(region: Arc<SharedRegion>, stream: S, refresh_interval: Duration) -> Self {
        let sector_size = region.state().geometry.sector_size as usize;
        let read_chunk = stream.read_chunk().max(1);

        Self {
            region,
            stream,
            scratch: vec![0; sector_size],
            read_chunk,
            refresh_interval,
            last_refresh: None,
        }
    }

    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Whether the worker may touch the buffer. It may not while a control
    /// request waits to be served. An answer nobody collected yet does not
    /// hold it up.
    pub fn can_fill(&self) -> bool {
        !self.region.state().mailbox.has_pending()
    }

    /// Read one chunk from the stream into the buffer.
    ///
    /// Returns true if bytes were added, false if the worker should sleep
    /// (buffer full, end of stream or a failed read).
    pub fn fill(&mut self) -> bool {
        let region = &*self.region;
        let state = region.state();
        let geo = state.geometry;

        // Sampled before the position: a seek racing with this fill then
        // always shows up as a changed count in `mark_eof`.
        let seeks = state.seeks.load(Ordering::SeqCst);
        let read = state.read_filepos.load(Ordering::SeqCst);
        let mut min = state.min_filepos.load(Ordering::Relaxed);
        let mut max = state.max_filepos.load(Ordering::Relaxed);

        if read < min || read > max {
            // The reader left the window.
            if read < min || read >= max + geo.seek_limit {
                log::debug!(
                    "Dropping cache at pos {}, cached range: {}-{}",
                    read,
                    min,
                    max
                );
                drop_contents(region, read);
                min = read;
                max = read;

                if let Err(e) = self.stream.seek(read as u64) {
                    log::warn!("Cache failed to seek stream to {}: {}", read, e);
                    mark_eof(region, seeks);
                    return false;
                }
            }
            // Otherwise keep reading forward until the reader is reached.
        }

        let offset = state.offset.load(Ordering::Relaxed);
        let bs = geo.buffer_size;

        let back = (read - min).clamp(0, geo.back_size);
        let newb = (max - read).max(0);
        let mut space = bs - (newb + back);

        if space < geo.fill_limit {
            state.idle.store(true, Ordering::Release);
            return false;
        }

        let pos = state.index_of(max, offset) as i64;
        let run = bs - pos;
        let via_scratch = run < geo.sector_size && run < space;

        space = if via_scratch {
            space.min(geo.sector_size)
        } else {
            space.min(run)
        };
        space = space.min(self.read_chunk as i64);

        // Make room for `space` new bytes by forgetting the oldest ones.
        let back2 = bs - (space + newb);
        if min < read - back2 {
            let new_min = (read - back2).min(max);
            state.min_filepos.store(new_min, Ordering::Relaxed);
            // The reader must see the raised min before the bytes change.
            fence(Ordering::SeqCst);
        }

        let space = space as usize;
        let pos = pos as usize;

        let res = if via_scratch {
            let res = self.stream.read(&mut self.scratch[..space]);
            if let Ok(n) = res {
                let first = n.min(run as usize);
                // Safe because `[max, max + space)` is outside the window and
                // both parts are in bounds.
                unsafe {
                    region.copy_in(pos, &self.scratch[..first]);
                    region.copy_in(0, &self.scratch[first..n]);
                }
            }
            res
        } else {
            // Safe because `[max, max + space)` is outside the window and the
            // run does not pass the end of the buffer.
            let dst = unsafe { region.buffer_mut(pos, space) };
            self.stream.read(dst)
        };

        let len = match res {
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return false,
            Err(e) => {
                log::warn!("Cache failed to read stream at {}: {}", max, e);
                0
            }
        };

        if len == 0 {
            mark_eof(region, seeks);
            return false;
        }

        if pos + len >= bs as usize {
            state.offset.store(offset + bs, Ordering::Relaxed);
        }
        state.max_filepos.store(max + len as i64, Ordering::Release);
        state.idle.store(false, Ordering::Relaxed);
        // The stream grew, or an earlier end belonged to another position.
        if state.is_eof() {
            state.set_eof(false);
        }

        true
    }

    /// Serve the pending control request, if any, and refresh the cached
    /// control values when they are due.
    ///
    /// Returns false once the consumer asked the worker to quit.
    pub fn execute_control(&mut self) -> bool {
        let region = Arc::clone(&self.region);
        let mailbox = &region.state().mailbox;

        if mailbox.is_quit() {
            return false;
        }

        if self
            .last_refresh
            .map_or(true, |t| t.elapsed() >= self.refresh_interval)
        {
            self.refresh_cached_controls();
        }

        let mut req = match mailbox.pending() {
            Some(req) => req,
            None => return true,
        };

        let old_pos = self.stream.pos();
        let status = if self.stream.supports_control() {
            self.stream.control(&mut req)
        } else {
            ControlStatus::Unsupported
        };
        let new_pos = self.stream.pos();

        let mut moved_to = None;
        if new_pos != old_pos && status != ControlStatus::Ok {
            log::error!(
                "Stream control {:?} returned {:?} but changed the position from {} to {}",
                req,
                status,
                old_pos,
                new_pos
            );
            if let Err(e) = self.stream.seek(old_pos) {
                log::warn!("Cache failed to restore stream position {}: {}", old_pos, e);
            }
        } else if new_pos != old_pos || (status == ControlStatus::Ok && req.moves_stream()) {
            log::debug!("Dropping cache at pos {} after {:?}", new_pos, req);
            drop_contents(&region, new_pos as i64);
            moved_to = Some(new_pos as i64);
            self.refresh_cached_controls();
        }

        mailbox.answer(req, status, moved_to);

        true
    }

    /// Query the stream for the values the consumer reads without a round trip.
    pub fn refresh_cached_controls(&mut self) {
        let state = self.region.state();

        if self.stream.supports_control() {
            let mut req = ControlRequest::GetTimeLength(0.0);
            let len = match (self.stream.control(&mut req), req) {
                (ControlStatus::Ok, ControlRequest::GetTimeLength(len)) => len,
                _ => 0.0,
            };
            state.set_time_length(len);

            let mut req = ControlRequest::GetCurrentTime(0.0);
            let pos = match (self.stream.control(&mut req), req) {
                (ControlStatus::Ok, ControlRequest::GetCurrentTime(t)) => Some(t),
                _ => None,
            };
            state.set_time_pos(pos);
        }

        state.set_stream_size(self.stream.size());

        self.last_refresh = Some(Instant::now());
    }
}

/// Forget all buffered bytes and restart the window at `pos`.
fn drop_contents(region: &SharedRegion, pos: i64) {
    let state = region.state();

    // Bumped first so a reader that sees any of the new cursors also sees it.
    state.generation.fetch_add(1, Ordering::SeqCst);
    state.max_filepos.store(pos, Ordering::Release);
    state.min_filepos.store(pos, Ordering::Release);
    state.offset.store(pos, Ordering::Release);
    state.set_eof(false);
}

/// Flag the end of the stream, unless the consumer seeked since `seeks` was
/// sampled, in which case the end belongs to a position nobody reads anymore.
fn mark_eof(region: &SharedRegion, seeks: u64) {
    let state = region.state();

    if !state.is_eof() {
        log::debug!(
            "Cache reached end of stream at {}",
            state.max_filepos.load(Ordering::Relaxed)
        );
    }

    state.set_eof(true);
    state.idle.store(true, Ordering::Release);

    if state.seeks.load(Ordering::SeqCst) != seeks {
        state.set_eof(false);
    }
}
