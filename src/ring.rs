//! Bounded byte ring shared between one producer and one consumer thread
//!
//! The ring itself never blocks: [`ByteRing::push`] and [`ByteRing::pop`]
//! move as many bytes as currently fit and return the count, which may be
//! zero. Waiting is done by callers on the ring's two events, which are
//! signaled after every push that stored data and every pop that freed
//! space. The mutex guards only the cursors and the copy, never a wait.
//!
//! The same type carries compressed network bytes (stream ring) and
//! interleaved PCM (sample ring).

use parking_lot::Mutex;
use std::collections::TryReserveError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::sync::{Event, Shutdown};

/// How long a blocking helper waits on an event before re-checking the
/// quit flag.
const WAIT_SLICE: Duration = Duration::from_millis(100);

struct RingState {
    buf: Box<[u8]>,
    write_pos: usize,
    read_pos: usize,
    count: usize,
}

/// Fixed-capacity circular byte buffer
pub struct ByteRing {
    state: Mutex<RingState>,
    capacity: usize,
    /// Signaled after data was added
    readable: Arc<Event>,
    /// Signaled after space was freed
    writable: Arc<Event>,
    /// Producer finished; consumers drain what is left and then see EOF
    eof: AtomicBool,
    bytes_pushed: AtomicU64,
    bytes_popped: AtomicU64,
}

impl ByteRing {
    /// Create a ring with its own events.
    pub fn new(capacity: usize) -> Self {
        Self::with_events(capacity, Arc::new(Event::new()), Arc::new(Event::new()))
    }

    /// Create a ring whose readable/writable signals go to the given
    /// events, so a consumer can wait on one primitive for several
    /// sources at once.
    pub fn with_events(capacity: usize, readable: Arc<Event>, writable: Arc<Event>) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self::from_storage(vec![0u8; capacity], readable, writable)
    }

    /// Fallible variant of [`ByteRing::with_events`] for large rings.
    pub fn try_with_events(
        capacity: usize,
        readable: Arc<Event>,
        writable: Arc<Event>,
    ) -> Result<Self, TryReserveError> {
        assert!(capacity > 0, "ring capacity must be non-zero");
        let mut storage = Vec::new();
        storage.try_reserve_exact(capacity)?;
        storage.resize(capacity, 0);
        Ok(Self::from_storage(storage, readable, writable))
    }

    fn from_storage(storage: Vec<u8>, readable: Arc<Event>, writable: Arc<Event>) -> Self {
        let capacity = storage.len();
        // Empty ring: room to write from the start.
        writable.signal();
        Self {
            state: Mutex::new(RingState {
                buf: storage.into_boxed_slice(),
                write_pos: 0,
                read_pos: 0,
                count: 0,
            }),
            capacity,
            readable,
            writable,
            eof: AtomicBool::new(false),
            bytes_pushed: AtomicU64::new(0),
            bytes_popped: AtomicU64::new(0),
        }
    }

    /// Copy as much of `data` as fits. Returns the number of bytes stored.
    pub fn push(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let written = {
            let mut state = self.state.lock();
            let space = self.capacity - state.count;
            let chunk = data.len().min(space);
            if chunk == 0 {
                return 0;
            }

            let head = state.write_pos;
            let first = chunk.min(self.capacity - head);
            state.buf[head..head + first].copy_from_slice(&data[..first]);
            if chunk > first {
                state.buf[..chunk - first].copy_from_slice(&data[first..chunk]);
            }

            state.write_pos = (head + chunk) % self.capacity;
            state.count += chunk;
            chunk
        };

        self.bytes_pushed.fetch_add(written as u64, Ordering::Relaxed);
        self.readable.signal();
        written
    }

    /// Copy up to `dest.len()` bytes out. Returns 0 when empty.
    pub fn pop(&self, dest: &mut [u8]) -> usize {
        if dest.is_empty() {
            return 0;
        }

        let read = {
            let mut state = self.state.lock();
            let chunk = dest.len().min(state.count);
            if chunk == 0 {
                return 0;
            }

            let tail = state.read_pos;
            let first = chunk.min(self.capacity - tail);
            dest[..first].copy_from_slice(&state.buf[tail..tail + first]);
            if chunk > first {
                dest[first..chunk].copy_from_slice(&state.buf[..chunk - first]);
            }

            state.read_pos = (tail + chunk) % self.capacity;
            state.count -= chunk;
            chunk
        };

        self.bytes_popped.fetch_add(read as u64, Ordering::Relaxed);
        self.writable.signal();
        read
    }

    /// Push all of `data`, waiting for space as needed.
    ///
    /// Returns early with the number of bytes stored if shutdown is
    /// triggered first.
    pub fn push_all(&self, data: &[u8], shutdown: &Shutdown) -> usize {
        let mut written = 0;
        while written < data.len() {
            if shutdown.is_triggered() {
                break;
            }
            let n = self.push(&data[written..]);
            if n == 0 {
                self.writable.wait_timeout(WAIT_SLICE);
                continue;
            }
            written += n;
        }
        written
    }

    /// Pop at least one byte, waiting for data as needed.
    ///
    /// Returns `Some(0)` once the ring is drained and marked end-of-stream,
    /// and `None` if shutdown is triggered while waiting.
    pub fn pop_blocking(&self, dest: &mut [u8], shutdown: &Shutdown) -> Option<usize> {
        if dest.is_empty() {
            return Some(0);
        }
        loop {
            if shutdown.is_triggered() {
                return None;
            }
            let n = self.pop(dest);
            if n > 0 {
                return Some(n);
            }
            if self.is_eof() {
                return Some(0);
            }
            self.readable.wait_timeout(WAIT_SLICE);
        }
    }

    /// Bytes currently held
    pub fn available(&self) -> usize {
        self.state.lock().count
    }

    /// Bytes that can be pushed right now
    pub fn free_space(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn is_full(&self) -> bool {
        self.available() == self.capacity
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.available() as f32 / self.capacity as f32
    }

    /// Mark the producer side finished and wake the consumer.
    pub fn set_eof(&self) {
        self.eof.store(true, Ordering::Release);
        self.readable.signal();
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    /// Wake both sides without changing contents.
    pub fn wake_all(&self) {
        self.readable.signal();
        self.writable.signal();
    }

    pub fn readable_event(&self) -> &Arc<Event> {
        &self.readable
    }

    pub fn writable_event(&self) -> &Arc<Event> {
        &self.writable
    }

    /// Total bytes ever pushed
    pub fn total_pushed(&self) -> u64 {
        self.bytes_pushed.load(Ordering::Relaxed)
    }

    /// Total bytes ever popped
    pub fn total_popped(&self) -> u64 {
        self.bytes_popped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn cursors(&self) -> (usize, usize, usize) {
        let state = self.state.lock();
        (state.write_pos, state.read_pos, state.count)
    }
}

/// Thread-safe handle to a byte ring
pub type SharedByteRing = Arc<ByteRing>;
