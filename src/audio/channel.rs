//! Bounded blocking byte channel
//!
//! A fixed-capacity single-writer/single-reader byte buffer. Writers block
//! while the buffer is full, readers block while it is empty, and `close`
//! releases both sides immediately. Every buffer between pipeline stages
//! and every listener buffer is one of these.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;

struct State {
    buf: Box<[u8]>,
    /// Position of the oldest unread byte
    read_pos: usize,
    /// Unread bytes held
    len: usize,
    closed: bool,
}

impl State {
    fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Copy as much of `data` as fits; returns bytes copied.
    fn push(&mut self, data: &[u8]) -> usize {
        let cap = self.buf.len();
        let n = data.len().min(self.free());
        let write_pos = (self.read_pos + self.len) % cap;
        let first = n.min(cap - write_pos);
        self.buf[write_pos..write_pos + first].copy_from_slice(&data[..first]);
        self.buf[..n - first].copy_from_slice(&data[first..n]);
        self.len += n;
        n
    }

    /// Move up to `out.len()` unread bytes into `out`; returns bytes moved.
    fn pop(&mut self, out: &mut [u8]) -> usize {
        let cap = self.buf.len();
        let n = out.len().min(self.len);
        let first = n.min(cap - self.read_pos);
        out[..first].copy_from_slice(&self.buf[self.read_pos..self.read_pos + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        self.read_pos = (self.read_pos + n) % cap;
        self.len -= n;
        n
    }
}

/// Fixed-capacity blocking byte buffer with explicit close.
///
/// Suspension happens only inside [`write`](Self::write),
/// [`read`](Self::read) and their deadline variants. After
/// [`close`](Self::close) every read returns 0 and every write returns
/// without copying, whether the caller was already parked or not.
pub struct ByteChannel {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
}

impl ByteChannel {
    /// Create a channel holding at most `capacity` unread bytes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                buf: vec![0u8; capacity].into_boxed_slice(),
                read_pos: 0,
                len: 0,
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Write all of `data`, blocking while the buffer is full.
    ///
    /// Returns the number of bytes accepted, which is less than
    /// `data.len()` only if the channel was closed mid-write.
    pub fn write(&self, data: &[u8]) -> usize {
        let mut state = self.state.lock();
        let mut written = 0;
        while written < data.len() {
            if state.closed {
                break;
            }
            if state.free() == 0 {
                self.writable.wait(&mut state);
                continue;
            }
            written += state.push(&data[written..]);
            self.readable.notify_one();
        }
        written
    }

    /// Like [`write`](Self::write) but gives up at `deadline`.
    pub fn write_until(&self, data: &[u8], deadline: Instant) -> usize {
        let mut state = self.state.lock();
        let mut written = 0;
        while written < data.len() {
            if state.closed {
                break;
            }
            if state.free() == 0 {
                if self.writable.wait_until(&mut state, deadline).timed_out() && state.free() == 0 {
                    break;
                }
                continue;
            }
            written += state.push(&data[written..]);
            self.readable.notify_one();
        }
        written
    }

    /// Copy as much of `data` as currently fits without blocking.
    pub fn try_write(&self, data: &[u8]) -> usize {
        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }
        let n = state.push(data);
        if n > 0 {
            self.readable.notify_one();
        }
        n
    }

    /// Copy the longest prefix of `data` that is a whole number of
    /// `unit`-byte frames and fits right now.
    pub fn try_write_frames(&self, data: &[u8], unit: usize) -> usize {
        let unit = unit.max(1);
        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }
        let fits = data.len().min(state.free());
        let n = state.push(&data[..fits - fits % unit]);
        if n > 0 {
            self.readable.notify_one();
        }
        n
    }

    /// Copy all of `data` if it fits right now, otherwise nothing.
    pub fn try_write_all(&self, data: &[u8]) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.free() < data.len() {
            return false;
        }
        state.push(data);
        self.readable.notify_one();
        true
    }

    /// Read at least one byte, blocking while the buffer is empty.
    ///
    /// Returns 0 once the channel is closed (EOF).
    pub fn read(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return 0;
            }
            if state.len > 0 {
                let n = state.pop(out);
                self.writable.notify_one();
                return n;
            }
            self.readable.wait(&mut state);
        }
    }

    /// Fill `out` completely. Returns false if the channel closed first.
    pub fn read_exact(&self, out: &mut [u8]) -> bool {
        let mut filled = 0;
        while filled < out.len() {
            let n = self.read(&mut out[filled..]);
            if n == 0 {
                return false;
            }
            filled += n;
        }
        true
    }

    /// Close the channel and wake every parked reader and writer. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            state.len = 0;
        }
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Discard all unread bytes
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.len = 0;
        state.read_pos = 0;
        drop(state);
        self.writable.notify_all();
    }

    /// Unread bytes currently held
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().buf.len()
    }
}

impl std::fmt::Debug for ByteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ByteChannel")
            .field("capacity", &state.buf.len())
            .field("len", &state.len)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Thread-safe handle to a byte channel
pub type SharedByteChannel = Arc<ByteChannel>;

/// Create a new shared byte channel
pub fn create_shared_channel(capacity: usize) -> SharedByteChannel {
    Arc::new(ByteChannel::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_write_then_read() {
        let channel = ByteChannel::new(8);
        assert_eq!(channel.write(&[1, 2, 3]), 3);
        assert_eq!(channel.len(), 3);

        let mut out = [0u8; 8];
        assert_eq!(channel.read(&mut out), 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let channel = ByteChannel::new(5);
        let mut out = [0u8; 3];

        channel.write(&[1, 2, 3, 4]);
        assert_eq!(channel.read(&mut out), 3);
        channel.write(&[5, 6, 7, 8]);

        let mut rest = [0u8; 5];
        assert!(channel.read_exact(&mut rest));
        assert_eq!(rest, [4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_try_write_respects_capacity() {
        let channel = ByteChannel::new(4);
        assert_eq!(channel.try_write(&[0; 6]), 4);
        assert_eq!(channel.try_write(&[0; 1]), 0);
        assert!(!channel.try_write_all(&[0; 1]));

        let mut out = [0u8; 2];
        channel.read(&mut out);
        assert!(channel.try_write_all(&[9, 9]));
        assert!(!channel.try_write_all(&[9]));
    }

    #[test]
    fn test_writer_blocks_until_reader_frees_space() {
        let channel = Arc::new(ByteChannel::new(4));
        let writer = {
            let channel = channel.clone();
            thread::spawn(move || channel.write(&[7u8; 12]))
        };

        let mut received = Vec::new();
        let mut out = [0u8; 3];
        while received.len() < 12 {
            let n = channel.read(&mut out);
            assert!(n > 0);
            received.extend_from_slice(&out[..n]);
        }

        assert_eq!(writer.join().unwrap(), 12);
        assert_eq!(received, vec![7u8; 12]);
    }

    #[test]
    fn test_write_until_times_out_when_full() {
        let channel = ByteChannel::new(2);
        channel.write(&[1, 2]);

        let deadline = Instant::now() + Duration::from_millis(30);
        assert_eq!(channel.write_until(&[3, 4], deadline), 0);
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn test_close_releases_blocked_reader_and_writer() {
        let empty = Arc::new(ByteChannel::new(4));
        let full = Arc::new(ByteChannel::new(4));
        full.write(&[0; 4]);

        let reader = {
            let empty = empty.clone();
            thread::spawn(move || {
                let mut out = [0u8; 4];
                empty.read(&mut out)
            })
        };
        let writer = {
            let full = full.clone();
            thread::spawn(move || full.write(&[1; 8]))
        };

        thread::sleep(Duration::from_millis(50));
        empty.close();
        full.close();

        assert_eq!(reader.join().unwrap(), 0);
        assert_eq!(writer.join().unwrap(), 0);
    }

    #[test]
    fn test_closed_channel_is_eof() {
        let channel = ByteChannel::new(4);
        channel.write(&[1, 2]);
        channel.close();
        channel.close();

        let mut out = [0u8; 4];
        assert_eq!(channel.read(&mut out), 0);
        assert_eq!(channel.write(&[1]), 0);
        assert!(!channel.read_exact(&mut out));
        assert!(channel.is_closed());
    }

    #[test]
    fn test_try_write_frames_never_splits_a_frame() {
        let channel = ByteChannel::new(10);
        assert_eq!(channel.try_write_frames(&[1u8; 12], 4), 8);
        assert_eq!(channel.try_write_frames(&[2u8; 4], 4), 0);

        let mut out = [0u8; 4];
        channel.read(&mut out);
        assert_eq!(channel.try_write_frames(&[3u8; 8], 4), 4);
        assert_eq!(channel.len(), 8);
    }

    #[test]
    fn test_clear_discards_backlog() {
        let channel = ByteChannel::new(4);
        channel.write(&[1, 2, 3, 4]);
        channel.clear();
        assert!(channel.is_empty());
        assert!(channel.try_write_all(&[5, 6, 7, 8]));
    }
}
