//! Duplicator loops
//!
//! One per format. Reads whole chunks from the format's master stream and
//! copies each chunk to every listener registered at that moment. Chunks
//! never split a compressed packet or a PCM frame, so a listener joining
//! mid-stream starts on a boundary.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::channel::SharedByteChannel;
use crate::codec::encoder::{packet_len, PACKET_HEADER_LEN};
use crate::error::Result;
use crate::pipeline::Shared;
use crate::session::listener::{ListenerSession, StreamFormat};

pub(crate) struct Duplicator {
    shared: Arc<Shared>,
    format: StreamFormat,
    master: SharedByteChannel,
    /// Largest raw chunk, a whole number of PCM frames
    chunk_bytes: usize,
    frame_bytes: usize,
}

impl Duplicator {
    pub(crate) fn new(shared: Arc<Shared>, format: StreamFormat) -> Self {
        let frame_bytes = shared.config.target.frame_bytes();
        let chunk_bytes = (shared.config.buffers.chunk_bytes / frame_bytes).max(1) * frame_bytes;
        let master = shared.master(format).clone();
        Self {
            shared,
            format,
            master,
            chunk_bytes,
            frame_bytes,
        }
    }

    pub(crate) fn run(self) -> Result<()> {
        let grace = self.shared.config.dispatch.grace();
        let mut buf = vec![0u8; self.chunk_bytes.max(PACKET_HEADER_LEN + u16::MAX as usize)];

        tracing::debug!("{} duplicator running", self.format);

        // Zero bytes from the master stream means it was closed: terminal
        while let Some(len) = self.next_chunk(&mut buf) {
            let chunk = &buf[..len];
            let listeners = self.shared.registry.snapshot(self.format);
            if listeners.is_empty() {
                continue;
            }

            match grace {
                None => self.dispatch_sequential(chunk, &listeners),
                Some(grace) => self.dispatch_evicting(chunk, listeners, grace),
            }
            self.shared.counters.add_duplicated(self.format);
        }

        tracing::debug!("{} duplicator stopped", self.format);
        Ok(())
    }

    fn next_chunk(&self, buf: &mut [u8]) -> Option<usize> {
        match self.format {
            StreamFormat::Compressed => {
                let mut header = [0u8; PACKET_HEADER_LEN];
                if !self.master.read_exact(&mut header) {
                    return None;
                }
                let end = PACKET_HEADER_LEN + packet_len(header);
                buf[..PACKET_HEADER_LEN].copy_from_slice(&header);
                if !self.master.read_exact(&mut buf[PACKET_HEADER_LEN..end]) {
                    return None;
                }
                Some(end)
            }
            StreamFormat::Raw => {
                let n = self.master.read(&mut buf[..self.chunk_bytes]);
                if n == 0 {
                    return None;
                }
                let rem = n % self.frame_bytes;
                if rem == 0 {
                    return Some(n);
                }
                let end = n + self.frame_bytes - rem;
                if !self.master.read_exact(&mut buf[n..end]) {
                    return None;
                }
                Some(end)
            }
        }
    }

    /// Blocking writes in turn; a full listener buffer holds up the rest
    fn dispatch_sequential(&self, chunk: &[u8], listeners: &[Arc<ListenerSession>]) {
        for listener in listeners {
            listener.buffer.write(chunk);
        }
    }

    /// Non-blocking offer to everyone, then a bounded concurrent wait for
    /// listeners without room. Whoever is still full at the deadline is
    /// evicted.
    fn dispatch_evicting(
        &self,
        chunk: &[u8],
        listeners: Vec<Arc<ListenerSession>>,
        grace: Duration,
    ) {
        let lagging: Vec<Arc<ListenerSession>> = listeners
            .into_iter()
            .filter(|l| !l.buffer.try_write_all(chunk) && !l.buffer.is_closed())
            .collect();
        if lagging.is_empty() {
            return;
        }

        let deadline = Instant::now() + grace;
        let stalled: Vec<Arc<ListenerSession>> = thread::scope(|scope| {
            let pending: Vec<_> = lagging
                .iter()
                .map(|listener| {
                    let buffer = &listener.buffer;
                    (listener, scope.spawn(move || buffer.write_until(chunk, deadline)))
                })
                .collect();

            pending
                .into_iter()
                .filter_map(|(listener, handle)| {
                    let written = handle.join().unwrap_or(0);
                    let stalled = written < chunk.len() && !listener.buffer.is_closed();
                    stalled.then(|| listener.clone())
                })
                .collect()
        });

        if !stalled.is_empty() {
            self.shared
                .counters
                .add_evictions(self.format, stalled.len());
        }
        for listener in stalled {
            self.shared.registry.evict(&listener.id, self.format);
        }
    }
}
