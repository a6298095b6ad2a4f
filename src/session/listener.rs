//! Listener sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::audio::channel::{create_shared_channel, SharedByteChannel};

const LOCAL_CAPTURE_ID: &str = "local-capture";

/// Opaque listener identity, unique for the lifetime of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identity for a network listener
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Reserved identity of the single local (non-network) consumer
    pub fn local_capture() -> Self {
        Self(LOCAL_CAPTURE_ID.to_string())
    }

    pub fn is_local_capture(&self) -> bool {
        self.0 == LOCAL_CAPTURE_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stream format a listener consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    Compressed,
    Raw,
}

impl StreamFormat {
    pub const ALL: [StreamFormat; 2] = [StreamFormat::Compressed, StreamFormat::Raw];
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFormat::Compressed => f.write_str("compressed"),
            StreamFormat::Raw => f.write_str("raw"),
        }
    }
}

/// One connected consumer of one format
#[derive(Debug)]
pub struct ListenerSession {
    pub id: SessionId,
    pub format: StreamFormat,
    pub buffer: SharedByteChannel,
    pub created_at: DateTime<Utc>,
}

impl ListenerSession {
    pub fn new(id: SessionId, format: StreamFormat, capacity: usize) -> Self {
        Self {
            id,
            format,
            buffer: create_shared_channel(capacity),
            created_at: Utc::now(),
        }
    }

    /// Release the buffer; the delivery side sees EOF
    pub fn dispose(&self) {
        self.buffer.close();
    }
}

/// Readable byte source handed to the delivery layer
///
/// Reads block until the duplicator supplies bytes and return `Ok(0)`
/// once the session is unregistered, evicted or the pipeline stops.
#[derive(Debug, Clone)]
pub struct ListenerStream {
    session: Arc<ListenerSession>,
}

impl ListenerStream {
    pub(crate) fn new(session: Arc<ListenerSession>) -> Self {
        Self { session }
    }

    pub fn id(&self) -> &SessionId {
        &self.session.id
    }

    pub fn format(&self) -> StreamFormat {
        self.session.format
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.session.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.session.buffer.is_closed()
    }

    /// Bytes ready to read without blocking
    pub fn available(&self) -> usize {
        self.session.buffer.len()
    }

    /// True if both streams drain the same session buffer
    pub fn same_buffer(&self, other: &ListenerStream) -> bool {
        Arc::ptr_eq(&self.session.buffer, &other.session.buffer)
    }

    /// Blocking read; 0 means the session has ended
    pub fn read_chunk(&self, out: &mut [u8]) -> usize {
        self.session.buffer.read(out)
    }
}

impl io::Read for ListenerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_chunk(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_local_capture_sentinel() {
        assert!(SessionId::local_capture().is_local_capture());
        assert!(!SessionId::generate().is_local_capture());
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_stream_reads_session_buffer() {
        let session = Arc::new(ListenerSession::new(
            SessionId::new("a"),
            StreamFormat::Raw,
            16,
        ));
        session.buffer.write(&[1, 2, 3]);

        let mut stream = ListenerStream::new(session.clone());
        let mut out = [0u8; 8];
        assert_eq!(stream.read(&mut out).unwrap(), 3);

        session.dispose();
        assert_eq!(stream.read(&mut out).unwrap(), 0);
        assert!(stream.is_closed());
    }
}
