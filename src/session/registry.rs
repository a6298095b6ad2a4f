//! Session registry
//!
//! Concurrent map from listener identity to that listener's private buffer,
//! partitioned by format. Delivery-layer threads register and unregister
//! while duplicators iterate.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::SessionError;
use crate::pipeline::events::{EventSender, PipelineEvent};
use crate::session::gate::{Activity, ActivityGate};
use crate::session::listener::{ListenerSession, ListenerStream, SessionId, StreamFormat};

type SessionMap = DashMap<SessionId, Arc<ListenerSession>>;

pub struct SessionRegistry {
    compressed: SessionMap,
    raw: SessionMap,
    gate: Arc<ActivityGate>,
    listener_capacity: usize,
    closed: AtomicBool,
    events: EventSender,
}

impl SessionRegistry {
    pub fn new(listener_capacity: usize, gate: Arc<ActivityGate>, events: EventSender) -> Self {
        Self {
            compressed: DashMap::new(),
            raw: DashMap::new(),
            gate,
            listener_capacity,
            closed: AtomicBool::new(false),
            events,
        }
    }

    fn map(&self, format: StreamFormat) -> &SessionMap {
        match format {
            StreamFormat::Compressed => &self.compressed,
            StreamFormat::Raw => &self.raw,
        }
    }

    /// Register `id` for `format`, returning its byte source.
    ///
    /// Idempotent: a second call with the same id and format returns a
    /// stream over the same buffer.
    pub fn register(
        &self,
        id: SessionId,
        format: StreamFormat,
    ) -> Result<ListenerStream, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let mut created = false;
        let session = {
            let entry = self.map(format).entry(id.clone()).or_insert_with(|| {
                created = true;
                Arc::new(ListenerSession::new(id.clone(), format, self.listener_capacity))
            });
            Arc::clone(entry.value())
        };

        // close_all may have swept the maps between the check and the insert
        if self.closed.load(Ordering::SeqCst) {
            self.map(format).remove(&id);
            session.dispose();
            return Err(SessionError::Closed);
        }

        if created {
            tracing::debug!(
                "Listener {} joined {} ({} now)",
                id,
                format,
                self.map(format).len()
            );
            self.events.emit(PipelineEvent::ListenerJoined { id, format });
        }
        self.recompute_activity();
        Ok(ListenerStream::new(session))
    }

    /// Remove `id` from every format and dispose its buffers; no-op if absent
    pub fn unregister(&self, id: &SessionId) {
        for format in StreamFormat::ALL {
            if let Some((_, session)) = self.map(format).remove(id) {
                session.dispose();
                tracing::debug!(
                    "Listener {} left {} ({} left)",
                    id,
                    format,
                    self.map(format).len()
                );
                self.events.emit(PipelineEvent::ListenerLeft {
                    id: id.clone(),
                    format,
                });
            }
        }
        self.recompute_activity();
    }

    /// Drop a listener that cannot keep up with its format
    pub fn evict(&self, id: &SessionId, format: StreamFormat) {
        if let Some((_, session)) = self.map(format).remove(id) {
            session.dispose();
            tracing::warn!("Evicted lagging {} listener {}", format, id);
            self.events.emit(PipelineEvent::ListenerEvicted {
                id: id.clone(),
                format,
            });
        }
        self.recompute_activity();
    }

    /// Drop every listener of `format`
    pub fn evict_all(&self, format: StreamFormat) {
        let ids: Vec<SessionId> = self.map(format).iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.evict(&id, format);
        }
    }

    /// Sessions of `format` at this instant.
    ///
    /// Collected into a Vec so no map shard lock is held while a
    /// duplicator blocks on a listener buffer.
    pub fn snapshot(&self, format: StreamFormat) -> Vec<Arc<ListenerSession>> {
        self.map(format).iter().map(|e| e.value().clone()).collect()
    }

    pub fn count(&self, format: StreamFormat) -> usize {
        self.map(format).len()
    }

    pub fn contains(&self, id: &SessionId, format: StreamFormat) -> bool {
        self.map(format).contains_key(id)
    }

    pub fn has_local_capture(&self) -> bool {
        let local = SessionId::local_capture();
        StreamFormat::ALL.iter().any(|&f| self.contains(&local, f))
    }

    pub fn activity(&self) -> Activity {
        self.gate.current()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse new sessions and dispose every existing one
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for format in StreamFormat::ALL {
            let map = self.map(format);
            let ids: Vec<SessionId> = map.iter().map(|e| e.key().clone()).collect();
            for id in ids {
                if let Some((_, session)) = map.remove(&id) {
                    session.dispose();
                }
            }
        }
        self.recompute_activity();
    }

    fn recompute_activity(&self) -> Activity {
        self.gate.recompute(|| Activity {
            compressed: !self.compressed.is_empty(),
            raw: !self.raw.is_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::events::event_channel;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(64, Arc::new(ActivityGate::new()), EventSender::disabled())
    }

    #[test]
    fn test_double_register_returns_same_buffer() {
        let registry = registry();
        let id = SessionId::new("renderer-1");

        let first = registry.register(id.clone(), StreamFormat::Raw).unwrap();
        let second = registry.register(id.clone(), StreamFormat::Raw).unwrap();

        assert!(first.same_buffer(&second));
        assert_eq!(registry.count(StreamFormat::Raw), 1);
    }

    #[test]
    fn test_flags_follow_registry() {
        let registry = registry();
        assert!(!registry.activity().any());

        let a = SessionId::new("a");
        let b = SessionId::new("b");
        registry.register(a.clone(), StreamFormat::Compressed).unwrap();
        assert_eq!(
            registry.activity(),
            Activity {
                compressed: true,
                raw: false
            }
        );

        registry.register(b.clone(), StreamFormat::Raw).unwrap();
        registry.unregister(&a);
        assert_eq!(
            registry.activity(),
            Activity {
                compressed: false,
                raw: true
            }
        );

        registry.unregister(&b);
        registry.unregister(&b);
        assert!(!registry.activity().any());
    }

    #[test]
    fn test_unregister_disposes_buffer() {
        let registry = registry();
        let id = SessionId::new("x");
        let stream = registry.register(id.clone(), StreamFormat::Raw).unwrap();

        registry.unregister(&id);
        assert!(stream.is_closed());
        assert!(!registry.contains(&id, StreamFormat::Raw));
    }

    #[test]
    fn test_same_id_in_both_formats() {
        let registry = registry();
        let id = SessionId::new("dual");
        let raw = registry.register(id.clone(), StreamFormat::Raw).unwrap();
        let compressed = registry.register(id.clone(), StreamFormat::Compressed).unwrap();
        assert!(!raw.same_buffer(&compressed));

        registry.evict(&id, StreamFormat::Raw);
        assert!(raw.is_closed());
        assert!(!compressed.is_closed());
        assert!(registry.activity().compressed);
    }

    #[test]
    fn test_close_all_refuses_new_sessions() {
        let registry = registry();
        let stream = registry
            .register(SessionId::local_capture(), StreamFormat::Raw)
            .unwrap();
        assert!(registry.has_local_capture());

        registry.close_all();
        assert!(stream.is_closed());
        assert!(!registry.activity().any());
        assert!(matches!(
            registry.register(SessionId::new("late"), StreamFormat::Raw),
            Err(SessionError::Closed)
        ));
    }

    #[test]
    fn test_events_emitted() {
        let (events, rx) = event_channel(16);
        let registry = SessionRegistry::new(64, Arc::new(ActivityGate::new()), events);
        let id = SessionId::new("e");

        registry.register(id.clone(), StreamFormat::Raw).unwrap();
        registry.register(id.clone(), StreamFormat::Raw).unwrap();
        registry.evict(&id, StreamFormat::Raw);

        let seen: Vec<PipelineEvent> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                PipelineEvent::ListenerJoined {
                    id: id.clone(),
                    format: StreamFormat::Raw
                },
                PipelineEvent::ListenerEvicted {
                    id,
                    format: StreamFormat::Raw
                },
            ]
        );
    }

    #[test]
    fn test_concurrent_churn_leaves_consistent_flags() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let id = SessionId::new(format!("{}-{}", t, i));
                        let format = if i % 2 == 0 {
                            StreamFormat::Raw
                        } else {
                            StreamFormat::Compressed
                        };
                        registry.register(id.clone(), format).unwrap();
                        registry.unregister(&id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.count(StreamFormat::Raw), 0);
        assert_eq!(registry.count(StreamFormat::Compressed), 0);
        assert!(!registry.activity().any());
    }

    #[test]
    fn test_evict_all_only_touches_one_format() {
        let (events, rx) = event_channel(16);
        let registry = SessionRegistry::new(64, Arc::new(ActivityGate::new()), events);

        let a = registry.register(SessionId::new("a"), StreamFormat::Compressed).unwrap();
        let b = registry.register(SessionId::new("b"), StreamFormat::Compressed).unwrap();
        let c = registry.register(SessionId::new("c"), StreamFormat::Raw).unwrap();

        registry.evict_all(StreamFormat::Compressed);

        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(!c.is_closed());
        assert_eq!(registry.count(StreamFormat::Compressed), 0);
        assert_eq!(
            registry.activity(),
            Activity {
                compressed: false,
                raw: true
            }
        );
        let evicted = rx
            .try_iter()
            .filter(|e| matches!(e, PipelineEvent::ListenerEvicted { .. }))
            .count();
        assert_eq!(evicted, 2);
    }
}
