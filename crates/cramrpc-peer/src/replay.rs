//! Idempotent apply: `(identity, sequence) -> cached reply or execute`.
//!
//! Every transport funnels duplicate suppression through one cache. A
//! newer sequence executes once, the last executed sequence is answered
//! with the exact bytes sent before, and anything older is dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cramrpc_wire::sequence_newer;
use tracing::debug;

/// Who a request belongs to, as far as sequence numbers go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    /// One accepted stream connection.
    Stream(u64),
    /// One attached shared-memory mailbox.
    Mailbox(u64),
    /// A datagram client holding an assigned client id.
    Client(u32),
    /// A datagram client signing inside an authenticated session.
    Session { client: u32, session: u32 },
    /// A datagram client still asking for a client id.
    Address(SocketAddr),
}

/// Verdict for one incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replay {
    /// First sighting of this sequence: run it, then [`ReplayCache::store`].
    Execute,
    /// The sequence already ran; these are the bytes that were sent.
    Cached(Bytes),
    /// Older than what already ran, or a duplicate of a request that is
    /// still executing. Dropped without a response.
    Stale,
}

#[derive(Debug)]
struct Entry {
    completed: Option<(u32, Bytes)>,
    in_flight: Option<u32>,
    last_used: Instant,
}

/// Last reply per identity.
#[derive(Debug, Default)]
pub struct ReplayCache {
    entries: Mutex<HashMap<Identity, Entry>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `sequence` for `identity`. An `Execute` verdict marks the
    /// sequence in flight until it is stored or abandoned.
    pub fn check(&self, identity: &Identity, sequence: u32) -> Replay {
        let mut entries = self.lock();
        let entry = entries.entry(*identity).or_insert_with(|| Entry {
            completed: None,
            in_flight: None,
            last_used: Instant::now(),
        });
        entry.last_used = Instant::now();

        if let Some((last, reply)) = &entry.completed {
            if *last == sequence {
                return Replay::Cached(reply.clone());
            }
            if !sequence_newer(sequence, *last) {
                return Replay::Stale;
            }
        }
        if let Some(running) = entry.in_flight {
            if !sequence_newer(sequence, running) {
                return Replay::Stale;
            }
        }
        entry.in_flight = Some(sequence);
        Replay::Execute
    }

    /// Remember the reply sent for `sequence`.
    pub fn store(&self, identity: &Identity, sequence: u32, reply: Bytes) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(identity) else {
            return;
        };
        if entry.in_flight == Some(sequence) {
            entry.in_flight = None;
        }
        let newer = match &entry.completed {
            Some((last, _)) => sequence_newer(sequence, *last),
            None => true,
        };
        if newer {
            entry.completed = Some((sequence, reply));
        }
        entry.last_used = Instant::now();
    }

    /// The request for `sequence` produced no reply worth keeping; a
    /// retransmission may execute it again. An identity left with nothing
    /// completed is dropped.
    pub fn abandon(&self, identity: &Identity, sequence: u32) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(identity) else {
            return;
        };
        if entry.in_flight == Some(sequence) {
            entry.in_flight = None;
        }
        if entry.completed.is_none() && entry.in_flight.is_none() {
            entries.remove(identity);
        }
    }

    /// Drop everything known about `identity`.
    pub fn forget(&self, identity: &Identity) -> bool {
        self.lock().remove(identity).is_some()
    }

    /// Evict identities idle for longer than `idle`. Entries with a
    /// request still executing are kept.
    pub fn reap(&self, idle: Duration, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.in_flight.is_some() || now.saturating_duration_since(entry.last_used) <= idle
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(count = evicted, "reaped idle replay entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Identity, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: Identity = Identity::Client(7);

    #[test]
    fn new_sequence_executes_then_replays() {
        let cache = ReplayCache::new();
        assert_eq!(cache.check(&PEER, 10), Replay::Execute);
        cache.store(&PEER, 10, Bytes::from_static(b"reply-10"));

        assert_eq!(
            cache.check(&PEER, 10),
            Replay::Cached(Bytes::from_static(b"reply-10"))
        );
        assert_eq!(cache.check(&PEER, 9), Replay::Stale);
        assert_eq!(cache.check(&PEER, 11), Replay::Execute);
    }

    #[test]
    fn duplicate_while_running_is_dropped() {
        let cache = ReplayCache::new();
        assert_eq!(cache.check(&PEER, 1), Replay::Execute);
        assert_eq!(cache.check(&PEER, 1), Replay::Stale);
        cache.abandon(&PEER, 1);
        assert_eq!(cache.check(&PEER, 1), Replay::Execute);
    }

    #[test]
    fn abandoned_sequence_does_not_advance() {
        let cache = ReplayCache::new();
        let session = Identity::Session {
            client: 7,
            session: 99,
        };
        assert_eq!(cache.check(&session, 1_000_000), Replay::Execute);
        cache.abandon(&session, 1_000_000);
        assert!(cache.is_empty());

        assert_eq!(cache.check(&session, 2), Replay::Execute);
        cache.store(&session, 2, Bytes::from_static(b"two"));
        assert_eq!(cache.check(&session, 3), Replay::Execute);
        cache.abandon(&session, 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.check(&session, 3), Replay::Execute);
    }

    #[test]
    fn gaps_are_ordinary_new_requests() {
        let cache = ReplayCache::new();
        assert_eq!(cache.check(&PEER, 1), Replay::Execute);
        cache.store(&PEER, 1, Bytes::from_static(b"a"));
        assert_eq!(cache.check(&PEER, 50), Replay::Execute);
        cache.store(&PEER, 50, Bytes::from_static(b"b"));
        assert_eq!(cache.check(&PEER, 2), Replay::Stale);
    }

    #[test]
    fn sequences_wrap() {
        let cache = ReplayCache::new();
        assert_eq!(cache.check(&PEER, u32::MAX), Replay::Execute);
        cache.store(&PEER, u32::MAX, Bytes::from_static(b"last"));
        assert_eq!(cache.check(&PEER, 0), Replay::Execute);
    }

    #[test]
    fn late_store_never_rolls_back() {
        let cache = ReplayCache::new();
        assert_eq!(cache.check(&PEER, 3), Replay::Execute);
        assert_eq!(cache.check(&PEER, 4), Replay::Execute);
        cache.store(&PEER, 4, Bytes::from_static(b"four"));
        cache.store(&PEER, 3, Bytes::from_static(b"three"));
        assert_eq!(
            cache.check(&PEER, 4),
            Replay::Cached(Bytes::from_static(b"four"))
        );
    }

    #[test]
    fn identities_are_independent() {
        let cache = ReplayCache::new();
        let other = Identity::Stream(7);
        assert_eq!(cache.check(&PEER, 5), Replay::Execute);
        cache.store(&PEER, 5, Bytes::from_static(b"x"));
        assert_eq!(cache.check(&other, 5), Replay::Execute);
        assert!(cache.forget(&PEER));
        assert_eq!(cache.check(&PEER, 1), Replay::Execute);
    }

    #[test]
    fn reap_keeps_running_requests() {
        let cache = ReplayCache::new();
        let idle = Identity::Mailbox(1);
        assert_eq!(cache.check(&idle, 1), Replay::Execute);
        cache.store(&idle, 1, Bytes::new());
        assert_eq!(cache.check(&PEER, 1), Replay::Execute);

        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(cache.reap(Duration::from_secs(30), later), 1);
        assert_eq!(cache.len(), 1);
    }
}
