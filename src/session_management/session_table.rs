use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::trace;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::host::accessor::ConnectionId;

use super::session::Session;

/// Default table capacity.
pub const SESSION_TABLE_CAPACITY: usize = 65535;

/// Bounded store of live sessions keyed by connection identity.
///
/// Per-key operations are atomic, so probes firing concurrently for
/// different connections never need a table-wide lock. The capacity is part
/// of the type; inserting a new key into a full table is refused.
///
/// # Fields Overview
///
/// - `sessions`: the live sessions
/// - `len`: number of occupied slots, reserved before an insert
pub struct SessionTable<const N: usize = SESSION_TABLE_CAPACITY> {
    sessions: DashMap<ConnectionId, Session>,
    len: AtomicUsize,
}

impl<const N: usize> SessionTable<N> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            len: AtomicUsize::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `session`, replacing a stale entry for the same identity.
    /// Returns `false` if the table is full.
    pub fn create(&self, session: Session) -> bool {
        match self.sessions.entry(session.id) {
            Entry::Occupied(mut entry) => {
                trace!("[{}] replacing stale session", session.id);
                entry.insert(session);
                true
            }
            Entry::Vacant(entry) => {
                let reserved = self
                    .len
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < N).then_some(n + 1)
                    })
                    .is_ok();
                if !reserved {
                    return false;
                }
                entry.insert(session);
                true
            }
        }
    }

    /// Runs `f` with exclusive access to the session for `id`.
    ///
    /// `f` must not call back into the table: the key's shard stays locked
    /// while it runs.
    pub fn lookup<R>(&self, id: ConnectionId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions
            .get_mut(&id)
            .map(|mut entry| f(entry.value_mut()))
    }

    /// Copy of the session for `id`.
    pub fn get(&self, id: ConnectionId) -> Option<Session> {
        self.sessions.get(&id).map(|entry| *entry.value())
    }

    pub fn delete(&self, id: ConnectionId) -> Option<Session> {
        let removed = self.sessions.remove(&id).map(|(_, session)| session);
        if removed.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }
}

impl<const N: usize> Default for SessionTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::snapshot::SockSnapshot;
    use crate::probes::ProbeVariant;
    use std::sync::Arc;
    use std::thread;

    fn session(id: u64, snd_una: u32) -> Session {
        let sk = SockSnapshot {
            id: ConnectionId(id),
            snd_una,
            ..Default::default()
        };
        Session::establish(ProbeVariant::TcpStats, &sk, sk.src, sk.dst)
    }

    #[test]
    fn test_create_lookup_delete() {
        let table: SessionTable<4> = SessionTable::new();
        assert!(table.create(session(1, 10)));
        assert_eq!(table.len(), 1);

        let baseline = table.lookup(ConnectionId(1), |s| s.baseline_seq);
        assert_eq!(baseline, Some(10));
        assert!(table.lookup(ConnectionId(2), |s| s.baseline_seq).is_none());

        assert!(table.delete(ConnectionId(1)).is_some());
        assert!(table.delete(ConnectionId(1)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_create_overwrites_stale_entry() {
        let table: SessionTable<2> = SessionTable::new();
        assert!(table.create(session(1, 10)));
        assert!(table.create(session(1, 99)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(ConnectionId(1)).map(|s| s.baseline_seq), Some(99));
    }

    #[test]
    fn test_full_table_refuses_new_keys() {
        let table: SessionTable<2> = SessionTable::new();
        assert!(table.create(session(1, 0)));
        assert!(table.create(session(2, 0)));
        assert!(!table.create(session(3, 0)));
        assert!(table.get(ConnectionId(3)).is_none());
        // Existing keys can still be refreshed.
        assert!(table.create(session(2, 5)));

        table.delete(ConnectionId(1));
        assert!(table.create(session(3, 0)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_concurrent_creates_respect_capacity() {
        let table: Arc<SessionTable<64>> = Arc::new(SessionTable::new());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..32u64 {
                        table.create(session(t * 1_000 + i, 0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.len(), 64);
        assert_eq!(table.capacity(), 64);
    }
}
