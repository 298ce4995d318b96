//! Process-wide map from a handle to the connection that owns it.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use rcl_protocol::Handle;

/// Identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Shared by every connection thread; one entry per live handle.
#[derive(Debug, Default)]
pub struct ShortcutTable {
    entries: Mutex<HashMap<Handle, ConnectionId>>,
}

impl ShortcutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `conn` as the owner of `handle`. Returns the table size.
    pub fn add(&self, handle: Handle, conn: ConnectionId) -> usize {
        let mut entries = self.entries.lock();
        if !handle.is_null() {
            entries.insert(handle, conn);
        }
        entries.len()
    }

    /// Forget `handle`. Returns the table size.
    pub fn remove(&self, handle: Handle) -> usize {
        let mut entries = self.entries.lock();
        entries.remove(&handle);
        entries.len()
    }

    pub fn lookup(&self, handle: Handle) -> Option<ConnectionId> {
        self.entries.lock().get(&handle).copied()
    }

    /// Drop every entry owned by `conn`. Returns how many were removed.
    pub fn remove_connection(&self, conn: ConnectionId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, owner| *owner != conn);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn add_remove_report_size() {
        let table = ShortcutTable::new();
        assert_eq!(table.add(Handle(1), ConnectionId(7)), 1);
        assert_eq!(table.add(Handle(2), ConnectionId(7)), 2);
        assert_eq!(table.add(Handle::null(), ConnectionId(7)), 2);
        assert_eq!(table.lookup(Handle(2)), Some(ConnectionId(7)));
        assert_eq!(table.remove(Handle(1)), 1);
        assert_eq!(table.remove(Handle(1)), 1);
        assert_eq!(table.lookup(Handle(1)), None);
    }

    #[test]
    fn remove_connection_only_touches_owner() {
        let table = ShortcutTable::new();
        table.add(Handle(1), ConnectionId(1));
        table.add(Handle(2), ConnectionId(2));
        table.add(Handle(3), ConnectionId(1));
        assert_eq!(table.remove_connection(ConnectionId(1)), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(Handle(2)), Some(ConnectionId(2)));
    }

    #[test]
    fn concurrent_owners_stay_disjoint() {
        let table = Arc::new(ShortcutTable::new());
        let workers: Vec<_> = (0..8u64)
            .map(|t| {
                let table = table.clone();
                thread::spawn(move || {
                    let conn = ConnectionId(t);
                    for i in 0..500u64 {
                        let h = Handle((t << 32) | (i + 1));
                        table.add(h, conn);
                        assert_eq!(table.lookup(h), Some(conn));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(table.len(), 8 * 500);
        for t in 0..8u64 {
            for i in 0..500u64 {
                assert_eq!(table.lookup(Handle((t << 32) | (i + 1))), Some(ConnectionId(t)));
            }
        }
    }
}
