//! Server-side event wrappers.
//!
//! Clients never see native event handles. Every event handed out is a
//! [`ServerEvent`] whose wire handle is the wrapper's own address. The
//! wrapper carries an explicit status so a non-blocking read can report
//! `CL_SUBMITTED` until its side-channel transfer has been delivered.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rcl_protocol::status::{CL_COMPLETE, CL_SUBMITTED};
use rcl_protocol::{Handle, Status};

#[derive(Debug)]
pub struct ServerEvent {
    native: Option<Handle>,
    status: Mutex<Status>,
    changed: Condvar,
}

impl ServerEvent {
    /// Wrap a native event whose status the driver tracks.
    pub fn native(native: Handle) -> Arc<Self> {
        Arc::new(Self {
            native: Some(native),
            status: Mutex::new(CL_COMPLETE),
            changed: Condvar::new(),
        })
    }

    /// An event still waiting on a server-side transfer.
    pub fn pending(native: Option<Handle>) -> Arc<Self> {
        Arc::new(Self {
            native,
            status: Mutex::new(CL_SUBMITTED),
            changed: Condvar::new(),
        })
    }

    pub fn native_handle(&self) -> Option<Handle> {
        self.native
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    /// The wrapper status overrides the driver's while it is not plain
    /// `CL_COMPLETE`: either a transfer is in flight or it failed.
    pub fn overrides_driver(&self) -> bool {
        self.status() != CL_COMPLETE
    }

    pub fn set_status(&self, status: Status) {
        *self.status.lock() = status;
        self.changed.notify_all();
    }

    /// Block until the status is `CL_COMPLETE` or an error.
    pub fn wait(&self) -> Status {
        let mut status = self.status.lock();
        while *status > CL_COMPLETE {
            self.changed.wait(&mut status);
        }
        *status
    }
}

/// Events owned by one connection, keyed by wire handle.
#[derive(Debug, Default)]
pub struct EventTable {
    events: HashMap<Handle, Arc<ServerEvent>>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `event` and return its wire handle.
    pub fn insert(&mut self, event: Arc<ServerEvent>) -> Handle {
        let handle = Handle(Arc::as_ptr(&event) as usize as u64);
        self.events.insert(handle, event);
        handle
    }

    pub fn get(&self, handle: Handle) -> Option<Arc<ServerEvent>> {
        self.events.get(&handle).cloned()
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Arc<ServerEvent>> {
        self.events.remove(&handle)
    }

    /// Native handles behind `handles`, skipping wrappers without one.
    pub fn natives(&self, handles: &[Handle]) -> Vec<Handle> {
        handles
            .iter()
            .filter_map(|h| self.events.get(h).and_then(|e| e.native_handle()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<(Handle, Arc<ServerEvent>)> {
        self.events.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wire_handle_is_wrapper_identity() {
        let mut table = EventTable::new();
        let native = Handle(0x1234);
        let h = table.insert(ServerEvent::native(native));
        assert_ne!(h, native);
        assert_eq!(table.get(h).and_then(|e| e.native_handle()), Some(native));
        assert_eq!(table.natives(&[h, Handle(99)]), vec![native]);
    }

    #[test]
    fn pending_event_wakes_waiter() {
        let ev = ServerEvent::pending(None);
        assert!(ev.overrides_driver());
        let setter = ev.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set_status(CL_COMPLETE);
        });
        assert_eq!(ev.wait(), CL_COMPLETE);
        assert!(!ev.overrides_driver());
        t.join().unwrap();
    }

    #[test]
    fn failed_transfer_keeps_negative_status() {
        let ev = ServerEvent::pending(Some(Handle(1)));
        ev.set_status(-5);
        assert_eq!(ev.wait(), -5);
        assert!(ev.overrides_driver());
    }
}
