//! Per-connection handle validation.
//!
//! A registry belongs to exactly one connection and records which handles
//! that connection created or enumerated, each under a single resource kind.

use std::collections::HashMap;

use rcl_protocol::status::{self, Status};
use rcl_protocol::{Handle, ResourceKind};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
struct Entry {
    kind: ResourceKind,
    refs: u32,
}

/// What a release did to the connection-local count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The count reached zero and the handle was unregistered.
    Released,
    Remaining(u32),
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<Handle, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok` when `handle` is registered under `kind`, otherwise the
    /// kind's invalid-object status.
    pub fn is(&self, kind: ResourceKind, handle: Handle) -> Result<(), Status> {
        if self.contains(kind, handle) {
            Ok(())
        } else {
            Err(kind.invalid_status())
        }
    }

    pub fn contains(&self, kind: ResourceKind, handle: Handle) -> bool {
        !handle.is_null() && self.entries.get(&handle).is_some_and(|e| e.kind == kind)
    }

    pub fn kind_of(&self, handle: Handle) -> Option<ResourceKind> {
        self.entries.get(&handle).map(|e| e.kind)
    }

    /// Validate an event wait list.
    pub fn wait_list(&self, events: &[Handle]) -> Result<(), Status> {
        if events.iter().all(|e| self.contains(ResourceKind::Event, *e)) {
            Ok(())
        } else {
            Err(status::CL_INVALID_EVENT_WAIT_LIST)
        }
    }

    /// Add `handle` under `kind`. Returns `true` when the handle was not
    /// already a member of that kind. A handle known under another kind is
    /// moved to `kind` with a fresh count.
    pub fn register(&mut self, kind: ResourceKind, handle: Handle) -> bool {
        if handle.is_null() {
            return false;
        }
        match self.entries.get_mut(&handle) {
            Some(e) if e.kind == kind => false,
            Some(e) => {
                trace!(%handle, from = %e.kind, to = %kind, "handle changed kind");
                *e = Entry { kind, refs: 1 };
                true
            }
            None => {
                self.entries.insert(handle, Entry { kind, refs: 1 });
                true
            }
        }
    }

    /// Bump the local count. Returns the new count.
    pub fn retain(&mut self, kind: ResourceKind, handle: Handle) -> Result<u32, Status> {
        self.is(kind, handle)?;
        let e = self
            .entries
            .get_mut(&handle)
            .ok_or_else(|| kind.invalid_status())?;
        if kind.is_counted() {
            e.refs = e.refs.saturating_add(1);
        }
        Ok(e.refs)
    }

    /// Drop one local reference, unregistering the handle at zero.
    pub fn release(
        &mut self,
        kind: ResourceKind,
        handle: Handle,
    ) -> Result<ReleaseOutcome, Status> {
        self.is(kind, handle)?;
        if !kind.is_counted() {
            return Ok(ReleaseOutcome::Remaining(1));
        }
        let e = self
            .entries
            .get_mut(&handle)
            .ok_or_else(|| kind.invalid_status())?;
        e.refs = e.refs.saturating_sub(1);
        if e.refs == 0 {
            self.entries.remove(&handle);
            Ok(ReleaseOutcome::Released)
        } else {
            Ok(ReleaseOutcome::Remaining(e.refs))
        }
    }

    /// Every handle of `kind` with its local count.
    pub fn handles(&self, kind: ResourceKind) -> Vec<(Handle, u32)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(h, e)| (*h, e.refs))
            .collect();
        out.sort_unstable_by_key(|(h, _)| *h);
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcl_protocol::status::*;

    #[test]
    fn unknown_handles_report_kind_status() {
        let reg = Registry::new();
        for kind in ResourceKind::ALL {
            assert_eq!(reg.is(kind, Handle(0x1234)), Err(kind.invalid_status()));
        }
        assert_eq!(reg.is(ResourceKind::Context, Handle(1)), Err(CL_INVALID_CONTEXT));
        assert_eq!(reg.is(ResourceKind::Buffer, Handle(1)), Err(CL_INVALID_MEM_OBJECT));
    }

    #[test]
    fn null_is_never_a_member() {
        let mut reg = Registry::new();
        assert!(!reg.register(ResourceKind::Context, Handle::null()));
        assert_eq!(reg.is(ResourceKind::Context, Handle::null()), Err(CL_INVALID_CONTEXT));
    }

    #[test]
    fn handle_belongs_to_one_kind() {
        let mut reg = Registry::new();
        let h = Handle(0x10);
        assert!(reg.register(ResourceKind::Buffer, h));
        assert!(reg.is(ResourceKind::Buffer, h).is_ok());
        assert_eq!(reg.is(ResourceKind::Kernel, h), Err(CL_INVALID_KERNEL));

        assert!(reg.register(ResourceKind::Kernel, h));
        assert_eq!(reg.is(ResourceKind::Buffer, h), Err(CL_INVALID_MEM_OBJECT));
        assert_eq!(reg.kind_of(h), Some(ResourceKind::Kernel));
    }

    #[test]
    fn release_unregisters_at_zero() {
        let mut reg = Registry::new();
        let q = Handle(0x20);
        reg.register(ResourceKind::Queue, q);
        assert_eq!(reg.retain(ResourceKind::Queue, q), Ok(2));
        assert_eq!(reg.release(ResourceKind::Queue, q), Ok(ReleaseOutcome::Remaining(1)));
        assert_eq!(reg.release(ResourceKind::Queue, q), Ok(ReleaseOutcome::Released));
        assert_eq!(reg.release(ResourceKind::Queue, q), Err(CL_INVALID_COMMAND_QUEUE));
        assert!(reg.is_empty());
    }

    #[test]
    fn enumerated_objects_survive_release() {
        let mut reg = Registry::new();
        let d = Handle(0x30);
        reg.register(ResourceKind::Device, d);
        assert!(!reg.register(ResourceKind::Device, d));
        assert_eq!(reg.release(ResourceKind::Device, d), Ok(ReleaseOutcome::Remaining(1)));
        assert!(reg.is(ResourceKind::Device, d).is_ok());
    }

    #[test]
    fn wait_list_uses_its_own_status() {
        let mut reg = Registry::new();
        let e = Handle(0x40);
        reg.register(ResourceKind::Event, e);
        assert!(reg.wait_list(&[]).is_ok());
        assert!(reg.wait_list(&[e]).is_ok());
        assert_eq!(reg.wait_list(&[e, Handle(0x41)]), Err(CL_INVALID_EVENT_WAIT_LIST));
    }
}
