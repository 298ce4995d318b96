use std::net::{IpAddr, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rcl_core::{ConnectionId, Registry, ReleaseOutcome, ServerConfig};
use rcl_protocol::status::{CL_INVALID_EVENT_WAIT_LIST, CL_SUCCESS};
use rcl_protocol::{Handle, Reply, ResourceKind, Status, WaitList};
use rcl_transport::framing::{recv_upload, recv_upload_sized, send_all, send_download};
use rcl_transport::transfer::start_transfer;
use rcl_transport::{Channel, TransferJob, TransportError};
use tracing::{debug, info, trace, warn};

use crate::driver::ClDriver;
use crate::error::ConnectionError;
use crate::event::EventTable;
use crate::server::ServerState;

/// Order in which leaked resources are released when a client goes away:
/// dependents before the objects they hold references to.
const RELEASE_ORDER: [ResourceKind; 7] = [
    ResourceKind::Kernel,
    ResourceKind::Program,
    ResourceKind::Sampler,
    ResourceKind::Buffer,
    ResourceKind::Queue,
    ResourceKind::Event,
    ResourceKind::Context,
];

/// Per-client state on the server side.
///
/// Owns the socket, the handle registry and the event wrappers of one
/// connection. Dropping the session removes its shortcuts and, when
/// configured, releases everything the client left behind.
pub struct Session {
    id: ConnectionId,
    channel: Channel,
    local_ip: Option<IpAddr>,
    pub(crate) registry: Registry,
    pub(crate) events: EventTable,
    state: Arc<ServerState>,
}

impl Session {
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        state: Arc<ServerState>,
    ) -> Result<Self, TransportError> {
        let local_ip = stream.local_addr().ok().map(|a| a.ip());
        let channel = Channel::new(stream)?;
        Ok(Self {
            id,
            channel,
            local_ip,
            registry: Registry::new(),
            events: EventTable::new(),
            state,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub(crate) fn channel_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    pub(crate) fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn driver(&self) -> Arc<dyn ClDriver> {
        self.state.driver.clone()
    }

    /// Address the client reached this server on.
    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip
    }

    pub fn send(&mut self, reply: Reply) -> Result<(), ConnectionError> {
        send_all(&mut self.channel, &reply.freeze())?;
        Ok(())
    }

    /// Validate one handle, counting rejections.
    pub fn check(&self, kind: ResourceKind, handle: Handle) -> Result<(), Status> {
        self.registry.is(kind, handle).inspect_err(|_| {
            self.state.metrics.rejected_handles.fetch_add(1, Ordering::Relaxed);
            debug!(conn = %self.id, %kind, %handle, "rejected handle");
        })
    }

    pub fn check_all(&self, kind: ResourceKind, handles: &[Handle]) -> Result<(), Status> {
        handles.iter().try_for_each(|h| self.check(kind, *h))
    }

    /// Same as [`Session::check`] but accepts the null handle.
    pub fn check_optional(&self, kind: ResourceKind, handle: Handle) -> Result<(), Status> {
        if handle.is_null() {
            Ok(())
        } else {
            self.check(kind, handle)
        }
    }

    /// Validate a wait list and translate it to native event handles.
    pub fn resolve_wait_list(&self, wait: &WaitList) -> Result<Vec<Handle>, Status> {
        if self.registry.wait_list(&wait.events).is_err() {
            self.state.metrics.rejected_handles.fetch_add(1, Ordering::Relaxed);
            return Err(CL_INVALID_EVENT_WAIT_LIST);
        }
        Ok(self.events.natives(&wait.events))
    }

    /// Register a handle the driver just handed out. Platforms and devices
    /// are shared by every connection and get no owner.
    pub fn track(&mut self, kind: ResourceKind, handle: Handle) {
        if self.registry.register(kind, handle) {
            if kind.is_counted() {
                self.state.shortcuts.add(handle, self.id);
            }
            trace!(conn = %self.id, %kind, %handle, "tracked");
        }
    }

    /// Whether `handle` is a live object owned by another connection.
    pub fn owned_elsewhere(&self, handle: Handle) -> bool {
        self.state
            .shortcuts
            .lookup(handle)
            .is_some_and(|owner| owner != self.id)
    }

    /// Retain through the driver, then bump the local count.
    pub fn retain(&mut self, kind: ResourceKind, handle: Handle) -> Status {
        if let Err(status) = self.check(kind, handle) {
            return status;
        }
        if let Err(status) = self.driver().retain(kind, handle) {
            return status;
        }
        // Validated above; cannot fail.
        let _ = self.registry.retain(kind, handle);
        CL_SUCCESS
    }

    /// Release through the driver and drop one local reference. The local
    /// count goes down even when the driver refuses.
    pub fn release(&mut self, kind: ResourceKind, handle: Handle) -> Status {
        if let Err(status) = self.check(kind, handle) {
            return status;
        }
        let status = self.driver().release(kind, handle).err().unwrap_or(CL_SUCCESS);
        self.drop_reference(kind, handle);
        status
    }

    /// Local half of a release. Returns `true` when the handle is gone.
    pub(crate) fn drop_reference(&mut self, kind: ResourceKind, handle: Handle) -> bool {
        match self.registry.release(kind, handle) {
            Ok(ReleaseOutcome::Released) => {
                self.state.shortcuts.remove(handle);
                trace!(conn = %self.id, %kind, %handle, "released");
                true
            }
            _ => false,
        }
    }

    /// Receive an upload whose size only the client knows.
    pub fn upload(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        let (chunk, max) = (self.state.config.chunk_size, self.state.config.max_bulk_size);
        Ok(recv_upload(&mut self.channel, chunk, max)?)
    }

    /// Receive an upload of exactly `len` bytes.
    pub fn upload_sized(&mut self, len: u64) -> Result<Option<Vec<u8>>, ConnectionError> {
        let (chunk, max) = (self.state.config.chunk_size, self.state.config.max_bulk_size);
        Ok(recv_upload_sized(&mut self.channel, len, chunk, max)?)
    }

    pub fn download(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        let chunk = self.state.config.chunk_size;
        send_download(&mut self.channel, data, chunk)?;
        Ok(())
    }

    /// Hand `job` to the side channel. Writes the port on this connection.
    pub fn start_transfer(&mut self, job: TransferJob) -> Result<u16, ConnectionError> {
        let config = &self.state.config;
        let addr = config.bind_addr().map_err(|e| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
        })?;
        let port = start_transfer(
            &mut self.channel,
            addr,
            config.transfer_base_port,
            config.transfer_port_range,
            job,
        )?;
        self.state.metrics.transfers.fetch_add(1, Ordering::Relaxed);
        Ok(port)
    }

    /// Release everything still registered, in dependency order.
    fn release_leaked(&mut self) {
        let driver = self.driver();
        let mut released = 0usize;
        for kind in RELEASE_ORDER {
            for (handle, refs) in self.registry.handles(kind) {
                let target = if kind == ResourceKind::Event {
                    match self.events.get(handle).and_then(|e| e.native_handle()) {
                        Some(native) => native,
                        None => continue,
                    }
                } else {
                    handle
                };
                for _ in 0..refs {
                    if let Err(status) = driver.release(kind, target) {
                        debug!(
                            conn = %self.id, %kind, %handle, status,
                            "release on disconnect failed"
                        );
                        break;
                    }
                }
                released += 1;
            }
        }
        if released > 0 {
            warn!(conn = %self.id, "{} resource(s) leaked at disconnect, released", released);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let removed = self.state.shortcuts.remove_connection(self.id);
        if self.state.config.release_on_disconnect {
            self.release_leaked();
        } else if !self.registry.is_empty() {
            info!(conn = %self.id, "{} handle(s) left alive at disconnect", self.registry.len());
        }
        self.registry.clear();
        self.events.drain();
        self.channel.shutdown();
        debug!(conn = %self.id, shortcuts = removed, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDriver;
    use std::net::TcpListener;

    fn session(id: u64, state: &Arc<ServerState>) -> Session {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();
        Session::new(ConnectionId(id), stream, state.clone()).unwrap()
    }

    #[test]
    fn shared_handles_have_no_owner() {
        let config = ServerConfig {
            release_on_disconnect: false,
            ..ServerConfig::default()
        };
        let driver = Arc::new(SimDriver::new());
        let platform = driver.platform();
        let state = ServerState::new(config, driver);

        let mut first = session(1, &state);
        let mut second = session(2, &state);
        first.track(ResourceKind::Platform, platform);
        first.track(ResourceKind::Context, Handle(0x40));
        second.track(ResourceKind::Platform, platform);

        assert_eq!(state.shortcuts.lookup(platform), None);
        assert!(!second.owned_elsewhere(platform));
        assert!(second.owned_elsewhere(Handle(0x40)));

        drop(second);
        assert_eq!(state.shortcuts.lookup(Handle(0x40)), Some(ConnectionId(1)));
        assert!(first.check(ResourceKind::Platform, platform).is_ok());
    }
}
