//! Side-channel delivery for non-blocking reads.
//!
//! The server binds an ephemeral listener, tells the client the port over
//! the primary connection, accepts exactly one connection and hands the
//! payload to a short-lived thread that streams it as
//! `[u64 chunk_size][bulk frame]`.

use std::io::Write;
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::thread;

use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::framing::{send_all, send_download};

/// Callback run once the transfer finished, failed, or was abandoned.
pub type TransferCompletion = Box<dyn FnOnce(Result<(), TransportError>) + Send + 'static>;

/// Payload plus completion. Dropping an unfinished job reports
/// [`TransportError::Aborted`], so the completion runs on every path.
pub struct TransferJob {
    data: Vec<u8>,
    chunk_size: u64,
    completion: Option<TransferCompletion>,
}

impl TransferJob {
    pub fn new(data: Vec<u8>, chunk_size: u64, completion: TransferCompletion) -> Self {
        Self {
            data,
            chunk_size,
            completion: Some(completion),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn complete(&mut self, result: Result<(), TransportError>) {
        if let Some(done) = self.completion.take() {
            done(result);
        }
    }

    /// Stream the payload over `stream` and run the completion.
    pub fn run(mut self, mut stream: TcpStream) {
        let result = send_download(&mut stream, &self.data, self.chunk_size)
            .and_then(|()| stream.flush().map_err(TransportError::from));
        if let Err(e) = &result {
            warn!(len = self.data.len(), "async transfer failed: {}", e);
        } else {
            debug!(len = self.data.len(), "async transfer complete");
        }
        self.complete(result);
    }
}

impl Drop for TransferJob {
    fn drop(&mut self) {
        self.complete(Err(TransportError::Aborted));
    }
}

/// Ephemeral listener for one side-channel transfer.
pub struct TransferListener {
    listener: TcpListener,
    port: u16,
}

impl TransferListener {
    /// Bind on `addr`, starting at `base_port` and moving up on `AddrInUse`.
    pub fn bind(addr: IpAddr, base_port: u16, port_range: u16) -> Result<Self, TransportError> {
        let end = base_port as u32 + port_range.max(1) as u32;
        for port in (base_port as u32..end).filter_map(|p| u16::try_from(p).ok()) {
            match TcpListener::bind(SocketAddr::new(addr, port)) {
                Ok(listener) => {
                    let port = listener.local_addr()?.port();
                    return Ok(Self { listener, port });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(TransportError::NoTransferPort {
            base: base_port,
            end,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Block until the client connects, then close the listener.
    pub fn accept_one(self) -> Result<TcpStream, TransportError> {
        let (stream, peer) = self.listener.accept()?;
        stream.set_nodelay(true)?;
        debug!(port = self.port, %peer, "transfer peer connected");
        Ok(stream)
    }
}

/// Run the whole side-channel handshake for `job`.
///
/// Writes `[u32 port]` on `primary`, waits for the client and spawns the
/// streaming thread. On error the job is dropped and its completion
/// reports the failure.
pub fn start_transfer<W: Write + ?Sized>(
    primary: &mut W,
    addr: IpAddr,
    base_port: u16,
    port_range: u16,
    job: TransferJob,
) -> Result<u16, TransportError> {
    let listener = TransferListener::bind(addr, base_port, port_range)?;
    let port = listener.port();
    send_all(primary, &(port as u32).to_le_bytes())?;
    let stream = listener.accept_one()?;

    info!(port, len = job.len(), "starting async transfer");
    thread::Builder::new()
        .name(format!("rcl-transfer-{}", port))
        .spawn(move || job.run(stream))?;
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::mpsc;

    use crate::framing::{read_u32, recv_download};

    #[test]
    fn dropped_job_reports_abort() {
        let (tx, rx) = mpsc::channel();
        let job = TransferJob::new(vec![1, 2, 3], 1024, Box::new(move |r| {
            tx.send(r.is_ok()).unwrap();
        }));
        drop(job);
        assert!(!rx.recv().unwrap());
    }

    #[test]
    fn bind_skips_ports_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = taken.local_addr().unwrap().port();
        match TransferListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), base, 1) {
            Err(TransportError::NoTransferPort { .. }) => {}
            Err(other) => panic!("expected NoTransferPort, got {:?}", other),
            Ok(l) => panic!("bound busy port {}", l.port()),
        }
    }

    #[test]
    fn side_channel_delivers_payload() {
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let expected = data.clone();
        let (done_tx, done_rx) = mpsc::channel();
        let job = TransferJob::new(data, 1024, Box::new(move |r| {
            done_tx.send(r.is_ok()).unwrap();
        }));

        // The primary connection is a loopback pair so the port can be read back.
        let primary_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let primary_addr = primary_listener.local_addr().unwrap();
        let mut primary_client = TcpStream::connect(primary_addr).unwrap();
        let (mut primary_server, _) = primary_listener.accept().unwrap();

        let client = thread::spawn(move || {
            let port = read_u32(&mut primary_client).unwrap() as u16;
            let mut side = TcpStream::connect(("127.0.0.1", port)).unwrap();
            recv_download(&mut side, u64::MAX).unwrap()
        });

        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        start_transfer(&mut primary_server, localhost, 0, 1, job).unwrap();
        assert_eq!(client.join().unwrap(), expected);
        assert!(done_rx.recv().unwrap());
    }
}
