//! Integration test: rcl server over real sockets
//!
//! Starts an `RclServer` on a loopback port with the simulated driver and
//! talks the wire protocol to it directly. Covers enumeration, handle
//! validation, per-connection isolation, refcounting, fatal protocol
//! errors, both read paths (inline and side channel), images and program
//! binaries.
//!
//! Run with: cargo test --test server_protocol_test -- --nocapture

use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use rcl_core::ServerConfig;
use rcl_protocol::cl::{
    MemFlags, CL_CONTEXT_DEVICES, CL_CONTEXT_PLATFORM, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_GPU,
    CL_EVENT_COMMAND_EXECUTION_STATUS, CL_PLATFORM_NAME, CL_RGBA, CL_UNORM_INT8,
};
use rcl_protocol::status::{
    CL_COMPLETE, CL_INVALID_ARG_VALUE, CL_INVALID_BINARY, CL_INVALID_COMMAND_QUEUE,
    CL_INVALID_CONTEXT, CL_INVALID_DEVICE, CL_INVALID_EVENT_WAIT_LIST, CL_INVALID_IMAGE_DESCRIPTOR,
    CL_INVALID_MEM_OBJECT, CL_INVALID_PLATFORM, CL_INVALID_VALUE, CL_SUCCESS,
};
use rcl_protocol::{Command, Handle, Request};
use rcl_server::{ClDriver, RclServer, SimDriver};
use rcl_transport::framing::{read_i32, read_u32, read_u64, recv_download, send_all, send_upload};
use tokio::sync::watch;

const MAX_BULK: u64 = 64 * 1024 * 1024;

struct TestServer {
    addr: SocketAddr,
    driver: Arc<SimDriver>,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Self {
        rcl_common::init_test_logging();
        let config = ServerConfig {
            bind: "127.0.0.1".to_string(),
            port: 0,
            transfer_base_port: 0,
            transfer_port_range: 1,
            chunk_size: 1024,
            poll_interval_ms: 10,
            ..ServerConfig::default()
        };
        let driver = Arc::new(SimDriver::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (addr_tx, addr_rx) = mpsc::channel();

        let server_driver: Arc<dyn ClDriver> = driver.clone();
        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(listener.local_addr().unwrap()).unwrap();
                let server = RclServer::with_driver(config, server_driver);
                server.serve(listener, shutdown_rx).await.unwrap();
            });
        });

        let addr = addr_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        Self {
            addr,
            driver,
            shutdown,
            thread: Some(thread),
        }
    }

    fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        Client { stream }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Client {
    stream: TcpStream,
}

impl Client {
    fn send(&mut self, request: Request) {
        send_all(&mut self.stream, &request.finish()).unwrap();
    }

    fn status(&mut self) -> i32 {
        read_i32(&mut self.stream).unwrap()
    }

    fn u32(&mut self) -> u32 {
        read_u32(&mut self.stream).unwrap()
    }

    fn handle(&mut self) -> Handle {
        Handle(read_u64(&mut self.stream).unwrap())
    }

    /// `[i32][u64 handle]`
    fn created(&mut self) -> (i32, Handle) {
        (self.status(), self.handle())
    }

    fn upload(&mut self, data: &[u8]) {
        assert!(send_upload(&mut self.stream, data).unwrap(), "server refused upload");
    }

    /// `[i32][u64 size_ret][value]`
    fn info(&mut self, value_size: u64) -> (i32, Vec<u8>) {
        let status = self.status();
        let size = read_u64(&mut self.stream).unwrap();
        let len = if status == CL_SUCCESS && value_size > 0 { size as usize } else { 0 };
        let mut value = vec![0u8; len];
        self.stream.read_exact(&mut value).unwrap();
        (status, value)
    }

    fn platform(&mut self) -> Handle {
        self.send(Request::new(Command::GetPlatformIDs).u32(1));
        assert_eq!(self.status(), CL_SUCCESS);
        assert_eq!(self.u32(), 1);
        self.handle()
    }

    fn device(&mut self, platform: Handle) -> Handle {
        self.send(
            Request::new(Command::GetDeviceIDs)
                .handle(platform)
                .u64(CL_DEVICE_TYPE_ALL)
                .u32(1),
        );
        assert_eq!(self.status(), CL_SUCCESS);
        assert_eq!(self.u32(), 1);
        self.handle()
    }

    /// Platform, device, context and queue.
    fn setup(&mut self) -> (Handle, Handle, Handle) {
        let platform = self.platform();
        let device = self.device(platform);
        self.send(
            Request::new(Command::CreateContext)
                .u64(3)
                .u64(CL_CONTEXT_PLATFORM)
                .handle(platform)
                .u64(0)
                .u32(1)
                .handle(device),
        );
        let (status, context) = self.created();
        assert_eq!(status, CL_SUCCESS);

        self.send(
            Request::new(Command::CreateCommandQueue)
                .handle(context)
                .handle(device)
                .u64(0),
        );
        let (status, queue) = self.created();
        assert_eq!(status, CL_SUCCESS);
        (device, context, queue)
    }

    fn create_buffer(&mut self, context: Handle, size: u64) -> Handle {
        self.send(Request::new(Command::CreateBuffer).handle(context).u64(1).u64(size));
        let (status, buffer) = self.created();
        assert_eq!(status, CL_SUCCESS);
        buffer
    }

    fn assert_closed(&mut self) {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf) {
            Ok(0) => {}
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {}
            other => panic!("expected closed connection, got {:?}", other),
        }
    }
}

#[test]
fn test_platform_enumeration_and_info() {
    let server = TestServer::start();
    let mut client = server.connect();

    // Count query: total only, no array
    client.send(Request::new(Command::GetPlatformIDs).u32(0));
    assert_eq!(client.status(), CL_SUCCESS);
    assert_eq!(client.u32(), 1);

    let platform = client.platform();
    assert_eq!(platform, server.driver.platform());

    client.send(
        Request::new(Command::GetPlatformInfo)
            .handle(platform)
            .u32(CL_PLATFORM_NAME)
            .u64(256),
    );
    let (status, name) = client.info(256);
    assert_eq!(status, CL_SUCCESS);
    assert_eq!(name, b"rcl(127.0.0.1) rcl simulated platform\0".to_vec());

    // Handle never handed out on this connection
    client.send(
        Request::new(Command::GetPlatformInfo)
            .handle(Handle(0x1234))
            .u32(CL_PLATFORM_NAME)
            .u64(256),
    );
    let (status, value) = client.info(256);
    assert_eq!(status, CL_INVALID_PLATFORM);
    assert!(value.is_empty());
}

#[test]
fn test_invalid_handle_never_reaches_driver() {
    let server = TestServer::start();
    let mut client = server.connect();
    let (device, _, _) = client.setup();

    let before = server.driver.calls();
    client.send(
        Request::new(Command::CreateCommandQueue)
            .handle(Handle(0xdead_beef))
            .handle(device)
            .u64(0),
    );
    let (status, queue) = client.created();
    assert_eq!(status, CL_INVALID_CONTEXT);
    assert!(queue.is_null());

    client.send(Request::new(Command::Finish).handle(Handle(0xdead_beef)));
    assert_eq!(client.status(), CL_INVALID_COMMAND_QUEUE);
    assert_eq!(server.driver.calls(), before);
}

#[test]
fn test_connections_are_isolated() {
    let server = TestServer::start();
    let mut owner = server.connect();
    let mut other = server.connect();
    let (_, context, _) = owner.setup();
    let buffer = owner.create_buffer(context, 64);

    other.send(Request::new(Command::ReleaseContext).handle(context));
    assert_eq!(other.status(), CL_INVALID_CONTEXT);
    other.send(Request::new(Command::RetainMemObject).handle(buffer));
    assert_eq!(other.status(), CL_INVALID_MEM_OBJECT);

    // A kernel argument naming the owner's buffer is refused on the other
    // connection.
    let (_, other_context, _) = other.setup();
    let source = b"__kernel void fill(__global float* out, int n) { }";
    other.send(Request::new(Command::CreateProgramWithSource).handle(other_context).u32(1));
    other.upload(source);
    let (status, program) = other.created();
    assert_eq!(status, CL_SUCCESS);

    other.send(Request::new(Command::BuildProgram).handle(program).u32(0));
    other.upload(b"");
    assert_eq!(other.status(), CL_SUCCESS);

    let name = b"fill";
    other.send(
        Request::new(Command::CreateKernel)
            .handle(program)
            .u64(name.len() as u64)
            .bytes(name),
    );
    let (status, kernel) = other.created();
    assert_eq!(status, CL_SUCCESS);

    other.send(
        Request::new(Command::SetKernelArg)
            .handle(kernel)
            .u32(0)
            .u64(8)
            .u32(1)
            .bytes(&buffer.raw().to_le_bytes()),
    );
    assert_eq!(other.status(), CL_INVALID_ARG_VALUE);

    // Still alive for its owner
    owner.send(Request::new(Command::RetainContext).handle(context));
    assert_eq!(owner.status(), CL_SUCCESS);
}

#[test]
fn test_double_release_is_rejected() {
    let server = TestServer::start();
    let mut client = server.connect();
    let (_, context, queue) = client.setup();

    client.send(Request::new(Command::ReleaseCommandQueue).handle(queue));
    assert_eq!(client.status(), CL_SUCCESS);
    client.send(Request::new(Command::ReleaseCommandQueue).handle(queue));
    assert_eq!(client.status(), CL_INVALID_COMMAND_QUEUE);

    client.send(Request::new(Command::RetainContext).handle(context));
    assert_eq!(client.status(), CL_SUCCESS);
    client.send(Request::new(Command::ReleaseContext).handle(context));
    assert_eq!(client.status(), CL_SUCCESS);
    client.send(Request::new(Command::ReleaseContext).handle(context));
    assert_eq!(client.status(), CL_SUCCESS);
    client.send(Request::new(Command::ReleaseContext).handle(context));
    assert_eq!(client.status(), CL_INVALID_CONTEXT);
}

#[test]
fn test_unknown_command_closes_connection() {
    let server = TestServer::start();
    let mut client = server.connect();
    client.send(Request::with_id(75));
    client.assert_closed();

    // The server keeps serving others
    let mut next = server.connect();
    next.platform();
}

#[test]
fn test_unsupported_command_closes_connection() {
    let server = TestServer::start();
    let mut client = server.connect();
    client.send(Request::new(Command::EnqueueFillBuffer).u64(0));
    client.assert_closed();
}

#[test]
fn test_disconnect_releases_leaked_objects() {
    let server = TestServer::start();
    {
        let mut client = server.connect();
        let (_, context, _) = client.setup();
        client.create_buffer(context, 128);
        assert_eq!(server.driver.live_objects(), 3);
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while server.driver.live_objects() > 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(server.driver.live_objects(), 0);
}

#[test]
fn test_buffer_write_then_blocking_read() {
    let server = TestServer::start();
    let mut client = server.connect();
    let (_, context, queue) = client.setup();
    let data: Vec<u8> = (0..4096u32).map(|i| (i * 7) as u8).collect();
    let buffer = client.create_buffer(context, data.len() as u64);

    client.send(
        Request::new(Command::EnqueueWriteBuffer)
            .handle(queue)
            .handle(buffer)
            .u32(1)
            .u64(0)
            .u64(data.len() as u64)
            .wait_list(&[], false),
    );
    client.upload(&data);
    assert_eq!(client.status(), CL_SUCCESS);

    client.send(
        Request::new(Command::EnqueueReadBuffer)
            .handle(queue)
            .handle(buffer)
            .u32(1)
            .u64(0)
            .u64(data.len() as u64)
            .wait_list(&[], false),
    );
    assert_eq!(client.status(), CL_SUCCESS);
    let read = recv_download(&mut client.stream, MAX_BULK).unwrap();
    assert_eq!(read, data);
}

#[test]
fn test_non_blocking_read_uses_side_channel() {
    let server = TestServer::start();
    let mut client = server.connect();
    let (_, context, queue) = client.setup();
    let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
    let buffer = client.create_buffer(context, data.len() as u64);

    client.send(
        Request::new(Command::EnqueueWriteBuffer)
            .handle(queue)
            .handle(buffer)
            .u32(1)
            .u64(0)
            .u64(data.len() as u64)
            .wait_list(&[], false),
    );
    client.upload(&data);
    assert_eq!(client.status(), CL_SUCCESS);

    client.send(
        Request::new(Command::EnqueueReadBuffer)
            .handle(queue)
            .handle(buffer)
            .u32(0)
            .u64(0)
            .u64(data.len() as u64)
            .wait_list(&[], true),
    );
    assert_eq!(client.status(), CL_SUCCESS);
    let event = client.handle();
    assert!(!event.is_null());
    let port = client.u32();

    let mut side = TcpStream::connect(("127.0.0.1", port as u16)).unwrap();
    let read = recv_download(&mut side, MAX_BULK).unwrap();
    assert_eq!(read, data);

    client.send(Request::new(Command::WaitForEvents).u32(1).handle(event));
    assert_eq!(client.status(), CL_SUCCESS);

    client.send(
        Request::new(Command::GetEventInfo)
            .handle(event)
            .u32(CL_EVENT_COMMAND_EXECUTION_STATUS)
            .u64(4),
    );
    let (status, value) = client.info(4);
    assert_eq!(status, CL_SUCCESS);
    assert_eq!(value, CL_COMPLETE.to_le_bytes().to_vec());

    client.send(Request::new(Command::ReleaseEvent).handle(event));
    assert_eq!(client.status(), CL_SUCCESS);
    client.send(Request::new(Command::ReleaseEvent).handle(event));
    assert_eq!(client.status(), rcl_protocol::status::CL_INVALID_EVENT);
}

#[test]
fn test_oversized_read_is_refused_before_staging() {
    let server = TestServer::start();
    let mut client = server.connect();
    let (_, context, queue) = client.setup();
    let buffer = client.create_buffer(context, 64);

    let before = server.driver.calls();
    client.send(
        Request::new(Command::EnqueueReadBuffer)
            .handle(queue)
            .handle(buffer)
            .u32(1)
            .u64(0)
            .u64(1 << 46)
            .wait_list(&[], false),
    );
    assert_eq!(client.status(), CL_INVALID_VALUE);
    assert_eq!(server.driver.calls(), before);

    // No data follows the refusal
    client.send(Request::new(Command::Finish).handle(queue));
    assert_eq!(client.status(), CL_SUCCESS);
}

#[test]
fn test_bad_wait_list_never_reaches_driver() {
    let server = TestServer::start();
    let mut client = server.connect();
    let (_, _, queue) = client.setup();

    let before = server.driver.calls();
    // An id never handed out, then a live handle of the wrong kind
    for bogus in [Handle(0xbad0), queue] {
        client.send(
            Request::new(Command::EnqueueMarkerWithWaitList)
                .handle(queue)
                .wait_list(&[bogus], true),
        );
        assert_eq!(client.status(), CL_INVALID_EVENT_WAIT_LIST);
    }
    assert_eq!(server.driver.calls(), before);

    client.send(
        Request::new(Command::EnqueueMarkerWithWaitList)
            .handle(queue)
            .wait_list(&[], true),
    );
    assert_eq!(client.status(), CL_SUCCESS);
    assert!(!client.handle().is_null());
}

#[test]
fn test_missing_device_type_is_an_empty_list() {
    let server = TestServer::start();
    let mut client = server.connect();
    let platform = client.platform();

    client.send(
        Request::new(Command::GetDeviceIDs)
            .handle(platform)
            .u64(CL_DEVICE_TYPE_GPU)
            .u32(4),
    );
    assert_eq!(client.status(), CL_SUCCESS);
    assert_eq!(client.u32(), 0);

    // The reply carried no handles; the stream is still in step
    assert_eq!(client.device(platform), server.driver.device());
}

#[test]
fn test_image_write_then_read_region() {
    let server = TestServer::start();
    let mut client = server.connect();
    let (_, context, queue) = client.setup();
    let (width, height) = (4u64, 3u64);

    client.send(
        Request::new(Command::CreateImage2D)
            .handle(context)
            .u64(MemFlags::READ_WRITE.bits())
            .u32(CL_RGBA)
            .u32(CL_UNORM_INT8)
            .u64(width)
            .u64(height)
            .u64(0),
    );
    let (status, image) = client.created();
    assert_eq!(status, CL_SUCCESS);

    let pixels: Vec<u8> = (0..width * height * 4).map(|i| i as u8).collect();
    client.send(
        Request::new(Command::EnqueueWriteImage)
            .handle(queue)
            .handle(image)
            .u32(1)
            .u64(0)
            .u64(0)
            .u64(0)
            .u64(width)
            .u64(height)
            .u64(1)
            .u64(0)
            .u64(0)
            .wait_list(&[], false),
    );
    client.upload(&pixels);
    assert_eq!(client.status(), CL_SUCCESS);

    // 2x2 pixels starting at (1, 1)
    client.send(
        Request::new(Command::EnqueueReadImage)
            .handle(queue)
            .handle(image)
            .u32(1)
            .u64(1)
            .u64(1)
            .u64(0)
            .u64(2)
            .u64(2)
            .u64(1)
            .u64(0)
            .u64(0)
            .wait_list(&[], false),
    );
    assert_eq!(client.status(), CL_SUCCESS);
    let read = recv_download(&mut client.stream, MAX_BULK).unwrap();

    let mut expected = Vec::new();
    for y in 1..3u64 {
        let start = ((y * width + 1) * 4) as usize;
        expected.extend_from_slice(&pixels[start..start + 8]);
    }
    assert_eq!(read, expected);
}

#[test]
fn test_unknown_image_type_reports_descriptor() {
    let server = TestServer::start();
    let mut client = server.connect();
    let (_, context, _) = client.setup();

    let flags = MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR;
    client.send(
        Request::new(Command::CreateImage)
            .handle(context)
            .u64(flags.bits())
            .u32(CL_RGBA)
            .u32(CL_UNORM_INT8)
            .u32(0x7777)
            .u64(4)
            .u64(4)
            .u64(0)
            .u64(0)
            .u64(0)
            .u64(0)
            .u32(0)
            .u32(0)
            .handle(Handle::null()),
    );
    client.upload(&[0u8; 64]);
    let (status, image) = client.created();
    assert_eq!(status, CL_INVALID_IMAGE_DESCRIPTOR);
    assert!(image.is_null());
}

#[test]
fn test_program_binaries_report_per_binary_status() {
    let server = TestServer::start();
    let mut client = server.connect();
    let (device, context, _) = client.setup();
    let good = SimDriver::binary_for(b"__kernel void k(int n) { }");

    client.send(
        Request::new(Command::CreateProgramWithBinary)
            .handle(context)
            .u32(2)
            .handle(device)
            .handle(device),
    );
    client.upload(&good);
    client.upload(b"not a binary");
    let (status, program) = client.created();
    assert_eq!(status, CL_INVALID_BINARY);
    assert!(program.is_null());
    assert_eq!(client.status(), CL_SUCCESS);
    assert_eq!(client.status(), CL_INVALID_BINARY);

    client.send(
        Request::new(Command::CreateProgramWithBinary)
            .handle(context)
            .u32(1)
            .handle(device),
    );
    client.upload(&good);
    let (status, program) = client.created();
    assert_eq!(status, CL_SUCCESS);
    assert_eq!(client.status(), CL_SUCCESS);

    client.send(Request::new(Command::ReleaseProgram).handle(program));
    assert_eq!(client.status(), CL_SUCCESS);
}

#[test]
fn test_context_devices_tracked_only_when_sent() {
    let server = TestServer::start();
    let mut client = server.connect();
    let platform = client.platform();
    let device = server.driver.device();

    client.send(
        Request::new(Command::CreateContextFromType)
            .u64(3)
            .u64(CL_CONTEXT_PLATFORM)
            .handle(platform)
            .u64(0)
            .u64(CL_DEVICE_TYPE_ALL),
    );
    let (status, context) = client.created();
    assert_eq!(status, CL_SUCCESS);

    let create_queue = |client: &mut Client| {
        client.send(
            Request::new(Command::CreateCommandQueue)
                .handle(context)
                .handle(device)
                .u64(0),
        );
        client.created().0
    };

    // Size query and a too-small buffer hand out nothing
    for value_size in [0, 4] {
        client.send(
            Request::new(Command::GetContextInfo)
                .handle(context)
                .u32(CL_CONTEXT_DEVICES)
                .u64(value_size),
        );
        client.info(value_size);
        assert_eq!(create_queue(&mut client), CL_INVALID_DEVICE);
    }

    client.send(
        Request::new(Command::GetContextInfo)
            .handle(context)
            .u32(CL_CONTEXT_DEVICES)
            .u64(8),
    );
    let (status, value) = client.info(8);
    assert_eq!(status, CL_SUCCESS);
    assert_eq!(value, device.raw().to_le_bytes().to_vec());
    assert_eq!(create_queue(&mut client), CL_SUCCESS);
}
