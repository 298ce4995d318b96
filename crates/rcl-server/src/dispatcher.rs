//! Per-connection dispatch loop and the fixed command table.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rcl_protocol::{Command, PayloadReader, ProtocolError, COMMAND_COUNT};
use rcl_transport::FramePoll;
use tracing::{debug, info, trace, warn};

use crate::error::ConnectionError;
use crate::handlers::{context, enqueue, event, kernel, memory, platform, program, HandlerResult};
use crate::session::Session;

pub type Handler = fn(&mut Session, &mut PayloadReader<'_>) -> HandlerResult;

/// One slot of the command table.
#[derive(Clone, Copy)]
pub enum Entry {
    Handler(Handler),
    Unsupported,
}

use Entry::{Handler as H, Unsupported as U};

/// Indexed by command id.
static COMMANDS: [Entry; COMMAND_COUNT] = [
    H(platform::get_platform_ids),                 // 0
    H(platform::get_platform_info),                // 1
    H(platform::get_device_ids),                   // 2
    H(platform::get_device_info),                  // 3
    H(context::create_context),                    // 4
    H(context::create_context_from_type),          // 5
    H(context::retain_context),                    // 6
    H(context::release_context),                   // 7
    H(context::get_context_info),                  // 8
    H(context::create_command_queue),              // 9
    H(context::retain_command_queue),              // 10
    H(context::release_command_queue),             // 11
    H(context::get_command_queue_info),            // 12
    H(memory::create_buffer),                      // 13
    H(memory::retain_mem_object),                  // 14
    H(memory::release_mem_object),                 // 15
    H(memory::get_supported_image_formats),        // 16
    H(memory::get_mem_object_info),                // 17
    H(memory::get_image_info),                     // 18
    H(memory::create_sampler),                     // 19
    H(memory::retain_sampler),                     // 20
    H(memory::release_sampler),                    // 21
    H(memory::get_sampler_info),                   // 22
    H(program::create_program_with_source),        // 23
    H(program::create_program_with_binary),        // 24
    H(program::retain_program),                    // 25
    H(program::release_program),                   // 26
    H(program::build_program),                     // 27
    H(program::get_program_build_info),            // 28
    H(kernel::create_kernel),                      // 29
    H(kernel::create_kernels_in_program),          // 30
    H(kernel::retain_kernel),                      // 31
    H(kernel::release_kernel),                     // 32
    H(kernel::set_kernel_arg),                     // 33
    H(kernel::get_kernel_info),                    // 34
    H(kernel::get_kernel_work_group_info),         // 35
    H(event::wait_for_events),                     // 36
    H(event::get_event_info),                      // 37
    H(event::retain_event),                        // 38
    H(event::release_event),                       // 39
    H(event::get_event_profiling_info),            // 40
    H(context::flush),                             // 41
    H(context::finish),                            // 42
    H(enqueue::enqueue_read_buffer),               // 43
    H(enqueue::enqueue_write_buffer),              // 44
    H(enqueue::enqueue_copy_buffer),               // 45
    H(enqueue::enqueue_copy_image),                // 46
    H(enqueue::enqueue_copy_image_to_buffer),      // 47
    H(enqueue::enqueue_copy_buffer_to_image),      // 48
    H(enqueue::enqueue_nd_range_kernel),           // 49
    H(memory::create_sub_buffer),                  // 50
    H(event::create_user_event),                   // 51
    H(event::set_user_event_status),               // 52
    U,                                             // 53 EnqueueReadBufferRect
    U,                                             // 54 EnqueueWriteBufferRect
    U,                                             // 55 EnqueueCopyBufferRect
    H(enqueue::enqueue_read_image),                // 56
    H(enqueue::enqueue_write_image),               // 57
    U,                                             // 58 CreateSubDevices
    H(platform::retain_device),                    // 59
    H(platform::release_device),                   // 60
    H(memory::create_image),                       // 61
    U,                                             // 62 CreateProgramWithBuiltInKernels
    U,                                             // 63 CompileProgram
    U,                                             // 64 LinkProgram
    H(platform::unload_platform_compiler),         // 65
    H(program::get_program_info),                  // 66
    H(kernel::get_kernel_arg_info),                // 67
    U,                                             // 68 EnqueueFillBuffer
    U,                                             // 69 EnqueueFillImage
    U,                                             // 70 EnqueueMigrateMemObjects
    H(enqueue::enqueue_marker_with_wait_list),     // 71
    H(enqueue::enqueue_barrier_with_wait_list),    // 72
    H(memory::create_image_2d),                    // 73
    H(memory::create_image_3d),                    // 74
];

/// Table slot for `command`.
pub fn entry(command: Command) -> Entry {
    COMMANDS[command.id() as usize]
}

/// Decode the command id of one frame payload and run its handler.
pub fn dispatch(session: &mut Session, payload: &[u8]) -> Result<Command, ConnectionError> {
    let mut reader = PayloadReader::new(payload);
    let id = reader.u32().map_err(|_| ProtocolError::MissingCommand)?;
    let command = Command::try_from(id)?;

    let handler = match entry(command) {
        Entry::Handler(h) => h,
        Entry::Unsupported => return Err(ProtocolError::UnsupportedCommand(command).into()),
    };

    trace!(conn = %session.id(), %command, "dispatch");
    match handler(session, &mut reader) {
        Err(ConnectionError::Wire(source)) => {
            Err(ProtocolError::Malformed { command, source }.into())
        }
        other => other.map(|()| command),
    }
}

/// Serve one client until it disconnects, fails, or the server shuts down.
/// Runs on a dedicated blocking thread.
pub fn serve_connection(mut session: Session) {
    let state = Arc::clone(session.state());
    let poll = Duration::from_millis(state.config.poll_interval_ms);
    let peer = session
        .channel()
        .peer()
        .map_or_else(|| "unknown".to_string(), |p| p.to_string());
    info!(conn_id = session.id().0, %peer, "client connected");

    loop {
        if state.is_shutting_down() {
            info!(conn_id = session.id().0, "server shutting down, closing connection");
            break;
        }
        match session.channel().poll_frame(poll) {
            Ok(FramePoll::Idle) => continue,
            Ok(FramePoll::Closed) => {
                info!(conn_id = session.id().0, "client disconnected");
                break;
            }
            Ok(FramePoll::Ready) => {}
            Err(e) => {
                warn!(conn_id = session.id().0, "poll failed: {}", e);
                state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }

        let payload = match session.channel_mut().read_frame(state.config.max_message_size) {
            Ok(p) => p,
            Err(e) => {
                let e = ConnectionError::from(e);
                if e.is_closed() {
                    info!(conn_id = session.id().0, "client disconnected");
                } else {
                    warn!(conn_id = session.id().0, "bad frame: {}", e);
                    state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                }
                break;
            }
        };

        state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        match dispatch(&mut session, &payload) {
            Ok(command) => debug!(conn_id = session.id().0, %command, "request served"),
            Err(e) if e.is_closed() => {
                info!(conn_id = session.id().0, "client disconnected mid-request");
                break;
            }
            Err(e) => {
                warn!(conn_id = session.id().0, "closing connection: {}", e);
                state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSUPPORTED: [u32; 10] = [53, 54, 55, 58, 62, 63, 64, 68, 69, 70];

    #[test]
    fn unsupported_slots_match_their_commands() {
        for cmd in Command::ALL {
            let unsupported = matches!(entry(cmd), Entry::Unsupported);
            assert_eq!(unsupported, UNSUPPORTED.contains(&cmd.id()), "{}", cmd);
        }
    }

    #[test]
    fn every_id_past_the_table_is_unknown() {
        for id in [COMMAND_COUNT as u32, 100, u32::MAX] {
            match Command::try_from(id) {
                Err(ProtocolError::UnknownCommand(got)) => assert_eq!(got, id),
                other => panic!("expected UnknownCommand, got {:?}", other),
            }
        }
    }
}
