use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dmdcast_core::{Dmd, Rgb, SegmentLayout};
use dmdcast_proto::{Mode, PathsHeader, StreamHeader, Update};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use crate::registry::{ClientRegistry, Departure};

/// Accept poll interval while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Receive poll interval; bounds shutdown latency per client.
const READ_POLL: Duration = Duration::from_millis(50);

/// Poll interval while an epoch owner waits for the client set to drain.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Shuts the server down from another task or a signal handler.
#[derive(Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Shared state handed to every client task.
#[derive(Clone)]
struct ClientContext {
    dmd: Arc<Dmd>,
    registry: ClientRegistry,
    running: Arc<AtomicBool>,
    fixed_alt_color: bool,
    fixed_pup: bool,
}

/// The TCP frame server: accepts producers, arbitrates a single owner
/// among them and forwards the owner's updates to the pipeline.
pub struct DmdServer {
    listener: TcpListener,
    context: ClientContext,
}

impl DmdServer {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be resolved or bound.
    pub async fn bind(
        addr: &str,
        port: u16,
        dmd: Arc<Dmd>,
        fixed_alt_color: bool,
        fixed_pup: bool,
    ) -> Result<Self> {
        let listener = TcpListener::bind((addr, port))
            .await
            .with_context(|| format!("failed to bind to {addr}:{port}"))?;
        Ok(Self {
            listener,
            context: ClientContext {
                dmd,
                registry: ClientRegistry::new(),
                running: Arc::new(AtomicBool::new(true)),
                fixed_alt_color,
                fixed_pup,
            },
        })
    }

    /// The bound address, useful when port 0 was requested.
    ///
    /// # Errors
    ///
    /// Propagates the socket's failure to report its address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            running: Arc::clone(&self.context.running),
        }
    }

    /// Run the accept loop until shut down. Each accepted socket gets its
    /// own task; client tasks outlive the loop briefly and exit on their
    /// next poll.
    pub async fn run(self) -> Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "listening for frame producers");
        }

        while self.context.running.load(Ordering::Acquire) {
            match tokio::time::timeout(ACCEPT_POLL, self.listener.accept()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    tracing::error!("accept failed: {e}");
                    continue;
                }
                Ok(Ok((stream, peer))) => {
                    let id = self.context.registry.register();
                    tracing::info!(client = id, %peer, "new client connected");
                    let context = self.context.clone();
                    tokio::spawn(client_task(stream, id, context));
                }
            }
        }

        tracing::info!("acceptor stopped");
        Ok(())
    }
}

/// Per-client receive state.
#[derive(Default)]
struct ClientState {
    /// `buffered` flag of the last received header; decides whether the
    /// display is cleared when this owner disconnects.
    last_buffered: bool,
    /// One "blocks the DMD" log per transition into the blocked state.
    blocked_logged: bool,
    /// One protocol-violation log per non-owning client.
    violation_logged: bool,
    /// The disconnect-others request fires once per connection.
    requested_disconnect: bool,
    /// Set on the first forwarded frame; discards a predecessor's
    /// buffered frame.
    forwarded: bool,
}

async fn client_task(mut stream: TcpStream, id: u32, context: ClientContext) {
    let mut state = ClientState::default();
    if let Err(e) = receive_loop(&mut stream, id, &context, &mut state).await {
        tracing::debug!(client = id, "receive loop failed: {e}");
    }
    finish_disconnect(id, &context, &state).await;
}

enum ReadOutcome {
    Full,
    Closed,
    Cancelled,
}

/// Fill `buf` from the socket, polling so that shutdown and the
/// disconnect-epoch are observed while waiting.
async fn read_exact_polled(
    stream: &mut TcpStream,
    buf: &mut [u8],
    id: u32,
    context: &ClientContext,
) -> std::io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        if !context.running.load(Ordering::Acquire) || context.registry.should_terminate(id) {
            return Ok(ReadOutcome::Cancelled);
        }
        match tokio::time::timeout(READ_POLL, stream.read(&mut buf[filled..])).await {
            Err(_) => continue,
            Ok(Ok(0)) => return Ok(ReadOutcome::Closed),
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e),
        }
    }
    Ok(ReadOutcome::Full)
}

async fn receive_loop(
    stream: &mut TcpStream,
    id: u32,
    context: &ClientContext,
    state: &mut ClientState,
) -> Result<()> {
    let mut header_buf = [0u8; StreamHeader::SIZE];

    loop {
        match read_exact_polled(stream, &mut header_buf, id, context).await? {
            ReadOutcome::Full => {}
            ReadOutcome::Closed | ReadOutcome::Cancelled => return Ok(()),
        }

        let header = match StreamHeader::decode(&header_buf) {
            Ok(header) => header,
            Err(e) => {
                if context.registry.is_owner(id) {
                    tracing::warn!(client = id, "protocol violation, disconnecting: {e}");
                    return Ok(());
                }
                if !state.violation_logged {
                    tracing::debug!(client = id, "ignoring unknown package: {e}");
                    state.violation_logged = true;
                }
                continue;
            }
        };

        tracing::debug!(
            client = id,
            mode = ?header.mode,
            width = header.width,
            height = header.height,
            "received stream header"
        );
        state.last_buffered = header.buffered;

        let owner = context.registry.is_owner(id);
        if owner {
            state.blocked_logged = false;
        }

        // Only the current owner may disconnect the others, once.
        if header.disconnect_others && owner && !state.requested_disconnect {
            if context.registry.request_disconnect_others(id) {
                state.requested_disconnect = true;
                tracing::info!(client = id, "other clients will be disconnected");
            }
        }

        match header.mode {
            Mode::Data => {
                let mut paths_buf = [0u8; PathsHeader::SIZE];
                match read_exact_polled(stream, &mut paths_buf, id, context).await? {
                    ReadOutcome::Full => {}
                    ReadOutcome::Closed | ReadOutcome::Cancelled => return Ok(()),
                }
                let mut update_buf = vec![0u8; Update::SIZE];
                match read_exact_polled(stream, &mut update_buf, id, context).await? {
                    ReadOutcome::Full => {}
                    ReadOutcome::Closed | ReadOutcome::Cancelled => return Ok(()),
                }

                if !owner {
                    note_blocked(id, context, state);
                    continue;
                }

                let paths = match PathsHeader::decode(&paths_buf) {
                    Ok(paths) => paths,
                    Err(e) => {
                        tracing::warn!(client = id, "paths header is missing: {e}");
                        return Ok(());
                    }
                };
                let record: &[u8; Update::SIZE] =
                    update_buf.as_slice().try_into().expect("sized buffer");
                match Update::decode(record) {
                    Ok(update) => forward_data(id, context, state, &paths, &update, &header),
                    Err(e) => tracing::warn!(client = id, "update record rejected: {e}"),
                }
            }

            Mode::Rgb16 | Mode::Rgb24 => {
                if let Err(e) = header.validate_frame() {
                    // The framing is intact; drain the announced payload
                    // and keep the connection.
                    tracing::warn!(client = id, "invalid frame: {e}");
                    let mut scratch = vec![0u8; header.length as usize];
                    match read_exact_polled(stream, &mut scratch, id, context).await? {
                        ReadOutcome::Full => {
                            let head = &scratch[..scratch.len().min(64)];
                            tracing::trace!(
                                client = id,
                                "discarded payload starts with\n{}",
                                dmdcast_core::transform::hex_dump(head)
                            );
                            continue;
                        }
                        ReadOutcome::Closed | ReadOutcome::Cancelled => return Ok(()),
                    }
                }

                let mut payload = vec![0u8; header.length as usize];
                match read_exact_polled(stream, &mut payload, id, context).await? {
                    ReadOutcome::Full => {}
                    ReadOutcome::Closed | ReadOutcome::Cancelled => return Ok(()),
                }

                if !owner {
                    note_blocked(id, context, state);
                    continue;
                }

                forward_pixels(id, context, state, &header, &payload);
            }

            Mode::AlphaNumeric => unreachable!("rejected by header decode"),
        }
    }
}

fn note_blocked(id: u32, context: &ClientContext, state: &mut ClientState) {
    if !state.blocked_logged {
        tracing::info!(
            client = id,
            owner = context.registry.current(),
            "client blocks the DMD"
        );
        state.blocked_logged = true;
    }
}

/// Forward a decoded `Data`-mode update to the pipeline.
fn forward_data(
    id: u32,
    context: &ClientContext,
    state: &mut ClientState,
    paths: &PathsHeader,
    update: &Update,
    header: &StreamHeader,
) {
    tracing::debug!(
        client = id,
        rom = %paths.rom_name,
        alt_color = %paths.alt_color_path,
        pup = %paths.pup_videos_path,
        "received paths header"
    );

    if !state.forwarded {
        context.dmd.discard_buffered();
        state.forwarded = true;
    }

    context.dmd.set_rom(
        &paths.rom_name,
        (!context.fixed_alt_color).then_some(paths.alt_color_path.as_str()),
        (!context.fixed_pup).then_some(paths.pup_videos_path.as_str()),
    );

    let tint = Rgb::new(update.r, update.g, update.b);
    let result = match (update.mode, &update.data) {
        (Mode::Data, Some(data)) => context.dmd.update_indexed(
            data,
            update.depth,
            update.width,
            update.height,
            tint,
            header.buffered,
        ),
        (Mode::Rgb24, Some(data)) => context.dmd.update_rgb24(
            data,
            update.depth,
            update.width,
            update.height,
            tint,
            header.buffered,
        ),
        (Mode::AlphaNumeric, _) => {
            let layout = SegmentLayout::from_wire(update.layout).unwrap_or(SegmentLayout::None);
            context
                .dmd
                .update_segments(layout, &update.seg_data, update.seg_data2.as_ref(), tint)
        }
        _ => {
            tracing::warn!(client = id, "update record carries no pixel data");
            return;
        }
    };
    if let Err(e) = result {
        tracing::warn!(client = id, "frame rejected: {e}");
    }
}

/// Forward a raw RGB16/RGB24 payload to the pipeline.
fn forward_pixels(
    id: u32,
    context: &ClientContext,
    state: &mut ClientState,
    header: &StreamHeader,
    payload: &[u8],
) {
    if !state.forwarded {
        context.dmd.discard_buffered();
        state.forwarded = true;
    }

    let result = match header.mode {
        Mode::Rgb16 => {
            let pixels: Vec<u16> = payload
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            context
                .dmd
                .update_rgb565(&pixels, header.width, header.height, header.buffered)
        }
        _ => context.dmd.update_rgb24(
            payload,
            24,
            header.width,
            header.height,
            Rgb::new(0, 0, 0),
            header.buffered,
        ),
    };
    if let Err(e) = result {
        tracing::warn!(client = id, "frame rejected: {e}");
    }
}

/// The disconnect state machine: clear or replay the display when the
/// owner leaves, then resolve ownership in the registry.
async fn finish_disconnect(id: u32, context: &ClientContext, state: &ClientState) {
    if context.registry.should_terminate(id) {
        tracing::info!(client = id, "disconnect requested by the current owner");
    }

    if context.registry.is_owner(id) && !state.last_buffered && !context.dmd.queue_buffered() {
        context.dmd.set_rom("", None, None);
        tracing::info!(client = id, "clear screen on disconnect");
        // A fixed 128x32 black frame suits every attached device; the
        // pipeline letterboxes it onto other panel sizes.
        let black = vec![0u8; 128 * 32 * 3];
        if let Err(e) = context
            .dmd
            .update_rgb24(&black, 24, 128, 32, Rgb::new(0, 0, 0), false)
        {
            tracing::debug!("clear frame rejected: {e}");
        }
    }

    match context.registry.deregister(id) {
        Departure::NotOwner => {}
        Departure::Promoted(new_owner) => {
            tracing::info!(client = id, new_owner, "ownership released");
        }
        Departure::AwaitDrain => {
            while context.running.load(Ordering::Acquire) && !context.registry.try_complete_epoch(id)
            {
                tokio::time::sleep(DRAIN_POLL).await;
            }
            tracing::info!(client = id, "client set drained, ownership reset");
        }
    }

    tracing::info!(client = id, "client disconnected");
}
