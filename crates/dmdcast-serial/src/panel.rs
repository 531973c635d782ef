use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dmdcast_core::backend::{BackendError, DisplayBackend};
use dmdcast_core::config::SerialConfig;
use dmdcast_core::transform::{self, ColorOrder};

use crate::link::{self, SerialLink};
use crate::protocol::{self, PanelInfo, HANDSHAKE_LEN, MAX_NO_RESPONSE, MAX_QUEUE_FRAMES};
use crate::PanelError;

/// Worker sleep while the transmit queue is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Settling time around the DTR/RTS toggles.
const LINE_SETTLE: Duration = Duration::from_millis(100);

/// One frame awaiting transmission.
enum PanelFrame {
    Rgb565(Vec<u16>),
    Rgb888(Vec<u8>),
}

struct PanelShared {
    running: AtomicBool,
    alive: AtomicBool,
    queue: Mutex<VecDeque<PanelFrame>>,
}

/// A serial-attached RGB LED matrix.
///
/// Owns the port through its transmit worker; render calls enqueue only.
/// Dropping the panel stops and joins the worker, which flushes the port
/// and drops the control lines on the way out.
pub struct SerialPanel {
    info: PanelInfo,
    shared: Arc<PanelShared>,
    worker: Option<JoinHandle<()>>,
}

impl SerialPanel {
    /// Open the configured device, or scan all serial ports when none is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`PanelError::NotFound`] when no port answers the
    /// handshake; a configured device propagates its failure.
    pub fn connect(config: &SerialConfig) -> Result<Self, PanelError> {
        if !config.device.is_empty() {
            tracing::info!(device = %config.device, "connecting to serial panel");
            return Self::open_device(&config.device, config);
        }

        tracing::info!("searching for a serial panel");
        for device in link::available_devices() {
            match Self::open_device(&device, config) {
                Ok(panel) => return Ok(panel),
                Err(e) => tracing::debug!(device = %device, "not a panel: {e}"),
            }
        }
        Err(PanelError::NotFound)
    }

    fn open_device(device: &str, config: &SerialConfig) -> Result<Self, PanelError> {
        let link = link::open_port(device)?;
        Self::open_link(Box::new(link), device, config)
    }

    /// Handshake over an open link and start the transmit worker. A
    /// failure drops the link, which closes the port.
    fn open_link(
        mut link: Box<dyn SerialLink>,
        device: &str,
        config: &SerialConfig,
    ) -> Result<Self, PanelError> {
        link.set_dtr(false)?;
        link.set_rts(true)?;
        std::thread::sleep(LINE_SETTLE);
        link.set_dtr(true)?;
        std::thread::sleep(LINE_SETTLE);

        let mut response = [0u8; HANDSHAKE_LEN];
        let received = link.read_handshake(&mut response)?;
        if received != HANDSHAKE_LEN {
            return Err(PanelError::ShortHandshake(received));
        }
        let info = protocol::parse_handshake(&response)?;

        tracing::info!(
            device,
            hardware = %info.hardware_id,
            bootloader = %info.bootloader_id,
            firmware = %info.firmware,
            width = info.width,
            height = info.height,
            v2 = info.is_v2,
            color_swap = info.color_swap,
            "serial panel found"
        );

        let shared = Arc::new(PanelShared {
            running: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            queue: Mutex::new(VecDeque::new()),
        });

        let worker = Worker {
            link,
            info: info.clone(),
            config: config.clone(),
            shared: Arc::clone(&shared),
        };
        let handle = std::thread::spawn(move || worker.run());

        Ok(Self {
            info,
            shared,
            worker: Some(handle),
        })
    }

    #[must_use]
    pub fn info(&self) -> &PanelInfo {
        &self.info
    }

    fn enqueue(&self, frame: PanelFrame) -> Result<(), BackendError> {
        if !self.shared.alive.load(Ordering::Acquire) {
            return Err(BackendError::Inactive);
        }
        let mut queue = self.shared.queue.lock().expect("transmit lock");
        while queue.len() >= MAX_QUEUE_FRAMES {
            queue.pop_front();
        }
        queue.push_back(frame);
        Ok(())
    }
}

impl DisplayBackend for SerialPanel {
    fn name(&self) -> &str {
        "serial-panel"
    }

    fn width(&self) -> u16 {
        self.info.width
    }

    fn height(&self) -> u16 {
        self.info.height
    }

    fn render_rgb565(&mut self, frame: &[u16]) -> Result<(), BackendError> {
        let pixels = usize::from(self.info.width) * usize::from(self.info.height);
        if frame.len() != pixels {
            return Err(BackendError::WrongSize {
                got: frame.len(),
                width: self.info.width,
                height: self.info.height,
            });
        }
        self.enqueue(PanelFrame::Rgb565(frame.to_vec()))
    }

    fn render_rgb24(&mut self, frame: &[u8]) -> Result<(), BackendError> {
        let pixels = usize::from(self.info.width) * usize::from(self.info.height);
        if frame.len() != pixels * 3 {
            return Err(BackendError::WrongSize {
                got: frame.len() / 3,
                width: self.info.width,
                height: self.info.height,
            });
        }
        self.enqueue(PanelFrame::Rgb888(frame.to_vec()))
    }
}

impl Drop for SerialPanel {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct Worker {
    link: Box<dyn SerialLink>,
    info: PanelInfo,
    config: SerialConfig,
    shared: Arc<PanelShared>,
}

impl Worker {
    fn run(mut self) {
        tracing::debug!("serial panel worker starting");

        self.send_setup();

        let order = if self.info.color_swap {
            ColorOrder::Rbg
        } else {
            ColorOrder::Rgb
        };
        let mut failures: u32 = 0;

        while self.shared.running.load(Ordering::Acquire) {
            let frame = self.shared.queue.lock().expect("transmit lock").pop_front();
            let Some(frame) = frame else {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            };

            let encoded = match self.encode(frame, order) {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::error!("frame encoding failed: {e}");
                    continue;
                }
            };

            match self.link.write_frame(&encoded) {
                Ok(0) => {
                    failures += 1;
                    if failures >= MAX_NO_RESPONSE {
                        tracing::error!(
                            "no response from panel for the past {MAX_NO_RESPONSE} frames, deactivating"
                        );
                        break;
                    }
                }
                Ok(_) => {
                    if failures > 0 {
                        tracing::info!("panel communication restored after {failures} frames");
                        failures = 0;
                    }
                }
                Err(e) => {
                    tracing::error!("panel write failed: {e}, deactivating");
                    break;
                }
            }
        }

        self.shared.alive.store(false, Ordering::Release);
        self.shutdown();
        tracing::debug!("serial panel worker finished");
    }

    /// Enable the matrix and, when configured, program and persist the
    /// panel's own settings. Nothing is written to local disk.
    fn send_setup(&mut self) {
        match protocol::encode_enable(&self.info) {
            Ok(enable) => {
                if let Err(e) = self.link.write_frame(&enable) {
                    tracing::warn!("enable command failed: {e}");
                }
            }
            Err(e) => tracing::warn!("enable command failed: {e}"),
        }

        if !self.info.is_v2 {
            if self.config.rgb_order >= 0 || self.config.brightness >= 0 || self.config.save_settings
            {
                tracing::debug!("panel settings are only programmable on V2 firmware");
            }
            return;
        }

        let mut commands = Vec::new();
        if self.config.rgb_order >= 0 {
            commands.push((protocol::CMD_SET_RGB_ORDER, self.config.rgb_order as u8));
        }
        if self.config.brightness >= 0 {
            commands.push((protocol::CMD_SET_BRIGHTNESS, self.config.brightness as u8));
        }
        for (command, value) in &commands {
            match protocol::build_frame(*command, &[*value]) {
                Ok(frame) => {
                    let _ = self.link.write_frame(&frame);
                }
                Err(e) => tracing::warn!("settings command failed: {e}"),
            }
        }
        if self.config.save_settings && !commands.is_empty() {
            if let Ok(frame) = protocol::build_frame(protocol::CMD_SAVE_SETTINGS, &[]) {
                let _ = self.link.write_frame(&frame);
                tracing::info!("panel asked to persist RGB order and brightness");
            }
        }
    }

    fn encode(&self, frame: PanelFrame, order: ColorOrder) -> Result<Vec<u8>, PanelError> {
        let pixels = usize::from(self.info.width) * usize::from(self.info.height);

        if self.info.is_v2 {
            return match frame {
                PanelFrame::Rgb565(data) => {
                    let mut payload = Vec::with_capacity(pixels * 2);
                    for px in &data {
                        payload.extend_from_slice(&px.to_le_bytes());
                    }
                    protocol::build_frame(protocol::CMD_RGB565, &payload)
                }
                PanelFrame::Rgb888(data) => protocol::build_frame(protocol::CMD_RGB888, &data),
            };
        }

        // Legacy panels take one command byte and three bit-plane
        // sub-frames; RGB24 input is packed down to RGB565 first.
        let data = match frame {
            PanelFrame::Rgb565(data) => data,
            PanelFrame::Rgb888(data) => {
                let mut packed = vec![0u16; pixels];
                transform::rgb24_to_rgb565(&data, &mut packed);
                packed
            }
        };
        let mut encoded = vec![0u8; 1 + pixels / 2 * 3];
        encoded[0] = protocol::CMD_MATRIX_FRAME;
        transform::split_into_rgb_planes(
            &data,
            usize::from(self.info.width),
            usize::from(self.info.height) / 2,
            &mut encoded[1..],
            order,
        );
        Ok(encoded)
    }

    fn shutdown(&mut self) {
        let _ = self.link.flush();
        std::thread::sleep(LINE_SETTLE);
        let _ = self.link.set_dtr(false);
        let _ = self.link.set_rts(false);
        std::thread::sleep(LINE_SETTLE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Instant;

    /// Scripted write outcomes for the mock link.
    #[derive(Clone, Copy)]
    enum WriteOutcome {
        Full,
        Zero,
        Fail,
    }

    struct MockState {
        handshake: [u8; HANDSHAKE_LEN],
        script: Mutex<VecDeque<WriteOutcome>>,
        writes: Mutex<Vec<Vec<u8>>>,
    }

    struct MockLink {
        state: Arc<MockState>,
    }

    impl SerialLink for MockLink {
        fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
            self.state.writes.lock().unwrap().push(frame.to_vec());
            let outcome = self
                .state
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(WriteOutcome::Full);
            match outcome {
                WriteOutcome::Full => Ok(frame.len()),
                WriteOutcome::Zero => Ok(0),
                WriteOutcome::Fail => Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
            }
        }

        fn read_handshake(&mut self, buf: &mut [u8; HANDSHAKE_LEN]) -> io::Result<usize> {
            buf.copy_from_slice(&self.state.handshake);
            Ok(HANDSHAKE_LEN)
        }

        fn set_dtr(&mut self, _level: bool) -> io::Result<()> {
            Ok(())
        }

        fn set_rts(&mut self, _level: bool) -> io::Result<()> {
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn handshake(firmware: &[u8; 8]) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[1..5].copy_from_slice(b"IOIO");
        buf[5..13].copy_from_slice(b"PNLHW001");
        buf[13..21].copy_from_slice(b"BOOT0001");
        buf[21..29].copy_from_slice(firmware);
        buf
    }

    fn mock_panel(
        firmware: &[u8; 8],
        script: Vec<WriteOutcome>,
    ) -> (SerialPanel, Arc<MockState>) {
        let state = Arc::new(MockState {
            handshake: handshake(firmware),
            script: Mutex::new(script.into()),
            writes: Mutex::new(Vec::new()),
        });
        let link = MockLink {
            state: Arc::clone(&state),
        };
        let panel = SerialPanel::open_link(Box::new(link), "mock", &SerialConfig::default())
            .expect("mock handshake succeeds");
        (panel, state)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    /// Feed frames one at a time until `total` writes happened (the first
    /// write is always the enable command).
    fn feed_frames(panel: &mut SerialPanel, state: &MockState, total: usize) -> bool {
        let pixels = usize::from(panel.width()) * usize::from(panel.height());
        let frame = vec![0u16; pixels];
        loop {
            let writes = state.writes.lock().unwrap().len();
            if writes >= total {
                return true;
            }
            if panel.render_rgb565(&frame).is_err() {
                return false;
            }
            if !wait_for(|| {
                state.writes.lock().unwrap().len() > writes
                    || !panel.shared.alive.load(Ordering::Acquire)
            }) {
                return false;
            }
        }
    }

    #[test]
    fn transient_zero_writes_recover_without_deactivation() {
        // 10 good frames, 19 timeouts, then traffic flows again.
        let mut script = vec![WriteOutcome::Full]; // enable
        script.extend(std::iter::repeat(WriteOutcome::Full).take(10));
        script.extend(std::iter::repeat(WriteOutcome::Zero).take(19));
        let (mut panel, state) = mock_panel(b"PIXRV3.1", script);

        assert!(feed_frames(&mut panel, &state, 1 + 10 + 19 + 3));
        assert!(panel.shared.alive.load(Ordering::Acquire));
    }

    #[test]
    fn twenty_consecutive_zero_writes_deactivate() {
        let mut script = vec![WriteOutcome::Full]; // enable
        script.extend(std::iter::repeat(WriteOutcome::Zero).take(64));
        let (mut panel, state) = mock_panel(b"PIXRV3.1", script);

        // The worker exits on the 20th zero write; subsequent renders
        // report the backend inactive.
        feed_frames(&mut panel, &state, 1 + 64);
        assert!(wait_for(|| !panel.shared.alive.load(Ordering::Acquire)));
        assert_eq!(state.writes.lock().unwrap().len(), 1 + 20);

        let pixels = usize::from(panel.width()) * usize::from(panel.height());
        assert!(matches!(
            panel.render_rgb565(&vec![0u16; pixels]),
            Err(BackendError::Inactive)
        ));
    }

    #[test]
    fn hard_write_error_deactivates_immediately() {
        let script = vec![WriteOutcome::Full, WriteOutcome::Fail];
        let (mut panel, state) = mock_panel(b"PIXRV3.1", script);

        feed_frames(&mut panel, &state, 2);
        assert!(wait_for(|| !panel.shared.alive.load(Ordering::Acquire)));
        assert_eq!(state.writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn v2_panel_sends_framed_rgb565() {
        let (mut panel, state) = mock_panel(b"PIXRV3.1", vec![]);
        assert!(feed_frames(&mut panel, &state, 2));

        let writes = state.writes.lock().unwrap();
        // Enable first, in framed form.
        assert_eq!(writes[0], vec![0xFE, 0xFE, 0x02, 0x00, 0x1E, 0x14, 0xAA]);
        // Then the frame: FE FE len cmd payload AA.
        let frame = &writes[1];
        let pixels = 128 * 32;
        assert_eq!(frame.len(), 6 + pixels * 2);
        assert_eq!(&frame[..2], &[0xFE, 0xFE]);
        assert_eq!(frame[4], protocol::CMD_RGB565);
        assert_eq!(*frame.last().unwrap(), 0xAA);
    }

    #[test]
    fn legacy_panel_sends_bit_planes() {
        let (mut panel, state) = mock_panel(b"PIX001.2", vec![]);
        let pixels = usize::from(panel.width()) * usize::from(panel.height());

        let mut frame = vec![0u16; pixels];
        frame[5 * 128 + 5] = 0xFFFF;
        assert!(wait_for(|| {
            state.writes.lock().unwrap().len() >= 1
        }));
        panel.render_rgb565(&frame).expect("alive");
        assert!(wait_for(|| state.writes.lock().unwrap().len() >= 2));

        let writes = state.writes.lock().unwrap();
        // Bare two-byte enable on legacy firmware.
        assert_eq!(writes[0], vec![0x1E, 0x14]);
        let encoded = &writes[1];
        assert_eq!(encoded.len(), 1 + pixels / 2 * 3);
        assert_eq!(encoded[0], protocol::CMD_MATRIX_FRAME);
        // The lone pixel lands at the mapped index in each sub-plane.
        let index = transform::map_adafruit_index(5, 5, 128, 32, 16);
        let subframe = pixels / 2;
        for k in 0..3 {
            assert_eq!(encoded[1 + k * subframe + index], 0b111000);
        }
    }

    #[test]
    fn rgb24_on_legacy_panel_is_packed_first() {
        let (mut panel, state) = mock_panel(b"PIX001.2", vec![]);
        let pixels = usize::from(panel.width()) * usize::from(panel.height());

        panel
            .render_rgb24(&vec![0xFFu8; pixels * 3])
            .expect("alive");
        assert!(wait_for(|| state.writes.lock().unwrap().len() >= 2));

        let writes = state.writes.lock().unwrap();
        let encoded = &writes[1];
        assert_eq!(encoded[0], protocol::CMD_MATRIX_FRAME);
        // All-white input sets every bit of every plane byte.
        assert!(encoded[1..].iter().all(|&b| b == 0b111111));
    }

    #[test]
    fn queue_drops_oldest_beyond_bound() {
        let (panel, _state) = mock_panel(b"PIXRV3.1", vec![]);
        // Stall the worker by filling the queue faster than it drains is
        // not deterministic; exercise the bound directly instead.
        let mut queue = panel.shared.queue.lock().expect("transmit lock");
        for n in 0..10u16 {
            while queue.len() >= MAX_QUEUE_FRAMES {
                queue.pop_front();
            }
            queue.push_back(PanelFrame::Rgb565(vec![n; 1]));
        }
        assert_eq!(queue.len(), MAX_QUEUE_FRAMES);
        match queue.front() {
            Some(PanelFrame::Rgb565(data)) => assert_eq!(data[0], 6),
            _ => panic!("unexpected frame"),
        }
        drop(queue);
    }

    #[test]
    fn wrong_size_frame_is_rejected() {
        let (mut panel, _state) = mock_panel(b"PIXRV3.1", vec![]);
        assert!(matches!(
            panel.render_rgb565(&[0u16; 16]),
            Err(BackendError::WrongSize { .. })
        ));
    }
}
