use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::DisplayBackend;
use crate::colorize::{Colorizer, ColorizerLoader, SegmentRenderer};
use crate::config::DmdConfig;
use crate::frame::{DmdUpdate, FrameError, Rgb, SegmentLayout, UpdateKind, SEG_WORDS};
use crate::palette::{self, Palette};
use crate::transform;
use crate::virt::VirtualView;

/// Depth of the ingest queue. Overflow drops the oldest pending frames.
const QUEUE_BOUND: usize = 8;

/// Worker sleep while the queue is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Bounded ingest FIFO with newest-wins overflow.
struct UpdateQueue {
    pending: VecDeque<DmdUpdate>,
    overflowed: bool,
}

impl UpdateQueue {
    fn new() -> Self {
        Self {
            pending: VecDeque::with_capacity(QUEUE_BOUND),
            overflowed: false,
        }
    }

    /// Append an update, dropping from the head when full. Returns true on
    /// the first drop of an overflow burst; the caller logs it.
    fn push(&mut self, update: DmdUpdate) -> bool {
        let mut first_drop = false;
        while self.pending.len() >= QUEUE_BOUND {
            self.pending.pop_front();
            if !self.overflowed {
                self.overflowed = true;
                first_drop = true;
            }
        }
        self.pending.push_back(update);
        first_drop
    }

    /// Take the oldest pending update. Draining the queue ends the current
    /// overflow burst.
    fn pop(&mut self) -> Option<DmdUpdate> {
        let update = self.pending.pop_front();
        if self.pending.is_empty() {
            self.overflowed = false;
        }
        update
    }
}

/// ROM identity and engine paths supplied by producers.
#[derive(Default)]
struct RomInfo {
    name: String,
    alt_color_path: String,
    pup_videos_path: String,
}

struct Shared {
    config: DmdConfig,
    running: AtomicBool,
    queue: Mutex<UpdateQueue>,
    buffered: Mutex<Option<DmdUpdate>>,
    backends: Mutex<Vec<Box<dyn DisplayBackend>>>,
    views: Mutex<Vec<Weak<VirtualView>>>,
    colorizer: Mutex<Option<Box<dyn Colorizer>>>,
    colorizer_loader: Mutex<Option<Box<ColorizerLoader>>>,
    segment_renderer: Mutex<Option<Box<dyn SegmentRenderer>>>,
    rom: Mutex<RomInfo>,
}

/// A dot-matrix display with its normalization worker.
///
/// Producers post frames through the `update_*` methods; none of them
/// blocks. A dedicated worker drains the queue, normalizes each frame and
/// fans the result out to attached backends and virtual views. Dropping
/// the `Dmd` stops the worker and, through the backends, their transmit
/// workers.
pub struct Dmd {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Dmd {
    #[must_use]
    pub fn new(config: DmdConfig) -> Self {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            queue: Mutex::new(UpdateQueue::new()),
            buffered: Mutex::new(None),
            backends: Mutex::new(Vec::new()),
            views: Mutex::new(Vec::new()),
            colorizer: Mutex::new(None),
            colorizer_loader: Mutex::new(None),
            segment_renderer: Mutex::new(None),
            rom: Mutex::new(RomInfo::default()),
            config,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::spawn(move || Worker::new(worker_shared).run());

        Self {
            shared,
            worker: Some(worker),
        }
    }

    #[must_use]
    pub fn width(&self) -> u16 {
        self.shared.config.width
    }

    #[must_use]
    pub fn height(&self) -> u16 {
        self.shared.config.height
    }

    /// Whether any hardware backend is attached and alive.
    #[must_use]
    pub fn has_display(&self) -> bool {
        !self.shared.backends.lock().expect("backend lock").is_empty()
    }

    /// Attach a hardware backend. Its transmit worker is joined when the
    /// backend is dropped, either on failure or together with the `Dmd`.
    pub fn attach_backend(&self, backend: Box<dyn DisplayBackend>) {
        tracing::info!(
            name = backend.name(),
            width = backend.width(),
            height = backend.height(),
            "display backend attached"
        );
        self.shared.backends.lock().expect("backend lock").push(backend);
    }

    /// Create a virtual view fed by every emission. The view detaches when
    /// the returned handle is dropped.
    #[must_use]
    pub fn create_view(&self) -> Arc<VirtualView> {
        let view = VirtualView::new(self.width(), self.height());
        self.shared
            .views
            .lock()
            .expect("view lock")
            .push(Arc::downgrade(&view));
        view
    }

    /// Install a colorization engine directly.
    pub fn set_colorizer(&self, colorizer: Box<dyn Colorizer>) {
        *self.shared.colorizer.lock().expect("colorizer lock") = Some(colorizer);
    }

    /// Install the hook that instantiates a colorizer once a ROM name and
    /// alt-color path are both known.
    pub fn set_colorizer_loader(&self, loader: Box<ColorizerLoader>) {
        *self.shared.colorizer_loader.lock().expect("loader lock") = Some(loader);
        self.try_load_colorizer();
    }

    /// Install the alpha-numeric segment renderer.
    pub fn set_segment_renderer(&self, renderer: Box<dyn SegmentRenderer>) {
        *self.shared.segment_renderer.lock().expect("renderer lock") = Some(renderer);
    }

    /// Record the ROM identity and engine paths reported by a producer.
    pub fn set_rom(&self, name: &str, alt_color_path: Option<&str>, pup_videos_path: Option<&str>) {
        {
            let mut rom = self.shared.rom.lock().expect("rom lock");
            rom.name = name.to_string();
            if let Some(path) = alt_color_path {
                rom.alt_color_path = path.to_string();
            }
            if let Some(path) = pup_videos_path {
                rom.pup_videos_path = path.to_string();
            }
        }
        self.try_load_colorizer();
    }

    /// ROM name last announced by a producer.
    #[must_use]
    pub fn rom_name(&self) -> String {
        self.shared.rom.lock().expect("rom lock").name.clone()
    }

    /// Alt-color path last announced or fixed by configuration.
    #[must_use]
    pub fn alt_color_path(&self) -> String {
        self.shared.rom.lock().expect("rom lock").alt_color_path.clone()
    }

    /// PuP videos path last announced or fixed by configuration.
    #[must_use]
    pub fn pup_videos_path(&self) -> String {
        self.shared.rom.lock().expect("rom lock").pup_videos_path.clone()
    }

    fn try_load_colorizer(&self) {
        let mut colorizer = self.shared.colorizer.lock().expect("colorizer lock");
        if colorizer.is_some() {
            return;
        }
        let loader = self.shared.colorizer_loader.lock().expect("loader lock");
        let Some(loader) = loader.as_ref() else {
            return;
        };
        let rom = self.shared.rom.lock().expect("rom lock");
        if rom.name.is_empty() || rom.alt_color_path.is_empty() {
            return;
        }
        if let Some(engine) = loader(&rom.name, &rom.alt_color_path) {
            tracing::info!(rom = %rom.name, "colorizer loaded");
            *colorizer = Some(engine);
        }
    }

    /// Post a palette-indexed frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] for out-of-range dimensions, a payload that
    /// does not match them, or a depth outside {2, 4}. The frame is
    /// dropped; the pipeline continues.
    pub fn update_indexed(
        &self,
        data: &[u8],
        depth: u8,
        width: u16,
        height: u16,
        tint: Rgb,
        buffered: bool,
    ) -> Result<(), FrameError> {
        self.enqueue(DmdUpdate::Indexed {
            data: data.to_vec(),
            depth,
            width,
            height,
            tint,
            buffered,
        })
    }

    /// Post an RGB24 frame. A `depth_hint` below 24 quantizes the frame to
    /// the synthesized palette via luminance.
    ///
    /// # Errors
    ///
    /// See [`update_indexed`](Self::update_indexed).
    pub fn update_rgb24(
        &self,
        data: &[u8],
        depth_hint: u8,
        width: u16,
        height: u16,
        tint: Rgb,
        buffered: bool,
    ) -> Result<(), FrameError> {
        self.enqueue(DmdUpdate::Rgb24 {
            data: data.to_vec(),
            depth_hint,
            width,
            height,
            tint,
            buffered,
        })
    }

    /// Post an RGB565 frame in host byte order.
    ///
    /// # Errors
    ///
    /// See [`update_indexed`](Self::update_indexed).
    pub fn update_rgb565(
        &self,
        data: &[u16],
        width: u16,
        height: u16,
        buffered: bool,
    ) -> Result<(), FrameError> {
        self.enqueue(DmdUpdate::Rgb565 {
            data: data.to_vec(),
            width,
            height,
            buffered,
        })
    }

    /// Post an alpha-numeric segment frame.
    ///
    /// # Errors
    ///
    /// See [`update_indexed`](Self::update_indexed).
    pub fn update_segments(
        &self,
        layout: SegmentLayout,
        seg_data: &[u16; SEG_WORDS],
        seg_data2: Option<&[u16; SEG_WORDS]>,
        tint: Rgb,
    ) -> Result<(), FrameError> {
        self.enqueue(DmdUpdate::Segments {
            layout,
            seg_data: Box::new(*seg_data),
            seg_data2: seg_data2.map(|s| Box::new(*s)),
            tint,
        })
    }

    /// Re-queue the stored buffered frame, if any. Returns whether one was
    /// queued. Used on owner disconnect to redisplay instead of clearing.
    pub fn queue_buffered(&self) -> bool {
        let stored = self.shared.buffered.lock().expect("buffered lock").clone();
        match stored {
            Some(update) => {
                let _ = self.enqueue(update);
                true
            }
            None => false,
        }
    }

    /// Drop the stored buffered frame. Called when a new owner takes over
    /// the display.
    pub fn discard_buffered(&self) {
        *self.shared.buffered.lock().expect("buffered lock") = None;
    }

    fn enqueue(&self, update: DmdUpdate) -> Result<(), FrameError> {
        update.validate()?;
        if update.buffered() {
            *self.shared.buffered.lock().expect("buffered lock") = Some(update.clone());
        }
        let first_drop = self.shared.queue.lock().expect("queue lock").push(update);
        if first_drop {
            tracing::warn!("ingest queue overflow, dropping oldest frames");
        }
        Ok(())
    }

    /// Stop the worker and wait for it to exit.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Dmd {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker-local state: the shadow and output buffers are owned by the
/// thread, never shared.
struct Worker {
    shared: Arc<Shared>,
    width: usize,
    height: usize,
    pixels: usize,
    sam: bool,
    last_kind: Option<UpdateKind>,
    indexed_shadow: Vec<u8>,
    rgb24_shadow: Vec<u8>,
    seg_shadow: [u16; SEG_WORDS],
    seg_shadow2: [u16; SEG_WORDS],
    levels: Vec<u8>,
    rgb24: Vec<u8>,
    rgb565: Vec<u16>,
    palette: Palette,
}

impl Worker {
    fn new(shared: Arc<Shared>) -> Self {
        let width = usize::from(shared.config.width);
        let height = usize::from(shared.config.height);
        let pixels = width * height;
        let sam = shared.config.sam;
        Self {
            shared,
            width,
            height,
            pixels,
            sam,
            last_kind: None,
            indexed_shadow: vec![0; pixels],
            rgb24_shadow: vec![0; pixels * 3],
            seg_shadow: [0; SEG_WORDS],
            seg_shadow2: [0; SEG_WORDS],
            levels: vec![0; pixels],
            rgb24: vec![0; pixels * 3],
            rgb565: vec![0; pixels],
            palette: Palette::default(),
        }
    }

    fn run(mut self) {
        tracing::debug!("pipeline worker starting");
        while self.shared.running.load(Ordering::Acquire) {
            let update = self.shared.queue.lock().expect("queue lock").pop();
            match update {
                Some(update) => self.process(update),
                None => std::thread::sleep(IDLE_SLEEP),
            }
        }
        tracing::debug!("pipeline worker finished");
    }

    fn process(&mut self, update: DmdUpdate) {
        if let Err(e) = update.validate() {
            tracing::warn!("dropping frame: {e}");
            return;
        }

        // A representation switch bypasses change detection for this frame.
        let kind = update.kind();
        let refresh = self.last_kind != Some(kind);
        self.last_kind = Some(kind);

        match update {
            DmdUpdate::Indexed {
                data,
                depth,
                width,
                height,
                tint,
                ..
            } => self.apply_indexed(data, depth, width, height, tint, refresh),
            DmdUpdate::Rgb24 {
                data,
                depth_hint,
                width,
                height,
                tint,
                ..
            } => self.apply_rgb24(data, depth_hint, width, height, tint, refresh),
            DmdUpdate::Rgb565 {
                data,
                width,
                height,
                ..
            } => {
                let mut rgb24 = vec![0u8; data.len() * 3];
                transform::rgb565_to_rgb24(&data, &mut rgb24);
                self.apply_rgb24(rgb24, 24, width, height, Rgb::new(0, 0, 0), refresh);
            }
            DmdUpdate::Segments {
                layout,
                seg_data,
                seg_data2,
                tint,
            } => self.apply_segments(layout, &seg_data, seg_data2.as_deref(), tint, refresh),
        }
    }

    /// Bring an indexed frame to the native size: pass through when equal,
    /// Scale2X at half size, majority-vote halving at double size.
    fn adapt_indexed(&self, data: Vec<u8>, width: u16, height: u16) -> Result<Vec<u8>, FrameError> {
        let (w, h) = (usize::from(width), usize::from(height));
        if (w, h) == (self.width, self.height) {
            return Ok(data);
        }
        if w * 2 == self.width && h * 2 == self.height {
            let mut scaled = vec![0u8; self.pixels];
            transform::scale2x_indexed(&data, w, h, &mut scaled);
            return Ok(scaled);
        }
        if w == self.width * 2 && h == self.height * 2 {
            let mut scaled = vec![0u8; self.pixels];
            transform::scale_down_indexed(&data, w, h, &mut scaled, self.width, self.height);
            return Ok(scaled);
        }
        Err(FrameError::Unadaptable { width, height })
    }

    /// Bring an RGB24 frame to the native size via a bilinear letterbox
    /// resize in RGB565 space.
    fn adapt_rgb24(&self, data: Vec<u8>, width: u16, height: u16) -> Vec<u8> {
        let (w, h) = (usize::from(width), usize::from(height));
        if (w, h) == (self.width, self.height) {
            return data;
        }
        let mut src565 = vec![0u16; w * h];
        transform::rgb24_to_rgb565(&data, &mut src565);
        let mut dst565 = vec![0u16; self.pixels];
        transform::resize_rgb565_bilinear(&src565, w, h, &mut dst565, self.width, self.height);
        let mut scaled = vec![0u8; self.pixels * 3];
        transform::rgb565_to_rgb24(&dst565, &mut scaled);
        scaled
    }

    fn apply_indexed(
        &mut self,
        data: Vec<u8>,
        depth: u8,
        width: u16,
        height: u16,
        tint: Rgb,
        mut refresh: bool,
    ) {
        let data = match self.adapt_indexed(data, width, height) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("dropping frame: {e}");
                return;
            }
        };

        let ramp = palette::level_ramp(depth, self.sam);
        let mask = ramp.len() - 1;
        for (level, &p) in self.levels.iter_mut().zip(&data) {
            *level = ramp[usize::from(p) & mask];
        }

        let mut colored = false;
        {
            let mut colorizer = self.shared.colorizer.lock().expect("colorizer lock");
            if let Some(engine) = colorizer.as_mut() {
                match engine.convert(
                    Some(&data),
                    &mut self.indexed_shadow,
                    self.palette.as_bytes_mut(),
                ) {
                    Ok(changed) => {
                        colored = true;
                        refresh |= changed;
                    }
                    Err(e) => tracing::debug!("colorizer miss, monochrome fallback: {e}"),
                }
            }
        }

        if !colored {
            if self.indexed_shadow != data {
                self.indexed_shadow.copy_from_slice(&data);
                refresh = true;
            }
            let palette = Palette::synthesize(tint, depth);
            if palette != self.palette {
                self.palette = palette;
                refresh = true;
            }
        }

        if !refresh {
            return;
        }

        if colored {
            transform::indexed_to_rgb24(&self.indexed_shadow, self.palette.as_bytes(), &mut self.rgb24);
        } else {
            let shades = palette::ramp_palette(tint, ramp);
            for (i, &p) in self.indexed_shadow.iter().enumerate() {
                let shade = shades[usize::from(p) & mask];
                self.rgb24[i * 3] = shade.r;
                self.rgb24[i * 3 + 1] = shade.g;
                self.rgb24[i * 3 + 2] = shade.b;
            }
        }
        transform::rgb24_to_rgb565(&self.rgb24, &mut self.rgb565);

        self.emit(false);
    }

    fn apply_rgb24(
        &mut self,
        data: Vec<u8>,
        depth_hint: u8,
        width: u16,
        height: u16,
        tint: Rgb,
        mut refresh: bool,
    ) {
        let data = self.adapt_rgb24(data, width, height);

        if depth_hint != 24 {
            let palette = Palette::synthesize(tint, depth_hint);
            if palette != self.palette {
                self.palette = palette;
                refresh = true;
            }
        }

        if self.rgb24_shadow != data {
            refresh = true;
        }
        if !refresh {
            return;
        }
        self.rgb24_shadow.copy_from_slice(&data);

        for i in 0..self.pixels {
            let (mut r, mut g, mut b) = (data[i * 3], data[i * 3 + 1], data[i * 3 + 2]);
            if depth_hint != 24 {
                let level = transform::luminance(r, g, b) >> (8 - depth_hint);
                self.levels[i] = level;
                let entry = self.palette.entry(usize::from(level));
                r = entry.r;
                g = entry.g;
                b = entry.b;
            }
            self.rgb24[i * 3] = r;
            self.rgb24[i * 3 + 1] = g;
            self.rgb24[i * 3 + 2] = b;
            self.rgb565[i] = transform::pack_rgb565(r, g, b);
        }

        self.emit(depth_hint == 24);
    }

    fn apply_segments(
        &mut self,
        layout: SegmentLayout,
        seg_data: &[u16; SEG_WORDS],
        seg_data2: Option<&[u16; SEG_WORDS]>,
        tint: Rgb,
        mut refresh: bool,
    ) {
        if *seg_data != self.seg_shadow {
            self.seg_shadow = *seg_data;
            refresh = true;
        }
        if let Some(second) = seg_data2 {
            if *second != self.seg_shadow2 {
                self.seg_shadow2 = *second;
                refresh = true;
            }
        }
        let palette = Palette::synthesize(tint, 2);
        if palette != self.palette {
            self.palette = palette;
            refresh = true;
        }
        if !refresh {
            return;
        }

        let data = {
            let mut renderer = self.shared.segment_renderer.lock().expect("renderer lock");
            let Some(renderer) = renderer.as_mut() else {
                tracing::debug!("no segment renderer installed, dropping alpha-numeric frame");
                return;
            };
            renderer.render(
                layout,
                &self.seg_shadow,
                seg_data2.map(|_| &self.seg_shadow2),
            )
        };
        if data.len() != self.pixels {
            tracing::warn!(
                got = data.len(),
                want = self.pixels,
                "segment renderer returned a mis-sized frame"
            );
            return;
        }

        let shades = palette::ramp_palette(tint, &palette::LEVELS_WPC);
        for (i, &p) in data.iter().enumerate() {
            let p = usize::from(p) & 3;
            self.levels[i] = palette::LEVELS_WPC[p];
            let shade = shades[p];
            self.rgb24[i * 3] = shade.r;
            self.rgb24[i * 3 + 1] = shade.g;
            self.rgb24[i * 3 + 2] = shade.b;
        }
        transform::rgb24_to_rgb565(&self.rgb24, &mut self.rgb565);

        self.emit(false);
    }

    /// Fan the current output buffers out to every backend and view. A
    /// failing backend is dropped from the active set; dead views are
    /// pruned.
    fn emit(&mut self, raw_rgb24: bool) {
        let native = (self.width, self.height);
        let rgb24 = &self.rgb24;
        let rgb565 = &self.rgb565;

        let mut backends = self.shared.backends.lock().expect("backend lock");
        backends.retain_mut(|backend| {
            let size = (usize::from(backend.width()), usize::from(backend.height()));
            let result = if size == native {
                if raw_rgb24 {
                    backend.render_rgb24(rgb24)
                } else {
                    backend.render_rgb565(rgb565)
                }
            } else {
                let mut resized = vec![0u16; size.0 * size.1];
                transform::resize_rgb565_bilinear(
                    rgb565, native.0, native.1, &mut resized, size.0, size.1,
                );
                backend.render_rgb565(&resized)
            };
            match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(backend = backend.name(), "display backend dropped: {e}");
                    false
                }
            }
        });
        drop(backends);

        let mut views = self.shared.views.lock().expect("view lock");
        views.retain(|slot| match slot.upgrade() {
            Some(view) => {
                view.publish(&self.levels, &self.rgb24);
                true
            }
            None => false,
        });
    }
}
