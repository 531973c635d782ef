use std::sync::{Arc, Mutex};

/// One consistent pair of output buffers published by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    /// Ramped level values (indexed paths) or quantized indices (RGB paths).
    pub levels: Vec<u8>,
    /// RGB24 output, 3 bytes per pixel.
    pub rgb24: Vec<u8>,
}

/// An in-process consumer of pipeline output.
///
/// The worker publishes a snapshot pair after every emission; consumers
/// pull with [`take`](Self::take), which clears the updated flag so an
/// unchanged display reads as `None`.
#[derive(Debug)]
pub struct VirtualView {
    width: u16,
    height: u16,
    state: Mutex<ViewState>,
}

#[derive(Debug)]
struct ViewState {
    levels: Vec<u8>,
    rgb24: Vec<u8>,
    updated: bool,
}

impl VirtualView {
    #[must_use]
    pub(crate) fn new(width: u16, height: u16) -> Arc<Self> {
        let pixels = usize::from(width) * usize::from(height);
        Arc::new(Self {
            width,
            height,
            state: Mutex::new(ViewState {
                levels: vec![0; pixels],
                rgb24: vec![0; pixels * 3],
                updated: false,
            }),
        })
    }

    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Publish a new snapshot pair. Called by the pipeline worker only.
    pub(crate) fn publish(&self, levels: &[u8], rgb24: &[u8]) {
        let mut state = self.state.lock().expect("view lock");
        state.levels.copy_from_slice(levels);
        state.rgb24.copy_from_slice(rgb24);
        state.updated = true;
    }

    /// Take the current snapshot if it changed since the last take.
    #[must_use]
    pub fn take(&self) -> Option<FrameSnapshot> {
        let mut state = self.state.lock().expect("view lock");
        if !state.updated {
            return None;
        }
        state.updated = false;
        Some(FrameSnapshot {
            levels: state.levels.clone(),
            rgb24: state.rgb24.clone(),
        })
    }
}
