use crate::frame::SegmentLayout;
use crate::palette::PALETTE_BYTES;

/// A colorization engine driven by the pipeline's indexed path.
///
/// The engine receives the incoming raw frame (if any), the pipeline's
/// working buffer to rewrite, and the full 64-entry palette to fill. The
/// working buffer persists between calls so an engine can apply palette
/// rotations without a new source frame.
pub trait Colorizer: Send {
    /// Colorize one frame.
    ///
    /// Returns `Ok(true)` when the output changed and must be re-emitted.
    ///
    /// # Errors
    ///
    /// A failing conversion makes the pipeline fall back to the
    /// monochrome-tint path for this frame.
    fn convert(
        &mut self,
        src: Option<&[u8]>,
        dst: &mut [u8],
        palette: &mut [u8; PALETTE_BYTES],
    ) -> Result<bool, ColorizeError>;
}

/// Instantiates a colorizer for a ROM once its alt-color path is known.
///
/// Called at most once per DMD, when both a ROM name and an alt-color path
/// have been supplied. Returning `None` means no colorization exists for
/// this ROM.
pub type ColorizerLoader =
    dyn Fn(&str, &str) -> Option<Box<dyn Colorizer>> + Send + Sync;

/// Rasterizes alpha-numeric segment masks into a 2-bit indexed frame.
///
/// The returned buffer holds one byte per pixel with values in 0..=3 at
/// the renderer's fixed output size.
pub trait SegmentRenderer: Send {
    fn render(
        &mut self,
        layout: SegmentLayout,
        seg_data: &[u16; 128],
        seg_data2: Option<&[u16; 128]>,
    ) -> Vec<u8>;
}

/// Failures reported by a colorization engine.
#[derive(Debug, thiserror::Error)]
pub enum ColorizeError {
    #[error("no colorization for this frame")]
    Miss,
    #[error("colorization engine failed: {0}")]
    Engine(String),
}
