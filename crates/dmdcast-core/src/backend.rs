/// A hardware display attached to the pipeline.
///
/// Render calls only enqueue onto the backend's own transmit worker and
/// must not block. A backend whose worker has died reports
/// [`BackendError::Inactive`]; the pipeline drops it from the active set.
pub trait DisplayBackend: Send {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Native panel width in pixels.
    fn width(&self) -> u16;

    /// Native panel height in pixels.
    fn height(&self) -> u16;

    /// Queue an RGB565 frame sized for the native resolution.
    fn render_rgb565(&mut self, frame: &[u16]) -> Result<(), BackendError>;

    /// Queue a raw RGB24 frame sized for the native resolution.
    fn render_rgb24(&mut self, frame: &[u8]) -> Result<(), BackendError>;
}

/// Failures surfaced by a display backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend worker is no longer running")]
    Inactive,
    #[error("frame of {got} pixels does not fit a {width}x{height} panel")]
    WrongSize { got: usize, width: u16, height: u16 },
}
