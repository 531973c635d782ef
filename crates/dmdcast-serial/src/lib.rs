// Serial LED-matrix panel backend.
//
// One worker per panel: open the port, handshake once, then drain a small
// transmit queue, encoding each frame for the protocol variant the
// handshake detected.
//
// - protocol.rs: commands, framing, handshake parsing
// - link.rs: the SerialLink seam over the raw port
// - panel.rs: connect/scan and the transmit worker

pub mod link;
pub mod panel;
pub mod protocol;

pub use link::SerialLink;
pub use panel::SerialPanel;
pub use protocol::PanelInfo;

/// Failures while finding, opening or driving a panel.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("no serial panel found")]
    NotFound,
    #[error("handshake response too short: {0} of 29 bytes")]
    ShortHandshake(usize),
    #[error("device did not identify as a panel")]
    BadHandshake,
    #[error("frame payload of {0} bytes exceeds the protocol maximum")]
    FrameTooLarge(usize),
    #[error(transparent)]
    Serial(#[from] serialport::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
