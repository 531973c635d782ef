// Wire-protocol records for the dmdcast frame stream.
//
// Every message on the TCP stream starts with a StreamHeader. Depending on
// the header's mode it is followed by a PathsHeader plus a fixed-size Update
// record (Data), or by raw RGB565/RGB24 pixel bytes. All multi-byte integers
// are big-endian on the wire.

pub mod header;
pub mod update;

pub use header::{PathsHeader, StreamHeader};
pub use update::Update;

/// Magic at the start of every stream header: the protocol name plus its
/// terminating NUL, compared byte-for-byte.
pub const STREAM_MAGIC: &[u8; 10] = b"DMDStream\0";

/// Magic at the start of a paths header.
pub const PATHS_MAGIC: &[u8; 6] = b"Paths\0";

/// Protocol version carried in the stream header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest frame width any message may announce.
pub const MAX_WIDTH: u16 = 256;

/// Largest frame height any message may announce.
pub const MAX_HEIGHT: u16 = 64;

/// Frame mode discriminant.
///
/// `Data`, `Rgb16` and `Rgb24` are valid stream-header modes; `AlphaNumeric`
/// only ever appears inside an [`Update`] record (the server rejects it at
/// the header level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Data = 1,
    Rgb16 = 2,
    Rgb24 = 3,
    AlphaNumeric = 4,
}

impl Mode {
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Data),
            2 => Some(Self::Rgb16),
            3 => Some(Self::Rgb24),
            4 => Some(Self::AlphaNumeric),
            _ => None,
        }
    }

    /// Whether this mode may appear in a stream header.
    #[must_use]
    pub fn valid_for_stream(self) -> bool {
        matches!(self, Self::Data | Self::Rgb16 | Self::Rgb24)
    }
}

/// Failures while decoding wire records.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("bad stream magic")]
    BadMagic,
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),
    #[error("unknown mode {0}")]
    UnknownMode(u8),
    #[error("mode {0:?} is not valid in a stream header")]
    ModeNotStreamable(Mode),
    #[error("mode {0:?} is not valid in an update record")]
    ModeNotRecordable(Mode),
    #[error("frame dimensions {width}x{height} exceed {max_w}x{max_h}")]
    OversizedFrame {
        width: u16,
        height: u16,
        max_w: u16,
        max_h: u16,
    },
    #[error("payload length {got} does not match {want} for mode {mode:?}")]
    LengthMismatch { mode: Mode, got: u32, want: u32 },
    #[error("string field is not NUL-terminated")]
    UnterminatedString,
}
