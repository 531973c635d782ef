use crate::{
    Mode, ProtocolError, MAX_HEIGHT, MAX_WIDTH, PATHS_MAGIC, PROTOCOL_VERSION, STREAM_MAGIC,
};

/// Fixed header at the start of every stream message.
///
/// Wire layout (22 bytes, integers big-endian):
///
/// | offset | width | field |
/// |---|---|---|
/// | 0  | 10 | magic `"DMDStream\0"` |
/// | 10 | 1  | version (must be 1) |
/// | 11 | 1  | mode |
/// | 12 | 2  | width |
/// | 14 | 2  | height |
/// | 16 | 4  | trailing payload length in bytes |
/// | 20 | 1  | buffered flag |
/// | 21 | 1  | disconnect-others flag |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub mode: Mode,
    pub width: u16,
    pub height: u16,
    pub length: u32,
    pub buffered: bool,
    pub disconnect_others: bool,
}

impl StreamHeader {
    /// Size of the encoded header in bytes.
    pub const SIZE: usize = 22;

    /// Decode a header from exactly [`Self::SIZE`] wire bytes.
    ///
    /// Only the protocol-level fields are checked here; call
    /// [`validate_frame`](Self::validate_frame) for the per-frame limits,
    /// after which the receiver still knows `length` and can drain the
    /// payload of a rejected frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on bad magic, unknown version, or a mode
    /// that is not valid at the header level.
    pub fn decode(buf: &[u8; Self::SIZE]) -> Result<Self, ProtocolError> {
        if &buf[..10] != STREAM_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        if buf[10] != PROTOCOL_VERSION {
            return Err(ProtocolError::BadVersion(buf[10]));
        }
        let mode = Mode::from_wire(buf[11]).ok_or(ProtocolError::UnknownMode(buf[11]))?;
        if !mode.valid_for_stream() {
            return Err(ProtocolError::ModeNotStreamable(mode));
        }

        Ok(Self {
            mode,
            width: u16::from_be_bytes([buf[12], buf[13]]),
            height: u16::from_be_bytes([buf[14], buf[15]]),
            length: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
            buffered: buf[20] != 0,
            disconnect_others: buf[21] != 0,
        })
    }

    /// Check the announced dimensions and payload length.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the frame is oversized or its length
    /// disagrees with the mode; the message framing itself is intact and
    /// `self.length` payload bytes follow on the wire.
    pub fn validate_frame(&self) -> Result<(), ProtocolError> {
        if self.width > MAX_WIDTH || self.height > MAX_HEIGHT {
            return Err(ProtocolError::OversizedFrame {
                width: self.width,
                height: self.height,
                max_w: MAX_WIDTH,
                max_h: MAX_HEIGHT,
            });
        }
        self.check_length()
    }

    /// Encode into wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..10].copy_from_slice(STREAM_MAGIC);
        buf[10] = PROTOCOL_VERSION;
        buf[11] = self.mode as u8;
        buf[12..14].copy_from_slice(&self.width.to_be_bytes());
        buf[14..16].copy_from_slice(&self.height.to_be_bytes());
        buf[16..20].copy_from_slice(&self.length.to_be_bytes());
        buf[20] = u8::from(self.buffered);
        buf[21] = u8::from(self.disconnect_others);
        buf
    }

    /// The raw pixel modes announce their payload size up front; it must
    /// agree with the announced dimensions.
    fn check_length(&self) -> Result<(), ProtocolError> {
        let pixels = u32::from(self.width) * u32::from(self.height);
        let want = match self.mode {
            Mode::Rgb16 => pixels * 2,
            Mode::Rgb24 => pixels * 3,
            // Data mode is followed by fixed-size records, not `length` bytes.
            _ => return Ok(()),
        };
        if self.length != want {
            return Err(ProtocolError::LengthMismatch {
                mode: self.mode,
                got: self.length,
                want,
            });
        }
        Ok(())
    }
}

/// Secondary header following a `Data` stream header.
///
/// Wire layout (550 bytes): 6-byte magic `"Paths\0"`, a 32-byte
/// NUL-terminated ROM name, then two 256-byte NUL-terminated paths
/// (alt-color and PuP videos).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathsHeader {
    pub rom_name: String,
    pub alt_color_path: String,
    pub pup_videos_path: String,
}

impl PathsHeader {
    pub const SIZE: usize = 6 + Self::NAME_FIELD + 2 * Self::PATH_FIELD;
    const NAME_FIELD: usize = 32;
    const PATH_FIELD: usize = 256;

    /// Decode from exactly [`Self::SIZE`] wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on bad magic or an unterminated string
    /// field. Non-UTF-8 bytes inside a field are replaced.
    pub fn decode(buf: &[u8; Self::SIZE]) -> Result<Self, ProtocolError> {
        if &buf[..6] != PATHS_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let mut offset = 6;
        let rom_name = take_cstr(&buf[offset..offset + Self::NAME_FIELD])?;
        offset += Self::NAME_FIELD;
        let alt_color_path = take_cstr(&buf[offset..offset + Self::PATH_FIELD])?;
        offset += Self::PATH_FIELD;
        let pup_videos_path = take_cstr(&buf[offset..offset + Self::PATH_FIELD])?;

        Ok(Self {
            rom_name,
            alt_color_path,
            pup_videos_path,
        })
    }

    /// Encode into wire bytes. Strings longer than their field are
    /// truncated to leave room for the NUL.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..6].copy_from_slice(PATHS_MAGIC);
        put_cstr(&mut buf[6..6 + Self::NAME_FIELD], &self.rom_name);
        let paths_at = 6 + Self::NAME_FIELD;
        put_cstr(
            &mut buf[paths_at..paths_at + Self::PATH_FIELD],
            &self.alt_color_path,
        );
        put_cstr(
            &mut buf[paths_at + Self::PATH_FIELD..],
            &self.pup_videos_path,
        );
        buf
    }
}

fn take_cstr(field: &[u8]) -> Result<String, ProtocolError> {
    let end = field
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::UnterminatedString)?;
    Ok(String::from_utf8_lossy(&field[..end]).into_owned())
}

fn put_cstr(field: &mut [u8], value: &str) {
    let len = value.len().min(field.len() - 1);
    field[..len].copy_from_slice(&value.as_bytes()[..len]);
}
