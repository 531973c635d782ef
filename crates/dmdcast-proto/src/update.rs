use crate::{Mode, ProtocolError, MAX_HEIGHT, MAX_WIDTH};

/// Fixed-size update record following a `Data` stream header.
///
/// The record mirrors the in-process update: a mode, an optional pixel
/// payload sized for that mode, and the two segment arrays for
/// alpha-numeric displays. The pixel field is always transmitted at its
/// maximum size so the record length never varies.
///
/// Wire layout (49 676 bytes, integers big-endian):
///
/// | offset | width | field |
/// |---|---|---|
/// | 0      | 1      | mode (`Data`, `Rgb24` or `AlphaNumeric`) |
/// | 1      | 1      | segment layout |
/// | 2      | 1      | depth |
/// | 3      | 2      | width |
/// | 5      | 2      | height |
/// | 7      | 3      | tint r, g, b |
/// | 10     | 1      | has-data flag |
/// | 11     | 1      | has-second-segment-array flag |
/// | 12     | 49 152 | pixel payload (256·64·3 bytes) |
/// | 49 164 | 256    | segment array 1 (128 × u16) |
/// | 49 420 | 256    | segment array 2 (128 × u16) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub mode: Mode,
    pub layout: u8,
    pub depth: u8,
    pub width: u16,
    pub height: u16,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Pixel payload trimmed to the mode-specific length, if present.
    pub data: Option<Vec<u8>>,
    pub seg_data: [u16; 128],
    pub seg_data2: Option<[u16; 128]>,
}

const DATA_FIELD: usize = 256 * 64 * 3;
const SEG_FIELD: usize = 128 * 2;

impl Update {
    /// Size of the encoded record in bytes.
    pub const SIZE: usize = 12 + DATA_FIELD + 2 * SEG_FIELD;

    /// Bytes of pixel payload carried for a mode at the given dimensions.
    fn payload_len(mode: Mode, width: u16, height: u16) -> usize {
        let pixels = usize::from(width) * usize::from(height);
        match mode {
            Mode::Data | Mode::AlphaNumeric => pixels,
            Mode::Rgb24 => pixels * 3,
            Mode::Rgb16 => pixels * 2,
        }
    }

    /// Decode from exactly [`Self::SIZE`] wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on an unknown or non-record mode or
    /// oversized dimensions.
    pub fn decode(buf: &[u8; Self::SIZE]) -> Result<Self, ProtocolError> {
        let mode = Mode::from_wire(buf[0]).ok_or(ProtocolError::UnknownMode(buf[0]))?;
        if mode == Mode::Rgb16 {
            // RGB565 frames travel as raw payload after a Rgb16 stream
            // header, never as update records.
            return Err(ProtocolError::ModeNotRecordable(mode));
        }

        let width = u16::from_be_bytes([buf[3], buf[4]]);
        let height = u16::from_be_bytes([buf[5], buf[6]]);
        if width > MAX_WIDTH || height > MAX_HEIGHT {
            return Err(ProtocolError::OversizedFrame {
                width,
                height,
                max_w: MAX_WIDTH,
                max_h: MAX_HEIGHT,
            });
        }

        let data = (buf[10] != 0).then(|| {
            let len = Self::payload_len(mode, width, height);
            buf[12..12 + len].to_vec()
        });

        let seg_at = 12 + DATA_FIELD;
        let seg_data = decode_segs(&buf[seg_at..seg_at + SEG_FIELD]);
        let seg_data2 = (buf[11] != 0).then(|| decode_segs(&buf[seg_at + SEG_FIELD..]));

        Ok(Self {
            mode,
            layout: buf[1],
            depth: buf[2],
            width,
            height,
            r: buf[7],
            g: buf[8],
            b: buf[9],
            data,
            seg_data,
            seg_data2,
        })
    }

    /// Encode into wire bytes.
    #[must_use]
    pub fn encode(&self) -> Box<[u8; Self::SIZE]> {
        let mut buf = vec![0u8; Self::SIZE].into_boxed_slice();
        buf[0] = self.mode as u8;
        buf[1] = self.layout;
        buf[2] = self.depth;
        buf[3..5].copy_from_slice(&self.width.to_be_bytes());
        buf[5..7].copy_from_slice(&self.height.to_be_bytes());
        buf[7] = self.r;
        buf[8] = self.g;
        buf[9] = self.b;
        buf[10] = u8::from(self.data.is_some());
        buf[11] = u8::from(self.seg_data2.is_some());
        if let Some(data) = &self.data {
            buf[12..12 + data.len().min(DATA_FIELD)]
                .copy_from_slice(&data[..data.len().min(DATA_FIELD)]);
        }
        let seg_at = 12 + DATA_FIELD;
        encode_segs(&mut buf[seg_at..seg_at + SEG_FIELD], &self.seg_data);
        if let Some(segs) = &self.seg_data2 {
            encode_segs(&mut buf[seg_at + SEG_FIELD..], segs);
        }
        buf.try_into().expect("sized above")
    }
}

fn decode_segs(field: &[u8]) -> [u16; 128] {
    let mut segs = [0u16; 128];
    for (seg, pair) in segs.iter_mut().zip(field.chunks_exact(2)) {
        *seg = u16::from_be_bytes([pair[0], pair[1]]);
    }
    segs
}

fn encode_segs(field: &mut [u8], segs: &[u16; 128]) {
    for (pair, seg) in field.chunks_exact_mut(2).zip(segs) {
        pair.copy_from_slice(&seg.to_be_bytes());
    }
}
