/// Largest frame width the pipeline accepts.
pub const MAX_WIDTH: u16 = 256;

/// Largest frame height the pipeline accepts.
pub const MAX_HEIGHT: u16 = 64;

/// Number of words in one alpha-numeric segment array.
pub const SEG_WORDS: usize = 128;

/// A monochrome tint. Applied through the brightness curve when no
/// colorizer drives the palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    #[must_use]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Alpha-numeric display layouts understood by the segment renderer.
///
/// The names describe the digit grid: `TwoBySevenAlpha_TwoBySevenNum` is two
/// rows of seven 14-segment digits over two rows of seven 7-segment digits,
/// and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum SegmentLayout {
    None = 0,
    TwoBySixteenAlpha,
    TwoByTwentyAlpha,
    TwoBySevenAlpha_TwoBySevenNum,
    TwoBySevenAlpha_TwoBySevenNum_FourByOneNum,
    TwoBySevenNum_TwoBySevenNum_FourByOneNum,
    TwoBySevenNum_TwoBySevenNum_TenByOneNum,
    TwoBySevenNum_TwoBySevenNum_FourByOneNum_Gen7,
    TwoBySevenNum10_TwoBySevenNum10_FourByOneNum,
    TwoBySixNum_TwoBySixNum_FourByOneNum,
    TwoBySixNum10_TwoBySixNum10_FourByOneNum,
    FourBySevenNum10,
    SixByFourNum_FourByOneNum,
    TwoBySevenNum_FourByOneNum_OneBySixteenAlpha,
    OneBySixteenAlpha_OneBySixteenNum_OneBySevenNum,
    OneBySevenNum_OneBySixteenAlpha_OneBySixteenNum,
    OneBySixteenAlpha_OneBySixteenNum_OneBySevenNum_OneByFourNum,
}

impl SegmentLayout {
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        use SegmentLayout::*;
        Some(match value {
            0 => None,
            1 => TwoBySixteenAlpha,
            2 => TwoByTwentyAlpha,
            3 => TwoBySevenAlpha_TwoBySevenNum,
            4 => TwoBySevenAlpha_TwoBySevenNum_FourByOneNum,
            5 => TwoBySevenNum_TwoBySevenNum_FourByOneNum,
            6 => TwoBySevenNum_TwoBySevenNum_TenByOneNum,
            7 => TwoBySevenNum_TwoBySevenNum_FourByOneNum_Gen7,
            8 => TwoBySevenNum10_TwoBySevenNum10_FourByOneNum,
            9 => TwoBySixNum_TwoBySixNum_FourByOneNum,
            10 => TwoBySixNum10_TwoBySixNum10_FourByOneNum,
            11 => FourBySevenNum10,
            12 => SixByFourNum_FourByOneNum,
            13 => TwoBySevenNum_FourByOneNum_OneBySixteenAlpha,
            14 => OneBySixteenAlpha_OneBySixteenNum_OneBySevenNum,
            15 => OneBySevenNum_OneBySixteenAlpha_OneBySixteenNum,
            16 => OneBySixteenAlpha_OneBySixteenNum_OneBySevenNum_OneByFourNum,
            _ => return Option::None,
        })
    }
}

/// One frame posted to the pipeline. Exactly one payload per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmdUpdate {
    /// Palette-indexed pixels at 2 or 4 bits per pixel.
    Indexed {
        data: Vec<u8>,
        depth: u8,
        width: u16,
        height: u16,
        tint: Rgb,
        buffered: bool,
    },
    /// Raw RGB24 pixels. A `depth_hint` below 24 routes the frame through
    /// luminance quantization onto the synthesized palette.
    Rgb24 {
        data: Vec<u8>,
        depth_hint: u8,
        width: u16,
        height: u16,
        tint: Rgb,
        buffered: bool,
    },
    /// Raw RGB565 pixels, host byte order.
    Rgb565 {
        data: Vec<u16>,
        width: u16,
        height: u16,
        buffered: bool,
    },
    /// Alpha-numeric segment masks, rasterized by the segment renderer.
    Segments {
        layout: SegmentLayout,
        seg_data: Box<[u16; SEG_WORDS]>,
        seg_data2: Option<Box<[u16; SEG_WORDS]>>,
        tint: Rgb,
    },
}

/// Coarse mode of an update, tracked by the worker to force re-emission
/// when consecutive frames switch representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Indexed,
    Rgb,
    Segments,
}

impl DmdUpdate {
    #[must_use]
    pub fn kind(&self) -> UpdateKind {
        match self {
            Self::Indexed { .. } => UpdateKind::Indexed,
            Self::Rgb24 { .. } | Self::Rgb565 { .. } => UpdateKind::Rgb,
            Self::Segments { .. } => UpdateKind::Segments,
        }
    }

    #[must_use]
    pub fn buffered(&self) -> bool {
        match self {
            Self::Indexed { buffered, .. }
            | Self::Rgb24 { buffered, .. }
            | Self::Rgb565 { buffered, .. } => *buffered,
            Self::Segments { .. } => false,
        }
    }

    /// Check dimension bounds, payload length and depth.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the frame cannot be processed; callers
    /// log and drop the frame, the pipeline continues.
    pub fn validate(&self) -> Result<(), FrameError> {
        match self {
            Self::Indexed {
                data,
                depth,
                width,
                height,
                ..
            } => {
                check_dims(*width, *height)?;
                if *depth != 2 && *depth != 4 {
                    return Err(FrameError::InvalidDepth(*depth));
                }
                check_payload(data.len(), usize::from(*width) * usize::from(*height))
            }
            Self::Rgb24 {
                data,
                depth_hint,
                width,
                height,
                ..
            } => {
                check_dims(*width, *height)?;
                if !matches!(depth_hint, 2 | 4 | 24) {
                    return Err(FrameError::InvalidDepth(*depth_hint));
                }
                check_payload(data.len(), usize::from(*width) * usize::from(*height) * 3)
            }
            Self::Rgb565 {
                data,
                width,
                height,
                ..
            } => {
                check_dims(*width, *height)?;
                check_payload(data.len(), usize::from(*width) * usize::from(*height))
            }
            Self::Segments { .. } => Ok(()),
        }
    }
}

fn check_dims(width: u16, height: u16) -> Result<(), FrameError> {
    if width == 0 || height == 0 || width > MAX_WIDTH || height > MAX_HEIGHT {
        return Err(FrameError::InvalidDimensions { width, height });
    }
    Ok(())
}

fn check_payload(got: usize, want: usize) -> Result<(), FrameError> {
    if got != want {
        return Err(FrameError::PayloadMismatch { got, want });
    }
    Ok(())
}

/// Frames the pipeline refuses to process.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame dimensions {width}x{height} out of range")]
    InvalidDimensions { width: u16, height: u16 },
    #[error("payload of {got} units does not match the expected {want}")]
    PayloadMismatch { got: usize, want: usize },
    #[error("unsupported depth {0}")]
    InvalidDepth(u8),
    #[error("frame size cannot be adapted to the {width}x{height} panel")]
    Unadaptable { width: u16, height: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_and_maximal_frames_validate() {
        for (w, h) in [(1u16, 1u16), (MAX_WIDTH, MAX_HEIGHT)] {
            let update = DmdUpdate::Indexed {
                data: vec![0; usize::from(w) * usize::from(h)],
                depth: 2,
                width: w,
                height: h,
                tint: Rgb::new(255, 140, 0),
                buffered: false,
            };
            assert!(update.validate().is_ok(), "{w}x{h}");
        }
    }

    #[test]
    fn oversized_frames_are_rejected() {
        for (w, h) in [(MAX_WIDTH + 1, MAX_HEIGHT), (MAX_WIDTH, MAX_HEIGHT + 1), (0, 32)] {
            let update = DmdUpdate::Rgb24 {
                data: vec![0; usize::from(w) * usize::from(h) * 3],
                depth_hint: 24,
                width: w,
                height: h,
                tint: Rgb::new(255, 255, 255),
                buffered: false,
            };
            assert!(matches!(
                update.validate(),
                Err(FrameError::InvalidDimensions { .. })
            ));
        }
    }

    #[test]
    fn payload_length_must_match_mode() {
        let update = DmdUpdate::Rgb565 {
            data: vec![0; 100],
            width: 128,
            height: 32,
            buffered: false,
        };
        assert!(matches!(
            update.validate(),
            Err(FrameError::PayloadMismatch { got: 100, want: 4096 })
        ));
    }

    #[test]
    fn indexed_depth_is_restricted() {
        let update = DmdUpdate::Indexed {
            data: vec![0; 4096],
            depth: 6,
            width: 128,
            height: 32,
            tint: Rgb::new(255, 0, 0),
            buffered: false,
        };
        assert!(matches!(update.validate(), Err(FrameError::InvalidDepth(6))));
    }

    #[test]
    fn rgb_kinds_share_a_mode() {
        let rgb24 = DmdUpdate::Rgb24 {
            data: vec![0; 12],
            depth_hint: 24,
            width: 2,
            height: 2,
            tint: Rgb::new(0, 0, 0),
            buffered: false,
        };
        let rgb565 = DmdUpdate::Rgb565 {
            data: vec![0; 4],
            width: 2,
            height: 2,
            buffered: false,
        };
        assert_eq!(rgb24.kind(), rgb565.kind());
    }

    #[test]
    fn segment_layout_wire_mapping() {
        assert_eq!(SegmentLayout::from_wire(0), Some(SegmentLayout::None));
        assert_eq!(
            SegmentLayout::from_wire(16),
            Some(SegmentLayout::OneBySixteenAlpha_OneBySixteenNum_OneBySevenNum_OneByFourNum)
        );
        assert_eq!(SegmentLayout::from_wire(17), Option::None);
    }
}
