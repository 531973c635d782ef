use crate::PanelError;

/// Legacy bit-plane frame command.
pub const CMD_MATRIX_FRAME: u8 = 0x1F;

/// Enable command, both variants.
pub const CMD_MATRIX_ENABLE: u8 = 0x1E;

/// V2 RGB565 frame command.
pub const CMD_RGB565: u8 = 0x30;

/// V2 RGB888 frame command.
pub const CMD_RGB888: u8 = 0x40;

/// Firmware settings commands (V2 framed form).
pub const CMD_SET_RGB_ORDER: u8 = 0x32;
pub const CMD_SET_BRIGHTNESS: u8 = 0x33;
pub const CMD_SAVE_SETTINGS: u8 = 0x34;

/// V2 packet start marker, sent twice.
pub const FRAME_START: u8 = 0xFE;

/// V2 packet end delimiter.
pub const FRAME_END: u8 = 0xAA;

/// Largest payload a V2 packet may carry.
pub const MAX_DATA_SIZE: usize = 128 * 32 * 3;

/// First byte of the handshake response.
pub const RESPONSE_CONNECTED: u8 = 0x00;

/// Length of the handshake response.
pub const HANDSHAKE_LEN: usize = 29;

/// Consecutive zero-byte writes after which a panel is deactivated.
pub const MAX_NO_RESPONSE: u32 = 20;

/// Transmit queue depth; older frames are dropped beyond this.
pub const MAX_QUEUE_FRAMES: usize = 4;

/// What the handshake told us about the attached panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelInfo {
    pub hardware_id: String,
    pub bootloader_id: String,
    pub firmware: String,
    pub width: u16,
    pub height: u16,
    /// Firmware speaks the framed-packet protocol.
    pub is_v2: bool,
    /// Panel shift registers expect RBG channel order.
    pub color_swap: bool,
}

/// Parse the 29-byte handshake response.
///
/// Byte 0 is the connection acknowledgement, bytes 1..5 the `IOIO` magic,
/// then three 8-byte ASCII fields: hardware id, bootloader id and the
/// firmware tag. The firmware tag encodes geometry and protocol variant:
/// `P?X...` is a 128x32 panel, `P?M...` 64x32, an `R` in position 3 marks
/// the framed V2 protocol and a `C` in position 4 a channel-swapped legacy
/// panel.
///
/// # Errors
///
/// Returns [`PanelError::BadHandshake`] when the response is not a panel.
pub fn parse_handshake(response: &[u8; HANDSHAKE_LEN]) -> Result<PanelInfo, PanelError> {
    if response[0] != RESPONSE_CONNECTED || &response[1..5] != b"IOIO" {
        return Err(PanelError::BadHandshake);
    }

    let field = |at: usize| {
        String::from_utf8_lossy(&response[at..at + 8])
            .trim_end_matches('\0')
            .to_string()
    };
    let hardware_id = field(5);
    let bootloader_id = field(13);
    let firmware = field(21);

    let fw = &response[21..29];
    let mut width = 128;
    let mut height = 32;
    let mut is_v2 = false;
    let mut color_swap = false;

    if fw[0] == b'P' && fw[1] != 0 && fw[2] != 0 && fw[3] != 0 {
        match fw[2] {
            b'X' => (width, height) = (128, 32),
            b'M' => (width, height) = (64, 32),
            _ => {}
        }
        is_v2 = fw[3] == b'R';
        color_swap = fw[4] == b'C' && !is_v2;
    }

    Ok(PanelInfo {
        hardware_id,
        bootloader_id,
        firmware,
        width,
        height,
        is_v2,
        color_swap,
    })
}

/// Build a V2 framed packet: `FE FE len_lo len_hi cmd payload.. AA` with
/// `len` counting the command byte plus the payload.
///
/// # Errors
///
/// Returns [`PanelError::FrameTooLarge`] above [`MAX_DATA_SIZE`].
pub fn build_frame(command: u8, payload: &[u8]) -> Result<Vec<u8>, PanelError> {
    if payload.len() > MAX_DATA_SIZE {
        return Err(PanelError::FrameTooLarge(payload.len()));
    }
    let length = (1 + payload.len()) as u16;
    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.push(FRAME_START);
    frame.push(FRAME_START);
    frame.push((length & 0xFF) as u8);
    frame.push((length >> 8) as u8);
    frame.push(command);
    frame.extend_from_slice(payload);
    frame.push(FRAME_END);
    Ok(frame)
}

/// Argument byte of the enable command: shifter length in 32-column units
/// in the low nibble, a row-count selector in bit 4.
#[must_use]
pub fn enable_arg(width: u16, rows: u16) -> u8 {
    let shifter_len32 = (width / 32) as u8;
    (shifter_len32 & 0x0F) | (u8::from(rows != 8) << 4)
}

/// Encode the enable command for the detected protocol variant.
///
/// # Errors
///
/// Propagates [`build_frame`] failures.
pub fn encode_enable(info: &PanelInfo) -> Result<Vec<u8>, PanelError> {
    let arg = enable_arg(info.width, info.height);
    if info.is_v2 {
        build_frame(CMD_MATRIX_ENABLE, &[arg])
    } else {
        Ok(vec![CMD_MATRIX_ENABLE, arg])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(firmware: &[u8; 8]) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[1..5].copy_from_slice(b"IOIO");
        buf[5..13].copy_from_slice(b"PNLHW001");
        buf[13..21].copy_from_slice(b"BOOT0001");
        buf[21..29].copy_from_slice(firmware);
        buf
    }

    #[test]
    fn handshake_decodes_wide_v2_panel() {
        let info = parse_handshake(&response(b"PIXRV3.1")).unwrap();
        assert_eq!((info.width, info.height), (128, 32));
        assert!(info.is_v2);
        // V2 firmware never reports a channel swap.
        assert!(!info.color_swap);
        assert_eq!(info.hardware_id, "PNLHW001");
        assert_eq!(info.firmware, "PIXRV3.1");
    }

    #[test]
    fn handshake_decodes_legacy_swapped_panel() {
        let info = parse_handshake(&response(b"PIX0C1.2")).unwrap();
        assert!(!info.is_v2);
        assert!(info.color_swap);
    }

    #[test]
    fn handshake_decodes_narrow_panel() {
        let info = parse_handshake(&response(b"PIM001.0")).unwrap();
        assert_eq!((info.width, info.height), (64, 32));
    }

    #[test]
    fn handshake_defaults_on_unknown_firmware_tag() {
        let info = parse_handshake(&response(b"V1.04\0\0\0")).unwrap();
        assert_eq!((info.width, info.height), (128, 32));
        assert!(!info.is_v2);
        assert!(!info.color_swap);
    }

    #[test]
    fn handshake_rejects_wrong_magic() {
        let mut buf = response(b"PIXRV3.1");
        buf[2] = b'X';
        assert!(matches!(parse_handshake(&buf), Err(PanelError::BadHandshake)));

        let mut buf = response(b"PIXRV3.1");
        buf[0] = 0x55;
        assert!(matches!(parse_handshake(&buf), Err(PanelError::BadHandshake)));
    }

    #[test]
    fn framed_packet_layout() {
        let frame = build_frame(CMD_RGB565, &[0x11, 0x22, 0x33]).unwrap();
        assert_eq!(
            frame,
            vec![0xFE, 0xFE, 0x04, 0x00, 0x30, 0x11, 0x22, 0x33, 0xAA]
        );
    }

    #[test]
    fn framed_packet_length_is_little_endian() {
        let payload = vec![0u8; 0x0234 - 1];
        let frame = build_frame(CMD_RGB888, &payload).unwrap();
        assert_eq!(frame[2], 0x34);
        assert_eq!(frame[3], 0x02);
        assert_eq!(*frame.last().unwrap(), FRAME_END);
    }

    #[test]
    fn framed_packet_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_DATA_SIZE + 1];
        assert!(matches!(
            build_frame(CMD_RGB888, &payload),
            Err(PanelError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn enable_command_variants() {
        // 128 columns -> 4 shifter units; 32 rows -> selector bit set.
        assert_eq!(enable_arg(128, 32), 0x14);
        assert_eq!(enable_arg(64, 32), 0x12);
        assert_eq!(enable_arg(128, 8), 0x04);

        let legacy = PanelInfo {
            hardware_id: String::new(),
            bootloader_id: String::new(),
            firmware: String::new(),
            width: 128,
            height: 32,
            is_v2: false,
            color_swap: false,
        };
        assert_eq!(encode_enable(&legacy).unwrap(), vec![0x1E, 0x14]);

        let v2 = PanelInfo { is_v2: true, ..legacy };
        assert_eq!(
            encode_enable(&v2).unwrap(),
            vec![0xFE, 0xFE, 0x02, 0x00, 0x1E, 0x14, 0xAA]
        );
    }
}
