/// Maximum number of payload bytes in a classic CAN frame
pub const MAX_DLC: usize = 8;

/// Highest 11-bit (standard) identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Errors raised while constructing frames
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid frame length: {length} (DLC must be 0-8)")]
    InvalidFrameLength { length: usize },

    #[error("Invalid hex data: {0}")]
    InvalidHex(String),
}

/// One observation of a CAN bus message
///
/// Only the first `length` payload bytes are meaningful. The remaining slots
/// are always zero so that two frames with equal visible content compare equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Frame {
    id: u32,
    length: u8,
    payload: [u8; MAX_DLC],
}

impl Frame {
    /// Create a frame with an explicit DLC
    ///
    /// `data` beyond `length` is ignored; missing bytes are zero-filled.
    pub fn new(id: u32, length: usize, data: &[u8]) -> Result<Self, FrameError> {
        if length > MAX_DLC {
            return Err(FrameError::InvalidFrameLength { length });
        }

        let mut payload = [0u8; MAX_DLC];
        let copied = data.len().min(length);
        payload[..copied].copy_from_slice(&data[..copied]);

        Ok(Self {
            id,
            length: length as u8,
            payload,
        })
    }

    /// Create a frame whose DLC is the number of bytes supplied
    pub fn from_data(id: u32, data: &[u8]) -> Result<Self, FrameError> {
        Self::new(id, data.len(), data)
    }

    /// CAN arbitration identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Data length code
    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The meaningful payload bytes
    pub fn data(&self) -> &[u8] {
        &self.payload[..self.len()]
    }

    /// Byte at `slot`, or `None` past the DLC
    pub fn byte(&self, slot: usize) -> Option<u8> {
        self.data().get(slot).copied()
    }

    /// Check if this is an extended (29-bit) CAN ID
    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }

    /// Identifier formatted the way bus tools print it
    pub fn id_text(&self) -> String {
        if self.is_extended() {
            format!("{:08X}", self.id)
        } else {
            format!("{:03X}", self.id)
        }
    }

    /// Get data as hex string
    pub fn hex_data(&self) -> String {
        self.data()
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse hex string to data bytes
    pub fn parse_hex(hex: &str) -> Result<Vec<u8>, FrameError> {
        let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
        let hex = hex
            .strip_prefix("0x")
            .or_else(|| hex.strip_prefix("0X"))
            .unwrap_or(&hex);

        if hex.len() % 2 != 0 {
            return Err(FrameError::InvalidHex(format!(
                "odd number of digits in {:?}",
                hex
            )));
        }

        (0..hex.len())
            .step_by(2)
            .map(|i| {
                hex.get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(|| FrameError::InvalidHex(hex.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_long_dlc() {
        assert_eq!(
            Frame::new(0x100, 9, &[0; 9]),
            Err(FrameError::InvalidFrameLength { length: 9 })
        );
        assert!(Frame::from_data(0x100, &[0; 12]).is_err());
    }

    #[test]
    fn test_new_ignores_bytes_past_dlc() {
        let frame = Frame::new(0x100, 2, &[9, 10, 11, 12]).unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.data(), &[9, 10]);
        assert_eq!(frame.byte(2), None);
        assert_eq!(frame, Frame::from_data(0x100, &[9, 10]).unwrap());
    }

    #[test]
    fn test_new_zero_fills_short_data() {
        let frame = Frame::new(0x100, 4, &[0xAA]).unwrap();
        assert_eq!(frame.data(), &[0xAA, 0, 0, 0]);
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::new(0x7FF, 0, &[]).unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.hex_data(), "");
    }

    #[test]
    fn test_id_text() {
        assert_eq!(Frame::from_data(0x12, &[]).unwrap().id_text(), "012");
        assert_eq!(Frame::from_data(0x18DAF110, &[]).unwrap().id_text(), "18DAF110");
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(
            Frame::parse_hex("12 34 AB CD").unwrap(),
            vec![0x12, 0x34, 0xAB, 0xCD]
        );
        assert_eq!(
            Frame::parse_hex("0x1234abcd").unwrap(),
            vec![0x12, 0x34, 0xAB, 0xCD]
        );
        assert!(Frame::parse_hex("123").is_err());
        assert!(Frame::parse_hex("zz").is_err());
    }
}
