use async_trait::async_trait;
use crate::core::Frame;
use crate::hardware::can_interface::{CanInterface, CanConfig, CanStatus, CanResult, InterfaceType, InterfaceInfo};
use std::collections::VecDeque;
use std::time::Duration;

/// Identifiers the generator cycles through
const GENERATED_IDS: [u32; 5] = [0x0C4, 0x1A0, 0x2F1, 0x3E8, 0x18FF50E5];

/// Mock CAN interface for testing without hardware
///
/// Frames are either injected by the caller or generated from a fixed
/// pattern: a handful of identifiers with a rolling counter byte, a slowly
/// changing byte and an occasional DLC change.
pub struct MockCanInterface {
    name: String,
    status: CanStatus,
    config: Option<CanConfig>,
    rx_buffer: VecDeque<Frame>,
    message_counter: u32,
    auto_generate: bool,
    /// Pause before each generated frame
    generate_interval: Duration,
}

impl MockCanInterface {
    /// Create a new mock interface
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CanStatus::Disconnected,
            config: None,
            rx_buffer: VecDeque::new(),
            message_counter: 0,
            auto_generate: false,
            generate_interval: Duration::ZERO,
        }
    }

    /// Enable automatic frame generation
    pub fn set_auto_generate(&mut self, enabled: bool) {
        self.auto_generate = enabled;
    }

    /// Pace generated traffic, roughly one frame per `interval`
    pub fn set_generate_interval(&mut self, interval: Duration) {
        self.generate_interval = interval;
    }

    /// Add multiple frames to the receive buffer
    pub fn inject_frames(&mut self, frames: impl IntoIterator<Item = Frame>) {
        self.rx_buffer.extend(frames);
    }

    /// Generate a simulated frame
    fn generate_frame(&mut self) -> Frame {
        let n = self.message_counter;
        self.message_counter = self.message_counter.wrapping_add(1);

        let slot = (n as usize) % GENERATED_IDS.len();
        let id = GENERATED_IDS[slot];
        let round = n / GENERATED_IDS.len() as u32;

        let data = [
            (round & 0xFF) as u8,
            ((round >> 6) & 0xFF) as u8,
            0x00,
            slot as u8,
            0xDE,
            0xAD,
            0xBE,
            0xEF,
        ];
        // The last identifier flips between 8 and 4 bytes every 64 rounds
        let length = if slot == GENERATED_IDS.len() - 1 && (round / 64) % 2 == 1 { 4 } else { 8 };

        // length is 4 or 8, always valid
        Frame::new(id, length, &data).unwrap_or_default()
    }
}

#[async_trait]
impl CanInterface for MockCanInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> CanStatus {
        self.status
    }

    async fn connect(&mut self, config: CanConfig) -> CanResult<()> {
        self.config = Some(config);
        self.status = CanStatus::Connected;
        self.message_counter = 0;
        Ok(())
    }

    async fn disconnect(&mut self) -> CanResult<()> {
        self.status = CanStatus::Disconnected;
        self.config = None;
        self.rx_buffer.clear();
        Ok(())
    }

    async fn receive(&mut self) -> CanResult<Option<Frame>> {
        if self.status != CanStatus::Connected {
            return Err("Not connected".into());
        }

        // Generate a frame if auto-generate is enabled and buffer is empty
        if self.auto_generate && self.rx_buffer.is_empty() {
            if !self.generate_interval.is_zero() {
                tokio::time::sleep(self.generate_interval).await;
            }
            let frame = self.generate_frame();
            self.rx_buffer.push_back(frame);
        }

        Ok(self.rx_buffer.pop_front())
    }

    fn rx_buffer_size(&self) -> usize {
        self.rx_buffer.len()
    }

    fn clear_rx_buffer(&mut self) {
        self.rx_buffer.clear();
    }
}

/// List available mock interfaces
pub fn list_mock_interfaces() -> Vec<InterfaceInfo> {
    vec![InterfaceInfo {
        name: "mock0".to_string(),
        interface_type: InterfaceType::Virtual,
        description: Some("Virtual CAN interface for testing".to_string()),
    }]
}
