use async_trait::async_trait;
use crate::core::Frame;
use std::error::Error;

/// Result type for CAN interface operations
pub type CanResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Bit rates understood by SLCAN adapters, in the order of their `S<n>` codes
pub const SUPPORTED_BITRATES: [u32; 9] = [
    10_000, 20_000, 50_000, 100_000, 125_000, 250_000, 500_000, 800_000, 1_000_000,
];

/// Configuration for a CAN interface
#[derive(Debug, Clone, PartialEq)]
pub struct CanConfig {
    /// Bitrate in bits per second
    pub bitrate: u32,
    /// Enable listen-only mode
    pub listen_only: bool,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            bitrate: 500_000,
            listen_only: true,
        }
    }
}

/// Status of a CAN interface
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanStatus {
    /// Interface is disconnected
    Disconnected,
    /// Interface is connecting
    Connecting,
    /// Interface is connected and ready
    Connected,
    /// Interface has an error
    Error,
}

/// Source of frames for the tracker
///
/// Implemented by:
/// - USB-CAN serial adapters (SLCAN/Lawicel protocol)
/// - Recorded CSV logs
/// - Mock interfaces for testing
#[async_trait]
pub trait CanInterface: Send {
    /// Get the name/identifier of this interface
    fn name(&self) -> &str;

    /// Get the current status of the interface
    fn status(&self) -> CanStatus;

    /// Connect to the CAN interface with the given configuration
    async fn connect(&mut self, config: CanConfig) -> CanResult<()>;

    /// Disconnect from the CAN interface
    async fn disconnect(&mut self) -> CanResult<()>;

    /// Receive a frame (returns None if no frame is available yet)
    async fn receive(&mut self) -> CanResult<Option<Frame>>;

    /// Get the number of frames in the receive buffer
    fn rx_buffer_size(&self) -> usize;

    /// Clear the receive buffer
    fn clear_rx_buffer(&mut self);
}

/// Information about an available CAN interface
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Interface name/identifier
    pub name: String,
    /// Interface type
    pub interface_type: InterfaceType,
    /// Description
    pub description: Option<String>,
}

/// Type of CAN interface
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterfaceType {
    /// USB-CAN serial adapter
    Serial,
    /// Recorded log file
    Replay,
    /// Virtual/mock interface
    Virtual,
}
