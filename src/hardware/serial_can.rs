use async_trait::async_trait;
use crate::core::{Frame, FrameError};
use crate::hardware::can_interface::{
    CanConfig, CanInterface, CanResult, CanStatus, InterfaceInfo, InterfaceType, SUPPORTED_BITRATES,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Buffer size for received frames
const RX_BUFFER_SIZE: usize = 10000;

/// Line rate of the USB CDC link; SLCAN adapters ignore it but the OS wants one
const SERIAL_BAUD: u32 = 1_000_000;

/// How long to wait for the `\r` acknowledging a command
const ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a single receive call waits for bytes
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// SLCAN/Lawicel protocol serial CAN interface
///
/// Supports common USB-CAN adapters that use the SLCAN protocol:
/// - CANtact
/// - CANable
/// - Lawicel CANUSB
pub struct SerialCanInterface {
    /// Interface name (serial port path)
    name: String,
    /// Current status
    status: CanStatus,
    /// Serial port handle
    port: Option<tokio_serial::SerialStream>,
    /// Receive buffer
    rx_buffer: VecDeque<Frame>,
    /// Line buffer for accumulating partial SLCAN frames
    line_buffer: String,
}

/// What a single SLCAN line decoded to
#[derive(Debug, PartialEq)]
pub enum SlcanLine {
    /// Data frame
    Frame(Frame),
    /// Remote request: no payload to track
    Remote { id: u32 },
    /// Command acknowledgement or transmit confirmation (`z`/`Z`)
    Ack,
    /// BEL, the adapter's error reply
    Error,
}

/// Errors decoding an SLCAN line
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SlcanError {
    #[error("unknown SLCAN record type {0:?}")]
    UnknownType(char),
    #[error("truncated SLCAN record {0:?}")]
    Truncated(String),
    #[error("bad hex in SLCAN record {0:?}")]
    BadHex(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Map a bit rate to its SLCAN `S<n>` code
pub fn bitrate_code(bitrate: u32) -> Option<char> {
    SUPPORTED_BITRATES
        .iter()
        .position(|&b| b == bitrate)
        .and_then(|index| char::from_digit(index as u32, 10))
}

/// Build SLCAN command to set bitrate
pub fn build_bitrate_command(bitrate: u32) -> CanResult<Vec<u8>> {
    let code = bitrate_code(bitrate)
        .ok_or_else(|| format!("Unsupported bitrate {} bps (supported: {:?})", bitrate, SUPPORTED_BITRATES))?;
    Ok(format!("S{}\r", code).into_bytes())
}

/// Build SLCAN command to open CAN channel
pub fn build_open_command(listen_only: bool) -> Vec<u8> {
    if listen_only {
        b"L\r".to_vec()
    } else {
        b"O\r".to_vec()
    }
}

/// Build SLCAN command to close CAN channel
pub fn build_close_command() -> Vec<u8> {
    b"C\r".to_vec()
}

/// Decode one SLCAN line (without its terminator)
pub fn parse_line(line: &str) -> Result<SlcanLine, SlcanError> {
    let mut chars = line.chars();
    let Some(record_type) = chars.next() else {
        return Ok(SlcanLine::Ack);
    };
    let body = chars.as_str();

    match record_type {
        // Standard CAN frame (11-bit ID)
        't' => parse_data_frame(body, 3),
        // Extended CAN frame (29-bit ID)
        'T' => parse_data_frame(body, 8),
        'r' => parse_remote_frame(body, 3),
        'R' => parse_remote_frame(body, 8),
        'z' | 'Z' => Ok(SlcanLine::Ack),
        '\x07' => Ok(SlcanLine::Error),
        other => Err(SlcanError::UnknownType(other)),
    }
}

/// Split `<id><dlc>` off the front of a record body
fn parse_header(body: &str, id_digits: usize) -> Result<(u32, usize, &str), SlcanError> {
    let truncated = || SlcanError::Truncated(body.to_string());

    let id_text = body.get(..id_digits).ok_or_else(truncated)?;
    let dlc_text = body.get(id_digits..id_digits + 1).ok_or_else(truncated)?;
    let rest = body.get(id_digits + 1..).ok_or_else(truncated)?;

    let id = u32::from_str_radix(id_text, 16).map_err(|_| SlcanError::BadHex(body.to_string()))?;
    let dlc = usize::from_str_radix(dlc_text, 16).map_err(|_| SlcanError::BadHex(body.to_string()))?;

    Ok((id, dlc, rest))
}

/// Format: `IIIL DD..` (standard) or `IIIIIIIIL DD..` (extended), no spaces
fn parse_data_frame(body: &str, id_digits: usize) -> Result<SlcanLine, SlcanError> {
    let (id, dlc, rest) = parse_header(body, id_digits)?;
    if dlc > crate::core::MAX_DLC {
        return Err(FrameError::InvalidFrameLength { length: dlc }.into());
    }

    // Some firmwares append a 4-digit timestamp after the data
    let hex = rest
        .get(..dlc * 2)
        .ok_or_else(|| SlcanError::Truncated(body.to_string()))?;
    let data = Frame::parse_hex(hex).map_err(|_| SlcanError::BadHex(body.to_string()))?;

    Ok(SlcanLine::Frame(Frame::new(id, dlc, &data)?))
}

fn parse_remote_frame(body: &str, id_digits: usize) -> Result<SlcanLine, SlcanError> {
    let (id, _, _) = parse_header(body, id_digits)?;
    Ok(SlcanLine::Remote { id })
}

/// Remove every complete line (`\r` or `\n` terminated) from `buffer`
fn take_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(end) = buffer.find(['\r', '\n']) {
        let line: String = buffer.drain(..=end).collect();
        let line = line.trim_end_matches(['\r', '\n']).trim();
        // A bare BEL is significant, trim() keeps it
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

impl SerialCanInterface {
    /// Create a new serial CAN interface
    pub fn new(port_name: &str) -> Self {
        debug!("Creating new SerialCanInterface for port: {}", port_name);
        Self {
            name: port_name.to_string(),
            status: CanStatus::Disconnected,
            port: None,
            rx_buffer: VecDeque::with_capacity(RX_BUFFER_SIZE),
            line_buffer: String::new(),
        }
    }

    /// List available serial ports that might be CAN interfaces
    pub fn list_serial_ports() -> Vec<String> {
        let ports = match tokio_serial::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Failed to enumerate serial ports: {}", e);
                Vec::new()
            }
        };
        debug!("Found {} serial ports", ports.len());
        ports.into_iter().map(|p| p.port_name).collect()
    }

    /// Read and discard whatever the adapter has already sent
    fn drain_pending(port: &mut tokio_serial::SerialStream) -> usize {
        let mut junk = [0u8; 256];
        let mut total = 0;
        while let Ok(n) = port.try_read(&mut junk) {
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }

    /// Send a command and wait for SLCAN acknowledgment (\r)
    async fn send_command_wait_ack(port: &mut tokio_serial::SerialStream, cmd: &[u8]) -> CanResult<()> {
        let shown = String::from_utf8_lossy(cmd);
        debug!("Sending SLCAN command: {:?}", shown);

        port.write_all(cmd).await
            .map_err(|e| format!("Failed to write command {:?}: {}", shown, e))?;
        port.flush().await
            .map_err(|e| format!("Failed to flush command {:?}: {}", shown, e))?;

        let mut buf = [0u8; 128];
        let deadline = tokio::time::sleep(ACK_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(format!("Command timeout - no ACK from device for: {:?}", shown).into());
                }
                result = port.read(&mut buf) => {
                    match result {
                        Ok(0) => continue,
                        Ok(n) => {
                            if buf[..n].contains(&0x07) {
                                return Err(format!("Device rejected command {:?}", shown).into());
                            }
                            if buf[..n].contains(&b'\r') {
                                debug!("ACK received for command: {:?}", shown);
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            error!("Read error while waiting for ACK: {}", e);
                            return Err(format!("Read error: {}", e).into());
                        }
                    }
                }
            }
        }
    }

    /// Send a command, falling back to fire-and-forget for adapters that never ACK
    async fn send_command(port: &mut tokio_serial::SerialStream, cmd: &[u8]) -> CanResult<()> {
        if let Err(e) = Self::send_command_wait_ack(port, cmd).await {
            if e.to_string().starts_with("Device rejected") {
                return Err(e);
            }
            warn!("{}; continuing without ACK", e);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }

    /// Decode buffered lines into frames
    fn process_lines(&mut self) {
        for line in take_lines(&mut self.line_buffer) {
            match parse_line(&line) {
                Ok(SlcanLine::Frame(frame)) => {
                    debug!("Parsed CAN frame: ID=0x{:03X}, len={}", frame.id(), frame.len());
                    if self.rx_buffer.len() < RX_BUFFER_SIZE {
                        self.rx_buffer.push_back(frame);
                    } else {
                        warn!("RX buffer full, dropping frame 0x{:03X}", frame.id());
                    }
                }
                Ok(SlcanLine::Remote { id }) => trace!("Skipping remote frame 0x{:03X}", id),
                Ok(SlcanLine::Ack) => {}
                Ok(SlcanLine::Error) => warn!("Adapter reported an error"),
                Err(e) => warn!("Failed to parse SLCAN frame {:?}: {}", line, e),
            }
        }
    }
}

#[async_trait]
impl CanInterface for SerialCanInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> CanStatus {
        self.status
    }

    async fn connect(&mut self, config: CanConfig) -> CanResult<()> {
        info!("Connecting to serial port: {} at bitrate: {}", self.name, config.bitrate);
        self.status = CanStatus::Connecting;

        // Validate before touching the device
        let bitrate_cmd = match build_bitrate_command(config.bitrate) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.status = CanStatus::Error;
                return Err(e);
            }
        };

        let mut port = match tokio_serial::new(&self.name, SERIAL_BAUD)
            .timeout(Duration::from_millis(100))
            .open_native_async()
        {
            Ok(port) => port,
            Err(e) => {
                self.status = CanStatus::Error;
                return Err(format!("Failed to open serial port {}: {}", self.name, e).into());
            }
        };

        let cleared = Self::drain_pending(&mut port);
        if cleared > 0 {
            debug!("Cleared {} stale bytes from {}", cleared, self.name);
        }

        // Close any previous session; the reply (ACK or BEL) does not matter
        let _ = port.write_all(&build_close_command()).await;
        let _ = port.flush().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Self::drain_pending(&mut port);

        let result = async {
            Self::send_command(&mut port, &bitrate_cmd).await?;
            info!("Bitrate set to {} bps", config.bitrate);
            Self::send_command(&mut port, &build_open_command(config.listen_only)).await?;
            info!("CAN channel opened (listen_only: {})", config.listen_only);
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        if let Err(e) = result {
            error!("Failed to configure {}: {}", self.name, e);
            self.status = CanStatus::Error;
            return Err(e);
        }

        self.port = Some(port);
        self.status = CanStatus::Connected;
        self.line_buffer.clear();

        info!("Successfully connected to {}", self.name);
        Ok(())
    }

    async fn disconnect(&mut self) -> CanResult<()> {
        info!("Disconnecting from {}", self.name);

        if let Some(mut port) = self.port.take() {
            let _ = port.write_all(&build_close_command()).await;
            let _ = port.flush().await;
        }

        self.status = CanStatus::Disconnected;
        self.rx_buffer.clear();
        self.line_buffer.clear();

        Ok(())
    }

    async fn receive(&mut self) -> CanResult<Option<Frame>> {
        // First return any buffered frames
        if let Some(frame) = self.rx_buffer.pop_front() {
            return Ok(Some(frame));
        }

        let port = self.port.as_mut().ok_or("Not connected")?;
        let mut buf = [0u8; 256];

        match tokio::time::timeout(READ_TIMEOUT, port.read(&mut buf)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => {
                trace!("Received {} bytes from serial port", n);
                // SLCAN is ASCII; anything else is line noise
                self.line_buffer.push_str(&String::from_utf8_lossy(&buf[..n]));
                self.process_lines();
            }
            Ok(Err(e)) => {
                error!("Serial port read error: {}", e);
                self.status = CanStatus::Error;
                return Err(format!("Read error: {}", e).into());
            }
            // Timeout, no data available
            Err(_) => {}
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

/// List all available serial CAN interfaces
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    SerialCanInterface::list_serial_ports()
        .into_iter()
        .map(|name| InterfaceInfo {
            description: Some(format!("Serial port: {}", name)),
            name,
            interface_type: InterfaceType::Serial,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_commands() {
        assert_eq!(build_bitrate_command(10_000).unwrap(), b"S0\r".to_vec());
        assert_eq!(build_bitrate_command(500_000).unwrap(), b"S6\r".to_vec());
        assert_eq!(build_bitrate_command(1_000_000).unwrap(), b"S8\r".to_vec());
        assert!(build_bitrate_command(333_333).is_err());
    }

    #[test]
    fn test_open_close_commands() {
        assert_eq!(build_open_command(true), b"L\r".to_vec());
        assert_eq!(build_open_command(false), b"O\r".to_vec());
        assert_eq!(build_close_command(), b"C\r".to_vec());
    }

    #[test]
    fn test_parse_standard_frame() {
        let parsed = parse_line("t1234DEADBEEF").unwrap();
        assert_eq!(
            parsed,
            SlcanLine::Frame(Frame::from_data(0x123, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap())
        );
    }

    #[test]
    fn test_parse_extended_frame() {
        let parsed = parse_line("T18DAF1102AA55").unwrap();
        assert_eq!(
            parsed,
            SlcanLine::Frame(Frame::from_data(0x18DAF110, &[0xAA, 0x55]).unwrap())
        );
    }

    #[test]
    fn test_parse_frame_with_timestamp_suffix() {
        let parsed = parse_line("t7FF1011234").unwrap();
        assert_eq!(parsed, SlcanLine::Frame(Frame::from_data(0x7FF, &[0x01]).unwrap()));
    }

    #[test]
    fn test_parse_zero_length_frame() {
        let parsed = parse_line("t1000").unwrap();
        assert_eq!(parsed, SlcanLine::Frame(Frame::from_data(0x100, &[]).unwrap()));
    }

    #[test]
    fn test_parse_rejects_bad_records() {
        assert_eq!(
            parse_line("t1239"),
            Err(SlcanError::Frame(FrameError::InvalidFrameLength { length: 9 }))
        );
        assert!(matches!(parse_line("t12"), Err(SlcanError::Truncated(_))));
        assert!(matches!(parse_line("t1232AB"), Err(SlcanError::Truncated(_))));
        assert!(matches!(parse_line("tXYZ1AA"), Err(SlcanError::BadHex(_))));
        assert_eq!(parse_line("x"), Err(SlcanError::UnknownType('x')));
    }

    #[test]
    fn test_parse_remote_and_status_lines() {
        assert_eq!(parse_line("r1232").unwrap(), SlcanLine::Remote { id: 0x123 });
        assert_eq!(parse_line("z").unwrap(), SlcanLine::Ack);
        assert_eq!(parse_line("\x07").unwrap(), SlcanLine::Error);
    }

    #[test]
    fn test_take_lines_keeps_partial_tail() {
        let mut buffer = String::from("t1001AA\rt2002BBCC\nt30");
        let lines = take_lines(&mut buffer);

        assert_eq!(lines, vec!["t1001AA".to_string(), "t2002BBCC".to_string()]);
        assert_eq!(buffer, "t30");

        buffer.push_str("01DD\r\r");
        assert_eq!(take_lines(&mut buffer), vec!["t3001DD".to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_process_lines_buffers_frames_in_order() {
        let mut iface = SerialCanInterface::new("/dev/null");
        iface.line_buffer.push_str("t1001AA\rr2000\rgarbage\rt1001AB\r");
        iface.process_lines();

        assert_eq!(iface.rx_buffer_size(), 2);
        assert_eq!(iface.rx_buffer[0].data(), &[0xAA]);
        assert_eq!(iface.rx_buffer[1].data(), &[0xAB]);
    }
}
