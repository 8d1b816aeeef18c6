use async_trait::async_trait;
use crate::core::Frame;
use crate::hardware::can_interface::{CanConfig, CanInterface, CanResult, CanStatus};
use crate::input::load_csv;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Plays a recorded CSV log back as if it came off the bus
///
/// Frames are delivered in file order. Once the log is exhausted the
/// interface reports `Disconnected`, which ends the session like an
/// unplugged adapter would.
pub struct ReplayCanInterface {
    name: String,
    path: PathBuf,
    status: CanStatus,
    rx_buffer: VecDeque<Frame>,
    /// Pause between frames; zero replays as fast as the tracker ingests
    frame_interval: Duration,
}

impl ReplayCanInterface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("replay://{}", path.display()),
            path,
            status: CanStatus::Disconnected,
            rx_buffer: VecDeque::new(),
            frame_interval: Duration::ZERO,
        }
    }

    /// Replay from frames already in memory
    pub fn from_frames(name: &str, frames: Vec<Frame>) -> Self {
        Self {
            name: name.to_string(),
            path: PathBuf::new(),
            status: CanStatus::Connected,
            rx_buffer: frames.into(),
            frame_interval: Duration::ZERO,
        }
    }

    pub fn set_frame_interval(&mut self, interval: Duration) {
        self.frame_interval = interval;
    }
}

#[async_trait]
impl CanInterface for ReplayCanInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> CanStatus {
        self.status
    }

    async fn connect(&mut self, _config: CanConfig) -> CanResult<()> {
        if self.path.as_os_str().is_empty() {
            self.status = CanStatus::Connected;
            return Ok(());
        }

        self.status = CanStatus::Connecting;
        let path = self.path.clone();
        let frames = tokio::task::spawn_blocking(move || load_csv(path))
            .await?
            .map_err(|e| {
                self.status = CanStatus::Error;
                format!("{:#}", e)
            })?;

        info!("Replaying {} frames from {}", frames.len(), self.path.display());
        self.rx_buffer = frames.into();
        self.status = CanStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> CanResult<()> {
        self.rx_buffer.clear();
        self.status = CanStatus::Disconnected;
        Ok(())
    }

    async fn receive(&mut self) -> CanResult<Option<Frame>> {
        if self.status != CanStatus::Connected {
            return Ok(None);
        }

        match self.rx_buffer.pop_front() {
            Some(frame) => {
                if !self.frame_interval.is_zero() {
                    tokio::time::sleep(self.frame_interval).await;
                }
                Ok(Some(frame))
            }
            None => {
                info!("End of replay {}", self.name);
                self.status = CanStatus::Disconnected;
                Ok(None)
            }
        }
    }

    fn rx_buffer_size(&self) -> usize {
        self.rx_buffer.len()
    }

    fn clear_rx_buffer(&mut self) {
        self.rx_buffer.clear();
    }
}
