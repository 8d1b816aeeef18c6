use crate::core::{ChangeRecord, FrameTracker};
use crate::hardware::can_interface::{CanConfig, CanInterface, CanStatus, InterfaceType};
use crate::hardware::mock::MockCanInterface;
use crate::hardware::replay::ReplayCanInterface;
use crate::hardware::serial_can::SerialCanInterface;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use chrono::Utc;
use tracing::{error, info, warn};

/// Maximum change-records waiting for the presentation
const MAX_PENDING_UPDATES: usize = 4096;

/// Pace of the virtual interface
const MOCK_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// How long `disconnect` waits for the reader task to close the adapter
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a receive error that left the adapter usable
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Event from the CAN manager to the presentation
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// A frame was ingested
    Changed(ChangeRecord),
    /// Connection state changed
    Status(ConnectionStatus),
    /// Adapter failure, passed through untouched by the tracker
    Error(String),
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Default)]
pub struct ManagerStats {
    pub frames_received: AtomicU64,
    /// Change-records dropped because the presentation fell behind
    pub updates_coalesced: AtomicU64,
    pub errors: AtomicU64,
    pub start_time: std::sync::Mutex<Option<chrono::DateTime<Utc>>>,
}

impl ManagerStats {
    fn reset(&self) {
        self.frames_received.store(0, Ordering::SeqCst);
        self.updates_coalesced.store(0, Ordering::SeqCst);
        self.errors.store(0, Ordering::SeqCst);
        if let Ok(mut start) = self.start_time.lock() {
            *start = Some(Utc::now());
        }
    }

    /// Frames per second since connect
    pub fn frame_rate(&self) -> f64 {
        let start = self.start_time.lock().ok().and_then(|s| *s);
        if let Some(start) = start {
            let elapsed = (Utc::now() - start).num_milliseconds() as f64 / 1000.0;
            if elapsed > 0.0 {
                return self.frames_received.load(Ordering::SeqCst) as f64 / elapsed;
            }
        }
        0.0
    }
}

/// State shared between the manager and its reader task
#[derive(Clone)]
struct Shared {
    status: Arc<Mutex<ConnectionStatus>>,
    tracker: Arc<Mutex<FrameTracker>>,
    stats: Arc<ManagerStats>,
    stop_signal: Arc<AtomicBool>,
    resync: Arc<AtomicBool>,
}

/// Owns the connection to a frame source and feeds the tracker
///
/// One reader task per connection pulls frames in arrival order and ingests
/// each under the tracker lock. Change-records are forwarded to the
/// presentation without blocking; when the presentation falls behind they are
/// dropped and a resync is requested instead, so the tracker itself never
/// misses a frame.
pub struct CanManager {
    shared: Shared,
    events: Option<mpsc::Receiver<ManagerEvent>>,
    /// Current interface name
    interface_name: Arc<Mutex<Option<String>>>,
    task: Option<JoinHandle<()>>,
}

impl Default for CanManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CanManager {
    pub fn new() -> Self {
        Self {
            shared: Shared {
                status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
                tracker: Arc::new(Mutex::new(FrameTracker::new())),
                stats: Arc::new(ManagerStats::default()),
                stop_signal: Arc::new(AtomicBool::new(false)),
                resync: Arc::new(AtomicBool::new(false)),
            },
            events: None,
            interface_name: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    /// Get current connection status
    pub async fn status(&self) -> ConnectionStatus {
        *self.shared.status.lock().await
    }

    /// Get the interface name
    pub async fn interface_name(&self) -> Option<String> {
        self.interface_name.lock().await.clone()
    }

    /// The tracker fed by this manager, for read-only queries
    pub fn tracker(&self) -> Arc<Mutex<FrameTracker>> {
        self.shared.tracker.clone()
    }

    /// Connect to a CAN interface
    ///
    /// `interface` is a serial port path, a CSV file for `Replay`, or any name
    /// for `Virtual`.
    pub async fn connect(&mut self, interface: &str, config: CanConfig, interface_type: InterfaceType) -> Result<(), String> {
        let can_if: Box<dyn CanInterface> = match interface_type {
            InterfaceType::Serial => Box::new(SerialCanInterface::new(interface)),
            InterfaceType::Replay => Box::new(ReplayCanInterface::new(interface)),
            InterfaceType::Virtual => {
                let mut mock = MockCanInterface::new(interface);
                mock.set_auto_generate(true);
                mock.set_generate_interval(MOCK_FRAME_INTERVAL);
                Box::new(mock)
            }
        };
        self.connect_interface(can_if, config).await
    }

    /// Connect to an already constructed interface
    pub async fn connect_interface(&mut self, can_if: Box<dyn CanInterface>, config: CanConfig) -> Result<(), String> {
        if self.task.is_some() {
            self.disconnect().await;
        }

        *self.shared.status.lock().await = ConnectionStatus::Connecting;
        *self.interface_name.lock().await = Some(can_if.name().to_string());

        self.shared.stats.reset();
        self.shared.stop_signal.store(false, Ordering::SeqCst);
        self.shared.resync.store(false, Ordering::SeqCst);

        let (event_sender, event_receiver) = mpsc::channel::<ManagerEvent>(MAX_PENDING_UPDATES);
        self.events = Some(event_receiver);

        let shared = self.shared.clone();
        self.task = Some(tokio::spawn(async move {
            if let Err(e) = Self::run_connection(can_if, config, &shared, &event_sender).await {
                error!("CAN connection error: {}", e);
                *shared.status.lock().await = ConnectionStatus::Error;
                let _ = event_sender.try_send(ManagerEvent::Error(e));
                let _ = event_sender.try_send(ManagerEvent::Status(ConnectionStatus::Error));
            }
        }));

        Ok(())
    }

    async fn run_connection(
        mut can_if: Box<dyn CanInterface>,
        config: CanConfig,
        shared: &Shared,
        events: &mpsc::Sender<ManagerEvent>,
    ) -> Result<(), String> {
        can_if.connect(config)
            .await
            .map_err(|e| format!("Failed to connect to {}: {}", can_if.name(), e))?;

        *shared.status.lock().await = ConnectionStatus::Connected;
        let _ = events.try_send(ManagerEvent::Status(ConnectionStatus::Connected));
        info!("Reading frames from {}", can_if.name());

        loop {
            if shared.stop_signal.load(Ordering::SeqCst) {
                break;
            }

            match can_if.receive().await {
                Ok(Some(frame)) => {
                    let record = shared.tracker.lock().await.ingest(frame);
                    shared.stats.frames_received.fetch_add(1, Ordering::SeqCst);

                    match events.try_send(ManagerEvent::Changed(record)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            shared.stats.updates_coalesced.fetch_add(1, Ordering::SeqCst);
                            shared.resync.store(true, Ordering::SeqCst);
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                Ok(None) => {
                    if can_if.status() == CanStatus::Disconnected {
                        info!("{} has no more frames", can_if.name());
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Err(e) => {
                    shared.stats.errors.fetch_add(1, Ordering::SeqCst);
                    warn!("Receive error on {}: {}", can_if.name(), e);
                    let _ = events.try_send(ManagerEvent::Error(e.to_string()));
                    match can_if.status() {
                        CanStatus::Error => return Err(format!("{} failed: {}", can_if.name(), e)),
                        CanStatus::Disconnected => break,
                        _ => tokio::time::sleep(ERROR_BACKOFF).await,
                    }
                }
            }
        }

        let _ = can_if.disconnect().await;
        *shared.status.lock().await = ConnectionStatus::Disconnected;
        let _ = events.try_send(ManagerEvent::Status(ConnectionStatus::Disconnected));

        Ok(())
    }

    /// Disconnect from the CAN interface
    pub async fn disconnect(&mut self) {
        self.shared.stop_signal.store(true, Ordering::SeqCst);

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                // Stuck in connect or receive; it must not outlive this connection
                warn!("Reader task did not stop within {:?}, aborting", SHUTDOWN_TIMEOUT);
                task.abort();
                let _ = task.await;
            }
        }

        *self.shared.status.lock().await = ConnectionStatus::Disconnected;
        *self.interface_name.lock().await = None;
    }

    /// Take every pending event without waiting
    pub fn poll_events(&mut self) -> Vec<ManagerEvent> {
        let mut pending = Vec::new();
        if let Some(events) = self.events.as_mut() {
            while let Ok(event) = events.try_recv() {
                pending.push(event);
            }
        }
        pending
    }

    /// True once after change-records were dropped; the presentation should
    /// redraw from the tracker
    pub fn take_resync(&self) -> bool {
        self.shared.resync.swap(false, Ordering::SeqCst)
    }

    /// Get statistics
    pub fn get_stats(&self) -> &ManagerStats {
        &self.shared.stats
    }
}
