use anyhow::{Context, Result};
use cantaloupe::hardware::serial_can::bitrate_code;
use cantaloupe::hardware::can_interface::SUPPORTED_BITRATES;
use cantaloupe::hardware::{list_interfaces, CanConfig, CanManager, ConnectionStatus, InterfaceType, ManagerEvent, ReplayCanInterface};
use cantaloupe::ui::MonitorGrid;
use cantaloupe::AppSettings;
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Live CAN bus monitor: one row per identifier, changed bytes highlighted
#[derive(Parser, Debug)]
#[command(name = "cantaloupe")]
#[command(about = "Live CAN bus monitor for SLCAN adapters", long_about = None)]
#[command(version)]
struct Args {
    /// List available interfaces and exit
    #[arg(long)]
    list: bool,

    /// Serial port of an SLCAN adapter (default: the last port used)
    #[arg(short, long, value_name = "PORT")]
    port: Option<String>,

    /// Use the virtual interface instead of hardware
    #[arg(long, conflicts_with_all = ["port", "replay"])]
    mock: bool,

    /// Replay a CSV log (columns: id, data, optional dlc)
    #[arg(long, value_name = "FILE", conflicts_with = "port")]
    replay: Option<PathBuf>,

    /// Delay between replayed frames in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 0)]
    replay_interval: u64,

    /// Bus bit rate in bits per second (default: the last one used)
    #[arg(short, long, value_name = "BPS")]
    bitrate: Option<u32>,

    /// Open the channel in normal mode instead of listen-only
    #[arg(long)]
    active: bool,

    /// Start with "mark new changes" on
    #[arg(long)]
    mark_new: bool,

    /// Screen refresh period in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 100)]
    refresh_ms: u64,

    /// Disable colours
    #[arg(long)]
    no_color: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list {
        for interface in list_interfaces() {
            println!(
                "{:<24} {}",
                interface.name,
                interface.description.as_deref().unwrap_or("")
            );
        }
        return Ok(());
    }

    let mut settings = AppSettings::load();
    if let Some(bitrate) = args.bitrate {
        settings.bitrate = bitrate;
    }
    if args.mark_new {
        settings.mark_new_changes = true;
    }
    if args.active {
        settings.listen_only = false;
    }

    if bitrate_code(settings.bitrate).is_none() {
        anyhow::bail!(
            "Unsupported bitrate {} bps, expected one of {:?}",
            settings.bitrate,
            SUPPORTED_BITRATES
        );
    }

    let config = CanConfig {
        bitrate: settings.bitrate,
        listen_only: settings.listen_only,
    };

    let mut manager = CanManager::new();
    let mut port = None;
    if args.mock {
        connect(&mut manager, "mock0", config, InterfaceType::Virtual).await?;
    } else if let Some(path) = &args.replay {
        let mut source = ReplayCanInterface::new(path);
        source.set_frame_interval(Duration::from_millis(args.replay_interval));
        manager
            .connect_interface(Box::new(source), config)
            .await
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to replay {}", path.display()))?;
    } else {
        let serial = args
            .port
            .clone()
            .or_else(|| settings.last_port.clone())
            .context("No serial port given; use --port (see --list), --mock or --replay")?;
        connect(&mut manager, &serial, config, InterfaceType::Serial).await?;
        port = Some(serial);
    }

    let result = run_monitor(&mut manager, &mut settings, port.as_deref(), &args).await;

    manager.disconnect().await;

    // The connection itself was stored when it came up; keep only the display mode here
    let mut stored = AppSettings::load();
    stored.mark_new_changes = settings.mark_new_changes;
    if let Err(e) = stored.save() {
        warn!("Failed to save settings: {:#}", e);
    }

    result
}

/// Store the session's connection once the source reports `Connected`
///
/// Returns whether `settings` was updated. A port that never came up is
/// not remembered.
fn remember_connection(settings: &mut AppSettings, status: ConnectionStatus, port: Option<&str>) -> bool {
    if status != ConnectionStatus::Connected {
        return false;
    }
    if let Some(port) = port {
        settings.last_port = Some(port.to_string());
    }
    true
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stderr, so log lines do not land inside the table
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(manager: &mut CanManager, interface: &str, config: CanConfig, interface_type: InterfaceType) -> Result<()> {
    info!("Connecting to {} ({:?}) at {} bps", interface, interface_type, config.bitrate);
    manager
        .connect(interface, config, interface_type)
        .await
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("Failed to connect to {}", interface))
}

/// Screen loop: apply pending change-records, redraw, handle commands
async fn run_monitor(manager: &mut CanManager, settings: &mut AppSettings, port: Option<&str>, args: &Args) -> Result<()> {
    let color = !args.no_color && std::io::stdout().is_terminal();
    let tracker = manager.tracker();
    let mut grid = MonitorGrid::new(settings.mark_new_changes);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.refresh_ms.max(10)));
    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_error: Option<String> = None;
    let mut remembered = false;

    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Status first: everything sent before it changed is already queued
                let status = manager.status().await;
                let events = manager.poll_events();
                let resync = manager.take_resync();

                if !remembered && remember_connection(settings, status, port) {
                    remembered = true;
                    settings.mark_new_changes = grid.mark_new_changes();
                    if let Err(e) = settings.save() {
                        warn!("Failed to save settings: {:#}", e);
                    }
                }

                {
                    let tracker = tracker.lock().await;
                    for event in &events {
                        match event {
                            ManagerEvent::Changed(record) => grid.apply(record, &tracker),
                            ManagerEvent::Status(status) => info!("Connection status: {:?}", status),
                            ManagerEvent::Error(e) => last_error = Some(e.clone()),
                        }
                    }
                    if resync {
                        grid.resync(&tracker);
                    }
                }

                draw(manager, &grid, status, last_error.as_deref(), color).await?;

                match status {
                    ConnectionStatus::Disconnected => break Ok(()),
                    ConnectionStatus::Error => {
                        break Err(anyhow::anyhow!(last_error.clone().unwrap_or_else(|| "Connection failed".to_string())));
                    }
                    _ => {}
                }
            }
            line = commands.next_line(), if stdin_open => {
                match line {
                    Ok(Some(command)) => match command.trim() {
                        "c" => grid.clear_marks(),
                        "m" => grid.set_mark_new_changes(!grid.mark_new_changes()),
                        "q" => break Ok(()),
                        "" => {}
                        other => warn!("Unknown command {:?}", other),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Failed to read commands: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    settings.mark_new_changes = grid.mark_new_changes();
    result
}

async fn draw(manager: &CanManager, grid: &MonitorGrid, status: ConnectionStatus, last_error: Option<&str>, color: bool) -> Result<()> {
    let stats = manager.get_stats();
    let interface = manager.interface_name().await.unwrap_or_default();
    let mut out = std::io::stdout().lock();

    if color {
        // Clear screen, cursor home
        write!(out, "\x1b[2J\x1b[H")?;
    }
    writeln!(
        out,
        "{} | {:?} | {:.0} frames/s | {} ids | {} errors | mark new changes: {}",
        interface,
        status,
        stats.frame_rate(),
        grid.rows().len(),
        stats.errors.load(Ordering::Relaxed),
        if grid.mark_new_changes() { "on" } else { "off" }
    )?;
    if let Some(error) = last_error {
        writeln!(out, "last error: {}", error)?;
    }
    write!(out, "{}", grid.render(color))?;
    writeln!(out, "[c] clear marks  [m] toggle mark new changes  [q] quit  (then Enter)")?;
    out.flush()?;

    Ok(())
}
