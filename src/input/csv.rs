use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use crate::core::Frame;
use tracing::{debug, info};

/// Column positions found in the header
struct Columns {
    id: usize,
    data: usize,
    dlc: Option<usize>,
}

/// Load frames from a CSV file, in file order
///
/// Supports flexible column formats:
/// - time,bus,msg_id,data
/// - timestamp,can_id,dlc,payload
/// - id,hex_data
///
/// Only the identifier, the data and an optional DLC column are used. When a
/// DLC column is present it wins over the number of data bytes.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Frame>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let frames = read_csv(file).with_context(|| format!("Failed to load {}", path.display()))?;
    info!("Loaded {} frames from {}", frames.len(), path.display());
    Ok(frames)
}

/// Read frames from any CSV source
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Frame>> {
    let mut rdr = ::csv::ReaderBuilder::new().trim(::csv::Trim::All).from_reader(reader);

    let columns = detect_columns(rdr.headers()?)?;
    let mut frames = Vec::new();

    for (row, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV row {}", row + 1))?;

        let id_text = record.get(columns.id).context("Missing id column")?;
        let id = parse_id(id_text).with_context(|| format!("Failed to parse CAN ID {:?} on row {}", id_text, row + 1))?;

        let hex_data = record.get(columns.data).context("Missing data column")?;
        let data = Frame::parse_hex(hex_data).with_context(|| format!("Bad data on row {}", row + 1))?;

        let length = match columns.dlc.and_then(|idx| record.get(idx)).filter(|s| !s.is_empty()) {
            Some(dlc) => dlc
                .parse::<usize>()
                .with_context(|| format!("Failed to parse DLC {:?} on row {}", dlc, row + 1))?,
            None => data.len(),
        };

        let frame = Frame::new(id, length, &data).with_context(|| format!("Invalid frame on row {}", row + 1))?;
        if frames.len() < 5 {
            debug!("Row {}: id=0x{:03X} data={}", row + 1, frame.id(), frame.hex_data());
        }
        frames.push(frame);
    }

    Ok(frames)
}

/// Parse a CAN ID (could be decimal or hex like "0x123")
fn parse_id(text: &str) -> Result<u32> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Ok(u32::from_str_radix(hex, 16)?)
    } else {
        Ok(text.parse::<u32>()?)
    }
}

/// Detect column indices from CSV headers
fn detect_columns(headers: &::csv::StringRecord) -> Result<Columns> {
    Ok(Columns {
        id: find_column(headers, &["id", "addr", "msg_id", "can_id", "message_id"])
            .context("Could not find an identifier column")?,
        data: find_column(headers, &["data", "payload", "hex", "bytes"])
            .context("Could not find a data column")?,
        dlc: find_column(headers, &["dlc", "len", "length"]),
    })
}

/// Find a column by checking possible names
fn find_column(headers: &::csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let header_lower = header.to_lowercase();
        names.iter().any(|&name| header_lower == name)
    })
}
