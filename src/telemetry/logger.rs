//! # Telemetry Logger
//!
//! Appends [`TelemetryRecord`]s to `telemetry_NNNNNN.jsonl` files in the log
//! directory. A file is closed after `max_records_per_file` records and only
//! the newest `max_files_to_keep` files are retained.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::types::TelemetryRecord;
use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::link::FrameStats;
use crate::store::ObservableStore;

const FILE_PREFIX: &str = "telemetry_";
const FILE_SUFFIX: &str = ".jsonl";

/// Rotating JSONL writer
pub struct TelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    sequence: u32,
    records_in_file: usize,
    writer: BufWriter<File>,
}

fn file_name(sequence: u32) -> String {
    format!("{}{:06}{}", FILE_PREFIX, sequence, FILE_SUFFIX)
}

fn parse_sequence(name: &str) -> Option<u32> {
    name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?.parse().ok()
}

/// Sequence numbers of the log files in `dir`, oldest first
fn existing_sequences(dir: &Path) -> Result<Vec<u32>> {
    let mut sequences = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(seq) = entry.file_name().to_str().and_then(parse_sequence) {
            sequences.push(seq);
        }
    }
    sequences.sort_unstable();
    Ok(sequences)
}

fn open_file(dir: &Path, sequence: u32) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(file_name(sequence)))?;
    Ok(BufWriter::new(file))
}

impl TelemetryLogger {
    /// Create the log directory if needed and start a new file after any
    /// existing ones
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or file cannot be created.
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.log_dir);
        fs::create_dir_all(&dir)?;

        let sequence = existing_sequences(&dir)?.last().map_or(0, |s| s + 1);
        let writer = open_file(&dir, sequence)?;
        info!("Telemetry logging to {}", dir.join(file_name(sequence)).display());

        let mut logger = Self {
            dir,
            max_records_per_file: config.max_records_per_file.max(1),
            max_files_to_keep: config.max_files_to_keep.max(1),
            sequence,
            records_in_file: 0,
            writer,
        };
        logger.prune()?;
        Ok(logger)
    }

    /// Path of the file currently written
    pub fn current_path(&self) -> PathBuf {
        self.dir.join(file_name(self.sequence))
    }

    /// Append one record as a JSON line
    ///
    /// # Errors
    ///
    /// Returns a JSON or I/O error if the record cannot be written.
    pub fn write(&mut self, record: &TelemetryRecord) -> Result<()> {
        if self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records_in_file += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.sequence += 1;
        self.writer = open_file(&self.dir, self.sequence)?;
        self.records_in_file = 0;
        debug!("Telemetry rotated to {}", file_name(self.sequence));
        self.prune()
    }

    /// Delete the oldest files beyond `max_files_to_keep`
    fn prune(&mut self) -> Result<()> {
        let sequences = existing_sequences(&self.dir)?;
        let excess = sequences.len().saturating_sub(self.max_files_to_keep);
        for seq in &sequences[..excess] {
            let path = self.dir.join(file_name(*seq));
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

/// Spawn the task that logs one record every `period`
pub fn spawn_telemetry(
    mut logger: TelemetryLogger,
    store: Arc<ObservableStore>,
    stats: Arc<FrameStats>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let record = TelemetryRecord::capture(&store, &stats);
            if let Err(e) = logger.write(&record) {
                warn!("Telemetry write failed: {}", e);
            }
        }
    })
}
