//! JSONL replay source.
//!
//! Reads captured events from JSONL files, one internally tagged record per
//! line:
//!
//! ```text
//! {"kind":"block","peer_id":"enode-a","hash":"0xaa","number":1,"code":7,"observed_at":"2024-01-01T00:00:00Z"}
//! {"kind":"transaction_content","hash":"0xbb","from":"0x11","to":null,...}
//! ```

use super::{EventSource, SourceStats};
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use wirespy_core::Event;

/// Configuration for the JSONL source.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Input file or directory path.
    pub input: PathBuf,

    /// Continue processing on errors (log and skip bad lines).
    pub continue_on_error: bool,

    /// Limit number of files to process.
    pub limit: Option<usize>,

    /// Progress reporting interval (events).
    pub progress_interval: usize,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            continue_on_error: true,
            limit: None,
            progress_interval: 100_000,
        }
    }
}

/// JSONL file event source.
pub struct JsonlSource {
    config: JsonlConfig,
}

impl JsonlSource {
    pub fn new(config: JsonlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JsonlConfig {
        &self.config
    }

    /// Files to read: the input itself, or the sorted `.jsonl`/`.ndjson`
    /// files of a directory.
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let input = &self.config.input;

        let mut files = if input.is_file() {
            vec![input.clone()]
        } else if input.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(input)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .is_some_and(|ext| ext == "jsonl" || ext == "ndjson")
                })
                .collect();
            entries.sort();
            entries
        } else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Input path does not exist: {}", input.display()),
            )));
        };

        if let Some(limit) = self.config.limit {
            files.truncate(limit);
        }

        Ok(files)
    }

    /// Skip a bad line, or fail if errors are not tolerated.
    fn on_bad_line(&self, stats: &mut SourceStats, error: Error) -> Result<()> {
        stats.invalid_events += 1;
        if self.config.continue_on_error {
            Ok(())
        } else {
            Err(error)
        }
    }

    /// Returns `Ok(false)` if the handler asked to stop.
    fn process_file<F>(&self, path: &Path, handler: &mut F, stats: &mut SourceStats) -> Result<bool>
    where
        F: FnMut(Event) -> Result<bool>,
    {
        let reader = BufReader::new(File::open(path)?);

        for (line_num, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("Line {}: I/O error: {}", line_num + 1, e);
                    self.on_bad_line(stats, e.into())?;
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }
            stats.total_events += 1;

            let event = match serde_json::from_str::<Event>(&line) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Line {}: JSON parse error: {}", line_num + 1, e);
                    self.on_bad_line(stats, Error::Json(e.to_string()))?;
                    continue;
                }
            };

            if let Err(e) = event.validate() {
                tracing::warn!("Line {}: Validation error: {}", line_num + 1, e);
                self.on_bad_line(stats, e.into())?;
                continue;
            }

            stats.valid_events += 1;

            match handler(event) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("Handler signaled stop");
                    return Ok(false);
                }
                // Nothing more can be delivered once the pipeline is closed.
                Err(Error::ClosedQueue) => return Err(Error::ClosedQueue),
                Err(e) => {
                    stats.handler_errors += 1;
                    if self.config.continue_on_error {
                        tracing::warn!("Handler error: {}", e);
                    } else {
                        return Err(e);
                    }
                }
            }

            if stats.total_events.is_multiple_of(self.config.progress_interval) {
                tracing::info!(
                    "Progress: {} events, {} valid, {} invalid",
                    stats.total_events,
                    stats.valid_events,
                    stats.invalid_events
                );
            }
        }

        Ok(true)
    }
}

impl EventSource for JsonlSource {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn process<F>(&mut self, mut handler: F) -> Result<SourceStats>
    where
        F: FnMut(Event) -> Result<bool>,
    {
        let mut stats = SourceStats::default();

        let files = self.collect_files()?;
        tracing::info!("Found {} JSONL files to replay", files.len());

        for (file_idx, path) in files.iter().enumerate() {
            tracing::info!(
                "[{}/{}] Replaying: {}",
                file_idx + 1,
                files.len(),
                path.display()
            );
            stats.bytes_read += fs::metadata(path)?.len() as usize;

            match self.process_file(path, &mut handler, &mut stats) {
                Ok(true) => stats.files_processed += 1,
                Ok(false) => {
                    stats.files_processed += 1;
                    break;
                }
                Err(Error::ClosedQueue) => {
                    tracing::info!("Pipeline closed, stopping replay");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error processing {}: {}", path.display(), e);
                    if !self.config.continue_on_error {
                        return Err(e);
                    }
                }
            }
        }

        Ok(stats)
    }
}
