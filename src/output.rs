use std::io::{self, Write};

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink, RunSummary, StatsResult};
use crate::catalogue::write_bytes_atomic;
use crate::error::KiraError;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_stats(result: &StatsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn write_report(summary: &RunSummary, path: &Utf8Path) -> Result<(), KiraError> {
        let mut json = serde_json::to_vec_pretty(summary)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        json.push(b'\n');
        write_bytes_atomic(path, &json)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
