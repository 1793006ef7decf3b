use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ConvertResult, ProgressEvent, ProgressSink, ShareResult};
use crate::correlator::RunMap;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_runs(runs: &RunMap) -> io::Result<()> {
        Self::print_json(runs)
    }

    pub fn print_share(result: &ShareResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_convert(result: &ConvertResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Reports progress on the log stream, leaving stdout to the JSON result.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}
