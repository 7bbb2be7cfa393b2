//! Human-readable and JSON renderers selected by `--format`.

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Something a command can print, in either format.
pub trait Output: Serialize {
    fn write_human(&self) -> String;

    fn write(&self, format: OutputFormat) -> anyhow::Result<String> {
        match format {
            OutputFormat::Human => Ok(self.write_human()),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }
}
