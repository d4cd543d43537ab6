use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Output encoding of the exporter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Header row then one comma-separated row per record
    #[default]
    Csv,
    /// One JSON object per line
    Json,
    /// `key=value` pairs separated by spaces
    Txt,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Txt => write!(f, "txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub format: ExportFormat,
    /// Output file; stdout when unset.
    pub path: Option<PathBuf>,
    /// Only records whose destination falls in this CIDR prefix are written.
    pub client_prefix: Option<String>,
    /// Stat fields to write, by dotted name. Every field when unset.
    pub stats: Option<Vec<String>>,
}
