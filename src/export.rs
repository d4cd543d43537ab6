//! Record exporters.
//!
//! An [`Exporter`] is the [`EventHandler`] the collector hands drained
//! records to. It drops records whose destination is outside the configured
//! client prefix, flattens the rest and writes one line per record in CSV,
//! JSON or plain text, to a file or to stdout.

/// Submodule for flattening records into named fields.
pub mod fields;
/// Submodule for the destination prefix filter.
pub mod filter;
/// Submodule for the line encoders.
pub mod format;

use log::{error, info, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::configuration::config::Config;
use crate::configuration::types::ExportFormat;
use crate::error_handling::types::{CollectorError, ExportError};
use crate::events::handler::EventHandler;
use crate::events::record::Event;
use crate::probes::ProbeVariant;

pub use filter::IpPrefix;

/// What an exporter did with the records it was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportTotals {
    pub written: u64,
    pub filtered: u64,
    pub failed: u64,
    pub lost: u64,
}

pub struct Exporter {
    format: ExportFormat,
    columns: Vec<String>,
    filter: Option<IpPrefix>,
    out: Box<dyn Write + Send>,
    totals: ExportTotals,
}

impl Exporter {
    /// Builds an exporter for `variant` records and writes the format's
    /// header line, if it has one.
    pub fn new(
        format: ExportFormat,
        variant: ProbeVariant,
        stats: Option<&[String]>,
        filter: Option<IpPrefix>,
        out: Box<dyn Write + Send>,
    ) -> Result<Self, ExportError> {
        let mut columns: Vec<String> = fields::HEADER_FIELDS
            .iter()
            .map(|name| name.to_string())
            .collect();
        columns.extend(fields::select_stat_fields(variant, stats)?);

        let mut exporter = Self {
            format,
            columns,
            filter,
            out,
            totals: ExportTotals::default(),
        };
        if let Some(header) = format::header_line(format, &exporter.columns) {
            exporter.write_line(&header)?;
        }
        Ok(exporter)
    }

    /// Exporter described by the `[export]` section of `config`.
    pub fn from_config(config: &Config) -> Result<Self, CollectorError> {
        let filter = config.client_prefix()?;
        let out: Box<dyn Write + Send> = match &config.export.path {
            Some(path) => {
                info!("Exporting {} records to {}", config.export.format, path.display());
                Box::new(BufWriter::new(File::create(path).map_err(ExportError::from)?))
            }
            None => Box::new(io::stdout()),
        };
        if let Some(prefix) = &filter {
            info!("Exporting only records with a destination in {}", prefix);
        }
        Ok(Self::new(
            config.export.format,
            config.variant,
            config.export.stats.as_deref(),
            filter,
            out,
        )?)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn totals(&self) -> ExportTotals {
        self.totals
    }

    /// Writes `event` unless the prefix filter rejects it. Returns whether a
    /// line was written.
    pub fn write_event(&mut self, event: &Event) -> Result<bool, ExportError> {
        if let Some(prefix) = &self.filter {
            if !prefix.contains(event.header.dst.ip()) {
                self.totals.filtered += 1;
                return Ok(false);
            }
        }
        let fields = fields::flatten(event)?;
        let line = format::record_line(self.format, &self.columns, &fields)?;
        self.write_line(&line)?;
        self.totals.written += 1;
        Ok(true)
    }

    pub fn flush(&mut self) -> Result<(), ExportError> {
        Ok(self.out.flush()?)
    }

    fn write_line(&mut self, line: &str) -> Result<(), ExportError> {
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

impl EventHandler for Exporter {
    fn handle_event(&mut self, event: &Event) {
        if let Err(e) = self.write_event(event) {
            self.totals.failed += 1;
            error!("Unable to export {} record: {}", event.kind(), e);
        }
    }

    fn handle_lost_events(&mut self, count: u64) {
        self.totals.lost += count;
        warn!("{} events lost", count);
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        if let Err(e) = self.out.flush() {
            error!("Unable to flush exporter output: {}", e);
        }
    }
}
