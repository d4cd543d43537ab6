use super::types::*;
use clap::Parser;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::attribution::ca_loss::DEFAULT_TRACKING_CUTOFF;
use crate::attribution::rtt_estimator::DEFAULT_RTT_EXPORT_CUTOFF;
use crate::error_handling::types::ConfigError;
use crate::export::filter::IpPrefix;
use crate::host::accessor::HostLayout;
use crate::probes::{ProbeSettings, ProbeVariant};
use crate::session_management::sampling::SamplingGate;

/// Collector configuration, read from a TOML file.
///
/// Every field has a default, so an empty file (or no file at all) yields a
/// working configuration that tracks every connection with the `tcp_stats`
/// probes and writes CSV to stdout.
///
/// # Examples
///
/// ```
/// use tcplens::configuration::config::Config;
///
/// let config = Config::from_toml_str("sampling_rate = 0.25\nvariant = \"ca_loss\"").unwrap();
/// assert_eq!(config.sampling_rate, 0.25);
/// ```
///
/// # Fields Overview
///
/// - `sampling_rate`: fraction of new connections that get a session, in `(0, 1]`
/// - `ring_pages`: ring capacity in 4096-byte pages
/// - `poll_timeout_ms`: longest the consumer waits for a record before checking for shutdown
/// - `tracking_cutoff`: segments delivered without a loss before CA-state attribution stops
/// - `rtt_export_cutoff`: packet number after which RTT samples stop being exported
/// - `variant`: which probes run
/// - `host_layout`: field layout of the host the probes read from
/// - `export`: exporter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampling_rate: f64,
    pub ring_pages: usize,
    pub poll_timeout_ms: u64,
    pub tracking_cutoff: u32,
    pub rtt_export_cutoff: u32,
    pub variant: ProbeVariant,
    pub host_layout: HostLayout,
    pub export: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampling_rate: 1.0,
            ring_pages: 64,
            poll_timeout_ms: 1000,
            tracking_cutoff: DEFAULT_TRACKING_CUTOFF,
            rtt_export_cutoff: DEFAULT_RTT_EXPORT_CUTOFF,
            variant: ProbeVariant::default(),
            host_layout: HostLayout::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    /// Reads and validates the configuration at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampling_gate()?;
        if self.ring_pages == 0 {
            return Err(ConfigError::InvalidRingPages(self.ring_pages));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::InvalidPollTimeout(self.poll_timeout_ms));
        }
        if self.tracking_cutoff > u32::from(u16::MAX) {
            return Err(ConfigError::NotInRange(format!(
                "tracking_cutoff {} exceeds {}",
                self.tracking_cutoff,
                u16::MAX
            )));
        }
        self.client_prefix()?;
        Ok(())
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(rate) = args.sampling_rate {
            self.sampling_rate = rate;
        }
        if let Some(variant) = args.variant {
            self.variant = variant;
        }
        if let Some(format) = args.export_format {
            self.export.format = format;
        }
        if let Some(path) = &args.export_path {
            self.export.path = Some(path.clone());
        }
        if let Some(prefix) = &args.client_prefix {
            self.export.client_prefix = Some(prefix.clone());
        }
    }

    pub fn sampling_gate(&self) -> Result<SamplingGate, ConfigError> {
        SamplingGate::from_rate(self.sampling_rate)
    }

    pub fn client_prefix(&self) -> Result<Option<IpPrefix>, ConfigError> {
        self.export
            .client_prefix
            .as_deref()
            .map(str::parse::<IpPrefix>)
            .transpose()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn probe_settings(&self) -> Result<ProbeSettings, ConfigError> {
        Ok(ProbeSettings {
            variant: self.variant,
            layout: self.host_layout,
            gate: self.sampling_gate()?,
            tracking_cutoff: self.tracking_cutoff,
            rtt_export_cutoff: self.rtt_export_cutoff,
        })
    }
}

/// Command-line arguments of the `tcplens` binary.
///
/// Values given here override the ones read from the configuration file.
/// Each override can also come from a `TCPLENS_*` environment variable.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "tcplens")]
#[command(version)]
#[command(about = "Per-connection TCP loss, retransmission and RTT attribution")]
pub struct Args {
    /// Path to a TOML configuration file
    pub config_file: Option<PathBuf>,

    /// JSON-lines trace of stack events to replay, `-` for stdin
    ///
    /// # Command Line
    /// Use `--trace <PATH>` to set this value from the CLI
    #[arg(long, env = "TCPLENS_TRACE")]
    pub trace: PathBuf,

    /// Fraction of connections to track, in (0, 1]
    #[arg(long, env = "TCPLENS_SAMPLING_RATE")]
    pub sampling_rate: Option<f64>,

    /// Probes to run
    #[arg(long, value_enum, env = "TCPLENS_VARIANT")]
    pub variant: Option<ProbeVariant>,

    /// Exporter output encoding
    #[arg(long, value_enum, env = "TCPLENS_EXPORT_FORMAT")]
    pub export_format: Option<ExportFormat>,

    /// Exporter output file, stdout when omitted
    #[arg(long, env = "TCPLENS_EXPORT_PATH")]
    pub export_path: Option<PathBuf>,

    /// Only export records whose destination is in this CIDR prefix
    #[arg(long, env = "TCPLENS_CLIENT_PREFIX")]
    pub client_prefix: Option<String>,
}

impl Args {
    /// Loads the configuration file (if any), applies the overrides and
    /// validates the result.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config_file {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        self.apply_to(&mut config)?;
        Ok(config)
    }

    fn apply_to(&self, config: &mut Config) -> Result<(), ConfigError> {
        config.apply_args(self);
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args_under_test(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["tcplens", "--trace", "-"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.sampling_rate, 1.0);
        assert_eq!(config.ring_pages, 64);
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.tracking_cutoff, 64);
        assert_eq!(config.rtt_export_cutoff, 72);
        assert_eq!(config.variant, ProbeVariant::TcpStats);
        assert_eq!(config.export.format, ExportFormat::Csv);
        assert!(config.client_prefix().unwrap().is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
sampling_rate = 0.5
ring_pages = 8
variant = "rtt_trace"
host_layout = "linux_5_4"

[export]
format = "json"
client_prefix = "10.0.0.0/9"
stats = ["sample.rtt_us", "stats.calls"]
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sampling_rate, 0.5);
        assert_eq!(config.ring_pages, 8);
        assert_eq!(config.variant, ProbeVariant::RttTrace);
        assert_eq!(config.export.format, ExportFormat::Json);
        assert_eq!(config.export.stats.as_ref().map(Vec::len), Some(2));
        assert_eq!(config.sampling_gate().unwrap().threshold(), 32768);
        assert!(config.client_prefix().unwrap().is_some());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/tcplens.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_toml_str("sampling_rate = 0.0"),
            Err(ConfigError::InvalidSamplingRate(_))
        ));
        assert!(matches!(
            Config::from_toml_str("sampling_rate = 1.5"),
            Err(ConfigError::InvalidSamplingRate(_))
        ));
        assert!(matches!(
            Config::from_toml_str("ring_pages = 0"),
            Err(ConfigError::InvalidRingPages(0))
        ));
        assert!(matches!(
            Config::from_toml_str("poll_timeout_ms = 0"),
            Err(ConfigError::InvalidPollTimeout(0))
        ));
        assert!(matches!(
            Config::from_toml_str("tracking_cutoff = 70000"),
            Err(ConfigError::NotInRange(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[export]\nclient_prefix = \"10.0.0.0/40\""),
            Err(ConfigError::InvalidPrefix(_))
        ));
        assert!(matches!(
            Config::from_toml_str("variant = \"bogus\""),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_args_override_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "sampling_rate = 0.5\nvariant = \"ack_trace\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = args_under_test(&[
            path.as_str(),
            "--sampling-rate",
            "0.25",
            "--export-format",
            "txt",
            "--client-prefix",
            "fd00::/8",
        ])
        .unwrap_or_else(|e| panic!("{}", e));

        let config = args.load_config().unwrap();
        assert_eq!(config.sampling_rate, 0.25);
        assert_eq!(config.variant, ProbeVariant::AckTrace);
        assert_eq!(config.export.format, ExportFormat::Txt);
        assert_eq!(config.export.client_prefix.as_deref(), Some("fd00::/8"));
    }

    #[test]
    #[serial]
    fn test_args_from_env() {
        std::env::set_var("TCPLENS_VARIANT", "ca_loss");
        let args = args_under_test(&[]);
        std::env::remove_var("TCPLENS_VARIANT");

        let args = args.unwrap_or_else(|e| panic!("{}", e));
        assert_eq!(args.variant, Some(ProbeVariant::CaLoss));
        assert_eq!(args.trace, PathBuf::from("-"));
        assert_eq!(args.load_config().unwrap().variant, ProbeVariant::CaLoss);
    }

    #[test]
    #[serial]
    fn test_trace_is_required() {
        std::env::remove_var("TCPLENS_TRACE");
        assert!(Args::try_parse_from(["tcplens"]).is_err());
    }

    #[test]
    #[serial]
    fn test_bad_override_is_rejected() {
        let args = args_under_test(&["--sampling-rate", "2"]).unwrap();
        assert!(matches!(
            args.load_config(),
            Err(ConfigError::InvalidSamplingRate(_))
        ));
    }
}
