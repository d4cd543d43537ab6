use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidSamplingRate(f64),
    InvalidRingPages(usize),
    InvalidPollTimeout(u64),
    InvalidPrefix(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidSamplingRate(r) => {
                write!(f, "Sampling rate {} outside of (0, 1]", r)
            }
            ConfigError::InvalidRingPages(p) => write!(f, "Invalid ring page count: {}", p),
            ConfigError::InvalidPollTimeout(t) => write!(f, "Invalid poll timeout: {} ms", t),
            ConfigError::InvalidPrefix(e) => write!(f, "Invalid network prefix: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// A host field whose value does not decode under the configured layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    UnknownCaState(u8),
    UnknownSockState(u8),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::UnknownCaState(v) => write!(f, "Unknown CA state value {}", v),
            FieldError::UnknownSockState(v) => write!(f, "Unknown socket state value {}", v),
        }
    }
}

impl std::error::Error for FieldError {}

#[derive(Debug)]
pub enum WireError {
    BufferTooSmall,
    Truncated { expected: usize, got: usize },
    UnknownFamily(u16),
    UnknownPayloadKind(u8),
    InvalidValue(&'static str, u8),
    IoError(std::io::Error),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::BufferTooSmall => write!(f, "Record does not fit the wire buffer"),
            WireError::Truncated { expected, got } => {
                write!(f, "Received less data than required: {} < {}", got, expected)
            }
            WireError::UnknownFamily(fam) => write!(f, "Unknown address family {}", fam),
            WireError::UnknownPayloadKind(k) => write!(f, "Unknown payload kind {}", k),
            WireError::InvalidValue(field, v) => write!(f, "Invalid value {} for {}", v, field),
            WireError::IoError(e) => write!(f, "Wire IO error: {}", e),
        }
    }
}

impl std::error::Error for WireError {}

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::WriteZero {
            WireError::BufferTooSmall
        } else {
            WireError::IoError(err)
        }
    }
}

#[derive(Debug)]
pub enum ChannelError {
    ZeroCapacity,
    Disconnected,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ZeroCapacity => write!(f, "Ring channel cannot hold a single record"),
            ChannelError::Disconnected => write!(f, "Ring channel disconnected"),
        }
    }
}

impl std::error::Error for ChannelError {}

#[derive(Debug)]
pub enum HostError {
    IoError(std::io::Error),
    AttachFailed(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::IoError(e) => write!(f, "Host IO error: {}", e),
            HostError::AttachFailed(e) => write!(f, "Unable to attach to stack events: {}", e),
        }
    }
}

impl std::error::Error for HostError {}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ExportError {
    IoError(std::io::Error),
    SerializeFailed(String),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::IoError(e) => write!(f, "Export IO error: {}", e),
            ExportError::SerializeFailed(e) => write!(f, "Export serialization failed: {}", e),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::IoError(err)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::SerializeFailed(err.to_string())
    }
}

#[derive(Debug)]
pub enum CollectorError {
    ConfigurationError(ConfigError),
    AttachError(HostError),
    ChannelError(ChannelError),
    ExportError(ExportError),
    AlreadyRunning,
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            CollectorError::AttachError(e) => write!(f, "Attach error: {}", e),
            CollectorError::ChannelError(e) => write!(f, "Channel error: {}", e),
            CollectorError::ExportError(e) => write!(f, "Export error: {}", e),
            CollectorError::AlreadyRunning => write!(f, "Collector is already running"),
        }
    }
}

impl std::error::Error for CollectorError {}

impl From<ConfigError> for CollectorError {
    fn from(err: ConfigError) -> Self {
        CollectorError::ConfigurationError(err)
    }
}

impl From<HostError> for CollectorError {
    fn from(err: HostError) -> Self {
        CollectorError::AttachError(err)
    }
}

impl From<ChannelError> for CollectorError {
    fn from(err: ChannelError) -> Self {
        CollectorError::ChannelError(err)
    }
}

impl From<ExportError> for CollectorError {
    fn from(err: ExportError) -> Self {
        CollectorError::ExportError(err)
    }
}
