use log::warn;

use crate::error_handling::types::ConfigError;

/// Largest sampling tag the host hands out.
pub const SAMPLING_TAG_MAX: u16 = u16::MAX;

/// Track/no-track decision for new connections.
///
/// A connection is tracked iff its tag is at most the threshold. The decision
/// is taken once, at establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingGate {
    threshold: u16,
}

impl SamplingGate {
    /// Builds the gate for a sampling fraction in `(0, 1]`.
    pub fn from_rate(rate: f64) -> Result<Self, ConfigError> {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(ConfigError::InvalidSamplingRate(rate));
        }
        let mut threshold = (rate * f64::from(SAMPLING_TAG_MAX)).round() as u16;
        if threshold == 0 {
            warn!("Sampling rate {} rounds to zero, tracking tags 0..=1 instead", rate);
            threshold = 1;
        }
        Ok(Self { threshold })
    }

    /// Gate that tracks every connection.
    pub fn all() -> Self {
        Self {
            threshold: SAMPLING_TAG_MAX,
        }
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    #[inline]
    pub fn is_tracked(&self, tag: u16) -> bool {
        tag <= self.threshold
    }
}

impl Default for SamplingGate {
    fn default() -> Self {
        Self::all()
    }
}
