pub mod attribution;
pub use attribution::*;

pub mod collector;
pub use collector::{Collector, CollectorTotals};

pub mod configuration;
pub use configuration::{Args, Config};

pub mod counter;
pub use counter::Counter;

pub mod error_handling;

pub mod events;

pub mod export;
pub use export::Exporter;

pub mod host;

pub mod probes;
pub use probes::{ProbeDispatcher, ProbeVariant};

pub mod session_management;
