//! Logging configuration.
//!
//! Verbosity is chosen once on the command line and handed to [`init`]; the
//! library itself only emits `tracing` events.

use std::fmt;

use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// User-facing verbosity levels, from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, ValueEnum)]
pub enum Verbosity {
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// Progress messages.
    #[default]
    Message,
    /// Detailed device information.
    Info,
    /// Everything, including exposure polling.
    Debug,
}

impl Verbosity {
    /// Maximum `tracing` level emitted at this verbosity.
    pub const fn level(self) -> Level {
        match self {
            Self::Error => Level::ERROR,
            Self::Warn => Level::WARN,
            Self::Message => Level::INFO,
            Self::Info => Level::DEBUG,
            Self::Debug => Level::TRACE,
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Message => "message",
            Self::Info => "info",
            Self::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Logging settings for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Requested verbosity.
    pub verbosity: Verbosity,
}

impl LogConfig {
    /// Create a configuration with the given verbosity.
    pub const fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> EnvFilter {
        EnvFilter::default().add_directive(LevelFilter::from_level(self.verbosity.level()).into())
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured verbosity. Calling this twice leaves the first subscriber in
/// place.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.default_filter());

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    if installed.is_ok() {
        tracing::debug!(verbosity = %config.verbosity, "logging initialised");
    }
}
