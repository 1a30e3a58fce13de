//! Tracing subscriber setup shared by rynq tools and tests.
//!
//! The `rynq` library only emits `tracing` events and spans; installing a
//! subscriber is left to the process. This crate keeps that setup in one
//! place so binaries, integration tests and benches log the same way.
//!
//! Stream workers run on threads named `rynq-<stream>`, so every preset
//! prints thread names.

use std::env;
use std::error::Error;
use std::fmt;
pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Environment variable selecting a preset: `local`, `ci` or `hardware`
pub const PROFILE_ENV: &str = "RYNQ_TRACING_PROFILE";
/// Environment variable overriding the filter directives
pub const DIRECTIVES_ENV: &str = "RYNQ_TRACING_DIRECTIVES";
/// Environment variable selecting the output format
pub const FORMAT_ENV: &str = "RYNQ_TRACING_FORMAT";

/// How the subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Filter directives (e.g. `rynq::graph=trace,info`). When absent the
    /// filter comes from `RUST_LOG`, then from [`default_directive`](Self::default_directive).
    pub directives: Option<String>,
    /// Fallback directive when neither `directives` nor `RUST_LOG` parse.
    pub default_directive: String,
    /// Print event targets (module paths).
    pub include_targets: bool,
    /// Print thread names.
    pub include_thread_names: bool,
    /// ANSI colours. Disable for collected logs.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    pub output: TracingOutput,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, coloured output for a terminal.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            include_thread_names: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
        }
    }

    /// JSON lines without colour for CI and log collection.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            ..Self::for_local()
        }
    }

    /// Bring-up on real hardware.
    ///
    /// Debug events from every rynq module, trace events from the stream
    /// worker, and a close event with timing for every instrumented
    /// register access and transfer.
    pub fn for_hardware() -> Self {
        Self {
            directives: Some("rynq=debug,rynq::graph=trace".to_string()),
            ansi: false,
            span_events: FmtSpan::CLOSE,
            output: TracingOutput::Compact,
            ..Self::for_local()
        }
    }

    /// Build a configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `RYNQ_TRACING_PROFILE` - preset: `local` (default), `ci` or `hardware`
    /// - `RYNQ_TRACING_DIRECTIVES` - overrides the filter directives
    /// - `RYNQ_TRACING_FORMAT` - `pretty`, `compact` or `json`
    pub fn from_env() -> Self {
        let profile = env::var(PROFILE_ENV)
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "hardware" => Self::for_hardware(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var(DIRECTIVES_ENV) {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var(FORMAT_ENV) {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if matches!(config.output, TracingOutput::Json) {
                    config.ansi = false;
                }
            }
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        if let Some(directives) = &self.directives {
            EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
        } else {
            match EnvFilter::try_from_default_env() {
                Ok(filter) => Ok(filter),
                Err(_) => Ok(EnvFilter::new(self.default_directive.clone())),
            }
        }
    }
}

/// Output format of the formatter layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Errors surfaced while installing a subscriber.
#[derive(Debug)]
pub enum TracingSetupError {
    /// The directive string could not be parsed.
    InvalidFilter(String),
    /// A global subscriber is already installed.
    SubscriberInit(tracing_subscriber::util::TryInitError),
}

impl fmt::Display for TracingSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingSetupError::InvalidFilter(msg) => {
                write!(f, "invalid tracing directive: {msg}")
            }
            TracingSetupError::SubscriberInit(err) => {
                write!(f, "failed to install global tracing subscriber: {err}")
            }
        }
    }
}

impl Error for TracingSetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TracingSetupError::SubscriberInit(err) => Some(err),
            _ => None,
        }
    }
}

/// Build a subscriber from `config` without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    Ok(Registry::default().with(fmt_layer(config, false)).with(filter))
}

fn fmt_layer(config: &TracingConfig, test_writer: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_thread_names(config.include_thread_names)
        .with_span_events(config.span_events.clone());

    match (&config.output, test_writer) {
        (TracingOutput::Json, false) => Box::new(layer.json().with_ansi(false)),
        (TracingOutput::Json, true) => Box::new(layer.json().with_ansi(false).with_test_writer()),
        (TracingOutput::Pretty, false) => Box::new(layer.pretty().with_ansi(config.ansi)),
        (TracingOutput::Pretty, true) => Box::new(layer.pretty().with_ansi(config.ansi).with_test_writer()),
        (TracingOutput::Compact, false) => Box::new(layer.compact().with_ansi(config.ansi)),
        (TracingOutput::Compact, true) => Box::new(layer.compact().with_ansi(config.ansi).with_test_writer()),
    }
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)
}

/// Install a subscriber that writes through the test harness.
///
/// Configured from the environment like [`TracingConfig::from_env`], with
/// compact output unless a format is given. Safe to call from every test;
/// only the first call installs anything.
pub fn init_test_tracing() {
    let mut config = TracingConfig::from_env();
    if env::var(FORMAT_ENV).is_err() {
        config.output = TracingOutput::Compact;
    }
    config.ansi = false;

    let Ok(filter) = config.resolve_filter() else {
        return;
    };
    // A second install fails; the first subscriber stays in place.
    let _ = Registry::default()
        .with(fmt_layer(&config, true))
        .with(filter)
        .try_init();
}
