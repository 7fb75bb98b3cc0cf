//! Tracing initialization.
//!
//! Controlled by `GROVE_TRACE`:
//! - unset or empty → no subscriber is installed
//! - `"stderr"` → JSON events to stderr
//! - `"text"` → human-readable events to stderr
//!
//! The level filter comes from `RUST_LOG` and defaults to `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Environment variable selecting the output.
pub const TRACE_ENV: &str = "GROVE_TRACE";

/// Where events go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceOutput {
    /// Nothing is installed.
    Off,
    /// JSON lines on stderr.
    Json,
    /// Human-readable lines on stderr.
    Text,
}

impl TraceOutput {
    /// Interpret a `GROVE_TRACE` value. Unrecognized values mean `Off`.
    #[must_use]
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("stderr" | "json") => Self::Json,
            Some("text") => Self::Text,
            _ => Self::Off,
        }
    }
}

/// Install a global subscriber according to `GROVE_TRACE`.
///
/// Returns the output chosen. Safe to call more than once: later calls leave
/// the first subscriber in place.
pub fn init() -> TraceOutput {
    let value = std::env::var(TRACE_ENV).ok();
    let output = TraceOutput::from_env_value(value.as_deref());
    init_with(output);
    output
}

/// Install a global subscriber for `output`.
pub fn init_with(output: TraceOutput) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match output {
        TraceOutput::Off => return,
        TraceOutput::Json => tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .try_init(),
        TraceOutput::Text => tracing_subscriber::registry()
            .with(filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
    };
    if let Err(e) = result {
        tracing::debug!("tracing subscriber already installed: {e}");
    }
}
