//! Logging setup for the `archive-dsp` binary.

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`, defaulting to `info`. Calling it twice is harmless;
/// the second install attempt is ignored.
pub fn init_logging() {
    init_with_format(false);
}

/// Same as [`init_logging`] but emits one JSON object per event.
pub fn init_json_logging() {
    init_with_format(true);
}

fn init_with_format(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
