//! Diagnostics go to stderr through a bare-format subscriber; protocol
//! lines the parent parses are written to stderr directly and never pass
//! through here.

use tracing_subscriber::EnvFilter;

/// Route backend and runner diagnostics to stderr. `RUST_LOG` widens or
/// narrows the filter; the default keeps the native library quiet below
/// warnings.
pub fn init() {
    gg::send_logs_to_tracing(gg::LogOptions::default().with_logs_enabled(true));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_level(false)
        .with_target(false)
        .try_init();
}
