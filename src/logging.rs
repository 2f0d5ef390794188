use is_terminal::IsTerminal;
use tracing_subscriber::{fmt, EnvFilter};

/// Level used when `RUST_LOG` is not set, raised by each `-d`
pub fn default_level(debug: u8) -> &'static str {
    match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize logging on stderr; `RUST_LOG` takes precedence over `-d`
pub fn init_logging(debug: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("loghit={}", default_level(debug))));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(debug > 0)
        .try_init();
}
