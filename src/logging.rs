//! Tracing setup for the `otaslice` binary.
//!
//! `RUST_LOG` wins when set:
//! ```bash
//! RUST_LOG=otaslice=debug otaslice https://example.com/ota.zip
//! RUST_LOG=otaslice::io=trace otaslice ota.zip   # every received block
//! ```
//! Otherwise the level follows the `-v` / `-q` flags.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter for a given verbosity (`-v` count minus `-q` count).
pub fn default_directive(verbosity: i8) -> &'static str {
    match verbosity {
        i8::MIN..=-2 => "otaslice=error",
        -1 => "otaslice=warn",
        0 => "otaslice=info",
        1 => "otaslice=debug",
        _ => "otaslice=trace",
    }
}

/// Install the global subscriber. Safe to call more than once.
pub fn init(verbosity: i8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbosity > 0)
            .compact(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}
