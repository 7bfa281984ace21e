//! Tracing setup for the binary. Logs go to stderr so stdout stays the
//! progress/report channel.

use std::io::IsTerminal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for the given verbosity. `RUST_LOG` wins.
pub fn default_directive(verbose: bool, quiet: bool) -> &'static str {
    if verbose {
        "sigbuild=debug,info"
    } else if quiet {
        "warn"
    } else {
        "sigbuild=info,warn"
    }
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_tracing(verbose: bool, quiet: bool) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose, quiet)))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let ansi = std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(verbose)
                .without_time()
                .compact(),
        )
        .try_init()
        .map_err(|e| format!("cannot initialize logging: {}", e))
}
