//! Startup helpers shared by the subcommands.

use tracing_subscriber::EnvFilter;

use promptbench_agent::config::LoggingConfig;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.  Logs go to stderr so that
/// `chat` can keep stdout for event frames.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.with_target(false).compact().init();
    }
}
