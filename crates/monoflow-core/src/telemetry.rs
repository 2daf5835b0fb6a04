//! Tracing setup for the `monoflow` binary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested verbosity. Everything else
/// logs at `warn` unless `RUST_LOG` says otherwise.
const OWN_TARGETS: [&str; 3] = ["monoflow_core", "monoflow_ci", "monoflow"];

fn default_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    let directives = OWN_TARGETS
        .iter()
        .fold(String::from("warn"), |acc, target| {
            format!("{acc},{target}={level}")
        });
    EnvFilter::new(directives)
}

/// Install the global subscriber, writing to stderr so stdout carries only
/// plans and reports.
///
/// `RUST_LOG` overrides `level` when set. `json` switches to one JSON object
/// per line. A second call leaves the first subscriber in place.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let base = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(base.json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(base).try_init()
    };
    if installed.is_err() {
        tracing::debug!("global subscriber already set");
    }
}
