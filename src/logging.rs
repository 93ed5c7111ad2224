// ABOUTME: Tracing subscriber setup for the binaries
// ABOUTME: RUST_LOG overrides the default sendspin filter

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for the given verbosity
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "sendspin=debug"
    } else {
        "sendspin=info"
    }
}

/// Install the global subscriber
///
/// Library code logs through `log`; those records reach the subscriber via
/// tracing-subscriber's `log` bridge.
pub fn init_tracing(verbose: bool) {
    let filter = default_filter(verbose);

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(false), "sendspin=info");
        assert_eq!(default_filter(true), "sendspin=debug");
    }
}
