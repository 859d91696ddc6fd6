use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Events go to stderr so stdout carries only
/// program output; `RUST_LOG` overrides `default_directive`.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
