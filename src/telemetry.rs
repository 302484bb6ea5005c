use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Initialize tracing with a JSON layer, filtered from the given env var
/// (falling back to `info`).
pub fn init_from_env(var: &str) {
    let logger = tracing_subscriber::fmt::layer().json();
    let env_filter = EnvFilter::try_from_env(var)
        .or(EnvFilter::try_new("info"))
        .unwrap();

    let reg = Registry::default();
    reg.with(env_filter).with(logger).init();
}

/// Initialize tracing for the manager process.
pub async fn init() {
    init_from_env("LOG");
}
