use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `CELLAR_LOG=debug`.
pub const LOG_ENV: &str = "CELLAR_LOG";

/// Install a global fmt subscriber filtered by `$CELLAR_LOG`, falling back to
/// `default_level`. Returns `false` if a subscriber was already installed.
pub fn init_tracing(default_level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_tracing("warn");
        assert!(!init_tracing("debug"));
    }
}
