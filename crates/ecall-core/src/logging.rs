use std::sync::Once;

const DEFAULT_FILTER: &str = "ecall_core=debug";

/// Initialize tracing/logging. Call once from the host before building the app.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
        let result = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init();
        if let Err(e) = result {
            eprintln!("ecall: logging already initialized: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
        tracing::debug!("logging initialized twice without panicking");
    }
}
