//! Test-only helpers

/// Log output for tests, enabled with `--features test-logging`
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Install a test-writer subscriber once per test binary
    ///
    /// Honours `RUST_LOG`, for example
    /// `RUST_LOG=polyglot_lsp::lsp::connection=trace cargo test --features test-logging`.
    pub fn init() {
        INIT.call_once(|| {
            let env_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // another test module may have won the race
        });
    }
}

/// Install test logging for every test in the invoking module
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}
