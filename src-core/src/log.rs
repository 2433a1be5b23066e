use log::LevelFilter;

/// Installs the process-wide logger.
///
/// Logs go to stderr only: stdout carries protocol traffic in both the
/// `serve` and `worker` modes.
///
/// Log level is Debug in development builds and Info in production builds.
/// `RUST_LOG` refines it and an explicit `--log-level` wins over both.
pub fn init(level_override: Option<LevelFilter>) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_env(env_logger::Env::default())
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis();

    if let Some(level) = level_override {
        builder.filter_level(level);
    }

    // A second init (tests, embedding) is not an error.
    let _ = builder.try_init();
}
