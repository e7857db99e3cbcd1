use log::LevelFilter;

#[derive(PartialEq, PartialOrd, Debug, Default, Clone, Copy)]
pub enum LogLevel {
    #[default]
    NONE,
    INFO,
    DEBUG,
}

pub fn to_loglevel(ulevel: u64) -> LogLevel {
    match ulevel {
        0 => LogLevel::NONE,
        1 => LogLevel::INFO,
        2 => LogLevel::DEBUG,
        _ => LogLevel::NONE,
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            // warnings carry recoverable anomalies and stay on at level 0
            LogLevel::NONE => LevelFilter::Warn,
            LogLevel::INFO => LevelFilter::Info,
            LogLevel::DEBUG => LevelFilter::Debug,
        }
    }
}

/// Installs the global logger. `RUST_LOG`, when set, takes precedence over
/// the numeric level from config or CLI.
pub fn init(ulevel: u64) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(to_loglevel(ulevel).into());
    builder.parse_default_env();
    // a second init (e.g. from tests) keeps the first logger
    let _ = builder.try_init();
}
