use log::LevelFilter;

use crate::sim::log::{to_loglevel, LogLevel};

#[test]
fn numeric_levels_map_to_log_levels() {
    assert_eq!(to_loglevel(0), LogLevel::NONE);
    assert_eq!(to_loglevel(1), LogLevel::INFO);
    assert_eq!(to_loglevel(2), LogLevel::DEBUG);
    assert_eq!(to_loglevel(9), LogLevel::NONE);
}

#[test]
fn level_zero_still_shows_warnings() {
    assert_eq!(LevelFilter::from(LogLevel::NONE), LevelFilter::Warn);
    assert_eq!(LevelFilter::from(LogLevel::INFO), LevelFilter::Info);
    assert_eq!(LevelFilter::from(LogLevel::DEBUG), LevelFilter::Debug);
}
