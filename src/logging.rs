//! Opt-in logging backend. This crate logs through the `log` facade
//! everywhere (see `unit::UnitHandle`); it never installs a backend on
//! its own, since that decision belongs to the embedding application. This
//! module exists only to make `fast_log` (the logging backend the rest of
//! this crate's lineage standardizes on) easy to reach for for a quick
//! binary or test harness that doesn't already have its own logger set up.

/// Initializes `fast_log` at `level`, logging to stdout. Call at most
/// once, before spawning any `Announcer`. Returns an error if a logger is
/// already installed.
pub fn init_default_logger(level: log::LevelFilter) -> Result<(), fast_log::error::LogError> {
    fast_log::init(fast_log::config::Config::new().console().level(level))
}
