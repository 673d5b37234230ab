//! Configuration surface this crate consumes. Loading these values from
//! application settings (files, env vars, a config service) is explicitly
//! the embedding application's job — this crate only accepts the result.

use crate::domain::Service;
use std::time::Duration;

/// What an `Announcer` needs to start talking to an agent and begin
/// announcing services.
#[derive(Debug, Clone)]
pub struct AnnouncerConfig {
    /// Base URL of the local agent, e.g. `"http://localhost:8500"`.
    pub endpoint: String,
    /// Per-request ACL token, if the agent requires one.
    pub token: Option<String>,
    /// Services to register at startup. May be empty; more can be
    /// registered later via `Announcer::register`.
    pub services: Vec<Service>,
    /// Overall HTTP round-trip deadline.
    pub overall_timeout: Duration,
    /// Connect deadline (see `HttpTransport::new` for how this is honored).
    pub connect_timeout: Duration,
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        AnnouncerConfig {
            endpoint: "http://localhost:8500".to_string(),
            token: None,
            services: Vec::new(),
            overall_timeout: Duration::from_millis(30_000),
            connect_timeout: Duration::from_millis(5_000),
        }
    }
}
