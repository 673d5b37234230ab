//! Client-side service announcer for a Consul-style discovery agent.
//!
//! Given a set of service definitions, this crate registers each one with
//! the local agent, keeps its TTL health check passing on a tick loop
//! with exponential backoff, deregisters on shutdown, and supports
//! dynamic register/unregister/whereis at runtime. It also exposes
//! read-side operations against the agent — service discovery by name,
//! session lifecycle, and a KV surface — via [`AgentClient`] directly.
//!
//! The orchestrator is [`Announcer`]; each service it manages runs as an
//! independent [`unit::UnitHandle`] task. See `DESIGN.md` in this crate's
//! repository for how each piece is grounded.

pub mod announcer;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod transport;
pub mod unit;

pub use announcer::Announcer;
pub use client::AgentClient;
pub use config::AnnouncerConfig;
pub use error::Error;
