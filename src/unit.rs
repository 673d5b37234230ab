//! C3: one Announce Unit per announced service. Each unit runs as an
//! independent cooperative task owning its own tick timer and backoff;
//! the only thing an outside caller can do to a running unit is read its
//! `stat()` or ask it to shut down.

use crate::client::AgentClient;
use crate::domain::{Check, Service, Status};
use crate::error::Error;
use async_std::channel::{bounded, Receiver, Sender};
use async_std::sync::RwLock;
use async_std::task::JoinHandle;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_WAIT_MS: u64 = 300_000;
const MIN_TICK_MS: u64 = 50;
const NO_CHECK_TICK_MS: u64 = 300_000;

lazy_static! {
    /// Integer prefix + optional unit suffix (`h`, `m`, `s`; absent means
    /// milliseconds already).
    static ref DURATION_RE: Regex = Regex::new(r"^(\d+)(h|m|s)?$").unwrap();
}

/// Parses a duration string as the agent would accept it (`"10s"`,
/// `"1m"`, or a bare millisecond count like `"570"`) into milliseconds.
pub fn parse_duration_ms(raw: &str) -> Result<u64, Error> {
    let trimmed = raw.trim();
    let caps = DURATION_RE
        .captures(trimmed)
        .ok_or_else(|| Error::Driver(format!("invalid ttl duration: {:?}", raw)))?;
    let value: u64 = caps[1]
        .parse()
        .map_err(|_| Error::Driver(format!("invalid ttl duration: {:?}", raw)))?;
    let multiplier: u64 = match caps.get(2).map(|m| m.as_str()) {
        Some("h") => 3_600_000,
        Some("m") => 60_000,
        Some("s") => 1_000,
        _ => 1,
    };
    Ok(value * multiplier)
}

/// `max(50, ttl_ms / 5)`, or `300_000` when there's no Check at all
/// (heartbeats are disabled entirely in that case).
pub fn base_tick_ms(check: Option<&Check>) -> Result<u64, Error> {
    match check {
        None => Ok(NO_CHECK_TICK_MS),
        Some(check) => {
            let ttl_ms = parse_duration_ms(&check.ttl)?;
            Ok(std::cmp::max(MIN_TICK_MS, ttl_ms / 5))
        }
    }
}

/// `service`/`heartbeat` health as exposed by `stat()`. Never attempted
/// (or cleared by a failure) reads as `Error`, matching spec: absent keys
/// default to `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Ok,
    Error,
}

impl Default for Health {
    fn default() -> Self {
        Health::Error
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStatus {
    pub service: Health,
    pub heartbeat: Health,
}

struct UnitState {
    service: Service,
    client: Arc<AgentClient>,
    base_tick: u64,
    current_wait: u64,
    status: Arc<RwLock<UnitStatus>>,
}

impl UnitState {
    /// One full tick: §4.3 transitions 1-3. Never propagates an error —
    /// every failure here is absorbed into the backoff/status state.
    async fn tick(&mut self) {
        let already_registered = self.status.read().await.service == Health::Ok;
        if !already_registered {
            if let Err(e) = self.client.service_register(&self.service).await {
                self.on_failure(&e).await;
                return;
            }
            self.status.write().await.service = Health::Ok;
        }

        if self.service.check.is_some() {
            if let Err(e) = self.client.check_update(&self.service, &Status::passing()).await {
                self.on_failure(&e).await;
                return;
            }
            self.status.write().await.heartbeat = Health::Ok;
        }

        self.current_wait = self.base_tick;
        log::debug!(
            "consul announce unit {:?}: ok",
            self.service.check_id().unwrap_or_default()
        );
    }

    async fn on_failure(&mut self, err: &Error) {
        self.current_wait = std::cmp::min(self.current_wait.saturating_mul(2), MAX_WAIT_MS);
        *self.status.write().await = UnitStatus::default();
        log::warn!(
            "consul announce unit {:?}: tick failed ({}), retrying in {}ms",
            self.service.check_id().unwrap_or_default(),
            err,
            self.current_wait
        );
    }

    async fn deregister(&self) {
        if let Some(id) = self.service.id.clone().or_else(|| self.service.name.clone()) {
            if let Err(e) = self.client.service_deregister(&id).await {
                log::warn!(
                    "consul announce unit {:?}: deregister on shutdown failed: {}",
                    self.service.check_id().unwrap_or_default(),
                    e
                );
            }
        }
    }
}

/// A live Announce Unit. Owned by the `Announcer`'s registry; the only
/// operations available to a caller holding one are `stat()` (read-only)
/// and `shutdown()` (terminal).
pub struct UnitHandle {
    status: Arc<RwLock<UnitStatus>>,
    shutdown_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl UnitHandle {
    /// Spawns a new unit for `service`, running its first tick
    /// synchronously before returning. A failing first tick does not
    /// prevent startup — the unit simply starts in a failing backoff and
    /// keeps retrying.
    pub async fn spawn(service: Service, client: Arc<AgentClient>) -> Result<Self, Error> {
        let base_tick = base_tick_ms(service.check.as_ref())?;
        let status = Arc::new(RwLock::new(UnitStatus::default()));
        let mut state = UnitState {
            service,
            client,
            base_tick,
            current_wait: base_tick,
            status: status.clone(),
        };

        state.tick().await;

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let join = async_std::task::spawn(run_loop(state, shutdown_rx));

        Ok(UnitHandle {
            status,
            shutdown_tx,
            join: Some(join),
        })
    }

    /// Current `{service, heartbeat}` health. Never blocks on network I/O.
    pub async fn stat(&self) -> UnitStatus {
        *self.status.read().await
    }

    /// A cloneable read-only handle onto this unit's status cell, for
    /// `Announcer::whereis`.
    pub(crate) fn status_ref(&self) -> Arc<RwLock<UnitStatus>> {
        self.status.clone()
    }

    /// Cancels the pending tick timer, issues a final
    /// `service_deregister`, and waits for the unit's task to actually
    /// finish before returning.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(join) = self.join.take() {
            join.await;
        }
    }
}

async fn run_loop(mut state: UnitState, shutdown_rx: Receiver<()>) {
    let mut deadline = Instant::now() + Duration::from_millis(state.current_wait);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match async_std::future::timeout(remaining, shutdown_rx.recv()).await {
            Ok(_) => {
                // either a shutdown was requested, or the sender was
                // dropped — both mean "stop", so deregister and exit.
                state.deregister().await;
                return;
            }
            Err(_elapsed) => {
                state.tick().await;
                deadline = Instant::now() + Duration::from_millis(state.current_wait);
            }
        }
    }
}
