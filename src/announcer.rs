//! C4: registry/supervisor of Announce Units, keyed by announce key.
//! Register/unregister/whereis are serialized against that registry — an
//! `async_std::sync::Mutex` plays the role of the single serializing task
//! the design notes describe, since a held lock already gives the same
//! "one operation in flight at a time" guarantee without an extra actor.

use crate::client::AgentClient;
use crate::config::AnnouncerConfig;
use crate::domain::Service;
use crate::error::Error;
use crate::transport::HttpTransport;
use crate::unit::{UnitHandle, UnitStatus};
use async_std::sync::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// `(id, name)` — two services differing only in tags collide on this
/// key, by design (see spec "Announce key uniqueness").
pub type AnnounceKey = (Option<String>, Option<String>);

fn announce_key(service: &Service) -> AnnounceKey {
    (service.id.clone(), service.name.clone())
}

/// A read-only reference to a live unit's health, returned by `whereis`.
/// Deliberately thinner than `UnitHandle`: callers outside the registry
/// get `stat()` and nothing that could mutate or terminate the unit out
/// from under the Announcer.
#[derive(Clone)]
pub struct UnitRef(Arc<RwLock<UnitStatus>>);

impl UnitRef {
    pub async fn stat(&self) -> UnitStatus {
        *self.0.read().await
    }
}

pub struct Announcer {
    client: Arc<AgentClient>,
    units: Mutex<HashMap<AnnounceKey, UnitHandle>>,
}

impl Announcer {
    /// Builds the shared `AgentClient` from `config` and registers every
    /// service in `config.services` at startup.
    pub async fn new(config: AnnouncerConfig) -> Result<Self, Error> {
        let transport = HttpTransport::new(config.overall_timeout, config.connect_timeout)?;
        let client = Arc::new(AgentClient::new(config.endpoint, config.token, Arc::new(transport)));
        let announcer = Announcer {
            client,
            units: Mutex::new(HashMap::new()),
        };
        for service in config.services {
            announcer.register(service).await?;
        }
        Ok(announcer)
    }

    /// For tests and embedders that already have an `AgentClient` (e.g. one
    /// wired to a stub `Transport`).
    pub fn with_client(client: Arc<AgentClient>) -> Self {
        Announcer {
            client,
            units: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent: registering a service whose announce key already has a
    /// running unit is a no-op that still returns `Ok(())`.
    pub async fn register(&self, service: Service) -> Result<(), Error> {
        let key = announce_key(&service);
        let mut units = self.units.lock().await;
        if units.contains_key(&key) {
            log::debug!("announcer: {:?} already registered", key);
            return Ok(());
        }
        let handle = UnitHandle::spawn(service, self.client.clone()).await?;
        units.insert(key, handle);
        Ok(())
    }

    /// `Error::NotFound` if no unit is running for `service`'s announce
    /// key. Otherwise terminates that unit (triggering its final
    /// `service_deregister`) and removes it from the registry before
    /// returning — the unit is guaranteed gone by the time this resolves.
    pub async fn unregister(&self, service: &Service) -> Result<(), Error> {
        let key = announce_key(service);
        let mut units = self.units.lock().await;
        match units.remove(&key) {
            Some(handle) => {
                handle.shutdown().await;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// A read-only reference to the running unit for `service`'s announce
    /// key, or `None` if it isn't registered.
    pub async fn whereis(&self, service: &Service) -> Option<UnitRef> {
        let key = announce_key(service);
        let units = self.units.lock().await;
        units.get(&key).map(|handle| UnitRef(handle.status_ref()))
    }

    /// Terminates every unit and clears the registry. Exposed for tests
    /// that need a clean slate between scenarios.
    pub async fn killall(&self) -> Result<(), Error> {
        let mut units = self.units.lock().await;
        for (_, handle) in units.drain() {
            handle.shutdown().await;
        }
        Ok(())
    }

    /// Cascades termination to every registered unit. Call this from the
    /// embedding application's own shutdown path — Rust has no async
    /// `Drop`, so this can't run implicitly when an `Announcer` is
    /// dropped.
    pub async fn shutdown(&self) {
        let _ = self.killall().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Check;
    use crate::transport::stub::{Reply, StubTransport};

    fn announcer_with(transport: StubTransport) -> Announcer {
        let client = Arc::new(AgentClient::new("http://a", None, Arc::new(transport)));
        Announcer::with_client(client)
    }

    fn service(id: &str, name: &str) -> Service {
        Service {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            check: Some(Check {
                ttl: "1s".to_string(),
                ..Check::default()
            }),
            ..Default::default()
        }
    }

    #[async_std::test]
    async fn s4_register_unregister_lifecycle() {
        let announcer = announcer_with(StubTransport::always(Reply::status(200, b"".to_vec())));
        let svc = service("foo", "bar");

        announcer.register(svc.clone()).await.unwrap();
        announcer.register(svc.clone()).await.unwrap(); // idempotent

        assert!(announcer.whereis(&svc).await.is_some());

        announcer.unregister(&svc).await.unwrap();
        let err = announcer.unregister(&svc).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));

        assert!(announcer.whereis(&svc).await.is_none());
    }

    #[async_std::test]
    async fn register_is_idempotent_unit_count_grows_by_at_most_one() {
        let announcer = announcer_with(StubTransport::always(Reply::status(200, b"".to_vec())));
        let svc = service("dup", "dup");
        announcer.register(svc.clone()).await.unwrap();
        announcer.register(svc.clone()).await.unwrap();
        announcer.register(svc.clone()).await.unwrap();
        assert_eq!(announcer.units.lock().await.len(), 1);
    }

    #[async_std::test]
    async fn distinct_tags_share_the_same_announce_key() {
        let announcer = announcer_with(StubTransport::always(Reply::status(200, b"".to_vec())));
        let mut a = service("same", "same");
        a.tags = vec!["a".to_string()];
        let mut b = a.clone();
        b.tags = vec!["b".to_string()];

        announcer.register(a).await.unwrap();
        announcer.register(b).await.unwrap();
        assert_eq!(announcer.units.lock().await.len(), 1);
    }

    #[async_std::test]
    async fn unregister_absent_service_is_not_found() {
        let announcer = announcer_with(StubTransport::always(Reply::status(200, b"".to_vec())));
        let svc = service("never", "registered");
        let err = announcer.unregister(&svc).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[async_std::test]
    async fn killall_clears_the_registry() {
        let announcer = announcer_with(StubTransport::always(Reply::status(200, b"".to_vec())));
        announcer.register(service("a", "a")).await.unwrap();
        announcer.register(service("b", "b")).await.unwrap();
        announcer.killall().await.unwrap();
        assert_eq!(announcer.units.lock().await.len(), 0);
    }
}
