//! Service object shared by all request handlers

use crate::cache::{Clock, HostCache};
use crate::config::DaemonConfig;
use crate::connection::ConnectivityGuard;
use crate::reconciler::{self, Inventory};
use crate::reconfig::{ReconfigExecutor, TaskResult};
use crate::vsphere::Connector;
use portgroup_common::{
    AccountInfo, Credentials, Database, Error, HostMap, PortGroup, Result, VirtualMachine,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registration and session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub registered: bool,
    pub connected: bool,
}

/// Inventory and reassignment operations over one vCenter account
#[derive(Clone)]
pub struct InventoryService {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    guard: ConnectivityGuard,
    cache: HostCache,
    executor: ReconfigExecutor,
}

impl InventoryService {
    /// Build the service, loading any stored account. No connection is made yet.
    pub fn new(
        db: Database,
        connector: Arc<dyn Connector>,
        config: &DaemonConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let credentials = db.load_credentials()?;
        match &credentials {
            Some(c) => info!(vcenter = %c.vcenter, username = %c.username, "Loaded stored vCenter account"),
            None => info!("No vCenter account registered yet"),
        }

        Ok(Self {
            inner: Arc::new(Inner {
                guard: ConnectivityGuard::new(connector, credentials),
                cache: HostCache::new(config.inventory.host_cache_ttl(), clock),
                executor: ReconfigExecutor::new(
                    config.vcenter.task_poll_interval(),
                    config.vcenter.task_timeout(),
                ),
                db,
            }),
        })
    }

    /// Fresh host map; also refreshes the host cache.
    pub async fn hosts(&self) -> Result<HostMap> {
        let generation = self.inner.cache.generation();
        let session = self.inner.guard.ensure_connected().await?;
        let hosts = reconciler::fetch_host_map(session.as_ref()).await?;
        self.cache_hosts(generation, hosts.clone());
        Ok(hosts)
    }

    pub async fn vms(&self) -> Result<Vec<VirtualMachine>> {
        Ok(self.inventory().await?.vms)
    }

    pub async fn inventory(&self) -> Result<Inventory> {
        let generation = self.inner.cache.generation();
        let session = self.inner.guard.ensure_connected().await?;
        let inventory = reconciler::build_inventory(session.as_ref()).await?;
        self.cache_hosts(generation, inventory.hosts.clone());
        Ok(inventory)
    }

    fn cache_hosts(&self, generation: u64, hosts: HostMap) {
        if !self.inner.cache.store(generation, hosts) {
            debug!("Account changed during fetch, host map not cached");
        }
    }

    /// Port groups of `host`, served from the host cache when possible.
    ///
    /// A host missing from the cached map triggers one refresh before the
    /// lookup is reported as not found.
    pub async fn portgroups(&self, host: &str) -> Result<Vec<PortGroup>> {
        require("host", host)?;

        if let Some(entry) = self.inner.cache.get().and_then(|hosts| hosts.get(host).cloned()) {
            debug!(host, "Port groups served from cache");
            return Ok(entry.nets);
        }

        self.hosts()
            .await?
            .remove(host)
            .map(|entry| entry.nets)
            .ok_or_else(|| Error::not_found("host", host))
    }

    pub async fn reassign_nic(&self, uuid: &str, portgroup: &str) -> Result<TaskResult> {
        require("uuid", uuid)?;
        require("portgroup", portgroup)?;

        let session = self.inner.guard.ensure_connected().await?;
        self.inner
            .executor
            .reassign_nic(session.as_ref(), uuid, portgroup)
            .await
    }

    /// Replace the stored account and reconnect with it.
    ///
    /// The account stays saved even when the new session cannot be opened.
    pub async fn register(&self, credentials: Credentials) -> Result<()> {
        require("vcenter", &credentials.vcenter)?;
        require("username", &credentials.username)?;

        self.inner.db.save_credentials(&credentials)?;
        info!(vcenter = %credentials.vcenter, username = %credentials.username, "Registered vCenter account");

        // Fetches started after the invalidation only ever see the new session
        self.inner.guard.reset(Some(credentials)).await;
        self.inner.cache.invalidate();

        if let Err(e) = self.inner.guard.ensure_connected().await {
            warn!("Connecting with the new account failed: {}", e);
            return Err(e);
        }
        Ok(())
    }

    pub fn account(&self) -> Result<AccountInfo> {
        let credentials = self.inner.db.load_credentials()?;
        Ok(AccountInfo::from_credentials(credentials.as_ref()))
    }

    pub fn is_registered(&self) -> bool {
        self.inner.guard.is_registered()
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            registered: self.inner.guard.is_registered(),
            connected: self.inner.guard.is_connected().await,
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidRequest(format!("missing parameter: {field}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::ManualClock;
    use crate::connection::testing::{FakeSession, Gate};
    use crate::vsphere::{HostRecord, RawPortGroup, VimSession, VmRecord};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    /// One fixed session per reachable vCenter
    struct FixedConnector {
        sessions: Vec<(&'static str, Arc<FakeSession>)>,
    }

    #[async_trait]
    impl Connector for FixedConnector {
        async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn VimSession>> {
            self.sessions
                .iter()
                .find(|(vcenter, _)| *vcenter == credentials.vcenter)
                .map(|(_, session)| session.clone() as Arc<dyn VimSession>)
                .ok_or_else(|| Error::Connectivity(format!("{} unreachable", credentials.vcenter)))
        }
    }

    fn session() -> Arc<FakeSession> {
        Arc::new(lab_session("esx01"))
    }

    fn lab_session(host: &str) -> FakeSession {
        FakeSession {
            hosts: vec![HostRecord {
                mor: "host-1".into(),
                name: host.into(),
                portgroups: vec![RawPortGroup {
                    name: "VLAN10".into(),
                    vlan_id: 10,
                    vswitch: "vSwitch0".into(),
                }],
                vm_ids: vec!["vm-1".into()],
                ..Default::default()
            }],
            vms: vec![VmRecord {
                mor: "vm-1".into(),
                uuid: "4211-aa".into(),
                name: "web01".into(),
                guest_state: "running".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn service(db: Database, session: Arc<FakeSession>) -> InventoryService {
        service_with(db, vec![("vc.lab", session)])
    }

    fn service_with(
        db: Database,
        sessions: Vec<(&'static str, Arc<FakeSession>)>,
    ) -> InventoryService {
        let connector = Arc::new(FixedConnector { sessions });
        InventoryService::new(db, connector, &DaemonConfig::default(), Arc::new(ManualClock::new()))
            .unwrap()
    }

    fn registered_db() -> Database {
        let db = Database::open_memory().unwrap();
        db.save_credentials(&Credentials::new("vc.lab", "admin", "pw")).unwrap();
        db
    }

    #[tokio::test]
    async fn test_unregistered_service() {
        let svc = service(Database::open_memory().unwrap(), session());

        assert_eq!(
            svc.status().await,
            ServiceStatus {
                registered: false,
                connected: false
            }
        );
        assert!(matches!(svc.hosts().await, Err(Error::NotRegistered)));
        assert!(!svc.account().unwrap().password_set);
    }

    #[tokio::test]
    async fn test_stored_account_connects_lazily() {
        let svc = service(registered_db(), session());
        assert!(!svc.status().await.connected);

        let vms = svc.vms().await.unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].host.as_deref(), Some("esx01"));
        assert!(svc.status().await.connected);
    }

    #[tokio::test]
    async fn test_portgroups_use_cache() {
        let fake = session();
        let svc = service(registered_db(), fake.clone());

        let nets = svc.portgroups("esx01").await.unwrap();
        assert_eq!(nets[0].name, "VLAN10");
        let nets = svc.portgroups("esx01").await.unwrap();
        assert_eq!(nets.len(), 1);
        assert_eq!(fake.host_fetches.load(Ordering::SeqCst), 1);

        let err = svc.portgroups("esx99").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(matches!(svc.portgroups("").await, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_register_replaces_account_and_clears_cache() {
        let fake = session();
        let svc = service(registered_db(), fake.clone());
        svc.hosts().await.unwrap();

        svc.register(Credentials::new("vc.lab", "ops", "secret"))
            .await
            .unwrap();
        svc.portgroups("esx01").await.unwrap();
        assert_eq!(fake.host_fetches.load(Ordering::SeqCst), 2);

        let account = svc.account().unwrap();
        assert_eq!(account.username, "ops");
        assert_eq!(account.password, "");
        assert!(account.password_set);
    }

    #[tokio::test]
    async fn test_register_keeps_account_when_connect_fails() {
        let svc = service(Database::open_memory().unwrap(), session());

        let err = svc
            .register(Credentials::new("vc.down", "admin", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));

        assert_eq!(svc.account().unwrap().vcenter, "vc.down");
        assert!(svc.status().await.registered);
        assert!(!svc.status().await.connected);
    }

    #[tokio::test]
    async fn test_reassign_validates_parameters() {
        let svc = service(registered_db(), session());
        assert!(matches!(
            svc.reassign_nic("", "VLAN10").await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            svc.reassign_nic("4211-aa", " ").await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_in_flight_during_register_is_not_cached() {
        let gate = Arc::new(Gate::default());
        let old = Arc::new(FakeSession {
            fetch_gate: Some(gate.clone()),
            ..lab_session("old-esx")
        });
        let new = Arc::new(lab_session("new-esx"));

        let db = Database::open_memory().unwrap();
        db.save_credentials(&Credentials::new("old.lab", "admin", "pw")).unwrap();
        let svc = service_with(db, vec![("old.lab", old), ("new.lab", new)]);

        let in_flight = tokio::spawn({
            let svc = svc.clone();
            async move { svc.hosts().await }
        });
        gate.entered.notified().await;

        svc.register(Credentials::new("new.lab", "admin", "pw"))
            .await
            .unwrap();
        gate.release.notify_one();

        let stale = in_flight.await.unwrap().unwrap();
        assert!(stale.contains_key("old-esx"));

        let err = svc.portgroups("old-esx").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(svc.portgroups("new-esx").await.unwrap()[0].name, "VLAN10");
    }
}
