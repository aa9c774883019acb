//! Endpoint session lifecycle
//!
//! One session per process, established lazily. A session that fails the
//! liveness probe is dropped and re-established once; if that fails the
//! caller gets [`Error::Connectivity`]. Probes run without the session lock;
//! the async mutex only serialises (re)connects.

use crate::vsphere::{Connector, VimSession};
use parking_lot::RwLock;
use portgroup_common::{Credentials, Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct ConnectivityGuard {
    connector: Arc<dyn Connector>,
    credentials: RwLock<Option<Credentials>>,
    session: Mutex<Option<Arc<dyn VimSession>>>,
}

impl ConnectivityGuard {
    pub fn new(connector: Arc<dyn Connector>, credentials: Option<Credentials>) -> Self {
        Self {
            connector,
            credentials: RwLock::new(credentials),
            session: Mutex::new(None),
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.credentials.read().is_some()
    }

    /// Whether a session is currently held (not probed).
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Return a live session, connecting or reconnecting as needed.
    pub async fn ensure_connected(&self) -> Result<Arc<dyn VimSession>> {
        let held = self.session.lock().await.clone();
        let failed = match held {
            Some(session) => match session.probe().await {
                Ok(()) => return Ok(session),
                Err(e) => {
                    warn!("Session probe failed, re-connecting: {}", e);
                    Some(session)
                }
            },
            None => None,
        };

        let mut slot = self.session.lock().await;
        if let Some(current) = slot.clone() {
            // Replaced by a concurrent caller while we were probing
            if !failed.as_ref().is_some_and(|f| Arc::ptr_eq(f, &current)) {
                return Ok(current);
            }
            *slot = None;
            current.close().await;
        }

        let credentials = self.credentials().ok_or(Error::NotRegistered)?;
        let session = self.connect(&credentials).await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Swap in new credentials and drop the current session.
    pub async fn reset(&self, credentials: Option<Credentials>) {
        let mut slot = self.session.lock().await;
        if let Some(stale) = slot.take() {
            stale.close().await;
        }
        *self.credentials.write() = credentials;
        debug!("Session reset");
    }

    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn VimSession>> {
        match self.connector.connect(credentials).await {
            Ok(session) => {
                info!(vcenter = %credentials.vcenter, "vCenter session established");
                Ok(session)
            }
            Err(Error::Connectivity(msg)) => Err(Error::Connectivity(msg)),
            Err(e) => Err(Error::Connectivity(e.to_string())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeSession, Gate};
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Hands out fresh fake sessions and counts connects.
    #[derive(Default)]
    struct CountingConnector {
        connects: AtomicUsize,
        refuse: bool,
        liveness_gate: Option<Arc<Gate>>,
        sessions: parking_lot::Mutex<Vec<Arc<FakeSession>>>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _credentials: &Credentials) -> Result<Arc<dyn VimSession>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(Error::Api {
                    status: 503,
                    message: "service unavailable".into(),
                });
            }
            let session = Arc::new(FakeSession {
                liveness_gate: self.liveness_gate.clone(),
                ..Default::default()
            });
            self.sessions.lock().push(session.clone());
            Ok(session)
        }
    }

    fn creds() -> Credentials {
        Credentials::new("vc.lab", "admin", "pw")
    }

    #[tokio::test]
    async fn test_connects_lazily_and_reuses_live_session() {
        let connector = Arc::new(CountingConnector::default());
        let guard = ConnectivityGuard::new(connector.clone(), Some(creds()));

        assert!(!guard.is_connected().await);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);

        guard.ensure_connected().await.unwrap();
        guard.ensure_connected().await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(guard.is_connected().await);
    }

    #[tokio::test]
    async fn test_dead_session_is_replaced_once() {
        let connector = Arc::new(CountingConnector::default());
        let guard = ConnectivityGuard::new(connector.clone(), Some(creds()));

        guard.ensure_connected().await.unwrap();
        let first = connector.sessions.lock()[0].clone();
        first.dead.store(true, Ordering::SeqCst);

        guard.ensure_connected().await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert!(first.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connectivity_error() {
        let connector = Arc::new(CountingConnector {
            refuse: true,
            ..Default::default()
        });
        let guard = ConnectivityGuard::new(connector.clone(), Some(creds()));

        let err = guard.ensure_connected().await.err().unwrap();
        assert!(matches!(err, Error::Connectivity(_)));
        assert!(!guard.is_connected().await);
    }

    #[tokio::test]
    async fn test_unregistered_guard() {
        let connector = Arc::new(CountingConnector::default());
        let guard = ConnectivityGuard::new(connector.clone(), None);

        assert!(!guard.is_registered());
        let err = guard.ensure_connected().await.err().unwrap();
        assert!(matches!(err, Error::NotRegistered));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_drops_session_and_swaps_credentials() {
        let connector = Arc::new(CountingConnector::default());
        let guard = ConnectivityGuard::new(connector.clone(), Some(creds()));
        guard.ensure_connected().await.unwrap();

        let replacement = Credentials::new("vc2.lab", "ops", "pw2");
        guard.reset(Some(replacement.clone())).await;

        assert!(!guard.is_connected().await);
        assert_eq!(guard.credentials(), Some(replacement));
        assert!(connector.sessions.lock()[0].closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_liveness_check_does_not_hold_session_lock() {
        let gate = Arc::new(Gate::default());
        let connector = Arc::new(CountingConnector {
            liveness_gate: Some(gate.clone()),
            ..Default::default()
        });
        let guard = Arc::new(ConnectivityGuard::new(connector.clone(), Some(creds())));
        guard.ensure_connected().await.unwrap();

        let probing = tokio::spawn({
            let guard = guard.clone();
            async move { guard.ensure_connected().await.map(|_| ()) }
        });
        gate.entered.notified().await;

        let connected = tokio::time::timeout(Duration::from_secs(1), guard.is_connected()).await;
        assert_eq!(connected.ok(), Some(true));

        gate.release.notify_one();
        probing.await.unwrap().unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_during_failed_liveness_check_keeps_new_session() {
        let gate = Arc::new(Gate::default());
        let connector = Arc::new(CountingConnector {
            liveness_gate: Some(gate.clone()),
            ..Default::default()
        });
        let guard = Arc::new(ConnectivityGuard::new(connector.clone(), Some(creds())));
        guard.ensure_connected().await.unwrap();
        let first = connector.sessions.lock()[0].clone();
        first.dead.store(true, Ordering::SeqCst);

        let probing = tokio::spawn({
            let guard = guard.clone();
            async move { guard.ensure_connected().await.map(|_| ()) }
        });
        gate.entered.notified().await;

        // A registration swaps the session while the old one is being probed
        guard.reset(Some(creds())).await;
        let replacement = tokio::spawn({
            let guard = guard.clone();
            async move { guard.ensure_connected().await.map(|_| ()) }
        });
        replacement.await.unwrap().unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);

        gate.release.notify_one();
        probing.await.unwrap().unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert!(!connector.sessions.lock()[1].closed.load(Ordering::SeqCst));
    }
}
