// ── Control-plane connection ──
//
// Owns the live session and the guest-operations sub-services handed out
// by it. Sessions go stale without warning; every call routed through
// `Connection` that fails with `SessionExpired` reconnects and is retried
// once. The session is swapped atomically so in-flight operations holding
// an older `Arc` keep using it undisturbed.

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use vmsteward_api::{
    Connector, ControlPlane, Credentials, Endpoint, FileTransferClient, GuestFileManager,
    GuestProcessManager,
};

use crate::config::{ConnectionConfig, PollingConfig};
use crate::error::CoreError;
use crate::resolver::EntityCache;

/// A logged-in session plus its guest-operations sub-services.
struct Session {
    plane: Arc<dyn ControlPlane>,
    processes: Arc<dyn GuestProcessManager>,
    files: Arc<dyn GuestFileManager>,
}

/// Connection context shared by every operation against one vCenter.
pub struct Connection {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    credentials: Credentials,
    session: ArcSwap<Session>,
    pub(crate) cache: EntityCache,
    pub(crate) polling: PollingConfig,
    pub(crate) downloads: FileTransferClient,
}

impl Connection {
    /// Log in and fetch the guest-operations sub-services.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        config: &ConnectionConfig,
    ) -> Result<Self, CoreError> {
        let endpoint = config.endpoint();
        let credentials = config.credentials();
        let session = open_session(connector.as_ref(), &endpoint, &credentials).await?;
        let downloads = FileTransferClient::new(&config.transport())?;

        Ok(Self {
            connector,
            endpoint,
            credentials,
            session: ArcSwap::from_pointee(session),
            cache: EntityCache::default(),
            polling: config.polling.clone(),
            downloads,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    /// Replace the session and the cached sub-service handles with fresh
    /// ones. Cached entity handles are kept.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        self.try_refresh().await.map_err(CoreError::from)
    }

    async fn try_refresh(&self) -> Result<(), vmsteward_api::Error> {
        info!(endpoint = %self.endpoint, "re-establishing vCenter session");
        let session =
            open_session(self.connector.as_ref(), &self.endpoint, &self.credentials).await?;
        self.session.store(Arc::new(session));
        Ok(())
    }

    // ── Session-guarded calls ────────────────────────────────────────
    //
    // These return the raw API error so callers can inspect faults
    // (e.g. "Invalid Fault") before translating.

    /// Run `op` against the control plane, reconnecting and retrying once
    /// if the session has expired.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, vmsteward_api::Error>
    where
        F: Fn(Arc<dyn ControlPlane>) -> Fut,
        Fut: Future<Output = Result<T, vmsteward_api::Error>>,
    {
        self.with_session(|s| op(Arc::clone(&s.plane))).await
    }

    /// Like [`call`](Self::call), against the guest process manager.
    pub async fn call_processes<T, F, Fut>(&self, op: F) -> Result<T, vmsteward_api::Error>
    where
        F: Fn(Arc<dyn GuestProcessManager>) -> Fut,
        Fut: Future<Output = Result<T, vmsteward_api::Error>>,
    {
        self.with_session(|s| op(Arc::clone(&s.processes))).await
    }

    /// Like [`call`](Self::call), against the guest file manager.
    pub async fn call_files<T, F, Fut>(&self, op: F) -> Result<T, vmsteward_api::Error>
    where
        F: Fn(Arc<dyn GuestFileManager>) -> Fut,
        Fut: Future<Output = Result<T, vmsteward_api::Error>>,
    {
        self.with_session(|s| op(Arc::clone(&s.files))).await
    }

    async fn with_session<T, F, Fut>(&self, op: F) -> Result<T, vmsteward_api::Error>
    where
        F: Fn(&Session) -> Fut,
        Fut: Future<Output = Result<T, vmsteward_api::Error>>,
    {
        let session = self.session.load_full();
        match op(session.as_ref()).await {
            Err(e) if e.is_session_expired() => {
                warn!(endpoint = %self.endpoint, "vCenter session expired, reconnecting");
                self.try_refresh().await?;
                let session = self.session.load_full();
                op(session.as_ref()).await
            }
            result => result,
        }
    }
}

async fn open_session(
    connector: &dyn Connector,
    endpoint: &Endpoint,
    credentials: &Credentials,
) -> Result<Session, vmsteward_api::Error> {
    debug!(%endpoint, user = %credentials.username, "connecting to vCenter");

    let wrap = |e: vmsteward_api::Error| match e {
        e @ vmsteward_api::Error::Connect { .. } => e,
        other => vmsteward_api::Error::Connect {
            endpoint: endpoint.to_string(),
            reason: other.to_string(),
        },
    };

    let plane = connector.connect(endpoint, credentials).await.map_err(wrap)?;
    let processes = plane.process_manager().await.map_err(wrap)?;
    let files = plane.file_manager().await.map_err(wrap)?;

    info!(%endpoint, "connected to vCenter");
    Ok(Session {
        plane,
        processes,
        files,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;
    use vmsteward_api::fake::{FakeConnector, FakeControlPlane};
    use vmsteward_api::PowerState;

    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("vcenter.lab", "svc", SecretString::from("pw".to_string()))
    }

    #[tokio::test]
    async fn expired_session_is_refreshed_and_retried_once() {
        let plane = FakeControlPlane::new();
        let vm = plane.add_vm("web-01", "vm-1");
        let connector = FakeConnector::new(plane.clone());
        let conn = Connection::connect(Arc::new(connector.clone()), &config())
            .await
            .unwrap();
        assert_eq!(connector.connects(), 1);

        plane.expire_session(1);
        let state = conn
            .call(|p| {
                let vm = vm.clone();
                async move { p.power_state(&vm).await }
            })
            .await
            .unwrap();

        assert_eq!(state, PowerState::PoweredOff);
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_is_surfaced_as_connection_error() {
        let plane = FakeControlPlane::new();
        let vm = plane.add_vm("web-01", "vm-1");
        let connector = FakeConnector::new(plane.clone());
        let conn = Connection::connect(Arc::new(connector.clone()), &config())
            .await
            .unwrap();

        // The call expires, then so does the sub-service lookup during
        // the reconnect.
        plane.expire_session(2);
        let result = conn
            .call(|p| {
                let vm = vm.clone();
                async move { p.power_state(&vm).await }
            })
            .await;

        assert!(
            matches!(result, Err(vmsteward_api::Error::Connect { .. })),
            "expected Connect error, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn refused_login_is_connection_failed_naming_endpoint() {
        let connector = FakeConnector::new(FakeControlPlane::new());
        connector.refuse_logins("certificate rejected");

        let err = Connection::connect(Arc::new(connector), &config())
            .await
            .err()
            .unwrap();

        match err {
            CoreError::ConnectionFailed { endpoint, reason } => {
                assert_eq!(endpoint, "vcenter.lab:443");
                assert_eq!(reason, "certificate rejected");
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
    }
}
