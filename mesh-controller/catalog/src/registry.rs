use crate::metrics::{CatalogMetrics, ProxyState, RegistryMetrics};
use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use mesh_controller_core::{
    bus::Subscription, CertificateManager, CommonName, EventBus, Kind, Proxy,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

/// Tracks the lifecycle of every proxy connection.
///
/// A proxy is expected once its certificate is issued, connected while it
/// streams configuration and disconnected after its stream ends. Each state
/// has its own lock, and no two locks are ever held at once; a proxy may be
/// briefly absent from every state while it moves between them.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    expected: Mutex<HashMap<CommonName, ExpectedProxy>>,
    connected: Mutex<HashMap<CommonName, ConnectedProxy>>,
    disconnected: Mutex<HashMap<CommonName, DisconnectedProxy>>,

    /// Pod UIDs to the common name of the proxy running in the pod.
    pod_certificates: Mutex<HashMap<String, CommonName>>,

    metrics: RegistryMetrics,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedProxy {
    pub certificate_issued_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ConnectedProxy {
    pub proxy: Proxy,
    pub connected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisconnectedProxy {
    pub last_seen: DateTime<Utc>,
}

// === impl ProxyRegistry ===

impl ProxyRegistry {
    pub fn new(metrics: &CatalogMetrics) -> Self {
        Self {
            metrics: metrics.registry.clone(),
            ..Default::default()
        }
    }

    /// Records that a certificate was issued for `cn` and a connection is
    /// anticipated. Repeated calls refresh the issue time.
    pub fn expect_proxy(&self, cn: CommonName) {
        self.remove(ProxyState::Disconnected, &cn);
        let mut expected = self.expected.lock();
        expected.insert(
            cn,
            ExpectedProxy {
                certificate_issued_at: Utc::now(),
            },
        );
        self.metrics.set(ProxyState::Expected, expected.len());
    }

    pub fn register_proxy(&self, proxy: Proxy) {
        let cn = proxy.common_name.clone();
        self.remove(ProxyState::Expected, &cn);
        self.remove(ProxyState::Disconnected, &cn);

        if let Some(uid) = proxy.pod_uid() {
            self.pod_certificates
                .lock()
                .insert(uid.to_string(), cn.clone());
        }

        tracing::debug!(%cn, "proxy connected");
        let mut connected = self.connected.lock();
        connected.insert(
            cn,
            ConnectedProxy {
                connected_at: proxy.connected_at,
                proxy,
            },
        );
        self.metrics.set(ProxyState::Connected, connected.len());
    }

    /// Marks the proxy disconnected. This never fails, even for proxies that
    /// were not known to be connected.
    pub fn unregister_proxy(&self, cn: &CommonName) {
        self.remove(ProxyState::Connected, cn);
        self.remove(ProxyState::Expected, cn);

        tracing::debug!(%cn, "proxy disconnected");
        let mut disconnected = self.disconnected.lock();
        disconnected.insert(
            cn.clone(),
            DisconnectedProxy {
                last_seen: Utc::now(),
            },
        );
        self.metrics.set(ProxyState::Disconnected, disconnected.len());
    }

    pub fn list_expected_proxies(&self) -> BTreeMap<CommonName, ExpectedProxy> {
        snapshot(&self.expected)
    }

    pub fn list_connected_proxies(&self) -> BTreeMap<CommonName, ConnectedProxy> {
        snapshot(&self.connected)
    }

    pub fn list_disconnected_proxies(&self) -> BTreeMap<CommonName, DisconnectedProxy> {
        snapshot(&self.disconnected)
    }

    pub fn get_connected_proxy(&self, cn: &CommonName) -> Option<Proxy> {
        self.connected.lock().get(cn).map(|c| c.proxy.clone())
    }

    pub fn connected_proxy_count(&self) -> usize {
        self.connected.lock().len()
    }

    /// Clones every connected proxy so that announcements can be sent
    /// without holding the lock.
    pub(crate) fn connected_proxies(&self) -> Vec<Proxy> {
        self.connected
            .lock()
            .values()
            .map(|c| c.proxy.clone())
            .collect()
    }

    /// Forgets the proxy recorded for a pod, returning its common name.
    pub fn take_pod_certificate(&self, pod_uid: &str) -> Option<CommonName> {
        self.pod_certificates.lock().remove(pod_uid)
    }

    fn remove(&self, state: ProxyState, cn: &CommonName) {
        let len = match state {
            ProxyState::Expected => {
                let mut expected = self.expected.lock();
                expected.remove(cn);
                expected.len()
            }
            ProxyState::Connected => {
                let mut connected = self.connected.lock();
                connected.remove(cn);
                connected.len()
            }
            ProxyState::Disconnected => {
                let mut disconnected = self.disconnected.lock();
                disconnected.remove(cn);
                disconnected.len()
            }
        };
        self.metrics.set(state, len);
    }
}

fn snapshot<V: Clone>(map: &Mutex<HashMap<CommonName, V>>) -> BTreeMap<CommonName, V> {
    map.lock()
        .iter()
        .map(|(cn, v)| (cn.clone(), v.clone()))
        .collect()
}

/// Releases the certificate of the proxy running in each deleted pod.
///
/// Completes when the bus is closed or shutdown is signaled.
pub async fn release_certificates_on_pod_delete(
    bus: EventBus,
    registry: Arc<ProxyRegistry>,
    certificates: Arc<dyn CertificateManager>,
    shutdown: drain::Watch,
) {
    let pod_deleted = bus.subscribe([Kind::PodDeleted]);
    tokio::select! {
        _ = release_loop(pod_deleted, &registry, &*certificates) => {}
        _ = shutdown.signaled() => {
            tracing::debug!("shutdown");
        }
    }
}

async fn release_loop(
    mut pod_deleted: Subscription,
    registry: &ProxyRegistry,
    certificates: &dyn CertificateManager,
) {
    use mesh_controller_core::announcement::Resource;

    while let Some(msg) = pod_deleted.recv().await {
        let Some(Resource::Pod(pod)) = msg.old else {
            tracing::warn!(kind = %msg.kind, "pod deletion without the deleted pod");
            continue;
        };
        let Some(uid) = pod.metadata.uid.as_deref() else {
            continue;
        };
        if let Some(cn) = registry.take_pod_certificate(uid) {
            tracing::info!(%cn, pod = ?pod.metadata.name, "releasing certificate of deleted pod");
            certificates.release_certificate(&cn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_controller_core::{
        announcement::Message, proxy::PodMetadata, Certificate, CertificateError,
        K8sServiceAccount,
    };
    use mesh_controller_k8s_api::{ObjectMeta, Pod};
    use std::time::Duration;

    fn cn(id: &str) -> CommonName {
        CommonName::new(format!("{id}.bookstore.default.cluster.local"))
    }

    fn mk_proxy(id: &str, pod_uid: Option<&str>) -> Proxy {
        let pod = pod_uid.map(|uid| PodMetadata {
            uid: uid.to_string(),
            name: format!("bookstore-{id}"),
            namespace: "default".to_string(),
            service_account: K8sServiceAccount::new("default", "bookstore"),
        });
        Proxy::new(cn(id), pod, 8).0
    }

    fn states(registry: &ProxyRegistry, cn: &CommonName) -> (bool, bool, bool) {
        (
            registry.list_expected_proxies().contains_key(cn),
            registry.list_connected_proxies().contains_key(cn),
            registry.list_disconnected_proxies().contains_key(cn),
        )
    }

    #[test]
    fn lifecycle_transitions() {
        let registry = ProxyRegistry::default();
        let cn = cn("a");

        registry.expect_proxy(cn.clone());
        assert_eq!(states(&registry, &cn), (true, false, false));

        registry.register_proxy(mk_proxy("a", None));
        assert_eq!(states(&registry, &cn), (false, true, false));
        assert_eq!(registry.connected_proxy_count(), 1);
        assert!(registry.get_connected_proxy(&cn).is_some());

        registry.unregister_proxy(&cn);
        assert_eq!(states(&registry, &cn), (false, false, true));
        assert!(registry.get_connected_proxy(&cn).is_none());

        // Reconnecting moves the proxy back to connected.
        registry.register_proxy(mk_proxy("a", None));
        assert_eq!(states(&registry, &cn), (false, true, false));
    }

    #[test]
    fn unregister_unknown_proxy() {
        let registry = ProxyRegistry::default();
        let cn = cn("unknown");
        registry.unregister_proxy(&cn);
        assert_eq!(states(&registry, &cn), (false, false, true));
    }

    #[test]
    fn expect_refreshes_timestamp() {
        let registry = ProxyRegistry::default();
        registry.expect_proxy(cn("a"));
        let first = registry.list_expected_proxies()[&cn("a")].certificate_issued_at;
        registry.expect_proxy(cn("a"));
        let second = registry.list_expected_proxies()[&cn("a")].certificate_issued_at;
        assert!(second >= first);
        assert_eq!(registry.list_expected_proxies().len(), 1);
    }

    #[test]
    fn concurrent_registration() {
        let registry = Arc::new(ProxyRegistry::default());
        let threads = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let id = format!("{t}-{i}");
                        registry.expect_proxy(cn(&id));
                        registry.register_proxy(mk_proxy(&id, None));
                        let _ = registry.list_connected_proxies();
                        if i % 2 == 0 {
                            registry.unregister_proxy(&cn(&id));
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().expect("thread must not panic");
        }

        assert!(registry.list_expected_proxies().is_empty());
        assert_eq!(registry.connected_proxy_count(), 8 * 25);
        assert_eq!(registry.list_disconnected_proxies().len(), 8 * 25);
        let connected = registry.list_connected_proxies();
        for cn in registry.list_disconnected_proxies().keys() {
            assert!(!connected.contains_key(cn));
        }
    }

    #[derive(Default)]
    struct Released(Mutex<Vec<CommonName>>);

    #[async_trait::async_trait]
    impl CertificateManager for Released {
        async fn issue_certificate(
            &self,
            cn: &CommonName,
            _: Duration,
        ) -> Result<Certificate, CertificateError> {
            Err(CertificateError::NotFound(cn.clone()))
        }

        fn get_certificate(&self, cn: &CommonName) -> Result<Certificate, CertificateError> {
            Err(CertificateError::NotFound(cn.clone()))
        }

        fn release_certificate(&self, cn: &CommonName) {
            self.0.lock().push(cn.clone());
        }

        fn list_certificates(&self) -> Vec<Certificate> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn releases_certificate_when_pod_deleted() {
        let bus = EventBus::new();
        let registry = Arc::new(ProxyRegistry::default());
        let released = Arc::new(Released::default());
        let (signal, shutdown) = drain::channel();

        registry.register_proxy(mk_proxy("a", Some("uid-a")));
        let task = tokio::spawn(release_certificates_on_pod_delete(
            bus.clone(),
            registry.clone(),
            released.clone(),
            shutdown,
        ));
        // Let the task subscribe.
        tokio::task::yield_now().await;
        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        let pod = |uid: &str| {
            Arc::new(Pod {
                metadata: ObjectMeta {
                    namespace: Some("default".to_string()),
                    name: Some("bookstore-a".to_string()),
                    uid: Some(uid.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
        };
        bus.publish(Message::deleted(pod("uid-other")));
        bus.publish(Message::deleted(pod("uid-a")));

        while released.0.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(*released.0.lock(), vec![cn("a")]);
        assert!(registry.take_pod_certificate("uid-a").is_none());

        signal.drain().await;
        task.await.expect("task must not panic");
    }
}
