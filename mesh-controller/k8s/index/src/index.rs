use crate::metrics::SizedIndex;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kube::ResourceExt;
use mesh_controller_core::{announcement::Announced, EventBus, MeshSettings, Message};
use mesh_controller_k8s_api::{
    policy::{Egress, IngressBackend, Retry, UpstreamTrafficSetting},
    smi::{HttpRouteGroup, TcpRoute, TrafficSplit, TrafficTarget},
    Endpoints, MeshConfig, Pod, Service,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds every watched resource, by namespace.
///
/// Each change is announced on the bus with the previous and current versions
/// of the object so that subscribers can drop no-op updates.
#[derive(Debug)]
pub struct Index {
    namespaces: HashMap<String, Namespace>,
    bus: EventBus,

    /// When set, resources outside these namespaces are ignored.
    monitored: Option<HashSet<String>>,

    mesh_config: MeshConfigRef,
    current_mesh_config: Option<Arc<MeshConfig>>,
    settings: watch::Sender<MeshSettings>,

    /// Settings restored when the mesh config is deleted.
    initial_settings: MeshSettings,
}

/// Names the `MeshConfig` that drives live settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeshConfigRef {
    pub namespace: String,
    pub name: String,
}

pub(crate) type Store<T> = HashMap<String, Arc<T>>;

#[derive(Debug, Default)]
pub(crate) struct Namespace {
    pub(crate) pods: Store<Pod>,
    pub(crate) services: Store<Service>,
    pub(crate) endpoints: Store<Endpoints>,
    pub(crate) traffic_splits: Store<TrafficSplit>,
    pub(crate) traffic_targets: Store<TrafficTarget>,
    pub(crate) http_route_groups: Store<HttpRouteGroup>,
    pub(crate) tcp_routes: Store<TcpRoute>,
    pub(crate) egresses: Store<Egress>,
    pub(crate) ingress_backends: Store<IngressBackend>,
    pub(crate) retries: Store<Retry>,
    pub(crate) upstream_traffic_settings: Store<UpstreamTrafficSetting>,
}

/// A resource type held in a per-namespace store.
pub(crate) trait Indexed: Announced + kube::Resource<DynamicType = ()> {
    fn store(ns: &Namespace) -> &Store<Self>;

    fn store_mut(ns: &mut Namespace) -> &mut Store<Self>;
}

// === impl Index ===

impl Index {
    pub fn shared(
        bus: EventBus,
        mesh_config: MeshConfigRef,
        initial_settings: MeshSettings,
        monitored: Option<HashSet<String>>,
    ) -> (SharedIndex, watch::Receiver<MeshSettings>) {
        let (settings, settings_rx) = watch::channel(initial_settings.clone());
        let index = Self {
            namespaces: HashMap::default(),
            bus,
            monitored,
            mesh_config,
            current_mesh_config: None,
            settings,
            initial_settings,
        };
        (Arc::new(RwLock::new(index)), settings_rx)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn namespace(&self, ns: &str) -> Option<&Namespace> {
        self.namespaces.get(ns)
    }

    /// Lists every resource of a type across all namespaces.
    pub(crate) fn list<T: Indexed>(&self) -> Vec<Arc<T>> {
        self.namespaces
            .values()
            .flat_map(|ns| T::store(ns).values().cloned())
            .collect()
    }

    pub(crate) fn get<T: Indexed>(&self, namespace: &str, name: &str) -> Option<Arc<T>> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| T::store(ns).get(name).cloned())
    }

    /// Namespaces holding at least one indexed resource.
    pub fn monitored_namespaces(&self) -> Vec<String> {
        let mut namespaces = self.namespaces.keys().cloned().collect::<Vec<_>>();
        namespaces.sort();
        namespaces
    }

    pub fn is_monitored_namespace(&self, namespace: &str) -> bool {
        match self.monitored.as_ref() {
            Some(allowed) => allowed.contains(namespace),
            None => self.namespaces.contains_key(namespace),
        }
    }

    pub(crate) fn store_len<T: Indexed>(&self, namespace: &str) -> usize {
        self.namespaces
            .get(namespace)
            .map(|ns| T::store(ns).len())
            .unwrap_or(0)
    }

    fn apply_resource<T: Indexed>(&mut self, resource: T) {
        let Some(namespace) = resource.namespace() else {
            tracing::warn!(
                kind = %T::kind(&()),
                name = %resource.name_any(),
                "resource has no namespace"
            );
            return;
        };
        if let Some(allowed) = self.monitored.as_ref() {
            if !allowed.contains(&namespace) {
                tracing::trace!(%namespace, "ignoring resource in unmonitored namespace");
                return;
            }
        }

        let name = resource.name_unchecked();
        let new = Arc::new(resource);
        let ns = self.namespaces.entry(namespace).or_default();
        let msg = match T::store_mut(ns).insert(name, new.clone()) {
            Some(old) => Message::updated(old, new),
            None => Message::added(new),
        };
        self.bus.publish(msg);
    }

    fn delete_resource<T: Indexed>(&mut self, namespace: String, name: String) {
        let Some(ns) = self.namespaces.get_mut(&namespace) else {
            return;
        };
        let old = T::store_mut(ns).remove(&name);
        if ns.is_empty() {
            self.namespaces.remove(&namespace);
        }
        if let Some(old) = old {
            self.bus.publish(Message::deleted(old));
        }
    }
}

impl kubert::index::IndexNamespacedResource<MeshConfig> for Index {
    fn apply(&mut self, config: MeshConfig) {
        if !self.mesh_config.matches(&config) {
            tracing::debug!(
                namespace = ?config.namespace(),
                name = %config.name_any(),
                "ignoring unrelated MeshConfig"
            );
            return;
        }

        let settings = MeshSettings::from(&config.spec);
        self.settings.send_if_modified(|current| {
            if *current == settings {
                return false;
            }
            tracing::info!(?settings, "mesh settings updated");
            *current = settings;
            true
        });

        let new = Arc::new(config);
        let msg = match self.current_mesh_config.replace(new.clone()) {
            Some(old) => Message::updated(old, new),
            None => Message::added(new),
        };
        self.bus.publish(msg);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if namespace != self.mesh_config.namespace || name != self.mesh_config.name {
            return;
        }
        tracing::warn!(%namespace, %name, "MeshConfig deleted; restoring initial settings");
        self.settings.send_replace(self.initial_settings.clone());
        if let Some(old) = self.current_mesh_config.take() {
            self.bus.publish(Message::deleted(old));
        }
    }
}

impl SizedIndex<MeshConfig> for Index {
    fn size(&self, namespace: &str) -> usize {
        let held = self.current_mesh_config.is_some() && self.mesh_config.namespace == namespace;
        held as usize
    }
}

// === impl MeshConfigRef ===

impl MeshConfigRef {
    fn matches(&self, config: &MeshConfig) -> bool {
        config.namespace().as_deref() == Some(&*self.namespace)
            && config.name_unchecked() == self.name
    }
}

macro_rules! indexed {
    ($ty:ty, $field:ident) => {
        impl Indexed for $ty {
            #[inline]
            fn store(ns: &Namespace) -> &Store<Self> {
                &ns.$field
            }

            #[inline]
            fn store_mut(ns: &mut Namespace) -> &mut Store<Self> {
                &mut ns.$field
            }
        }

        impl kubert::index::IndexNamespacedResource<$ty> for Index {
            fn apply(&mut self, resource: $ty) {
                self.apply_resource(resource)
            }

            fn delete(&mut self, namespace: String, name: String) {
                self.delete_resource::<$ty>(namespace, name)
            }
        }

        impl SizedIndex<$ty> for Index {
            fn size(&self, namespace: &str) -> usize {
                self.store_len::<$ty>(namespace)
            }
        }
    };
}

indexed!(Pod, pods);
indexed!(Service, services);
indexed!(Endpoints, endpoints);
indexed!(TrafficSplit, traffic_splits);
indexed!(TrafficTarget, traffic_targets);
indexed!(HttpRouteGroup, http_route_groups);
indexed!(TcpRoute, tcp_routes);
indexed!(Egress, egresses);
indexed!(IngressBackend, ingress_backends);
indexed!(Retry, retries);
indexed!(UpstreamTrafficSetting, upstream_traffic_settings);

// === impl Namespace ===

impl Namespace {
    fn is_empty(&self) -> bool {
        self.pods.is_empty()
            && self.services.is_empty()
            && self.endpoints.is_empty()
            && self.traffic_splits.is_empty()
            && self.traffic_targets.is_empty()
            && self.http_route_groups.is_empty()
            && self.tcp_routes.is_empty()
            && self.egresses.is_empty()
            && self.ingress_backends.is_empty()
            && self.retries.is_empty()
            && self.upstream_traffic_settings.is_empty()
    }
}
