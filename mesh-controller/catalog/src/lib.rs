#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The mesh catalog.
//!
//! Aggregates traffic policy and topology from a set of providers into the
//! inbound, outbound and egress policy of a single proxy; tracks connected
//! proxies; and decides when those proxies must recompute their
//! configuration.

mod broadcaster;
mod certificate_binding;
mod dispatcher;
mod endpoint;
mod egress;
mod inbound;
pub mod metrics;
mod outbound;
mod registry;
mod retry;
mod service;
mod ticker;
mod traffic_target;


pub use self::{
    broadcaster::{Broadcaster, UPDATE_AT_MOST_EVERY},
    certificate_binding::CertificateBindingError,
    dispatcher::{Dispatcher, MAX_BROADCAST_DEADLINE, MAX_GRACE_DEADLINE},
    endpoint::refresh_endpoints_on_broadcast,
    metrics::CatalogMetrics,
    registry::{
        release_certificates_on_pod_delete, ConnectedProxy, DisconnectedProxy, ExpectedProxy,
        ProxyRegistry,
    },
    ticker::{Ticker, MIN_RESYNC_INTERVAL},
    traffic_target::{TcpRouteMatch, TrafficTargetWithRoutes},
};

use self::endpoint::EndpointCache;
use mesh_controller_core::{
    provider::{
        EndpointsProvider, KubeController, MeshSpec, PolicyController, ServiceProvider,
        TrafficSplitFilter,
    },
    CertificateManager, Configurator,
};
use mesh_controller_k8s_api::smi::{HttpRouteGroup, TcpRoute, TrafficSplit, TrafficTarget};
use std::sync::Arc;

/// Computes per-proxy traffic policy from the current provider snapshots.
///
/// Every query reads the providers anew; nothing derived is cached except the
/// endpoint cache, which is refreshed on a miss.
pub struct MeshCatalog {
    mesh_spec: Arc<dyn MeshSpec>,
    kube: Arc<dyn KubeController>,
    service_providers: Vec<Arc<dyn ServiceProvider>>,
    endpoints_providers: Vec<Arc<dyn EndpointsProvider>>,
    policy: Arc<dyn PolicyController>,
    config: Arc<dyn Configurator>,
    certificates: Arc<dyn CertificateManager>,
    registry: Arc<ProxyRegistry>,
    endpoints: EndpointCache,
}

/// The topology providers a catalog reads from.
#[derive(Clone)]
pub struct Providers {
    pub mesh_spec: Arc<dyn MeshSpec>,
    pub kube: Arc<dyn KubeController>,
    pub services: Vec<Arc<dyn ServiceProvider>>,
    pub endpoints: Vec<Arc<dyn EndpointsProvider>>,
    pub policy: Arc<dyn PolicyController>,
}

/// Every SMI resource the catalog currently knows about.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SmiPolicies {
    pub traffic_splits: Vec<Arc<TrafficSplit>>,
    pub traffic_targets: Vec<Arc<TrafficTarget>>,
    pub http_route_groups: Vec<Arc<HttpRouteGroup>>,
    pub tcp_routes: Vec<Arc<TcpRoute>>,
}

// === impl Providers ===

impl Providers {
    /// Uses a single provider for every concern.
    pub fn from_single<P>(provider: Arc<P>) -> Self
    where
        P: MeshSpec
            + KubeController
            + ServiceProvider
            + EndpointsProvider
            + PolicyController
            + 'static,
    {
        Self {
            mesh_spec: provider.clone(),
            kube: provider.clone(),
            services: vec![provider.clone()],
            endpoints: vec![provider.clone()],
            policy: provider,
        }
    }
}

// === impl MeshCatalog ===

impl MeshCatalog {
    pub fn new(
        providers: Providers,
        config: Arc<dyn Configurator>,
        certificates: Arc<dyn CertificateManager>,
        registry: Arc<ProxyRegistry>,
    ) -> Self {
        let Providers {
            mesh_spec,
            kube,
            services,
            endpoints,
            policy,
        } = providers;
        Self {
            endpoints: EndpointCache::new(services.clone(), endpoints.clone()),
            mesh_spec,
            kube,
            service_providers: services,
            endpoints_providers: endpoints,
            policy,
            config,
            certificates,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ProxyRegistry> {
        &self.registry
    }

    pub fn certificates(&self) -> &Arc<dyn CertificateManager> {
        &self.certificates
    }

    pub fn configurator(&self) -> &Arc<dyn Configurator> {
        &self.config
    }

    pub fn list_smi_policies(&self) -> SmiPolicies {
        SmiPolicies {
            traffic_splits: self
                .mesh_spec
                .list_traffic_splits(&TrafficSplitFilter::default()),
            traffic_targets: self.mesh_spec.list_traffic_targets(),
            http_route_groups: self.mesh_spec.list_http_traffic_specs(),
            tcp_routes: self.mesh_spec.list_tcp_traffic_specs(),
        }
    }

    pub fn list_monitored_namespaces(&self) -> Vec<String> {
        self.kube.list_monitored_namespaces()
    }
}

impl std::fmt::Debug for MeshCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshCatalog")
            .field("service_providers", &self.service_providers.len())
            .field("endpoints_providers", &self.endpoints_providers.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
