//! Pull-style interfaces over the raw facts the catalog aggregates.
//!
//! Each provider answers from its current snapshot; change notifications are
//! delivered separately on the [`EventBus`](crate::bus::EventBus).

use crate::{
    endpoint::Endpoint,
    identity::{K8sServiceAccount, ServiceIdentity},
    service::{MeshService, Protocol},
};
use mesh_controller_k8s_api::{
    policy::{Egress, IngressBackend, Retry, UpstreamTrafficSetting},
    smi::{HttpRouteGroup, TcpRoute, TrafficSplit, TrafficTarget},
    Endpoints, Pod, ResourceExt, Service, ServicePort,
};
use std::{num::NonZeroU16, sync::Arc};

/// The service account pods run as when none is set.
const DEFAULT_SERVICE_ACCOUNT: &str = "default";

/// SMI traffic specs.
pub trait MeshSpec: Send + Sync {
    fn list_traffic_splits(&self, filter: &TrafficSplitFilter) -> Vec<Arc<TrafficSplit>>;

    fn list_traffic_targets(&self) -> Vec<Arc<TrafficTarget>>;

    fn list_http_traffic_specs(&self) -> Vec<Arc<HttpRouteGroup>>;

    fn get_http_route_group(&self, namespace: &str, name: &str) -> Option<Arc<HttpRouteGroup>>;

    fn list_tcp_traffic_specs(&self) -> Vec<Arc<TcpRoute>>;

    fn get_tcp_route(&self, namespace: &str, name: &str) -> Option<Arc<TcpRoute>>;
}

/// Narrows a traffic split listing. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrafficSplitFilter {
    pub namespace: Option<String>,

    /// Only splits whose apex is this service name (in the filter namespace,
    /// when set).
    pub apex_service: Option<String>,

    /// Only splits with a backend of this service name.
    pub backend_service: Option<String>,
}

/// Core Kubernetes objects.
pub trait KubeController: Send + Sync {
    fn list_services(&self) -> Vec<Arc<Service>>;

    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>>;

    fn list_pods(&self) -> Vec<Arc<Pod>>;

    fn get_endpoints(&self, namespace: &str, name: &str) -> Option<Arc<Endpoints>>;

    fn list_monitored_namespaces(&self) -> Vec<String>;

    fn is_monitored_namespace(&self, namespace: &str) -> bool;

    /// Returns one `MeshService` per port of the given Kubernetes service.
    fn service_to_mesh_services(&self, svc: &Service) -> Vec<MeshService> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_unchecked();
        let endpoints = self.get_endpoints(&namespace, &name);
        mesh_services_for(svc, endpoints.as_deref())
    }
}

/// Mesh services and the identities backing them.
pub trait ServiceProvider: Send + Sync {
    /// A name used when logging provider failures.
    fn id(&self) -> &str;

    fn list_services(&self) -> anyhow::Result<Vec<MeshService>>;

    fn get_services_for_service_identity(
        &self,
        identity: &ServiceIdentity,
    ) -> anyhow::Result<Vec<MeshService>>;

    fn list_service_identities_for_service(
        &self,
        svc: &MeshService,
    ) -> anyhow::Result<Vec<ServiceIdentity>>;
}

pub trait EndpointsProvider: Send + Sync {
    /// A name used when logging provider failures.
    fn id(&self) -> &str;

    fn list_endpoints_for_service(&self, svc: &MeshService) -> anyhow::Result<Vec<Endpoint>>;

    fn list_endpoints_for_identity(
        &self,
        identity: &ServiceIdentity,
    ) -> anyhow::Result<Vec<Endpoint>>;

    /// Endpoints a client should connect to: the service's cluster IP when it
    /// has one, else its pod endpoints.
    fn get_resolvable_endpoints_for_service(
        &self,
        svc: &MeshService,
    ) -> anyhow::Result<Vec<Endpoint>>;
}

/// Mesh policy CRDs.
pub trait PolicyController: Send + Sync {
    fn list_egress_policies_for_source_identity(
        &self,
        source: &K8sServiceAccount,
    ) -> Vec<Arc<Egress>>;

    fn list_ingress_backend_policies(&self) -> Vec<Arc<IngressBackend>>;

    fn get_upstream_traffic_setting(
        &self,
        lookup: &UpstreamTrafficSettingLookup,
    ) -> Option<Arc<UpstreamTrafficSetting>>;

    fn list_retry_policies_for_service_account(
        &self,
        source: &K8sServiceAccount,
    ) -> Vec<Arc<Retry>>;
}

/// Identifies an `UpstreamTrafficSetting`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamTrafficSettingLookup {
    /// The resource's own namespace and name.
    Name { namespace: String, name: String },

    /// The `spec.host` of a setting in the given namespace.
    Host { namespace: String, host: String },
}

// === impl TrafficSplitFilter ===

impl TrafficSplitFilter {
    pub fn apex(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            apex_service: Some(name.into()),
            backend_service: None,
        }
    }

    pub fn backend(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            apex_service: None,
            backend_service: Some(name.into()),
        }
    }

    pub fn matches(&self, split: &TrafficSplit) -> bool {
        if let Some(ns) = self.namespace.as_deref() {
            if split.namespace().as_deref() != Some(ns) {
                return false;
            }
        }
        if let Some(apex) = self.apex_service.as_deref() {
            if split.spec.apex_service_name() != apex {
                return false;
            }
        }
        if let Some(backend) = self.backend_service.as_deref() {
            if !split.spec.backends.iter().any(|b| b.service == backend) {
                return false;
            }
        }
        true
    }
}

// === impl UpstreamTrafficSettingLookup ===

impl UpstreamTrafficSettingLookup {
    pub fn name(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Name {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Looks up the setting attached to a mesh service by its FQDN.
    pub fn for_service(svc: &MeshService) -> Self {
        Self::Host {
            namespace: svc.namespace.clone(),
            host: svc.fqdn(),
        }
    }
}

/// Converts a Kubernetes service into one `MeshService` per port.
///
/// The target port comes from the matching `Endpoints` port, else a numeric
/// `targetPort`, else the service port when no `targetPort` is set. A named
/// `targetPort` with no matching `Endpoints` port stays unresolved. The
/// protocol comes from
/// `appProtocol`, else the port name's prefix, else HTTP.
pub fn mesh_services_for(svc: &Service, endpoints: Option<&Endpoints>) -> Vec<MeshService> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_unchecked();
    let ports = svc
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or_default();

    ports
        .iter()
        .filter_map(|sp| {
            let port = u16::try_from(sp.port).ok().and_then(NonZeroU16::new)?;
            Some(MeshService {
                namespace: namespace.clone(),
                name: name.clone(),
                port,
                target_port: target_port(sp, port, endpoints),
                protocol: protocol(sp),
            })
        })
        .collect()
}

/// The service account a pod runs as.
pub fn pod_service_account(pod: &Pod) -> K8sServiceAccount {
    let name = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.service_account_name.as_deref())
        .filter(|sa| !sa.is_empty())
        .unwrap_or(DEFAULT_SERVICE_ACCOUNT);
    K8sServiceAccount::new(pod.namespace().unwrap_or_default(), name)
}

fn target_port(
    sp: &ServicePort,
    port: NonZeroU16,
    endpoints: Option<&Endpoints>,
) -> Option<NonZeroU16> {
    use mesh_controller_k8s_api::IntOrString;

    let from_endpoints = endpoints
        .and_then(|ep| ep.subsets.as_deref())
        .into_iter()
        .flatten()
        .flat_map(|subset| subset.ports.as_deref().unwrap_or_default())
        .find(|ep| ep.name == sp.name)
        .and_then(|ep| u16::try_from(ep.port).ok())
        .and_then(NonZeroU16::new);
    if from_endpoints.is_some() {
        return from_endpoints;
    }

    match sp.target_port.as_ref() {
        None => Some(port),
        Some(IntOrString::Int(target)) => u16::try_from(*target).ok().and_then(NonZeroU16::new),
        Some(IntOrString::String(_)) => None,
    }
}

fn protocol(sp: &ServicePort) -> Protocol {
    if let Some(proto) = sp.app_protocol.as_deref().and_then(|p| p.parse().ok()) {
        return proto;
    }

    // Longer prefixes first so `tcp-server-first-` is not read as `tcp-`.
    const PREFIXES: [(&str, Protocol); 5] = [
        ("tcp-server-first-", Protocol::TcpServerFirst),
        ("https-", Protocol::Https),
        ("http-", Protocol::Http),
        ("grpc-", Protocol::Grpc),
        ("tcp-", Protocol::Tcp),
    ];
    let name = sp.name.as_deref().unwrap_or_default();
    PREFIXES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, proto)| *proto)
        .unwrap_or_default()
}
