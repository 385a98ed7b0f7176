use crate::index::{Index, SharedIndex};
use anyhow::Result;
use kube::ResourceExt;
use mesh_controller_core::{
    provider::{
        mesh_services_for, pod_service_account, EndpointsProvider, KubeController, MeshSpec,
        PolicyController, ServiceProvider, TrafficSplitFilter, UpstreamTrafficSettingLookup,
    },
    Endpoint, K8sServiceAccount, MeshService, ServiceIdentity,
};
use mesh_controller_k8s_api::{
    policy::{Egress, IngressBackend, Retry, UpstreamTrafficSetting},
    smi::{HttpRouteGroup, TcpRoute, TrafficSplit, TrafficTarget},
    Endpoints, Labels, Pod, Service, SERVICE_ACCOUNT_KIND,
};
use std::{net::IpAddr, num::NonZeroU16, sync::Arc};

const PROVIDER_ID: &str = "kubernetes";

/// Answers topology queries from the shared index.
#[derive(Clone, Debug)]
pub struct IndexProvider {
    index: SharedIndex,
}

// === impl IndexProvider ===

impl IndexProvider {
    pub fn new(index: SharedIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }
}

impl MeshSpec for IndexProvider {
    fn list_traffic_splits(&self, filter: &TrafficSplitFilter) -> Vec<Arc<TrafficSplit>> {
        let mut splits = self
            .index
            .read()
            .list::<TrafficSplit>()
            .into_iter()
            .filter(|split| filter.matches(split))
            .collect::<Vec<_>>();
        sort_by_name(&mut splits);
        splits
    }

    fn list_traffic_targets(&self) -> Vec<Arc<TrafficTarget>> {
        let mut targets = self.index.read().list::<TrafficTarget>();
        sort_by_name(&mut targets);
        targets
    }

    fn list_http_traffic_specs(&self) -> Vec<Arc<HttpRouteGroup>> {
        let mut groups = self.index.read().list::<HttpRouteGroup>();
        sort_by_name(&mut groups);
        groups
    }

    fn get_http_route_group(&self, namespace: &str, name: &str) -> Option<Arc<HttpRouteGroup>> {
        self.index.read().get(namespace, name)
    }

    fn list_tcp_traffic_specs(&self) -> Vec<Arc<TcpRoute>> {
        let mut routes = self.index.read().list::<TcpRoute>();
        sort_by_name(&mut routes);
        routes
    }

    fn get_tcp_route(&self, namespace: &str, name: &str) -> Option<Arc<TcpRoute>> {
        self.index.read().get(namespace, name)
    }
}

impl KubeController for IndexProvider {
    fn list_services(&self) -> Vec<Arc<Service>> {
        let mut services = self.index.read().list::<Service>();
        sort_by_name(&mut services);
        services
    }

    fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.index.read().get(namespace, name)
    }

    fn list_pods(&self) -> Vec<Arc<Pod>> {
        let mut pods = self.index.read().list::<Pod>();
        sort_by_name(&mut pods);
        pods
    }

    fn get_endpoints(&self, namespace: &str, name: &str) -> Option<Arc<Endpoints>> {
        self.index.read().get(namespace, name)
    }

    fn list_monitored_namespaces(&self) -> Vec<String> {
        let index = self.index.read();
        index
            .monitored_namespaces()
            .into_iter()
            .filter(|ns| index.is_monitored_namespace(ns))
            .collect()
    }

    fn is_monitored_namespace(&self, namespace: &str) -> bool {
        self.index.read().is_monitored_namespace(namespace)
    }
}

impl ServiceProvider for IndexProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn list_services(&self) -> Result<Vec<MeshService>> {
        let index = self.index.read();
        let mut services = index
            .list::<Service>()
            .iter()
            .flat_map(|svc| mesh_services(&index, svc))
            .collect::<Vec<_>>();
        services.sort();
        Ok(services)
    }

    fn get_services_for_service_identity(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<Vec<MeshService>> {
        let sa = identity
            .to_service_account()
            .ok_or_else(|| anyhow::anyhow!("invalid service identity {identity}"))?;

        let index = self.index.read();
        let Some(ns) = index.namespace(&sa.namespace) else {
            return Ok(Vec::new());
        };
        let pod_labels = ns
            .pods
            .values()
            .filter(|pod| pod_service_account(pod) == sa)
            .map(|pod| Labels::from(pod.metadata.labels.clone()))
            .collect::<Vec<_>>();

        let mut services = ns
            .services
            .values()
            .filter(|svc| {
                selector(svc).is_some_and(|sel| pod_labels.iter().any(|l| l.selected_by(sel)))
            })
            .flat_map(|svc| mesh_services(&index, svc))
            .collect::<Vec<_>>();
        services.sort();
        services.dedup();
        Ok(services)
    }

    fn list_service_identities_for_service(
        &self,
        svc: &MeshService,
    ) -> Result<Vec<ServiceIdentity>> {
        let index = self.index.read();
        let Some(ns) = index.namespace(&svc.namespace) else {
            return Ok(Vec::new());
        };
        let Some(sel) = ns.services.get(&svc.name).and_then(|s| selector(s)) else {
            return Ok(Vec::new());
        };

        let mut identities = ns
            .pods
            .values()
            .filter(|pod| Labels::from(pod.metadata.labels.clone()).selected_by(sel))
            .map(|pod| pod_service_account(pod).to_service_identity())
            .collect::<Vec<_>>();
        identities.sort();
        identities.dedup();
        Ok(identities)
    }
}

impl EndpointsProvider for IndexProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn list_endpoints_for_service(&self, svc: &MeshService) -> Result<Vec<Endpoint>> {
        let Some(endpoints) = self.get_endpoints(&svc.namespace, &svc.name) else {
            return Ok(Vec::new());
        };
        let target_port = svc.target_port.unwrap_or(svc.port);

        let mut eps = Vec::new();
        for subset in endpoints.subsets.iter().flatten() {
            let ports = subset
                .ports
                .iter()
                .flatten()
                .filter_map(|p| u16::try_from(p.port).ok().and_then(NonZeroU16::new))
                .filter(|p| *p == target_port);
            for port in ports {
                for addr in subset.addresses.iter().flatten() {
                    match addr.ip.parse::<IpAddr>() {
                        Ok(ip) => eps.push(Endpoint::local(ip, port)),
                        Err(error) => {
                            tracing::warn!(%error, service = %svc, ip = %addr.ip, "invalid endpoint address");
                        }
                    }
                }
            }
        }
        eps.sort();
        eps.dedup();
        Ok(eps)
    }

    fn list_endpoints_for_identity(&self, identity: &ServiceIdentity) -> Result<Vec<Endpoint>> {
        let sa = identity
            .to_service_account()
            .ok_or_else(|| anyhow::anyhow!("invalid service identity {identity}"))?;

        let index = self.index.read();
        let Some(ns) = index.namespace(&sa.namespace) else {
            return Ok(Vec::new());
        };

        let mut eps = Vec::new();
        for pod in ns.pods.values().filter(|p| pod_service_account(p) == sa) {
            let ports = pod
                .spec
                .iter()
                .flat_map(|spec| spec.containers.iter())
                .flat_map(|c| c.ports.iter().flatten())
                .filter_map(|p| u16::try_from(p.container_port).ok().and_then(NonZeroU16::new))
                .collect::<Vec<_>>();
            for ip in pod_ips(pod) {
                eps.extend(ports.iter().map(|port| Endpoint::local(ip, *port)));
            }
        }
        eps.sort();
        eps.dedup();
        Ok(eps)
    }

    fn get_resolvable_endpoints_for_service(&self, svc: &MeshService) -> Result<Vec<Endpoint>> {
        let cluster_ip = self
            .get_service(&svc.namespace, &svc.name)
            .and_then(|s| s.spec.as_ref()?.cluster_ip.clone())
            .filter(|ip| !ip.is_empty() && ip != "None");

        match cluster_ip {
            Some(ip) => {
                let ip = ip.parse::<IpAddr>()?;
                Ok(vec![Endpoint::local(ip, svc.port)])
            }
            None => self.list_endpoints_for_service(svc),
        }
    }
}

impl PolicyController for IndexProvider {
    fn list_egress_policies_for_source_identity(
        &self,
        source: &K8sServiceAccount,
    ) -> Vec<Arc<Egress>> {
        let mut egresses = self
            .index
            .read()
            .list::<Egress>()
            .into_iter()
            .filter(|egress| {
                egress.spec.sources.iter().any(|s| {
                    s.kind == SERVICE_ACCOUNT_KIND
                        && s.name == source.name
                        && s.namespace == source.namespace
                })
            })
            .collect::<Vec<_>>();
        sort_by_name(&mut egresses);
        egresses
    }

    fn list_ingress_backend_policies(&self) -> Vec<Arc<IngressBackend>> {
        let mut backends = self.index.read().list::<IngressBackend>();
        sort_by_name(&mut backends);
        backends
    }

    fn get_upstream_traffic_setting(
        &self,
        lookup: &UpstreamTrafficSettingLookup,
    ) -> Option<Arc<UpstreamTrafficSetting>> {
        let index = self.index.read();
        match lookup {
            UpstreamTrafficSettingLookup::Name { namespace, name } => index.get(namespace, name),
            UpstreamTrafficSettingLookup::Host { namespace, host } => {
                let ns = index.namespace(namespace)?;
                let mut matching = ns
                    .upstream_traffic_settings
                    .values()
                    .filter(|uts| uts.spec.host == *host)
                    .cloned()
                    .collect::<Vec<_>>();
                sort_by_name(&mut matching);
                matching.into_iter().next()
            }
        }
    }

    fn list_retry_policies_for_service_account(
        &self,
        source: &K8sServiceAccount,
    ) -> Vec<Arc<Retry>> {
        let mut retries = self
            .index
            .read()
            .list::<Retry>()
            .into_iter()
            .filter(|retry| {
                let src = &retry.spec.source;
                src.kind == SERVICE_ACCOUNT_KIND
                    && src.name == source.name
                    && src.namespace == source.namespace
            })
            .collect::<Vec<_>>();
        sort_by_name(&mut retries);
        retries
    }
}

fn mesh_services(index: &Index, svc: &Service) -> Vec<MeshService> {
    let endpoints = svc
        .namespace()
        .and_then(|ns| index.get::<Endpoints>(&ns, &svc.name_unchecked()));
    mesh_services_for(svc, endpoints.as_deref())
}

fn selector(svc: &Service) -> Option<&std::collections::BTreeMap<String, String>> {
    svc.spec
        .as_ref()?
        .selector
        .as_ref()
        .filter(|sel| !sel.is_empty())
}

fn pod_ips(pod: &Pod) -> Vec<IpAddr> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    let mut ips = status
        .pod_ips
        .iter()
        .flatten()
        .filter_map(|ip| ip.ip.parse().ok())
        .collect::<Vec<IpAddr>>();
    if ips.is_empty() {
        ips.extend(status.pod_ip.as_deref().and_then(|ip| ip.parse::<std::net::IpAddr>().ok()));
    }
    ips
}

/// Listings are ordered by namespace and name so that "first match" choices
/// are stable.
fn sort_by_name<T: kube::Resource>(resources: &mut [Arc<T>]) {
    resources.sort_by(|a, b| {
        (a.meta().namespace.as_deref(), a.meta().name.as_deref())
            .cmp(&(b.meta().namespace.as_deref(), b.meta().name.as_deref()))
    });
}
