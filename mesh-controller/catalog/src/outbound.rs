use crate::{service::dedup, MeshCatalog};
use mesh_controller_core::{
    outbound::{OutboundMeshTrafficPolicy, OutboundTrafficPolicy},
    provider::{TrafficSplitFilter, UpstreamTrafficSettingLookup},
    route::HttpRouteMatch,
    traffic_match::{dedup_cluster_configs, dedup_traffic_matches, MeshClusterConfig, TrafficMatch},
    IpNet, MeshService, PolicyWarning, Report, ServiceIdentity, WeightedCluster,
};
use std::collections::BTreeSet;

impl MeshCatalog {
    /// Computes the policy a proxy running as `downstream` applies to the
    /// traffic it sends to other mesh services.
    pub fn get_outbound_mesh_traffic_policy(
        &self,
        downstream: &ServiceIdentity,
    ) -> Report<OutboundMeshTrafficPolicy> {
        let mut report = Report::new(OutboundMeshTrafficPolicy::default());
        let services = report.absorb(self.list_outbound_services_for_identity(downstream));
        let upstreams = self.include_split_apexes(services, &mut report);

        let mut traffic_matches = Vec::with_capacity(upstreams.len());
        let mut cluster_configs = Vec::with_capacity(upstreams.len());
        for svc in upstreams {
            let uts = self
                .policy
                .get_upstream_traffic_setting(&UpstreamTrafficSettingLookup::for_service(&svc));
            cluster_configs.push(MeshClusterConfig {
                name: svc.cluster_name(),
                service: svc.clone(),
                address: None,
                port: svc.target_port,
                enable_active_health_checks: false,
                upstream_traffic_setting: uts,
            });

            let clusters = self.upstream_clusters(&svc, &mut report);
            let endpoints = report.absorb(self.get_resolvable_endpoints_for_service(&svc));
            let mut ip_ranges = endpoints
                .iter()
                .map(|ep| IpNet::from(ep.ip))
                .collect::<Vec<_>>();
            ip_ranges.sort();
            ip_ranges.dedup();
            if ip_ranges.is_empty() {
                report.warn(PolicyWarning::NoEndpoints(svc.to_string()));
            }

            traffic_matches.push(TrafficMatch {
                name: svc.outbound_traffic_match_name(),
                destination_port: Some(svc.port),
                destination_protocol: svc.protocol,
                destination_ip_ranges: ip_ranges,
                // Opaque streams are balanced across the split at the listener.
                weighted_clusters: if svc.protocol.is_tcp() {
                    clusters.clone()
                } else {
                    Vec::new()
                },
                ..Default::default()
            });

            if svc.protocol.is_tcp() {
                continue;
            }

            let retry = self.get_retry_policy(downstream, &svc);
            let mut policy = OutboundTrafficPolicy::new(svc.fqdn(), svc.hostnames());
            if let Err(error) = policy.add_route(HttpRouteMatch::wildcard(), retry, clusters) {
                report.warn(error.into());
                continue;
            }
            report
                .value
                .http_route_configs_per_port
                .entry(svc.port)
                .or_default()
                .push(policy);
        }

        report.value.traffic_matches = dedup_traffic_matches(traffic_matches);
        report.value.clusters_configs = dedup_cluster_configs(cluster_configs);
        report
    }

    /// Lists the services `downstream` is permitted to reach: every service
    /// in permissive mode, else the services of every identity a traffic
    /// target permits it to reach.
    pub fn list_outbound_services_for_identity(
        &self,
        downstream: &ServiceIdentity,
    ) -> Report<Vec<MeshService>> {
        if self.config.is_permissive_traffic_policy_mode() {
            return self.list_mesh_services();
        }

        let mut report = Report::new(Vec::new());
        let Some(downstream_sa) = downstream.to_service_account() else {
            report.warn(PolicyWarning::InvalidServiceIdentity(downstream.to_string()));
            return report;
        };
        for upstream in report.absorb(self.list_allowed_outbound_service_accounts(&downstream_sa)) {
            let services =
                report.absorb(self.get_services_for_service_identity(&upstream.to_service_identity()));
            report.value.extend(services);
        }
        report.value = dedup(report.value);
        report
    }

    /// Adds the apex services of the splits `services` are backends of.
    /// Services with an unknown target port are dropped, as are apex services
    /// that already exist as a real service on the same port.
    fn include_split_apexes<T>(
        &self,
        services: Vec<MeshService>,
        report: &mut Report<T>,
    ) -> Vec<MeshService> {
        let mut seen = BTreeSet::new();
        let mut upstreams = Vec::with_capacity(services.len());
        let mut apexes = Vec::new();
        for svc in services {
            if svc.target_port.is_none() {
                report.warn(PolicyWarning::MissingTargetPort(svc.to_string()));
                continue;
            }
            apexes.extend(self.get_apex_services_for_backend(&svc));
            seen.insert((svc.namespace.clone(), svc.name.clone(), svc.port));
            upstreams.push(svc);
        }
        for apex in apexes {
            if seen.insert((apex.namespace.clone(), apex.name.clone(), apex.port)) {
                upstreams.push(apex);
            }
        }
        upstreams
    }

    /// The clusters traffic for `svc` is sent to: the backends of the split
    /// `svc` is the apex of, else `svc` itself.
    fn upstream_clusters<T>(&self, svc: &MeshService, report: &mut Report<T>) -> Vec<WeightedCluster> {
        let splits = self
            .mesh_spec
            .list_traffic_splits(&TrafficSplitFilter::apex(&*svc.namespace, &*svc.name));
        let Some(split) = splits.first() else {
            return vec![svc.accept_all_cluster()];
        };
        if splits.len() > 1 {
            report.warn(PolicyWarning::MultipleTrafficSplits {
                apex: svc.to_string(),
                count: splits.len(),
            });
        }

        let backends = split.spec.backends.iter().map(|backend| {
            let backend_svc = MeshService {
                name: backend.service.clone(),
                ..svc.clone()
            };
            WeightedCluster {
                cluster_name: backend_svc.cluster_name(),
                weight: backend.weight,
            }
        });
        WeightedCluster::merge(backends)
    }
}
