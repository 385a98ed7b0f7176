use crate::{
    service::dedup,
    traffic_target::{is_valid_traffic_target, subject_service_account, valid_sources, RouteTable},
    MeshCatalog,
};
use mesh_controller_core::{
    inbound::{merge_inbound_policies, InboundMeshTrafficPolicy, InboundTrafficPolicy},
    provider::UpstreamTrafficSettingLookup,
    route::{HttpRouteMatch, RouteWeightedClusters},
    traffic_match::{dedup_cluster_configs, dedup_traffic_matches, MeshClusterConfig, TrafficMatch},
    MeshService, PolicyWarning, Report, ServiceIdentity,
};
use mesh_controller_k8s_api::{
    policy::{HttpLocalRateLimitSpec, UpstreamTrafficSetting},
    smi::TrafficTarget,
};
use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

/// Inbound clusters forward to the workload over loopback.
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

impl MeshCatalog {
    /// Computes the policy a proxy running as `upstream_identity` applies to
    /// traffic for `upstream_services`.
    ///
    /// Apex services of traffic splits with one of the upstream services as a
    /// backend are served too: they get clusters and HTTP routes, but no
    /// traffic matches of their own since nothing listens on their ports.
    pub fn get_inbound_mesh_traffic_policy(
        &self,
        upstream_identity: &ServiceIdentity,
        upstream_services: &[MeshService],
    ) -> Report<InboundMeshTrafficPolicy> {
        let mut report = Report::new(InboundMeshTrafficPolicy::default());
        let permissive = self.config.is_permissive_traffic_policy_mode();
        let (targets, routes) = if permissive {
            (Vec::new(), RouteTable::default())
        } else {
            (
                self.traffic_targets_for(upstream_identity, &mut report),
                RouteTable::build(&*self.mesh_spec),
            )
        };

        let mut traffic_matches = Vec::new();
        let mut cluster_configs = Vec::new();
        for svc in self.include_apex_services(upstream_services) {
            let uts = self
                .policy
                .get_upstream_traffic_setting(&UpstreamTrafficSettingLookup::for_service(&svc));
            let target_port = svc.target_port.unwrap_or(svc.port);

            cluster_configs.push(MeshClusterConfig {
                name: svc.local_cluster_name(),
                service: svc.clone(),
                address: Some(LOCALHOST),
                port: Some(target_port),
                enable_active_health_checks: false,
                upstream_traffic_setting: uts.clone(),
            });

            if upstream_services.contains(&svc) {
                traffic_matches.push(TrafficMatch {
                    name: svc.inbound_traffic_match_name(),
                    destination_port: Some(target_port),
                    destination_protocol: svc.protocol,
                    server_names: vec![svc.server_name()],
                    cluster: Some(svc.local_cluster_name()),
                    rate_limit: uts.as_ref().and_then(|uts| uts.spec.rate_limit.clone()),
                    ..Default::default()
                });
            }

            if svc.protocol.is_tcp() {
                continue;
            }

            let policies = if permissive {
                vec![permissive_policy(&svc, uts.as_deref())]
            } else {
                self.smi_policies(&svc, &targets, &routes, uts.as_deref(), &mut report)
            };
            let per_port = report
                .value
                .http_route_configs_per_port
                .entry(target_port)
                .or_default();
            *per_port = merge_inbound_policies(std::mem::take(per_port), policies);
        }

        report.value.traffic_matches = dedup_traffic_matches(traffic_matches);
        report.value.clusters_configs = dedup_cluster_configs(cluster_configs);
        report
    }

    /// The upstream services followed by the apex services they back.
    fn include_apex_services(&self, upstream_services: &[MeshService]) -> Vec<MeshService> {
        let mut all = upstream_services.to_vec();
        for svc in upstream_services {
            all.extend(self.get_apex_services_for_backend(svc));
        }
        dedup(all)
    }

    /// Valid traffic targets whose destination is `upstream_identity`.
    fn traffic_targets_for<T>(
        &self,
        upstream_identity: &ServiceIdentity,
        report: &mut Report<T>,
    ) -> Vec<Arc<TrafficTarget>> {
        let Some(upstream_sa) = upstream_identity.to_service_account() else {
            report.warn(PolicyWarning::InvalidServiceIdentity(
                upstream_identity.to_string(),
            ));
            return Vec::new();
        };
        self.mesh_spec
            .list_traffic_targets()
            .into_iter()
            .filter(|t| {
                is_valid_traffic_target(t, report)
                    && subject_service_account(&t.spec.destination) == upstream_sa
            })
            .collect()
    }

    /// Builds the policy for a service's own hostnames, plus one policy per
    /// virtual host named by a route's `host` header match.
    fn smi_policies<T>(
        &self,
        svc: &MeshService,
        targets: &[Arc<TrafficTarget>],
        routes: &RouteTable,
        uts: Option<&UpstreamTrafficSetting>,
        report: &mut Report<T>,
    ) -> Vec<InboundTrafficPolicy> {
        let mut policy = InboundTrafficPolicy::new(svc.fqdn(), svc.hostnames());
        policy.rate_limit = uts.and_then(|uts| uts.spec.rate_limit.clone());
        let mut virtual_hosts = Vec::<InboundTrafficPolicy>::new();

        for target in targets {
            let matches = routes.routes_for(target, report);
            for source in valid_sources(target, report) {
                let principal = source.to_service_identity();
                for http_route_match in &matches {
                    let route = route_to(svc, http_route_match.clone(), uts);
                    match http_route_match.host_header() {
                        None => policy.add_rule(route, principal.clone()),
                        Some(host) => {
                            let mut vhost =
                                InboundTrafficPolicy::new(host, vec![host.to_string()]);
                            vhost.add_rule(route, principal.clone());
                            virtual_hosts = merge_inbound_policies(virtual_hosts, Some(vhost));
                        }
                    }
                }
            }
        }

        merge_inbound_policies(virtual_hosts, Some(policy))
    }
}

/// A policy permitting any downstream to reach the service on any route.
fn permissive_policy(svc: &MeshService, uts: Option<&UpstreamTrafficSetting>) -> InboundTrafficPolicy {
    let mut policy = InboundTrafficPolicy::new(svc.fqdn(), svc.hostnames());
    policy.rate_limit = uts.and_then(|uts| uts.spec.rate_limit.clone());
    policy.add_rule(
        route_to(svc, HttpRouteMatch::wildcard(), uts),
        ServiceIdentity::wildcard(),
    );
    policy
}

fn route_to(
    svc: &MeshService,
    http_route_match: HttpRouteMatch,
    uts: Option<&UpstreamTrafficSetting>,
) -> RouteWeightedClusters {
    let rate_limit = uts.and_then(|uts| route_rate_limit(uts, &http_route_match));
    RouteWeightedClusters {
        rate_limit,
        ..RouteWeightedClusters::new(http_route_match, Some(svc.accept_all_local_cluster()))
    }
}

/// The per-route rate limit configured for the route's path.
fn route_rate_limit(
    uts: &UpstreamTrafficSetting,
    http_route_match: &HttpRouteMatch,
) -> Option<HttpLocalRateLimitSpec> {
    uts.spec
        .http_routes
        .iter()
        .find(|r| r.path == http_route_match.path)
        .and_then(|r| r.rate_limit.as_ref())
        .and_then(|rl| rl.local.clone())
}
