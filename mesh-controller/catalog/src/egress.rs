use crate::{traffic_target::resource_name, MeshCatalog};
use mesh_controller_core::{
    egress::{EgressHttpRouteConfig, EgressHttpRoutingRule, EgressTrafficPolicy},
    provider::UpstreamTrafficSettingLookup,
    route::{HttpRouteMatch, RouteWeightedClusters},
    service::CLUSTER_WEIGHT_ACCEPT_ALL,
    traffic_match::{dedup_cluster_configs, dedup_traffic_matches, EgressClusterConfig, TrafficMatch},
    ClusterName, IpNet, PolicyWarning, Protocol, Report, ServiceIdentity, WeightedCluster,
};
use mesh_controller_k8s_api::{
    policy::{Egress, UpstreamTrafficSetting},
    smi::HttpRouteGroup,
    ResourceExt,
};
use std::{num::NonZeroU16, sync::Arc};

impl MeshCatalog {
    /// Computes the policy for traffic a proxy running as `source` sends
    /// outside of the mesh. Returns `None` when egress policies are disabled.
    ///
    /// An `Egress` whose `UpstreamTrafficSetting` cannot be found is ignored
    /// entirely.
    pub fn get_egress_traffic_policy(
        &self,
        source: &ServiceIdentity,
    ) -> Report<Option<EgressTrafficPolicy>> {
        let mut report = Report::new(None);
        if !self.config.feature_flags().enable_egress_policy {
            return report;
        }
        let Some(source_sa) = source.to_service_account() else {
            report.warn(PolicyWarning::InvalidServiceIdentity(source.to_string()));
            return report;
        };

        let mut policy = EgressTrafficPolicy::default();
        let mut traffic_matches = Vec::new();
        let mut cluster_configs = Vec::new();
        for egress in self.policy.list_egress_policies_for_source_identity(&source_sa) {
            let Ok(uts) = self.egress_upstream_traffic_setting(&egress, &mut report) else {
                continue;
            };
            let ip_ranges = ip_ranges(&egress, &mut report);

            for port_spec in &egress.spec.ports {
                let Some(port) = NonZeroU16::new(port_spec.number) else {
                    report.warn(PolicyWarning::UnsupportedKind {
                        resource: egress_resource(&egress),
                        field: "port",
                        kind: port_spec.number.to_string(),
                    });
                    continue;
                };
                let protocol = match port_spec.protocol.parse::<Protocol>() {
                    Ok(protocol) => protocol,
                    Err(_) => {
                        report.warn(unsupported_protocol(&egress, &port_spec.protocol));
                        continue;
                    }
                };

                match protocol {
                    Protocol::Http => {
                        let (route_configs, clusters) = self.egress_http_route_configs(
                            &egress,
                            port,
                            &ip_ranges,
                            uts.clone(),
                            &mut report,
                        );
                        policy
                            .http_route_configs_per_port
                            .entry(port)
                            .or_default()
                            .extend(route_configs);
                        cluster_configs.extend(clusters);
                        traffic_matches.push(TrafficMatch {
                            name: egress_traffic_match_name(port, protocol),
                            destination_port: Some(port),
                            destination_protocol: protocol,
                            ..Default::default()
                        });
                    }

                    // An SNI match without server names would match every TLS stream.
                    Protocol::Https if egress.spec.hosts.is_empty() => {
                        report.warn(PolicyWarning::MissingServerNames {
                            resource: egress_resource(&egress),
                            port: port.get(),
                        });
                    }

                    // TLS is proxied as an opaque stream, matched by SNI.
                    Protocol::Tcp | Protocol::TcpServerFirst | Protocol::Https => {
                        let cluster = ClusterName::new(port.to_string());
                        cluster_configs.push(EgressClusterConfig {
                            name: cluster.clone(),
                            host: None,
                            port,
                            upstream_traffic_setting: uts.clone(),
                        });
                        let server_names = if protocol == Protocol::Https {
                            egress.spec.hosts.clone()
                        } else {
                            Vec::new()
                        };
                        traffic_matches.push(TrafficMatch {
                            name: egress_traffic_match_name(port, protocol),
                            destination_port: Some(port),
                            destination_protocol: protocol,
                            server_names,
                            cluster: Some(cluster),
                            destination_ip_ranges: ip_ranges.clone(),
                            ..Default::default()
                        });
                    }

                    Protocol::Grpc => {
                        report.warn(unsupported_protocol(&egress, &port_spec.protocol));
                    }
                }
            }
        }

        policy.traffic_matches = dedup_traffic_matches(traffic_matches);
        policy.clusters_configs = dedup_cluster_configs(cluster_configs);
        report.value = Some(policy);
        report
    }

    /// Resolves the `UpstreamTrafficSetting` an egress policy refers to, if
    /// any. Fails if the referenced setting does not exist.
    fn egress_upstream_traffic_setting<T>(
        &self,
        egress: &Egress,
        report: &mut Report<T>,
    ) -> Result<Option<Arc<UpstreamTrafficSetting>>, ()> {
        let Some(reference) = egress
            .spec
            .matches
            .iter()
            .find(|m| m.targets_kind::<UpstreamTrafficSetting>())
        else {
            return Ok(None);
        };

        let namespace = egress.namespace().unwrap_or_default();
        let lookup = UpstreamTrafficSettingLookup::name(&*namespace, &*reference.name);
        match self.policy.get_upstream_traffic_setting(&lookup) {
            Some(uts) => Ok(Some(uts)),
            None => {
                report.warn(PolicyWarning::UpstreamTrafficSettingNotFound {
                    resource: egress_resource(egress),
                    reference: format!("{namespace}/{}", reference.name),
                });
                Err(())
            }
        }
    }

    /// Builds one virtual host and one cluster per egress host on `port`.
    fn egress_http_route_configs<T>(
        &self,
        egress: &Egress,
        port: NonZeroU16,
        ip_ranges: &[IpNet],
        uts: Option<Arc<UpstreamTrafficSetting>>,
        report: &mut Report<T>,
    ) -> (Vec<EgressHttpRouteConfig>, Vec<EgressClusterConfig>) {
        let matches = self.egress_route_matches(egress, report);

        let mut route_configs = Vec::with_capacity(egress.spec.hosts.len());
        let mut clusters = Vec::with_capacity(egress.spec.hosts.len());
        for host in &egress.spec.hosts {
            let host_port = format!("{host}:{port}");
            let cluster = ClusterName::new(&*host_port);
            clusters.push(EgressClusterConfig {
                name: cluster.clone(),
                host: Some(host.clone()),
                port,
                upstream_traffic_setting: uts.clone(),
            });

            let routing_rules = matches
                .iter()
                .map(|m| EgressHttpRoutingRule {
                    route: RouteWeightedClusters::new(
                        m.clone(),
                        Some(WeightedCluster {
                            cluster_name: cluster.clone(),
                            weight: CLUSTER_WEIGHT_ACCEPT_ALL,
                        }),
                    ),
                    allowed_destination_ip_ranges: ip_ranges.to_vec(),
                })
                .collect();
            route_configs.push(EgressHttpRouteConfig {
                name: host.clone(),
                hostnames: vec![host.clone(), host_port],
                routing_rules,
            });
        }
        (route_configs, clusters)
    }

    /// The HTTP routes permitted by an egress policy: the matches of the
    /// route groups it refers to, else every request.
    fn egress_route_matches<T>(&self, egress: &Egress, report: &mut Report<T>) -> Vec<HttpRouteMatch> {
        let namespace = egress.namespace().unwrap_or_default();
        let mut http_match_specified = false;
        let mut matches = Vec::new();
        for reference in &egress.spec.matches {
            if reference.targets_kind::<HttpRouteGroup>() {
                http_match_specified = true;
                match self.mesh_spec.get_http_route_group(&namespace, &reference.name) {
                    Some(group) => matches.extend(group.spec.matches.iter().map(HttpRouteMatch::from)),
                    None => report.warn(PolicyWarning::UnknownReference {
                        resource: egress_resource(egress),
                        kind: reference.kind.clone(),
                        name: format!("{namespace}/{}", reference.name),
                    }),
                }
            } else if !reference.targets_kind::<UpstreamTrafficSetting>() {
                report.warn(PolicyWarning::UnsupportedKind {
                    resource: egress_resource(egress),
                    field: "match",
                    kind: reference.kind.clone(),
                });
            }
        }

        if !http_match_specified {
            matches.push(HttpRouteMatch::wildcard());
        }
        matches
    }
}

/// The egress policy's destination CIDRs. Invalid ranges are reported and
/// skipped.
fn ip_ranges<T>(egress: &Egress, report: &mut Report<T>) -> Vec<IpNet> {
    let mut ranges = Vec::with_capacity(egress.spec.ip_addresses.len());
    for value in &egress.spec.ip_addresses {
        match value.parse::<IpNet>() {
            Ok(net) if !ranges.contains(&net) => ranges.push(net),
            Ok(_) => {}
            Err(_) => report.warn(PolicyWarning::InvalidIpRange {
                resource: egress_resource(egress),
                value: value.clone(),
            }),
        }
    }
    ranges
}

fn egress_traffic_match_name(port: NonZeroU16, protocol: Protocol) -> String {
    format!("egress_{port}_{protocol}")
}

fn egress_resource(egress: &Egress) -> String {
    format!("Egress {}", resource_name(egress))
}

fn unsupported_protocol(egress: &Egress, protocol: &str) -> PolicyWarning {
    PolicyWarning::UnsupportedKind {
        resource: egress_resource(egress),
        field: "port protocol",
        kind: protocol.to_string(),
    }
}
