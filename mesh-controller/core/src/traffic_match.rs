use crate::service::{ClusterName, MeshService, Protocol, WeightedCluster};
use ipnet::IpNet;
use mesh_controller_k8s_api::policy::{RateLimitSpec, UpstreamTrafficSetting};
use std::{net::IpAddr, num::NonZeroU16, sync::Arc};

/// Destination selection criteria used to program a listener filter chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrafficMatch {
    pub name: String,
    pub destination_port: Option<NonZeroU16>,
    pub destination_protocol: Protocol,
    pub server_names: Vec<String>,
    pub cluster: Option<ClusterName>,
    pub destination_ip_ranges: Vec<IpNet>,
    pub weighted_clusters: Vec<WeightedCluster>,
    pub rate_limit: Option<RateLimitSpec>,
}

/// A cluster for traffic to a mesh service.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshClusterConfig {
    pub name: ClusterName,
    pub service: MeshService,

    /// Set on inbound (local) clusters, which forward to the workload on
    /// the loopback address.
    pub address: Option<IpAddr>,
    pub port: Option<NonZeroU16>,
    pub enable_active_health_checks: bool,
    pub upstream_traffic_setting: Option<Arc<UpstreamTrafficSetting>>,
}

/// A cluster for traffic leaving the mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct EgressClusterConfig {
    pub name: ClusterName,
    pub host: Option<String>,
    pub port: NonZeroU16,
    pub upstream_traffic_setting: Option<Arc<UpstreamTrafficSetting>>,
}

/// Removes duplicates, keeping the first occurrence. Order within list
/// fields does not make two matches distinct.
pub fn dedup_traffic_matches(matches: Vec<TrafficMatch>) -> Vec<TrafficMatch> {
    let mut deduped: Vec<TrafficMatch> = Vec::with_capacity(matches.len());
    for m in matches.into_iter().map(normalize) {
        if !deduped.contains(&m) {
            deduped.push(m);
        }
    }
    deduped
}

/// Removes duplicate cluster configs, keeping the first occurrence.
pub fn dedup_cluster_configs<C: PartialEq>(configs: Vec<C>) -> Vec<C> {
    let mut deduped: Vec<C> = Vec::with_capacity(configs.len());
    for c in configs {
        if !deduped.contains(&c) {
            deduped.push(c);
        }
    }
    deduped
}

fn normalize(mut m: TrafficMatch) -> TrafficMatch {
    m.server_names.sort();
    m.server_names.dedup();
    m.destination_ip_ranges.sort();
    m.destination_ip_ranges.dedup();
    m.weighted_clusters.sort();
    m.weighted_clusters.dedup();
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_ignores_list_order() {
        let a = TrafficMatch {
            name: "a".to_string(),
            destination_port: NonZeroU16::new(443),
            destination_protocol: Protocol::Https,
            server_names: vec!["b.com".to_string(), "a.com".to_string()],
            ..Default::default()
        };
        let b = TrafficMatch {
            server_names: vec!["a.com".to_string(), "b.com".to_string()],
            ..a.clone()
        };
        let c = TrafficMatch {
            destination_port: NonZeroU16::new(8443),
            ..a.clone()
        };
        let deduped = dedup_traffic_matches(vec![a, b, c]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].server_names, vec!["a.com", "b.com"]);
    }
}
