use crate::{
    route::RouteWeightedClusters,
    traffic_match::{EgressClusterConfig, TrafficMatch},
};
use ipnet::IpNet;
use std::{collections::BTreeMap, num::NonZeroU16};

/// Everything a proxy needs to send traffic outside of the mesh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EgressTrafficPolicy {
    pub traffic_matches: Vec<TrafficMatch>,
    pub http_route_configs_per_port: BTreeMap<NonZeroU16, Vec<EgressHttpRouteConfig>>,
    pub clusters_configs: Vec<EgressClusterConfig>,
}

/// An HTTP virtual host for an external host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EgressHttpRouteConfig {
    pub name: String,
    pub hostnames: Vec<String>,
    pub routing_rules: Vec<EgressHttpRoutingRule>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EgressHttpRoutingRule {
    pub route: RouteWeightedClusters,
    pub allowed_destination_ip_ranges: Vec<IpNet>,
}
