use crate::{
    route::{HttpRouteMatch, RetryPolicy, RouteWeightedClusters},
    service::WeightedCluster,
    traffic_match::{MeshClusterConfig, TrafficMatch},
};
use std::{collections::BTreeMap, num::NonZeroU16};

/// Everything a proxy needs to send traffic to the services it may reach.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutboundMeshTrafficPolicy {
    pub traffic_matches: Vec<TrafficMatch>,

    /// HTTP virtual hosts keyed by the service port.
    pub http_route_configs_per_port: BTreeMap<NonZeroU16, Vec<OutboundTrafficPolicy>>,
    pub clusters_configs: Vec<MeshClusterConfig>,
}

/// An HTTP virtual host for an upstream service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundTrafficPolicy {
    pub name: String,
    pub hostnames: Vec<String>,
    pub routes: Vec<RouteWeightedClusters>,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("route {route:?} already exists with different clusters in {policy}")]
pub struct ConflictingRoute {
    pub policy: String,
    pub route: HttpRouteMatch,
}

// === impl OutboundTrafficPolicy ===

impl OutboundTrafficPolicy {
    pub fn new(name: impl Into<String>, hostnames: Vec<String>) -> Self {
        Self {
            name: name.into(),
            hostnames,
            routes: Vec::new(),
        }
    }

    /// Adds a route. Re-adding a route with the same clusters replaces its
    /// retry policy; re-adding it with different clusters is an error.
    pub fn add_route(
        &mut self,
        http_route_match: HttpRouteMatch,
        retry_policy: Option<RetryPolicy>,
        weighted_clusters: impl IntoIterator<Item = WeightedCluster>,
    ) -> Result<(), ConflictingRoute> {
        let route = RouteWeightedClusters {
            retry_policy,
            ..RouteWeightedClusters::new(http_route_match, weighted_clusters)
        };

        match self
            .routes
            .iter_mut()
            .find(|r| r.http_route_match == route.http_route_match)
        {
            Some(existing) if existing.weighted_clusters == route.weighted_clusters => {
                existing.retry_policy = route.retry_policy;
                Ok(())
            }
            Some(_) => Err(ConflictingRoute {
                policy: self.name.clone(),
                route: route.http_route_match,
            }),
            None => {
                self.routes.push(route);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_route() {
        let mut policy = OutboundTrafficPolicy::new("bookstore.default.local", vec![]);
        let v1 = WeightedCluster::new("default/bookstore-v1|8080", 100);
        let v2 = WeightedCluster::new("default/bookstore-v2|8080", 100);

        policy
            .add_route(HttpRouteMatch::wildcard(), None, Some(v1.clone()))
            .unwrap();
        let retry = RetryPolicy {
            retry_on: "5xx".to_string(),
            ..Default::default()
        };
        policy
            .add_route(HttpRouteMatch::wildcard(), Some(retry.clone()), Some(v1))
            .unwrap();
        assert_eq!(policy.routes.len(), 1);
        assert_eq!(policy.routes[0].retry_policy, Some(retry));

        let err = policy
            .add_route(HttpRouteMatch::wildcard(), None, Some(v2))
            .unwrap_err();
        assert_eq!(err.policy, "bookstore.default.local");
    }
}
