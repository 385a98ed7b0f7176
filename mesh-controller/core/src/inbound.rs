use crate::{
    identity::ServiceIdentity,
    route::RouteWeightedClusters,
    traffic_match::{MeshClusterConfig, TrafficMatch},
};
use mesh_controller_k8s_api::policy::RateLimitSpec;
use std::{
    collections::{BTreeMap, BTreeSet},
    num::NonZeroU16,
};

/// Everything a proxy needs to accept traffic for its upstream services.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InboundMeshTrafficPolicy {
    pub traffic_matches: Vec<TrafficMatch>,

    /// HTTP virtual hosts keyed by the workload (target) port.
    pub http_route_configs_per_port: BTreeMap<NonZeroU16, Vec<InboundTrafficPolicy>>,
    pub clusters_configs: Vec<MeshClusterConfig>,
}

/// An HTTP virtual host accepting traffic for a set of hostnames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundTrafficPolicy {
    pub name: String,
    pub hostnames: Vec<String>,
    pub rules: Vec<Rule>,
    pub rate_limit: Option<RateLimitSpec>,
}

/// A route and the downstream principals permitted to use it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub route: RouteWeightedClusters,
    pub allowed_principals: BTreeSet<ServiceIdentity>,
}

// === impl InboundTrafficPolicy ===

impl InboundTrafficPolicy {
    pub fn new(name: impl Into<String>, hostnames: Vec<String>) -> Self {
        Self {
            name: name.into(),
            hostnames,
            rules: Vec::new(),
            rate_limit: None,
        }
    }

    /// Permits `principal` on `route`, extending an existing rule for the
    /// same route if there is one.
    pub fn add_rule(&mut self, route: RouteWeightedClusters, principal: ServiceIdentity) {
        if let Some(rule) = self.rules.iter_mut().find(|r| r.route == route) {
            rule.allowed_principals.insert(principal);
            return;
        }
        self.rules.push(Rule {
            route,
            allowed_principals: Some(principal).into_iter().collect(),
        });
    }
}

/// Merges `latest` into `original` so that each route appears in a single
/// rule whose principals are the union of every rule for that route.
pub fn merge_rules(mut original: Vec<Rule>, latest: impl IntoIterator<Item = Rule>) -> Vec<Rule> {
    for rule in latest {
        match original.iter_mut().find(|r| r.route == rule.route) {
            Some(existing) => existing.allowed_principals.extend(rule.allowed_principals),
            None => original.push(rule),
        }
    }
    original
}

/// Merges `latest` into `original`. Two policies are merged when the
/// hostnames of one are a subset of the other's; the merged policy takes
/// the union of the hostnames and merged rules. Other policies are
/// appended.
pub fn merge_inbound_policies(
    mut original: Vec<InboundTrafficPolicy>,
    latest: impl IntoIterator<Item = InboundTrafficPolicy>,
) -> Vec<InboundTrafficPolicy> {
    for policy in latest {
        let mut merged = false;
        for existing in original.iter_mut() {
            if let Some(union) = union_if_subset(&existing.hostnames, &policy.hostnames) {
                existing.hostnames = union;
                existing.rules =
                    merge_rules(std::mem::take(&mut existing.rules), policy.rules.clone());
                merged = true;
            }
        }
        if !merged {
            original.push(policy);
        }
    }
    original
}

fn union_if_subset(first: &[String], second: &[String]) -> Option<Vec<String>> {
    let a = first.iter().collect::<BTreeSet<_>>();
    let b = second.iter().collect::<BTreeSet<_>>();
    if !(a.is_subset(&b) || b.is_subset(&a)) {
        return None;
    }
    let mut union = first.to_vec();
    union.extend(second.iter().filter(|h| !a.contains(h)).cloned());
    Some(union)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{route::HttpRouteMatch, service::WeightedCluster};

    fn route(path: &str) -> RouteWeightedClusters {
        RouteWeightedClusters::new(
            HttpRouteMatch {
                path: path.to_string(),
                ..HttpRouteMatch::wildcard()
            },
            Some(WeightedCluster::new("default/bookstore|8080|local", 100)),
        )
    }

    fn rule(path: &str, principals: &[&str]) -> Rule {
        Rule {
            route: route(path),
            allowed_principals: principals.iter().map(|p| ServiceIdentity::new(*p)).collect(),
        }
    }

    #[test]
    fn merge_rules_unions_principals() {
        let merged = merge_rules(
            vec![rule("/buy", &["bookbuyer.default"])],
            vec![
                rule("/buy", &["bookthief.default"]),
                rule("/sell", &["bookbuyer.default"]),
            ],
        );
        assert_eq!(
            merged,
            vec![
                rule("/buy", &["bookbuyer.default", "bookthief.default"]),
                rule("/sell", &["bookbuyer.default"]),
            ]
        );

        // Re-merging the same rules is a no-op.
        let again = merge_rules(merged.clone(), merged.clone());
        assert_eq!(again, merged);
    }

    #[test]
    fn add_rule_extends_existing_route() {
        let mut policy = InboundTrafficPolicy::new("bookstore.default.local", vec![]);
        policy.add_rule(route("/buy"), ServiceIdentity::new("bookbuyer.default"));
        policy.add_rule(route("/buy"), ServiceIdentity::new("bookthief.default"));
        policy.add_rule(route("/sell"), ServiceIdentity::new("bookbuyer.default"));
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[0].allowed_principals.len(), 2);
    }

    #[test]
    fn merge_policies_by_hostname_subset() {
        let hosts = |hs: &[&str]| hs.iter().map(|h| h.to_string()).collect::<Vec<_>>();

        let mut svc = InboundTrafficPolicy::new("bookstore.default.local", hosts(&["a", "a:80"]));
        svc.rules = vec![rule("/buy", &["bookbuyer.default"])];

        let mut subset = InboundTrafficPolicy::new("other", hosts(&["a"]));
        subset.rules = vec![rule("/buy", &["bookthief.default"])];

        let mut disjoint = InboundTrafficPolicy::new("books.example.com", hosts(&["books"]));
        disjoint.rules = vec![rule("/sell", &["bookbuyer.default"])];

        let merged = merge_inbound_policies(vec![svc], vec![subset, disjoint]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "bookstore.default.local");
        assert_eq!(merged[0].hostnames, hosts(&["a", "a:80"]));
        assert_eq!(
            merged[0].rules,
            vec![rule("/buy", &["bookbuyer.default", "bookthief.default"])]
        );
        assert_eq!(merged[1].name, "books.example.com");
    }
}
