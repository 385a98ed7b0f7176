use crate::MeshCatalog;
use ahash::AHashMap as HashMap;
use mesh_controller_core::{
    provider::MeshSpec, route::HttpRouteMatch, K8sServiceAccount, PolicyWarning, Report,
    ServiceIdentity,
};
use mesh_controller_k8s_api::{
    smi::{
        IdentityBindingSubject, TrafficTarget, TrafficTargetRule, HTTP_ROUTE_GROUP_KIND,
        TCP_ROUTE_KIND,
    },
    ResourceExt,
};
use std::collections::BTreeSet;

/// An SMI traffic target resolved for TCP authorization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrafficTargetWithRoutes {
    /// `<namespace>/<name>` of the traffic target.
    pub name: String,
    pub destination: ServiceIdentity,
    pub sources: Vec<ServiceIdentity>,
    pub tcp_route_matches: Vec<TcpRouteMatch>,
}

/// Destination ports permitted by a TCP route. Empty permits every port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TcpRouteMatch {
    pub ports: Vec<u16>,
}

/// HTTP route matches of every `HTTPRouteGroup`, keyed by
/// `HTTPRouteGroup/<namespace>/<name>` and then by match name.
#[derive(Debug, Default)]
pub(crate) struct RouteTable(HashMap<String, Vec<(String, HttpRouteMatch)>>);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    Inbound,
    Outbound,
}

impl MeshCatalog {
    /// Lists the service accounts permitted to connect to `upstream`.
    pub fn list_allowed_inbound_service_accounts(
        &self,
        upstream: &K8sServiceAccount,
    ) -> Report<Vec<K8sServiceAccount>> {
        self.allowed_service_accounts(upstream, Direction::Inbound)
    }

    /// Lists the service accounts `downstream` is permitted to connect to.
    pub fn list_allowed_outbound_service_accounts(
        &self,
        downstream: &K8sServiceAccount,
    ) -> Report<Vec<K8sServiceAccount>> {
        self.allowed_service_accounts(downstream, Direction::Outbound)
    }

    /// Lists the traffic targets whose destination is `upstream`, with their
    /// TCP routes resolved. Traffic targets do not apply in permissive mode.
    pub fn list_inbound_traffic_targets_with_routes(
        &self,
        upstream: &ServiceIdentity,
    ) -> Report<Vec<TrafficTargetWithRoutes>> {
        let mut report = Report::new(Vec::new());
        if self.config.is_permissive_traffic_policy_mode() {
            return report;
        }

        for target in self.mesh_spec.list_traffic_targets() {
            if !is_valid_traffic_target(&target, &mut report) {
                continue;
            }
            let destination = subject_service_account(&target.spec.destination);
            if destination.to_service_identity() != *upstream {
                continue;
            }

            let Some(tcp_route_matches) = self.tcp_route_matches(&target, &mut report) else {
                continue;
            };
            let sources = valid_sources(&target, &mut report)
                .iter()
                .map(K8sServiceAccount::to_service_identity)
                .collect();
            report.value.push(TrafficTargetWithRoutes {
                name: resource_name(&*target),
                destination: destination.to_service_identity(),
                sources,
                tcp_route_matches,
            });
        }
        report
    }

    fn allowed_service_accounts(
        &self,
        sa: &K8sServiceAccount,
        direction: Direction,
    ) -> Report<Vec<K8sServiceAccount>> {
        let mut report = Report::new(BTreeSet::new());
        for target in self.mesh_spec.list_traffic_targets() {
            if !is_valid_traffic_target(&target, &mut report) {
                continue;
            }
            let destination = subject_service_account(&target.spec.destination);
            let sources = valid_sources(&target, &mut report);
            match direction {
                Direction::Inbound if destination == *sa => report.value.extend(sources),
                Direction::Outbound if sources.contains(sa) => {
                    report.value.insert(destination);
                }
                _ => {}
            }
        }
        report.map(|sas| sas.into_iter().collect())
    }

    /// Resolves the TCP routes of a traffic target. Returns `None` if one of
    /// them does not exist.
    fn tcp_route_matches<T>(
        &self,
        target: &TrafficTarget,
        report: &mut Report<T>,
    ) -> Option<Vec<TcpRouteMatch>> {
        let namespace = target.namespace().unwrap_or_default();
        let mut matches = Vec::new();
        for rule in &target.spec.rules {
            if rule.kind != TCP_ROUTE_KIND {
                continue;
            }
            let Some(route) = self.mesh_spec.get_tcp_route(&namespace, &rule.name) else {
                report.warn(PolicyWarning::UnknownReference {
                    resource: format!("TrafficTarget {}", resource_name(target)),
                    kind: TCP_ROUTE_KIND.to_string(),
                    name: format!("{namespace}/{}", rule.name),
                });
                return None;
            };
            matches.push(TcpRouteMatch {
                ports: route.spec.matches.ports.clone(),
            });
        }
        Some(matches)
    }
}

// === impl RouteTable ===

impl RouteTable {
    pub(crate) fn build(mesh_spec: &dyn MeshSpec) -> Self {
        let mut table = HashMap::new();
        for group in mesh_spec.list_http_traffic_specs() {
            let key = spec_key(
                HTTP_ROUTE_GROUP_KIND,
                &group.namespace().unwrap_or_default(),
                &group.name_unchecked(),
            );
            let matches = group
                .spec
                .matches
                .iter()
                .map(|m| (m.name.clone(), HttpRouteMatch::from(m)))
                .collect();
            table.insert(key, matches);
        }
        Self(table)
    }

    /// Resolves the HTTP routes a traffic target's rules refer to. A rule
    /// without match names refers to every match of its route group. Unknown
    /// route groups and match names are reported and skipped.
    pub(crate) fn routes_for<T>(
        &self,
        target: &TrafficTarget,
        report: &mut Report<T>,
    ) -> Vec<HttpRouteMatch> {
        let namespace = target.namespace().unwrap_or_default();
        let mut routes = Vec::new();
        for rule in http_rules(target) {
            let key = spec_key(HTTP_ROUTE_GROUP_KIND, &namespace, &rule.name);
            let Some(group) = self.0.get(&key) else {
                report.warn(PolicyWarning::UnknownReference {
                    resource: format!("TrafficTarget {}", resource_name(target)),
                    kind: HTTP_ROUTE_GROUP_KIND.to_string(),
                    name: format!("{namespace}/{}", rule.name),
                });
                continue;
            };

            if rule.matches.is_empty() {
                routes.extend(group.iter().map(|(_, m)| m.clone()));
                continue;
            }
            for name in &rule.matches {
                match group.iter().find(|(n, _)| n == name) {
                    Some((_, m)) => routes.push(m.clone()),
                    None => report.warn(PolicyWarning::UnknownReference {
                        resource: format!("TrafficTarget {}", resource_name(target)),
                        kind: format!("{HTTP_ROUTE_GROUP_KIND} match"),
                        name: format!("{key}/{name}"),
                    }),
                }
            }
        }
        routes
    }
}

fn spec_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

fn http_rules(target: &TrafficTarget) -> impl Iterator<Item = &TrafficTargetRule> {
    target
        .spec
        .rules
        .iter()
        .filter(|rule| rule.kind == HTTP_ROUTE_GROUP_KIND)
}

/// Checks that a traffic target can be used: its destination must be a
/// service account in the target's own namespace, and it must have rules, all
/// of a supported kind.
pub(crate) fn is_valid_traffic_target<T>(target: &TrafficTarget, report: &mut Report<T>) -> bool {
    let namespace = target.namespace().unwrap_or_default();
    if target.spec.destination.namespace != namespace {
        report.warn(PolicyWarning::CrossNamespaceDestination {
            resource: format!("TrafficTarget {}", resource_name(target)),
            namespace: target.spec.destination.namespace.clone(),
        });
        return false;
    }

    if !target.spec.destination.is_service_account() {
        report.warn(PolicyWarning::UnsupportedKind {
            resource: format!("TrafficTarget {}", resource_name(target)),
            field: "destination",
            kind: target.spec.destination.kind.clone(),
        });
        return false;
    }

    if let Some(rule) = target
        .spec
        .rules
        .iter()
        .find(|rule| rule.kind != HTTP_ROUTE_GROUP_KIND && rule.kind != TCP_ROUTE_KIND)
    {
        report.warn(PolicyWarning::UnsupportedKind {
            resource: format!("TrafficTarget {}", resource_name(target)),
            field: "rule",
            kind: rule.kind.clone(),
        });
        return false;
    }
    !target.spec.rules.is_empty()
}

/// The target's sources that are service accounts. Others are reported.
pub(crate) fn valid_sources<T>(
    target: &TrafficTarget,
    report: &mut Report<T>,
) -> Vec<K8sServiceAccount> {
    let mut valid = Vec::with_capacity(target.spec.sources.len());
    for source in &target.spec.sources {
        if source.is_service_account() {
            valid.push(subject_service_account(source));
        } else {
            report.warn(PolicyWarning::UnsupportedKind {
                resource: format!("TrafficTarget {}", resource_name(target)),
                field: "source",
                kind: source.kind.clone(),
            });
        }
    }
    valid
}

pub(crate) fn subject_service_account(subject: &IdentityBindingSubject) -> K8sServiceAccount {
    K8sServiceAccount::new(&*subject.namespace, &*subject.name)
}

pub(crate) fn resource_name<K: ResourceExt>(resource: &K) -> String {
    format!(
        "{}/{}",
        resource.namespace().unwrap_or_default(),
        resource.name_unchecked()
    )
}
