use crate::service::WeightedCluster;
use mesh_controller_k8s_api::{policy::HttpLocalRateLimitSpec, smi::HttpMatch};
use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

/// The HTTP method that matches every method.
pub const WILDCARD_HTTP_METHOD: &str = "*";

/// The path regex that matches every path.
pub const REGEX_MATCH_ALL: &str = ".*";

/// The request header whose value names a virtual host.
pub const HOST_HEADER: &str = "host";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathMatchType {
    #[default]
    Regex,
    Exact,
    Prefix,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HttpRouteMatch {
    pub path: String,
    pub path_match_type: PathMatchType,
    pub methods: Vec<String>,
    pub headers: BTreeMap<String, String>,
}

/// An HTTP route match and the clusters that serve it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteWeightedClusters {
    pub http_route_match: HttpRouteMatch,
    pub weighted_clusters: BTreeSet<WeightedCluster>,
    pub retry_policy: Option<RetryPolicy>,
    pub rate_limit: Option<HttpLocalRateLimitSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_on: String,
    pub per_try_timeout: Option<Duration>,
    pub num_retries: Option<u32>,
    pub retry_backoff_base_interval: Option<Duration>,
}

// === impl HttpRouteMatch ===

impl HttpRouteMatch {
    /// Matches every request.
    pub fn wildcard() -> Self {
        Self {
            path: REGEX_MATCH_ALL.to_string(),
            path_match_type: PathMatchType::Regex,
            methods: vec![WILDCARD_HTTP_METHOD.to_string()],
            headers: BTreeMap::new(),
        }
    }

    /// The value of the `host` header match, if the route is restricted to a
    /// virtual host.
    pub fn host_header(&self) -> Option<&str> {
        self.headers.get(HOST_HEADER).map(String::as_str)
    }
}

impl From<&HttpMatch> for HttpRouteMatch {
    /// An unset path regex or empty method list matches everything.
    fn from(m: &HttpMatch) -> Self {
        let path = m
            .path_regex
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(REGEX_MATCH_ALL)
            .to_string();
        let methods = if m.methods.is_empty() {
            vec![WILDCARD_HTTP_METHOD.to_string()]
        } else {
            m.methods.clone()
        };
        Self {
            path,
            path_match_type: PathMatchType::Regex,
            methods,
            headers: m.headers.clone(),
        }
    }
}

// === impl RouteWeightedClusters ===

impl RouteWeightedClusters {
    pub fn new(
        http_route_match: HttpRouteMatch,
        weighted_clusters: impl IntoIterator<Item = WeightedCluster>,
    ) -> Self {
        Self {
            http_route_match,
            weighted_clusters: WeightedCluster::merge(weighted_clusters)
                .into_iter()
                .collect(),
            retry_policy: None,
            rate_limit: None,
        }
    }

    pub fn total_weight(&self) -> u32 {
        self.weighted_clusters.iter().map(|wc| wc.weight).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_match_is_wildcarded() {
        let m = HttpMatch {
            name: "everything".to_string(),
            path_regex: None,
            methods: vec![],
            headers: BTreeMap::new(),
        };
        assert_eq!(HttpRouteMatch::from(&m), HttpRouteMatch::wildcard());
    }

    #[test]
    fn repeated_clusters_keep_their_total_weight() {
        let route = RouteWeightedClusters::new(
            HttpRouteMatch::wildcard(),
            [
                WeightedCluster::new("default/bookstore-v1|8080", 50),
                WeightedCluster::new("default/bookstore-v1|8080", 50),
            ],
        );
        assert_eq!(route.weighted_clusters.len(), 1);
        assert_eq!(route.total_weight(), 100);
    }

    #[test]
    fn host_header() {
        let mut headers = BTreeMap::new();
        headers.insert(HOST_HEADER.to_string(), "books.example.com".to_string());
        let m = HttpMatch {
            name: "vhost".to_string(),
            path_regex: Some("/buy".to_string()),
            methods: vec!["GET".to_string()],
            headers,
        };
        let route = HttpRouteMatch::from(&m);
        assert_eq!(route.path, "/buy");
        assert_eq!(route.methods, vec!["GET".to_string()]);
        assert_eq!(route.host_header(), Some("books.example.com"));
        assert_eq!(HttpRouteMatch::wildcard().host_header(), None);
    }
}
