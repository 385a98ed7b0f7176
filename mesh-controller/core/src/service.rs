use std::{fmt, num::NonZeroU16, str::FromStr};

/// The weight given to a cluster that receives all of a route's traffic.
pub const CLUSTER_WEIGHT_ACCEPT_ALL: u32 = 100;

/// The DNS suffixes a service may be addressed by, after its name.
const DNS_SUFFIXES: [&str; 4] = ["", ".svc", ".svc.cluster", ".svc.cluster.local"];

/// A routable service port: a Kubernetes Service port or the virtual apex of
/// a traffic split.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshService {
    pub namespace: String,
    pub name: String,
    pub port: NonZeroU16,

    /// The port the backing workload listens on. Unknown for services whose
    /// target port could not be resolved.
    pub target_port: Option<NonZeroU16>,
    pub protocol: Protocol,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Tcp,
    TcpServerFirst,
    Grpc,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterName(String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeightedCluster {
    pub cluster_name: ClusterName,
    pub weight: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown protocol: {0}")]
pub struct InvalidProtocol(String);

// === impl MeshService ===

impl MeshService {
    /// The service's mesh-local fully-qualified name, `<name>.<namespace>.local`.
    pub fn fqdn(&self) -> String {
        format!("{}.{}.local", self.name, self.namespace)
    }

    /// The name servers present in TLS, `<name>.<namespace>.svc.cluster.local`.
    pub fn server_name(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.name, self.namespace)
    }

    /// The upstream cluster for this service's target port,
    /// `<namespace>/<name>|<port>`.
    pub fn cluster_name(&self) -> ClusterName {
        ClusterName(format!(
            "{}/{}|{}",
            self.namespace,
            self.name,
            self.target_port.unwrap_or(self.port)
        ))
    }

    /// The cluster that forwards inbound traffic to the local workload,
    /// `<namespace>/<name>|<port>|local`.
    pub fn local_cluster_name(&self) -> ClusterName {
        ClusterName(format!("{}|local", self.cluster_name()))
    }

    /// All of the hostnames the service is addressed by, with and without its
    /// port.
    pub fn hostnames(&self) -> Vec<String> {
        expand_hostnames(&self.name, &self.namespace, Some(self.port))
    }

    /// A cluster that receives all traffic for this service.
    pub fn accept_all_cluster(&self) -> WeightedCluster {
        WeightedCluster {
            cluster_name: self.cluster_name(),
            weight: CLUSTER_WEIGHT_ACCEPT_ALL,
        }
    }

    /// The local cluster, receiving all inbound traffic for this service.
    pub fn accept_all_local_cluster(&self) -> WeightedCluster {
        WeightedCluster {
            cluster_name: self.local_cluster_name(),
            weight: CLUSTER_WEIGHT_ACCEPT_ALL,
        }
    }

    pub fn inbound_traffic_match_name(&self) -> String {
        let port = self.target_port.unwrap_or(self.port);
        format!("inbound_{}_{}_{}", self, port, self.protocol)
    }

    pub fn outbound_traffic_match_name(&self) -> String {
        format!("outbound_{}_{}_{}", self, self.port, self.protocol)
    }
}

impl fmt::Display for MeshService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Expands a service name into every DNS name it may be addressed by: the
/// bare name, `name.namespace`, and `name.namespace.svc[.cluster[.local]]`.
/// When a port is given, each name is also listed with a `:port` suffix,
/// immediately after the unsuffixed name.
pub fn expand_hostnames(name: &str, namespace: &str, port: Option<NonZeroU16>) -> Vec<String> {
    let bases = std::iter::once(name.to_string()).chain(
        DNS_SUFFIXES
            .iter()
            .map(|suffix| format!("{name}.{namespace}{suffix}")),
    );

    let mut hostnames = Vec::with_capacity(if port.is_some() { 10 } else { 5 });
    for base in bases {
        if let Some(port) = port {
            let with_port = format!("{base}:{port}");
            hostnames.push(base);
            hostnames.push(with_port);
        } else {
            hostnames.push(base);
        }
    }
    hostnames
}

// === impl Protocol ===

impl Protocol {
    /// Protocols that are routed by HTTP request attributes.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http | Self::Grpc)
    }

    /// Protocols that are proxied as opaque streams.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Self::Tcp | Self::TcpServerFirst)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Tcp => "tcp",
            Self::TcpServerFirst => "tcp-server-first",
            Self::Grpc => "grpc",
        }
    }
}

impl FromStr for Protocol {
    type Err = InvalidProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "tcp" => Ok(Self::Tcp),
            "tcp-server-first" => Ok(Self::TcpServerFirst),
            "grpc" => Ok(Self::Grpc),
            _ => Err(InvalidProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl ClusterName ===

impl ClusterName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ClusterName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

// === impl WeightedCluster ===

impl WeightedCluster {
    pub fn new(cluster_name: impl Into<String>, weight: u32) -> Self {
        Self {
            cluster_name: ClusterName(cluster_name.into()),
            weight,
        }
    }

    /// Combines clusters that appear more than once by adding up their
    /// weights, keeping the order in which each cluster first appears.
    pub fn merge(clusters: impl IntoIterator<Item = Self>) -> Vec<Self> {
        let mut merged = Vec::<Self>::new();
        for wc in clusters {
            match merged.iter_mut().find(|m| m.cluster_name == wc.cluster_name) {
                Some(m) => m.weight = m.weight.saturating_add(wc.weight),
                None => merged.push(wc),
            }
        }
        merged
    }
}
