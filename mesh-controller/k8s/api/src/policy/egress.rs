use crate::LocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Permits workloads running as the source service accounts to reach
/// destinations outside the mesh.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.mesh-controller.io",
    version = "v1alpha1",
    kind = "Egress",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EgressSpec {
    pub sources: Vec<EgressSource>,

    #[serde(default)]
    pub hosts: Vec<String>,

    /// Destination CIDRs. Entries that fail to parse are ignored.
    #[serde(default)]
    pub ip_addresses: Vec<String>,

    pub ports: Vec<PortSpec>,

    /// Either an `HTTPRouteGroup` restricting the permitted HTTP requests or
    /// an `UpstreamTrafficSetting` applied to the egress clusters.
    #[serde(default)]
    pub matches: Vec<LocalObjectReference>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressSource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    pub number: u16,
    pub protocol: String,
}
