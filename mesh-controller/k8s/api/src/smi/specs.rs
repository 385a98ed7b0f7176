use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const HTTP_ROUTE_GROUP_KIND: &str = "HTTPRouteGroup";
pub const TCP_ROUTE_KIND: &str = "TCPRoute";

/// A named group of HTTP request matches referenced by traffic targets and
/// egress policies.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "specs.smi-spec.io",
    version = "v1alpha4",
    kind = "HTTPRouteGroup",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteGroupSpec {
    #[serde(default)]
    pub matches: Vec<HttpMatch>,
}

pub type HttpRouteGroup = HTTPRouteGroup;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatch {
    pub name: String,

    #[serde(default)]
    pub path_regex: Option<String>,

    #[serde(default)]
    pub methods: Vec<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Describes L4 traffic by destination port.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "specs.smi-spec.io",
    version = "v1alpha4",
    kind = "TCPRoute",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TcpRouteSpec {
    #[serde(default)]
    pub matches: TcpMatch,
}

pub type TcpRoute = TCPRoute;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpMatch {
    #[serde(default)]
    pub ports: Vec<u16>,
}
