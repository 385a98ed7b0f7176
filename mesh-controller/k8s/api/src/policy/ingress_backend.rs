use super::PortSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Authorizes ingress traffic from the given sources to backend services.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.mesh-controller.io",
    version = "v1alpha1",
    kind = "IngressBackend",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IngressBackendSpec {
    pub backends: Vec<BackendSpec>,
    pub sources: Vec<IngressSourceSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    pub name: String,
    pub port: PortSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressSourceSpec {
    pub kind: String,
    pub name: String,

    #[serde(default)]
    pub namespace: Option<String>,
}
