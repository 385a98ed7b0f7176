use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Authorizes traffic from a set of source identities to a destination
/// identity over the referenced routes.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "access.smi-spec.io",
    version = "v1alpha3",
    kind = "TrafficTarget",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTargetSpec {
    pub destination: IdentityBindingSubject,

    #[serde(default)]
    pub sources: Vec<IdentityBindingSubject>,

    #[serde(default)]
    pub rules: Vec<TrafficTargetRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBindingSubject {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// Names a route resource (by kind and name, in the target's namespace) and,
/// optionally, a subset of its matches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTargetRule {
    pub kind: String,
    pub name: String,

    #[serde(default)]
    pub matches: Vec<String>,
}

impl IdentityBindingSubject {
    pub fn is_service_account(&self) -> bool {
        self.kind == crate::SERVICE_ACCOUNT_KIND
    }
}
