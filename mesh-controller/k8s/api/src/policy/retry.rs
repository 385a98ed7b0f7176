use crate::duration::GoDuration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Configures retries for requests from a source service account to a set of
/// destination services.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.mesh-controller.io",
    version = "v1alpha1",
    kind = "Retry",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    pub source: RetryTarget,
    pub destinations: Vec<RetryTarget>,
    pub retry_policy: RetryPolicySpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryTarget {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicySpec {
    /// Comma-separated retry conditions, e.g. `5xx,reset`.
    #[serde(default)]
    pub retry_on: String,

    pub per_try_timeout: Option<GoDuration>,
    pub num_retries: Option<u32>,
    pub retry_backoff_base_interval: Option<GoDuration>,
}
