use crate::duration::GoDuration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Mesh-wide settings. The controller reads a single, well-known instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "config.mesh-controller.io",
    version = "v1alpha1",
    kind = "MeshConfig",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfigSpec {
    #[serde(default)]
    pub traffic: TrafficSpec,

    #[serde(default)]
    pub sidecar: SidecarSpec,

    #[serde(default)]
    pub feature_flags: FeatureFlagsSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSpec {
    #[serde(default)]
    pub enable_permissive_traffic_policy_mode: bool,

    #[serde(default)]
    pub enable_egress: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    /// How often every connected proxy is sent a resync announcement. Zero
    /// or unset disables the resync ticker.
    pub config_resync_interval: Option<GoDuration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagsSpec {
    #[serde(default)]
    pub enable_egress_policy: bool,

    #[serde(default)]
    pub enable_retry_policy: bool,

    #[serde(default)]
    pub enable_ingress_backend_policy: bool,
}
