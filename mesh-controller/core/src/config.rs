use mesh_controller_k8s_api::MeshConfigSpec;
use std::time::Duration;
use tokio::sync::watch;

/// Live mesh-wide settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshSettings {
    pub permissive_traffic_policy_mode: bool,
    pub enable_egress: bool,
    pub feature_flags: FeatureFlags,

    /// How often every connected proxy is sent a resync. `None` disables the
    /// resync ticker.
    pub config_resync_interval: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub enable_egress_policy: bool,
    pub enable_retry_policy: bool,
    pub enable_ingress_backend_policy: bool,
}

/// Read access to the current mesh settings.
pub trait Configurator: Send + Sync {
    fn settings(&self) -> MeshSettings;

    fn is_permissive_traffic_policy_mode(&self) -> bool {
        self.settings().permissive_traffic_policy_mode
    }

    fn feature_flags(&self) -> FeatureFlags {
        self.settings().feature_flags
    }

    fn config_resync_interval(&self) -> Option<Duration> {
        self.settings().config_resync_interval
    }
}

// === impl MeshSettings ===

impl From<&MeshConfigSpec> for MeshSettings {
    fn from(spec: &MeshConfigSpec) -> Self {
        Self {
            permissive_traffic_policy_mode: spec.traffic.enable_permissive_traffic_policy_mode,
            enable_egress: spec.traffic.enable_egress,
            feature_flags: FeatureFlags {
                enable_egress_policy: spec.feature_flags.enable_egress_policy,
                enable_retry_policy: spec.feature_flags.enable_retry_policy,
                enable_ingress_backend_policy: spec.feature_flags.enable_ingress_backend_policy,
            },
            config_resync_interval: spec
                .sidecar
                .config_resync_interval
                .filter(|d| !d.is_zero())
                .map(Into::into),
        }
    }
}

impl Configurator for watch::Receiver<MeshSettings> {
    fn settings(&self) -> MeshSettings {
        self.borrow().clone()
    }
}

impl Configurator for MeshSettings {
    fn settings(&self) -> MeshSettings {
        self.clone()
    }
}
