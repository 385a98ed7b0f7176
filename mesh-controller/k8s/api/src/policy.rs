//! Mesh traffic policy resources.

pub mod egress;
pub mod ingress_backend;
pub mod retry;
pub mod upstream_traffic_setting;

pub use self::{
    egress::{Egress, EgressSource, EgressSpec, PortSpec},
    ingress_backend::{BackendSpec, IngressBackend, IngressBackendSpec, IngressSourceSpec},
    retry::{Retry, RetryPolicySpec, RetrySpec, RetryTarget},
    upstream_traffic_setting::{
        ConnectionSettingsSpec, HttpConnectionSettings, HttpLocalRateLimitSpec,
        HttpPerRouteRateLimitSpec, HttpRouteSpec, LocalRateLimitSpec, RateLimitSpec,
        TcpConnectionSettings, TcpLocalRateLimitSpec, UpstreamTrafficSetting,
        UpstreamTrafficSettingSpec,
    },
};

/// The API group shared by all policy resources.
pub const GROUP: &str = "policy.mesh-controller.io";
