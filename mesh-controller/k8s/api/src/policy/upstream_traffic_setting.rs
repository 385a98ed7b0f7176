use crate::duration::GoDuration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Connection and rate limiting settings for the upstream whose FQDN is
/// `host`.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policy.mesh-controller.io",
    version = "v1alpha1",
    kind = "UpstreamTrafficSetting",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTrafficSettingSpec {
    pub host: String,
    pub connection_settings: Option<ConnectionSettingsSpec>,
    pub rate_limit: Option<RateLimitSpec>,

    #[serde(default)]
    pub http_routes: Vec<HttpRouteSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettingsSpec {
    pub tcp: Option<TcpConnectionSettings>,
    pub http: Option<HttpConnectionSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpConnectionSettings {
    pub max_connections: Option<u32>,
    pub connect_timeout: Option<GoDuration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpConnectionSettings {
    pub max_requests: Option<u32>,
    pub max_requests_per_connection: Option<u32>,
    pub max_pending_requests: Option<u32>,
    pub max_retries: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSpec {
    pub local: Option<LocalRateLimitSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalRateLimitSpec {
    pub tcp: Option<TcpLocalRateLimitSpec>,
    pub http: Option<HttpLocalRateLimitSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpLocalRateLimitSpec {
    pub connections: u32,
    pub unit: String,
    pub burst: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpLocalRateLimitSpec {
    pub requests: u32,
    pub unit: String,
    pub burst: Option<u32>,
    pub response_status_code: Option<u16>,
}

/// Rate limits applied to the requests whose path matches `path` exactly as
/// written in the route match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    pub path: String,
    pub rate_limit: Option<HttpPerRouteRateLimitSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpPerRouteRateLimitSpec {
    pub local: Option<HttpLocalRateLimitSpec>,
}
