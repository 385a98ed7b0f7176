#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod duration;
pub mod labels;
pub mod policy;
pub mod smi;

pub use self::{
    config::{MeshConfig, MeshConfigSpec},
    duration::GoDuration,
    labels::Labels,
};
pub use k8s_openapi::api::{
    self,
    core::v1::{
        EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Pod, PodSpec, PodStatus,
        Service, ServicePort, ServiceSpec,
    },
};
pub use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
pub use kube::api::{ObjectMeta, Resource, ResourceExt};

/// The label set on every meshed pod that carries the proxy's unique id. The
/// same id is embedded in the proxy certificate's common name.
pub const PROXY_UUID_LABEL: &str = "mesh-controller.io/proxy-uuid";

/// The kind used by identity subjects that name a Kubernetes service account.
pub const SERVICE_ACCOUNT_KIND: &str = "ServiceAccount";

/// The kind used by references that name a Kubernetes service.
pub const SERVICE_KIND: &str = "Service";

/// A reference to another object in the same namespace.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    pub api_group: Option<String>,
    pub kind: String,
    pub name: String,
}

impl LocalObjectReference {
    /// Checks whether the reference names the given resource type.
    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        let dt = Default::default();
        let api_version = T::api_version(&dt);
        self.api_group.as_deref() == Some(&*api_version) && *self.kind == *T::kind(&dt)
    }
}
