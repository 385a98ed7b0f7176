//! Mesh Controller resource index
//!
//! The index holds the most recent version of every watched resource:
//!
//! - `Pod`, `Service` and `Endpoints` describe the workloads and how they are
//!   addressed.
//! - SMI `TrafficSplit`, `TrafficTarget`, `HTTPRouteGroup` and `TCPRoute`
//!   resources describe routing and authorization.
//! - `Egress`, `IngressBackend`, `Retry` and `UpstreamTrafficSetting` policies
//!   refine traffic leaving, entering and flowing within the mesh.
//! - A single `MeshConfig` drives the live mesh settings.
//!
//! Every change is announced on the event bus with both the old and new
//! versions of the resource. The index itself derives nothing; policy is
//! computed on demand by querying the index through the provider traits.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod index;
pub mod metrics;
mod provider;

#[cfg(test)]
mod tests;

pub use self::{
    index::{Index, MeshConfigRef, SharedIndex},
    metrics::IndexMetrics,
    provider::IndexProvider,
};
