#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use mesh_controller_catalog as catalog;
pub use mesh_controller_core as core;
pub use mesh_controller_k8s_api as k8s;
pub use mesh_controller_k8s_index as index;

mod args;
mod certificates;

pub use self::{args::Args, certificates::InMemoryCertificates};
