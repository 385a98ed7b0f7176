#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod announcement;
pub mod bus;
pub mod certificate;
pub mod config;
pub mod egress;
pub mod endpoint;
pub mod identity;
pub mod inbound;
pub mod outbound;
pub mod provider;
pub mod proxy;
pub mod route;
pub mod service;
pub mod traffic_match;
pub mod warning;

pub use self::{
    announcement::{Kind, Message},
    bus::EventBus,
    certificate::{Certificate, CertificateError, CertificateManager, CommonName},
    config::{Configurator, FeatureFlags, MeshSettings},
    endpoint::Endpoint,
    identity::{K8sServiceAccount, ServiceIdentity},
    proxy::Proxy,
    service::{ClusterName, MeshService, Protocol, WeightedCluster},
    warning::{PolicyWarning, Report},
};
pub use ipnet::IpNet;
