//! Service Mesh Interface resources.

pub mod access;
pub mod specs;
pub mod split;

pub use self::{
    access::{IdentityBindingSubject, TrafficTarget, TrafficTargetRule, TrafficTargetSpec},
    specs::{
        HttpMatch, HttpRouteGroup, HttpRouteGroupSpec, TcpMatch, TcpRoute, TcpRouteSpec,
        HTTP_ROUTE_GROUP_KIND, TCP_ROUTE_KIND,
    },
    split::{TrafficSplit, TrafficSplitBackend, TrafficSplitSpec},
};
