use mesh_controller_k8s_api::{
    policy::{Egress, IngressBackend, Retry, UpstreamTrafficSetting},
    smi::{HttpRouteGroup, TcpRoute, TrafficSplit, TrafficTarget},
    Endpoints, MeshConfig, Pod, Service,
};
use std::{fmt, sync::Arc};

/// The kinds of announcement carried on the event bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    PodAdded,
    PodDeleted,
    PodUpdated,

    EndpointAdded,
    EndpointDeleted,
    EndpointUpdated,

    ServiceAdded,
    ServiceDeleted,
    ServiceUpdated,

    TrafficSplitAdded,
    TrafficSplitDeleted,
    TrafficSplitUpdated,

    TrafficTargetAdded,
    TrafficTargetDeleted,
    TrafficTargetUpdated,

    RouteGroupAdded,
    RouteGroupDeleted,
    RouteGroupUpdated,

    TcpRouteAdded,
    TcpRouteDeleted,
    TcpRouteUpdated,

    IngressBackendAdded,
    IngressBackendDeleted,
    IngressBackendUpdated,

    EgressAdded,
    EgressDeleted,
    EgressUpdated,

    RetryPolicyAdded,
    RetryPolicyDeleted,
    RetryPolicyUpdated,

    /// Backpressure: connection and rate limiting settings.
    UpstreamTrafficSettingAdded,
    UpstreamTrafficSettingDeleted,
    UpstreamTrafficSettingUpdated,

    MeshConfigAdded,
    MeshConfigDeleted,
    MeshConfigUpdated,

    /// A proxy certificate was rotated.
    CertificateRotated,

    /// Requests a coalesced proxy broadcast without a resource change.
    ScheduleProxyBroadcast,

    /// A coalesced broadcast to every connected proxy.
    ProxyBroadcast,

    /// A periodic resync, sent to every connected proxy.
    ProxyResync,
}

/// A resource carried by a change announcement.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Pod(Arc<Pod>),
    Endpoints(Arc<Endpoints>),
    Service(Arc<Service>),
    TrafficSplit(Arc<TrafficSplit>),
    TrafficTarget(Arc<TrafficTarget>),
    HttpRouteGroup(Arc<HttpRouteGroup>),
    TcpRoute(Arc<TcpRoute>),
    IngressBackend(Arc<IngressBackend>),
    Egress(Arc<Egress>),
    Retry(Arc<Retry>),
    UpstreamTrafficSetting(Arc<UpstreamTrafficSetting>),
    MeshConfig(Arc<MeshConfig>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub kind: Kind,
    pub old: Option<Resource>,
    pub new: Option<Resource>,
}

/// A resource type that is announced on the bus when it changes.
pub trait Announced: Sized {
    const ADDED: Kind;
    const UPDATED: Kind;
    const DELETED: Kind;

    fn into_resource(this: Arc<Self>) -> Resource;
}

// === impl Kind ===

impl Kind {
    /// Every kind that announces a resource change.
    pub const RESOURCE_CHANGES: [Kind; 36] = [
        Kind::PodAdded,
        Kind::PodDeleted,
        Kind::PodUpdated,
        Kind::EndpointAdded,
        Kind::EndpointDeleted,
        Kind::EndpointUpdated,
        Kind::ServiceAdded,
        Kind::ServiceDeleted,
        Kind::ServiceUpdated,
        Kind::TrafficSplitAdded,
        Kind::TrafficSplitDeleted,
        Kind::TrafficSplitUpdated,
        Kind::TrafficTargetAdded,
        Kind::TrafficTargetDeleted,
        Kind::TrafficTargetUpdated,
        Kind::RouteGroupAdded,
        Kind::RouteGroupDeleted,
        Kind::RouteGroupUpdated,
        Kind::TcpRouteAdded,
        Kind::TcpRouteDeleted,
        Kind::TcpRouteUpdated,
        Kind::IngressBackendAdded,
        Kind::IngressBackendDeleted,
        Kind::IngressBackendUpdated,
        Kind::EgressAdded,
        Kind::EgressDeleted,
        Kind::EgressUpdated,
        Kind::RetryPolicyAdded,
        Kind::RetryPolicyDeleted,
        Kind::RetryPolicyUpdated,
        Kind::UpstreamTrafficSettingAdded,
        Kind::UpstreamTrafficSettingDeleted,
        Kind::UpstreamTrafficSettingUpdated,
        Kind::MeshConfigAdded,
        Kind::MeshConfigDeleted,
        Kind::MeshConfigUpdated,
    ];

    pub fn is_update(&self) -> bool {
        matches!(
            self,
            Kind::PodUpdated
                | Kind::EndpointUpdated
                | Kind::ServiceUpdated
                | Kind::TrafficSplitUpdated
                | Kind::TrafficTargetUpdated
                | Kind::RouteGroupUpdated
                | Kind::TcpRouteUpdated
                | Kind::IngressBackendUpdated
                | Kind::EgressUpdated
                | Kind::RetryPolicyUpdated
                | Kind::UpstreamTrafficSettingUpdated
                | Kind::MeshConfigUpdated
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// === impl Message ===

impl Message {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            old: None,
            new: None,
        }
    }

    pub fn added<T: Announced>(new: Arc<T>) -> Self {
        Self {
            kind: T::ADDED,
            old: None,
            new: Some(T::into_resource(new)),
        }
    }

    pub fn updated<T: Announced>(old: Arc<T>, new: Arc<T>) -> Self {
        Self {
            kind: T::UPDATED,
            old: Some(T::into_resource(old)),
            new: Some(T::into_resource(new)),
        }
    }

    pub fn deleted<T: Announced>(old: Arc<T>) -> Self {
        Self {
            kind: T::DELETED,
            old: Some(T::into_resource(old)),
            new: None,
        }
    }

    /// Returns false only for updates whose old and new objects are equal.
    pub fn is_delta(&self) -> bool {
        !self.kind.is_update() || self.old != self.new
    }
}

macro_rules! announced {
    ($ty:ty, $variant:ident, $added:ident, $updated:ident, $deleted:ident) => {
        impl Announced for $ty {
            const ADDED: Kind = Kind::$added;
            const UPDATED: Kind = Kind::$updated;
            const DELETED: Kind = Kind::$deleted;

            fn into_resource(this: Arc<Self>) -> Resource {
                Resource::$variant(this)
            }
        }
    };
}

announced!(Pod, Pod, PodAdded, PodUpdated, PodDeleted);
announced!(
    Endpoints,
    Endpoints,
    EndpointAdded,
    EndpointUpdated,
    EndpointDeleted
);
announced!(Service, Service, ServiceAdded, ServiceUpdated, ServiceDeleted);
announced!(
    TrafficSplit,
    TrafficSplit,
    TrafficSplitAdded,
    TrafficSplitUpdated,
    TrafficSplitDeleted
);
announced!(
    TrafficTarget,
    TrafficTarget,
    TrafficTargetAdded,
    TrafficTargetUpdated,
    TrafficTargetDeleted
);
announced!(
    HttpRouteGroup,
    HttpRouteGroup,
    RouteGroupAdded,
    RouteGroupUpdated,
    RouteGroupDeleted
);
announced!(
    TcpRoute,
    TcpRoute,
    TcpRouteAdded,
    TcpRouteUpdated,
    TcpRouteDeleted
);
announced!(
    IngressBackend,
    IngressBackend,
    IngressBackendAdded,
    IngressBackendUpdated,
    IngressBackendDeleted
);
announced!(Egress, Egress, EgressAdded, EgressUpdated, EgressDeleted);
announced!(
    Retry,
    Retry,
    RetryPolicyAdded,
    RetryPolicyUpdated,
    RetryPolicyDeleted
);
announced!(
    UpstreamTrafficSetting,
    UpstreamTrafficSetting,
    UpstreamTrafficSettingAdded,
    UpstreamTrafficSettingUpdated,
    UpstreamTrafficSettingDeleted
);
announced!(
    MeshConfig,
    MeshConfig,
    MeshConfigAdded,
    MeshConfigUpdated,
    MeshConfigDeleted
);

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_controller_k8s_api::ObjectMeta;

    fn pod(version: &str) -> Arc<Pod> {
        Arc::new(Pod {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("bookstore".to_string()),
                resource_version: Some(version.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn delta_detection() {
        assert!(Message::added(pod("1")).is_delta());
        assert!(Message::deleted(pod("1")).is_delta());
        assert!(Message::updated(pod("1"), pod("2")).is_delta());
        assert!(!Message::updated(pod("1"), pod("1")).is_delta());
        assert!(Message::new(Kind::ScheduleProxyBroadcast).is_delta());
    }

    #[test]
    fn resource_change_kinds() {
        assert_eq!(
            Kind::RESOURCE_CHANGES
                .iter()
                .filter(|k| k.is_update())
                .count(),
            12
        );
        assert!(!Kind::RESOURCE_CHANGES.contains(&Kind::ProxyBroadcast));
    }
}
