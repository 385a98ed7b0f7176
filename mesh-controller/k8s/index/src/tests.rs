use super::*;
use kube::ResourceExt;
use kubert::index::IndexNamespacedResource;
use maplit::{btreemap, convert_args};
use mesh_controller_core::{
    provider::{
        EndpointsProvider, KubeController, MeshSpec, PolicyController, ServiceProvider,
        TrafficSplitFilter, UpstreamTrafficSettingLookup,
    },
    EventBus, Kind, MeshSettings, MeshService, Protocol, ServiceIdentity,
};
use mesh_controller_k8s_api::{
    self as k8s,
    config::{MeshConfigSpec, TrafficSpec},
    policy::{UpstreamTrafficSetting, UpstreamTrafficSettingSpec},
    smi::{TrafficSplit, TrafficSplitBackend, TrafficSplitSpec},
};
use std::{net::IpAddr, num::NonZeroU16};

fn mk_index() -> (SharedIndex, EventBus, tokio::sync::watch::Receiver<MeshSettings>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let bus = EventBus::new();
    let (index, settings) = Index::shared(
        bus.clone(),
        MeshConfigRef {
            namespace: "mesh-system".to_string(),
            name: "mesh-config".to_string(),
        },
        MeshSettings::default(),
        None,
    );
    (index, bus, settings)
}

fn mk_pod(ns: &str, name: &str, sa: &str, ip: IpAddr, labels: &[(&str, &str)]) -> k8s::Pod {
    k8s::Pod {
        metadata: k8s::ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            uid: Some(format!("{name}-uid")),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(k8s::PodSpec {
            service_account_name: Some(sa.to_string()),
            containers: vec![k8s::api::core::v1::Container {
                name: "app".to_string(),
                ports: Some(vec![k8s::api::core::v1::ContainerPort {
                    container_port: 8080,
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(k8s::PodStatus {
            pod_ips: Some(vec![k8s::api::core::v1::PodIP { ip: ip.to_string() }]),
            ..Default::default()
        }),
    }
}

fn mk_service(
    ns: &str,
    name: &str,
    cluster_ip: Option<&str>,
    selector: &[(&str, &str)],
) -> k8s::Service {
    k8s::Service {
        metadata: k8s::ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(k8s::ServiceSpec {
            cluster_ip: cluster_ip.map(Into::into),
            selector: Some(
                selector
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ports: Some(vec![k8s::ServicePort {
                name: Some("http".to_string()),
                port: 80,
                target_port: Some(k8s::IntOrString::Int(8080)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_endpoints(ns: &str, name: &str, ips: &[&str], port: i32) -> k8s::Endpoints {
    k8s::Endpoints {
        metadata: k8s::ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        subsets: Some(vec![k8s::EndpointSubset {
            addresses: Some(
                ips.iter()
                    .map(|ip| k8s::EndpointAddress {
                        ip: ip.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![k8s::EndpointPort {
                name: Some("http".to_string()),
                port,
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

fn mk_split(ns: &str, name: &str, apex: &str, backends: &[(&str, u32)]) -> TrafficSplit {
    TrafficSplit {
        metadata: k8s::ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: TrafficSplitSpec {
            service: apex.to_string(),
            backends: backends
                .iter()
                .map(|(service, weight)| TrafficSplitBackend {
                    service: service.to_string(),
                    weight: *weight,
                })
                .collect(),
        },
    }
}

fn bookstore_svc() -> MeshService {
    MeshService {
        namespace: "default".to_string(),
        name: "bookstore".to_string(),
        port: NonZeroU16::new(80).unwrap(),
        target_port: NonZeroU16::new(8080),
        protocol: Protocol::Http,
    }
}

#[test]
fn announces_changes_with_old_and_new() {
    let (index, bus, _settings) = mk_index();
    let mut rx = bus.subscribe(Kind::RESOURCE_CHANGES);

    let svc = mk_service("default", "bookstore", None, &[("app", "bookstore")]);
    index.write().apply(svc.clone());
    let added = rx.try_recv().expect("must announce add");
    assert_eq!(added.kind, Kind::ServiceAdded);
    assert!(added.old.is_none());

    // Re-applying an identical object is announced, but is not a delta.
    index.write().apply(svc);
    let updated = rx.try_recv().expect("must announce update");
    assert_eq!(updated.kind, Kind::ServiceUpdated);
    assert!(!updated.is_delta());

    <Index as IndexNamespacedResource<k8s::Service>>::delete(
        &mut index.write(),
        "default".to_string(),
        "bookstore".to_string(),
    );
    let deleted = rx.try_recv().expect("must announce delete");
    assert_eq!(deleted.kind, Kind::ServiceDeleted);
    assert!(deleted.new.is_none());

    // Deleting an unknown resource is silent.
    <Index as IndexNamespacedResource<k8s::Service>>::delete(
        &mut index.write(),
        "default".to_string(),
        "bookstore".to_string(),
    );
    assert!(rx.try_recv().is_err());
}

#[test]
fn monitored_namespaces_follow_resources() {
    let (index, _bus, _settings) = mk_index();
    let provider = IndexProvider::new(index.clone());
    assert!(provider.list_monitored_namespaces().is_empty());

    index
        .write()
        .apply(mk_service("default", "bookstore", None, &[]));
    index
        .write()
        .apply(mk_service("bookbuyer", "bookbuyer", None, &[]));
    assert_eq!(
        provider.list_monitored_namespaces(),
        vec!["bookbuyer".to_string(), "default".to_string()]
    );
    assert!(provider.is_monitored_namespace("default"));

    <Index as IndexNamespacedResource<k8s::Service>>::delete(
        &mut index.write(),
        "default".to_string(),
        "bookstore".to_string(),
    );
    assert!(!provider.is_monitored_namespace("default"));
}

#[test]
fn allow_list_filters_resources() {
    let bus = EventBus::new();
    let (index, _settings) = Index::shared(
        bus,
        MeshConfigRef {
            namespace: "mesh-system".to_string(),
            name: "mesh-config".to_string(),
        },
        MeshSettings::default(),
        Some(std::iter::once("default".to_string()).collect()),
    );
    index
        .write()
        .apply(mk_service("default", "bookstore", None, &[]));
    index
        .write()
        .apply(mk_service("other", "bookstore", None, &[]));

    let provider = IndexProvider::new(index);
    assert_eq!(KubeController::list_services(&provider).len(), 1);
    assert!(provider.get_service("other", "bookstore").is_none());
    assert!(!provider.is_monitored_namespace("other"));
}

#[test]
fn mesh_config_drives_settings() {
    let (index, _bus, settings) = mk_index();
    let config = |ns: &str, name: &str| k8s::MeshConfig {
        metadata: k8s::ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: MeshConfigSpec {
            traffic: TrafficSpec {
                enable_permissive_traffic_policy_mode: true,
                enable_egress: true,
            },
            ..Default::default()
        },
    };

    index.write().apply(config("default", "mesh-config"));
    assert!(!settings.borrow().permissive_traffic_policy_mode);

    index.write().apply(config("mesh-system", "mesh-config"));
    assert!(settings.borrow().permissive_traffic_policy_mode);
    assert!(settings.borrow().enable_egress);

    <Index as IndexNamespacedResource<k8s::MeshConfig>>::delete(
        &mut index.write(),
        "mesh-system".to_string(),
        "mesh-config".to_string(),
    );
    assert_eq!(*settings.borrow(), MeshSettings::default());
}

#[test]
fn services_and_identities() {
    let (index, _bus, _settings) = mk_index();
    let ip = "10.0.0.2".parse().unwrap();
    index.write().apply(mk_pod(
        "default",
        "bookstore-0",
        "bookstore",
        ip,
        &[("app", "bookstore")],
    ));
    index.write().apply(mk_service(
        "default",
        "bookstore",
        Some("10.96.0.10"),
        &[("app", "bookstore")],
    ));
    index
        .write()
        .apply(mk_service("default", "unrelated", None, &[("app", "other")]));
    let provider = IndexProvider::new(index);

    let identity = ServiceIdentity::new("bookstore.default");
    assert_eq!(
        provider.get_services_for_service_identity(&identity).unwrap(),
        vec![bookstore_svc()]
    );
    assert_eq!(
        provider
            .list_service_identities_for_service(&bookstore_svc())
            .unwrap(),
        vec![identity.clone()]
    );

    let eps = provider.list_endpoints_for_identity(&identity).unwrap();
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].ip, ip);
    assert_eq!(eps[0].port.get(), 8080);
}

#[test]
fn resolvable_endpoints_prefer_cluster_ip() {
    let (index, _bus, _settings) = mk_index();
    index.write().apply(mk_endpoints(
        "default",
        "bookstore",
        &["10.0.0.2", "10.0.0.3"],
        8080,
    ));
    index
        .write()
        .apply(mk_service("default", "bookstore", None, &[]));
    let provider = IndexProvider::new(index.clone());

    let eps = provider
        .get_resolvable_endpoints_for_service(&bookstore_svc())
        .unwrap();
    assert_eq!(eps.len(), 2, "headless services resolve to pod endpoints");

    index.write().apply(mk_service(
        "default",
        "bookstore",
        Some("10.96.0.10"),
        &[],
    ));
    let eps = provider
        .get_resolvable_endpoints_for_service(&bookstore_svc())
        .unwrap();
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].ip, "10.96.0.10".parse::<IpAddr>().unwrap());
    assert_eq!(eps[0].port.get(), 80);
}

#[test]
fn traffic_split_filters() {
    let (index, _bus, _settings) = mk_index();
    index.write().apply(mk_split(
        "default",
        "split-b",
        "bookstore-apex.default.svc.cluster.local",
        &[("bookstore-v1", 90), ("bookstore-v2", 10)],
    ));
    index.write().apply(mk_split(
        "default",
        "split-a",
        "bookstore-apex",
        &[("bookstore-v1", 100)],
    ));
    index
        .write()
        .apply(mk_split("other", "split", "bookstore-apex", &[]));
    let provider = IndexProvider::new(index);

    let apex = provider.list_traffic_splits(&TrafficSplitFilter::apex("default", "bookstore-apex"));
    assert_eq!(
        apex.iter().map(|s| s.name_unchecked()).collect::<Vec<_>>(),
        vec!["split-a".to_string(), "split-b".to_string()],
        "listings are ordered by name"
    );

    let backend =
        provider.list_traffic_splits(&TrafficSplitFilter::backend("default", "bookstore-v2"));
    assert_eq!(backend.len(), 1);
    assert_eq!(provider.list_traffic_splits(&Default::default()).len(), 3);
}

#[test]
fn upstream_traffic_setting_lookup() {
    let (index, _bus, _settings) = mk_index();
    index.write().apply(UpstreamTrafficSetting {
        metadata: k8s::ObjectMeta {
            namespace: Some("default".to_string()),
            name: Some("bookstore-uts".to_string()),
            ..Default::default()
        },
        spec: UpstreamTrafficSettingSpec {
            host: "bookstore.default.svc.cluster.local".to_string(),
            ..Default::default()
        },
    });
    let provider = IndexProvider::new(index);

    assert!(provider
        .get_upstream_traffic_setting(&UpstreamTrafficSettingLookup::name(
            "default",
            "bookstore-uts"
        ))
        .is_some());
    assert!(provider
        .get_upstream_traffic_setting(&UpstreamTrafficSettingLookup::Host {
            namespace: "default".to_string(),
            host: "bookstore.default.svc.cluster.local".to_string(),
        })
        .is_some());
    assert!(provider
        .get_upstream_traffic_setting(&UpstreamTrafficSettingLookup::name("other", "bookstore-uts"))
        .is_none());
}

#[test]
fn labels_select_pods() {
    let labels = convert_args!(btreemap!("app" => "bookstore", "version" => "v1"));
    let pod = k8s::Labels::from(labels);
    assert!(pod.selected_by(&convert_args!(btreemap!("app" => "bookstore"))));
    assert!(!pod.selected_by(&convert_args!(btreemap!("app" => "bookbuyer"))));
}
