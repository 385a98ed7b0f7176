use crate::{
    catalog,
    core::{CertificateManager, EventBus, MeshSettings},
    index,
    k8s::{self, policy, smi, GoDuration},
    InMemoryCertificates,
};
use ahash::AHashSet as HashSet;
use anyhow::{bail, Result};
use clap::Parser;
use kube::{runtime::watcher, Client, Resource};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "mesh-controller", about = "A service mesh control plane")]
pub struct Args {
    #[clap(long, default_value = "mesh=info,warn", env = "MESH_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Namespace of the MeshConfig that drives the live mesh settings.
    #[clap(long, default_value = "mesh-system")]
    mesh_config_namespace: String,

    #[clap(long, default_value = "mesh-config")]
    mesh_config_name: String,

    /// Permits any-to-any traffic until a MeshConfig says otherwise.
    #[clap(long)]
    permissive_traffic_policy_mode: bool,

    /// Comma-separated namespaces the mesh spans.
    ///
    /// By default, every namespace holding indexed resources is part of the
    /// mesh.
    #[clap(long)]
    monitored_namespaces: Option<Namespaces>,

    /// The shortest proxy resync interval a MeshConfig may set.
    #[clap(long, default_value = "30s")]
    min_resync_interval: GoDuration,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            mesh_config_namespace,
            mesh_config_name,
            permissive_traffic_policy_mode,
            monitored_namespaces,
            min_resync_interval,
        } = self;

        let bus = EventBus::new();
        let initial_settings = MeshSettings {
            permissive_traffic_policy_mode,
            ..Default::default()
        };
        let monitored_namespaces = monitored_namespaces
            .map(|Namespaces(namespaces)| namespaces)
            .filter(|namespaces| !namespaces.is_empty());
        let (index, settings) = index::Index::shared(
            bus.clone(),
            index::MeshConfigRef {
                namespace: mesh_config_namespace,
                name: mesh_config_name,
            },
            initial_settings,
            monitored_namespaces,
        );

        let mut prom = <Registry>::default();
        let metered_index =
            index::IndexMetrics::register(index.clone(), prom.sub_registry_with_prefix("index"))
                .shared();
        let catalog_metrics =
            catalog::CatalogMetrics::register(prom.sub_registry_with_prefix("catalog"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Start the catalog loops before any watch publishes, so that no
        // announcement is missed.
        let registry = Arc::new(catalog::ProxyRegistry::new(&catalog_metrics));
        let certificates: Arc<dyn CertificateManager> =
            Arc::new(InMemoryCertificates::new(bus.clone()));
        let catalog = Arc::new(catalog::MeshCatalog::new(
            catalog::Providers::from_single(Arc::new(index::IndexProvider::new(index))),
            Arc::new(settings.clone()),
            certificates.clone(),
            registry.clone(),
        ));

        let dispatcher = catalog::Dispatcher::new(bus.clone(), &catalog_metrics);
        tokio::spawn(
            dispatcher
                .run(runtime.shutdown_handle())
                .instrument(info_span!("dispatcher")),
        );

        let (ticker, resyncs) = catalog::Ticker::new(
            settings,
            min_resync_interval.into(),
            &catalog_metrics,
        );
        tokio::spawn(
            ticker
                .run(runtime.shutdown_handle())
                .instrument(info_span!("ticker")),
        );

        let broadcaster = catalog::Broadcaster::new(&bus, registry.clone(), &catalog_metrics)
            .with_source("resync", resyncs);
        tokio::spawn(
            broadcaster
                .run(runtime.shutdown_handle())
                .instrument(info_span!("broadcaster")),
        );

        tokio::spawn(
            catalog::release_certificates_on_pod_delete(
                bus.clone(),
                registry,
                certificates,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("certificates")),
        );

        tokio::spawn(
            catalog::refresh_endpoints_on_broadcast(
                bus.clone(),
                catalog.clone(),
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("endpoints")),
        );

        // Spawn resource watches.

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(metered_index.clone(), pods).instrument(info_span!("pods")),
        );

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(metered_index.clone(), services)
                .instrument(info_span!("services")),
        );

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(metered_index.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        // Watches a custom resource, if its definition is installed.
        macro_rules! watch_crd {
            ($ty:ty, $name:literal) => {
                if api_resource_exists::<$ty>(&runtime.client()).await {
                    let events = runtime.watch_all::<$ty>(watcher::Config::default());
                    tokio::spawn(
                        kubert::index::namespaced(metered_index.clone(), events)
                            .instrument(info_span!($name)),
                    );
                } else {
                    tracing::warn!(
                        resource = $name,
                        "resource kind not found, skipping watches"
                    );
                }
            };
        }

        watch_crd!(k8s::MeshConfig, "meshconfigs.config.mesh-controller.io");
        watch_crd!(smi::TrafficSplit, "trafficsplits.split.smi-spec.io");
        watch_crd!(smi::TrafficTarget, "traffictargets.access.smi-spec.io");
        watch_crd!(smi::HttpRouteGroup, "httproutegroups.specs.smi-spec.io");
        watch_crd!(smi::TcpRoute, "tcproutes.specs.smi-spec.io");
        watch_crd!(policy::Egress, "egresses.policy.mesh-controller.io");
        watch_crd!(
            policy::IngressBackend,
            "ingressbackends.policy.mesh-controller.io"
        );
        watch_crd!(policy::Retry, "retries.policy.mesh-controller.io");
        watch_crd!(
            policy::UpstreamTrafficSetting,
            "upstreamtrafficsettings.policy.mesh-controller.io"
        );

        info!(?catalog, "mesh catalog running");

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }
        bus.close();

        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Namespaces(HashSet<String>);

impl std::str::FromStr for Namespaces {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        let namespaces = s
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(|ns| {
                if ns.contains('/') {
                    bail!("invalid namespace {ns:?}");
                }
                Ok(ns.to_string())
            })
            .collect::<Result<HashSet<_>>>()?;
        Ok(Self(namespaces))
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
