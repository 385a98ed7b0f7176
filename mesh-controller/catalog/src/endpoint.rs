use crate::MeshCatalog;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use mesh_controller_core::{
    provider::{EndpointsProvider, ServiceProvider},
    Endpoint, EventBus, Kind, MeshService, PolicyWarning, Report, ServiceIdentity,
};
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};

/// Endpoints indexed by the identity of the workload serving them.
///
/// Reads return whatever the last completed refresh produced. A refresh
/// rebuilds the whole index without holding the lock and then swaps it in.
pub(crate) struct EndpointCache {
    services: Vec<Arc<dyn ServiceProvider>>,
    endpoints: Vec<Arc<dyn EndpointsProvider>>,
    by_identity: Mutex<Arc<HashMap<ServiceIdentity, Vec<Endpoint>>>>,
}

// === impl EndpointCache ===

impl EndpointCache {
    pub(crate) fn new(
        services: Vec<Arc<dyn ServiceProvider>>,
        endpoints: Vec<Arc<dyn EndpointsProvider>>,
    ) -> Self {
        Self {
            services,
            endpoints,
            by_identity: Mutex::new(Arc::new(HashMap::new())),
        }
    }

    /// Returns the endpoints of workloads running as `identity`, refreshing
    /// the cache first if the identity is unknown.
    pub(crate) fn endpoints_for_identity(&self, identity: &ServiceIdentity) -> Report<Vec<Endpoint>> {
        let mut report = Report::new(Vec::new());
        if let Some(endpoints) = self.by_identity.lock().get(identity) {
            report.value = endpoints.clone();
            return report;
        }

        let cache = report.absorb(self.refresh_cache());
        match cache.get(identity) {
            Some(endpoints) => report.value = endpoints.clone(),
            None => tracing::debug!(%identity, "no endpoints for identity"),
        }
        report
    }

    /// Rebuilds the cache from every provider.
    pub(crate) fn refresh_cache(&self) -> Report<Arc<HashMap<ServiceIdentity, Vec<Endpoint>>>> {
        let mut report = Report::new(());
        let mut identities = BTreeSet::new();
        for provider in &self.services {
            let services = match provider.list_services() {
                Ok(services) => services,
                Err(error) => {
                    report.warn(provider_failure(provider.id(), error));
                    continue;
                }
            };
            for svc in services {
                match provider.list_service_identities_for_service(&svc) {
                    Ok(ids) => identities.extend(ids),
                    Err(error) => report.warn(provider_failure(provider.id(), error)),
                }
            }
        }

        let mut cache = HashMap::with_capacity(identities.len());
        for identity in identities {
            let mut endpoints = Vec::new();
            for provider in &self.endpoints {
                match provider.list_endpoints_for_identity(&identity) {
                    Ok(eps) => endpoints.extend(eps),
                    Err(error) => report.warn(provider_failure(provider.id(), error)),
                }
            }
            endpoints.sort();
            endpoints.dedup();
            cache.insert(identity, endpoints);
        }

        let cache = Arc::new(cache);
        tracing::debug!(identities = cache.len(), "refreshed endpoint cache");
        *self.by_identity.lock() = cache.clone();
        report.map(|()| cache)
    }
}

// === impl MeshCatalog ===

impl MeshCatalog {
    /// Lists the endpoints of `svc` known to every endpoints provider.
    pub fn list_endpoints_for_service(&self, svc: &MeshService) -> Report<Vec<Endpoint>> {
        self.collect_endpoints(|provider| provider.list_endpoints_for_service(svc))
    }

    /// Lists the addresses clients use to reach `svc`.
    pub fn get_resolvable_endpoints_for_service(&self, svc: &MeshService) -> Report<Vec<Endpoint>> {
        self.collect_endpoints(|provider| provider.get_resolvable_endpoints_for_service(svc))
    }

    /// Lists the endpoints of `svc` that `downstream` may connect to: those
    /// of workloads whose identity `downstream` is permitted to reach, or
    /// every endpoint in permissive mode.
    pub fn list_allowed_upstream_endpoints_for_service(
        &self,
        downstream: &ServiceIdentity,
        svc: &MeshService,
    ) -> Report<Vec<Endpoint>> {
        let mut report = Report::new(Vec::new());
        let endpoints = report.absorb(self.list_endpoints_for_service(svc));
        if self.config.is_permissive_traffic_policy_mode() {
            report.value = endpoints;
            return report;
        }

        let Some(downstream_sa) = downstream.to_service_account() else {
            report.warn(PolicyWarning::InvalidServiceIdentity(downstream.to_string()));
            return report;
        };
        let allowed = report
            .absorb(self.list_allowed_outbound_service_accounts(&downstream_sa))
            .iter()
            .map(|sa| sa.to_service_identity())
            .collect::<HashSet<_>>();

        let mut allowed_ips = HashSet::new();
        for identity in report.absorb(self.list_service_identities_for_service(svc)) {
            if !allowed.contains(&identity) {
                continue;
            }
            let eps = report.absorb(self.endpoints.endpoints_for_identity(&identity));
            allowed_ips.extend(eps.into_iter().map(|ep| ep.ip));
        }

        report.value = endpoints
            .into_iter()
            .filter(|ep| allowed_ips.contains(&ep.ip))
            .collect();
        report
    }

    /// Rebuilds the identity to endpoints cache.
    pub fn refresh_endpoint_cache(&self) -> Report<()> {
        self.endpoints.refresh_cache().map(|_| ())
    }

    fn collect_endpoints(
        &self,
        list: impl Fn(&dyn EndpointsProvider) -> anyhow::Result<Vec<Endpoint>>,
    ) -> Report<Vec<Endpoint>> {
        let mut report = Report::new(Vec::new());
        for provider in &self.endpoints_providers {
            match list(&**provider) {
                Ok(endpoints) => report.value.extend(endpoints),
                Err(error) => report.warn(provider_failure(provider.id(), error)),
            }
        }
        report.value.sort();
        report.value.dedup();
        report
    }
}

/// Rebuilds the endpoint cache after every coalesced broadcast so that
/// identities already cached observe pod and endpoint changes.
///
/// Completes when the bus is closed or shutdown is signaled.
pub async fn refresh_endpoints_on_broadcast(
    bus: EventBus,
    catalog: Arc<MeshCatalog>,
    shutdown: drain::Watch,
) {
    let mut broadcasts = bus.subscribe([Kind::ProxyBroadcast]);
    let refresh = async move {
        while broadcasts.recv().await.is_some() {
            let report = catalog.refresh_endpoint_cache();
            tracing::debug!(warnings = report.warnings.len(), "refreshed endpoints after broadcast");
        }
    };
    tokio::select! {
        _ = refresh => {}
        _ = shutdown.signaled() => {
            tracing::debug!("shutdown");
        }
    }
}

fn provider_failure(provider: &str, error: anyhow::Error) -> PolicyWarning {
    PolicyWarning::ProviderFailure {
        provider: provider.to_string(),
        error: error.to_string(),
    }
}
