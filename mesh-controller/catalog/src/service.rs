use crate::MeshCatalog;
use mesh_controller_core::{
    provider::TrafficSplitFilter, MeshService, PolicyWarning, Report, ServiceIdentity,
};
use std::collections::BTreeSet;

impl MeshCatalog {
    /// Lists the services of every service provider. A provider that fails
    /// is skipped.
    pub fn list_mesh_services(&self) -> Report<Vec<MeshService>> {
        let mut report = Report::new(Vec::new());
        for provider in &self.service_providers {
            match provider.list_services() {
                Ok(services) => report.value.extend(services),
                Err(error) => report.warn(PolicyWarning::ProviderFailure {
                    provider: provider.id().to_string(),
                    error: error.to_string(),
                }),
            }
        }
        report.value = dedup(report.value);
        report
    }

    /// Lists the services backed by workloads running as `identity`.
    pub fn get_services_for_service_identity(
        &self,
        identity: &ServiceIdentity,
    ) -> Report<Vec<MeshService>> {
        let mut report = Report::new(Vec::new());
        for provider in &self.service_providers {
            match provider.get_services_for_service_identity(identity) {
                Ok(services) => report.value.extend(services),
                Err(error) => report.warn(PolicyWarning::ProviderFailure {
                    provider: provider.id().to_string(),
                    error: error.to_string(),
                }),
            }
        }
        report.value = dedup(report.value);
        report
    }

    /// Lists the identities of the workloads backing `svc`.
    pub fn list_service_identities_for_service(
        &self,
        svc: &MeshService,
    ) -> Report<Vec<ServiceIdentity>> {
        let mut report = Report::new(BTreeSet::new());
        for provider in &self.service_providers {
            match provider.list_service_identities_for_service(svc) {
                Ok(ids) => report.value.extend(ids),
                Err(error) => report.warn(PolicyWarning::ProviderFailure {
                    provider: provider.id().to_string(),
                    error: error.to_string(),
                }),
            }
        }
        report.map(|ids| ids.into_iter().collect())
    }

    /// Returns the apex services of every traffic split that has `backend`
    /// as a backend. An apex service takes the backend's ports and protocol,
    /// since it is served by the backend's workloads.
    pub fn get_apex_services_for_backend(&self, backend: &MeshService) -> Vec<MeshService> {
        let filter = TrafficSplitFilter::backend(&*backend.namespace, &*backend.name);
        let apexes = self
            .mesh_spec
            .list_traffic_splits(&filter)
            .iter()
            .map(|split| MeshService {
                namespace: backend.namespace.clone(),
                name: split.spec.apex_service_name().to_string(),
                port: backend.port,
                target_port: backend.target_port,
                protocol: backend.protocol,
            })
            .collect();
        dedup(apexes)
    }

    /// Returns true if `svc` is the apex of a traffic split.
    pub fn is_apex_service(&self, svc: &MeshService) -> bool {
        let filter = TrafficSplitFilter::apex(&*svc.namespace, &*svc.name);
        !self.mesh_spec.list_traffic_splits(&filter).is_empty()
    }

    /// Returns true if `svc` is a backend of a traffic split.
    pub fn is_traffic_split_backend(&self, svc: &MeshService) -> bool {
        let filter = TrafficSplitFilter::backend(&*svc.namespace, &*svc.name);
        !self.mesh_spec.list_traffic_splits(&filter).is_empty()
    }
}

/// Removes duplicates while keeping the first occurrence of each service.
pub(crate) fn dedup(services: Vec<MeshService>) -> Vec<MeshService> {
    let mut seen = BTreeSet::new();
    services
        .into_iter()
        .filter(|svc| seen.insert(svc.clone()))
        .collect()
}
