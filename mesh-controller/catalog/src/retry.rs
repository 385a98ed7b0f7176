use crate::MeshCatalog;
use mesh_controller_core::{route::RetryPolicy, MeshService, ServiceIdentity};
use mesh_controller_k8s_api::{
    policy::{RetryPolicySpec, RetryTarget},
    SERVICE_KIND,
};

impl MeshCatalog {
    /// Returns the retry policy for requests from `downstream` to `upstream`,
    /// if retries are enabled and a `Retry` names exactly that pair.
    pub fn get_retry_policy(
        &self,
        downstream: &ServiceIdentity,
        upstream: &MeshService,
    ) -> Option<RetryPolicy> {
        if !self.config.feature_flags().enable_retry_policy {
            return None;
        }
        let source = downstream.to_service_account()?;

        let retry = self
            .policy
            .list_retry_policies_for_service_account(&source)
            .into_iter()
            .find(|retry| {
                retry
                    .spec
                    .destinations
                    .iter()
                    .any(|dst| names_service(dst, upstream))
            })?;
        tracing::debug!(%downstream, %upstream, "found retry policy");
        Some(to_retry_policy(&retry.spec.retry_policy))
    }
}

fn names_service(target: &RetryTarget, svc: &MeshService) -> bool {
    target.kind == SERVICE_KIND && target.name == svc.name && target.namespace == svc.namespace
}

fn to_retry_policy(spec: &RetryPolicySpec) -> RetryPolicy {
    RetryPolicy {
        retry_on: spec.retry_on.clone(),
        per_try_timeout: spec.per_try_timeout.map(Into::into),
        num_retries: spec.num_retries,
        retry_backoff_base_interval: spec.retry_backoff_base_interval.map(Into::into),
    }
}
