use crate::MeshCatalog;
use mesh_controller_core::{
    provider::pod_service_account, proxy::PodMetadata, CommonName, K8sServiceAccount, MeshService,
    Message, Proxy,
};
use mesh_controller_k8s_api::{Labels, Pod, ResourceExt, PROXY_UUID_LABEL};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why a proxy certificate could not be bound to a workload.
///
/// Every variant except [`CertificateBindingError::NoServicesFound`] means
/// the certificate and the cluster state disagree, and the proxy must not be
/// served.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CertificateBindingError {
    #[error("common name {0} is not of the form <proxy-id>.<service-account>.<namespace>")]
    InvalidCommonName(CommonName),

    #[error("no pod has proxy id {proxy_id} (certificate namespace {namespace})")]
    PodNotFound { namespace: String, proxy_id: String },

    #[error("{count} pods have proxy id {proxy_id} (certificate namespace {namespace})")]
    MultiplePods {
        namespace: String,
        proxy_id: String,
        count: usize,
    },

    #[error("pod {pod} is in namespace {actual}, but its certificate was issued for {expected}")]
    NamespaceMismatch {
        pod: String,
        expected: String,
        actual: String,
    },

    #[error("pod {pod} runs as {actual}, but its certificate was issued for {expected}")]
    ServiceAccountMismatch {
        pod: String,
        expected: K8sServiceAccount,
        actual: K8sServiceAccount,
    },

    #[error("no services select pod {0}")]
    NoServicesFound(String),
}

impl MeshCatalog {
    /// Returns the services a proxy is a member of, given the common name of
    /// the certificate it presented.
    ///
    /// Apex services of traffic splits are excluded since no pod backs them.
    pub fn get_services_from_envoy_certificate(
        &self,
        cn: &CommonName,
    ) -> Result<Vec<MeshService>, CertificateBindingError> {
        let pod = self.get_pod_from_certificate(cn)?;
        let namespace = pod.namespace().unwrap_or_default();
        let labels = Labels::from(pod.metadata.labels.clone());

        let services = self
            .kube
            .list_services()
            .into_iter()
            .filter(|svc| svc.namespace().as_deref() == Some(&*namespace))
            .filter(|svc| {
                svc.spec
                    .as_ref()
                    .and_then(|spec| spec.selector.as_ref())
                    .is_some_and(|sel| labels.selected_by(sel))
            })
            .flat_map(|svc| self.kube.service_to_mesh_services(&svc))
            .filter(|svc| !self.is_apex_service(svc))
            .collect::<Vec<_>>();

        if services.is_empty() {
            return Err(CertificateBindingError::NoServicesFound(format!(
                "{namespace}/{}",
                pod.name_unchecked()
            )));
        }
        tracing::debug!(%cn, services = services.len(), "resolved proxy services");
        Ok(services)
    }

    /// Finds the one pod a proxy certificate was issued to, checking that the
    /// pod runs in the namespace and as the service account the certificate
    /// names.
    ///
    /// Pods are matched on the proxy id alone, in every namespace.
    pub fn get_pod_from_certificate(
        &self,
        cn: &CommonName,
    ) -> Result<Arc<Pod>, CertificateBindingError> {
        let id = cn
            .proxy_identity()
            .ok_or_else(|| CertificateBindingError::InvalidCommonName(cn.clone()))?;
        let namespace = &id.service_account.namespace;

        let mut pods = self
            .kube
            .list_pods()
            .into_iter()
            .filter(|pod| {
                pod.labels().get(PROXY_UUID_LABEL).map(String::as_str) == Some(&*id.proxy_id)
            })
            .collect::<Vec<_>>();

        let pod = match pods.len() {
            0 => {
                tracing::warn!(%cn, %namespace, "no pod found for proxy certificate");
                return Err(CertificateBindingError::PodNotFound {
                    namespace: namespace.clone(),
                    proxy_id: id.proxy_id,
                });
            }
            1 => pods.remove(0),
            count => {
                tracing::warn!(%cn, %namespace, count, "multiple pods found for proxy certificate");
                return Err(CertificateBindingError::MultiplePods {
                    namespace: namespace.clone(),
                    proxy_id: id.proxy_id,
                    count,
                });
            }
        };

        let pod_name = pod.name_unchecked();
        let pod_namespace = pod.namespace().unwrap_or_default();
        if pod_namespace != *namespace {
            tracing::warn!(%cn, pod = %pod_name, %pod_namespace, "pod namespace does not match certificate");
            return Err(CertificateBindingError::NamespaceMismatch {
                pod: pod_name,
                expected: namespace.clone(),
                actual: pod_namespace,
            });
        }

        let pod_sa = pod_service_account(&pod);
        if pod_sa != id.service_account {
            tracing::warn!(%cn, pod = %pod_name, service_account = %pod_sa, "pod service account does not match certificate");
            return Err(CertificateBindingError::ServiceAccountMismatch {
                pod: format!("{pod_namespace}/{pod_name}"),
                expected: id.service_account,
                actual: pod_sa,
            });
        }

        Ok(pod)
    }

    /// Describes the pod a proxy certificate was issued to, for registering
    /// the connected proxy.
    pub fn get_pod_metadata_from_certificate(
        &self,
        cn: &CommonName,
    ) -> Result<PodMetadata, CertificateBindingError> {
        let pod = self.get_pod_from_certificate(cn)?;
        Ok(PodMetadata {
            uid: pod.uid().unwrap_or_default(),
            name: pod.name_unchecked(),
            namespace: pod.namespace().unwrap_or_default(),
            service_account: pod_service_account(&pod),
        })
    }

    /// Registers a proxy that connected with a certificate for `cn` and
    /// returns the receiving end of its announcement channel.
    ///
    /// The proxy is rejected if its certificate cannot be bound to exactly
    /// one pod.
    pub fn connect_proxy(
        &self,
        cn: CommonName,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Message>, CertificateBindingError> {
        let pod = self.get_pod_metadata_from_certificate(&cn)?;
        tracing::info!(%cn, pod = %pod.name, namespace = %pod.namespace, "proxy connected");
        let (proxy, rx) = Proxy::new(cn, Some(pod), capacity);
        self.registry.register_proxy(proxy);
        Ok(rx)
    }
}
