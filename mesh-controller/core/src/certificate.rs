use crate::identity::K8sServiceAccount;
use chrono::{DateTime, Utc};
use std::{fmt, time::Duration};

/// A proxy certificate's common name:
/// `<proxy-uuid>.<service-account>.<namespace>[.<trust-domain>...]`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommonName(String);

/// The identity encoded in a proxy certificate's common name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProxyIdentity {
    pub proxy_id: String,
    pub service_account: K8sServiceAccount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub common_name: CommonName,
    pub serial_number: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cert_chain: Vec<u8>,
    pub issuing_ca: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CertificateError {
    #[error("no certificate found for {0}")]
    NotFound(CommonName),

    #[error("failed to issue a certificate for {common_name}: {reason}")]
    Issue {
        common_name: CommonName,
        reason: String,
    },
}

/// Issues and tracks proxy certificates.
#[async_trait::async_trait]
pub trait CertificateManager: Send + Sync {
    async fn issue_certificate(
        &self,
        cn: &CommonName,
        validity: Duration,
    ) -> Result<Certificate, CertificateError>;

    fn get_certificate(&self, cn: &CommonName) -> Result<Certificate, CertificateError>;

    fn release_certificate(&self, cn: &CommonName);

    fn list_certificates(&self) -> Vec<Certificate>;
}

// === impl CommonName ===

impl CommonName {
    pub fn new(cn: impl Into<String>) -> Self {
        Self(cn.into())
    }

    pub fn for_proxy(proxy_id: &str, sa: &K8sServiceAccount, trust_domain: &str) -> Self {
        Self(format!(
            "{}.{}.{}.{}",
            proxy_id, sa.name, sa.namespace, trust_domain
        ))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `None` unless the name has at least the proxy id, service
    /// account and namespace labels, all non-empty.
    pub fn proxy_identity(&self) -> Option<ProxyIdentity> {
        let mut chunks = self.0.split('.');
        let proxy_id = chunks.next().filter(|c| !c.is_empty())?;
        let name = chunks.next().filter(|c| !c.is_empty())?;
        let namespace = chunks.next().filter(|c| !c.is_empty())?;
        Some(ProxyIdentity {
            proxy_id: proxy_id.to_string(),
            service_account: K8sServiceAccount::new(namespace, name),
        })
    }
}

impl fmt::Display for CommonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl Certificate ===

impl Certificate {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
