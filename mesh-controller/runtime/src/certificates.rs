use crate::core::{
    Certificate, CertificateError, CertificateManager, CommonName, EventBus, Kind, Message,
};
use ahash::AHashMap as HashMap;
use chrono::Utc;
use parking_lot::RwLock;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Tracks proxy certificates in memory.
///
/// Certificates carry no key material. An issued certificate is handed out
/// again until it expires; replacing an expired certificate is announced as a
/// rotation so that connected proxies are updated.
#[derive(Debug)]
pub struct InMemoryCertificates {
    certs: RwLock<HashMap<CommonName, Certificate>>,
    serial: AtomicU64,
    bus: EventBus,
}

// === impl InMemoryCertificates ===

impl InMemoryCertificates {
    pub fn new(bus: EventBus) -> Self {
        Self {
            certs: RwLock::new(HashMap::new()),
            serial: AtomicU64::new(0),
            bus,
        }
    }
}

#[async_trait::async_trait]
impl CertificateManager for InMemoryCertificates {
    async fn issue_certificate(
        &self,
        cn: &CommonName,
        validity: Duration,
    ) -> Result<Certificate, CertificateError> {
        let issued_at = Utc::now();
        let expires_at = chrono::Duration::from_std(validity)
            .ok()
            .and_then(|validity| issued_at.checked_add_signed(validity))
            .ok_or_else(|| CertificateError::Issue {
                common_name: cn.clone(),
                reason: format!("validity {validity:?} is out of range"),
            })?;

        let mut certs = self.certs.write();
        let rotated = match certs.get(cn) {
            Some(cert) if !cert.is_expired_at(issued_at) => return Ok(cert.clone()),
            Some(_) => true,
            None => false,
        };
        let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
        let cert = Certificate {
            common_name: cn.clone(),
            serial_number: format!("{serial:016x}"),
            issued_at,
            expires_at,
            cert_chain: Vec::new(),
            issuing_ca: Vec::new(),
        };
        certs.insert(cn.clone(), cert.clone());
        drop(certs);

        if rotated {
            tracing::info!(%cn, serial = %cert.serial_number, "rotated certificate");
            self.bus.publish(Message::new(Kind::CertificateRotated));
        } else {
            tracing::debug!(%cn, serial = %cert.serial_number, %expires_at, "issued certificate");
        }
        Ok(cert)
    }

    fn get_certificate(&self, cn: &CommonName) -> Result<Certificate, CertificateError> {
        self.certs
            .read()
            .get(cn)
            .cloned()
            .ok_or_else(|| CertificateError::NotFound(cn.clone()))
    }

    fn release_certificate(&self, cn: &CommonName) {
        if self.certs.write().remove(cn).is_some() {
            tracing::debug!(%cn, "released certificate");
        }
    }

    fn list_certificates(&self) -> Vec<Certificate> {
        let mut certs = self.certs.read().values().cloned().collect::<Vec<_>>();
        certs.sort_by(|a, b| a.common_name.cmp(&b.common_name));
        certs
    }
}
