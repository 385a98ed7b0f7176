use crate::{
    announcement::Message,
    certificate::CommonName,
    identity::{K8sServiceAccount, ServiceIdentity},
};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// A connected sidecar proxy.
///
/// The proxy is identified by its certificate's common name. Announcements
/// destined for the proxy are delivered over a bounded channel; the sender
/// never blocks on it.
#[derive(Clone, Debug)]
pub struct Proxy {
    pub common_name: CommonName,
    pub pod: Option<PodMetadata>,
    pub connected_at: DateTime<Utc>,
    announcements: mpsc::Sender<Message>,
}

/// Identifies the pod hosting a proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodMetadata {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub service_account: K8sServiceAccount,
}

/// Result of a non-blocking delivery attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Full,
    Closed,
}

// === impl Proxy ===

impl Proxy {
    /// Creates a proxy along with the receiving end of its announcement
    /// channel.
    pub fn new(
        common_name: CommonName,
        pod: Option<PodMetadata>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let proxy = Self {
            common_name,
            pod,
            connected_at: Utc::now(),
            announcements: tx,
        };
        (proxy, rx)
    }

    pub fn identity(&self) -> Option<ServiceIdentity> {
        if let Some(pod) = self.pod.as_ref() {
            return Some(pod.service_account.to_service_identity());
        }
        self.common_name
            .proxy_identity()
            .map(|id| id.service_account.to_service_identity())
    }

    pub fn pod_uid(&self) -> Option<&str> {
        self.pod.as_ref().map(|p| &*p.uid)
    }

    /// Attempts to enqueue an announcement without waiting for capacity.
    pub fn try_notify(&self, msg: Message) -> Delivery {
        match self.announcements.try_send(msg) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announcement::Kind;

    #[test]
    fn try_notify_never_blocks() {
        let cn = CommonName::new("abc.bookstore.default.cluster.local");
        let (proxy, mut rx) = Proxy::new(cn, None, 1);
        assert_eq!(
            proxy.try_notify(Message::new(Kind::ProxyBroadcast)),
            Delivery::Sent
        );
        assert_eq!(
            proxy.try_notify(Message::new(Kind::ProxyBroadcast)),
            Delivery::Full
        );
        assert_eq!(rx.try_recv().unwrap().kind, Kind::ProxyBroadcast);
        drop(rx);
        assert_eq!(
            proxy.try_notify(Message::new(Kind::ProxyBroadcast)),
            Delivery::Closed
        );
    }

    #[test]
    fn identity_from_common_name() {
        let cn = CommonName::new("abc.bookstore.default.cluster.local");
        let (proxy, _rx) = Proxy::new(cn, None, 1);
        assert_eq!(
            proxy.identity(),
            Some(ServiceIdentity::new("bookstore.default"))
        );
    }
}
