use crate::{
    metrics::{BroadcasterMetrics, CatalogMetrics},
    registry::ProxyRegistry,
};
use mesh_controller_core::{bus::Subscription, proxy::Delivery, EventBus, Kind, Message};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

/// The minimum time between two announcements sent to proxies.
pub const UPDATE_AT_MOST_EVERY: Duration = Duration::from_secs(3);

/// Relays announcements from any number of sources to every connected
/// proxy.
///
/// Each source is drained by its own forwarding task into a single queue.
/// An announcement that arrives within [`UPDATE_AT_MOST_EVERY`] of the last
/// relayed one is absorbed, since the next relayed announcement causes the
/// proxy to read the latest state anyway. Delivery to a proxy never waits:
/// when a proxy's queue is full the announcement is dropped for that proxy.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<ProxyRegistry>,
    sources: Vec<(&'static str, Subscription)>,
    at_most_every: Duration,
    metrics: BroadcasterMetrics,
}

// === impl Broadcaster ===

impl Broadcaster {
    /// Relays coalesced broadcasts and certificate rotations from the bus.
    pub fn new(bus: &EventBus, registry: Arc<ProxyRegistry>, metrics: &CatalogMetrics) -> Self {
        Self {
            registry,
            sources: vec![
                ("broadcast", bus.subscribe([Kind::ProxyBroadcast])),
                ("certificates", bus.subscribe([Kind::CertificateRotated])),
            ],
            at_most_every: UPDATE_AT_MOST_EVERY,
            metrics: metrics.broadcaster.clone(),
        }
    }

    /// Adds another announcement source, e.g. the resync ticker.
    pub fn with_source(mut self, name: &'static str, source: Subscription) -> Self {
        self.sources.push((name, source));
        self
    }

    pub fn with_rate_limit(mut self, at_most_every: Duration) -> Self {
        self.at_most_every = at_most_every;
        self
    }

    /// Runs until shutdown is signaled or every source has ended.
    pub async fn run(self, shutdown: drain::Watch) {
        let Self {
            registry,
            sources,
            at_most_every,
            metrics,
        } = self;

        let cancel = CancellationToken::new();
        let _stop_forwarding = cancel.clone().drop_guard();
        let (tx, mut rx) = mpsc::channel(sources.len().max(1));
        for (name, source) in sources {
            tokio::spawn(forward(name, source, tx.clone(), cancel.child_token()));
        }
        drop(tx);

        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        let mut last_sent: Option<Instant> = None;
        loop {
            let msg = tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::debug!("shutdown");
                    return;
                }

                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        tracing::debug!("all announcement sources closed");
                        return;
                    }
                },
            };

            let now = Instant::now();
            if let Some(last) = last_sent {
                if now.saturating_duration_since(last) < at_most_every {
                    tracing::trace!(kind = %msg.kind, "absorbing announcement");
                    metrics.absorbed.inc();
                    continue;
                }
            }
            last_sent = Some(now);
            notify_all(&registry, &metrics, msg);
        }
    }
}

async fn forward(
    name: &'static str,
    mut source: Subscription,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = source.recv() => match msg {
                Some(msg) => msg,
                None => {
                    tracing::debug!(source = name, "announcement source closed");
                    return;
                }
            },
        };
        if tx.send(msg).await.is_err() {
            return;
        }
    }
}

fn notify_all(registry: &ProxyRegistry, metrics: &BroadcasterMetrics, msg: Message) {
    let proxies = registry.connected_proxies();
    tracing::debug!(kind = %msg.kind, proxies = proxies.len(), "notifying proxies");
    for proxy in proxies {
        match proxy.try_notify(msg.clone()) {
            Delivery::Sent => {
                metrics.delivered.inc();
            }
            Delivery::Full => {
                tracing::debug!(cn = %proxy.common_name, "proxy queue full, dropping announcement");
                metrics.dropped.inc();
            }
            Delivery::Closed => {
                tracing::trace!(cn = %proxy.common_name, "proxy queue closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_controller_core::{CommonName, Proxy};
    use tokio::time;

    struct Harness {
        bus: EventBus,
        registry: Arc<ProxyRegistry>,
        metrics: BroadcasterMetrics,
        signal: drain::Signal,
    }

    fn spawn_broadcaster(extra: Option<Subscription>) -> Harness {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let metrics = CatalogMetrics::default();
        let bus = EventBus::new();
        let registry = Arc::new(ProxyRegistry::new(&metrics));
        let mut broadcaster = Broadcaster::new(&bus, registry.clone(), &metrics);
        if let Some(source) = extra {
            broadcaster = broadcaster.with_source("ticker", source);
        }
        let (signal, shutdown) = drain::channel();
        tokio::spawn(broadcaster.run(shutdown));
        Harness {
            bus,
            registry,
            metrics: metrics.broadcaster,
            signal,
        }
    }

    fn connect(registry: &ProxyRegistry, id: &str, capacity: usize) -> mpsc::Receiver<Message> {
        let cn = CommonName::new(format!("{id}.bookstore.default.cluster.local"));
        let (proxy, rx) = Proxy::new(cn, None, capacity);
        registry.register_proxy(proxy);
        rx
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fans_out_to_every_proxy() {
        let h = spawn_broadcaster(None);
        let mut a = connect(&h.registry, "a", 4);
        let mut b = connect(&h.registry, "b", 4);

        h.bus.publish(Message::new(Kind::ProxyBroadcast));
        assert_eq!(a.recv().await.unwrap().kind, Kind::ProxyBroadcast);
        assert_eq!(b.recv().await.unwrap().kind, Kind::ProxyBroadcast);
        assert_eq!(h.metrics.delivered.get(), 2);

        h.signal.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_proxy_queue_drops_without_blocking() {
        let h = spawn_broadcaster(None);
        let mut slow = connect(&h.registry, "slow", 1);
        let mut fast = connect(&h.registry, "fast", 8);

        for _ in 0..3 {
            h.bus.publish(Message::new(Kind::ProxyBroadcast));
            settle().await;
            time::sleep(UPDATE_AT_MOST_EVERY).await;
        }

        for _ in 0..3 {
            assert_eq!(fast.recv().await.unwrap().kind, Kind::ProxyBroadcast);
        }
        assert_eq!(slow.recv().await.unwrap().kind, Kind::ProxyBroadcast);
        assert!(slow.try_recv().is_err());
        assert_eq!(h.metrics.delivered.get(), 4);
        assert_eq!(h.metrics.dropped.get(), 2);

        h.signal.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_absorbs_bursts() {
        let h = spawn_broadcaster(None);
        let mut rx = connect(&h.registry, "a", 8);

        h.bus.publish(Message::new(Kind::ProxyBroadcast));
        settle().await;
        time::sleep(Duration::from_secs(1)).await;
        h.bus.publish(Message::new(Kind::CertificateRotated));
        settle().await;

        assert_eq!(rx.recv().await.unwrap().kind, Kind::ProxyBroadcast);
        assert!(rx.try_recv().is_err());
        assert_eq!(h.metrics.absorbed.get(), 1);

        time::sleep(UPDATE_AT_MOST_EVERY).await;
        h.bus.publish(Message::new(Kind::CertificateRotated));
        assert_eq!(rx.recv().await.unwrap().kind, Kind::CertificateRotated);

        h.signal.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn merges_extra_sources() {
        let (ticks, source) = mpsc::unbounded_channel();
        let h = spawn_broadcaster(Some(source));
        let mut rx = connect(&h.registry, "a", 8);

        ticks.send(Message::new(Kind::ProxyResync)).unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, Kind::ProxyResync);

        h.signal.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_sources_close() {
        let metrics = CatalogMetrics::default();
        let bus = EventBus::new();
        let registry = Arc::new(ProxyRegistry::new(&metrics));
        let broadcaster = Broadcaster::new(&bus, registry, &metrics);
        let (_signal, shutdown) = drain::channel();
        let task = tokio::spawn(broadcaster.run(shutdown));
        bus.close();
        task.await.expect("broadcaster must not panic");
    }
}
