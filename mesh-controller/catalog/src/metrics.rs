use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Metrics for the catalog's background loops and proxy registry.
///
/// Default values are not registered anywhere; they are useful in tests.
#[derive(Clone, Debug, Default)]
pub struct CatalogMetrics {
    pub(crate) dispatcher: DispatcherMetrics,
    pub(crate) broadcaster: BroadcasterMetrics,
    pub(crate) ticker: TickerMetrics,
    pub(crate) registry: RegistryMetrics,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct DispatcherMetrics {
    broadcasts: Family<DeadlineLabels, Counter>,
    ignored: Counter,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct BroadcasterMetrics {
    pub(crate) delivered: Counter,
    pub(crate) dropped: Counter,
    pub(crate) absorbed: Counter,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct TickerMetrics {
    pub(crate) ticks: Counter,
    pub(crate) invalid_intervals: Counter,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct RegistryMetrics {
    proxies: Family<StateLabels, Gauge>,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum Deadline {
    Moving,
    Max,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum ProxyState {
    Expected,
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DeadlineLabels {
    deadline: Deadline,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StateLabels {
    state: ProxyState,
}

// === impl CatalogMetrics ===

impl CatalogMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        let dispatcher = reg.sub_registry_with_prefix("dispatcher");
        dispatcher.register(
            "broadcasts",
            "Count of coalesced proxy broadcasts, by the deadline that fired",
            metrics.dispatcher.broadcasts.clone(),
        );
        dispatcher.register(
            "ignored_updates",
            "Count of update announcements dropped because nothing changed",
            metrics.dispatcher.ignored.clone(),
        );

        let broadcaster = reg.sub_registry_with_prefix("broadcaster");
        broadcaster.register(
            "delivered",
            "Count of announcements delivered to proxies",
            metrics.broadcaster.delivered.clone(),
        );
        broadcaster.register(
            "dropped",
            "Count of announcements dropped because a proxy's queue was full",
            metrics.broadcaster.dropped.clone(),
        );
        broadcaster.register(
            "absorbed",
            "Count of announcements absorbed by the broadcast rate limit",
            metrics.broadcaster.absorbed.clone(),
        );

        let ticker = reg.sub_registry_with_prefix("resync_ticker");
        ticker.register(
            "ticks",
            "Count of periodic proxy resyncs",
            metrics.ticker.ticks.clone(),
        );
        ticker.register(
            "invalid_intervals",
            "Count of configured resync intervals rejected as too short",
            metrics.ticker.invalid_intervals.clone(),
        );

        reg.register(
            "proxies",
            "Number of proxies known to the registry, by state",
            metrics.registry.proxies.clone(),
        );

        metrics
    }
}

// === impl DispatcherMetrics ===

impl DispatcherMetrics {
    pub(crate) fn broadcast(&self, deadline: Deadline) {
        self.broadcasts
            .get_or_create(&DeadlineLabels { deadline })
            .inc();
    }

    pub(crate) fn ignored(&self) {
        self.ignored.inc();
    }

    #[cfg(test)]
    pub(crate) fn broadcasts(&self, deadline: Deadline) -> u64 {
        self.broadcasts
            .get_or_create(&DeadlineLabels { deadline })
            .get()
    }
}

// === impl RegistryMetrics ===

impl RegistryMetrics {
    pub(crate) fn set(&self, state: ProxyState, count: usize) {
        self.proxies
            .get_or_create(&StateLabels { state })
            .set(count as i64);
    }
}
