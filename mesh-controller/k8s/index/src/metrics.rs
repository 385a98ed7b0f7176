use kube::ResourceExt;
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

/// Wraps a shared index, recording the size of each namespace's store and
/// counting the watch events applied to it.
pub struct IndexMetrics<T> {
    inner: T,
    families: Families,
}

#[derive(Clone, Default)]
struct Families {
    size: Family<NamespacedLabels, Gauge>,
    applies: Family<NamespacedLabels, Counter>,
    deletes: Family<NamespacedLabels, Counter>,
    resets: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

/// Reports the number of `R` resources held for a namespace.
pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;
}

// === impl IndexMetrics ===

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let families = Families::default();
        prom.register(
            "index_size",
            "Number of resources held in the index",
            families.size.clone(),
        );
        prom.register(
            "index_applies",
            "Count of resource updates applied to the index",
            families.applies.clone(),
        );
        prom.register(
            "index_deletes",
            "Count of resource deletions applied to the index",
            families.deletes.clone(),
        );
        prom.register(
            "index_resets",
            "Count of index resets after a watch restarted",
            families.resets.clone(),
        );
        Self { inner, families }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }
}

impl<T> IndexMetrics<Arc<RwLock<T>>> {
    fn record_size<R>(&self, namespace: String)
    where
        T: SizedIndex<R>,
        R: ResourceExt<DynamicType = ()>,
    {
        let size = self.inner.read().size(&namespace);
        self.families
            .size
            .get_or_create(&NamespacedLabels::new::<R>(namespace))
            .set(size as i64);
    }
}

impl<R, T> IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R> + IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let namespace = resource.namespace().unwrap_or_default();
        self.families
            .applies
            .get_or_create(&NamespacedLabels::new::<R>(namespace.clone()))
            .inc();
        self.inner.write().apply(resource);
        self.record_size::<R>(namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.families
            .deletes
            .get_or_create(&NamespacedLabels::new::<R>(namespace.clone()))
            .inc();
        self.inner.write().delete(namespace.clone(), name);
        self.record_size::<R>(namespace);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let mut namespaces = resources
            .iter()
            .filter_map(|r| r.namespace())
            .chain(removed.keys().cloned())
            .collect::<Vec<_>>();
        namespaces.sort();
        namespaces.dedup();

        self.families
            .resets
            .get_or_create(&KindLabels {
                kind: R::kind(&()).to_string(),
            })
            .inc();
        self.inner.write().reset(resources, removed);
        for ns in namespaces {
            self.record_size::<R>(ns);
        }
    }
}

// === impl NamespacedLabels ===

impl NamespacedLabels {
    fn new<R: ResourceExt<DynamicType = ()>>(namespace: String) -> Self {
        Self {
            namespace,
            kind: R::kind(&()).to_string(),
        }
    }
}
