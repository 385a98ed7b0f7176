use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Splits traffic addressed to an apex (root) service across weighted
/// backend services.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "split.smi-spec.io",
    version = "v1alpha2",
    kind = "TrafficSplit",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSplitSpec {
    /// The apex service's hostname. Only the first DNS label is significant;
    /// `bookstore`, `bookstore.default` and `bookstore.default.svc` all name
    /// the `bookstore` service in the split's namespace.
    pub service: String,

    #[serde(default)]
    pub backends: Vec<TrafficSplitBackend>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSplitBackend {
    pub service: String,
    pub weight: u32,
}

impl TrafficSplitSpec {
    /// The apex service name, without any domain suffix.
    pub fn apex_service_name(&self) -> &str {
        self.service
            .split('.')
            .next()
            .unwrap_or(self.service.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apex_service_name_strips_domain() {
        for (service, expected) in [
            ("bookstore", "bookstore"),
            ("bookstore.default", "bookstore"),
            ("bookstore.default.svc.cluster.local", "bookstore"),
        ] {
            let spec = TrafficSplitSpec {
                service: service.to_string(),
                backends: vec![],
            };
            assert_eq!(spec.apex_service_name(), expected, "{service}");
        }
    }
}
