/// A non-fatal problem found while computing a policy.
///
/// The offending input is skipped and the rest of the policy is still built.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PolicyWarning {
    #[error("unsupported {field} kind {kind} in {resource}")]
    UnsupportedKind {
        resource: String,
        field: &'static str,
        kind: String,
    },

    #[error("{resource} names a destination in another namespace: {namespace}")]
    CrossNamespaceDestination { resource: String, namespace: String },

    #[error("{resource} references unknown {kind} {name}")]
    UnknownReference {
        resource: String,
        kind: String,
        name: String,
    },

    #[error("found {count} traffic splits for apex service {apex}; using the first")]
    MultipleTrafficSplits { apex: String, count: usize },

    #[error("target port of {0} is unknown")]
    MissingTargetPort(String),

    #[error("no endpoints found for {0}")]
    NoEndpoints(String),

    #[error("UpstreamTrafficSetting {reference} referenced by {resource} was not found")]
    UpstreamTrafficSettingNotFound { resource: String, reference: String },

    #[error("HTTPS port {port} of {resource} has no hosts to match server names on")]
    MissingServerNames { resource: String, port: u16 },

    #[error("invalid IP range {value} in {resource}")]
    InvalidIpRange { resource: String, value: String },

    #[error("{provider} provider failed: {error}")]
    ProviderFailure { provider: String, error: String },

    #[error("invalid service identity {0}")]
    InvalidServiceIdentity(String),

    #[error("{0}")]
    ConflictingRoute(#[from] crate::outbound::ConflictingRoute),
}

/// A computed value along with the warnings raised while computing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report<T> {
    pub value: T,
    pub warnings: Vec<PolicyWarning>,
}

// === impl Report ===

impl<T> Report<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    /// Records (and logs) a warning.
    pub fn warn(&mut self, warning: PolicyWarning) {
        tracing::warn!(%warning);
        self.warnings.push(warning);
    }

    /// Folds another report's warnings into this one, returning its value.
    pub fn absorb<U>(&mut self, other: Report<U>) -> U {
        self.warnings.extend(other.warnings);
        other.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Report<U> {
        Report {
            value: f(self.value),
            warnings: self.warnings,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Default> Default for Report<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
