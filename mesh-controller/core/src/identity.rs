use std::fmt;

/// The principal that matches any downstream identity.
pub const WILDCARD: &str = "*";

/// A workload principal in `<service-account>.<namespace>` form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceIdentity(String);

/// A Kubernetes service account.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct K8sServiceAccount {
    pub namespace: String,
    pub name: String,
}

// === impl ServiceIdentity ===

impl ServiceIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn wildcard() -> Self {
        Self(WILDCARD.to_string())
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the identity into its service account and namespace. Returns
    /// `None` for the wildcard and for identities without a namespace.
    pub fn to_service_account(&self) -> Option<K8sServiceAccount> {
        let (name, namespace) = self.0.split_once('.')?;
        if name.is_empty() || namespace.is_empty() {
            return None;
        }
        Some(K8sServiceAccount::new(namespace, name))
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&K8sServiceAccount> for ServiceIdentity {
    fn from(sa: &K8sServiceAccount) -> Self {
        sa.to_service_identity()
    }
}

// === impl K8sServiceAccount ===

impl K8sServiceAccount {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn to_service_identity(&self) -> ServiceIdentity {
        ServiceIdentity(format!("{}.{}", self.name, self.namespace))
    }
}

impl fmt::Display for K8sServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_account_round_trip() {
        let sa = K8sServiceAccount::new("default", "bookbuyer");
        let id = sa.to_service_identity();
        assert_eq!(id.as_str(), "bookbuyer.default");
        assert_eq!(id.to_service_account(), Some(sa));
    }

    #[test]
    fn wildcard_has_no_service_account() {
        assert!(ServiceIdentity::wildcard().is_wildcard());
        assert_eq!(ServiceIdentity::wildcard().to_service_account(), None);
        assert_eq!(ServiceIdentity::new("bookbuyer").to_service_account(), None);
    }
}
