use std::{net::IpAddr, num::NonZeroU16};

/// A resolvable backend instance of a service.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: NonZeroU16,

    /// Zero for endpoints in the local cluster. Remote endpoints carry a
    /// non-zero weight and are load balanced by locality.
    pub weight: u32,
    pub priority: u32,
    pub zone: Option<String>,
}

impl Endpoint {
    pub fn local(ip: IpAddr, port: NonZeroU16) -> Self {
        Self {
            ip,
            port,
            weight: 0,
            priority: 0,
            zone: None,
        }
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        self.weight == 0
    }
}
