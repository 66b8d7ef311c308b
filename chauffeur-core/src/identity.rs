use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Who is performing a mutation. Supplied by the caller on every write;
/// authentication happens outside this workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorContext {
    pub id: String,
    pub is_privileged: bool,
    pub ip_address: Option<IpAddr>,
}

impl ActorContext {
    pub fn customer(id: impl Into<String>) -> Self {
        Self { id: id.into(), is_privileged: false, ip_address: None }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self { id: id.into(), is_privileged: true, ip_address: None }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }
}
