//! Host networks and DHCP range derivation.
//!
//! A [`Network`] describes how instances attach to the host: host-only,
//! shared (NAT) or bridged onto a physical interface. DHCP bounds are
//! derived once at creation and stored as concrete addresses.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::errors::{VmhostError, VmhostResult};
use crate::repo::Entity;

/// Usable host addresses reserved ahead of the DHCP pool (gateway and host).
const RESERVED_LEADING_HOSTS: u32 = 2;

/// Local network attachment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Host,
    Shared,
    Bridged,
}

impl NetworkKind {
    pub const ALL: [NetworkKind; 3] = [
        NetworkKind::Host,
        NetworkKind::Shared,
        NetworkKind::Bridged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::Host => "host",
            NetworkKind::Shared => "shared",
            NetworkKind::Bridged => "bridged",
        }
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkKind {
    type Err = VmhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(NetworkKind::Host),
            "shared" => Ok(NetworkKind::Shared),
            "bridged" => Ok(NetworkKind::Bridged),
            other => Err(VmhostError::UnsupportedConfiguration(format!(
                "unknown network kind '{}'",
                other
            ))),
        }
    }
}

/// Input for [`Network::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub kind: NetworkKind,
    /// e.g. `10.0.0.0/24`
    pub cidr: String,
    pub gateway: Ipv4Addr,
    pub dhcp_start: Option<Ipv4Addr>,
    pub dhcp_end: Option<Ipv4Addr>,
    /// Host interface for bridged networks (e.g. `en0`).
    pub bridge_interface: Option<String>,
}

impl NetworkSpec {
    pub fn new(
        name: impl Into<String>,
        kind: NetworkKind,
        cidr: impl Into<String>,
        gateway: Ipv4Addr,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            cidr: cidr.into(),
            gateway,
            dhcp_start: None,
            dhcp_end: None,
            bridge_interface: None,
        }
    }

    pub fn with_dhcp_range(mut self, start: Ipv4Addr, end: Ipv4Addr) -> Self {
        self.dhcp_start = Some(start);
        self.dhcp_end = Some(end);
        self
    }

    pub fn with_bridge_interface(mut self, interface: impl Into<String>) -> Self {
        self.bridge_interface = Some(interface.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub kind: NetworkKind,
    pub cidr: Ipv4Net,
    pub gateway: Ipv4Addr,
    pub dhcp_start: Ipv4Addr,
    pub dhcp_end: Ipv4Addr,
    pub bridge_interface: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Network {
    const KIND: &'static str = "network";

    fn uid(&self) -> &str {
        &self.id
    }
}

impl Network {
    /// Build a network, deriving the DHCP range when not fully supplied.
    ///
    /// The gateway is taken as given and not checked against the range.
    pub fn create(spec: NetworkSpec) -> VmhostResult<Self> {
        let cidr = parse_cidr(&spec.cidr)?;
        let (dhcp_start, dhcp_end) = match (spec.dhcp_start, spec.dhcp_end) {
            (Some(start), Some(end)) => (start, end),
            _ => derive_dhcp_range(&cidr)?,
        };

        tracing::debug!(
            name = %spec.name,
            kind = %spec.kind,
            cidr = %cidr,
            dhcp_start = %dhcp_start,
            dhcp_end = %dhcp_end,
            "Provisioned network parameters"
        );

        Ok(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: spec.name,
            kind: spec.kind,
            cidr,
            gateway: spec.gateway,
            dhcp_start,
            dhcp_end,
            bridge_interface: spec.bridge_interface,
            created_at: Utc::now(),
        })
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.cidr.netmask()
    }
}

/// Parse a CIDR block, normalizing host bits away (`10.0.0.7/24` → `10.0.0.0/24`).
pub fn parse_cidr(cidr: &str) -> VmhostResult<Ipv4Net> {
    cidr.trim()
        .parse::<Ipv4Net>()
        .map(|net| net.trunc())
        .map_err(|e| VmhostError::InvalidNetwork(format!("malformed CIDR '{}': {}", cidr, e)))
}

/// DHCP pool for a CIDR: third usable host through last usable host.
///
/// Network and broadcast addresses are never usable. Blocks with fewer
/// than three usable hosts are rejected.
pub fn derive_dhcp_range(cidr: &Ipv4Net) -> VmhostResult<(Ipv4Addr, Ipv4Addr)> {
    let network = u32::from(cidr.network());
    let broadcast = u32::from(cidr.broadcast());

    // Usable: network+1 ..= broadcast-1
    let usable = broadcast.saturating_sub(network).saturating_sub(1);
    if usable < RESERVED_LEADING_HOSTS + 1 {
        return Err(VmhostError::InvalidNetwork(format!(
            "{} has {} usable host address(es), need at least {}",
            cidr,
            usable,
            RESERVED_LEADING_HOSTS + 1
        )));
    }

    let first_usable = network + 1;
    let start = first_usable + RESERVED_LEADING_HOSTS;
    let end = broadcast - 1;
    Ok((Ipv4Addr::from(start), Ipv4Addr::from(end)))
}
