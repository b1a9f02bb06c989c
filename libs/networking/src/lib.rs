//! Networking utilities for VM recovery.
//!
//! This library provides helpers for:
//! - Parsing the serialized network descriptor of an instance into a typed
//!   `NetworkAttachment` (port id + MAC address)
//! - Naming the host-side VIF devices (bridge, veth pair) of a port
//! - Building the ordered, typed list of link operations that reconstitutes
//!   a VM's network path on a host
//!
//! Nothing here executes commands. Callers render `LinkOp`s for whatever
//! tooling the host provides.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use revive_id::{InstanceUuid, PortId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Networking errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid MAC address.
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// The attachment descriptor cannot be turned into a port id and MAC.
    #[error("malformed network attachment: {0}")]
    MalformedAttachment(String),
}

// ============================================================================
// MAC addresses
// ============================================================================

/// An Ethernet MAC address in colon-separated lowercase hex form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacAddress(String);

impl MacAddress {
    /// Length of the textual form (`aa:bb:cc:dd:ee:ff`).
    pub const TEXT_LEN: usize = 17;

    /// Parse a MAC address.
    pub fn parse(s: &str) -> Result<Self, NetworkError> {
        if s.len() != Self::TEXT_LEN {
            return Err(NetworkError::InvalidMac(s.to_string()));
        }

        let octets: Vec<&str> = s.split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(NetworkError::InvalidMac(s.to_string()));
        }

        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Returns the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddress {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MacAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Network attachment
// ============================================================================

static ADDRESS_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""address"\s*:\s*"([^"]*)""#).expect("address pattern is valid")
});

static ID_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""id"\s*:\s*"([^"]*)""#).expect("id pattern is valid"));

/// The port and MAC a VM is attached to the network through.
///
/// Both values are fixed once parsed; there are no setters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    port_id: PortId,
    mac_address: MacAddress,
}

impl NetworkAttachment {
    /// Create an attachment from already validated parts.
    pub fn new(port_id: PortId, mac_address: MacAddress) -> Self {
        Self {
            port_id,
            mac_address,
        }
    }

    /// Parse the serialized network descriptor stored for an instance.
    ///
    /// The descriptor is normally a JSON list of VIF records; the first
    /// record carrying both `id` and `address` is the primary attachment.
    /// Descriptors that are not valid JSON go through a key scan that takes
    /// the last `"address"` and `"id"` string values. Partial data is never
    /// accepted.
    pub fn parse(descriptor: &str) -> Result<Self, NetworkError> {
        match serde_json::from_str::<serde_json::Value>(descriptor) {
            Ok(value) => Self::from_json(&value),
            Err(_) => Self::scan(descriptor),
        }
    }

    fn from_json(value: &serde_json::Value) -> Result<Self, NetworkError> {
        let vifs: Vec<&serde_json::Value> = match value {
            serde_json::Value::Array(items) => items.iter().collect(),
            serde_json::Value::Object(_) => vec![value],
            _ => {
                return Err(NetworkError::MalformedAttachment(
                    "descriptor is neither a VIF list nor a VIF record".to_string(),
                ))
            }
        };

        let primary = vifs.into_iter().find_map(|vif| {
            let id = vif.get("id")?.as_str()?;
            let address = vif.get("address")?.as_str()?;
            Some((id, address))
        });

        let Some((id, address)) = primary else {
            return Err(NetworkError::MalformedAttachment(
                "no VIF record with both id and address".to_string(),
            ));
        };

        Self::from_parts(id, address)
    }

    fn scan(descriptor: &str) -> Result<Self, NetworkError> {
        let last_value = |re: &Regex, key: &str| {
            re.captures_iter(descriptor)
                .last()
                .and_then(|c| c.get(1))
                .map(|m| m.as_str())
                .ok_or_else(|| NetworkError::MalformedAttachment(format!("missing {key}")))
        };

        let address = last_value(&ADDRESS_KEY, "address")?;
        let id = last_value(&ID_KEY, "id")?;
        Self::from_parts(id, address)
    }

    fn from_parts(id: &str, address: &str) -> Result<Self, NetworkError> {
        let port_id = PortId::parse(id)
            .map_err(|e| NetworkError::MalformedAttachment(format!("port id: {e}")))?;
        let mac_address = MacAddress::parse(address)
            .map_err(|e| NetworkError::MalformedAttachment(format!("address: {e}")))?;
        Ok(Self::new(port_id, mac_address))
    }

    /// Network port id.
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// MAC address of the VM's interface.
    pub fn mac_address(&self) -> &MacAddress {
        &self.mac_address
    }
}

// ============================================================================
// VIF devices
// ============================================================================

/// Number of port id characters used in device names.
///
/// Three-letter prefix plus 11 characters stays within IFNAMSIZ - 1.
pub const DEVICE_SUFFIX_LEN: usize = 11;

/// Host-side device names for one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VifDevices {
    /// Per-VM Linux bridge (`qbr…`).
    pub bridge: String,
    /// Bridge end of the veth pair (`qvb…`).
    pub bridge_veth: String,
    /// Switch end of the veth pair (`qvo…`).
    pub switch_veth: String,
}

impl VifDevices {
    /// Derive device names from a port id.
    pub fn for_port(port_id: &PortId) -> Self {
        let suffix = port_id.short(DEVICE_SUFFIX_LEN);
        Self {
            bridge: format!("qbr{suffix}"),
            bridge_veth: format!("qvb{suffix}"),
            switch_veth: format!("qvo{suffix}"),
        }
    }
}

/// A single typed host networking operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    /// Create a Linux bridge.
    CreateBridge { bridge: String },
    /// Create a veth pair.
    CreateVethPair { name: String, peer: String },
    /// Bring a link up.
    SetLinkUp { device: String },
    /// Put a link in promiscuous mode.
    SetPromiscuous { device: String },
    /// Enslave a device to a Linux bridge.
    AddBridgePort { bridge: String, device: String },
    /// Attach a device to the integration virtual switch, tagging it with
    /// the port, MAC and VM it belongs to. Already-present ports are kept.
    AttachSwitchPort {
        switch: String,
        device: String,
        port_id: PortId,
        mac_address: MacAddress,
        vm_uuid: InstanceUuid,
    },
}

impl fmt::Display for LinkOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateBridge { bridge } => write!(f, "create bridge {bridge}"),
            Self::CreateVethPair { name, peer } => write!(f, "create veth {name}<->{peer}"),
            Self::SetLinkUp { device } => write!(f, "set {device} up"),
            Self::SetPromiscuous { device } => write!(f, "set {device} promisc"),
            Self::AddBridgePort { bridge, device } => write!(f, "add {device} to {bridge}"),
            Self::AttachSwitchPort { switch, device, .. } => {
                write!(f, "attach {device} to switch {switch}")
            }
        }
    }
}

/// The ordered operations that rebuild a VM's network path on a host.
#[derive(Debug, Clone)]
pub struct VifPlan {
    /// Device names used by the plan.
    pub devices: VifDevices,
    /// Operations in execution order.
    pub ops: Vec<LinkOp>,
}

impl VifPlan {
    /// Build the plan for an attachment.
    pub fn for_attachment(
        attachment: &NetworkAttachment,
        vm_uuid: InstanceUuid,
        integration_bridge: &str,
    ) -> Self {
        let devices = VifDevices::for_port(&attachment.port_id());
        let ops = vec![
            LinkOp::CreateBridge {
                bridge: devices.bridge.clone(),
            },
            LinkOp::CreateVethPair {
                name: devices.bridge_veth.clone(),
                peer: devices.switch_veth.clone(),
            },
            LinkOp::SetLinkUp {
                device: devices.bridge_veth.clone(),
            },
            LinkOp::SetLinkUp {
                device: devices.switch_veth.clone(),
            },
            LinkOp::SetPromiscuous {
                device: devices.bridge_veth.clone(),
            },
            LinkOp::SetPromiscuous {
                device: devices.switch_veth.clone(),
            },
            LinkOp::SetLinkUp {
                device: devices.bridge.clone(),
            },
            LinkOp::AddBridgePort {
                bridge: devices.bridge.clone(),
                device: devices.bridge_veth.clone(),
            },
            LinkOp::AttachSwitchPort {
                switch: integration_bridge.to_string(),
                device: devices.switch_veth.clone(),
                port_id: attachment.port_id(),
                mac_address: attachment.mac_address().clone(),
                vm_uuid,
            },
        ];

        Self { devices, ops }
    }
}

// ============================================================================
// Tests
// ============================================================================
