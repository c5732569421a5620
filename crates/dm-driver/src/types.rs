//! The driver's view of provider resources.
//!
//! Field names follow the API models so `hcloud` responses convert by
//! re-reading them; fields the driver does not use are left out.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub type Labels = HashMap<String, String>;

// ── Catalog types ────────────────────────────────────────────────────

/// CPU architecture of server types and images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86,
    Arm,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::Arm => "arm",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86" => Ok(Self::X86),
            "arm" => Ok(Self::Arm),
            other => Err(format!("unknown architecture {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerType {
    pub id: i64,
    pub name: String,
    pub architecture: Architecture,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub name: Option<String>,
    pub architecture: Architecture,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub network_zone: String,
}

// ── SSH keys ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKey {
    pub id: i64,
    pub name: String,
    pub fingerprint: String,
    pub public_key: String,
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSshKeyRequest {
    pub name: String,
    pub public_key: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: Labels,
}

// ── Placement groups ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementGroup {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    /// IDs of the servers currently in the group.
    #[serde(default)]
    pub servers: Vec<i64>,
    #[serde(rename = "type", default = "spread")]
    pub kind: String,
}

fn spread() -> String {
    "spread".into()
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePlacementGroupRequest {
    pub name: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: Labels,
    #[serde(rename = "type")]
    pub kind: String,
}

// ── Attachable resources ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryIp {
    pub id: i64,
    pub name: String,
    pub ip: String,
    /// `ipv4` or `ipv6`.
    #[serde(rename = "type")]
    pub kind: String,
    pub assignee_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub ip_range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firewall {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub size: i64,
}

// ── Servers ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Off,
    Deleting,
    Migrating,
    Rebuilding,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub status: ServerStatus,
    #[serde(default)]
    pub public_net: PublicNet,
    #[serde(default)]
    pub private_net: Vec<PrivateNet>,
    pub placement_group: Option<PlacementGroup>,
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicNet {
    pub ipv4: Option<PublicIpv4>,
    pub ipv6: Option<PublicIpv6>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicIpv4 {
    pub ip: String,
}

/// The provider reports the assigned /64 block in CIDR notation, e.g.
/// `2001:db8:1:2::/64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicIpv6 {
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateNet {
    #[serde(default)]
    pub network: i64,
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub server_type: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub ssh_keys: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: Labels,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_group: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_net: Option<CreateServerPublicNet>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub firewalls: Vec<CreateServerFirewall>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateServerPublicNet {
    pub enable_ipv4: bool,
    pub enable_ipv6: bool,
    pub ipv4: Option<i64>,
    pub ipv6: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateServerFirewall {
    pub firewall: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateServerResponse {
    pub server: Server,
    pub action: Action,
    #[serde(default)]
    pub next_actions: Vec<Action>,
}

// ── Actions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Running,
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub command: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub progress: i32,
    pub error: Option<ActionError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    pub code: String,
    pub message: String,
}
