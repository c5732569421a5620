use async_trait::async_trait;

use crate::types::{
    Action, Architecture, CreatePlacementGroupRequest, CreateServerRequest, CreateServerResponse,
    CreateSshKeyRequest, Firewall, Image, Location, Network, PlacementGroup, PrimaryIp, Server,
    ServerType, SshKey, Volume,
};

pub const NOT_FOUND: u16 = 404;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("hetzner api {endpoint} failed: {message}")]
    Request {
        endpoint: &'static str,
        message: String,
    },

    #[error("hetzner api {endpoint} returned {status}: {code}: {message}")]
    Api {
        endpoint: &'static str,
        status: u16,
        code: String,
        message: String,
    },

    #[error("hetzner api {endpoint} returned a malformed response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request { .. } | Self::Decode { .. } => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// The provider operations the driver depends on.
///
/// Lookups return `Ok(None)` when the provider answered but nothing matched;
/// transport and API failures are `Err`.
#[async_trait]
pub trait CloudApi: Send + Sync + 'static {
    async fn server_type_by_name(&self, name: &str) -> Result<Option<ServerType>>;

    async fn image_by_id(&self, id: i64) -> Result<Option<Image>>;

    async fn image_by_name_and_architecture(
        &self,
        name: &str,
        architecture: Architecture,
    ) -> Result<Option<Image>>;

    async fn location_by_name(&self, name: &str) -> Result<Option<Location>>;

    async fn ssh_key_by_id(&self, id: i64) -> Result<Option<SshKey>>;

    async fn ssh_key_by_fingerprint(&self, fingerprint: &str) -> Result<Option<SshKey>>;

    async fn create_ssh_key(&self, req: &CreateSshKeyRequest) -> Result<SshKey>;

    async fn delete_ssh_key(&self, id: i64) -> Result<()>;

    async fn placement_group(&self, id_or_name: &str) -> Result<Option<PlacementGroup>>;

    async fn placement_groups_by_label(&self, label_selector: &str) -> Result<Vec<PlacementGroup>>;

    async fn create_placement_group(&self, req: &CreatePlacementGroupRequest)
    -> Result<PlacementGroup>;

    async fn delete_placement_group(&self, id: i64) -> Result<()>;

    async fn network(&self, id_or_name: &str) -> Result<Option<Network>>;

    async fn firewall(&self, id_or_name: &str) -> Result<Option<Firewall>>;

    async fn volume(&self, id_or_name: &str) -> Result<Option<Volume>>;

    async fn primary_ip(&self, id_or_name: &str) -> Result<Option<PrimaryIp>>;

    async fn primary_ip_by_address(&self, ip: &str) -> Result<Option<PrimaryIp>>;

    async fn create_server(&self, req: &CreateServerRequest) -> Result<CreateServerResponse>;

    async fn server(&self, id: i64) -> Result<Option<Server>>;

    async fn delete_server(&self, id: i64) -> Result<Action>;

    async fn power_on(&self, id: i64) -> Result<Action>;

    async fn power_off(&self, id: i64) -> Result<Action>;

    async fn shutdown(&self, id: i64) -> Result<Action>;

    async fn reboot(&self, id: i64) -> Result<Action>;

    async fn action(&self, id: i64) -> Result<Action>;
}
