//! [`CloudApi`] backed by the `hcloud` crate.
//!
//! Every call goes through `hcloud::apis::*`. Responses are re-read into the
//! driver's own resource types through their JSON form, and 404 answers on
//! single-resource reads become `None`.

use std::fmt;

use async_trait::async_trait;
use hcloud::apis::configuration::Configuration;
use hcloud::apis::{
    actions_api, firewalls_api, images_api, locations_api, networks_api, placement_groups_api,
    primary_ips_api, server_types_api, servers_api, ssh_keys_api, volumes_api,
};
use hcloud::models;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cloud::{ApiError, CloudApi, Result};
use crate::types::{
    Action, Architecture, CreatePlacementGroupRequest, CreateServerRequest, CreateServerResponse,
    CreateSshKeyRequest, Firewall, Image, Location, Network, PlacementGroup, PrimaryIp, Server,
    ServerType, SshKey, Volume,
};

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

fn api_error<E: fmt::Debug>(endpoint: &'static str, err: hcloud::apis::Error<E>) -> ApiError {
    match err {
        hcloud::apis::Error::ResponseError(response) => {
            let status = response.status.as_u16();
            match serde_json::from_str::<ErrorEnvelope>(&response.content) {
                Ok(envelope) => ApiError::Api {
                    endpoint,
                    status,
                    code: envelope.error.code,
                    message: envelope.error.message,
                },
                Err(_) => ApiError::Api {
                    endpoint,
                    status,
                    code: "unknown".into(),
                    message: response.content,
                },
            }
        }
        other => ApiError::Request {
            endpoint,
            message: other.to_string(),
        },
    }
}

/// A single-resource read where 404 means absent.
fn found<T, E: fmt::Debug>(
    endpoint: &'static str,
    result: std::result::Result<T, hcloud::apis::Error<E>>,
) -> Result<Option<T>> {
    match result {
        Ok(resp) => Ok(Some(resp)),
        Err(e) => match api_error(endpoint, e) {
            e if e.is_not_found() => Ok(None),
            e => Err(e),
        },
    }
}

/// Hetzner Cloud provider using the `hcloud` crate.
pub struct HetznerCloud {
    config: Configuration,
    debug: bool,
}

impl HetznerCloud {
    pub fn new(token: impl Into<String>) -> Self {
        let mut config = Configuration::new();
        config.bearer_access_token = Some(token.into());
        Self {
            config,
            debug: false,
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.config.base_path_mapping.insert(
            "https://api.hetzner.cloud/v1".to_string(),
            base_path.into().trim_end_matches('/').to_string(),
        );
        self
    }

    /// Identify the calling application in the `User-Agent` header.
    pub fn with_application(mut self, name: &str, version: &str) -> Self {
        let agent = match self.config.user_agent.take() {
            Some(library) => format!("{name}/{version} {library}"),
            None => format!("{name}/{version}"),
        };
        self.config.user_agent = Some(agent);
        self
    }

    /// Log every payload at `debug` level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Re-read `model` as `T`; both sides share the API's field names.
    fn convert<M: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        model: &M,
    ) -> Result<T> {
        let value =
            serde_json::to_value(model).map_err(|source| ApiError::Decode { endpoint, source })?;
        if self.debug {
            debug!(endpoint, payload = %value, "hetzner api payload");
        }
        serde_json::from_value(value).map_err(|source| ApiError::Decode { endpoint, source })
    }

    fn first<M: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        models: &[M],
    ) -> Result<Option<T>> {
        self.convert(endpoint, &models.first())
    }
}

#[async_trait]
impl CloudApi for HetznerCloud {
    // ── Catalog ──────────────────────────────────────────────────────

    async fn server_type_by_name(&self, name: &str) -> Result<Option<ServerType>> {
        const ENDPOINT: &str = "list server types";
        let resp = server_types_api::list_server_types(
            &self.config,
            server_types_api::ListServerTypesParams {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.first(ENDPOINT, &resp.server_types)
    }

    async fn image_by_id(&self, id: i64) -> Result<Option<Image>> {
        const ENDPOINT: &str = "get image";
        let resp =
            images_api::get_image(&self.config, images_api::GetImageParams { id }).await;
        match found(ENDPOINT, resp)? {
            Some(resp) => self.convert(ENDPOINT, &resp.image),
            None => Ok(None),
        }
    }

    async fn image_by_name_and_architecture(
        &self,
        name: &str,
        architecture: Architecture,
    ) -> Result<Option<Image>> {
        const ENDPOINT: &str = "list images";
        let resp = images_api::list_images(
            &self.config,
            images_api::ListImagesParams {
                name: Some(name.to_string()),
                include_deprecated: Some(true),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        let images: Vec<Image> = self.convert(ENDPOINT, &resp.images)?;
        Ok(images
            .into_iter()
            .find(|image| image.architecture == architecture))
    }

    async fn location_by_name(&self, name: &str) -> Result<Option<Location>> {
        const ENDPOINT: &str = "list locations";
        let resp = locations_api::list_locations(
            &self.config,
            locations_api::ListLocationsParams {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.first(ENDPOINT, &resp.locations)
    }

    // ── SSH keys ─────────────────────────────────────────────────────

    async fn ssh_key_by_id(&self, id: i64) -> Result<Option<SshKey>> {
        const ENDPOINT: &str = "get ssh key";
        let resp =
            ssh_keys_api::get_ssh_key(&self.config, ssh_keys_api::GetSshKeyParams { id }).await;
        match found(ENDPOINT, resp)? {
            Some(resp) => self.convert(ENDPOINT, &resp.ssh_key),
            None => Ok(None),
        }
    }

    async fn ssh_key_by_fingerprint(&self, fingerprint: &str) -> Result<Option<SshKey>> {
        const ENDPOINT: &str = "list ssh keys";
        let resp = ssh_keys_api::list_ssh_keys(
            &self.config,
            ssh_keys_api::ListSshKeysParams {
                fingerprint: Some(fingerprint.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.first(ENDPOINT, &resp.ssh_keys)
    }

    async fn create_ssh_key(&self, req: &CreateSshKeyRequest) -> Result<SshKey> {
        const ENDPOINT: &str = "create ssh key";
        let resp = ssh_keys_api::create_ssh_key(
            &self.config,
            ssh_keys_api::CreateSshKeyParams {
                create_ssh_key_request: self.convert(ENDPOINT, req)?,
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.convert(ENDPOINT, &resp.ssh_key)
    }

    async fn delete_ssh_key(&self, id: i64) -> Result<()> {
        ssh_keys_api::delete_ssh_key(&self.config, ssh_keys_api::DeleteSshKeyParams { id })
            .await
            .map_err(|e| api_error("delete ssh key", e))?;
        Ok(())
    }

    // ── Placement groups ─────────────────────────────────────────────

    async fn placement_group(&self, id_or_name: &str) -> Result<Option<PlacementGroup>> {
        const ENDPOINT: &str = "get placement group";
        if let Ok(id) = id_or_name.parse::<i64>() {
            let resp = placement_groups_api::get_placementgroup(
                &self.config,
                placement_groups_api::GetPlacementgroupParams { id },
            )
            .await;
            if let Some(resp) = found(ENDPOINT, resp)? {
                return self.convert(ENDPOINT, &resp.placement_group);
            }
        }

        let resp = placement_groups_api::list_placement_groups(
            &self.config,
            placement_groups_api::ListPlacementGroupsParams {
                name: Some(id_or_name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.first(ENDPOINT, &resp.placement_groups)
    }

    async fn placement_groups_by_label(&self, label_selector: &str) -> Result<Vec<PlacementGroup>> {
        const ENDPOINT: &str = "list placement groups";
        let resp = placement_groups_api::list_placement_groups(
            &self.config,
            placement_groups_api::ListPlacementGroupsParams {
                label_selector: Some(label_selector.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.convert(ENDPOINT, &resp.placement_groups)
    }

    async fn create_placement_group(
        &self,
        req: &CreatePlacementGroupRequest,
    ) -> Result<PlacementGroup> {
        const ENDPOINT: &str = "create placement group";
        let resp = placement_groups_api::create_placementgroup(
            &self.config,
            placement_groups_api::CreatePlacementgroupParams {
                create_placementgroup_request: self.convert(ENDPOINT, req)?,
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.convert(ENDPOINT, &resp.placement_group)
    }

    async fn delete_placement_group(&self, id: i64) -> Result<()> {
        placement_groups_api::delete_placementgroup(
            &self.config,
            placement_groups_api::DeletePlacementgroupParams { id },
        )
        .await
        .map_err(|e| api_error("delete placement group", e))?;
        Ok(())
    }

    // ── Attachable resources ─────────────────────────────────────────

    async fn network(&self, id_or_name: &str) -> Result<Option<Network>> {
        const ENDPOINT: &str = "get network";
        if let Ok(id) = id_or_name.parse::<i64>() {
            let resp =
                networks_api::get_network(&self.config, networks_api::GetNetworkParams { id })
                    .await;
            if let Some(resp) = found(ENDPOINT, resp)? {
                return self.convert(ENDPOINT, &resp.network);
            }
        }

        let resp = networks_api::list_networks(
            &self.config,
            networks_api::ListNetworksParams {
                name: Some(id_or_name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.first(ENDPOINT, &resp.networks)
    }

    async fn firewall(&self, id_or_name: &str) -> Result<Option<Firewall>> {
        const ENDPOINT: &str = "get firewall";
        if let Ok(id) = id_or_name.parse::<i64>() {
            let resp =
                firewalls_api::get_firewall(&self.config, firewalls_api::GetFirewallParams { id })
                    .await;
            if let Some(resp) = found(ENDPOINT, resp)? {
                return self.convert(ENDPOINT, &resp.firewall);
            }
        }

        let resp = firewalls_api::list_firewalls(
            &self.config,
            firewalls_api::ListFirewallsParams {
                name: Some(id_or_name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.first(ENDPOINT, &resp.firewalls)
    }

    async fn volume(&self, id_or_name: &str) -> Result<Option<Volume>> {
        const ENDPOINT: &str = "get volume";
        if let Ok(id) = id_or_name.parse::<i64>() {
            let resp =
                volumes_api::get_volume(&self.config, volumes_api::GetVolumeParams { id }).await;
            if let Some(resp) = found(ENDPOINT, resp)? {
                return self.convert(ENDPOINT, &resp.volume);
            }
        }

        let resp = volumes_api::list_volumes(
            &self.config,
            volumes_api::ListVolumesParams {
                name: Some(id_or_name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.first(ENDPOINT, &resp.volumes)
    }

    async fn primary_ip(&self, id_or_name: &str) -> Result<Option<PrimaryIp>> {
        const ENDPOINT: &str = "get primary ip";
        if let Ok(id) = id_or_name.parse::<i64>() {
            let resp = primary_ips_api::get_primary_ip(
                &self.config,
                primary_ips_api::GetPrimaryIpParams { id },
            )
            .await;
            if let Some(resp) = found(ENDPOINT, resp)? {
                return self.convert(ENDPOINT, &resp.primary_ip);
            }
        }

        let resp = primary_ips_api::list_primary_ips(
            &self.config,
            primary_ips_api::ListPrimaryIpsParams {
                name: Some(id_or_name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.first(ENDPOINT, &resp.primary_ips)
    }

    async fn primary_ip_by_address(&self, ip: &str) -> Result<Option<PrimaryIp>> {
        const ENDPOINT: &str = "list primary ips";
        let resp = primary_ips_api::list_primary_ips(
            &self.config,
            primary_ips_api::ListPrimaryIpsParams {
                ip: Some(ip.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.first(ENDPOINT, &resp.primary_ips)
    }

    // ── Servers ──────────────────────────────────────────────────────

    async fn create_server(&self, req: &CreateServerRequest) -> Result<CreateServerResponse> {
        const ENDPOINT: &str = "create server";
        let firewalls = (!req.firewalls.is_empty()).then(|| {
            req.firewalls
                .iter()
                .map(|fw| models::CreateServerRequestFirewalls {
                    firewall: fw.firewall,
                })
                .collect()
        });
        let public_net = match &req.public_net {
            Some(net) => Some(self.convert(ENDPOINT, net)?),
            None => None,
        };

        let resp = servers_api::create_server(
            &self.config,
            servers_api::CreateServerParams {
                create_server_request: models::CreateServerRequest {
                    name: req.name.clone(),
                    server_type: req.server_type.clone(),
                    image: req.image.clone(),
                    location: req.location.clone(),
                    user_data: req.user_data.clone(),
                    networks: (!req.networks.is_empty()).then(|| req.networks.clone()),
                    firewalls,
                    ssh_keys: Some(req.ssh_keys.iter().map(ToString::to_string).collect()),
                    volumes: (!req.volumes.is_empty()).then(|| req.volumes.clone()),
                    start_after_create: Some(true),
                    automount: None,
                    datacenter: None,
                    labels: (!req.labels.is_empty()).then(|| req.labels.clone()),
                    placement_group: req.placement_group,
                    public_net,
                },
            },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;

        Ok(CreateServerResponse {
            server: self.convert(ENDPOINT, &resp.server)?,
            action: self.convert(ENDPOINT, &resp.action)?,
            next_actions: self.convert(ENDPOINT, &resp.next_actions)?,
        })
    }

    async fn server(&self, id: i64) -> Result<Option<Server>> {
        const ENDPOINT: &str = "get server";
        let resp = servers_api::get_server(&self.config, servers_api::GetServerParams { id }).await;
        match found(ENDPOINT, resp)? {
            Some(resp) => self.convert(ENDPOINT, &resp.server),
            None => Ok(None),
        }
    }

    /// Delete a server, returning the action tracking the deletion.
    async fn delete_server(&self, id: i64) -> Result<Action> {
        const ENDPOINT: &str = "delete server";
        let resp =
            servers_api::delete_server(&self.config, servers_api::DeleteServerParams { id })
                .await
                .map_err(|e| api_error(ENDPOINT, e))?;
        self.convert(ENDPOINT, &resp.action)
    }

    async fn power_on(&self, id: i64) -> Result<Action> {
        const ENDPOINT: &str = "power on server";
        let resp =
            servers_api::power_on_server(&self.config, servers_api::PowerOnServerParams { id })
                .await
                .map_err(|e| api_error(ENDPOINT, e))?;
        self.convert(ENDPOINT, &resp.action)
    }

    async fn power_off(&self, id: i64) -> Result<Action> {
        const ENDPOINT: &str = "power off server";
        let resp =
            servers_api::power_off_server(&self.config, servers_api::PowerOffServerParams { id })
                .await
                .map_err(|e| api_error(ENDPOINT, e))?;
        self.convert(ENDPOINT, &resp.action)
    }

    async fn shutdown(&self, id: i64) -> Result<Action> {
        const ENDPOINT: &str = "shutdown server";
        let resp =
            servers_api::shutdown_server(&self.config, servers_api::ShutdownServerParams { id })
                .await
                .map_err(|e| api_error(ENDPOINT, e))?;
        self.convert(ENDPOINT, &resp.action)
    }

    async fn reboot(&self, id: i64) -> Result<Action> {
        const ENDPOINT: &str = "reboot server";
        let resp = servers_api::soft_reboot_server(
            &self.config,
            servers_api::SoftRebootServerParams { id },
        )
        .await
        .map_err(|e| api_error(ENDPOINT, e))?;
        self.convert(ENDPOINT, &resp.action)
    }

    // ── Actions ──────────────────────────────────────────────────────

    async fn action(&self, id: i64) -> Result<Action> {
        const ENDPOINT: &str = "get action";
        let resp = actions_api::get_action(&self.config, actions_api::GetActionParams { id })
            .await
            .map_err(|e| api_error(ENDPOINT, e))?;
        self.convert(ENDPOINT, &resp.action)
    }
}
