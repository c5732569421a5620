//! Server creation: pre-create checks, the provisioning sequence and its
//! rollback.

use std::fmt;

use tracing::{info, warn};

use crate::driver::Driver;
use crate::error::{Error, Result, ResultExt};
use crate::types::{CreateServerFirewall, CreateServerRequest};

/// Where a provisioning attempt currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProvisionStage {
    #[default]
    Idle,
    KeyPrepared,
    KeysRegistered,
    ServerRequested,
    ActionPending,
    ServerBooting,
    NetworkConfiguring,
    Ready,
    Failed,
}

impl ProvisionStage {
    /// The step that leaves this stage.
    pub fn step(self) -> &'static str {
        match self {
            Self::Idle => "preparing local ssh key",
            Self::KeyPrepared => "registering ssh keys",
            Self::KeysRegistered => "requesting server",
            Self::ServerRequested => "waiting for server creation",
            Self::ActionPending => "waiting for server to run",
            Self::ServerBooting => "configuring network access",
            Self::NetworkConfiguring => "finalizing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provisioning failed while {}", self.step())
    }
}

impl Driver {
    /// Validate everything that can be checked remotely before creating.
    ///
    /// May create the requested placement group. It is deleted again when a
    /// later check fails, or when the following [`Driver::create`] fails.
    pub async fn pre_create_check(&mut self) -> Result<()> {
        let outcome = self.check_remote_resources().await;
        if outcome.is_err() {
            self.roll_back().await;
        }
        outcome
    }

    async fn check_remote_resources(&mut self) -> Result<()> {
        self.setup_existing_key().await?;

        let server_type = self.server_type().await.context("could not get type")?;
        if let Some(arch) = self.config.image_arch {
            if arch != server_type.architecture {
                warn!(
                    supplied = %arch,
                    server = %server_type.architecture,
                    "supplied architecture differs from server architecture"
                );
            }
        }

        self.image().await.context("could not get image")?;
        self.location().await.context("could not get location")?;
        self.placement_group()
            .await
            .context("could not create placement group")?;
        self.primary_ipv4()
            .await
            .context("could not resolve primary IPv4")?;
        self.primary_ipv6()
            .await
            .context("could not resolve primary IPv6")?;

        if self.config.use_private_network && self.config.networks.is_empty() {
            return Err(Error::Network("No private network attached.".into()));
        }
        Ok(())
    }

    /// Create the server. On failure every resource created along the way
    /// is deleted again before the error is returned.
    pub async fn create(&mut self) -> Result<()> {
        let outcome = self.provision().await;
        self.roll_back().await;
        outcome
    }

    /// Delete whatever is still registered as dangling. Successful runs have
    /// cleared the list already.
    async fn roll_back(&mut self) {
        if self.dangling.is_empty() {
            return;
        }
        let api = self.api();
        self.dangling.destroy_all(api.as_ref()).await;
        self.cache.placement_group = None;
    }

    async fn provision(&mut self) -> Result<()> {
        self.stage = ProvisionStage::Idle;

        self.prepare_local_key().await.map_err(|e| self.fail(e))?;
        self.advance(ProvisionStage::KeyPrepared);

        self.create_remote_keys().await.map_err(|e| self.fail(e))?;
        self.advance(ProvisionStage::KeysRegistered);

        info!(machine = %self.base.machine_name, "creating Hetzner server");
        let req = self
            .make_create_server_request()
            .await
            .map_err(|e| self.fail(e))?;
        self.observe("create server request", &req);

        let created = match self.api().create_server(&req).await {
            Ok(created) => created,
            Err(e) => {
                tokio::time::sleep(self.config.wait_on_error()).await;
                return Err(self.fail(Error::Api {
                    context: "could not create server".into(),
                    source: e,
                }));
            }
        };
        self.remote.server_id = Some(created.server.id);
        self.advance(ProvisionStage::ServerRequested);
        info!(
            server = %created.server.name,
            server_id = created.server.id,
            command = %created.action.command,
            action_id = created.action.id,
            "creating server"
        );

        self.wait_for_action(&created.action)
            .await
            .context("could not wait for action")
            .map_err(|e| self.fail(e))?;
        if !created.next_actions.is_empty() {
            self.wait_for_multiple_actions("server.next_actions", &created.next_actions)
                .await
                .context("could not wait for next actions")
                .map_err(|e| self.fail(e))?;
        }
        self.advance(ProvisionStage::ActionPending);

        info!(server_id = created.server.id, "waiting for server to come up");
        self.wait_for_running_server()
            .await
            .map_err(|e| self.fail(e))?;
        self.advance(ProvisionStage::ServerBooting);

        self.configure_network_access(&created.server)
            .await
            .map_err(|e| self.fail(e))?;
        self.advance(ProvisionStage::NetworkConfiguring);

        self.dangling.clear();
        self.advance(ProvisionStage::Ready);
        info!(
            server = %created.server.name,
            server_id = created.server.id,
            ip = %self.base.ip_address,
            "server ready"
        );
        Ok(())
    }

    fn advance(&mut self, stage: ProvisionStage) {
        tracing::debug!(from = ?self.stage, to = ?stage, "provisioning");
        self.stage = stage;
    }

    fn fail(&mut self, source: Error) -> Error {
        let stage = self.stage;
        self.stage = ProvisionStage::Failed;
        Error::Provision {
            stage,
            source: Box::new(source),
        }
    }

    /// Resolve every reference the create request needs.
    pub(crate) async fn make_create_server_request(&mut self) -> Result<CreateServerRequest> {
        let placement_group = self.placement_group().await?;
        let user_data = self.user_data().await?;
        let public_net = self.public_net().await?;
        let networks = self.resolve_networks().await?;
        let firewalls = self.resolve_firewalls().await?;
        let volumes = self.resolve_volumes().await?;

        let location = self.location().await.context("could not get location")?;
        let server_type = self.server_type().await.context("could not get type")?;
        let image = self.image().await.context("could not get image")?;
        let key = self.ssh_key().await.context("could not get ssh key")?;

        let mut ssh_keys: Vec<i64> = self.cache.additional_keys.iter().map(|k| k.id).collect();
        ssh_keys.push(key.id);

        Ok(CreateServerRequest {
            name: self.base.machine_name.clone(),
            server_type: server_type.name,
            image: image.id.to_string(),
            location: location.map(|l| l.name),
            ssh_keys,
            user_data: (!user_data.is_empty()).then_some(user_data),
            labels: self.config.server_labels.clone(),
            placement_group: placement_group.map(|g| g.id),
            public_net,
            networks,
            firewalls,
            volumes,
        })
    }

    /// Inline user data, or the verbatim contents of the user data file.
    pub(crate) async fn user_data(&self) -> Result<String> {
        if self.config.user_data_file.is_empty() {
            return Ok(self.config.user_data.clone());
        }
        let path = &self.config.user_data_file;
        tokio::fs::read_to_string(path)
            .await
            .context(format!("could not read user data file {path}"))
    }

    async fn resolve_networks(&mut self) -> Result<Vec<i64>> {
        let api = self.api();
        let mut ids = Vec::with_capacity(self.config.networks.len());
        for reference in &self.config.networks {
            let network = api
                .network(reference)
                .await
                .context("could not get network by ID or name")?
                .ok_or_else(|| Error::not_found("network", reference))?;
            ids.push(network.id);
        }
        Ok(ids)
    }

    async fn resolve_firewalls(&mut self) -> Result<Vec<CreateServerFirewall>> {
        let api = self.api();
        let mut firewalls = Vec::with_capacity(self.config.firewalls.len());
        for reference in &self.config.firewalls {
            let firewall = api
                .firewall(reference)
                .await
                .context("could not get firewall by ID or name")?
                .ok_or_else(|| Error::not_found("firewall", reference))?;
            firewalls.push(CreateServerFirewall {
                firewall: firewall.id,
            });
        }
        Ok(firewalls)
    }

    async fn resolve_volumes(&mut self) -> Result<Vec<i64>> {
        let api = self.api();
        let mut ids = Vec::with_capacity(self.config.volumes.len());
        for reference in &self.config.volumes {
            let volume = api
                .volume(reference)
                .await
                .context("could not get volume by ID or name")?
                .ok_or_else(|| Error::not_found("volume", reference))?;
            ids.push(volume.id);
        }
        Ok(ids)
    }
}
