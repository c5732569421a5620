//! Operations on an existing machine: state, power actions, removal and
//! the addresses the host connects to.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;
use tracing::{info, warn};

use crate::cloud::ApiError;
use crate::driver::Driver;
use crate::error::{Error, Result, ResultExt};
use crate::types::{Action, ServerStatus};

/// Docker daemon port on provisioned machines.
pub const DOCKER_PORT: u16 = 2376;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MachineState {
    None,
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
        })
    }
}

impl From<&ServerStatus> for MachineState {
    fn from(status: &ServerStatus) -> Self {
        match status {
            ServerStatus::Initializing => Self::Starting,
            ServerStatus::Running => Self::Running,
            ServerStatus::Off => Self::Stopped,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PowerAction {
    On,
    Off,
    Shutdown,
    Reboot,
}

impl PowerAction {
    fn verb(self) -> &'static str {
        match self {
            Self::On => "power on",
            Self::Off => "poweroff",
            Self::Shutdown => "shutdown",
            Self::Reboot => "reboot",
        }
    }
}

impl Driver {
    /// Current state, always read fresh from the provider.
    pub async fn state(&mut self) -> Result<MachineState> {
        let id = self.remote.server_id.ok_or(Error::NoServer)?;
        let server = self
            .api()
            .server(id)
            .await
            .context("could not get server by ID")?
            .ok_or_else(|| Error::not_found("server", id))?;
        Ok(MachineState::from(&server.status))
    }

    pub async fn start(&mut self) -> Result<()> {
        self.power(PowerAction::On).await
    }

    /// Graceful shutdown.
    pub async fn stop(&mut self) -> Result<()> {
        self.power(PowerAction::Shutdown).await
    }

    pub async fn restart(&mut self) -> Result<()> {
        self.power(PowerAction::Reboot).await
    }

    /// Hard power off.
    pub async fn kill(&mut self) -> Result<()> {
        self.power(PowerAction::Off).await
    }

    async fn power(&mut self, kind: PowerAction) -> Result<()> {
        let server = self
            .server_handle()
            .await
            .context("could not get server handle")?;

        let api = self.api();
        let result: std::result::Result<Action, ApiError> = match kind {
            PowerAction::On => api.power_on(server.id).await,
            PowerAction::Off => api.power_off(server.id).await,
            PowerAction::Shutdown => api.shutdown(server.id).await,
            PowerAction::Reboot => api.reboot(server.id).await,
        };
        let action = result.context(format!("could not {} server", kind.verb()))?;

        info!(
            server = %server.name,
            server_id = server.id,
            command = %action.command,
            action_id = action.id,
            "{} server",
            kind.verb()
        );
        self.wait_for_action(&action).await
    }

    /// Delete the server and the keys this machine owns.
    ///
    /// Additional keys are removed on a best-effort basis. Failing to remove
    /// the primary key fails the whole removal.
    pub async fn remove(&mut self) -> Result<()> {
        self.destroy_server().await?;

        let api = self.api();
        let additional = std::mem::take(&mut self.remote.additional_key_ids);
        let mut undeleted = Vec::new();
        for (i, id) in additional.into_iter().enumerate() {
            info!(index = i, key_id = id, "destroying additional key");
            match api.ssh_key_by_id(id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(key_id = id, "additional key no longer exists");
                    continue;
                }
                Err(e) => warn!(key_id = id, error = %e, "could not retrieve additional key"),
            }
            if let Err(e) = api.delete_ssh_key(id).await {
                warn!(key_id = id, error = %e, "could not remove additional key");
                undeleted.push(id);
            }
        }
        // a retried removal only revisits keys that are still there
        self.remote.additional_key_ids = undeleted;
        self.cache.additional_keys.clear();

        if self.remote.is_existing_key || self.remote.key_id.is_none() {
            return Ok(());
        }
        let Some(key) = self
            .ssh_key_nullable()
            .await
            .context("could not get ssh key")?
        else {
            info!("ssh key does not exist anymore");
            return Ok(());
        };

        info!(key = %key.name, key_id = key.id, "destroying ssh key");
        api.delete_ssh_key(key.id)
            .await
            .context("could not delete ssh key")?;
        self.cache.key = None;
        Ok(())
    }

    async fn destroy_server(&mut self) -> Result<()> {
        if self.remote.server_id.is_none() {
            return Ok(());
        }

        let Some(server) = self
            .server_handle_nullable()
            .await
            .context("could not get server handle")?
        else {
            info!("server does not exist anymore");
            self.remote.server_id = None;
            return Ok(());
        };

        info!(server = %server.name, server_id = server.id, "destroying server");
        let action = self
            .api()
            .delete_server(server.id)
            .await
            .context("could not delete server")?;

        self.wait_for_action(&action)
            .await
            .context("could not wait for deletion")?;

        if let Err(e) = self.remove_empty_server_placement_group(&server).await {
            warn!(error = %e, "could not remove placement group");
        }

        self.remote.server_id = None;
        self.cache.server = None;
        Ok(())
    }

    /// The recorded machine address.
    pub fn ip(&self) -> Result<String> {
        if self.base.ip_address.is_empty() {
            return Err(Error::NoAddress);
        }
        Ok(self.base.ip_address.clone())
    }

    pub fn ssh_hostname(&self) -> Result<String> {
        self.ip()
    }

    /// `tcp://<ip>:2376`; the machine must be running.
    pub async fn url(&mut self) -> Result<String> {
        let state = self.state().await.context("could not get state")?;
        if state != MachineState::Running {
            return Err(Error::NotRunning(state));
        }

        let ip = self.ip().context("could not get IP")?;
        let host = match ip.parse::<IpAddr>() {
            Ok(addr) => SocketAddr::new(addr, DOCKER_PORT).to_string(),
            Err(_) => format!("{ip}:{DOCKER_PORT}"),
        };
        Ok(format!("tcp://{host}"))
    }
}
