//! Remote lookups, memoized for the lifetime of one driver instance.

use crate::driver::Driver;
use crate::error::{Error, Result, ResultExt};
use crate::ssh_keys::PublicKey;
use crate::types::{
    Architecture, Image, Location, PlacementGroup, PrimaryIp, Server, ServerType, SshKey,
};

/// Resolved entities. Only successful, non-empty results are stored.
#[derive(Debug, Clone, Default)]
pub(crate) struct LookupCache {
    pub server_type: Option<ServerType>,
    pub image: Option<Image>,
    pub location: Option<Location>,
    pub key: Option<SshKey>,
    pub additional_keys: Vec<SshKey>,
    pub placement_group: Option<PlacementGroup>,
    pub primary_ipv4: Option<PrimaryIp>,
    pub primary_ipv6: Option<PrimaryIp>,
    pub server: Option<Server>,
}

impl Driver {
    pub(crate) async fn server_type(&mut self) -> Result<ServerType> {
        if let Some(cached) = &self.cache.server_type {
            return Ok(cached.clone());
        }

        let name = self.config.server_type.clone();
        let server_type = self
            .api()
            .server_type_by_name(&name)
            .await
            .context("could not get type by name")?
            .ok_or_else(|| Error::not_found("server type", &name))?;

        self.observe("server type", &server_type);
        self.cache.server_type = Some(server_type.clone());
        Ok(server_type)
    }

    pub(crate) async fn image(&mut self) -> Result<Image> {
        if let Some(cached) = &self.cache.image {
            return Ok(cached.clone());
        }

        let image = match self.config.image_id {
            Some(id) => self
                .api()
                .image_by_id(id)
                .await
                .context(format!("could not get image by id {id}"))?
                .ok_or_else(|| Error::not_found("image id", id))?,
            None => {
                let arch = self
                    .image_architecture_for_lookup()
                    .await
                    .context("could not determine image architecture")?;
                let name = self.config.image.clone();
                self.api()
                    .image_by_name_and_architecture(&name, arch)
                    .await
                    .context(format!("could not get image by name {name}"))?
                    .ok_or_else(|| Error::not_found("image", format!("{name}[{arch}]")))?
            }
        };

        self.observe("image", &image);
        self.cache.image = Some(image.clone());
        Ok(image)
    }

    /// The configured architecture, else the server type's.
    async fn image_architecture_for_lookup(&mut self) -> Result<Architecture> {
        match self.config.image_arch {
            Some(arch) => Ok(arch),
            None => Ok(self.server_type().await?.architecture),
        }
    }

    /// `None` when no location is configured.
    pub(crate) async fn location(&mut self) -> Result<Option<Location>> {
        if let Some(cached) = &self.cache.location {
            return Ok(Some(cached.clone()));
        }
        if self.config.location.is_empty() {
            return Ok(None);
        }

        let name = self.config.location.clone();
        let location = self
            .api()
            .location_by_name(&name)
            .await
            .context("could not get location by name")?
            .ok_or_else(|| Error::not_found("location", &name))?;

        self.cache.location = Some(location.clone());
        Ok(Some(location))
    }

    pub(crate) async fn ssh_key(&mut self) -> Result<SshKey> {
        let reference = self.remote.key_id.unwrap_or_default();
        self.ssh_key_nullable()
            .await?
            .ok_or_else(|| Error::not_found("ssh key", reference))
    }

    /// `None` when no key ID is known or the key is gone.
    pub(crate) async fn ssh_key_nullable(&mut self) -> Result<Option<SshKey>> {
        if let Some(cached) = &self.cache.key {
            return Ok(Some(cached.clone()));
        }
        let Some(id) = self.remote.key_id else {
            return Ok(None);
        };

        let key = self
            .api()
            .ssh_key_by_id(id)
            .await
            .context("could not get sshkey by ID")?;
        if let Some(key) = &key {
            self.observe("ssh key", key);
        }
        self.cache.key = key.clone();
        Ok(key)
    }

    /// Find an already uploaded key by the legacy MD5 fingerprint of
    /// `public_key`.
    pub(crate) async fn remote_key_with_same_fingerprint(
        &mut self,
        public_key: &str,
    ) -> Result<Option<SshKey>> {
        let parsed =
            PublicKey::parse_authorized_key(public_key).context("could not parse ssh public key")?;
        let fingerprint = parsed.fingerprint_legacy_md5();

        let key = self
            .api()
            .ssh_key_by_fingerprint(&fingerprint)
            .await
            .context("could not get sshkey by fingerprint")?;
        if let Some(key) = &key {
            self.observe("ssh key", key);
        }
        Ok(key)
    }

    pub(crate) async fn server_handle(&mut self) -> Result<Server> {
        let reference = self.remote.server_id.unwrap_or_default();
        self.server_handle_nullable()
            .await?
            .ok_or_else(|| Error::not_found("server", reference))
    }

    /// `None` when the server is gone. Fails when no server was ever
    /// created.
    pub(crate) async fn server_handle_nullable(&mut self) -> Result<Option<Server>> {
        if let Some(cached) = &self.cache.server {
            return Ok(Some(cached.clone()));
        }
        let id = self.remote.server_id.ok_or(Error::NoServer)?;

        let server = self
            .api()
            .server(id)
            .await
            .context("could not get server by ID")?;
        self.cache.server = server.clone();
        Ok(server)
    }
}
