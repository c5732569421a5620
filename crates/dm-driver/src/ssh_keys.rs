//! Local key pair handling and remote SSH key registration.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use md5::{Digest, Md5};
use sha2::Sha256;
use tracing::{debug, info};

use crate::dangling::ResourceKind;
use crate::driver::Driver;
use crate::error::{ConfigError, Error, Result, ResultExt};
use crate::types::{CreateSshKeyRequest, Labels, SshKey};

/// A public key parsed from an authorized_keys line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub algorithm: String,
    pub blob: Vec<u8>,
    pub comment: Option<String>,
}

impl PublicKey {
    /// Parse the first key in `text`. Leading options and comment lines are
    /// skipped.
    pub fn parse_authorized_key(text: &str) -> Result<Self> {
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let Some(pos) = fields.iter().position(|f| is_key_type(f)) else {
                continue;
            };
            let encoded = fields
                .get(pos + 1)
                .ok_or_else(|| Error::InvalidPublicKey("missing key data".into()))?;
            let blob = STANDARD
                .decode(encoded)
                .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;

            let algorithm = fields[pos].to_string();
            if embedded_algorithm(&blob) != Some(algorithm.as_bytes()) {
                return Err(Error::InvalidPublicKey(format!(
                    "key data does not match type {algorithm}"
                )));
            }

            let comment = (fields.len() > pos + 2).then(|| fields[pos + 2..].join(" "));
            return Ok(Self {
                algorithm,
                blob,
                comment,
            });
        }
        Err(Error::InvalidPublicKey("no key found".into()))
    }

    /// `aa:bb:..` hex MD5, the format the provider indexes keys by.
    pub fn fingerprint_legacy_md5(&self) -> String {
        Md5::digest(&self.blob)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn fingerprint_sha256(&self) -> String {
        format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&self.blob)))
    }

    pub fn matches_fingerprint(&self, fingerprint: &str) -> bool {
        fingerprint == self.fingerprint_legacy_md5() || fingerprint == self.fingerprint_sha256()
    }
}

fn is_key_type(field: &str) -> bool {
    field.starts_with("ssh-") || field.starts_with("ecdsa-sha2-") || field.starts_with("sk-")
}

fn embedded_algorithm(blob: &[u8]) -> Option<&[u8]> {
    let len = u32::from_be_bytes(blob.get(..4)?.try_into().ok()?) as usize;
    blob.get(4..4 + len)
}

/// `<path>.pub`
pub fn public_key_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

/// Creates a fresh key pair at a path.
#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Write the private key to `path` and the public key to `path.pub`.
    async fn generate(&self, path: &Path) -> Result<()>;
}

/// Shells out to `ssh-keygen`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshKeygen;

#[async_trait]
impl KeyGenerator for SshKeygen {
    async fn generate(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .context("could not create machine directory")?;
        }

        let output = tokio::process::Command::new("ssh-keygen")
            .args(["-q", "-t", "rsa", "-b", "4096", "-N", "", "-f"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .context("could not run ssh-keygen")?;

        if !output.status.success() {
            return Err(Error::KeyGeneration(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Copy a key pair and restrict the private key to its owner.
pub async fn copy_key_pair(src: &Path, dst: &Path) -> Result<()> {
    if let Some(dir) = dst.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .context("could not create machine directory")?;
    }
    tokio::fs::copy(src, dst)
        .await
        .context("could not copy ssh key")?;
    tokio::fs::copy(public_key_path(src), public_key_path(dst))
        .await
        .context("could not copy ssh public key")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dst, std::fs::Permissions::from_mode(0o600))
            .await
            .context("could not set permissions on the ssh key")?;
    }
    Ok(())
}

impl Driver {
    /// Check that a user-supplied key ID refers to the local key pair.
    pub(crate) async fn setup_existing_key(&mut self) -> Result<()> {
        if !self.remote.is_existing_key {
            return Ok(());
        }
        if self.config.existing_key_path.is_empty() {
            return Err(ConfigError::new(
                "specifying an existing key ID requires the existing key path to be set as well",
            )
            .into());
        }

        let key = self.ssh_key().await.context("could not get key")?;
        let original = PathBuf::from(&self.config.existing_key_path);
        let text = tokio::fs::read_to_string(public_key_path(&original))
            .await
            .context("could not read public key")?;
        let local = PublicKey::parse_authorized_key(&text).context("could not parse authorized key")?;

        if !local.matches_fingerprint(&key.fingerprint) {
            return Err(Error::KeyMismatch {
                key_id: key.id,
                path: original,
            });
        }
        Ok(())
    }

    /// Put a key pair at the machine's key path, copied or generated.
    pub(crate) async fn prepare_local_key(&mut self) -> Result<()> {
        let target = self.ssh_key_path();
        if !self.config.existing_key_path.is_empty() {
            debug!(path = %target.display(), "copying ssh key");
            copy_key_pair(Path::new(&self.config.existing_key_path), &target)
                .await
                .context("could not copy ssh key pair")
        } else {
            debug!(path = %target.display(), "generating ssh key");
            self.key_generator
                .generate(&target)
                .await
                .context("could not generate ssh key")
        }
    }

    /// Make sure the primary and every additional key exist remotely,
    /// reusing keys with a matching fingerprint.
    pub(crate) async fn create_remote_keys(&mut self) -> Result<()> {
        if self.remote.key_id.is_none() {
            info!("creating ssh key");
            let public = tokio::fs::read_to_string(public_key_path(&self.ssh_key_path()))
                .await
                .context("could not read ssh public key")?;

            let key = match self
                .remote_key_with_same_fingerprint(&public)
                .await
                .context("error retrieving potentially existing key")?
            {
                Some(key) => {
                    debug!(key_id = key.id, "ssh key found remotely");
                    self.remote.is_existing_key = true;
                    key
                }
                None => {
                    info!("ssh key not found remotely, uploading");
                    let name = self.base.machine_name.clone();
                    let labels = self.config.key_labels.clone();
                    self.make_key(name, public, labels).await?
                }
            };
            self.remote.key_id = Some(key.id);
            self.cache.key = Some(key);
        }

        let additional = self.config.additional_keys.clone();
        for (i, public) in additional.into_iter().enumerate() {
            let key = match self
                .remote_key_with_same_fingerprint(&public)
                .await
                .context(format!("error checking for existing key for {public}"))?
            {
                Some(key) => {
                    info!(key_id = key.id, name = %key.name, "using existing key");
                    key
                }
                None => {
                    let name = format!("{}-additional-{i}", self.base.machine_name);
                    let labels = self.config.key_labels.clone();
                    let key = self
                        .make_key(name, public.clone(), labels)
                        .await
                        .context(format!("error creating new key for {public}"))?;
                    info!(key_id = key.id, "created additional key");
                    self.remote.additional_key_ids.push(key.id);
                    key
                }
            };
            self.cache.additional_keys.push(key);
        }
        Ok(())
    }

    /// Upload a key and register it for rollback.
    async fn make_key(&mut self, name: String, public_key: String, labels: Labels) -> Result<SshKey> {
        let req = CreateSshKeyRequest {
            name,
            public_key,
            labels,
        };
        self.observe("ssh key request", &req);

        let key = self
            .api()
            .create_ssh_key(&req)
            .await
            .context("could not create ssh key")?;
        self.dangling
            .register(ResourceKind::SshKey, key.id, key.name.clone());
        Ok(key)
    }
}
