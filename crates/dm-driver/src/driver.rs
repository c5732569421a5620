use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cloud::CloudApi;
use crate::dangling::DanglingResources;
use crate::flags::{DEFAULT_SSH_PORT, DEFAULT_SSH_USER, DEFAULT_TYPE, DEFAULT_WAIT_ON_POLLING};
use crate::hetzner::HetznerCloud;
use crate::instrumentation::{self, Instrumentation};
use crate::lookup::LookupCache;
use crate::provision::ProvisionStage;
use crate::ssh_keys::{KeyGenerator, SshKeygen};
use crate::types::{Architecture, Labels};

/// Name the driver registers under with the host.
pub const DRIVER_NAME: &str = "hetzner";

const APPLICATION_NAME: &str = "docker-machine-driver";

/// Host-level machine attributes shared by every driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineBase {
    pub machine_name: String,
    pub store_path: PathBuf,
    /// Address recorded once the server is reachable.
    #[serde(default)]
    pub ip_address: String,
    pub ssh_user: String,
    pub ssh_port: u16,
}

impl MachineBase {
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            ip_address: String::new(),
            ssh_user: DEFAULT_SSH_USER.into(),
            ssh_port: DEFAULT_SSH_PORT as u16,
        }
    }

    pub fn machine_dir(&self) -> PathBuf {
        self.store_path.join("machines").join(&self.machine_name)
    }

    pub fn ssh_key_path(&self) -> PathBuf {
        self.machine_dir().join("id_rsa")
    }
}

/// Validated options. Built in one piece by
/// [`Driver::set_config_from_flags`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub access_token: String,
    pub image: String,
    pub image_id: Option<i64>,
    /// `None` means "infer from the server type".
    pub image_arch: Option<Architecture>,
    pub server_type: String,
    pub location: String,
    pub existing_key_path: String,
    pub user_data: String,
    pub user_data_file: String,
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
    pub firewalls: Vec<String>,
    pub use_private_network: bool,
    pub disable_public_ipv4: bool,
    pub disable_public_ipv6: bool,
    pub primary_ipv4: String,
    pub primary_ipv6: String,
    pub server_labels: Labels,
    pub key_labels: Labels,
    pub placement_group: String,
    pub additional_keys: Vec<String>,
    pub wait_on_error_secs: u64,
    pub wait_on_polling_secs: u64,
    pub wait_for_running_timeout_secs: u64,
    #[serde(default)]
    pub uses_deprecated_flags: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            image: String::new(),
            image_id: None,
            image_arch: None,
            server_type: DEFAULT_TYPE.into(),
            location: String::new(),
            existing_key_path: String::new(),
            user_data: String::new(),
            user_data_file: String::new(),
            volumes: Vec::new(),
            networks: Vec::new(),
            firewalls: Vec::new(),
            use_private_network: false,
            disable_public_ipv4: false,
            disable_public_ipv6: false,
            primary_ipv4: String::new(),
            primary_ipv6: String::new(),
            server_labels: Labels::new(),
            key_labels: Labels::new(),
            placement_group: String::new(),
            additional_keys: Vec::new(),
            wait_on_error_secs: 0,
            wait_on_polling_secs: DEFAULT_WAIT_ON_POLLING as u64,
            wait_for_running_timeout_secs: 0,
            uses_deprecated_flags: false,
        }
    }
}

impl DriverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.wait_on_polling_secs)
    }

    pub fn wait_on_error(&self) -> Duration {
        Duration::from_secs(self.wait_on_error_secs)
    }

    /// `None` waits forever.
    pub fn running_timeout(&self) -> Option<Duration> {
        (self.wait_for_running_timeout_secs > 0)
            .then(|| Duration::from_secs(self.wait_for_running_timeout_secs))
    }

    /// Copy safe to print or attach to errors.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.access_token.is_empty() {
            copy.access_token = "<redacted>".into();
        }
        copy
    }
}

/// Remote resources this machine refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteState {
    /// Set as soon as the provider accepted the create request.
    pub server_id: Option<i64>,
    pub key_id: Option<i64>,
    /// The primary key was found remotely rather than uploaded by us, so
    /// removal leaves it alone.
    pub is_existing_key: bool,
    /// Additional keys uploaded by us.
    pub additional_key_ids: Vec<i64>,
}

/// One machine managed through the Hetzner Cloud API.
///
/// The serialized form (base, config, remote) is the machine record the host
/// persists between invocations; caches and collaborators are rebuilt on load.
#[derive(Serialize, Deserialize)]
pub struct Driver {
    pub base: MachineBase,
    pub config: DriverConfig,
    pub remote: RemoteState,
    #[serde(skip)]
    pub(crate) version: String,
    #[serde(skip)]
    pub(crate) stage: ProvisionStage,
    #[serde(skip)]
    pub(crate) cache: LookupCache,
    #[serde(skip)]
    pub(crate) dangling: DanglingResources,
    #[serde(skip)]
    api: Option<Arc<dyn CloudApi>>,
    #[serde(skip, default = "default_key_generator")]
    pub(crate) key_generator: Arc<dyn KeyGenerator>,
    #[serde(skip, default = "instrumentation::from_env")]
    pub(crate) instrumentation: Arc<dyn Instrumentation>,
}

fn default_key_generator() -> Arc<dyn KeyGenerator> {
    Arc::new(SshKeygen)
}

impl Driver {
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            base: MachineBase::new(machine_name, store_path),
            config: DriverConfig::default(),
            remote: RemoteState::default(),
            version: env!("CARGO_PKG_VERSION").into(),
            stage: ProvisionStage::Idle,
            cache: LookupCache::default(),
            dangling: DanglingResources::default(),
            api: None,
            key_generator: default_key_generator(),
            instrumentation: instrumentation::from_env(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Use `api` instead of a client built from the access token.
    pub fn with_api(mut self, api: Arc<dyn CloudApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = generator;
        self
    }

    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    pub fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    pub fn machine_name(&self) -> &str {
        &self.base.machine_name
    }

    pub fn ssh_username(&self) -> &str {
        &self.base.ssh_user
    }

    pub fn ssh_port(&self) -> u16 {
        self.base.ssh_port
    }

    pub fn ssh_key_path(&self) -> PathBuf {
        self.base.ssh_key_path()
    }

    pub fn stage(&self) -> ProvisionStage {
        self.stage
    }

    /// Whether the bound configuration relied on deprecated option names.
    pub fn uses_deprecated_flags(&self) -> bool {
        self.config.uses_deprecated_flags
    }

    pub fn dangling(&self) -> &DanglingResources {
        &self.dangling
    }

    /// The provider client; built lazily from the access token.
    pub(crate) fn api(&mut self) -> Arc<dyn CloudApi> {
        if let Some(api) = &self.api {
            return Arc::clone(api);
        }

        let client = HetznerCloud::new(&self.config.access_token)
            .with_application(APPLICATION_NAME, &self.version)
            .with_debug(instrumentation::http_debug_from_env());
        let api: Arc<dyn CloudApi> = Arc::new(client);
        self.api = Some(Arc::clone(&api));
        api
    }

    pub(crate) fn observe<T: Serialize>(&self, label: &str, value: &T) {
        instrumentation::observe(self.instrumentation.as_ref(), label, value);
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("base", &self.base)
            .field("config", &self.config.redacted())
            .field("remote", &self.remote)
            .field("stage", &self.stage)
            .field("dangling", &self.dangling)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_without_runtime_state() {
        let mut driver = Driver::new("web-1", "/var/lib/machine");
        driver.config.access_token = "secret".into();
        driver.remote.server_id = Some(42);
        driver.remote.key_id = Some(7);
        driver.base.ip_address = "203.0.113.10".into();

        let json = serde_json::to_string(&driver).unwrap();
        let loaded: Driver = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.base, driver.base);
        assert_eq!(loaded.config, driver.config);
        assert_eq!(loaded.remote, driver.remote);
        assert_eq!(loaded.stage(), ProvisionStage::Idle);
        assert!(loaded.dangling().is_empty());
    }

    #[test]
    fn debug_output_hides_the_token() {
        let mut driver = Driver::new("web-1", "/tmp");
        driver.config.access_token = "very-secret-token".into();
        let printed = format!("{driver:?}");
        assert!(!printed.contains("very-secret-token"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn key_path_lives_in_machine_dir() {
        let driver = Driver::new("web-1", "/store");
        assert_eq!(
            driver.ssh_key_path(),
            PathBuf::from("/store/machines/web-1/id_rsa")
        );
    }
}
