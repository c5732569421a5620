//! In-memory provider and driver fixtures shared by the unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cloud::{ApiError, CloudApi, NOT_FOUND, Result as ApiResult};
use crate::driver::Driver;
use crate::error::{Error, Result, ResultExt};
use crate::instrumentation::Silent;
use crate::ssh_keys::{KeyGenerator, PublicKey, public_key_path};
use crate::types::{
    Action, ActionError, ActionStatus, Architecture, CreatePlacementGroupRequest,
    CreateServerRequest, CreateServerResponse, CreateSshKeyRequest, Firewall, Image, Labels,
    Location, Network, PlacementGroup, PrimaryIp, PrivateNet, PublicIpv4, PublicIpv6, PublicNet,
    Server, ServerStatus, ServerType, SshKey, Volume,
};

pub(crate) const TEST_PUBLIC_KEY: &str = crate::ssh_keys::tests::TEST_KEY;
pub(crate) const OTHER_PUBLIC_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAICEiIyQlJicoKSorLC0uLzAxMjM0NTY3ODk6Ozw9Pj9A";

const PUBLIC_IPV4: &str = "203.0.113.10";
const PUBLIC_IPV6_NET: &str = "2001:db8:1:2::/64";
const PRIVATE_IP: &str = "10.0.0.2";

// ── Fixtures ─────────────────────────────────────────────────────────

/// A driver wired to `cloud` that never sleeps between polls.
pub(crate) fn driver_with(cloud: &Arc<FakeCloud>) -> Driver {
    let mut driver = Driver::new("test-machine", std::env::temp_dir())
        .with_api(cloud.clone())
        .with_instrumentation(Arc::new(Silent));
    driver.config.access_token = "token".into();
    driver.config.image = crate::flags::DEFAULT_IMAGE.into();
    driver.config.wait_on_polling_secs = 0;
    driver
}

/// Like [`driver_with`], storing machines under `store` and generating keys
/// without `ssh-keygen`.
pub(crate) fn driver_in(cloud: &Arc<FakeCloud>, store: &Path) -> Driver {
    let mut driver = driver_with(cloud).with_key_generator(Arc::new(FakeKeygen));
    driver.base.store_path = store.to_path_buf();
    driver
}

/// Writes a fixed key pair.
pub(crate) struct FakeKeygen;

#[async_trait]
impl KeyGenerator for FakeKeygen {
    async fn generate(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.context("mkdir")?;
        }
        tokio::fs::write(path, "PRIVATE").await.context("write")?;
        tokio::fs::write(public_key_path(path), TEST_PUBLIC_KEY)
            .await
            .context("write")?;
        Ok(())
    }
}

pub(crate) struct FailingKeygen;

#[async_trait]
impl KeyGenerator for FailingKeygen {
    async fn generate(&self, _path: &Path) -> Result<()> {
        Err(Error::KeyGeneration("no entropy".into()))
    }
}

// ── Fake provider ────────────────────────────────────────────────────

struct ServerEntry {
    server: Server,
    group: Option<i64>,
    /// Reads left before an initializing server reports running.
    boot_reads: u32,
    /// Reads left before the private network shows up.
    private_net_reads: Option<u32>,
}

struct ActionEntry {
    action: Action,
    polls_left: u32,
}

#[derive(Default)]
struct State {
    next_id: i64,
    server_types: Vec<ServerType>,
    images: Vec<Image>,
    locations: Vec<Location>,
    ssh_keys: BTreeMap<i64, SshKey>,
    placement_groups: BTreeMap<i64, PlacementGroup>,
    networks: Vec<Network>,
    firewalls: Vec<Firewall>,
    volumes: Vec<Volume>,
    primary_ips: Vec<PrimaryIp>,
    servers: BTreeMap<i64, ServerEntry>,
    actions: HashMap<i64, ActionEntry>,

    counts: HashMap<String, usize>,
    calls: Vec<String>,
    failing: HashSet<String>,
    boot_after_reads: u32,
    fail_create_action: bool,
    last_create_request: Option<CreateServerRequest>,
}

impl State {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Count the call and fail it when requested.
    fn enter(&mut self, op: &str) -> ApiResult<()> {
        *self.counts.entry(op.to_string()).or_default() += 1;
        if self.failing.contains(op) {
            return Err(api_error(
                500,
                "server_error",
                format!("injected failure in {op}"),
            ));
        }
        Ok(())
    }

    fn action(&mut self, command: &str, status: ActionStatus, polls: u32) -> Action {
        let id = self.id();
        let error = (status == ActionStatus::Error).then(|| ActionError {
            code: "action_failed".into(),
            message: format!("{command} failed"),
        });
        let finished = Action {
            id,
            command: command.into(),
            status,
            progress: 100,
            error,
        };
        let current = if polls > 0 {
            Action {
                status: ActionStatus::Running,
                progress: 0,
                error: None,
                ..finished.clone()
            }
        } else {
            finished.clone()
        };
        self.actions.insert(
            id,
            ActionEntry {
                action: finished,
                polls_left: polls,
            },
        );
        current
    }

    fn server_view(&self, entry: &ServerEntry) -> Server {
        let mut server = entry.server.clone();
        server.placement_group = entry
            .group
            .and_then(|id| self.placement_groups.get(&id).cloned());
        server
    }

    fn insert_server(&mut self, server: Server, group: Option<i64>, boot_reads: u32) -> i64 {
        let id = server.id;
        if let Some(group) = group.and_then(|g| self.placement_groups.get_mut(&g)) {
            group.servers.push(id);
        }
        self.servers.insert(
            id,
            ServerEntry {
                server,
                group,
                boot_reads,
                private_net_reads: None,
            },
        );
        id
    }

    fn power(&mut self, op: &str, id: i64, status: ServerStatus) -> ApiResult<Action> {
        self.enter(op)?;
        self.calls.push(format!("{op}:{id}"));
        let entry = self.servers.get_mut(&id).ok_or_else(|| not_found("server", id))?;
        entry.server.status = status;
        Ok(self.action(&format!("{op}_server"), ActionStatus::Success, 0))
    }
}

fn api_error(status: u16, code: &str, message: String) -> ApiError {
    ApiError::Api {
        endpoint: "fake",
        status,
        code: code.into(),
        message,
    }
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> ApiError {
    api_error(NOT_FOUND, "not_found", format!("{kind} {id} not found"))
}

fn matches_ref(id: i64, name: &str, reference: &str) -> bool {
    id.to_string() == reference || name == reference
}

fn template(id: i64, name: &str, status: ServerStatus) -> Server {
    Server {
        id,
        name: name.into(),
        status,
        public_net: PublicNet {
            ipv4: Some(PublicIpv4 {
                ip: PUBLIC_IPV4.into(),
            }),
            ipv6: Some(PublicIpv6 {
                ip: PUBLIC_IPV6_NET.into(),
            }),
        },
        private_net: Vec::new(),
        placement_group: None,
        labels: Labels::new(),
    }
}

/// Provider double keeping all resources in memory.
///
/// Every trait call is counted under its method name. Mutating calls are
/// additionally logged as `op:target` unless an injected failure stops them
/// first.
pub(crate) struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub(crate) fn empty() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 10_000,
                ..State::default()
            }),
        }
    }

    /// Two server types (x86 and arm), one image for each architecture and
    /// two locations.
    pub(crate) fn with_catalog() -> Self {
        let cloud = Self::empty();
        {
            let mut s = cloud.state.lock().unwrap();
            s.server_types = vec![
                ServerType {
                    id: 1,
                    name: "cx11".into(),
                    architecture: Architecture::X86,
                    description: "CX11".into(),
                },
                ServerType {
                    id: 2,
                    name: "cax11".into(),
                    architecture: Architecture::Arm,
                    description: "CAX11".into(),
                },
            ];
            s.images = vec![
                Image {
                    id: 1001,
                    name: Some("ubuntu-20.04".into()),
                    architecture: Architecture::X86,
                    description: "Ubuntu 20.04".into(),
                },
                Image {
                    id: 1002,
                    name: Some("ubuntu-20.04".into()),
                    architecture: Architecture::Arm,
                    description: "Ubuntu 20.04".into(),
                },
            ];
            s.locations = ["fsn1", "nbg1"]
                .into_iter()
                .enumerate()
                .map(|(i, name)| Location {
                    id: i as i64 + 1,
                    name: name.into(),
                    city: String::new(),
                    network_zone: "eu-central".into(),
                })
                .collect();
        }
        cloud
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // ── Test control ─────────────────────────────────────────────────

    pub(crate) fn count(&self, op: &str) -> usize {
        self.state().counts.get(op).copied().unwrap_or(0)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Make every call to `op` fail until [`FakeCloud::recover`].
    pub(crate) fn fail(&self, op: &str) {
        self.state().failing.insert(op.to_string());
    }

    pub(crate) fn recover(&self, op: &str) {
        self.state().failing.remove(op);
    }

    /// Servers created from now on report running after `reads` reads.
    pub(crate) fn boot_after_reads(&self, reads: u32) {
        self.state().boot_after_reads = reads;
    }

    /// The create action of servers created from now on fails.
    pub(crate) fn fail_create_action(&self) {
        self.state().fail_create_action = true;
    }

    pub(crate) fn last_create_request(&self) -> Option<CreateServerRequest> {
        self.state().last_create_request.clone()
    }

    pub(crate) fn ssh_keys(&self) -> Vec<SshKey> {
        self.state().ssh_keys.values().cloned().collect()
    }

    pub(crate) fn placement_groups(&self) -> Vec<PlacementGroup> {
        self.state().placement_groups.values().cloned().collect()
    }

    // ── Seeding ──────────────────────────────────────────────────────

    pub(crate) fn add_ssh_key(&self, name: &str, public_key: &str) -> SshKey {
        let mut s = self.state();
        let id = s.id();
        let fingerprint = PublicKey::parse_authorized_key(public_key)
            .map(|k| k.fingerprint_legacy_md5())
            .unwrap_or_else(|_| format!("fp-{id}"));
        let key = SshKey {
            id,
            name: name.into(),
            fingerprint,
            public_key: public_key.into(),
            labels: Labels::new(),
        };
        s.ssh_keys.insert(id, key.clone());
        key
    }

    pub(crate) fn add_placement_group(&self, name: &str, labels: Labels) -> PlacementGroup {
        let mut s = self.state();
        let group = PlacementGroup {
            id: s.id(),
            name: name.into(),
            labels,
            servers: Vec::new(),
            kind: "spread".into(),
        };
        s.placement_groups.insert(group.id, group.clone());
        group
    }

    pub(crate) fn add_primary_ip(&self, name: &str, ip: &str) -> PrimaryIp {
        let mut s = self.state();
        let primary = PrimaryIp {
            id: s.id(),
            name: name.into(),
            ip: ip.into(),
            kind: if ip.contains(':') { "ipv6" } else { "ipv4" }.into(),
            assignee_id: None,
        };
        s.primary_ips.push(primary.clone());
        primary
    }

    pub(crate) fn add_network(&self, name: &str) -> Network {
        let mut s = self.state();
        let network = Network {
            id: s.id(),
            name: name.into(),
            ip_range: "10.0.0.0/16".into(),
        };
        s.networks.push(network.clone());
        network
    }

    pub(crate) fn add_firewall(&self, name: &str) -> Firewall {
        let mut s = self.state();
        let firewall = Firewall {
            id: s.id(),
            name: name.into(),
        };
        s.firewalls.push(firewall.clone());
        firewall
    }

    pub(crate) fn add_volume(&self, name: &str) -> Volume {
        let mut s = self.state();
        let volume = Volume {
            id: s.id(),
            name: name.into(),
            size: 10,
        };
        s.volumes.push(volume.clone());
        volume
    }

    /// An action that is returned as running and reaches `status` on its
    /// `polls`th poll. With zero polls it is already finished.
    pub(crate) fn add_action(&self, command: &str, status: ActionStatus, polls: u32) -> Action {
        self.state().action(command, status, polls)
    }

    /// A server not known to the provider, with public addresses set.
    pub(crate) fn server_template(&self, name: &str) -> Server {
        let id = self.state().id();
        template(id, name, ServerStatus::Running)
    }

    /// A server that, when `Initializing`, reports running after `reads`
    /// reads. `u32::MAX` never boots.
    pub(crate) fn add_server(&self, name: &str, status: ServerStatus, reads: u32) -> i64 {
        let mut s = self.state();
        let id = s.id();
        s.insert_server(template(id, name, status), None, reads)
    }

    pub(crate) fn add_server_in_group(&self, name: &str, group: i64) -> i64 {
        let mut s = self.state();
        let id = s.id();
        s.insert_server(template(id, name, ServerStatus::Running), Some(group), 0)
    }

    /// A running server whose private network appears after `reads` reads.
    pub(crate) fn add_server_with_late_private_net(&self, name: &str, reads: u32) -> i64 {
        let mut s = self.state();
        let id = s.id();
        s.insert_server(template(id, name, ServerStatus::Running), None, 0);
        if let Some(entry) = s.servers.get_mut(&id) {
            entry.private_net_reads = Some(reads);
        }
        id
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn server_type_by_name(&self, name: &str) -> ApiResult<Option<ServerType>> {
        let mut s = self.state();
        s.enter("server_type_by_name")?;
        Ok(s.server_types.iter().find(|t| t.name == name).cloned())
    }

    async fn image_by_id(&self, id: i64) -> ApiResult<Option<Image>> {
        let mut s = self.state();
        s.enter("image_by_id")?;
        Ok(s.images.iter().find(|i| i.id == id).cloned())
    }

    async fn image_by_name_and_architecture(
        &self,
        name: &str,
        architecture: Architecture,
    ) -> ApiResult<Option<Image>> {
        let mut s = self.state();
        s.enter("image_by_name_and_architecture")?;
        Ok(s
            .images
            .iter()
            .find(|i| i.name.as_deref() == Some(name) && i.architecture == architecture)
            .cloned())
    }

    async fn location_by_name(&self, name: &str) -> ApiResult<Option<Location>> {
        let mut s = self.state();
        s.enter("location_by_name")?;
        Ok(s.locations.iter().find(|l| l.name == name).cloned())
    }

    async fn ssh_key_by_id(&self, id: i64) -> ApiResult<Option<SshKey>> {
        let mut s = self.state();
        s.enter("ssh_key_by_id")?;
        Ok(s.ssh_keys.get(&id).cloned())
    }

    async fn ssh_key_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> ApiResult<Option<SshKey>> {
        let mut s = self.state();
        s.enter("ssh_key_by_fingerprint")?;
        Ok(s
            .ssh_keys
            .values()
            .find(|k| k.fingerprint == fingerprint)
            .cloned())
    }

    async fn create_ssh_key(&self, req: &CreateSshKeyRequest) -> ApiResult<SshKey> {
        {
            let mut s = self.state();
            s.enter("create_ssh_key")?;
            s.calls.push(format!("create_ssh_key:{}", req.name));
        }
        let mut key = self.add_ssh_key(&req.name, &req.public_key);
        key.labels = req.labels.clone();
        self.state().ssh_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn delete_ssh_key(&self, id: i64) -> ApiResult<()> {
        let mut s = self.state();
        s.enter("delete_ssh_key")?;
        s.calls.push(format!("delete_ssh_key:{id}"));
        s.ssh_keys
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("ssh key", id))
    }

    async fn placement_group(
        &self,
        id_or_name: &str,
    ) -> ApiResult<Option<PlacementGroup>> {
        let mut s = self.state();
        s.enter("placement_group")?;
        Ok(s
            .placement_groups
            .values()
            .find(|g| matches_ref(g.id, &g.name, id_or_name))
            .cloned())
    }

    async fn placement_groups_by_label(
        &self,
        label_selector: &str,
    ) -> ApiResult<Vec<PlacementGroup>> {
        let mut s = self.state();
        s.enter("placement_groups_by_label")?;
        Ok(s
            .placement_groups
            .values()
            .filter(|g| g.labels.contains_key(label_selector))
            .cloned()
            .collect())
    }

    async fn create_placement_group(
        &self,
        req: &CreatePlacementGroupRequest,
    ) -> ApiResult<PlacementGroup> {
        {
            let mut s = self.state();
            s.enter("create_placement_group")?;
            s.calls.push(format!("create_placement_group:{}", req.name));
        }
        let mut group = self.add_placement_group(&req.name, req.labels.clone());
        group.kind = req.kind.clone();
        self.state().placement_groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn delete_placement_group(&self, id: i64) -> ApiResult<()> {
        let mut s = self.state();
        s.enter("delete_placement_group")?;
        s.calls.push(format!("delete_placement_group:{id}"));
        s.placement_groups
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found("placement group", id))
    }

    async fn network(&self, id_or_name: &str) -> ApiResult<Option<Network>> {
        let mut s = self.state();
        s.enter("network")?;
        Ok(s
            .networks
            .iter()
            .find(|n| matches_ref(n.id, &n.name, id_or_name))
            .cloned())
    }

    async fn firewall(&self, id_or_name: &str) -> ApiResult<Option<Firewall>> {
        let mut s = self.state();
        s.enter("firewall")?;
        Ok(s
            .firewalls
            .iter()
            .find(|f| matches_ref(f.id, &f.name, id_or_name))
            .cloned())
    }

    async fn volume(&self, id_or_name: &str) -> ApiResult<Option<Volume>> {
        let mut s = self.state();
        s.enter("volume")?;
        Ok(s
            .volumes
            .iter()
            .find(|v| matches_ref(v.id, &v.name, id_or_name))
            .cloned())
    }

    async fn primary_ip(&self, id_or_name: &str) -> ApiResult<Option<PrimaryIp>> {
        let mut s = self.state();
        s.enter("primary_ip")?;
        Ok(s
            .primary_ips
            .iter()
            .find(|p| matches_ref(p.id, &p.name, id_or_name))
            .cloned())
    }

    async fn primary_ip_by_address(&self, ip: &str) -> ApiResult<Option<PrimaryIp>> {
        let mut s = self.state();
        s.enter("primary_ip_by_address")?;
        Ok(s.primary_ips.iter().find(|p| p.ip == ip).cloned())
    }

    async fn create_server(
        &self,
        req: &CreateServerRequest,
    ) -> ApiResult<CreateServerResponse> {
        let mut s = self.state();
        s.enter("create_server")?;
        s.calls.push(format!("create_server:{}", req.name));
        s.last_create_request = Some(req.clone());

        let id = s.id();
        let mut server = template(id, &req.name, ServerStatus::Initializing);
        server.labels = req.labels.clone();
        if let Some(public) = &req.public_net {
            if !public.enable_ipv4 {
                server.public_net.ipv4 = None;
            }
            if !public.enable_ipv6 {
                server.public_net.ipv6 = None;
            }
        }
        if let Some(network) = req.networks.first() {
            server.private_net = vec![PrivateNet {
                network: *network,
                ip: PRIVATE_IP.into(),
            }];
        }

        let boot_reads = s.boot_after_reads;
        s.insert_server(server, req.placement_group, boot_reads);
        let status = if s.fail_create_action {
            ActionStatus::Error
        } else {
            ActionStatus::Success
        };
        let action = s.action("create_server", status, 0);
        let server = s
            .servers
            .get(&id)
            .map(|entry| s.server_view(entry))
            .ok_or_else(|| not_found("server", id))?;

        Ok(CreateServerResponse {
            server,
            action,
            next_actions: Vec::new(),
        })
    }

    async fn server(&self, id: i64) -> ApiResult<Option<Server>> {
        let mut s = self.state();
        s.enter("server")?;
        let Some(entry) = s.servers.get_mut(&id) else {
            return Ok(None);
        };

        if entry.server.status == ServerStatus::Initializing {
            if entry.boot_reads == 0 {
                entry.server.status = ServerStatus::Running;
            } else {
                entry.boot_reads -= 1;
            }
        }
        match entry.private_net_reads {
            Some(0) => {
                entry.server.private_net = vec![PrivateNet {
                    network: 1,
                    ip: PRIVATE_IP.into(),
                }];
                entry.private_net_reads = None;
            }
            Some(n) => entry.private_net_reads = Some(n - 1),
            None => {}
        }

        let entry = &s.servers[&id];
        Ok(Some(s.server_view(entry)))
    }

    async fn delete_server(&self, id: i64) -> ApiResult<Action> {
        let mut s = self.state();
        s.enter("delete_server")?;
        s.calls.push(format!("delete_server:{id}"));
        let entry = s.servers.remove(&id).ok_or_else(|| not_found("server", id))?;
        if let Some(group) = entry.group.and_then(|g| s.placement_groups.get_mut(&g)) {
            group.servers.retain(|member| *member != id);
        }
        Ok(s.action("delete_server", ActionStatus::Success, 0))
    }

    async fn power_on(&self, id: i64) -> ApiResult<Action> {
        self.state().power("power_on", id, ServerStatus::Running)
    }

    async fn power_off(&self, id: i64) -> ApiResult<Action> {
        self.state().power("power_off", id, ServerStatus::Off)
    }

    async fn shutdown(&self, id: i64) -> ApiResult<Action> {
        self.state().power("shutdown", id, ServerStatus::Off)
    }

    async fn reboot(&self, id: i64) -> ApiResult<Action> {
        self.state().power("reboot", id, ServerStatus::Running)
    }

    async fn action(&self, id: i64) -> ApiResult<Action> {
        let mut s = self.state();
        s.enter("action")?;
        let entry = s.actions.get_mut(&id).ok_or_else(|| not_found("action", id))?;
        entry.polls_left = entry.polls_left.saturating_sub(1);
        if entry.polls_left == 0 {
            return Ok(entry.action.clone());
        }
        Ok(Action {
            status: ActionStatus::Running,
            progress: 50,
            error: None,
            ..entry.action.clone()
        })
    }
}
