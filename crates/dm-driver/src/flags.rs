//! Option declarations: names, environment bindings and defaults.

pub const FLAG_API_TOKEN: &str = "hetzner-api-token";
pub const FLAG_IMAGE: &str = "hetzner-image";
pub const FLAG_IMAGE_ID: &str = "hetzner-image-id";
pub const FLAG_IMAGE_ARCH: &str = "hetzner-image-arch";
pub const FLAG_TYPE: &str = "hetzner-server-type";
pub const FLAG_LOCATION: &str = "hetzner-server-location";
pub const FLAG_EXISTING_KEY_ID: &str = "hetzner-existing-key-id";
pub const FLAG_EXISTING_KEY_PATH: &str = "hetzner-existing-key-path";
pub const FLAG_USER_DATA: &str = "hetzner-user-data";
pub const FLAG_USER_DATA_FILE: &str = "hetzner-user-data-file";
pub const FLAG_VOLUMES: &str = "hetzner-volumes";
pub const FLAG_NETWORKS: &str = "hetzner-networks";
pub const FLAG_USE_PRIVATE_NETWORK: &str = "hetzner-use-private-network";
pub const FLAG_DISABLE_PUBLIC_4: &str = "hetzner-disable-public-ipv4";
pub const FLAG_DISABLE_PUBLIC_6: &str = "hetzner-disable-public-ipv6";
pub const FLAG_PRIMARY_4: &str = "hetzner-primary-ipv4";
pub const FLAG_PRIMARY_6: &str = "hetzner-primary-ipv6";
pub const FLAG_DISABLE_PUBLIC: &str = "hetzner-disable-public";
pub const FLAG_FIREWALLS: &str = "hetzner-firewalls";
pub const FLAG_ADDITIONAL_KEYS: &str = "hetzner-additional-key";
pub const FLAG_SERVER_LABEL: &str = "hetzner-server-label";
pub const FLAG_KEY_LABEL: &str = "hetzner-key-label";
pub const FLAG_PLACEMENT_GROUP: &str = "hetzner-placement-group";
pub const FLAG_AUTO_SPREAD: &str = "hetzner-auto-spread";
pub const FLAG_SSH_USER: &str = "hetzner-ssh-user";
pub const FLAG_SSH_PORT: &str = "hetzner-ssh-port";
pub const FLAG_WAIT_ON_ERROR: &str = "hetzner-wait-on-error";
pub const FLAG_WAIT_ON_POLLING: &str = "hetzner-wait-on-polling";
pub const FLAG_WAIT_FOR_RUNNING_TIMEOUT: &str = "hetzner-wait-for-running-timeout";

pub const LEGACY_FLAG_USER_DATA_FROM_FILE: &str = "hetzner-user-data-from-file";
pub const LEGACY_FLAG_DISABLE_PUBLIC_4: &str = "hetzner-disable-public-4";
pub const LEGACY_FLAG_DISABLE_PUBLIC_6: &str = "hetzner-disable-public-6";

pub const DEFAULT_IMAGE: &str = "ubuntu-20.04";
pub const DEFAULT_TYPE: &str = "cx11";
pub const DEFAULT_SSH_USER: &str = "root";
pub const DEFAULT_SSH_PORT: i64 = 22;
pub const DEFAULT_WAIT_ON_ERROR: i64 = 0;
pub const DEFAULT_WAIT_ON_POLLING: i64 = 1;
pub const DEFAULT_WAIT_FOR_RUNNING_TIMEOUT: i64 = 0;

/// Image names that older releases defaulted to; tolerated next to an
/// explicit image ID.
pub const LEGACY_DEFAULT_IMAGES: [&str; 4] =
    [DEFAULT_IMAGE, "ubuntu-18.04", "ubuntu-16.04", "debian-9"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagKind {
    String(&'static str),
    Int(i64),
    Bool,
    StringSlice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub name: &'static str,
    pub env_var: &'static str,
    pub usage: &'static str,
    pub kind: FlagKind,
}

impl Flag {
    const fn string(
        name: &'static str,
        env_var: &'static str,
        usage: &'static str,
        default: &'static str,
    ) -> Self {
        Self {
            name,
            env_var,
            usage,
            kind: FlagKind::String(default),
        }
    }

    const fn int(name: &'static str, env_var: &'static str, usage: &'static str, default: i64) -> Self {
        Self {
            name,
            env_var,
            usage,
            kind: FlagKind::Int(default),
        }
    }

    const fn bool(name: &'static str, env_var: &'static str, usage: &'static str) -> Self {
        Self {
            name,
            env_var,
            usage,
            kind: FlagKind::Bool,
        }
    }

    const fn slice(name: &'static str, env_var: &'static str, usage: &'static str) -> Self {
        Self {
            name,
            env_var,
            usage,
            kind: FlagKind::StringSlice,
        }
    }

    pub fn is_deprecated(&self) -> bool {
        self.usage.starts_with("DEPRECATED")
    }
}

pub const CREATE_FLAGS: &[Flag] = &[
    Flag::string(FLAG_API_TOKEN, "HETZNER_API_TOKEN", "Project-specific Hetzner API token", ""),
    Flag::string(FLAG_IMAGE, "HETZNER_IMAGE", "Image to use for server creation", ""),
    // Parsed by the configuration layer so that non-numeric input is reported
    // as a configuration error.
    Flag::string(FLAG_IMAGE_ID, "HETZNER_IMAGE_ID", "Image to use for server creation", ""),
    Flag::string(
        FLAG_IMAGE_ARCH,
        "HETZNER_IMAGE_ARCH",
        "Image architecture for lookup to use for server creation",
        "",
    ),
    Flag::string(FLAG_TYPE, "HETZNER_TYPE", "Server type to create", DEFAULT_TYPE),
    Flag::string(FLAG_LOCATION, "HETZNER_LOCATION", "Location to create machine at", ""),
    Flag::int(
        FLAG_EXISTING_KEY_ID,
        "HETZNER_EXISTING_KEY_ID",
        "Existing key ID to use for server; requires --hetzner-existing-key-path",
        0,
    ),
    Flag::string(
        FLAG_EXISTING_KEY_PATH,
        "HETZNER_EXISTING_KEY_PATH",
        "Path to existing key (new public key will be created unless --hetzner-existing-key-id is specified)",
        "",
    ),
    Flag::string(FLAG_USER_DATA, "HETZNER_USER_DATA", "Cloud-init based user data (inline).", ""),
    Flag::bool(
        LEGACY_FLAG_USER_DATA_FROM_FILE,
        "HETZNER_USER_DATA_FROM_FILE",
        "DEPRECATED, legacy.",
    ),
    Flag::string(
        FLAG_USER_DATA_FILE,
        "HETZNER_USER_DATA_FILE",
        "Cloud-init based user data (read from file)",
        "",
    ),
    Flag::slice(
        FLAG_VOLUMES,
        "HETZNER_VOLUMES",
        "Volume IDs or names which should be attached to the server",
    ),
    Flag::slice(
        FLAG_NETWORKS,
        "HETZNER_NETWORKS",
        "Network IDs or names which should be attached to the server private network interface",
    ),
    Flag::bool(FLAG_USE_PRIVATE_NETWORK, "HETZNER_USE_PRIVATE_NETWORK", "Use private network"),
    Flag::bool(FLAG_DISABLE_PUBLIC_4, "HETZNER_DISABLE_PUBLIC_IPV4", "Disable public ipv4"),
    Flag::bool(LEGACY_FLAG_DISABLE_PUBLIC_4, "HETZNER_DISABLE_PUBLIC_4", "DEPRECATED, legacy"),
    Flag::bool(FLAG_DISABLE_PUBLIC_6, "HETZNER_DISABLE_PUBLIC_IPV6", "Disable public ipv6"),
    Flag::bool(LEGACY_FLAG_DISABLE_PUBLIC_6, "HETZNER_DISABLE_PUBLIC_6", "DEPRECATED, legacy"),
    Flag::bool(FLAG_DISABLE_PUBLIC, "HETZNER_DISABLE_PUBLIC", "Disable public ip (v4 & v6)"),
    Flag::string(FLAG_PRIMARY_4, "HETZNER_PRIMARY_IPV4", "Existing primary IPv4 address", ""),
    Flag::string(FLAG_PRIMARY_6, "HETZNER_PRIMARY_IPV6", "Existing primary IPv6 address", ""),
    Flag::slice(
        FLAG_FIREWALLS,
        "HETZNER_FIREWALLS",
        "Firewall IDs or names which should be applied on the server",
    ),
    Flag::slice(
        FLAG_ADDITIONAL_KEYS,
        "HETZNER_ADDITIONAL_KEYS",
        "Additional public keys to be attached to the server",
    ),
    Flag::slice(
        FLAG_SERVER_LABEL,
        "HETZNER_SERVER_LABELS",
        "Key value pairs of additional labels to assign to the server",
    ),
    Flag::slice(
        FLAG_KEY_LABEL,
        "HETZNER_KEY_LABELS",
        "Key value pairs of additional labels to assign to the SSH key",
    ),
    Flag::string(
        FLAG_PLACEMENT_GROUP,
        "HETZNER_PLACEMENT_GROUP",
        "Placement group ID or name to add the server to; will be created if it does not exist",
        "",
    ),
    Flag::bool(
        FLAG_AUTO_SPREAD,
        "HETZNER_AUTO_SPREAD",
        "Auto-spread on a docker-machine-specific default placement group",
    ),
    Flag::string(FLAG_SSH_USER, "HETZNER_SSH_USER", "SSH username", DEFAULT_SSH_USER),
    Flag::int(FLAG_SSH_PORT, "HETZNER_SSH_PORT", "SSH port", DEFAULT_SSH_PORT),
    Flag::int(
        FLAG_WAIT_ON_ERROR,
        "HETZNER_WAIT_ON_ERROR",
        "Wait if an error happens while creating the server",
        DEFAULT_WAIT_ON_ERROR,
    ),
    Flag::int(
        FLAG_WAIT_ON_POLLING,
        "HETZNER_WAIT_ON_POLLING",
        "Period for waiting between requests when waiting for some state to change",
        DEFAULT_WAIT_ON_POLLING,
    ),
    Flag::int(
        FLAG_WAIT_FOR_RUNNING_TIMEOUT,
        "HETZNER_WAIT_FOR_RUNNING_TIMEOUT",
        "Period for waiting for a machine to be running before failing",
        DEFAULT_WAIT_FOR_RUNNING_TIMEOUT,
    ),
];

/// All options the driver understands, in declaration order.
pub fn create_flags() -> &'static [Flag] {
    CREATE_FLAGS
}

pub fn find_flag(name: &str) -> Option<&'static Flag> {
    CREATE_FLAGS.iter().find(|flag| flag.name == name)
}
