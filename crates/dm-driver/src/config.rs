//! Binding raw options into a validated [`DriverConfig`].

use tracing::warn;

use crate::driver::{Driver, DriverConfig};
use crate::error::{ConfigError, Result};
use crate::flags::*;
use crate::options::DriverOptions;
use crate::placement::AUTO_SPREAD_PG_NAME;
use crate::types::{Architecture, Labels};

/// Everything binding produces, assigned to the driver in one step.
struct Bound {
    config: DriverConfig,
    ssh_user: String,
    ssh_port: u16,
    key_id: Option<i64>,
}

impl Driver {
    /// Validate `opts` and replace the configuration with them.
    ///
    /// Nothing on the driver changes unless every rule passes.
    pub fn set_config_from_flags(&mut self, opts: &dyn DriverOptions) -> Result<()> {
        let bound = self.bind(opts)?;

        self.observe("driver config", &bound.config.redacted());
        if bound.config.uses_deprecated_flags {
            warn!("!!!! BREAKING-V5 !!!!");
            warn!("your configuration uses deprecated flags and will stop working as-is from v5 onwards");
            warn!("check preceding output for 'DEPRECATED' log statements");
            warn!("!!!! /BREAKING-V5 !!!!");
        }

        self.config = bound.config;
        self.base.ssh_user = bound.ssh_user;
        self.base.ssh_port = bound.ssh_port;
        self.remote.is_existing_key = bound.key_id.is_some();
        self.remote.key_id = bound.key_id;
        self.cache = Default::default();
        Ok(())
    }

    fn bind(&self, opts: &dyn DriverOptions) -> std::result::Result<Bound, ConfigError> {
        let mut cfg = DriverConfig {
            access_token: opts.string(FLAG_API_TOKEN),
            image: opts.string(FLAG_IMAGE),
            ..DriverConfig::default()
        };

        let image_id = opts.int(FLAG_IMAGE_ID).map_err(|e| self.flag_failure(&cfg, e.message))?;
        cfg.image_id = (image_id != 0).then_some(image_id);
        cfg.image_arch = match opts.string(FLAG_IMAGE_ARCH).as_str() {
            "" => None,
            raw => Some(
                raw.parse::<Architecture>()
                    .map_err(|e| self.flag_failure(&cfg, e))?,
            ),
        };
        cfg.location = opts.string(FLAG_LOCATION);
        cfg.server_type = opts.string(FLAG_TYPE);

        let key_id = opts
            .int(FLAG_EXISTING_KEY_ID)
            .map_err(|e| self.flag_failure(&cfg, e.message))?;
        cfg.existing_key_path = opts.string(FLAG_EXISTING_KEY_PATH);

        self.bind_user_data(opts, &mut cfg)?;

        cfg.volumes = opts.string_slice(FLAG_VOLUMES);
        cfg.networks = opts.string_slice(FLAG_NETWORKS);
        let disable_public = opts.bool(FLAG_DISABLE_PUBLIC);
        cfg.use_private_network = opts.bool(FLAG_USE_PRIVATE_NETWORK) || disable_public;
        cfg.disable_public_ipv4 =
            deprecated_bool(opts, &mut cfg, FLAG_DISABLE_PUBLIC_4, LEGACY_FLAG_DISABLE_PUBLIC_4)
                || disable_public;
        cfg.disable_public_ipv6 =
            deprecated_bool(opts, &mut cfg, FLAG_DISABLE_PUBLIC_6, LEGACY_FLAG_DISABLE_PUBLIC_6)
                || disable_public;
        cfg.primary_ipv4 = opts.string(FLAG_PRIMARY_4);
        cfg.primary_ipv6 = opts.string(FLAG_PRIMARY_6);
        cfg.firewalls = opts.string_slice(FLAG_FIREWALLS);
        cfg.additional_keys = opts.string_slice(FLAG_ADDITIONAL_KEYS);

        let ssh_user = opts.string(FLAG_SSH_USER);
        let raw_port = opts
            .int(FLAG_SSH_PORT)
            .map_err(|e| self.flag_failure(&cfg, e.message))?;
        let ssh_port = u16::try_from(raw_port).map_err(|_| {
            self.flag_failure(&cfg, format!("--{FLAG_SSH_PORT} must be a valid port, got {raw_port}"))
        })?;

        cfg.wait_on_error_secs = self.seconds(opts, &cfg, FLAG_WAIT_ON_ERROR)?;
        cfg.wait_on_polling_secs = self.seconds(opts, &cfg, FLAG_WAIT_ON_POLLING)?;
        cfg.wait_for_running_timeout_secs =
            self.seconds(opts, &cfg, FLAG_WAIT_FOR_RUNNING_TIMEOUT)?;

        cfg.placement_group = opts.string(FLAG_PLACEMENT_GROUP);
        if opts.bool(FLAG_AUTO_SPREAD) {
            if !cfg.placement_group.is_empty() {
                return Err(self.flag_failure(
                    &cfg,
                    format!("--{FLAG_AUTO_SPREAD} and --{FLAG_PLACEMENT_GROUP} are mutually exclusive"),
                ));
            }
            cfg.placement_group = AUTO_SPREAD_PG_NAME.into();
        }

        cfg.server_labels = parse_labels(&opts.string_slice(FLAG_SERVER_LABEL), "server")
            .map_err(|e| self.flag_failure(&cfg, e))?;
        cfg.key_labels = parse_labels(&opts.string_slice(FLAG_KEY_LABEL), "key")
            .map_err(|e| self.flag_failure(&cfg, e))?;

        if cfg.access_token.is_empty() {
            return Err(self.flag_failure(
                &cfg,
                format!("hetzner requires --{FLAG_API_TOKEN} to be set"),
            ));
        }

        self.verify_image_flags(&mut cfg)?;
        self.verify_network_flags(&cfg)?;

        Ok(Bound {
            config: cfg,
            ssh_user,
            ssh_port,
            key_id: (key_id != 0).then_some(key_id),
        })
    }

    fn bind_user_data(
        &self,
        opts: &dyn DriverOptions,
        cfg: &mut DriverConfig,
    ) -> std::result::Result<(), ConfigError> {
        let user_data = opts.string(FLAG_USER_DATA);
        let user_data_file = opts.string(FLAG_USER_DATA_FILE);

        if opts.bool(LEGACY_FLAG_USER_DATA_FROM_FILE) {
            if !user_data_file.is_empty() {
                return Err(self.flag_failure(
                    cfg,
                    format!(
                        "--{FLAG_USER_DATA_FILE} and --{LEGACY_FLAG_USER_DATA_FROM_FILE} are mutually exclusive"
                    ),
                ));
            }
            warn!(
                "--{LEGACY_FLAG_USER_DATA_FROM_FILE} is DEPRECATED FOR REMOVAL, pass '--{FLAG_USER_DATA_FILE} \"{user_data}\"'"
            );
            cfg.uses_deprecated_flags = true;
            cfg.user_data_file = user_data;
            return Ok(());
        }

        cfg.user_data = user_data;
        cfg.user_data_file = user_data_file;
        if !cfg.user_data.is_empty() && !cfg.user_data_file.is_empty() {
            return Err(self.flag_failure(
                cfg,
                format!("--{FLAG_USER_DATA} and --{FLAG_USER_DATA_FILE} are mutually exclusive"),
            ));
        }
        Ok(())
    }

    fn verify_image_flags(&self, cfg: &mut DriverConfig) -> std::result::Result<(), ConfigError> {
        match cfg.image_id {
            Some(_) if !cfg.image.is_empty() && !LEGACY_DEFAULT_IMAGES.contains(&cfg.image.as_str()) => {
                Err(self.flag_failure(
                    cfg,
                    format!("--{FLAG_IMAGE} and --{FLAG_IMAGE_ID} are mutually exclusive"),
                ))
            }
            Some(_) if cfg.image_arch.is_some() => Err(self.flag_failure(
                cfg,
                format!("--{FLAG_IMAGE_ARCH} and --{FLAG_IMAGE_ID} are mutually exclusive"),
            )),
            None if cfg.image.is_empty() => {
                cfg.image = DEFAULT_IMAGE.into();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn verify_network_flags(&self, cfg: &DriverConfig) -> std::result::Result<(), ConfigError> {
        if cfg.disable_public_ipv4 && cfg.disable_public_ipv6 && !cfg.use_private_network {
            return Err(self.flag_failure(
                cfg,
                format!(
                    "--{FLAG_USE_PRIVATE_NETWORK} must be used if public networking is disabled (hint: implicitly set by --{FLAG_DISABLE_PUBLIC})"
                ),
            ));
        }
        if cfg.disable_public_ipv4 && !cfg.primary_ipv4.is_empty() {
            return Err(self.flag_failure(
                cfg,
                format!("--{FLAG_PRIMARY_4} and --{FLAG_DISABLE_PUBLIC_4} are mutually exclusive"),
            ));
        }
        if cfg.disable_public_ipv6 && !cfg.primary_ipv6.is_empty() {
            return Err(self.flag_failure(
                cfg,
                format!("--{FLAG_PRIMARY_6} and --{FLAG_DISABLE_PUBLIC_6} are mutually exclusive"),
            ));
        }
        Ok(())
    }

    fn seconds(
        &self,
        opts: &dyn DriverOptions,
        cfg: &DriverConfig,
        flag: &str,
    ) -> std::result::Result<u64, ConfigError> {
        let raw = opts.int(flag).map_err(|e| self.flag_failure(cfg, e.message))?;
        u64::try_from(raw)
            .map_err(|_| self.flag_failure(cfg, format!("--{flag} must not be negative, got {raw}")))
    }

    /// Build a configuration error, attaching a redacted snapshot of `cfg`
    /// when instrumentation is on.
    fn flag_failure(&self, cfg: &DriverConfig, message: impl Into<String>) -> ConfigError {
        let mut err = ConfigError::new(message);
        if self.instrumentation.enabled() {
            err.snapshot = serde_json::to_string_pretty(&cfg.redacted()).ok();
        }
        err
    }
}

fn deprecated_bool(
    opts: &dyn DriverOptions,
    cfg: &mut DriverConfig,
    flag: &str,
    deprecated: &str,
) -> bool {
    if opts.bool(deprecated) {
        warn!("--{deprecated} is DEPRECATED FOR REMOVAL, use --{flag} instead");
        cfg.uses_deprecated_flags = true;
        return true;
    }
    opts.bool(flag)
}

fn parse_labels(raw: &[String], kind: &str) -> std::result::Result<Labels, String> {
    raw.iter()
        .map(|label| {
            label
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("{kind} label {label} is not in key=value format"))
        })
        .collect()
}
