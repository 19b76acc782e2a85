//! Purpose: Load the immutable `krb5-sync` configuration from a TOML file.
//! Exports: `SyncConfig`, `DeliveryConfig`, `CONFIG_ENV_VAR`, `DEFAULT_CONFIG_PATH`.
//! Role: Single source of settings for the CLI and for embedding hosts.
//! Invariants: Loaded once and passed by reference; never mutated afterwards.
//! Invariants: Unknown keys are rejected so typos surface as config errors.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::error::{Error, ErrorKind};

/// Environment variable override for the config path.
pub const CONFIG_ENV_VAR: &str = "KRB5_SYNC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/krb5-sync.toml";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Directory holding queued changes and the `.lock` file.
    #[serde(default)]
    pub queue_dir: Option<PathBuf>,
    /// Queue every change instead of attempting delivery first.
    #[serde(default)]
    pub queue_only: bool,
    /// Realm applied to queued account names when they are replayed.
    #[serde(default)]
    pub default_realm: Option<String>,
    /// Instances whose principals are propagated.
    #[serde(default)]
    pub ad_instances: Vec<String>,
    /// Instance propagated as the base account downstream.
    #[serde(default)]
    pub ad_base_instance: Option<String>,
    #[serde(default)]
    pub delivery: Option<DeliveryConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Program and leading arguments; operation and account are appended.
    pub command: Vec<String>,
}

impl SyncConfig {
    /// Loads from `path`, else `$KRB5_SYNC_CONFIG`, else the default path.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let resolved = resolve_path(path);
        let content = fs::read_to_string(&resolved).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message("cannot read configuration file")
                .with_path(&resolved)
                .with_source(err)
        })?;
        let config = Self::from_toml(&content).map_err(|err| err.with_path(&resolved))?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message("cannot parse configuration")
                .with_source(err)
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if let Some(delivery) = &self.delivery {
            if delivery.command.is_empty() {
                return Err(Error::new(ErrorKind::Config)
                    .with_message("delivery.command must name a program"));
            }
        }
        if self.ad_instances.iter().any(String::is_empty) {
            return Err(Error::new(ErrorKind::Config).with_message("ad_instances contains an empty name"));
        }
        Ok(())
    }

    /// Whether an instance principal may be propagated.
    pub fn instance_allowed(&self, instance: &str) -> bool {
        self.ad_base_instance.as_deref() == Some(instance)
            || self.ad_instances.iter().any(|allowed| allowed == instance)
    }
}

fn resolve_path(path: Option<&Path>) -> PathBuf {
    if let Some(path) = path {
        return path.to_path_buf();
    }
    if let Some(env_path) = std::env::var_os(CONFIG_ENV_VAR) {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}
