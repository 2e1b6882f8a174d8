//! Profile configuration for vmsteward.
//!
//! TOML profiles (one per vCenter) loaded and saved, password resolution (env + plaintext),
//! and translation to [`vmsteward_core::ConnectionConfig`] with any
//! polling overrides applied.
//!
//! Sources merge in order: built-in defaults, the TOML file, then
//! `VMSTEWARD_` environment variables. Nested keys are separated by a
//! double underscore, e.g. `VMSTEWARD_PROFILES__LAB__PORT=8443`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use vmsteward_core::{ConnectionConfig, DEFAULT_PORT, PollingConfig, TlsMode};

/// Environment variable consulted for the vCenter password when a profile
/// names no variable of its own.
pub const PASSWORD_ENV: &str = "VMSTEWARD_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    UnknownProfile { profile: String },

    #[error("no password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("config serialization failed: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is requested.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named vCenter profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name, p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

/// Settings shared by every profile unless the profile overrides them.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Skip certificate checks on ESXi hosts, which are usually
    /// self-signed.
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: default_insecure(),
            timeout: default_timeout(),
        }
    }
}

fn default_insecure() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}

/// A named vCenter profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// vCenter hostname or IP.
    pub host: String,

    pub port: Option<u16>,

    pub username: String,

    /// Password (plaintext; prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// CA certificate for verifying ESXi hosts during guest downloads.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    #[serde(default)]
    pub polling: PollingSection,
}

// ── Polling overrides ───────────────────────────────────────────────

macro_rules! polling_section {
    (seconds: [$($secs:ident),+ $(,)?], counts: [$($count:ident),+ $(,)?]) => {
        /// Per-profile overrides of [`PollingConfig`]. Durations are whole
        /// seconds; unset keys keep the built-in default.
        #[derive(Debug, Default, Deserialize, Serialize)]
        pub struct PollingSection {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $secs: Option<u64>,
            )+
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $count: Option<u32>,
            )+
        }

        impl PollingSection {
            /// Apply the overrides on top of `base`.
            pub fn apply(&self, mut base: PollingConfig) -> PollingConfig {
                $(
                    if let Some(secs) = self.$secs {
                        base.$secs = Duration::from_secs(secs);
                    }
                )+
                $(
                    if let Some(n) = self.$count {
                        base.$count = n;
                    }
                )+
                base
            }
        }
    };
}

polling_section! {
    seconds: [
        task_poll_interval,
        power_on_timeout,
        shutdown_task_timeout,
        hard_power_off_timeout,
        hard_restart_timeout,
        shutdown_settle,
        power_off_poll_interval,
        tools_poll_interval,
        invalid_fault_backoff,
        reboot_poll_interval,
        guest_poll_interval,
        reconfigure_timeout,
        annotation_timeout,
        move_timeout,
        destroy_timeout,
    ],
    counts: [
        power_off_polls_per_refresh,
        power_off_refresh_limit,
        tools_polls_per_refresh,
        tools_refresh_limit,
        soft_restart_cycles,
        reboot_attempts,
        reboot_start_polls,
        reboot_finish_polls,
    ]
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "vmsteward", "vmsteward").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("vmsteward");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the platform config file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment. A missing file is
/// treated as empty.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading configuration");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VMSTEWARD_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if it can't be loaded.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Write `cfg` to the platform config file.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

/// Write `cfg` to `path`, creating parent directories as needed.
pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "configuration saved");
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the vCenter password: the profile's `password_env`, then
/// [`PASSWORD_ENV`], then plaintext in the profile.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
        debug!(profile = profile_name, env = %env_name, "password variable not set");
    }

    if let Ok(val) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(val));
    }

    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `ConnectionConfig` from a profile, with `defaults` filling in
/// what the profile leaves unset.
pub fn profile_to_connection_config(
    defaults: &Defaults,
    profile: &Profile,
    profile_name: &str,
) -> Result<ConnectionConfig, ConfigError> {
    let host = profile.host.trim();
    if host.is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: format!("profile '{profile_name}' has an empty host"),
        });
    }
    if host.contains("://") {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: format!("expected a hostname, got URL '{host}'"),
        });
    }

    let password = resolve_password(profile, profile_name)?;

    let timeout = profile.timeout.unwrap_or(defaults.timeout);
    if timeout == 0 {
        return Err(ConfigError::Validation {
            field: "timeout".into(),
            reason: "must be at least one second".into(),
        });
    }

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    Ok(ConnectionConfig {
        host: host.to_owned(),
        port: profile.port.unwrap_or(DEFAULT_PORT),
        username: profile.username.clone(),
        password,
        tls,
        timeout: Duration::from_secs(timeout),
        polling: profile.polling.apply(PollingConfig::default()),
    })
}

/// Load config and build the `ConnectionConfig` for `profile` (or the
/// default profile).
pub fn load_connection_config(profile: Option<&str>) -> Result<ConnectionConfig, ConfigError> {
    let config = load_config()?;
    let (name, selected) = config.profile(profile)?;
    profile_to_connection_config(&config.defaults, selected, name)
}
