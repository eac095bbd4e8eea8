use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    time::Duration,
};

use appliance_update::{EngineSettings, retry::Backoff};
use figment::providers::Format as _;
use secrecy::SecretString;
use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::debug;
use url::Url;

mod args;
pub use args::Args;

#[cfg(test)]
mod tests;

pub const ENV_VAR_PREFIX: &str = "APPCTL_";
const CFG_ENV_VAR: &str = "APPCTL_CONFIG";

/// Tool settings. The only entry point to construct them is [`Settings::get`].
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding one sub-directory per instance.
    pub parent_dir: PathBuf,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reboot_window: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    pub upload_attempts: u32,
    /// External packer executable.
    pub packer: PathBuf,
    /// Go toolchain executable.
    pub go: PathBuf,
    pub push_server: Option<Url>,
    pub push_token: Option<SecretString>,
}

impl Default for Settings {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            parent_dir: dirs::home_dir().unwrap_or_default().join("appliances"),
            request_timeout: engine.request_timeout,
            reboot_window: engine.reboot_window,
            poll_interval: engine.poll_interval,
            upload_attempts: engine.upload_backoff.attempts,
            packer: PathBuf::from("appliance-packer"),
            go: PathBuf::from("go"),
            push_server: None,
            push_token: None,
        }
    }
}

impl Settings {
    /// Layers, in increasing precedence, built-in defaults, the TOML file at
    /// `config`, `env_prefix`ed environment variables and command line
    /// arguments.
    pub fn get<P: AsRef<Path>>(
        args: &Args,
        config: P,
        env_prefix: &str,
    ) -> figment::error::Result<Settings> {
        figment::Figment::new()
            .merge(figment::providers::Toml::file(config))
            .merge(figment::providers::Env::prefixed(env_prefix))
            .merge(figment::providers::Serialized::defaults(args))
            .extract()
    }

    /// Engine tunables derived from these settings.
    pub fn engine(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            request_timeout: self.request_timeout,
            reboot_window: self.reboot_window,
            poll_interval: self.poll_interval,
            upload_backoff: Backoff {
                attempts: self.upload_attempts.max(1),
                ..defaults.upload_backoff
            },
            ..defaults
        }
    }
}

/// Where the settings file is read from: `--config`, then `APPCTL_CONFIG`,
/// then the per-user configuration directory.
pub fn config_source(args: &Args) -> Cow<'_, Path> {
    if let Some(config) = &args.config {
        debug!("using config provided by command line argument: `{}`", config.display());
        Cow::Borrowed(config.as_path())
    } else if let Some(config) = figment::providers::Env::var(CFG_ENV_VAR) {
        debug!("using config set in environment variable `{CFG_ENV_VAR}={config}`");
        Cow::Owned(PathBuf::from(config))
    } else {
        let default = dirs::config_dir()
            .unwrap_or_default()
            .join("appctl")
            .join("config.toml");
        debug!("using default config at `{}`", default.display());
        Cow::Owned(default)
    }
}
