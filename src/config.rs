use crate::{retry::RetryPolicy, types::Credentials};
use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

const APP_DIR_NAME: &str = "AutoNet4AHU";
const CONFIG_FILE_NAME: &str = "config.json";

/// Gateway endpoints of the ePortal deployment
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct PortalEndpoints {
    pub login_url: String,
    pub campus_check_url: String,
    pub internet_check_url: String,
}

impl Default for PortalEndpoints {
    fn default() -> Self {
        PortalEndpoints {
            login_url: "http://172.16.253.3:801/eportal/".to_string(),
            campus_check_url: "http://172.16.253.3/a79.htm".to_string(),
            internet_check_url: "https://www.baidu.com".to_string(),
        }
    }
}

/// Login configuration as stored in `config.json`
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LoginConfig {
    #[serde(default)]
    pub student_id: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub webhook_urls: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default, skip_serializing_if = "is_default_portal")]
    pub portal: PortalEndpoints,
}

fn default_max_retries() -> u32 {
    RetryPolicy::DEFAULT_MAX_ATTEMPTS
}

fn default_retry_interval_secs() -> u64 {
    RetryPolicy::DEFAULT_INTERVAL.as_secs()
}

fn is_default_portal(portal: &PortalEndpoints) -> bool {
    *portal == PortalEndpoints::default()
}

impl Default for LoginConfig {
    fn default() -> Self {
        LoginConfig {
            student_id: String::new(),
            password: String::new(),
            webhook_urls: Vec::new(),
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval_secs(),
            portal: PortalEndpoints::default(),
        }
    }
}

impl LoginConfig {
    /// Account and password are both present
    pub fn is_complete(&self) -> bool {
        !self.student_id.trim().is_empty() && !self.password.is_empty()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.is_complete()
            .then(|| Credentials::new(self.student_id.trim(), self.password.clone()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_interval_secs),
        )
    }

    /// Load the configuration
    ///
    /// The user config directory wins over `app_path`. Files that cannot be
    /// read or parsed are skipped; without any usable file the defaults are
    /// returned.
    pub fn load(app_path: &Path) -> Self {
        Self::load_from(user_config_path().as_deref(), app_path)
    }

    pub fn load_from(user_path: Option<&Path>, app_path: &Path) -> Self {
        if let Some(user_path) = user_path.filter(|p| p.exists()) {
            match Self::read(user_path) {
                Ok(config) => {
                    info!("loaded config from user directory: {user_path:?}");
                    return config;
                }
                Err(e) => error!("failed to load config from user directory: {e:#}"),
            }
        }

        if app_path.exists() {
            match Self::read(app_path) {
                Ok(config) => {
                    info!("loaded config from {app_path:?}");
                    return config;
                }
                Err(e) => {
                    error!("failed to load config from {app_path:?}: {e:#}");
                    return Self::default();
                }
            }
        }

        warn!("no config file found, using defaults");
        Self::default()
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).context(format!("failed to read config file: {path:?}"))?;
        serde_json::from_str(&content).context(format!("failed to parse config file: {path:?}"))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context(format!("failed to create config directory: {dir:?}"))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, json).context(format!("failed to write config file: {path:?}"))
    }

    /// Persist the configuration on behalf of the CLI
    ///
    /// Writes to the user config directory and falls back to `app_path`.
    /// Returns the path that was written.
    pub fn save(&self, app_path: &Path) -> Result<PathBuf> {
        self.save_to(user_config_path().as_deref(), app_path)
    }

    pub fn save_to(&self, user_path: Option<&Path>, app_path: &Path) -> Result<PathBuf> {
        if let Some(user_path) = user_path {
            match self.write(user_path) {
                Ok(()) => {
                    info!("config saved to user directory: {user_path:?}");
                    return Ok(user_path.to_path_buf());
                }
                Err(e) => error!("failed to save config to user directory: {e:#}"),
            }
        }

        self.write(app_path)
            .context("failed to save config to app directory")?;
        info!("config saved to {app_path:?}");
        Ok(app_path.to_path_buf())
    }
}

/// `$AUTONET_CONFIG_DIR/config.json` or the per-user application support directory
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(dir) = env::var("AUTONET_CONFIG_DIR") {
        return Some(PathBuf::from(dir).join(CONFIG_FILE_NAME));
    }

    let home = PathBuf::from(env::var_os("HOME")?);
    let base = if cfg!(target_os = "macos") {
        home.join("Library").join("Application Support")
    } else {
        env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".config"))
    };

    Some(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
