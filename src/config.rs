use std::{env, fmt, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    gateway::{ApiSettings, RetryPolicy},
    yaml_provider,
};

pub const DEFAULT_CONFIG_PATH: &str = "configs/project.yml";
pub const DEFAULT_WORKERS: usize = 4;

const DEFAULT_ITEM_NAMESPACE: u32 = 120;
const DEFAULT_PROPERTY_NAMESPACE: u32 = 122;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub wikibase: WikibaseConfig,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WikibaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_item_namespace")]
    pub item_namespace: u32,
    #[serde(default = "default_property_namespace")]
    pub property_namespace: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WikibaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_url: None,
            username: None,
            password: None,
            item_namespace: DEFAULT_ITEM_NAMESPACE,
            property_namespace: DEFAULT_PROPERTY_NAMESPACE,
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for WikibaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WikibaseConfig")
            .field("url", &self.url)
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("item_namespace", &self.item_namespace)
            .field("property_namespace", &self.property_namespace)
            .field("user_agent", &self.user_agent)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Default destination for the JSON run report.
    #[serde(default)]
    pub report: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry: RetrySettings::default(),
            report: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

fn default_item_namespace() -> u32 {
    DEFAULT_ITEM_NAMESPACE
}

fn default_property_namespace() -> u32 {
    DEFAULT_PROPERTY_NAMESPACE
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_max_attempts() -> u32 {
    RetrySettings::default().max_attempts
}

fn default_base_delay_ms() -> u64 {
    RetrySettings::default().base_delay_ms
}

fn default_max_delay_ms() -> u64 {
    RetrySettings::default().max_delay_ms
}

impl ProjectConfig {
    /// Loads the file and applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: ProjectConfig = yaml_provider::load_from_path(path)?;
        config.apply_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let config: ProjectConfig = yaml_provider::parse_str(input, "project config")?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides connection settings with whatever `lookup` returns for the
    /// `WIKIBASE_*` / `MEDIAWIKI_API_URL` variables. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let wikibase = &mut self.wikibase;
        if let Some(url) = get("WIKIBASE_URL") {
            wikibase.url = Some(url);
        }
        if let Some(api_url) = get("MEDIAWIKI_API_URL") {
            wikibase.api_url = Some(api_url);
        }
        if let Some(username) = get("WIKIBASE_USERNAME") {
            wikibase.username = Some(username);
        }
        if let Some(password) = get("WIKIBASE_PASSWORD") {
            wikibase.password = Some(password);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::new("project name must not be empty"));
        }
        if self.settings.workers == 0 {
            return Err(ConfigError::new("settings.workers must be at least 1"));
        }
        Ok(())
    }

    /// The API endpoint: `api_url`, or `{url}/w/api.php`.
    pub fn api_url(&self) -> Result<String, ConfigError> {
        if let Some(api_url) = &self.wikibase.api_url {
            return Ok(api_url.clone());
        }
        match &self.wikibase.url {
            Some(url) => Ok(format!("{}/w/api.php", url.trim_end_matches('/'))),
            None => Err(ConfigError::new(
                "no Wikibase URL configured (set wikibase.url or WIKIBASE_URL)",
            )),
        }
    }

    pub fn api_settings(&self) -> Result<ApiSettings, ConfigError> {
        let wikibase = &self.wikibase;
        if wikibase.username.is_some() != wikibase.password.is_some() {
            return Err(ConfigError::new(
                "wikibase.username and wikibase.password must be set together",
            ));
        }
        Ok(ApiSettings {
            api_url: self.api_url()?,
            username: wikibase.username.clone(),
            password: wikibase.password.clone(),
            item_namespace: wikibase.item_namespace,
            user_agent: wikibase.user_agent.clone().unwrap_or_else(|| {
                format!(
                    "wikibase-bulk/{} ({})",
                    env!("CARGO_PKG_VERSION"),
                    self.name
                )
            }),
            timeout: Duration::from_secs(wikibase.timeout_secs),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = self.settings.retry;
        RetryPolicy {
            max_attempts: retry.max_attempts,
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
        }
    }
}
