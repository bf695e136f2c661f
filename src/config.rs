//! Layered configuration: defaults, optional YAML file, `CRM_AUTOREFRESH_*` environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use action_locator::LocatorConfig;
use autorefresh_core_types::{TargetPage, TargetPageError, DEFAULT_PATH_MARKERS, DEFAULT_ROUTE_NAME};
use cdp_adapter::CdpConfig;
use config::{Environment, File, FileFormat};
use host_perceiver::HostOptions;
use refresh_scheduler::Timing;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const ENV_PREFIX: &str = "CRM_AUTOREFRESH";
const APP_DIR: &str = "crm-autorefresh";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    Missing(PathBuf),
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid target page: {0}")]
    Target(#[from] TargetPageError),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub target: TargetSection,
    pub locator: LocatorSection,
    pub timing: TimingSection,
    pub cdp: CdpConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSection {
    pub path_markers: Vec<String>,
    pub route_name: String,
    pub component_name: String,
    pub collection_field: String,
    pub app_selector: String,
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            path_markers: DEFAULT_PATH_MARKERS.iter().map(|m| m.to_string()).collect(),
            route_name: DEFAULT_ROUTE_NAME.to_string(),
            component_name: "Leads".to_string(),
            collection_field: "leads".to_string(),
            app_selector: "#app".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSection {
    pub tooltip_attributes: Vec<String>,
    pub tooltip_keyword: String,
    pub icon_min_path_len: usize,
    pub max_snapshot_nodes: usize,
}

impl Default for LocatorSection {
    fn default() -> Self {
        let locator = LocatorConfig::default();
        Self {
            tooltip_attributes: locator.tooltip_attributes,
            tooltip_keyword: locator.tooltip_keyword,
            icon_min_path_len: locator.icon_min_path_len,
            max_snapshot_nodes: HostOptions::default().max_nodes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub refresh_interval_ms: u64,
    pub route_settle_ms: u64,
    pub history_settle_ms: u64,
    pub boot_poll_ms: u64,
    pub boot_timeout_ms: u64,
    pub boot_retry_delay_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        let timing = Timing::default();
        Self {
            refresh_interval_ms: timing.refresh_interval.as_millis() as u64,
            route_settle_ms: timing.route_settle.as_millis() as u64,
            history_settle_ms: timing.history_settle.as_millis() as u64,
            boot_poll_ms: timing.boot_poll.as_millis() as u64,
            boot_timeout_ms: timing.boot_timeout.as_millis() as u64,
            boot_retry_delay_ms: timing.boot_retry_delay.as_millis() as u64,
        }
    }
}

/// Effective configuration plus the file it came from, if any.
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

/// `<config_dir>/crm-autorefresh/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.yaml"))
}

/// An explicit path must exist; the default path is used only when present.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let source = match explicit {
        Some(path) if !path.exists() => return Err(ConfigError::Missing(path.to_path_buf())),
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };

    let defaults = config::Config::try_from(&AppConfig::default())?;
    let mut builder = config::Config::builder().add_source(defaults);
    if let Some(path) = &source {
        builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Yaml));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("target.path_markers")
            .with_list_parse_key("locator.tooltip_attributes"),
    );

    let config: AppConfig = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(LoadedConfig { config, source })
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target_page()?;
        if self.target.component_name.trim().is_empty() {
            return Err(ConfigError::invalid("target.component_name", "must not be empty"));
        }
        if self.locator.tooltip_keyword.trim().is_empty() {
            return Err(ConfigError::invalid("locator.tooltip_keyword", "must not be empty"));
        }
        if self.locator.max_snapshot_nodes == 0 {
            return Err(ConfigError::invalid("locator.max_snapshot_nodes", "must be positive"));
        }
        if self.timing.refresh_interval_ms == 0 {
            return Err(ConfigError::invalid("timing.refresh_interval_ms", "must be positive"));
        }
        if self.timing.boot_poll_ms == 0 {
            return Err(ConfigError::invalid("timing.boot_poll_ms", "must be positive"));
        }
        if self.cdp.default_deadline_ms == 0 {
            return Err(ConfigError::invalid("cdp.default_deadline_ms", "must be positive"));
        }
        if let Some(ws) = &self.cdp.websocket_url {
            let url = Url::parse(ws)
                .map_err(|err| ConfigError::invalid("cdp.websocket_url", err.to_string()))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(ConfigError::invalid(
                    "cdp.websocket_url",
                    format!("unsupported scheme {}", url.scheme()),
                ));
            }
        }
        Url::parse(&self.cdp.http_endpoint)
            .map_err(|err| ConfigError::invalid("cdp.http_endpoint", err.to_string()))?;
        Ok(())
    }

    pub fn target_page(&self) -> Result<TargetPage, TargetPageError> {
        let route = Some(self.target.route_name.clone()).filter(|r| !r.trim().is_empty());
        TargetPage::new(self.target.path_markers.iter().cloned(), route)
    }

    pub fn locator_config(&self) -> Result<LocatorConfig, TargetPageError> {
        Ok(LocatorConfig {
            tooltip_attributes: self.locator.tooltip_attributes.clone(),
            tooltip_keyword: self.locator.tooltip_keyword.clone(),
            icon_min_path_len: self.locator.icon_min_path_len,
            target: self.target_page()?,
            component_name: self.target.component_name.clone(),
            collection_field: self.target.collection_field.clone(),
        })
    }

    /// Tooltip attributes are always captured on top of the port defaults.
    pub fn host_options(&self) -> HostOptions {
        let mut options = HostOptions {
            app_selector: self.target.app_selector.clone(),
            max_nodes: self.locator.max_snapshot_nodes,
            ..HostOptions::default()
        };
        for attr in &self.locator.tooltip_attributes {
            if !options.capture_attributes.contains(attr) {
                options.capture_attributes.push(attr.clone());
            }
        }
        options
    }

    pub fn timing(&self) -> Timing {
        let t = &self.timing;
        Timing {
            refresh_interval: Duration::from_millis(t.refresh_interval_ms),
            route_settle: Duration::from_millis(t.route_settle_ms),
            history_settle: Duration::from_millis(t.history_settle_ms),
            boot_poll: Duration::from_millis(t.boot_poll_ms),
            boot_timeout: Duration::from_millis(t.boot_timeout_ms),
            boot_retry_delay: Duration::from_millis(t.boot_retry_delay_ms),
        }
    }
}
