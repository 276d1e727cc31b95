use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use todo_core::store::DEFAULT_STORAGE_KEY;
use todo_notify::gateway::DEFAULT_WORKER_SCRIPT;

/// How the console platform answers notification permission requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NotificationMode {
    #[default]
    Prompt,
    Granted,
    Denied,
    Unsupported,
}

impl FromStr for NotificationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prompt" | "default" => Ok(Self::Prompt),
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            "unsupported" | "off" => Ok(Self::Unsupported),
            other => Err(anyhow!("unknown notification mode `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub storage_key: String,
    pub worker_script: String,
    pub app_url: String,
    pub icon: Option<String>,
    pub notifications: NotificationMode,
    pub worker_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(dir) = lookup("TASKMASTER_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Some(key) = lookup("TASKMASTER_STORAGE_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                config.storage_key = key.to_string();
            }
        }
        if let Some(script) = lookup("TASKMASTER_WORKER_SCRIPT") {
            let script = script.trim();
            if !script.is_empty() {
                config.worker_script = script.to_string();
            }
        }
        if let Some(url) = lookup("TASKMASTER_APP_URL") {
            let url = url.trim();
            if !url.is_empty() {
                config.app_url = url.to_string();
            }
        }
        if let Some(icon) = lookup("TASKMASTER_ICON") {
            let icon = icon.trim();
            config.icon = (!icon.is_empty()).then(|| icon.to_string());
        }
        if let Some(mode) = lookup("TASKMASTER_NOTIFICATIONS") {
            match mode.parse::<NotificationMode>() {
                Ok(mode) => config.notifications = mode,
                Err(err) => warn!(%err, "ignoring TASKMASTER_NOTIFICATIONS"),
            }
        }
        if let Some(flag) = lookup("TASKMASTER_WORKER") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "on" | "1" | "true" | "yes" => config.worker_enabled = true,
                "off" | "0" | "false" | "no" => config.worker_enabled = false,
                other => warn!(value = other, "ignoring TASKMASTER_WORKER"),
            }
        }
        info!(data_dir = %config.data_dir.display(), key = %config.storage_key, "configuration loaded");
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            worker_script: DEFAULT_WORKER_SCRIPT.to_string(),
            app_url: "/".to_string(),
            icon: None,
            notifications: NotificationMode::default(),
            worker_enabled: true,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("taskmaster")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.storage_key, "todo-storage");
        assert_eq!(config.worker_script, "/sw.js");
        assert!(config.worker_enabled);
        assert!(config.data_dir.ends_with("taskmaster"));
    }

    #[test]
    fn environment_overrides_apply() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TASKMASTER_DATA_DIR", "/tmp/tm"),
            ("TASKMASTER_STORAGE_KEY", "work"),
            ("TASKMASTER_NOTIFICATIONS", "Granted"),
            ("TASKMASTER_WORKER", "off"),
            ("TASKMASTER_APP_URL", "/app/"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tm"));
        assert_eq!(config.storage_key, "work");
        assert_eq!(config.notifications, NotificationMode::Granted);
        assert!(!config.worker_enabled);
        assert_eq!(config.app_url, "/app/");
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TASKMASTER_NOTIFICATIONS", "sometimes"),
            ("TASKMASTER_WORKER", "maybe"),
            ("TASKMASTER_STORAGE_KEY", "   "),
        ]))
        .unwrap();
        assert_eq!(config.notifications, NotificationMode::Prompt);
        assert!(config.worker_enabled);
        assert_eq!(config.storage_key, "todo-storage");
    }
}
