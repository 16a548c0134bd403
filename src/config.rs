//! Configuration from the environment

use crate::tracker::ConfirmationPolicy;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CONFIRM_TOOLS: &str = "getWeatherInformation";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is set but empty")]
    Empty { var: &'static str },
    #[error("{var} must be an http(s) URL, got {value:?}")]
    InvalidUrl { var: &'static str, value: String },
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `None` leaves the app usable but every send fails with a banner
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Tools that need a human decision before they run
    pub confirm_tools: Vec<String>,
    pub prefs_path: PathBuf,
    pub log_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let home = home_dir();
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            confirm_tools: split_list(DEFAULT_CONFIRM_TOOLS),
            prefs_path: home.join(".recipe-chat/prefs.json"),
            log_path: home.join(".recipe-chat/recipe-chat.log"),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Build from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string());

        config.api_key = get("OPENAI_API_KEY").filter(|key| !key.is_empty());
        if let Some(model) = get("RECIPE_CHAT_MODEL") {
            if model.is_empty() {
                return Err(ConfigError::Empty {
                    var: "RECIPE_CHAT_MODEL",
                });
            }
            config.model = model;
        }
        if let Some(url) = get("RECIPE_CHAT_BASE_URL") {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl {
                    var: "RECIPE_CHAT_BASE_URL",
                    value: url,
                });
            }
            config.base_url = url;
        }
        // An empty list is allowed and turns confirmation off
        if let Some(tools) = get("RECIPE_CHAT_CONFIRM_TOOLS") {
            config.confirm_tools = split_list(&tools);
        }
        if let Some(path) = get("RECIPE_CHAT_PREFS").filter(|p| !p.is_empty()) {
            config.prefs_path = PathBuf::from(path);
        }
        if let Some(path) = get("RECIPE_CHAT_LOG").filter(|p| !p.is_empty()) {
            config.log_path = PathBuf::from(path);
        }
        Ok(config)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy::new(self.confirm_tools.iter().cloned())
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
