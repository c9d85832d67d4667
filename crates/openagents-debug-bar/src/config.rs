use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::de::{Deserializer, MapAccess, Visitor};
use thiserror::Error;

pub const DEFAULT_EDITOR: &str = "subl://open?url=file://%file&line=%line";
pub const DEFAULT_MAX_DEPTH: usize = 4;
pub const DEFAULT_MAX_LENGTH: usize = 1000;
const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_PANELS: &[(&str, bool)] = &[
    ("routing", false),
    ("database", true),
    ("view", false),
    ("event", false),
    ("session", true),
    ("request", true),
    ("auth", true),
    ("terminal", false),
];
const LEGACY_AUTH_PANEL: &str = "user";
const AUTH_PANEL: &str = "auth";

/// Which closing tag the bar is spliced against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendTo {
    #[default]
    Body,
    Html,
}

impl AppendTo {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::Html => "html",
        }
    }
}

impl FromStr for AppendTo {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "body" => Ok(Self::Body),
            "html" => Ok(Self::Html),
            _ => Err(ConfigError::InvalidValue {
                key: "appendTo",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelToggle {
    pub name: String,
    pub enabled: bool,
}

impl PanelToggle {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DebugBarConfig {
    pub enabled: bool,
    pub show_bar: bool,
    pub accepts: Vec<String>,
    pub append_to: AppendTo,
    pub editor: String,
    pub editor_mapping: BTreeMap<String, String>,
    pub max_depth: usize,
    pub max_length: usize,
    pub scream: bool,
    pub show_location: bool,
    pub strict_mode: bool,
    #[serde(deserialize_with = "deserialize_panels")]
    pub panels: Vec<PanelToggle>,
    pub base_path: Option<String>,
    pub max_body_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid debug bar config value for '{key}': '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("unknown debug bar panel '{0}'")]
    UnknownPanel(String),
    #[error("invalid debug bar config document: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl Default for DebugBarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            show_bar: true,
            accepts: Vec::new(),
            append_to: AppendTo::Body,
            editor: DEFAULT_EDITOR.to_string(),
            editor_mapping: BTreeMap::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_length: DEFAULT_MAX_LENGTH,
            scream: true,
            show_location: true,
            strict_mode: true,
            panels: DEFAULT_PANELS
                .iter()
                .map(|(name, enabled)| PanelToggle::new(*name, *enabled))
                .collect(),
            base_path: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl DebugBarConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let enabled = env_bool("OA_DEBUG_BAR_ENABLED").unwrap_or(defaults.enabled);
        let show_bar = env_bool("OA_DEBUG_BAR_SHOW_BAR").unwrap_or(defaults.show_bar);

        let accepts = env_text("OA_DEBUG_BAR_ACCEPTS")
            .map(|value| {
                parse_csv(value)
                    .into_iter()
                    .map(|accept| accept.to_lowercase())
                    .collect()
            })
            .unwrap_or(defaults.accepts);

        let append_to = match env_text("OA_DEBUG_BAR_APPEND_TO") {
            Some(value) => value.parse()?,
            None => defaults.append_to,
        };

        let editor = env_text("OA_DEBUG_BAR_EDITOR").unwrap_or(defaults.editor);

        let max_depth =
            env_usize("OA_DEBUG_BAR_MAX_DEPTH", "maxDepth")?.unwrap_or(defaults.max_depth);
        let max_length =
            env_usize("OA_DEBUG_BAR_MAX_LENGTH", "maxLength")?.unwrap_or(defaults.max_length);

        let scream = env_bool("OA_DEBUG_BAR_SCREAM").unwrap_or(defaults.scream);
        let show_location =
            env_bool("OA_DEBUG_BAR_SHOW_LOCATION").unwrap_or(defaults.show_location);
        let strict_mode = env_bool("OA_DEBUG_BAR_STRICT_MODE").unwrap_or(defaults.strict_mode);

        let panels = env_text("OA_DEBUG_BAR_PANELS")
            .map(parse_panel_toggles)
            .unwrap_or(defaults.panels);

        let base_path = env_text("OA_DEBUG_BAR_BASE_PATH");

        let max_body_bytes = env_usize("OA_DEBUG_BAR_MAX_BODY_BYTES", "maxBodyBytes")?
            .unwrap_or(defaults.max_body_bytes);

        Ok(Self {
            enabled,
            show_bar,
            accepts,
            append_to,
            editor,
            editor_mapping: defaults.editor_mapping,
            max_depth,
            max_length,
            scream,
            show_location,
            strict_mode,
            panels,
            base_path,
            max_body_bytes,
        })
    }

    /// Parses a JSON document; keys that are absent keep their defaults.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(document)?;
        config.accepts = config
            .accepts
            .into_iter()
            .map(|accept| accept.trim().to_lowercase())
            .filter(|accept| !accept.is_empty())
            .collect();
        Ok(config)
    }

    /// Enabled panel names in configuration order, with the legacy `user`
    /// key folded into `auth`.
    pub fn enabled_panels(&self) -> Vec<String> {
        let has_auth = self.panels.iter().any(|panel| panel.name == AUTH_PANEL);
        self.panels
            .iter()
            .filter_map(|panel| {
                if panel.name == LEGACY_AUTH_PANEL {
                    if has_auth {
                        return None;
                    }
                    return panel.enabled.then(|| AUTH_PANEL.to_string());
                }
                panel.enabled.then(|| panel.name.clone())
            })
            .collect()
    }
}

#[cfg(test)]
impl DebugBarConfig {
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            panels: vec![
                PanelToggle::new("request", true),
                PanelToggle::new("session", true),
                PanelToggle::new("database", true),
            ],
            ..Self::default()
        }
    }
}

fn env_text(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_text(key).map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_usize(key: &str, config_key: &'static str) -> Result<Option<usize>, ConfigError> {
    env_text(key)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                key: config_key,
                value,
            })
        })
        .transpose()
}

fn parse_panel_toggles(value: String) -> Vec<PanelToggle> {
    parse_csv(value)
        .into_iter()
        .map(|entry| match entry.split_once('=') {
            Some((name, enabled)) => PanelToggle::new(
                name.trim().to_lowercase(),
                matches!(enabled.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
            ),
            None => PanelToggle::new(entry.to_lowercase(), true),
        })
        .collect()
}

fn parse_csv(value: String) -> Vec<String> {
    value
        .split(',')
        .map(|segment| segment.trim().to_string())
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn deserialize_panels<'de, D>(deserializer: D) -> Result<Vec<PanelToggle>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PanelsVisitor;

    impl<'de> Visitor<'de> for PanelsVisitor {
        type Value = Vec<PanelToggle>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a map of panel name to enabled flag")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut panels = Vec::new();
            while let Some((name, enabled)) = map.next_entry::<String, bool>()? {
                panels.push(PanelToggle::new(name, enabled));
            }
            Ok(panels)
        }
    }

    deserializer.deserialize_map(PanelsVisitor)
}
