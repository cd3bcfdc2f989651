//! Configuration file parsing for otter-bridge.toml.

use otter_bridge::BridgeConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Bridge settings, passed through unchanged
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Demo application settings
    #[serde(default)]
    pub app: AppConfig,
}

/// The demo application started after the bundle loads.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Key passed to `AppRegistry.runApplication`
    #[serde(default = "default_app_key")]
    pub key: String,

    /// Root tag passed in the launch params
    #[serde(default = "default_root_tag")]
    pub root_tag: i32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            key: default_app_key(),
            root_tag: default_root_tag(),
        }
    }
}

fn default_app_key() -> String {
    "Demo".to_string()
}

fn default_root_tag() -> i32 {
    1
}

/// Load configuration from a file or search for default config files.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            Ok(config)
        }
        Some(path) => Err(anyhow::anyhow!("Config file {} not found", path.display())),
        None => Ok(Config::default()),
    }
}

/// Search for a configuration file in the current directory and its parents.
fn find_config_file() -> Option<PathBuf> {
    const CONFIG_NAMES: &[&str] = &["otter-bridge.toml", ".otter-bridge.toml"];

    let cwd = std::env::current_dir().ok()?;
    let mut dir = Some(cwd.as_path());
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.app.key, "Demo");
        assert!(config.bridge.buffer_calls_before_load);
        assert_eq!(config.bridge.queues.script.name, "otter-script");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[bridge]
escalate_native_exceptions = false

[bridge.queues.script]
name = "demo-js"
stack_size = 8388608

[app]
key = "Gallery"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(!config.bridge.escalate_native_exceptions);
        assert_eq!(config.bridge.queues.script.name, "demo-js");
        assert_eq!(config.bridge.queues.script.stack_size, Some(8 * 1024 * 1024));
        assert_eq!(config.bridge.queues.ui.name, "otter-ui");
        assert_eq!(config.app.key, "Gallery");
        assert_eq!(config.app.root_tag, 1);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/otter-bridge.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_demo_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demo/otter-bridge.toml");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.app.key, "Hello");
        assert_eq!(config.app.root_tag, 11);
        assert_eq!(config.bridge.queues.script.name, "demo-script");
    }
}
