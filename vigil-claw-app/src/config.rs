use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_PATH: &str = "./data/config.yaml";

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub vision: VisionConfig,
    /// Agent host CLI used for wake injection.
    pub wake_cli: String,
    pub database: PathBuf,
    /// Default X display for waits that do not name one.
    pub display: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VisionConfig {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

fn default_retries() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vision: VisionConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                model: "minicpm-v".to_string(),
                api_key: None,
                max_retries: 2,
            },
            wake_cli: "openclaw".to_string(),
            database: PathBuf::from("./data/vigil.db"),
            display: std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string()),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let content = std::fs::read_to_string(CONFIG_PATH)
            .context("Failed to read config.yaml. Run 'vigil-claw init' first.")?;
        let config: Self =
            serde_yaml::from_str(&content).context("Failed to parse config.yaml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = Path::new(CONFIG_PATH).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(CONFIG_PATH, content)?;
        Ok(())
    }

    pub fn exists() -> bool {
        Path::new(CONFIG_PATH).exists()
    }

    pub fn path() -> &'static str {
        CONFIG_PATH
    }

    pub fn validate(&self) -> Result<()> {
        if self.vision.base_url.is_empty() {
            bail!("vision.base_url cannot be empty");
        }
        if self.vision.model.is_empty() {
            bail!("vision.model cannot be empty");
        }
        if self.wake_cli.is_empty() {
            bail!("wake_cli cannot be empty");
        }
        if self.display.is_empty() {
            bail!("display cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.vision.base_url, config.vision.base_url);
        assert_eq!(parsed.wake_cli, config.wake_cli);
        assert_eq!(parsed.database, config.database);
    }

    #[test]
    fn test_empty_model_rejected() {
        let mut config = Config::default();
        config.vision.model = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_retries_defaults() {
        let yaml = "vision:\n  base_url: http://localhost:1234/v1\n  model: test\n\
                    wake_cli: openclaw\ndatabase: ./vigil.db\ndisplay: ':1'\n";
        let parsed: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.vision.max_retries, 2);
    }
}
