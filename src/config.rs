use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PackError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub image: ImageConfig,
    pub app: AppConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    /// Pinned base runtime reference. A minor-version tag keeps rebuilds
    /// reproducible; `latest` would not.
    pub base: String,
    /// Working directory inside the image; all staging resolves against it.
    pub workdir: String,
    /// Repository prefix for built image tags.
    pub tag_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Entry command argument vector, rendered verbatim as the exec-form CMD.
    pub entry: Vec<String>,
    /// Dependency manifest file name, resolved against the source root.
    pub manifest: String,
    /// Default listening port declared in the image environment. The hosting
    /// platform may override it at run time; the entry command never embeds it.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: ImageConfig {
                base: "python:3.11-slim".to_string(),
                workdir: "/app".to_string(),
                tag_prefix: "demopack".to_string(),
            },
            app: AppConfig {
                entry: vec!["python".to_string(), "app.py".to_string()],
                manifest: "requirements.txt".to_string(),
                port: 8080,
            },
            cache: CacheConfig {
                dir: "data/cache".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self, PackError> {
        let contents = fs::read_to_string(path).map_err(|e| PackError::Config {
            reason: format!("{}: {}", path.display(), e),
        })?;
        toml::from_str(&contents).map_err(|e| PackError::Config {
            reason: format!("{}: {}", path.display(), e),
        })
    }

    /// Load from the first config file that exists, falling back to defaults.
    pub fn load() -> Self {
        let config_paths = ["demopack.toml", "configs/default.toml"];
        for path in &config_paths {
            let path = Path::new(path);
            if path.exists() {
                match Self::load_from(path) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Ignoring bad config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }
}
