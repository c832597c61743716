use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::PackError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedImage {
    pub image_tag: String,
    pub built_at: DateTime<Utc>,
}

/// On-disk record of completed builds, keyed by content hash. A hit means
/// the exact input set (base image, manifest bytes, source tree) has already
/// produced an image, so the docker invocation is skipped entirely.
pub struct BuildCache {
    cache_dir: PathBuf,
    images: HashMap<String, CachedImage>,
}

/// Key for the dependency-install layer: the base image and the manifest
/// digest, nothing else. Source edits leave it untouched; a manifest edit
/// changes it. This mirrors the layer-invalidation contract of the recipe.
pub fn dependency_layer_key(base: &str, manifest_sha256: &str) -> String {
    format!("{base}:{manifest_sha256}")
}

/// Key for a full image: the dependency layer key plus the tree digest plus
/// the digest of the rendered recipe. The recipe digest matters because the
/// same tree built under a different configuration (port, entry command,
/// workdir) must not reuse an image whose declared env and entry differ.
pub fn image_key(
    base: &str,
    manifest_sha256: &str,
    tree_sha256: &str,
    recipe_sha256: &str,
) -> String {
    format!(
        "{}:{tree_sha256}:{recipe_sha256}",
        dependency_layer_key(base, manifest_sha256)
    )
}

impl BuildCache {
    pub fn new(cache_dir: PathBuf) -> Result<Self, PackError> {
        fs::create_dir_all(&cache_dir).map_err(|e| PackError::Internal {
            reason: e.to_string(),
        })?;

        let mut cache = Self {
            cache_dir,
            images: HashMap::new(),
        };
        cache.load()?;
        Ok(cache)
    }

    #[instrument(skip(self))]
    pub fn get(&self, key: &str) -> Option<&CachedImage> {
        self.images.get(key)
    }

    #[instrument(skip(self))]
    pub fn insert(&mut self, key: String, image_tag: String) {
        info!("Caching image {} under key {}", image_tag, key);
        self.images.insert(
            key,
            CachedImage {
                image_tag,
                built_at: Utc::now(),
            },
        );
    }

    fn cache_file(&self) -> PathBuf {
        self.cache_dir.join("image_cache.json")
    }

    fn load(&mut self) -> Result<(), PackError> {
        let cache_file = self.cache_file();
        if cache_file.exists() {
            let data = fs::read_to_string(&cache_file).map_err(|e| PackError::Internal {
                reason: e.to_string(),
            })?;
            self.images = serde_json::from_str(&data).map_err(|e| PackError::Internal {
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), PackError> {
        let data = serde_json::to_string_pretty(&self.images).map_err(|e| PackError::Internal {
            reason: e.to_string(),
        })?;
        fs::write(self.cache_file(), data).map_err(|e| PackError::Internal {
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn source_edit_keeps_dependency_layer_key() {
        let base = "python:3.11-slim";
        let manifest_sha = "aaaa";

        let before = image_key(base, manifest_sha, "tree-v1", "recipe");
        let after = image_key(base, manifest_sha, "tree-v2", "recipe");
        assert_ne!(before, after);
        assert_eq!(
            dependency_layer_key(base, manifest_sha),
            dependency_layer_key(base, manifest_sha)
        );
    }

    #[test]
    fn recipe_edit_invalidates_image_key() {
        let base = "python:3.11-slim";
        assert_ne!(
            image_key(base, "aaaa", "tree-v1", "recipe-v1"),
            image_key(base, "aaaa", "tree-v1", "recipe-v2")
        );
    }

    #[test]
    fn manifest_edit_invalidates_dependency_layer_key() {
        let base = "python:3.11-slim";
        assert_ne!(
            dependency_layer_key(base, "aaaa"),
            dependency_layer_key(base, "bbbb")
        );
    }

    #[test]
    fn cache_persists_across_reload() {
        let dir = tempdir().unwrap();
        let key = image_key("python:3.11-slim", "aaaa", "tree-v1", "recipe");

        let mut cache = BuildCache::new(dir.path().to_path_buf()).unwrap();
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), "demopack/demo:aaaa".to_string());
        cache.save().unwrap();

        let reloaded = BuildCache::new(dir.path().to_path_buf()).unwrap();
        let hit = reloaded.get(&key).unwrap();
        assert_eq!(hit.image_tag, "demopack/demo:aaaa");
    }

    #[test]
    fn missing_cache_file_starts_empty() {
        let dir = tempdir().unwrap();
        let cache = BuildCache::new(dir.path().join("fresh")).unwrap();
        assert!(cache.get("anything").is_none());
    }
}
