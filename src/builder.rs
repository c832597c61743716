use std::fmt;
use std::path::Path;
use std::process::Stdio;

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{error, info, instrument};

use crate::cache::{image_key, BuildCache};
use crate::config::Config;
use crate::context::BuildContext;
use crate::dockerfile;
use crate::error::PackError;
use crate::manifest::Manifest;

/// Build lifecycle. Strictly linear: each stage either completes and hands
/// off to the next, or the build terminates. There is no transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    NotStarted,
    BaseSelected,
    DepsStaged,
    DepsInstalled,
    SourceStaged,
    Configured,
    EntryDeclared,
    Built,
}

impl BuildStage {
    pub fn next(self) -> BuildStage {
        match self {
            BuildStage::NotStarted => BuildStage::BaseSelected,
            BuildStage::BaseSelected => BuildStage::DepsStaged,
            BuildStage::DepsStaged => BuildStage::DepsInstalled,
            BuildStage::DepsInstalled => BuildStage::SourceStaged,
            BuildStage::SourceStaged => BuildStage::Configured,
            BuildStage::Configured => BuildStage::EntryDeclared,
            BuildStage::EntryDeclared => BuildStage::Built,
            BuildStage::Built => BuildStage::Built,
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::NotStarted => "not-started",
            BuildStage::BaseSelected => "base-selected",
            BuildStage::DepsStaged => "deps-staged",
            BuildStage::DepsInstalled => "deps-installed",
            BuildStage::SourceStaged => "source-staged",
            BuildStage::Configured => "configured",
            BuildStage::EntryDeclared => "entry-declared",
            BuildStage::Built => "built",
        };
        write!(f, "{name}")
    }
}

/// Everything needed for the docker invocation, assembled without touching
/// the docker daemon. Keeping preparation separate from the build keeps the
/// whole pipeline short of docker testable.
#[derive(Debug)]
pub struct PreparedBuild {
    pub manifest: Manifest,
    pub dockerfile: String,
    pub context: BuildContext,
    pub image_tag: String,
    pub cache_key: String,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub image_tag: String,
    pub cached: bool,
}

pub struct ImageBuilder {
    config: Config,
    docker_command: String,
}

/// Check that the docker daemon is reachable before starting a build, so
/// daemon problems fail fast instead of mid-pipeline.
pub async fn docker_available() -> bool {
    match Command::new("docker")
        .args(["version", "--format", "{{.Server.Version}}"])
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

impl ImageBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            docker_command: "docker".to_string(),
        }
    }

    /// Point the builder at a different docker binary.
    pub fn with_docker_command(mut self, command: impl Into<String>) -> Self {
        self.docker_command = command.into();
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the pipeline up to (but not including) the docker invocation:
    /// base selection, manifest load, recipe rendering, context staging.
    #[instrument(skip(self))]
    pub fn prepare(&self, source_root: &Path) -> Result<PreparedBuild, PackError> {
        let mut stage = BuildStage::NotStarted;

        // Base selection. The reference must carry a version pin; an
        // unpinned base would make rebuilds non-reproducible.
        let base = &self.config.image.base;
        match base.split_once(':') {
            Some((name, tag)) if !name.is_empty() && !tag.is_empty() && tag != "latest" => {}
            _ => {
                return Err(PackError::BaseImage {
                    reason: format!("base reference is not pinned: {base:?}"),
                })
            }
        }
        stage = stage.next();
        info!(%stage, "Selected base runtime {}", base);

        // Manifest must be present and parseable before anything is staged.
        let manifest = Manifest::load(source_root, &self.config.app.manifest)?;
        stage = stage.next();
        info!(%stage, "Manifest ready, SHA256: {}", manifest.sha256);

        let dockerfile = dockerfile::render(&self.config.image, &self.config.app);
        let recipe_sha256 = format!("{:x}", Sha256::digest(dockerfile.as_bytes()));
        let context = BuildContext::stage(source_root, &dockerfile)?;
        stage = stage.next().next();
        info!(%stage, "Staged source tree, SHA256: {}", context.tree_sha256);

        let image_tag = self.image_tag(source_root, &context.tree_sha256)?;
        let cache_key = image_key(base, &manifest.sha256, &context.tree_sha256, &recipe_sha256);

        Ok(PreparedBuild {
            manifest,
            dockerfile,
            context,
            image_tag,
            cache_key,
        })
    }

    /// Full build: prepare, consult the cache, then hand the staged context
    /// to `docker build`. Any step failing aborts with no image tagged and
    /// nothing recorded in the cache.
    #[instrument(skip(self, cache))]
    pub async fn build(
        &self,
        source_root: &Path,
        cache: &mut BuildCache,
        no_cache: bool,
    ) -> Result<BuildOutcome, PackError> {
        let prepared = self.prepare(source_root)?;

        if !no_cache {
            if let Some(hit) = cache.get(&prepared.cache_key) {
                info!("Inputs unchanged, reusing image {}", hit.image_tag);
                return Ok(BuildOutcome {
                    image_tag: hit.image_tag.clone(),
                    cached: true,
                });
            }
        }

        self.docker_build(&prepared).await?;

        cache.insert(prepared.cache_key.clone(), prepared.image_tag.clone());
        cache.save()?;

        Ok(BuildOutcome {
            image_tag: prepared.image_tag,
            cached: false,
        })
    }

    async fn docker_build(&self, prepared: &PreparedBuild) -> Result<(), PackError> {
        info!("Building image: {}", prepared.image_tag);
        info!("Build context: {:?}", prepared.context.path());

        let build_result = Command::new(&self.docker_command)
            .arg("build")
            .arg("-t")
            .arg(&prepared.image_tag)
            .arg("-f")
            .arg(prepared.context.dockerfile_path())
            .arg(prepared.context.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PackError::Docker {
                message: e.to_string(),
            })?;

        if !build_result.status.success() {
            let stdout = String::from_utf8_lossy(&build_result.stdout);
            let stderr = String::from_utf8_lossy(&build_result.stderr);
            error!("Docker build failed - stdout: {}", stdout);
            error!("Docker build failed - stderr: {}", stderr);
            // docker relays the failing step's output on stderr; a failing
            // RUN pip step is an install error, anything else is docker's.
            if stderr.contains("pip install") {
                return Err(PackError::Install {
                    reason: stderr.to_string(),
                });
            }
            return Err(PackError::Docker {
                message: format!("docker build failed: {stderr}"),
            });
        }

        info!("Built image: {}", prepared.image_tag);
        Ok(())
    }

    /// `<prefix>/<app-name>:<tree-digest-prefix>`, app name taken from the
    /// source directory name.
    fn image_tag(&self, source_root: &Path, tree_sha256: &str) -> Result<String, PackError> {
        let name = source_root
            .file_name()
            .and_then(|n| n.to_str())
            .map(sanitize_name)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PackError::Internal {
                reason: format!("cannot derive app name from {}", source_root.display()),
            })?;
        let short = &tree_sha256[..12.min(tree_sha256.len())];
        Ok(format!("{}/{}:{}", self.config.image.tag_prefix, name, short))
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn demo_tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "gradio==4.0.0\n").unwrap();
        fs::write(dir.path().join("app.py"), "print('demo')\n").unwrap();
        dir
    }

    #[test]
    fn stages_advance_linearly_to_built() {
        let mut stage = BuildStage::NotStarted;
        let expected = [
            BuildStage::BaseSelected,
            BuildStage::DepsStaged,
            BuildStage::DepsInstalled,
            BuildStage::SourceStaged,
            BuildStage::Configured,
            BuildStage::EntryDeclared,
            BuildStage::Built,
        ];
        for next in expected {
            stage = stage.next();
            assert_eq!(stage, next);
        }
        // Built is terminal.
        assert_eq!(BuildStage::Built.next(), BuildStage::Built);
    }

    #[test]
    fn prepare_assembles_tag_and_cache_key() {
        let source = demo_tree();
        let builder = ImageBuilder::new(Config::default());

        let prepared = builder.prepare(source.path()).unwrap();
        assert!(prepared.image_tag.starts_with("demopack/"));
        assert!(prepared.image_tag.contains(&prepared.context.tree_sha256[..12]));
        assert!(prepared.cache_key.contains(&prepared.manifest.sha256));
        assert!(prepared.dockerfile.contains("ENV PORT=8080"));
    }

    #[test]
    fn prepare_is_deterministic() {
        let source = demo_tree();
        let builder = ImageBuilder::new(Config::default());

        let first = builder.prepare(source.path()).unwrap();
        let second = builder.prepare(source.path()).unwrap();
        assert_eq!(first.image_tag, second.image_tag);
        assert_eq!(first.cache_key, second.cache_key);
        assert_eq!(first.dockerfile, second.dockerfile);
    }

    #[test]
    fn unpinned_base_is_rejected() {
        let source = demo_tree();
        let mut config = Config::default();
        config.image.base = "python".to_string();
        let err = ImageBuilder::new(config)
            .prepare(source.path())
            .unwrap_err();
        assert!(matches!(err, PackError::BaseImage { .. }));
        assert_eq!(err.failed_stage(), BuildStage::BaseSelected);

        let mut config = Config::default();
        config.image.base = "python:latest".to_string();
        let err = ImageBuilder::new(config)
            .prepare(source.path())
            .unwrap_err();
        assert!(matches!(err, PackError::BaseImage { .. }));
    }

    #[test]
    fn missing_manifest_aborts_before_staging() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.py"), "print('demo')\n").unwrap();

        let err = ImageBuilder::new(Config::default())
            .prepare(dir.path())
            .unwrap_err();
        assert!(matches!(err, PackError::Manifest { .. }));
        assert_eq!(err.failed_stage(), BuildStage::DepsStaged);
    }

    #[test]
    fn source_edit_changes_tag_but_not_layer_key() {
        let source = demo_tree();
        let builder = ImageBuilder::new(Config::default());
        let before = builder.prepare(source.path()).unwrap();

        fs::write(source.path().join("app.py"), "print('edited')\n").unwrap();
        let after = builder.prepare(source.path()).unwrap();

        assert_ne!(before.image_tag, after.image_tag);
        assert_eq!(before.manifest.sha256, after.manifest.sha256);
        assert_eq!(
            crate::cache::dependency_layer_key("python:3.11-slim", &before.manifest.sha256),
            crate::cache::dependency_layer_key("python:3.11-slim", &after.manifest.sha256),
        );
    }

    #[test]
    fn config_change_invalidates_cache_key() {
        let source = demo_tree();
        let default_build = ImageBuilder::new(Config::default())
            .prepare(source.path())
            .unwrap();

        let mut config = Config::default();
        config.app.port = 7860;
        let port_build = ImageBuilder::new(config).prepare(source.path()).unwrap();
        assert_ne!(port_build.dockerfile, default_build.dockerfile);
        assert_ne!(port_build.cache_key, default_build.cache_key);

        let mut config = Config::default();
        config.app.entry = vec!["python".into(), "other.py".into()];
        let entry_build = ImageBuilder::new(config).prepare(source.path()).unwrap();
        assert_ne!(entry_build.cache_key, default_build.cache_key);

        // The tree is unchanged, so the tag and layer key still agree.
        assert_eq!(port_build.image_tag, default_build.image_tag);
        assert_eq!(port_build.manifest.sha256, default_build.manifest.sha256);
    }

    #[test]
    fn image_names_are_sanitized() {
        assert_eq!(sanitize_name("My Demo App"), "my-demo-app");
        assert_eq!(sanitize_name("agent_v2.0"), "agent_v2.0");
    }
}
