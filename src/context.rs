use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{info, instrument};

use crate::error::PackError;

/// A staged build context: a temporary directory holding a flat copy of the
/// full source tree plus the rendered Dockerfile. The context owns its
/// tempdir, so an aborted build leaves nothing behind to be mistaken for a
/// valid image input.
#[derive(Debug)]
pub struct BuildContext {
    temp_dir: TempDir,
    dockerfile_path: PathBuf,
    /// Digest over relative paths and contents of every staged source file,
    /// in sorted order. Identical trees stage to identical digests.
    pub tree_sha256: String,
}

impl BuildContext {
    #[instrument(skip(dockerfile))]
    pub fn stage(source_root: &Path, dockerfile: &str) -> Result<Self, PackError> {
        if !source_root.is_dir() {
            return Err(PackError::Staging {
                reason: format!("source root is not a directory: {}", source_root.display()),
            });
        }

        let temp_dir = tempfile::tempdir().map_err(|e| PackError::Internal {
            reason: e.to_string(),
        })?;

        let mut hasher = Sha256::new();
        copy_tree(source_root, temp_dir.path(), Path::new(""), &mut hasher)?;
        let tree_sha256 = format!("{:x}", hasher.finalize());

        let dockerfile_path = temp_dir.path().join("Dockerfile");
        fs::write(&dockerfile_path, dockerfile).map_err(|e| PackError::Staging {
            reason: e.to_string(),
        })?;

        info!(
            "Staged build context at {}, tree SHA256: {}",
            temp_dir.path().display(),
            tree_sha256
        );

        Ok(Self {
            temp_dir,
            dockerfile_path,
            tree_sha256,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn dockerfile_path(&self) -> &Path {
        &self.dockerfile_path
    }
}

/// Copy `src` into `dst` with no exclusions, folding every file's relative
/// path and bytes into the tree digest. Entries are visited in sorted order
/// so the digest does not depend on directory iteration order.
fn copy_tree(
    src: &Path,
    dst: &Path,
    rel: &Path,
    hasher: &mut Sha256,
) -> Result<(), PackError> {
    let mut entries: Vec<_> = fs::read_dir(src)
        .map_err(|e| PackError::Staging {
            reason: format!("{}: {}", src.display(), e),
        })?
        .collect::<Result<_, _>>()
        .map_err(|e| PackError::Staging {
            reason: format!("{}: {}", src.display(), e),
        })?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let rel_path = rel.join(&name);

        let file_type = entry.file_type().map_err(|e| PackError::Staging {
            reason: format!("{}: {}", src_path.display(), e),
        })?;

        if file_type.is_dir() {
            fs::create_dir_all(&dst_path).map_err(|e| PackError::Staging {
                reason: format!("{}: {}", dst_path.display(), e),
            })?;
            copy_tree(&src_path, &dst_path, &rel_path, hasher)?;
        } else {
            let bytes = fs::read(&src_path).map_err(|e| PackError::Staging {
                reason: format!("{}: {}", src_path.display(), e),
            })?;
            hasher.update(rel_path.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(&bytes);
            fs::write(&dst_path, bytes).map_err(|e| PackError::Staging {
                reason: format!("{}: {}", dst_path.display(), e),
            })?;
        }
    }

    Ok(())
}
