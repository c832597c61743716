use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::error::PackError;

/// The dependency manifest: an ordered list of requirement specifiers read
/// from a fixed file in the source tree. Its content digest is the cache key
/// for the dependency-install layer, so the digest is taken over the raw
/// bytes, not the parsed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub file_name: String,
    pub sha256: String,
    pub requirements: Vec<Requirement>,
    /// Installer option lines (`-r extra.txt`, `--index-url …`), passed
    /// through untouched; their meaning belongs to the installer.
    pub options: Vec<String>,
}

/// One requirement specifier, kept verbatim for the installer. The name and
/// version pin are split out only for display and inspection; the exact
/// grammar is the installer's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    pub spec: String,
    pub name: String,
    pub pin: Option<String>,
}

impl Manifest {
    #[instrument(skip(source_root))]
    pub fn load(source_root: &Path, file_name: &str) -> Result<Self, PackError> {
        let path = source_root.join(file_name);
        let bytes = fs::read(&path).map_err(|e| PackError::Manifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let sha256 = format!("{:x}", hasher.finalize());

        let text = String::from_utf8(bytes).map_err(|e| PackError::Manifest {
            path: path.display().to_string(),
            reason: format!("not valid UTF-8: {}", e),
        })?;

        let mut requirements = Vec::new();
        let mut options = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('-') {
                options.push(line.to_string());
                continue;
            }
            let requirement = parse_requirement(line).ok_or_else(|| PackError::Manifest {
                path: path.display().to_string(),
                reason: format!("line {}: not a requirement specifier: {:?}", lineno + 1, line),
            })?;
            requirements.push(requirement);
        }

        info!(
            "Loaded manifest {} with {} requirements, SHA256: {}",
            path.display(),
            requirements.len(),
            sha256
        );

        Ok(Self {
            file_name: file_name.to_string(),
            sha256,
            requirements,
            options,
        })
    }
}

/// Light syntactic check only. The line must start with a package name; the
/// rest (extras, version operators, markers) is passed through untouched.
fn parse_requirement(line: &str) -> Option<Requirement> {
    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(line.len());
    if name_end == 0 {
        return None;
    }
    let name = &line[..name_end];
    let rest = &line[name_end..];

    // A bare name followed by more letters separated by whitespace is a typo
    // pip would reject; catch it here for a better diagnostic.
    if rest.trim_start().starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return None;
    }

    let pin = rest
        .strip_prefix("==")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    Some(Requirement {
        spec: line.to_string(),
        name: name.to_string(),
        pin,
    })
}
