use thiserror::Error;

use crate::builder::BuildStage;

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Base image error: {reason}")]
    BaseImage { reason: String },

    #[error("Manifest error at {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("Dependency install failed: {reason}")]
    Install { reason: String },

    #[error("Staging error: {reason}")]
    Staging { reason: String },

    #[error("Docker error: {message}")]
    Docker { message: String },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl PackError {
    /// The lifecycle stage the pipeline was attempting when this error
    /// surfaced. Every failure is terminal; there is no transition out of a
    /// failed build.
    pub fn failed_stage(&self) -> BuildStage {
        match self {
            PackError::BaseImage { .. } => BuildStage::BaseSelected,
            PackError::Manifest { .. } => BuildStage::DepsStaged,
            PackError::Install { .. } => BuildStage::DepsInstalled,
            PackError::Staging { .. } => BuildStage::SourceStaged,
            PackError::Docker { .. } => BuildStage::Built,
            PackError::Config { .. } => BuildStage::NotStarted,
            PackError::Internal { .. } => BuildStage::NotStarted,
        }
    }
}
