pub mod builder;
pub mod cache;
pub mod config;
pub mod context;
pub mod dockerfile;
pub mod error;
pub mod launcher;
pub mod manifest;

pub use builder::{docker_available, BuildOutcome, BuildStage, ImageBuilder, PreparedBuild};
pub use cache::{dependency_layer_key, image_key, BuildCache};
pub use config::Config;
pub use context::BuildContext;
pub use error::PackError;
pub use manifest::{Manifest, Requirement};
