use tokio::process::Command;
use tracing::{info, instrument};

use crate::error::PackError;

/// Argument vector for `docker run`. Exactly one port is published. With no
/// override the image's declared `ENV PORT` stands; an override is passed
/// through the environment, never by rewriting the entry command, so the
/// application keeps ownership of reading the convention.
pub fn run_args(image_tag: &str, declared_port: u16, port_override: Option<u16>) -> Vec<String> {
    let port = port_override.unwrap_or(declared_port);
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-p".to_string(),
        format!("{port}:{port}"),
    ];
    if port_override.is_some() {
        args.push("-e".to_string());
        args.push(format!("PORT={port}"));
    }
    args.push(image_tag.to_string());
    args
}

/// Start a container from a built image and wait for it to exit. Exit code
/// semantics belong to the application; we only relay them.
#[instrument]
pub async fn run_container(
    image_tag: &str,
    declared_port: u16,
    port_override: Option<u16>,
) -> Result<i32, PackError> {
    let args = run_args(image_tag, declared_port, port_override);
    info!("Launching: docker {}", args.join(" "));

    let status = Command::new("docker")
        .args(&args)
        .status()
        .await
        .map_err(|e| PackError::Docker {
            message: e.to_string(),
        })?;

    Ok(status.code().unwrap_or(-1))
}
