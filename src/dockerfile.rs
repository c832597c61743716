use crate::config::{AppConfig, ImageConfig};

/// Render the build recipe for a Python web demo image.
///
/// The stage order is the whole point: the manifest is copied and installed
/// before the rest of the source so that source-only edits reuse the cached
/// dependency-install layer, while a manifest edit invalidates it. `PORT`
/// goes into the image environment rather than the entry command, so the
/// hosting platform can override it at run time.
pub fn render(image: &ImageConfig, app: &AppConfig) -> String {
    let entry = serde_json::to_string(&app.entry).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"FROM {base}

WORKDIR {workdir}

# Dependency layer first; reinstalls only when the manifest changes
COPY {manifest} ./
RUN pip install --no-cache-dir -r {manifest}

COPY . {workdir}

ENV PORT={port}

CMD {entry}
"#,
        base = image.base,
        workdir = image.workdir,
        manifest = app.manifest,
        port = app.port,
        entry = entry,
    )
}
