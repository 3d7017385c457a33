//! Flow templates stored as JSON files.

use evalcore::FlowTemplate;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Templates directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid flow template {file}: {source}")]
    Invalid {
        file: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse one template file.
pub async fn load_template(path: &Path) -> Result<FlowTemplate, TemplateError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let template: FlowTemplate =
        serde_json::from_slice(&bytes).map_err(|source| TemplateError::Invalid {
            file: file_name(path),
            source,
        })?;
    tracing::info!(template_id = %template.id, name = %template.name, "Loaded flow template");
    Ok(template)
}

/// Every `*.json` template in `dir`, sorted by file name.
pub async fn load_templates(dir: &Path) -> Result<Vec<FlowTemplate>, TemplateError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TemplateError::DirectoryNotFound(dir.to_path_buf()))
        }
        Err(source) => {
            return Err(TemplateError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut paths = Vec::new();
    loop {
        let entry = entries.next_entry().await.map_err(|source| TemplateError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let Some(entry) = entry else { break };
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort_by_key(|p| file_name(p));

    tracing::debug!(dir = %dir.display(), count = paths.len(), "Loading flow templates");
    let mut templates = Vec::with_capacity(paths.len());
    for path in paths {
        templates.push(load_template(&path).await?);
    }
    Ok(templates)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
